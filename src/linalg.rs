//! Small dense linear algebra for the hybrid policy.
//!
//! Matrices are row-major `Vec<f64>` of length `dim * dim`, the same flat
//! representation the rest of the crate uses for model state. Everything here
//! is sized for feature dimensions on the order of ten (one entry per
//! structural probe), so inverses are recomputed from scratch at every use
//! rather than cached or factored incrementally. Correctness wins over
//! throughput at this scale.

/// Dense identity matrix of size `dim * dim`.
pub(crate) fn identity(dim: usize) -> Vec<f64> {
    let mut m = vec![0.0; dim * dim];
    for i in 0..dim {
        m[i * dim + i] = 1.0;
    }
    m
}

/// Inner product of two equal-length vectors.
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    let mut s = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        s += x * y;
    }
    s
}

/// `m @ x` for a row-major `dim x dim` matrix.
pub(crate) fn mat_vec(m: &[f64], dim: usize, x: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; dim];
    for i in 0..dim {
        let row = &m[i * dim..(i + 1) * dim];
        out[i] = dot(row, x);
    }
    out
}

/// `m^T @ x` for a row-major `dim x dim` matrix.
pub(crate) fn mat_tvec(m: &[f64], dim: usize, x: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; dim];
    for i in 0..dim {
        let xi = x[i];
        if xi == 0.0 {
            continue;
        }
        let row = &m[i * dim..(i + 1) * dim];
        for (o, v) in out.iter_mut().zip(row.iter()) {
            *o += xi * v;
        }
    }
    out
}

/// `a @ b` for row-major `dim x dim` matrices.
pub(crate) fn mat_mul(a: &[f64], b: &[f64], dim: usize) -> Vec<f64> {
    let mut out = vec![0.0; dim * dim];
    for i in 0..dim {
        for k in 0..dim {
            let aik = a[i * dim + k];
            if aik == 0.0 {
                continue;
            }
            let brow = &b[k * dim..(k + 1) * dim];
            let orow = &mut out[i * dim..(i + 1) * dim];
            for (o, v) in orow.iter_mut().zip(brow.iter()) {
                *o += aik * v;
            }
        }
    }
    out
}

/// Transpose of a row-major `dim x dim` matrix.
pub(crate) fn transpose(m: &[f64], dim: usize) -> Vec<f64> {
    let mut out = vec![0.0; dim * dim];
    for i in 0..dim {
        for j in 0..dim {
            out[j * dim + i] = m[i * dim + j];
        }
    }
    out
}

/// In-place `m += scale * x x^T`.
pub(crate) fn add_outer(m: &mut [f64], dim: usize, x: &[f64], scale: f64) {
    for i in 0..dim {
        let xi = scale * x[i];
        if xi == 0.0 {
            continue;
        }
        let row = &mut m[i * dim..(i + 1) * dim];
        for (r, xj) in row.iter_mut().zip(x.iter()) {
            *r += xi * xj;
        }
    }
}

/// In-place `a += b` (element-wise, equal lengths).
pub(crate) fn add_assign(a: &mut [f64], b: &[f64]) {
    for (x, y) in a.iter_mut().zip(b.iter()) {
        *x += y;
    }
}

/// In-place `a -= b` (element-wise, equal lengths).
pub(crate) fn sub_assign(a: &mut [f64], b: &[f64]) {
    for (x, y) in a.iter_mut().zip(b.iter()) {
        *x -= y;
    }
}

/// In-place `y += scale * x`.
pub(crate) fn axpy(y: &mut [f64], scale: f64, x: &[f64]) {
    for (yi, xi) in y.iter_mut().zip(x.iter()) {
        *yi += scale * xi;
    }
}

/// Quadratic form `x^T m x`.
pub(crate) fn quad_form(m: &[f64], dim: usize, x: &[f64]) -> f64 {
    let mx = mat_vec(m, dim, x);
    dot(x, &mx)
}

/// Exact inverse via Gauss–Jordan with partial pivoting.
///
/// Returns `None` when a pivot falls below the tolerance, i.e. the matrix is
/// singular or close enough to it that the elimination would amplify noise.
pub(crate) fn invert(m: &[f64], dim: usize) -> Option<Vec<f64>> {
    const PIVOT_TOL: f64 = 1e-12;

    let mut a = m.to_vec();
    let mut inv = identity(dim);

    for col in 0..dim {
        // Partial pivot: largest magnitude entry at or below the diagonal.
        let mut pivot_row = col;
        let mut pivot_abs = a[col * dim + col].abs();
        for row in (col + 1)..dim {
            let v = a[row * dim + col].abs();
            if v > pivot_abs {
                pivot_abs = v;
                pivot_row = row;
            }
        }
        if !pivot_abs.is_finite() || pivot_abs < PIVOT_TOL {
            return None;
        }
        if pivot_row != col {
            for j in 0..dim {
                a.swap(col * dim + j, pivot_row * dim + j);
                inv.swap(col * dim + j, pivot_row * dim + j);
            }
        }

        let pivot = a[col * dim + col];
        for j in 0..dim {
            a[col * dim + j] /= pivot;
            inv[col * dim + j] /= pivot;
        }

        for row in 0..dim {
            if row == col {
                continue;
            }
            let factor = a[row * dim + col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..dim {
                a[row * dim + j] -= factor * a[col * dim + j];
                inv[row * dim + j] -= factor * inv[col * dim + j];
            }
        }
    }
    Some(inv)
}

/// Inverse with a widening ridge fallback.
///
/// The model matrices are identity plus positive-semidefinite rank-one sums,
/// so they are invertible in exact arithmetic. If floating-point drift still
/// produces a near-singular matrix, retry with `m + eps * I` for geometrically
/// widening `eps` before giving up. `None` from here is a fatal numerical
/// error for the caller.
pub(crate) fn invert_ridge(m: &[f64], dim: usize) -> Option<Vec<f64>> {
    if let Some(inv) = invert(m, dim) {
        return Some(inv);
    }
    let mut eps = 1e-10;
    while eps <= 1e-2 {
        let mut widened = m.to_vec();
        for i in 0..dim {
            widened[i * dim + i] += eps;
        }
        if let Some(inv) = invert(&widened, dim) {
            return Some(inv);
        }
        eps *= 10.0;
    }
    None
}
