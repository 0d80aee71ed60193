//! Ordinary and weighted least squares over row-major matrices.
//!
//! Solves the normal equations with Gaussian elimination; falls back to a
//! small ridge term when the system is singular. Matrices here are tens of
//! rows by a handful of columns, so no external linear algebra is pulled in.

/// Pivot magnitude under which the system counts as singular.
const SINGULAR_EPS: f64 = 1e-12;

/// Column variance under which a column counts as static.
const STATIC_EPS: f64 = 1e-12;

/// Ridge term for the fallback solve.
const RIDGE_LAMBDA: f64 = 1e-8;

/// Indices of columns that carry information (non-static).
pub fn informative_columns(rows: &[Vec<f64>]) -> Vec<usize> {
    if rows.is_empty() {
        return Vec::new();
    }
    let ncols = rows[0].len();
    let n = rows.len() as f64;
    let mut kept = Vec::new();
    for c in 0..ncols {
        let mean = rows.iter().map(|r| r[c]).sum::<f64>() / n;
        let var = rows.iter().map(|r| (r[c] - mean).powi(2)).sum::<f64>() / n;
        if var > STATIC_EPS {
            kept.push(c);
        }
    }
    kept
}

/// Project rows onto a column subset.
pub fn select_columns(rows: &[Vec<f64>], cols: &[usize]) -> Vec<Vec<f64>> {
    rows.iter()
        .map(|r| cols.iter().map(|&c| r[c]).collect())
        .collect()
}

/// Solve a dense symmetric system in place. Returns `None` on a singular
/// pivot.
fn solve_dense(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        // Partial pivoting.
        let pivot_row = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot_row][col].abs() < SINGULAR_EPS {
            return None;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut acc = b[row];
        for k in (row + 1)..n {
            acc -= a[row][k] * x[k];
        }
        x[row] = acc / a[row][row];
    }
    Some(x)
}

/// Weighted least squares through the normal equations. `x` rows must all
/// have the same width; `weights` defaults to uniform. The returned vector
/// has one coefficient per column of `x` — append a ones column first if an
/// intercept is wanted.
pub fn solve(x: &[Vec<f64>], y: &[f64], weights: Option<&[f64]>) -> Option<Vec<f64>> {
    assert_eq!(x.len(), y.len(), "row count mismatch");
    if x.is_empty() || x[0].is_empty() {
        return None;
    }
    let ncols = x[0].len();

    // A = XᵀWX, b = XᵀWy.
    let mut a = vec![vec![0.0; ncols]; ncols];
    let mut b = vec![0.0; ncols];
    for (i, (row, &yv)) in x.iter().zip(y).enumerate() {
        assert_eq!(row.len(), ncols, "ragged design matrix");
        let w = weights.map_or(1.0, |ws| ws[i]);
        for c in 0..ncols {
            b[c] += w * row[c] * yv;
            for d in c..ncols {
                a[c][d] += w * row[c] * row[d];
            }
        }
    }
    for c in 0..ncols {
        for d in 0..c {
            a[c][d] = a[d][c];
        }
    }

    if let Some(sol) = solve_dense(a.clone(), b.clone()) {
        return Some(sol);
    }
    // Singular: retry with a ridge term.
    for (c, row) in a.iter_mut().enumerate() {
        row[c] += RIDGE_LAMBDA;
    }
    solve_dense(a, b)
}

/// Append a ones column to every row (intercept term).
pub fn augment_ones(rows: &mut [Vec<f64>]) {
    for r in rows.iter_mut() {
        r.push(1.0);
    }
}

/// Mean absolute residual of a fitted coefficient vector (last coefficient
/// is the intercept when `rows` were augmented).
pub fn mean_abs_residual(rows: &[Vec<f64>], y: &[f64], coefs: &[f64]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    let total: f64 = rows
        .iter()
        .zip(y)
        .map(|(r, &yv)| {
            let pred: f64 = r.iter().zip(coefs).map(|(a, b)| a * b).sum();
            (yv - pred).abs()
        })
        .sum();
    total / rows.len() as f64
}
