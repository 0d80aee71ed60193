//! The incremental linear model owned by each learned mode.
//!
//! A model is fitted over a restricted input layout: the concatenated
//! property blocks of the signature objects its coefficients actually use.
//! `init_fit` discovers that restriction; afterwards examples arrive and
//! leave already restricted.

use serde::{Deserialize, Serialize};
use tracing::debug;

use strata_core::sig::SceneSig;

use crate::ols;

/// Coefficient magnitude under which an input column counts as unused.
const COEF_EPS: f64 = 1e-9;

/// A linear predictive model with its own training rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinearModel {
    rows: Vec<Vec<f64>>,
    ys: Vec<f64>,
    coefs: Vec<f64>,
    intercept: f64,
    constant: bool,
    fitted: bool,
    error: f64,
    refit: bool,
}

impl LinearModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Mean absolute training residual at the last successful fit.
    pub fn train_error(&self) -> f64 {
        self.error
    }

    /// A constant model predicts its intercept and takes no input.
    pub fn is_const(&self) -> bool {
        self.constant
    }

    pub fn needs_refit(&self) -> bool {
        self.refit
    }

    /// Coefficients over the restricted layout, then the intercept.
    pub fn coefficients(&self) -> (&[f64], f64) {
        (&self.coefs, self.intercept)
    }

    /// Fit from scratch on full-layout rows, discovering which signature
    /// objects the model needs. Returns the used object indices (into
    /// `sig`), target first; empty means a constant model.
    ///
    /// The model's training rows are replaced by the restriction of `x` to
    /// the used objects' blocks, in returned order.
    pub fn init_fit(
        &mut self,
        x: &[Vec<f64>],
        y: &[f64],
        target: usize,
        sig: &SceneSig,
    ) -> Vec<usize> {
        assert!(!x.is_empty(), "init_fit on empty data");
        assert_eq!(x[0].len(), sig.dim(), "signature dimension mismatch");

        let kept = ols::informative_columns(x);
        let full_coefs = if kept.is_empty() {
            None
        } else {
            let mut design = ols::select_columns(x, &kept);
            ols::augment_ones(&mut design);
            ols::solve(&design, y, None).map(|sol| {
                let mut full = vec![0.0; x[0].len()];
                for (ci, &c) in kept.iter().enumerate() {
                    full[c] = sol[ci];
                }
                full
            })
        };

        let Some(full_coefs) = full_coefs else {
            // All inputs static (or unsolvable): constant relationship.
            self.rows = vec![Vec::new(); x.len()];
            self.ys = y.to_vec();
            self.coefs = Vec::new();
            self.constant = true;
            self.fitted = true;
            self.refit = false;
            self.intercept = mean(y);
            self.error = mean_abs_dev(y, self.intercept);
            debug!(rows = x.len(), value = self.intercept, "fitted constant model");
            return Vec::new();
        };

        // Objects whose block carries any nonzero coefficient; target first.
        let mut used = vec![target];
        for (i, entry) in sig.entries().iter().enumerate() {
            if i == target {
                continue;
            }
            let block = &full_coefs[entry.start..entry.start + entry.props.len()];
            if block.iter().any(|c| c.abs() > COEF_EPS) {
                used.push(i);
            }
        }

        self.rows = x
            .iter()
            .map(|row| restrict_row(row, &used, sig))
            .collect();
        self.ys = y.to_vec();
        self.constant = false;
        self.refit = false;
        if !self.fit_inner() {
            // Restricted refit cannot realistically fail after the full fit
            // succeeded, but stay honest about it.
            self.fitted = false;
        }
        debug!(
            rows = x.len(),
            used_objects = used.len(),
            error = self.error,
            "fitted linear model"
        );
        used
    }

    /// Refit on the current training rows. Returns false when the fit is
    /// impossible (no rows, singular beyond recovery).
    pub fn fit(&mut self) -> bool {
        if self.ys.is_empty() {
            self.refit = false;
            return false;
        }
        if self.constant {
            self.intercept = mean(&self.ys);
            self.error = mean_abs_dev(&self.ys, self.intercept);
            self.refit = false;
            return true;
        }
        let ok = self.fit_inner();
        self.refit = false;
        ok
    }

    fn fit_inner(&mut self) -> bool {
        let width = self.rows.first().map_or(0, Vec::len);
        let kept = ols::informative_columns(&self.rows);
        let sol = if kept.is_empty() {
            // Data became static within the restricted layout; intercept-only.
            Some(Vec::new())
        } else {
            let mut design = ols::select_columns(&self.rows, &kept);
            ols::augment_ones(&mut design);
            ols::solve(&design, &self.ys, None)
        };
        let Some(sol) = sol else {
            return false;
        };

        self.coefs = vec![0.0; width];
        if kept.is_empty() {
            self.intercept = mean(&self.ys);
        } else {
            for (ci, &c) in kept.iter().enumerate() {
                self.coefs[c] = sol[ci];
            }
            self.intercept = sol[kept.len()];
        }
        self.fitted = true;
        self.error = self
            .rows
            .iter()
            .zip(&self.ys)
            .map(|(r, &yv)| (yv - self.dot(r)).abs())
            .sum::<f64>()
            / self.ys.len() as f64;
        true
    }

    /// Append a restricted-layout training row; returns its row index.
    /// With `update_refit`, flags the model for refitting unless it already
    /// explains the new example.
    pub fn add_example(&mut self, x: &[f64], y: f64, update_refit: bool) -> usize {
        if !self.constant {
            if let Some(first) = self.rows.first() {
                assert_eq!(x.len(), first.len(), "restricted row width mismatch");
            }
        }
        self.rows.push(x.to_vec());
        self.ys.push(y);
        if update_refit {
            match self.predict(x) {
                Some(p) if (p - y).abs() < COEF_EPS => {}
                _ => self.refit = true,
            }
        }
        self.rows.len() - 1
    }

    /// Delete a training row by swap-remove. Returns the old index of the
    /// row that moved into `row`, if any — the caller patches the one
    /// displaced observation.
    pub fn del_example(&mut self, row: usize) -> Option<usize> {
        let last = self.rows.len() - 1;
        self.rows.swap_remove(row);
        self.ys.swap_remove(row);
        self.refit = true;
        (row != last).then_some(last)
    }

    fn dot(&self, x: &[f64]) -> f64 {
        self.coefs.iter().zip(x).map(|(c, v)| c * v).sum::<f64>() + self.intercept
    }

    /// Predict from a restricted-layout input. `None` when the model has no
    /// usable fit or produces a non-finite value.
    pub fn predict(&self, x: &[f64]) -> Option<f64> {
        if self.constant {
            return self.fitted.then_some(self.intercept);
        }
        if !self.fitted {
            return None;
        }
        assert_eq!(x.len(), self.coefs.len(), "restricted row width mismatch");
        let y = self.dot(x);
        y.is_finite().then_some(y)
    }
}

fn mean(v: &[f64]) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    v.iter().sum::<f64>() / v.len() as f64
}

fn mean_abs_dev(v: &[f64], center: f64) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    v.iter().map(|y| (y - center).abs()).sum::<f64>() / v.len() as f64
}

fn restrict_row(row: &[f64], used: &[usize], sig: &SceneSig) -> Vec<f64> {
    let mut out = Vec::new();
    for &obj in used {
        let e = &sig[obj];
        out.extend_from_slice(&row[e.start..e.start + e.props.len()]);
    }
    out
}
