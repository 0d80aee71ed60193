//! Diagonal two-class discriminant fitting.
//!
//! Fits a linear discriminant assuming per-dimension independent variance
//! (diagonal covariance): weights = (mean_pos - mean_neg) / pooled
//! variance, threshold at the projected midpoint. Cheap, deterministic,
//! and adequate for the engine's pairwise fallback classifiers.

use tracing::trace;

use strata_core::traits::{Discriminant, DiscriminantLearner};

/// Variance floor keeping weights finite on near-constant dimensions.
const VAR_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default)]
pub struct DiagonalDiscriminant;

impl DiagonalDiscriminant {
    pub fn new() -> Self {
        Self
    }
}

fn mean_rows(rows: &[Vec<f64>], dim: usize) -> Vec<f64> {
    let mut m = vec![0.0; dim];
    for r in rows {
        for (mi, v) in m.iter_mut().zip(r) {
            *mi += v;
        }
    }
    for mi in &mut m {
        *mi /= rows.len() as f64;
    }
    m
}

impl DiscriminantLearner for DiagonalDiscriminant {
    fn fit(&self, pos: &[Vec<f64>], neg: &[Vec<f64>]) -> Option<Discriminant> {
        if pos.len() < 2 || neg.len() < 2 {
            return None;
        }
        let dim = pos[0].len();
        if dim == 0 || neg[0].len() != dim {
            return None;
        }

        let mp = mean_rows(pos, dim);
        let mn = mean_rows(neg, dim);

        // Pooled per-dimension variance.
        let mut var = vec![0.0; dim];
        for (rows, means) in [(pos, &mp), (neg, &mn)] {
            for r in rows {
                for ((vi, v), m) in var.iter_mut().zip(r).zip(means) {
                    *vi += (v - m).powi(2);
                }
            }
        }
        let denom = (pos.len() + neg.len() - 2) as f64;
        for vi in &mut var {
            *vi /= denom;
        }

        let weights: Vec<f64> = mp
            .iter()
            .zip(&mn)
            .zip(&var)
            .map(|((p, n), v)| (p - n) / (v + VAR_EPS))
            .collect();
        if weights.iter().all(|w| w.abs() < VAR_EPS) {
            // Identical class means: nothing to discriminate on.
            return None;
        }

        // Threshold halfway between the projected class means.
        let proj = |m: &[f64]| -> f64 { weights.iter().zip(m).map(|(w, v)| w * v).sum() };
        let bias = -(proj(&mp) + proj(&mn)) / 2.0;
        trace!(dim, pos = pos.len(), neg = neg.len(), "fitted discriminant");
        Some(Discriminant { weights, bias })
    }
}
