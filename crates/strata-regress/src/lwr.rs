//! Locally weighted fallback regressor.
//!
//! One per interned signature: a non-parametric k-nearest-neighbor
//! regressor trained incrementally on every observation of that signature,
//! consulted only when no learned mode claims an observation.

use serde::{Deserialize, Serialize};

use crate::ols;

/// Distance floor to keep inverse-distance weights finite.
const DIST_EPS: f64 = 1e-9;

/// k-NN locally weighted regressor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lwr {
    k: usize,
    xs: Vec<Vec<f64>>,
    ys: Vec<f64>,
}

impl Lwr {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            xs: Vec::new(),
            ys: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.ys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ys.is_empty()
    }

    pub fn learn(&mut self, x: &[f64], y: f64) {
        if let Some(first) = self.xs.first() {
            assert_eq!(x.len(), first.len(), "signature dimension mismatch");
        }
        self.xs.push(x.to_vec());
        self.ys.push(y);
    }

    /// Predict from the k nearest stored points: a locally weighted linear
    /// fit when the neighborhood supports one, otherwise an
    /// inverse-distance weighted average. `None` when untrained.
    pub fn predict(&self, x: &[f64]) -> Option<f64> {
        if self.is_empty() {
            return None;
        }

        let mut order: Vec<usize> = (0..self.xs.len()).collect();
        order.sort_by(|&i, &j| dist2(&self.xs[i], x).total_cmp(&dist2(&self.xs[j], x)));
        order.truncate(self.k.max(1));

        let weights: Vec<f64> = order
            .iter()
            .map(|&i| 1.0 / (dist2(&self.xs[i], x).sqrt() + DIST_EPS))
            .collect();

        // Enough neighbors for a local linear fit?
        if order.len() > x.len() + 1 {
            let mut design: Vec<Vec<f64>> = order.iter().map(|&i| self.xs[i].clone()).collect();
            let y: Vec<f64> = order.iter().map(|&i| self.ys[i]).collect();
            ols::augment_ones(&mut design);
            if let Some(coefs) = ols::solve(&design, &y, Some(&weights)) {
                let pred: f64 = x.iter().zip(&coefs).map(|(v, c)| v * c).sum::<f64>()
                    + coefs[x.len()];
                if pred.is_finite() {
                    return Some(pred);
                }
            }
        }

        // Weighted average fallback.
        let wsum: f64 = weights.iter().sum();
        let pred = order
            .iter()
            .zip(&weights)
            .map(|(&i, w)| w * self.ys[i])
            .sum::<f64>()
            / wsum;
        pred.is_finite().then_some(pred)
    }
}

fn dist2(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untrained_predicts_nothing() {
        let lwr = Lwr::new(5);
        assert_eq!(lwr.predict(&[1.0]), None);
    }

    #[test]
    fn interpolates_a_smooth_function() {
        let mut lwr = Lwr::new(6);
        for i in 0..50 {
            let x = i as f64 * 0.2;
            lwr.learn(&[x], 3.0 * x + 1.0);
        }
        let y = lwr.predict(&[4.1]).unwrap();
        assert!((y - 13.3).abs() < 0.1, "got {y}");
    }

    #[test]
    fn single_point_neighborhood_averages() {
        let mut lwr = Lwr::new(3);
        lwr.learn(&[0.0, 0.0], 5.0);
        assert_eq!(lwr.predict(&[1.0, 1.0]), Some(5.0));
    }
}
