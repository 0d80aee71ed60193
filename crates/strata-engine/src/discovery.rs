//! Mode discovery: robust linear-subset search and unify-or-create.
//!
//! When EM goes quiescent the engine looks for structure in the noise pool,
//! one signature bucket at a time: first a run of identical outcomes, then
//! a linear subset found by iteratively reweighted least squares under an
//! inverse-power residual kernel. A found seed is absorbed into a
//! compatible existing mode when a joint refit stays acceptable, otherwise
//! it becomes a new mode. Failed buckets back off until enough new data
//! arrives to close the shortfall.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use strata_core::config::EngineConfig;
use strata_core::sig::SceneSig;
use strata_regress::{ols, LinearModel};

use crate::engine::{all_obs, Engine};
use crate::mode::Mode;

impl Engine {
    /// Find a seed subset in one noise bucket, or back the bucket off.
    fn find_new_mode_inds(&mut self, sig_index: usize) -> Option<Vec<usize>> {
        let thresh = self.config.new_mode_thresh;
        let (members, largest_group) = {
            let bucket = self.noise.buckets.get_mut(&sig_index)?;
            if bucket.check_after == 0 {
                bucket.check_after = thresh;
            }
            if bucket.members.len() < bucket.check_after {
                return None;
            }
            // A run of identical outcomes is a constant mode.
            let mut largest = 0;
            let mut found: Option<Vec<usize>> = None;
            for group in bucket.sorted_ys.values() {
                if group.len() >= thresh {
                    found = Some(group.iter().copied().collect());
                    break;
                }
                largest = largest.max(group.len());
            }
            if let Some(seed) = found {
                // Success re-arms the bucket at the base threshold.
                bucket.check_after = thresh;
                return Some(seed);
            }
            (bucket.members.iter().copied().collect::<Vec<usize>>(), largest)
        };

        let xs: Vec<Vec<f64>> = members.iter().map(|&o| self.data[o].x.clone()).collect();
        let ys: Vec<f64> = members.iter().map(|&o| self.data[o].y).collect();
        let subset = find_linear_subset(&self.config, &mut self.rng, &xs, &ys);
        if subset.len() >= thresh {
            if let Some(bucket) = self.noise.buckets.get_mut(&sig_index) {
                bucket.check_after = thresh;
            }
            return Some(subset.into_iter().map(|k| members[k]).collect());
        }

        // Back off until enough new points arrive to close the smaller
        // shortfall.
        let const_short = thresh - largest_group.min(thresh);
        let linear_short = thresh - subset.len().min(thresh);
        let wait = const_short.min(linear_short).max(1);
        if let Some(bucket) = self.noise.buckets.get_mut(&sig_index) {
            bucket.check_after = members.len() + wait;
            debug!(
                sig_index,
                check_after = bucket.check_after,
                "discovery failed, bucket backed off"
            );
        }
        None
    }

    /// Search every noise bucket for a seed; absorb it into a compatible
    /// existing mode or create a new one. At most one mode changes per
    /// call.
    pub(crate) fn unify_or_add_mode(&mut self) -> bool {
        if self.noise.member_count() < self.config.new_mode_thresh {
            return false;
        }
        let sig_indices: Vec<usize> = self.noise.buckets.keys().copied().collect();
        for si in sig_indices {
            let Some(mut seed) = self.find_new_mode_inds(si) else {
                continue;
            };
            // A joint fit needs every seed to agree on the target slot.
            let target = self.data[seed[0]].target;
            seed.retain(|&o| self.data[o].target == target);
            if seed.len() < self.config.new_mode_thresh {
                continue;
            }

            let sig = self.sigs.entry(si).sig.clone();
            let seed_x: Vec<Vec<f64>> =
                seed.iter().map(|&o| self.data[o].x.clone()).collect();
            let seed_y: Vec<f64> = seed.iter().map(|&o| self.data[o].y).collect();

            // Existing mode over the same scene shape whose joint refit
            // stays acceptable?
            for m in 1..self.nmodes() {
                let mode = &self.modes[m - 1];
                if mode.members.is_empty() {
                    continue;
                }
                let uniform = mode.members.iter().all(|&o| {
                    self.data[o].sig_index == si && self.data[o].target == target
                });
                if !uniform {
                    continue;
                }
                let mut members: Vec<usize> = mode.members.iter().copied().collect();
                members.extend(seed.iter().copied());
                let xs: Vec<Vec<f64>> =
                    members.iter().map(|&o| self.data[o].x.clone()).collect();
                let ys: Vec<f64> = members.iter().map(|&o| self.data[o].y).collect();
                let mut model = LinearModel::new();
                let used = model.init_fit(&xs, &ys, target, &sig);
                let combined = model.train_error();
                let current = mode.model.train_error();
                let absorb = combined < self.config.error_thresh
                    || (current > 0.0 && combined < self.config.unify_mul_thresh * current);
                if absorb {
                    info!(mode = m, seeds = seed.len(), error = combined, "unified seed into mode");
                    self.init_mode(m, si, model, used, members);
                    return true;
                }
            }

            let mut model = LinearModel::new();
            let used = model.init_fit(&seed_x, &seed_y, target, &sig);
            self.modes.push(Mode::default());
            for o in &mut self.data {
                o.mode_prob.push(0.0);
            }
            let m = self.modes.len();
            info!(mode = m, seeds = seed.len(), error = model.train_error(), "created mode");
            self.init_mode(m, si, model, used, seed);
            return true;
        }
        false
    }

    /// (Re)initialize mode `m` from a freshly fitted model and its member
    /// list. The model already holds the members' rows in list order, so
    /// only the bookkeeping is rebuilt here.
    fn init_mode(
        &mut self,
        m: usize,
        sig_index: usize,
        model: LinearModel,
        used: Vec<usize>,
        members: Vec<usize>,
    ) {
        for &obs in &members {
            match self.data[obs].map_mode {
                0 => self.noise_del(obs),
                prev => self.remove_from_mode(prev, obs),
            }
        }

        let sig = self.sigs.entry(sig_index).sig.clone();
        let mut mode_sig = SceneSig::new();
        for &obj in &used {
            mode_sig.add(sig[obj].clone());
        }
        let slots = mode_sig.len();
        let ndata = self.data.len();
        {
            let mode = &mut self.modes[m - 1];
            mode.model = model;
            mode.sig = mode_sig;
            mode.members.clear();
            mode.row_owner.clear();
            mode.member_rel.clear();
            mode.obj_clauses = vec![Vec::new(); slots];
            mode.stale = false;
            mode.classifier_stale = true;
            mode.stale_obs = all_obs(ndata);
        }
        for (row, &obs) in members.iter().enumerate() {
            let target_id = self.target_id(obs);
            let o = &mut self.data[obs];
            o.map_mode = m;
            o.obj_map = used.clone();
            o.model_row = row;
            o.mode_prob[m] = 0.0;
            let mode = &mut self.modes[m - 1];
            mode.members.insert(obs);
            mode.row_owner.push(obs);
            mode.member_rel.add(obs as i64, &[target_id]);
        }
    }
}

/// Robust linear-subset search over full rows.
///
/// Repeatedly runs the reweighted fit on the remaining pool, validates each
/// candidate subset on a random held-out half, and keeps the largest subset
/// that generalizes. Returns indices into `x`; empty when nothing linear of
/// any size survives validation.
pub(crate) fn find_linear_subset(
    config: &EngineConfig,
    rng: &mut StdRng,
    x: &[Vec<f64>],
    y: &[f64],
) -> Vec<usize> {
    let kept = ols::informative_columns(x);
    if kept.is_empty() {
        return Vec::new();
    }
    let mut design = ols::select_columns(x, &kept);
    ols::augment_ones(&mut design);
    let ncols = design[0].len();

    let mut pool: Vec<usize> = (0..x.len()).collect();
    let mut best: Vec<usize> = Vec::new();
    for _ in 0..config.subset_max_rounds {
        if pool.len() <= ncols + 1 {
            break;
        }
        let local = irls_subset(config, rng, &design, y, &pool);
        if local.is_empty() {
            // Bad seed; try another restart.
            continue;
        }
        if local.len() >= 2 * ncols {
            let mut split = local.clone();
            split.shuffle(rng);
            let (test, train) = split.split_at(split.len() / 2);
            let train_rows: Vec<Vec<f64>> =
                train.iter().map(|&i| design[i].clone()).collect();
            let train_ys: Vec<f64> = train.iter().map(|&i| y[i]).collect();
            if let Some(coefs) = ols::solve(&train_rows, &train_ys, None) {
                let test_rows: Vec<Vec<f64>> =
                    test.iter().map(|&i| design[i].clone()).collect();
                let test_ys: Vec<f64> = test.iter().map(|&i| y[i]).collect();
                let err = ols::mean_abs_residual(&test_rows, &test_ys, &coefs);
                if err < config.error_thresh && local.len() > best.len() {
                    best = local.clone();
                }
            }
        }
        pool.retain(|i| !local.contains(i));
    }
    best.sort_unstable();
    best
}

/// One reweighted-fit attempt: seed a random minimal subset, then iterate
/// weighted fits with inverse-power residual weights until the residuals
/// stop moving. Returns the pool rows the converged fit explains.
fn irls_subset(
    config: &EngineConfig,
    rng: &mut StdRng,
    design: &[Vec<f64>],
    y: &[f64],
    pool: &[usize],
) -> Vec<usize> {
    let ncols = design[0].len();
    let rows: Vec<Vec<f64>> = pool.iter().map(|&i| design[i].clone()).collect();
    let ys: Vec<f64> = pool.iter().map(|&i| y[i]).collect();

    let mut w = vec![0.0; pool.len()];
    for i in rand::seq::index::sample(rng, pool.len(), (ncols + 1).min(pool.len())) {
        w[i] = 1.0;
    }

    let mut err = vec![f64::INFINITY; pool.len()];
    let mut fitted = false;
    for _ in 0..config.mini_em_max_iters {
        let Some(coefs) = ols::solve(&rows, &ys, Some(&w)) else {
            break;
        };
        fitted = true;
        let new_err: Vec<f64> = rows
            .iter()
            .zip(&ys)
            .map(|(r, &yv)| {
                let pred: f64 = r.iter().zip(&coefs).map(|(a, b)| a * b).sum();
                (yv - pred).abs()
            })
            .collect();
        for (wi, &e) in w.iter_mut().zip(&new_err) {
            *wi = e.powf(config.kernel_pow).min(config.max_kernel_weight);
        }
        let delta: f64 = new_err
            .iter()
            .zip(&err)
            .map(|(a, b)| (a - b).abs())
            .sum::<f64>()
            / pool.len() as f64;
        err = new_err;
        if delta < config.convergence_thresh {
            break;
        }
    }
    if !fitted {
        return Vec::new();
    }
    pool.iter()
        .zip(&err)
        .filter(|(_, &e)| e < config.error_thresh)
        .map(|(&i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use strata_core::relation::RelationTable;
    use strata_core::sig::{ObjectSig, SceneSig};

    fn sig1() -> SceneSig {
        let mut s = SceneSig::new();
        s.add(ObjectSig {
            id: 1,
            type_id: 1,
            name: "t".to_string(),
            props: vec!["px".to_string()],
            start: 0,
        });
        s
    }

    #[test]
    fn subset_search_isolates_the_line() {
        let config = EngineConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        let mut x: Vec<Vec<f64>> = Vec::new();
        let mut y: Vec<f64> = Vec::new();
        for i in 0..30 {
            x.push(vec![i as f64]);
            y.push(2.0 * i as f64 + 1.0);
        }
        // Off-line outliers, well clear of the line.
        for (i, off) in [5.0, -7.0, 13.0, 21.0, -11.0, 9.0, -17.0, 25.0]
            .into_iter()
            .enumerate()
        {
            x.push(vec![i as f64 + 0.25]);
            y.push(2.0 * (i as f64 + 0.25) + 1.0 + off);
        }
        let subset = find_linear_subset(&config, &mut rng, &x, &y);
        assert!(subset.len() >= 20, "found {}", subset.len());
        assert!(subset.iter().all(|&i| i < 30));
    }

    #[test]
    fn static_inputs_yield_no_subset() {
        let config = EngineConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        let x = vec![vec![5.0]; 25];
        let y: Vec<f64> = (0..25).map(|i| i as f64).collect();
        assert!(find_linear_subset(&config, &mut rng, &x, &y).is_empty());
    }

    #[test]
    fn constant_run_becomes_a_mode() {
        let config = EngineConfig {
            new_mode_thresh: 10,
            ..EngineConfig::default()
        };
        let mut e = Engine::new(config).unwrap();
        let sig = sig1();
        for i in 0..15 {
            e.learn(0, &sig, &RelationTable::new(), &[i as f64], 42.0);
        }
        e.run(20);
        assert_eq!(e.nmodes(), 2);
        let p = e.predict(0, &sig, &RelationTable::new(), &[99.0]);
        assert!(p.ok);
        assert!((p.value - 42.0).abs() < 1e-6);
    }

    #[test]
    fn recovered_bucket_rearms_at_the_threshold() {
        let config = EngineConfig {
            new_mode_thresh: 8,
            ..EngineConfig::default()
        };
        let mut e = Engine::new(config).unwrap();
        let sig = sig1();
        // Quadratic data backs the bucket off past its size.
        for i in 0..10 {
            let x = i as f64;
            e.learn(0, &sig, &RelationTable::new(), &[x], x * x);
        }
        e.run(10);
        assert_eq!(e.nmodes(), 1);
        assert!(e.noise.buckets[&0].check_after > 10);

        // Enough linear points arrive to re-examine and succeed; a single
        // discovery pass must drop the watermark back to the threshold.
        for i in 0..8 {
            let x = 50.0 + i as f64;
            e.learn(0, &sig, &RelationTable::new(), &[x], 5.0 * x + 3.0);
        }
        e.run(1);
        assert_eq!(e.nmodes(), 2);
        assert_eq!(e.noise.buckets[&0].check_after, 8);
    }

    #[test]
    fn failed_discovery_backs_the_bucket_off() {
        let config = EngineConfig {
            new_mode_thresh: 8,
            ..EngineConfig::default()
        };
        let mut e = Engine::new(config).unwrap();
        let sig = sig1();
        // Quadratic: no linear subset of size 8 exists.
        for i in 0..10 {
            let x = i as f64;
            e.learn(0, &sig, &RelationTable::new(), &[x], x * x);
        }
        e.run(10);
        assert_eq!(e.nmodes(), 1);
        let bucket = &e.noise.buckets[&0];
        assert!(bucket.check_after > 10);
    }
}
