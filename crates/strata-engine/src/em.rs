//! The expectation/maximization refinement loop.
//!
//! One `step` is an E-step (refresh stale membership probabilities, then
//! move observations whose best mode changed) followed by an M-step (refit
//! models flagged stale). `run` repeats steps until quiescent, then lets
//! compaction and discovery perturb the state, until nothing moves or the
//! iteration budget runs out.

use std::collections::BTreeSet;
use std::mem;

use tracing::{debug, info};

use crate::engine::Engine;
use crate::score;

impl Engine {
    /// Refresh membership probabilities for every (mode, observation) pair
    /// flagged stale. Returns the observations whose MAP mode may have
    /// changed.
    fn estep(&mut self) -> BTreeSet<usize> {
        let mut check = BTreeSet::new();
        let nmodes = self.nmodes();
        for m in 1..nmodes {
            let stale = mem::take(&mut self.modes[m - 1].stale_obs);
            for obs in stale {
                let (prob, assign) = {
                    let o = &self.data[obs];
                    let sig = &self.sigs.entry(o.sig_index).sig;
                    score::calc_prob(
                        &self.modes[m - 1],
                        nmodes,
                        &self.config,
                        o.target,
                        sig,
                        &o.x,
                        o.y,
                    )
                };
                let o = &mut self.data[obs];
                let prev = o.mode_prob[m];
                o.mode_prob[m] = prob;
                self.pending_maps.insert((obs, m), assign);
                let map = o.map_mode;
                if (map == m && prob < prev) || (map != m && prob > o.mode_prob[map]) {
                    check.insert(obs);
                }
            }
        }
        check
    }

    /// Move each checked observation to its maximum-probability mode.
    /// Ties go to the lowest index, which keeps noise sticky.
    fn update_map(&mut self, check: BTreeSet<usize>) -> bool {
        let mut moved = false;
        for obs in check {
            let o = &self.data[obs];
            let mut best = 0;
            for (m, &p) in o.mode_prob.iter().enumerate() {
                if p > o.mode_prob[best] {
                    best = m;
                }
            }
            let prev = o.map_mode;
            if best == prev {
                continue;
            }
            if prev == 0 {
                self.noise_del(obs);
            } else {
                self.remove_from_mode(prev, obs);
            }
            self.data[obs].map_mode = best;
            if best == 0 {
                self.data[obs].obj_map.clear();
                self.noise_add(obs);
            } else {
                let assign = self
                    .pending_maps
                    .get(&(obs, best))
                    .cloned()
                    .unwrap_or_default();
                self.data[obs].obj_map = assign;
                self.add_to_mode(best, obs, true);
            }
            debug!(obs, from = prev, to = best, "reassigned observation");
            moved = true;
        }
        moved
    }

    /// Refit every stale model. A changed model invalidates its members'
    /// probabilities; outsiders are rescored when they arrive or when a
    /// discovery pass rebuilds the mode.
    fn mstep(&mut self) -> bool {
        let mut changed = false;
        for mode in &mut self.modes {
            if !mode.stale {
                continue;
            }
            mode.stale = false;
            if mode.model.needs_refit() && mode.model.fit() {
                mode.stale_obs = mode.members.iter().copied().collect();
                mode.classifier_stale = true;
                changed = true;
            }
        }
        changed
    }

    /// One E-step plus one M-step. Returns whether anything changed.
    pub fn step(&mut self) -> bool {
        if !self.use_em {
            return false;
        }
        let check = self.estep();
        let moved = self.update_map(check);
        let refit = self.mstep();
        moved || refit
    }

    /// Refine until quiescent: EM steps while they change something, then
    /// compaction and discovery when they do not. Returns whether any state
    /// changed at all. A no-op while `use_em` is off.
    pub fn run(&mut self, max_iters: usize) -> bool {
        if !self.use_em {
            return false;
        }
        let mut changed = false;
        for iter in 0..max_iters {
            if !self.step() && !self.remove_modes() && !self.unify_or_add_mode() {
                info!(iter, changed, "refinement quiescent");
                return changed;
            }
            changed = true;
        }
        info!(max_iters, "refinement hit iteration budget");
        changed
    }

    /// Drop modes with too few members to support a model; their members
    /// return to noise and every surviving structure is renumbered.
    pub(crate) fn remove_modes(&mut self) -> bool {
        if self.modes.iter().all(|m| m.members.len() > 2) {
            return false;
        }

        // Old logical index -> new logical index (dropped map to 0).
        let mut index_map = vec![0usize; self.nmodes()];
        let mut kept = Vec::new();
        let mut orphans: Vec<usize> = Vec::new();
        for (i, mode) in mem::take(&mut self.modes).into_iter().enumerate() {
            if mode.members.len() > 2 {
                index_map[i + 1] = kept.len() + 1;
                kept.push(mode);
            } else {
                orphans.extend(mode.members.iter());
                debug!(mode = i + 1, members = mode.members.len(), "removed mode");
            }
        }
        self.modes = kept;

        let nmodes = self.nmodes();
        for o in &mut self.data {
            let mut probs = vec![0.0; nmodes];
            probs[0] = o.mode_prob[0];
            for (old, &p) in o.mode_prob.iter().enumerate().skip(1) {
                let new = index_map[old];
                if new != 0 {
                    probs[new] = p;
                }
            }
            o.mode_prob = probs;
            o.map_mode = index_map[o.map_mode];
        }

        for &obs in &orphans {
            self.data[obs].obj_map.clear();
            self.noise_add(obs);
        }
        for mode in &mut self.modes {
            mode.stale_obs.extend(orphans.iter().copied());
        }

        let old = mem::take(&mut self.classifiers);
        for ((i, j), c) in old {
            let (ni, nj) = (index_map[i], index_map[j]);
            if (i != 0 && ni == 0) || (j != 0 && nj == 0) {
                continue;
            }
            let key = if ni < nj { (ni, nj) } else { (nj, ni) };
            self.classifiers.insert(key, c);
        }

        let old = mem::take(&mut self.pending_maps);
        for ((obs, m), v) in old {
            let nm = index_map[m];
            if nm == 0 {
                continue;
            }
            self.pending_maps.insert((obs, nm), v);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use strata_core::config::EngineConfig;
    use strata_core::relation::RelationTable;
    use strata_core::sig::{ObjectSig, SceneSig};

    use crate::engine::Engine;

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

    fn engine(new_mode_thresh: usize) -> Engine {
        let config = EngineConfig {
            new_mode_thresh,
            ..EngineConfig::default()
        };
        Engine::new(config).unwrap()
    }

    #[test]
    fn linear_data_spawns_one_mode() {
        let mut e = engine(10);
        let sig = sig1();
        for i in 0..30 {
            let x = i as f64 * 0.5;
            e.learn(0, &sig, &RelationTable::new(), &[x], 2.0 * x + 1.0);
        }
        assert!(e.run(50));
        assert_eq!(e.nmodes(), 2);
        let mode = e.mode(1).unwrap();
        assert!(mode.members.len() >= 10);
        assert!(mode.model.train_error() < 1e-6);
    }

    #[test]
    fn membership_partitions_the_data() {
        let mut e = engine(10);
        let sig = sig1();
        for i in 0..40 {
            let x = i as f64;
            let y = if i % 2 == 0 { 3.0 * x } else { -3.0 * x + 100.0 };
            e.learn(0, &sig, &RelationTable::new(), &[x], y);
        }
        e.run(100);

        // Every observation is in exactly one place: its MAP mode.
        for obs in 0..e.num_observations() {
            let m = e.map_mode(obs).unwrap();
            if m == 0 {
                assert!(e.noise.contains(obs));
            } else {
                assert!(!e.noise.contains(obs));
                assert!(e.mode(m).unwrap().members.contains(&obs));
            }
            for other in 1..e.nmodes() {
                if other != m {
                    assert!(!e.mode(other).unwrap().members.contains(&obs));
                }
            }
        }
    }

    #[test]
    fn quiescent_engine_reports_no_change() {
        let mut e = engine(10);
        let sig = sig1();
        for i in 0..15 {
            let x = i as f64;
            e.learn(0, &sig, &RelationTable::new(), &[x], 4.0 * x);
        }
        e.run(50);
        // A second run with nothing new settles immediately.
        assert!(!e.run(50));
    }

    #[test]
    fn removal_renumbers_everything() {
        let mut e = engine(3);
        let sig = sig1();
        // Mode 1: a constant run. Mode 2: a short line far away.
        for x in [0.0, 1.0, 2.0] {
            e.learn(0, &sig, &RelationTable::new(), &[x], 5.0);
        }
        e.run(20);
        for x in [10.0, 11.0, 12.0, 13.0] {
            e.learn(0, &sig, &RelationTable::new(), &[x], 2.0 * x + 80.0);
        }
        e.run(20);
        assert_eq!(e.nmodes(), 3);
        let linear_members: Vec<usize> = e.mode(2).unwrap().members.iter().copied().collect();

        // Starve mode 1 below the survival threshold by hand.
        let victim = *e.mode(1).unwrap().members.iter().next().unwrap();
        e.remove_from_mode(1, victim);
        e.data[victim].map_mode = 0;
        e.noise_add(victim);

        assert!(e.remove_modes());
        assert_eq!(e.nmodes(), 2);

        // The surviving mode slid down to index 1, and every per-observation
        // structure followed.
        for &obs in &linear_members {
            assert_eq!(e.map_mode(obs), Some(1));
            assert!(e.mode(1).unwrap().members.contains(&obs));
            assert_eq!(e.probabilities(obs).unwrap().len(), 2);
        }
        // The orphaned constant members are back in noise.
        assert_eq!(e.noise_count(), 3);
        assert!(e.classifiers.keys().all(|&(i, j)| i < j && j < 2));
    }

    #[test]
    fn em_toggle_freezes_refinement() {
        let mut e = engine(5);
        e.set_use_em(false);
        let sig = sig1();
        for i in 0..20 {
            let x = i as f64;
            e.learn(0, &sig, &RelationTable::new(), &[x], x);
        }
        // With the toggle off, run is a no-op: no discovery, no movement.
        assert!(!e.run(50));
        assert_eq!(e.nmodes(), 1);
        assert_eq!(e.noise_count(), 20);

        // Re-enabling picks the structure right back up.
        e.set_use_em(true);
        assert!(e.run(50));
        assert_eq!(e.nmodes(), 2);
    }

    #[test]
    fn refit_rescores_only_the_members() {
        let mut e = engine(10);
        let sig = sig1();
        for i in 0..15 {
            let x = i as f64;
            e.learn(0, &sig, &RelationTable::new(), &[x], 4.0 * x);
        }
        // Scatter that stays in noise.
        for (i, off) in [30.0, -40.0, 55.0].into_iter().enumerate() {
            let x = i as f64 + 0.5;
            e.learn(0, &sig, &RelationTable::new(), &[x], 4.0 * x + off);
        }
        e.run(100);
        assert_eq!(e.nmodes(), 2);

        // Force a refit; the rescan set is exactly the membership.
        let victim = *e.mode(1).unwrap().members.iter().next().unwrap();
        e.remove_from_mode(1, victim);
        e.data[victim].map_mode = 0;
        e.noise_add(victim);
        assert!(e.mstep());
        let mode = e.mode(1).unwrap();
        assert_eq!(mode.stale_obs, mode.members);
    }
}
