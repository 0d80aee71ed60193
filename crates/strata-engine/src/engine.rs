//! The engine facade.
//!
//! One `Engine` owns the observation log, the signature registry, the noise
//! pseudo-mode, the learned modes, the pairwise classifiers, and the
//! accumulated relation table. Hosts call `learn` once per observation,
//! `run` to refine, and `predict`/`classify` to query.

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use strata_core::config::EngineConfig;
use strata_core::errors::StrataResult;
use strata_core::relation::{extend_table, Relation, RelationTable};
use strata_core::sig::SceneSig;
use strata_core::traits::{DiscriminantLearner, RuleInducer};
use strata_relational::{DiagonalDiscriminant, Foil};

use crate::classify::PairClassifier;
use crate::mode::{Mode, NoiseMode};
use crate::score;
use crate::store::{Observation, SigRegistry};

/// Outcome of one prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Mode that claimed the observation (0 is noise).
    pub mode: usize,
    /// Predicted outcome; NaN when no predictor was usable.
    pub value: f64,
    pub ok: bool,
}

/// The mode-learning engine.
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) use_em: bool,
    pub(crate) use_foil: bool,
    pub(crate) use_lda: bool,
    pub(crate) data: Vec<Observation>,
    pub(crate) sigs: SigRegistry,
    pub(crate) noise: NoiseMode,
    /// Learned modes; logical mode index = position + 1.
    pub(crate) modes: Vec<Mode>,
    /// Pairwise classifiers keyed by logical mode pair, always (low, high).
    pub(crate) classifiers: BTreeMap<(usize, usize), PairClassifier>,
    /// Accumulated relation table, one frame per observation.
    pub(crate) rels: RelationTable,
    /// Best assignment found per (observation, mode) in the last E-step,
    /// promoted to `obj_map` when the observation moves.
    pub(crate) pending_maps: BTreeMap<(usize, usize), Vec<usize>>,
    pub(crate) rng: StdRng,
    pub(crate) inducer: Box<dyn RuleInducer>,
    pub(crate) disc_learner: Box<dyn DiscriminantLearner>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> StrataResult<Self> {
        Self::with_services(config, Box::new(Foil::new()), Box::new(DiagonalDiscriminant::new()))
    }

    /// Construct with explicit rule-induction and discriminant services.
    pub fn with_services(
        config: EngineConfig,
        inducer: Box<dyn RuleInducer>,
        disc_learner: Box<dyn DiscriminantLearner>,
    ) -> StrataResult<Self> {
        config.validate()?;
        let rng = StdRng::seed_from_u64(config.rng_seed);
        Ok(Self {
            config,
            use_em: true,
            use_foil: true,
            use_lda: true,
            data: Vec::new(),
            sigs: SigRegistry::default(),
            noise: NoiseMode::default(),
            modes: Vec::new(),
            classifiers: BTreeMap::new(),
            rels: RelationTable::new(),
            pending_maps: BTreeMap::new(),
            rng,
            inducer,
            disc_learner,
        })
    }

    /// Logical mode count, the noise pseudo-mode included.
    pub fn nmodes(&self) -> usize {
        self.modes.len() + 1
    }

    pub fn num_observations(&self) -> usize {
        self.data.len()
    }

    /// One ingested observation, for inspection and training-data dumps.
    pub fn observation(&self, i: usize) -> Option<&Observation> {
        self.data.get(i)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A learned mode by logical index; `None` for 0 or out of range.
    pub fn mode(&self, m: usize) -> Option<&Mode> {
        (m >= 1).then(|| self.modes.get(m - 1)).flatten()
    }

    pub fn noise_count(&self) -> usize {
        self.noise.member_count()
    }

    /// Membership probabilities of one observation, noise first.
    pub fn probabilities(&self, obs: usize) -> Option<&[f64]> {
        self.data.get(obs).map(|o| o.mode_prob.as_slice())
    }

    pub fn map_mode(&self, obs: usize) -> Option<usize> {
        self.data.get(obs).map(|o| o.map_mode)
    }

    /// Wildcard query over the accumulated relation table.
    pub fn relation_matches(&self, name: &str, pattern: &[Option<i64>]) -> Option<Relation> {
        self.rels.get(name).map(|r| r.matches(pattern))
    }

    /// The trained classifier for a logical mode pair, if any. Order of the
    /// indices does not matter.
    pub fn classifier(&self, i: usize, j: usize) -> Option<&PairClassifier> {
        let key = (i.min(j), i.max(j));
        self.classifiers.get(&key)
    }

    pub fn set_use_em(&mut self, on: bool) {
        self.use_em = on;
    }

    pub fn set_use_foil(&mut self, on: bool) {
        if self.use_foil != on {
            self.mark_all_classifiers_stale();
        }
        self.use_foil = on;
    }

    pub fn set_use_lda(&mut self, on: bool) {
        if self.use_lda != on {
            self.mark_all_classifiers_stale();
        }
        self.use_lda = on;
    }

    fn mark_all_classifiers_stale(&mut self) {
        self.noise.classifier_stale = true;
        for m in &mut self.modes {
            m.classifier_stale = true;
        }
    }

    /// Ingest one observation: the scene signature, its relation frame, the
    /// input vector, and the outcome. The new observation starts in noise.
    pub fn learn(
        &mut self,
        target: usize,
        sig: &SceneSig,
        rels: &RelationTable,
        x: &[f64],
        y: f64,
    ) {
        assert_eq!(x.len(), sig.dim(), "input width does not match signature");
        assert!(y.is_finite(), "non-finite outcome");
        assert!(target < sig.len(), "target index out of range");

        let sig_index = self.sigs.intern(sig, self.config.lwr_k);
        let obs = self.data.len();
        let mut mode_prob = vec![0.0; self.nmodes()];
        mode_prob[0] = self.config.noise_prob;
        self.data.push(Observation {
            target,
            x: x.to_vec(),
            y,
            sig_index,
            mode_prob,
            map_mode: 0,
            model_row: 0,
            obj_map: Vec::new(),
        });

        extend_table(&mut self.rels, rels, obs as i64);
        let entry = self.sigs.entry_mut(sig_index);
        entry.members.push(obs);
        entry.lwr.learn(x, y);

        self.noise_add(obs);
        for m in &mut self.modes {
            m.stale_obs.insert(obs);
        }
        debug!(obs, sig_index, y, "ingested observation");
    }

    /// Predict the outcome for a scene. Falls back to the signature's local
    /// regressor when no learned mode claims it.
    pub fn predict(
        &mut self,
        target: usize,
        sig: &SceneSig,
        rels: &RelationTable,
        x: &[f64],
    ) -> Prediction {
        if self.data.is_empty() {
            return Prediction {
                mode: 0,
                value: f64::NAN,
                ok: false,
            };
        }
        let c = self.classify(target, sig, rels, x);
        if c.mode == 0 {
            let value = self
                .sigs
                .find(sig)
                .and_then(|si| self.sigs.entry(si).lwr.predict(x));
            return Prediction {
                mode: 0,
                value: value.unwrap_or(f64::NAN),
                ok: value.is_some(),
            };
        }
        let xc = score::restrict_input(x, &c.mapping, sig);
        match self.modes[c.mode - 1].model.predict(&xc) {
            Some(value) => Prediction {
                mode: c.mode,
                value,
                ok: true,
            },
            None => Prediction {
                mode: c.mode,
                value: f64::NAN,
                ok: false,
            },
        }
    }

    pub(crate) fn target_id(&self, obs: usize) -> i64 {
        let o = &self.data[obs];
        self.sigs.entry(o.sig_index).sig[o.target].id
    }

    pub(crate) fn noise_add(&mut self, obs: usize) {
        let target_id = self.target_id(obs);
        let (sig_index, y) = (self.data[obs].sig_index, self.data[obs].y);
        self.noise.buckets.entry(sig_index).or_default().insert(obs, y);
        self.noise.member_rel.add(obs as i64, &[target_id]);
        self.noise.classifier_stale = true;
    }

    pub(crate) fn noise_del(&mut self, obs: usize) {
        let target_id = self.target_id(obs);
        let (sig_index, y) = (self.data[obs].sig_index, self.data[obs].y);
        if let Some(bucket) = self.noise.buckets.get_mut(&sig_index) {
            bucket.remove(obs, y);
        }
        self.noise.member_rel.del(obs as i64, &[target_id]);
        self.noise.classifier_stale = true;
    }

    /// Attach an observation to a learned mode. `obj_map` must already be
    /// set; the model row is appended in restricted layout.
    pub(crate) fn add_to_mode(&mut self, m: usize, obs: usize, update_refit: bool) {
        let target_id = self.target_id(obs);
        let (xc, y) = {
            let o = &self.data[obs];
            let sig = &self.sigs.entry(o.sig_index).sig;
            let xc = if self.modes[m - 1].model.is_const() {
                Vec::new()
            } else {
                score::restrict_input(&o.x, &o.obj_map, sig)
            };
            (xc, o.y)
        };
        let mode = &mut self.modes[m - 1];
        mode.members.insert(obs);
        let row = mode.model.add_example(&xc, y, update_refit);
        mode.row_owner.push(obs);
        mode.member_rel.add(obs as i64, &[target_id]);
        if mode.model.needs_refit() {
            mode.stale = true;
        }
        mode.classifier_stale = true;
        self.data[obs].model_row = row;
    }

    /// Detach an observation from a learned mode, patching the one
    /// observation displaced by the swap-remove.
    pub(crate) fn remove_from_mode(&mut self, m: usize, obs: usize) {
        let target_id = self.target_id(obs);
        let row = self.data[obs].model_row;
        let mode = &mut self.modes[m - 1];
        mode.members.remove(&obs);
        mode.member_rel.del(obs as i64, &[target_id]);
        let moved = mode.model.del_example(row);
        mode.row_owner.swap_remove(row);
        mode.stale = true;
        mode.classifier_stale = true;
        let displaced = moved.map(|_| mode.row_owner[row]);
        if let Some(d) = displaced {
            self.data[d].model_row = row;
        }
    }
}

/// All observation indices, for marking a changed mode fully stale.
pub(crate) fn all_obs(ndata: usize) -> BTreeSet<usize> {
    (0..ndata).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::sig::ObjectSig;

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
    fn learn_starts_in_noise() {
        let mut e = Engine::new(EngineConfig::default()).unwrap();
        let sig = sig1();
        e.learn(0, &sig, &RelationTable::new(), &[1.0], 3.0);
        e.learn(0, &sig, &RelationTable::new(), &[2.0], 5.0);
        assert_eq!(e.num_observations(), 2);
        assert_eq!(e.noise_count(), 2);
        assert_eq!(e.map_mode(0), Some(0));
        assert_eq!(e.probabilities(0).unwrap()[0], e.config().noise_prob);

        let o = e.observation(1).unwrap();
        assert_eq!(o.x, vec![2.0]);
        assert_eq!(o.y, 5.0);
        assert!(e.observation(2).is_none());
    }

    #[test]
    fn empty_engine_predicts_nothing() {
        let mut e = Engine::new(EngineConfig::default()).unwrap();
        let sig = sig1();
        let p = e.predict(0, &sig, &RelationTable::new(), &[1.0]);
        assert_eq!(p.mode, 0);
        assert!(!p.ok);
        assert!(p.value.is_nan());
    }

    #[test]
    fn noise_fallback_uses_local_regressor() {
        let mut e = Engine::new(EngineConfig::default()).unwrap();
        let sig = sig1();
        for i in 0..5 {
            e.learn(0, &sig, &RelationTable::new(), &[i as f64], 2.0 * i as f64);
        }
        let p = e.predict(0, &sig, &RelationTable::new(), &[2.0]);
        assert_eq!(p.mode, 0);
        assert!(p.ok);
        assert!((p.value - 4.0).abs() < 1.0, "got {}", p.value);
    }

    #[test]
    fn rejects_invalid_config() {
        let config = EngineConfig {
            noise_prob: 0.0,
            ..EngineConfig::default()
        };
        assert!(Engine::new(config).is_err());
    }
}
