//! Whole-state snapshot and restore.
//!
//! Everything learned goes into one JSON document: the observation log,
//! signatures, noise pool, modes, pairwise classifiers, the relation
//! table, and the service toggles. Derived structures that can be replayed
//! from the log (the per-signature regressors, the noise order statistics)
//! are rebuilt on restore instead of being stored.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tracing::info;

use strata_core::config::EngineConfig;
use strata_core::errors::{StrataError, StrataResult};
use strata_core::relation::RelationTable;
use strata_regress::Lwr;

use crate::classify::PairClassifier;
use crate::engine::Engine;
use crate::mode::{Mode, NoiseMode, OrdF64};
use crate::store::{Observation, SigRegistry};

#[derive(Serialize, Deserialize)]
struct Snapshot {
    ndata: usize,
    nmodes: usize,
    data: Vec<Observation>,
    sigs: SigRegistry,
    noise: NoiseMode,
    modes: Vec<Mode>,
    classifiers: Vec<((usize, usize), PairClassifier)>,
    rels: RelationTable,
    use_em: bool,
    use_foil: bool,
    use_lda: bool,
}

fn corrupt(reason: impl Into<String>) -> StrataError {
    StrataError::CorruptSnapshot {
        reason: reason.into(),
    }
}

impl Snapshot {
    fn validate(&self) -> StrataResult<()> {
        if self.data.len() != self.ndata {
            return Err(corrupt(format!(
                "observation count {} does not match header {}",
                self.data.len(),
                self.ndata
            )));
        }
        if self.modes.len() + 1 != self.nmodes {
            return Err(corrupt(format!(
                "mode count {} does not match header {}",
                self.modes.len() + 1,
                self.nmodes
            )));
        }
        for (i, o) in self.data.iter().enumerate() {
            if o.mode_prob.len() != self.nmodes {
                return Err(corrupt(format!("observation {i} has a short probability row")));
            }
            if o.map_mode >= self.nmodes {
                return Err(corrupt(format!("observation {i} maps to a missing mode")));
            }
            if o.sig_index >= self.sigs.len() {
                return Err(corrupt(format!("observation {i} names a missing signature")));
            }
        }
        for &(i, j) in self.classifiers.iter().map(|(k, _)| k) {
            if i >= j || j >= self.nmodes {
                return Err(corrupt(format!("classifier key ({i}, {j}) is invalid")));
            }
        }
        for (m, mode) in self.modes.iter().enumerate() {
            if mode.row_owner.len() != mode.members.len() {
                return Err(corrupt(format!("mode {} has inconsistent rows", m + 1)));
            }
        }
        Ok(())
    }
}

impl Engine {
    /// Write the full learned state as JSON.
    pub fn save<W: Write>(&self, writer: W) -> StrataResult<()> {
        let snap = Snapshot {
            ndata: self.data.len(),
            nmodes: self.nmodes(),
            data: self.data.clone(),
            sigs: self.sigs.clone(),
            noise: self.noise.clone(),
            modes: self.modes.clone(),
            classifiers: self
                .classifiers
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
            rels: self.rels.clone(),
            use_em: self.use_em,
            use_foil: self.use_foil,
            use_lda: self.use_lda,
        };
        serde_json::to_writer(writer, &snap)?;
        Ok(())
    }

    /// Rebuild an engine from a snapshot. The RNG is reseeded from the
    /// config, and replayable structures are rebuilt from the observation
    /// log.
    pub fn restore<R: Read>(config: EngineConfig, reader: R) -> StrataResult<Self> {
        let snap: Snapshot = serde_json::from_reader(reader)?;
        snap.validate()?;

        let mut engine = Engine::new(config)?;
        engine.data = snap.data;
        engine.sigs = snap.sigs;
        engine.noise = snap.noise;
        engine.modes = snap.modes;
        engine.classifiers = snap.classifiers.into_iter().collect();
        engine.rels = snap.rels;
        engine.use_em = snap.use_em;
        engine.use_foil = snap.use_foil;
        engine.use_lda = snap.use_lda;

        // Replay the per-signature regressors.
        for si in 0..engine.sigs.len() {
            let mut lwr = Lwr::new(engine.config.lwr_k);
            for &obs in &engine.sigs.entry(si).members {
                let o = &engine.data[obs];
                lwr.learn(&o.x, o.y);
            }
            engine.sigs.entry_mut(si).lwr = lwr;
        }

        // Rebuild the noise order statistics.
        let data = &engine.data;
        for bucket in engine.noise.buckets.values_mut() {
            let mut sorted: BTreeMap<OrdF64, BTreeSet<usize>> = BTreeMap::new();
            for &obs in &bucket.members {
                sorted
                    .entry(OrdF64(data[obs].y))
                    .or_default()
                    .insert(obs);
            }
            bucket.sorted_ys = sorted;
        }

        info!(
            observations = engine.data.len(),
            modes = engine.nmodes(),
            "restored engine state"
        );
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn trained_engine() -> Engine {
        let config = EngineConfig {
            new_mode_thresh: 10,
            ..EngineConfig::default()
        };
        let mut e = Engine::new(config).unwrap();
        let sig = sig1();
        for i in 0..25 {
            let x = i as f64;
            e.learn(0, &sig, &RelationTable::new(), &[x], 3.0 * x - 2.0);
        }
        e.run(50);
        // Settle the classifiers before snapshotting.
        e.predict(0, &sig, &RelationTable::new(), &[1.0]);
        e
    }

    #[test]
    fn round_trip_preserves_predictions() {
        let mut original = trained_engine();
        let mut buf = Vec::new();
        original.save(&mut buf).unwrap();

        let mut restored = Engine::restore(original.config().clone(), buf.as_slice()).unwrap();
        assert_eq!(restored.nmodes(), original.nmodes());
        assert_eq!(restored.num_observations(), original.num_observations());

        let sig = sig1();
        for probe in [0.5, 7.25, 40.0] {
            let a = original.predict(0, &sig, &RelationTable::new(), &[probe]);
            let b = restored.predict(0, &sig, &RelationTable::new(), &[probe]);
            assert_eq!(a.mode, b.mode);
            assert_eq!(a.ok, b.ok);
            assert_eq!(a.value.to_bits(), b.value.to_bits());
        }
    }

    #[test]
    fn round_trip_through_a_file() {
        let original = trained_engine();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        original.save(std::fs::File::create(&path).unwrap()).unwrap();

        let restored = Engine::restore(
            original.config().clone(),
            std::fs::File::open(&path).unwrap(),
        )
        .unwrap();
        assert_eq!(restored.noise_count(), original.noise_count());
        assert_eq!(restored.map_mode(0), original.map_mode(0));
    }

    #[test]
    fn garbage_input_is_rejected() {
        let err = Engine::restore(EngineConfig::default(), &b"not json"[..]);
        assert!(matches!(err, Err(StrataError::Snapshot(_))));
    }

    #[test]
    fn mismatched_counts_are_rejected() {
        let original = trained_engine();
        let mut buf = Vec::new();
        original.save(&mut buf).unwrap();
        let mut snap: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        snap["ndata"] = serde_json::json!(999);
        let bytes = serde_json::to_vec(&snap).unwrap();

        let err = Engine::restore(EngineConfig::default(), bytes.as_slice());
        assert!(matches!(err, Err(StrataError::CorruptSnapshot { .. })));
    }
}
