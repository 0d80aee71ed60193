//! Property tests: structural invariants that must survive any ingestion
//! order and any mix of regimes.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use strata_core::config::EngineConfig;
use strata_core::relation::RelationTable;
use strata_core::sig::{ObjectSig, SceneSig};
use strata_engine::Engine;

fn single_obj_sig() -> SceneSig {
    let mut sig = SceneSig::new();
    sig.add(ObjectSig {
        id: 1,
        type_id: 1,
        name: "t".to_string(),
        props: vec!["px".to_string()],
        start: 0,
    });
    sig
}

/// A stream mixing two linear regimes and out-of-regime scatter.
fn stream(seed: u64, n: usize) -> Vec<(f64, f64)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let x: f64 = rng.gen_range(-20.0..20.0);
            let y = match rng.gen_range(0u8..10) {
                0..=4 => 2.0 * x + 1.0,
                5..=8 => -3.0 * x + 7.0,
                _ => rng.gen_range(-100.0..100.0),
            };
            (x, y)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn membership_stays_a_partition(seed in 0u64..1000, n in 20usize..60) {
        let config = EngineConfig {
            new_mode_thresh: 8,
            ..EngineConfig::default()
        };
        let mut e = Engine::new(config).unwrap();
        let sig = single_obj_sig();
        let no_rels = RelationTable::new();
        for (x, y) in stream(seed, n) {
            e.learn(0, &sig, &no_rels, &[x], y);
        }
        e.run(200);

        // Every observation is counted exactly once across noise and modes.
        let mode_total: usize = (1..e.nmodes())
            .map(|m| e.mode(m).unwrap().members.len())
            .sum();
        prop_assert_eq!(mode_total + e.noise_count(), n);

        for obs in 0..n {
            let m = e.map_mode(obs).unwrap();
            prop_assert!(m < e.nmodes());
            if m > 0 {
                prop_assert!(e.mode(m).unwrap().members.contains(&obs));
            }
            // Probability rows track the mode registry.
            prop_assert_eq!(e.probabilities(obs).unwrap().len(), e.nmodes());
        }

        // Modes are pairwise disjoint and their row bookkeeping is dense.
        for m in 1..e.nmodes() {
            let mode = e.mode(m).unwrap();
            prop_assert_eq!(mode.row_owner.len(), mode.members.len());
            prop_assert_eq!(mode.model.row_count(), mode.members.len());
            let owners: std::collections::BTreeSet<usize> =
                mode.row_owner.iter().copied().collect();
            prop_assert_eq!(&owners, &mode.members);
            for other in (m + 1)..e.nmodes() {
                prop_assert!(mode.members.is_disjoint(&e.mode(other).unwrap().members));
            }
        }
    }

    #[test]
    fn prediction_never_panics(seed in 0u64..1000, probe in -50.0f64..50.0) {
        let config = EngineConfig {
            new_mode_thresh: 8,
            ..EngineConfig::default()
        };
        let mut e = Engine::new(config).unwrap();
        let sig = single_obj_sig();
        let no_rels = RelationTable::new();
        for (x, y) in stream(seed, 30) {
            e.learn(0, &sig, &no_rels, &[x], y);
        }
        e.run(100);

        let p = e.predict(0, &sig, &no_rels, &[probe]);
        prop_assert!(p.mode < e.nmodes());
        // A claimed prediction is finite; a refusal is NaN.
        prop_assert!(p.ok == p.value.is_finite());
    }
}
