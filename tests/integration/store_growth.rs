#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use dpd::{
    admin::{self, VerifyLevel},
    storage::CounterMetrics,
    BufferHandle, DpdError, PartitionId, Result, SparseStore, StoreConfig, StoreOptions,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[test]
fn growth_doubles_reserve_and_preserves_values() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let store: SparseStore<[u8; 16]> = SparseStore::create(
        &[4],
        StoreOptions::new()
            .initial_reserve(8)
            .num_slots(2)
            .metrics(metrics.clone()),
    )?;
    let p = PartitionId(0);
    let value = |index: usize, key: u64| {
        let mut v = [0u8; 16];
        v[..8].copy_from_slice(&key.to_le_bytes());
        v[8] = index as u8;
        v
    };

    {
        let mut m = store.mutator(p)?;
        for index in 0..4 {
            m.insert(index, 100 + index as u64, value(index, 100 + index as u64))?;
        }
    }
    let before = store.metadata(p)?;
    assert_eq!((before.size, before.reserve), (4, 8));

    let report = {
        let mut m = store.mutator(p)?;
        for index in 0..4 {
            m.insert(index, index as u64, value(index, index as u64))?;
        }
        m.commit()?.expect("report")
    };
    assert_eq!(report.grown_from, Some(8));
    assert!(report.reserve >= 2 * before.reserve);

    let after = store.metadata(p)?;
    assert_eq!(after.size, 8);
    assert_eq!(after.handle, BufferHandle(1));
    for index in 0..4 {
        let key_old = 100 + index as u64;
        let key_new = index as u64;
        assert_eq!(
            store.entries(p, index)?,
            vec![
                (key_new, value(index, key_new)),
                (key_old, value(index, key_old))
            ]
        );
    }
    assert_eq!(metrics.growths.load(Ordering::Relaxed), 1);
    assert!(admin::verify(&store, p, VerifyLevel::Full)?.success);
    Ok(())
}

#[test]
fn demand_far_beyond_headroom_doubles_repeatedly() -> Result<()> {
    let store: SparseStore<u32> =
        SparseStore::create(&[64], StoreOptions::new().initial_reserve(4).num_slots(4))?;
    let p = PartitionId(0);
    let report = {
        let mut m = store.mutator(p)?;
        for index in 0..64 {
            m.insert(index, 1, index as u32)?;
        }
        m.commit()?.expect("report")
    };
    // 64 indices x 4 slots of demand against a reserve of 4.
    assert_eq!(report.reserve, 256);
    assert_eq!(report.size, 64);
    Ok(())
}

#[test]
fn growth_past_the_ceiling_leaves_partition_intact() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let store: SparseStore<u64> = SparseStore::create(
        &[2],
        StoreOptions::new()
            .initial_reserve(4)
            .num_slots(2)
            .max_reserve(6)
            .metrics(metrics.clone()),
    )?;
    let p = PartitionId(0);
    {
        let mut m = store.mutator(p)?;
        m.insert(0, 1, 10)?;
    }
    let before = store.metadata(p)?;

    let mut m = store.mutator(p)?;
    m.insert(0, 2, 20)?;
    m.insert(1, 3, 30)?;
    let err = m.commit().unwrap_err();
    assert!(matches!(err, DpdError::OutOfMemory { requested: 8 }), "{err}");
    drop(m);

    assert_eq!(store.metadata(p)?, before);
    assert_eq!(store.entries(p, 0)?, vec![(1, 10)]);
    assert!(store.entries(p, 1)?.is_empty());
    assert_eq!(metrics.commits_failed.load(Ordering::Relaxed), 1);
    Ok(())
}

#[test]
fn config_file_drives_store_options() -> Result<()> {
    let dir = tempfile::tempdir().map_err(|e| DpdError::InvalidArgument(e.to_string()))?;
    let path = dir.path().join("store.toml");
    std::fs::write(&path, "initial_reserve = 3\nnum_slots = 1\n")
        .map_err(|e| DpdError::InvalidArgument(e.to_string()))?;
    let config = StoreConfig::load(&path)?;
    let store: SparseStore<u8> = SparseStore::create(&[3], StoreOptions::from_config(&config))?;
    assert_eq!(store.metadata(PartitionId(0))?.reserve, 3);

    let missing = StoreConfig::load(dir.path().join("missing.toml")).map_err(DpdError::from);
    assert!(matches!(missing, Err(DpdError::Config(_))));
    Ok(())
}

#[test]
fn partitions_commit_concurrently() -> Result<()> {
    let partitions = 8;
    let sizes = vec![16; partitions];
    let store: SparseStore<u64> =
        SparseStore::create(&sizes, StoreOptions::new().initial_reserve(8).num_slots(4))?;

    thread::scope(|scope| -> Result<()> {
        let handles: Vec<_> = (0..partitions)
            .map(|p| {
                let store = &store;
                scope.spawn(move || -> Result<()> {
                    let mut rng = ChaCha8Rng::seed_from_u64(p as u64);
                    for _ in 0..20 {
                        let mut m = store.mutator(PartitionId(p as u64))?;
                        for _ in 0..10 {
                            let index = rng.gen_range(0..16);
                            let key = rng.gen_range(0..200u64);
                            m.insert(index, key, key * 3)?;
                        }
                        m.commit()?;
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("commit thread panicked")?;
        }
        Ok(())
    })?;

    for p in 0..partitions {
        let p = PartitionId(p as u64);
        let report = admin::verify(&store, p, VerifyLevel::Full)?;
        assert!(report.success, "{:?}", report.findings);
        for index in 0..16 {
            for (key, value) in store.entries(p, index)? {
                assert_eq!(value, key * 3);
            }
        }
    }
    Ok(())
}

#[test]
fn seeded_rounds_match_a_model() -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
    let store: SparseStore<i64> =
        SparseStore::create(&[10], StoreOptions::new().initial_reserve(2).num_slots(3))?;
    let p = PartitionId(0);
    let mut model: Vec<BTreeMap<u64, i64>> = vec![BTreeMap::new(); 10];

    for _ in 0..50 {
        let mut m = store.mutator(p)?;
        let mut slots: Vec<BTreeMap<u64, i64>> = vec![BTreeMap::new(); 10];
        for _ in 0..rng.gen_range(1..12) {
            let index = rng.gen_range(0..10);
            let key = rng.gen_range(0..40u64);
            let value: i64 = rng.gen();
            m.insert(index, key, value)?;
            if slots[index].len() < 3 || slots[index].contains_key(&key) {
                slots[index].insert(key, value);
            }
        }
        m.commit()?;
        for (index, staged) in slots.into_iter().enumerate() {
            model[index].extend(staged);
        }
    }

    for (index, expected) in model.iter().enumerate() {
        let expected: Vec<_> = expected.iter().map(|(&k, &v)| (k, v)).collect();
        assert_eq!(store.entries(p, index)?, expected, "index {index}");
    }
    Ok(())
}
