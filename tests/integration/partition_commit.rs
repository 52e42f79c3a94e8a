#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use dpd::{
    admin::{self, VerifyLevel},
    storage::{CounterMetrics, MemMetadataStore, MetadataStore, PartitionMetadata},
    CommitBatch, DpdError, PartitionId, Result, SparseStore, StoreOptions,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dpd=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn assert_clean(store: &SparseStore<f64>, partition: PartitionId) -> Result<()> {
    let report = admin::verify(store, partition, VerifyLevel::Full)?;
    assert!(report.success, "verify findings: {:?}", report.findings);
    Ok(())
}

#[test]
fn staged_entries_merge_sorted_across_commits() -> Result<()> {
    init_tracing();
    let store: SparseStore<f64> =
        SparseStore::create(&[4], StoreOptions::new().initial_reserve(20))?;
    let p = PartitionId(0);

    let mut m = store.mutator(p)?;
    *m.set(0, 3)? = 333.3;
    *m.set(0, 5)? = 555.5;
    m.commit()?;
    drop(m);
    assert_eq!(store.entries(p, 0)?, vec![(3, 333.3), (5, 555.5)]);

    let mut m = store.mutator(p)?;
    *m.set(0, 4)? = 444.4;
    m.commit()?;
    drop(m);

    assert_eq!(
        store.entries(p, 0)?,
        vec![(3, 333.3), (4, 444.4), (5, 555.5)]
    );
    assert_eq!(store.len(p, 0)?, 3);
    assert_clean(&store, p)?;
    Ok(())
}

#[test]
fn flattened_batches_commit_directly() -> Result<()> {
    init_tracing();
    let store: SparseStore<f64> =
        SparseStore::create(&[3], StoreOptions::new().initial_reserve(32))?;
    let p = PartitionId(0);
    let value = |v: f64| v.to_le_bytes().to_vec();

    // Trailing slots past each count are ignored.
    let mut values = Vec::new();
    for v in [20.0, 10.0, -1.0, 7.0, -1.0, -1.0] {
        values.extend(value(v));
    }
    let batch = CommitBatch::from_parts(p, 3, 8, vec![2, 1], vec![2, 1, 99, 7, 98, 97], values)?;
    let report = store.commit(&batch)?;
    assert_eq!(report.inserted, 3);
    assert_eq!(store.entries(p, 0)?, vec![(1, 10.0), (2, 20.0)]);
    assert_eq!(store.entries(p, 1)?, vec![(7, 7.0)]);
    assert!(store.entries(p, 2)?.is_empty());
    assert_clean(&store, p)?;
    Ok(())
}

#[test]
fn untouched_indices_follow_shifted_neighbours() -> Result<()> {
    init_tracing();
    let store: SparseStore<f64> =
        SparseStore::create(&[5], StoreOptions::new().initial_reserve(64))?;
    let p = PartitionId(0);
    {
        let mut m = store.mutator(p)?;
        m.insert(4, 40, 4.0)?;
        m.insert(2, 20, 2.0)?;
    }
    {
        // Narrow mutator: only indices 0 and 1 are staged, 2..5 must still move.
        let mut m = store.mutator_with(p, 2, 3)?;
        m.insert(0, 1, 0.1)?;
        m.insert(1, 2, 0.2)?;
        m.insert(1, 1, 0.15)?;
    }
    assert_eq!(store.entries(p, 1)?, vec![(1, 0.15), (2, 0.2)]);
    assert_eq!(store.entries(p, 2)?, vec![(20, 2.0)]);
    assert_eq!(store.entries(p, 4)?, vec![(40, 4.0)]);
    assert_eq!(store.get(p, 4, 40)?, Some(4.0));
    assert_eq!(store.get(p, 3, 40)?, None);
    assert_clean(&store, p)?;
    Ok(())
}

#[test]
fn rewriting_a_key_overwrites_its_value() -> Result<()> {
    init_tracing();
    let metrics = Arc::new(CounterMetrics::default());
    let store: SparseStore<f64> = SparseStore::create(
        &[2],
        StoreOptions::new()
            .initial_reserve(16)
            .metrics(metrics.clone()),
    )?;
    let p = PartitionId(0);
    {
        let mut m = store.mutator(p)?;
        m.insert(1, 8, 1.0)?;
        m.insert(1, 9, 2.0)?;
    }
    let report = {
        let mut m = store.mutator(p)?;
        m.insert(1, 9, 3.0)?;
        m.insert(1, 10, 4.0)?;
        m.commit()?.expect("first commit returns a report")
    };
    assert_eq!((report.inserted, report.updated), (1, 1));
    assert_eq!(store.entries(p, 1)?, vec![(8, 1.0), (9, 3.0), (10, 4.0)]);
    assert_eq!(
        metrics.entries_updated.load(std::sync::atomic::Ordering::Relaxed),
        1
    );
    assert_clean(&store, p)?;
    Ok(())
}

#[test]
fn metadata_tracks_every_commit() -> Result<()> {
    init_tracing();
    let metadata = Arc::new(MemMetadataStore::new());
    let store: SparseStore<f64> = SparseStore::create(
        &[2, 2],
        StoreOptions::new()
            .initial_reserve(10)
            .metadata_store(metadata.clone()),
    )?;
    {
        let mut m = store.mutator(PartitionId(1))?;
        m.insert(0, 1, 1.0)?;
        m.insert(1, 1, 1.0)?;
    }
    let md = metadata.get(PartitionId(1))?;
    assert_eq!((md.size, md.reserve), (2, 10));
    assert_eq!(metadata.get(PartitionId(0))?.size, 0);
    assert_eq!(store.metadata(PartitionId(1))?, md);
    Ok(())
}

#[test]
fn unknown_partition_is_not_found() {
    init_tracing();
    let store: SparseStore<f64> = SparseStore::create(&[1], StoreOptions::new()).unwrap();
    let batch = CommitBatch::new(PartitionId(3), 1, 1, 8).unwrap();
    assert!(matches!(store.commit(&batch), Err(DpdError::NotFound(_))));
    assert!(matches!(
        store.get(PartitionId(3), 0, 0),
        Err(DpdError::NotFound(_))
    ));
}

/// Wraps the in-memory backend with an outage switch for writes.
#[derive(Default)]
struct UnreliableMetadata {
    inner: MemMetadataStore,
    writes_fail: AtomicBool,
}

impl MetadataStore for UnreliableMetadata {
    fn get(&self, partition: PartitionId) -> Result<PartitionMetadata> {
        self.inner.get(partition)
    }

    fn put(&self, metadata: &PartitionMetadata) -> Result<()> {
        if self.writes_fail.load(Ordering::SeqCst) {
            return Err(DpdError::NotFound("metadata backend unreachable".into()));
        }
        self.inner.put(metadata)
    }

    fn remove(&self, partition: PartitionId) -> Result<()> {
        self.inner.remove(partition)
    }
}

#[test]
fn backend_write_failure_leaves_partition_as_it_was() -> Result<()> {
    init_tracing();
    let backend = Arc::new(UnreliableMetadata::default());
    let metrics = Arc::new(CounterMetrics::default());
    let store: SparseStore<f64> = SparseStore::create(
        &[2],
        StoreOptions::new()
            .initial_reserve(4)
            .num_slots(2)
            .metadata_store(backend.clone())
            .metrics(metrics.clone()),
    )?;
    let p = PartitionId(0);
    let mut m = store.mutator(p)?;
    m.insert(0, 1, 10.0)?;
    m.commit()?;
    drop(m);
    let before = store.metadata(p)?;

    backend.writes_fail.store(true, Ordering::SeqCst);
    let mut m = store.mutator(p)?;
    m.insert(0, 1, 11.0)?;
    m.insert(0, 0, 5.0)?;
    m.insert(1, 7, 70.0)?;
    assert!(matches!(m.commit(), Err(DpdError::NotFound(_))));
    drop(m);

    assert_eq!(store.entries(p, 0)?, vec![(1, 10.0)]);
    assert!(store.entries(p, 1)?.is_empty());
    assert_eq!(store.metadata(p)?, before);
    assert_eq!(metrics.commits_failed.load(Ordering::Relaxed), 1);
    assert_clean(&store, p)?;

    backend.writes_fail.store(false, Ordering::SeqCst);
    let mut m = store.mutator(p)?;
    m.insert(0, 0, 5.0)?;
    m.insert(1, 7, 70.0)?;
    let report = m.commit()?.expect("report on first commit");
    drop(m);
    assert_eq!(report.grown_from, Some(4));
    assert_eq!(store.entries(p, 0)?, vec![(0, 5.0), (1, 10.0)]);
    assert_eq!(store.entries(p, 1)?, vec![(7, 70.0)]);
    assert_clean(&store, p)?;
    Ok(())
}
