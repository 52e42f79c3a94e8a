#![allow(missing_docs)]

use std::sync::atomic::Ordering;
use std::sync::Arc;

use dpd::{
    storage::CounterMetrics, DpdError, PartitionId, Result, SparseStore, StoreOptions,
};

fn store_with_slots(num_slots: usize) -> (SparseStore<u64>, Arc<CounterMetrics>) {
    let metrics = Arc::new(CounterMetrics::default());
    let store = SparseStore::create(
        &[3],
        StoreOptions::new()
            .initial_reserve(32)
            .num_slots(num_slots)
            .metrics(metrics.clone()),
    )
    .unwrap();
    (store, metrics)
}

#[test]
fn only_slot_entries_reach_the_partition() -> Result<()> {
    let (store, metrics) = store_with_slots(2);
    let p = PartitionId(0);
    let report = {
        let mut m = store.mutator(p)?;
        for key in [50, 10, 30, 20] {
            m.insert(0, key, key + 1)?;
        }
        assert_eq!(m.overflow_len(), 2);
        m.commit()?.expect("report on first commit")
    };
    assert_eq!(report.dropped_overflow, 2);
    assert_eq!(store.entries(p, 0)?, vec![(10, 11), (50, 51)]);
    assert_eq!(metrics.overflow_dropped.load(Ordering::Relaxed), 2);
    Ok(())
}

#[test]
fn writes_after_commit_are_rejected() -> Result<()> {
    let (store, _) = store_with_slots(4);
    let mut m = store.mutator(PartitionId(0))?;
    m.insert(1, 1, 1)?;
    let first = m.commit()?;
    assert!(first.is_some());
    assert!(m.commit()?.is_none(), "second commit is a no-op");
    assert!(m.is_committed());
    assert!(matches!(m.insert(1, 2, 2), Err(DpdError::UseAfterCommit)));
    drop(m);
    assert_eq!(store.entries(PartitionId(0), 1)?, vec![(1, 1)]);
    Ok(())
}

#[test]
fn dropping_an_uncommitted_mutator_commits_it() -> Result<()> {
    let (store, metrics) = store_with_slots(4);
    {
        let mut m = store.mutator(PartitionId(0))?;
        m.insert(2, 7, 70)?;
        m.insert(2, 3, 30)?;
    }
    assert_eq!(store.entries(PartitionId(0), 2)?, vec![(3, 30), (7, 70)]);
    assert_eq!(metrics.commits.load(Ordering::Relaxed), 1);
    Ok(())
}

#[test]
fn index_bounds_follow_the_mutator_width() -> Result<()> {
    let (store, _) = store_with_slots(2);
    let mut m = store.mutator_with(PartitionId(0), 2, 2)?;
    assert_eq!(m.num_indices(), 2);
    assert!(matches!(
        m.set(2, 1),
        Err(DpdError::IndexOutOfRange { index: 2, len: 2 })
    ));
    m.insert(1, 5, 5)?;
    m.commit()?;
    Ok(())
}

#[test]
fn erase_reports_not_implemented_and_commits_nothing_extra() -> Result<()> {
    let (store, _) = store_with_slots(2);
    {
        let mut m = store.mutator(PartitionId(0))?;
        m.insert(0, 1, 1)?;
    }
    let mut m = store.mutator(PartitionId(0))?;
    assert!(matches!(m.erase(0, 1), Err(DpdError::NotImplemented(_))));
    assert_eq!(m.pending_erasures(), 1);
    let report = m.commit()?.expect("report");
    assert_eq!(report.inserted, 0);
    drop(m);
    assert_eq!(store.entries(PartitionId(0), 0)?, vec![(1, 1)]);
    Ok(())
}

#[test]
fn staged_queries_see_slots_and_overflow() -> Result<()> {
    let (store, _) = store_with_slots(1);
    let mut m = store.mutator(PartitionId(0))?;
    m.insert(0, 4, 40)?;
    m.insert(0, 2, 20)?;
    m.insert(2, 4, 41)?;
    assert_eq!(m.row_keys(0)?, vec![4, 2]);
    assert_eq!(m.keys(), vec![4, 2]);
    assert_eq!(m.indices(), vec![0, 2]);
    assert_eq!(m.indices_with(4), vec![0, 2]);
    assert_eq!(m.get(0, 2), Some(&20));
    assert_eq!(m.get(1, 4), None);
    Ok(())
}

#[test]
fn unaddressable_staging_shapes_are_errors() -> Result<()> {
    let (store, _) = store_with_slots(2);
    let p = PartitionId(0);
    for (indices, slots) in [(1, usize::MAX / 4), (3, usize::MAX / 2), (2, usize::MAX)] {
        assert!(matches!(
            store.mutator_with(p, indices, slots),
            Err(DpdError::InvalidArgument(_))
        ));
    }
    assert!(matches!(
        store.mutator_with(p, 4, 1),
        Err(DpdError::IndexOutOfRange { index: 3, len: 3 })
    ));

    let mut m = store.mutator_with(p, 3, 1 << 12)?;
    m.insert(2, 8, 80)?;
    m.commit()?;
    drop(m);
    assert_eq!(store.entries(p, 2)?, vec![(8, 80)]);
    Ok(())
}
