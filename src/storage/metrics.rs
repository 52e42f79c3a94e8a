use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking commit activity across partitions.
///
/// Implementations collect statistics about merged entries, buffer growth and
/// dropped overflow. All methods may be called concurrently from commits on
/// different partitions.
pub trait CommitMetrics: Send + Sync {
    /// Records a successful commit.
    ///
    /// # Parameters
    /// * `inserted` - New entries merged into the partition.
    /// * `updated` - Existing entries whose value was overwritten.
    fn commit_applied(&self, inserted: usize, updated: usize);

    /// Records a buffer reallocation from `old_reserve` to `new_reserve` entries.
    fn partition_grown(&self, old_reserve: usize, new_reserve: usize);

    /// Records staged overflow entries that did not fit the mutator slots.
    fn overflow_dropped(&self, entries: usize);

    /// Records a commit that returned an error.
    fn commit_failed(&self);
}

/// A no-op implementation of [`CommitMetrics`] that discards all recorded metrics.
#[derive(Default)]
pub struct NoopMetrics;

impl CommitMetrics for NoopMetrics {
    fn commit_applied(&self, _inserted: usize, _updated: usize) {}
    fn partition_grown(&self, _old_reserve: usize, _new_reserve: usize) {}
    fn overflow_dropped(&self, _entries: usize) {}
    fn commit_failed(&self) {}
}

/// A thread-safe counter-based implementation of [`CommitMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Number of successful commits.
    pub commits: AtomicU64,

    /// Entries inserted across all commits.
    pub entries_inserted: AtomicU64,

    /// Entries overwritten in place across all commits.
    pub entries_updated: AtomicU64,

    /// Number of buffer reallocations.
    pub growths: AtomicU64,

    /// Entry capacity added by reallocations.
    pub reserve_added: AtomicU64,

    /// Staged overflow entries that were not committed.
    pub overflow_dropped: AtomicU64,

    /// Number of commits that failed.
    pub commits_failed: AtomicU64,
}

impl CommitMetrics for CounterMetrics {
    fn commit_applied(&self, inserted: usize, updated: usize) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        self.entries_inserted
            .fetch_add(inserted as u64, Ordering::Relaxed);
        self.entries_updated
            .fetch_add(updated as u64, Ordering::Relaxed);
    }

    fn partition_grown(&self, old_reserve: usize, new_reserve: usize) {
        self.growths.fetch_add(1, Ordering::Relaxed);
        self.reserve_added.fetch_add(
            new_reserve.saturating_sub(old_reserve) as u64,
            Ordering::Relaxed,
        );
    }

    fn overflow_dropped(&self, entries: usize) {
        self.overflow_dropped
            .fetch_add(entries as u64, Ordering::Relaxed);
    }

    fn commit_failed(&self) {
        self.commits_failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
///
/// The default implementation is [`NoopMetrics`], which has zero overhead
/// as it discards all recorded metrics.
pub fn default_metrics() -> Arc<dyn CommitMetrics> {
    Arc::new(NoopMetrics)
}
