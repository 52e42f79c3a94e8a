#![forbid(unsafe_code)]

//! Inspection utilities for partitioned stores.
//!
//! Verification checks the committed layout invariants of a partition and
//! reports violations as findings; statistics summarize buffer usage.

mod stats;
mod verify;

/// Per-partition buffer usage.
pub use stats::{partition_stats, stats, PartitionStats};

/// Layout integrity verification.
///
/// Checks metadata agreement, index contiguity, key order and the entry/value
/// bijection of one partition.
pub use verify::{verify, VerifyCounts, VerifyFinding, VerifyLevel, VerifyReport, VerifySeverity};
