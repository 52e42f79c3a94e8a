use serde::Serialize;

use crate::storage::{MetadataStore, PartitionMetadata, PartitionStore, SparseStore, ValueCodec};
use crate::types::{PartitionId, Result};

const MAX_FINDINGS: usize = 32;

/// Specifies the depth of verification checks to perform.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyLevel {
    /// Metadata agreement and capacity only.
    Fast,
    /// Also walks every index: contiguity, sortedness and the value bijection.
    Full,
}

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Informational message about the verification process.
    Info,
    /// Critical issue indicating an invariant violation.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Human-readable description of the issue.
    pub message: String,
}

impl VerifyFinding {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Error,
            message: message.into(),
        }
    }

    fn info(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Info,
            message: message.into(),
        }
    }
}

/// Statistics collected during the verification process.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Indices walked.
    pub indices_checked: u64,
    /// Entry records walked.
    pub entries_checked: u64,
    /// Indices holding at least one entry.
    pub nonempty_indices: u64,
}

/// Complete report of a verification operation.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// Partition that was checked.
    pub partition: u64,
    /// The verification level that was performed.
    pub level: VerifyLevel,
    /// Whether verification passed without finding any errors.
    pub success: bool,
    /// Issues discovered during verification, capped at a fixed count.
    pub findings: Vec<VerifyFinding>,
    /// Statistics about the structures examined.
    pub counts: VerifyCounts,
}

/// Verifies the committed layout of one partition.
///
/// Problems with the partition's contents become findings; only an unknown
/// partition is an error.
pub fn verify<V: ValueCodec>(
    store: &SparseStore<V>,
    partition: PartitionId,
    level: VerifyLevel,
) -> Result<VerifyReport> {
    let persisted = store.options().metadata_store.get(partition);
    store.with_partition(partition, |part| {
        let mut findings = Vec::new();
        match &persisted {
            Ok(md) => check_metadata(part, md, &mut findings),
            Err(err) => push_error(&mut findings, format!("metadata unavailable: {err}")),
        }
        let mut counts = VerifyCounts::default();
        if matches!(level, VerifyLevel::Full) {
            check_layout(part, &mut findings, &mut counts);
        }
        VerifyReport {
            partition: partition.0,
            level,
            success: !findings
                .iter()
                .any(|f| f.severity == VerifySeverity::Error),
            findings,
            counts,
        }
    })
}

fn check_metadata(part: &PartitionStore, md: &PartitionMetadata, findings: &mut Vec<VerifyFinding>) {
    let live = part.metadata();
    if md.reserve != live.reserve {
        push_error(
            findings,
            format!("metadata reserve {} but buffers hold {}", md.reserve, live.reserve),
        );
    }
    if md.size != live.size {
        push_error(
            findings,
            format!("metadata size {} but {} entries in use", md.size, live.size),
        );
    }
    if md.handle != live.handle {
        push_error(
            findings,
            format!("metadata handle {} but buffers are {}", md.handle, live.handle),
        );
    }
    if live.size > live.reserve {
        push_error(
            findings,
            format!("{} entries exceed reserve {}", live.size, live.reserve),
        );
    }
}

fn check_layout(part: &PartitionStore, findings: &mut Vec<VerifyFinding>, counts: &mut VerifyCounts) {
    let entries = part.used_entries();
    let mut running = 0usize;
    for (index, oc) in part.index_table().iter().enumerate() {
        counts.indices_checked += 1;
        if oc.offset != running {
            push_error(
                findings,
                format!("index {index} starts at {} but the previous run ends at {running}", oc.offset),
            );
        }
        let Some(run) = entries.get(oc.range()) else {
            push_error(
                findings,
                format!("index {index} run {:?} lies past {} used entries", oc.range(), entries.len()),
            );
            running = oc.end();
            continue;
        };
        if !run.is_empty() {
            counts.nonempty_indices += 1;
        }
        for pair in run.windows(2) {
            if pair[0].key >= pair[1].key {
                push_error(
                    findings,
                    format!(
                        "index {index} keys out of order: {} then {}",
                        pair[0].key, pair[1].key
                    ),
                );
            }
        }
        running = oc.end();
    }
    if running != entries.len() {
        push_error(
            findings,
            format!("index runs cover {running} entries, {} in use", entries.len()),
        );
    }
    for (k, entry) in entries.iter().enumerate() {
        counts.entries_checked += 1;
        if entry.value_offset != k {
            push_error(
                findings,
                format!("entry {k} (key {}) points at value slot {}", entry.key, entry.value_offset),
            );
        }
    }
    if findings.len() >= MAX_FINDINGS {
        findings.truncate(MAX_FINDINGS - 1);
        findings.push(VerifyFinding::info("finding limit reached; remaining checks suppressed"));
    }
}

fn push_error(findings: &mut Vec<VerifyFinding>, message: impl Into<String>) {
    if findings.len() < MAX_FINDINGS {
        findings.push(VerifyFinding::error(message));
    }
}
