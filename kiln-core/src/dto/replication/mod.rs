//! Replication DTOs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Outcome of copying one image into several regions
///
/// Each region is independent: `copied` and `failed` together cover every
/// requested region except the source region itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationReport {
    /// Region -> region-local image id
    pub copied: BTreeMap<String, String>,
    /// Region -> failure reason
    pub failed: BTreeMap<String, String>,
}

impl ReplicationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Converts the report into the copied mapping, or a partial failure
    /// that still carries every successful copy
    pub fn into_result(self) -> Result<BTreeMap<String, String>, ReplicationError> {
        if self.failed.is_empty() {
            Ok(self.copied)
        } else {
            Err(ReplicationError::PartialFailure {
                copied: self.copied,
                failed: self.failed,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicationError {
    #[error("image copy failed for {} region(s): {}", .failed.len(), describe_failures(.failed))]
    PartialFailure {
        copied: BTreeMap<String, String>,
        failed: BTreeMap<String, String>,
    },
}

fn describe_failures(failed: &BTreeMap<String, String>) -> String {
    failed
        .iter()
        .map(|(region, reason)| format!("{}: {}", region, reason))
        .collect::<Vec<_>>()
        .join("; ")
}
