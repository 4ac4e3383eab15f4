//! On-demand credential health tests.
//!
//! `ProbeDispatcher` routes one record to its provider probe,
//! `HealthOrchestrator` fans a batch out and joins it back in input
//! order, and `aggregator::summarize` folds the results.

use serde::Serialize;

use crate::probes::ProbeOutcome;
use crate::vault::store::CredentialRecord;

pub mod aggregator;
pub mod dispatcher;
pub mod orchestrator;

pub use dispatcher::{ProbeDispatcher, ProbeSet};
pub use orchestrator::HealthOrchestrator;

/// Outcome of testing one stored credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyTestResult {
    pub key_id: i64,
    pub key_name: String,
    pub service: String,
    #[serde(flatten)]
    pub outcome: ProbeOutcome,
}

impl KeyTestResult {
    pub fn new(record: &CredentialRecord, outcome: ProbeOutcome) -> Self {
        Self {
            key_id: record.id,
            key_name: record.key_name.clone(),
            service: record.service.clone(),
            outcome,
        }
    }

    pub fn ok(&self) -> bool {
        self.outcome.ok
    }
}

/// Counts over one batch. `healthy + unhealthy == total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
}

/// Result of a batch test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchReport {
    /// The owner has no stored credentials; nothing was probed.
    NoKeys,
    Tested {
        results: Vec<KeyTestResult>,
        summary: BatchSummary,
    },
}

impl BatchReport {
    pub fn results(&self) -> &[KeyTestResult] {
        match self {
            BatchReport::NoKeys => &[],
            BatchReport::Tested { results, .. } => results,
        }
    }

    pub fn summary(&self) -> Option<BatchSummary> {
        match self {
            BatchReport::NoKeys => None,
            BatchReport::Tested { summary, .. } => Some(*summary),
        }
    }
}

#[cfg(test)]
pub(crate) fn record(id: i64, service: &str, secret: &str) -> CredentialRecord {
    CredentialRecord {
        id,
        owner_id: "owner-1".into(),
        key_name: format!("key-{}", id),
        service: service.into(),
        secret_value: zeroize::Zeroizing::new(secret.to_string()),
        rate_limit: crate::vault::store::DEFAULT_RATE_LIMIT,
        expires_at: None,
        ip_allowlist: None,
        created_at: chrono::Utc::now(),
    }
}
