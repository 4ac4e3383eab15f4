//! Batch and single-key health tests.
//!
//! A batch fans out one dispatch per record and joins all of them: a
//! failing or slow provider never short-circuits the others, and the
//! results come back in input order regardless of completion order.

use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use super::aggregator::summarize;
use super::{BatchReport, KeyTestResult, ProbeDispatcher};
use crate::vault::store::CredentialRecord;

pub struct HealthOrchestrator {
    dispatcher: Arc<ProbeDispatcher>,
}

impl HealthOrchestrator {
    pub fn new(dispatcher: Arc<ProbeDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Test every record concurrently.
    pub async fn test_all(&self, records: &[CredentialRecord]) -> BatchReport {
        if records.is_empty() {
            info!("No API keys found to test");
            return BatchReport::NoKeys;
        }

        let started = Instant::now();
        let results = join_all(records.iter().map(|r| self.dispatcher.dispatch(r))).await;
        let summary = summarize(&results);

        info!(
            total = summary.total,
            healthy = summary.healthy,
            unhealthy = summary.unhealthy,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "🩺 Batch health test complete"
        );

        BatchReport::Tested { results, summary }
    }

    pub async fn test_one(&self, record: &CredentialRecord) -> KeyTestResult {
        self.dispatcher.dispatch(record).await
    }
}
