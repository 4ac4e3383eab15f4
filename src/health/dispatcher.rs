//! Routes a credential record to its provider probe.
//!
//! The dispatcher is the catch boundary: whatever a probe does (reject,
//! time out, panic) comes back as a failing `KeyTestResult`, never as an
//! error or an unwind into the caller.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::KeyTestResult;
use crate::probes::gemini::GeminiProbe;
use crate::probes::groq::GroqProbe;
use crate::probes::openai::OpenAiProbe;
use crate::probes::{ProbeError, ProbeOutcome, ProviderEndpoints, ProviderProbe, Service};
use crate::vault::store::CredentialRecord;

/// Default bound on a single probe, including reading the error body.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// One probe per supported `Service` variant.
#[derive(Clone)]
pub struct ProbeSet {
    openai: Arc<dyn ProviderProbe>,
    groq: Arc<dyn ProviderProbe>,
    gemini: Arc<dyn ProviderProbe>,
}

impl ProbeSet {
    pub fn new(
        openai: Arc<dyn ProviderProbe>,
        groq: Arc<dyn ProviderProbe>,
        gemini: Arc<dyn ProviderProbe>,
    ) -> Self {
        Self { openai, groq, gemini }
    }

    /// Real HTTP probes sharing one connection pool.
    pub fn http(client: reqwest::Client, endpoints: &ProviderEndpoints) -> Self {
        Self::new(
            Arc::new(OpenAiProbe::new(client.clone(), endpoints.openai.clone())),
            Arc::new(GroqProbe::new(client.clone(), endpoints.groq.clone())),
            Arc::new(GeminiProbe::new(client, endpoints.gemini.clone())),
        )
    }

    pub fn for_service(&self, service: Service) -> Option<Arc<dyn ProviderProbe>> {
        match service {
            Service::OpenAi => Some(Arc::clone(&self.openai)),
            Service::Groq => Some(Arc::clone(&self.groq)),
            Service::Gemini => Some(Arc::clone(&self.gemini)),
            Service::Unsupported => None,
        }
    }
}

pub struct ProbeDispatcher {
    probes: ProbeSet,
    timeout: Duration,
}

impl ProbeDispatcher {
    pub fn new(probes: ProbeSet, timeout: Duration) -> Self {
        Self { probes, timeout }
    }

    /// Test one record. Never fails; every problem becomes `ok: false`.
    pub async fn dispatch(&self, record: &CredentialRecord) -> KeyTestResult {
        let service = Service::from_name(&record.service);
        let outcome = match self.probes.for_service(service) {
            Some(probe) => self.run_probe(probe, record).await,
            None => {
                debug!(key_id = record.id, service = %record.service, "No probe for service");
                ProbeOutcome::unsupported(&record.service)
            }
        };

        if outcome.ok {
            debug!(key_id = record.id, provider = %outcome.provider_label, "Key healthy");
        } else {
            warn!(
                key_id = record.id,
                provider = %outcome.provider_label,
                status = ?outcome.status_code,
                error = outcome.error_message.as_deref().unwrap_or(""),
                "Key failed health test"
            );
        }

        KeyTestResult::new(record, outcome)
    }

    /// Run the probe on its own task so a panic is contained, bounded by
    /// the dispatcher timeout.
    async fn run_probe(&self, probe: Arc<dyn ProviderProbe>, record: &CredentialRecord) -> ProbeOutcome {
        let label = probe.label().to_string();
        let secret = record.secret_value.clone();
        let timeout = self.timeout;

        let handle = tokio::spawn(async move {
            match tokio::time::timeout(timeout, probe.probe(&secret)).await {
                Ok(result) => result,
                Err(_) => Err(ProbeError::Timeout(timeout)),
            }
        });

        let result = handle
            .await
            .unwrap_or_else(|e| Err(ProbeError::Aborted(e.to_string())));
        ProbeOutcome::from_result(&label, result)
    }
}
