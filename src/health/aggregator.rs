//! Folds per-key results into a batch summary.

use super::{BatchSummary, KeyTestResult};

pub fn summarize(results: &[KeyTestResult]) -> BatchSummary {
    let total = results.len();
    let healthy = results.iter().filter(|r| r.ok()).count();
    BatchSummary { total, healthy, unhealthy: total - healthy }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::ProbeOutcome;

    fn result(id: i64, ok: bool) -> KeyTestResult {
        KeyTestResult {
            key_id: id,
            key_name: format!("key-{}", id),
            service: "openai".into(),
            outcome: ProbeOutcome {
                ok,
                status_code: Some(if ok { 200 } else { 401 }),
                error_message: None,
                provider_label: "OpenAI".into(),
            },
        }
    }

    #[test]
    fn test_empty() {
        assert_eq!(summarize(&[]), BatchSummary { total: 0, healthy: 0, unhealthy: 0 });
    }

    #[test]
    fn test_mixed() {
        let results = vec![result(1, true), result(2, false), result(3, true), result(4, false), result(5, false)];
        let summary = summarize(&results);
        assert_eq!(summary, BatchSummary { total: 5, healthy: 2, unhealthy: 3 });
    }

    #[test]
    fn test_totals_always_balance() {
        for n in 0..8 {
            let results: Vec<_> = (0..n).map(|i| result(i, i % 3 == 0)).collect();
            let summary = summarize(&results);
            assert_eq!(summary.total, results.len());
            assert_eq!(summary.healthy + summary.unhealthy, summary.total);
        }
    }
}
