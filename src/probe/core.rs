//! Gating probes: existence, responsiveness, latency sampling.
//!
//! These run sequentially before any feature probe; an existence failure
//! aborts the rest of the run.

use async_trait::async_trait;

use crate::adapter::{ChatOptions, ChatTurn, DeclaredCaps};
use crate::error::{AdapterError, AdapterResult};

use super::types::{LatencyStats, ProbeReport};
use super::{Probe, ProbeTarget};

/// Number of samples taken by the latency probe.
pub const LATENCY_SAMPLES: usize = 5;

/// Hard ceiling on acceptable total response time.
const RESPONSIVE_TOTAL_MS: u64 = 60_000;
/// First-token bound that earns the latency bonus.
const RESPONSIVE_FIRST_TOKEN_MS: u64 = 10_000;

fn minimal_turns() -> Vec<ChatTurn> {
    vec![ChatTurn::user("Reply with the single word: OK")]
}

fn minimal_options() -> ChatOptions {
    ChatOptions {
        max_tokens: Some(8),
        ..Default::default()
    }
}

/// Map a non-retryable adapter error onto a probe report.
pub(crate) fn report_for_error(name: &'static str, err: &AdapterError) -> ProbeReport {
    match err {
        AdapterError::Unsupported(_) => ProbeReport::inapplicable(name),
        AdapterError::Timeout(_) | AdapterError::Network(_) => {
            ProbeReport::errored(name, err.kind())
        }
        _ => ProbeReport::fail(name, 0.0)
            .with_detail(err.to_string())
            .with_error_kind(err.kind()),
    }
}

/// Whether the engine should retry this probe call.
pub(crate) fn retryable(err: &AdapterError) -> bool {
    matches!(
        err,
        AdapterError::RateLimited { .. } | AdapterError::Overloaded
    )
}

/// Score mapping shared by the latency probe and the responsiveness axis:
/// 100 at ≤ 500 ms, 0 at ≥ 10 s, linear between.
pub fn latency_p95_score(p95_ms: f64) -> f64 {
    const FLOOR_MS: f64 = 500.0;
    const CEIL_MS: f64 = 10_000.0;
    if p95_ms <= FLOOR_MS {
        100.0
    } else if p95_ms >= CEIL_MS {
        0.0
    } else {
        100.0 * (CEIL_MS - p95_ms) / (CEIL_MS - FLOOR_MS)
    }
}

/// Does the model answer at all? `NotFound` means no; anything the
/// provider answers for counts as existing.
pub struct ExistenceProbe;

#[async_trait]
impl Probe for ExistenceProbe {
    fn name(&self) -> &'static str {
        "existence"
    }

    fn applicability(&self, _caps: &DeclaredCaps) -> bool {
        true
    }

    async fn run(&self, target: &ProbeTarget) -> AdapterResult<ProbeReport> {
        match target.chat(&minimal_turns(), &minimal_options()).await {
            Ok(outcome) => Ok(ProbeReport::pass(self.name(), 100.0)
                .with_evidence(&outcome.content)
                .with_latency(
                    outcome.first_token.map(|d| d.as_millis() as u64),
                    outcome.total.as_millis() as u64,
                )),
            Err(AdapterError::NotFound(detail)) => {
                Ok(ProbeReport::fail(self.name(), 0.0).with_detail(detail))
            }
            Err(e) if retryable(&e) => Err(e),
            Err(e) => Ok(report_for_error(self.name(), &e)),
        }
    }
}

/// Does the model answer promptly? Total time within 60 s passes; a
/// first token inside 10 s earns the full score.
pub struct ResponsivenessProbe;

pub(crate) fn evaluate_responsiveness(
    name: &'static str,
    first_token_ms: Option<u64>,
    total_ms: u64,
    content: &str,
) -> ProbeReport {
    if total_ms > RESPONSIVE_TOTAL_MS {
        return ProbeReport::fail(name, 0.0)
            .with_latency(first_token_ms, total_ms)
            .with_detail(format!("total {} ms exceeds {} ms", total_ms, RESPONSIVE_TOTAL_MS));
    }
    let effective_first = first_token_ms.unwrap_or(total_ms);
    let score = if effective_first <= RESPONSIVE_FIRST_TOKEN_MS {
        100.0
    } else {
        70.0
    };
    ProbeReport::pass(name, score)
        .with_evidence(content)
        .with_latency(first_token_ms, total_ms)
}

#[async_trait]
impl Probe for ResponsivenessProbe {
    fn name(&self) -> &'static str {
        "responsiveness"
    }

    fn applicability(&self, _caps: &DeclaredCaps) -> bool {
        true
    }

    async fn run(&self, target: &ProbeTarget) -> AdapterResult<ProbeReport> {
        match target.chat(&minimal_turns(), &minimal_options()).await {
            Ok(outcome) => Ok(evaluate_responsiveness(
                self.name(),
                outcome.first_token.map(|d| d.as_millis() as u64),
                outcome.total.as_millis() as u64,
                &outcome.content,
            )),
            // A timeout is the signal this probe measures.
            Err(AdapterError::Timeout(d)) => Ok(ProbeReport::fail(self.name(), 0.0)
                .with_detail(format!("timed out after {} ms", d.as_millis()))),
            Err(e) if retryable(&e) => Err(e),
            Err(e) => Ok(report_for_error(self.name(), &e)),
        }
    }
}

/// Latency distribution over repeated minimal calls; scored on p95.
pub struct LatencySampleProbe;

pub(crate) fn evaluate_latency(name: &'static str, samples_ms: &[u64]) -> ProbeReport {
    let stats = LatencyStats::from_samples(samples_ms);
    if stats.samples == 0 {
        return ProbeReport::errored(name, "no-samples");
    }
    let score = latency_p95_score(stats.p95_ms);
    let outcome = if score > 0.0 {
        ProbeReport::pass(name, score)
    } else {
        ProbeReport::fail(name, 0.0)
    };
    outcome
        .with_latency(None, stats.p95_ms as u64)
        .with_detail(format!(
            "mean={:.0}ms p95={:.0}ms stddev={:.0}ms n={}",
            stats.mean_ms, stats.p95_ms, stats.stddev_ms, stats.samples
        ))
}

#[async_trait]
impl Probe for LatencySampleProbe {
    fn name(&self) -> &'static str {
        "latency-sample"
    }

    fn applicability(&self, _caps: &DeclaredCaps) -> bool {
        true
    }

    async fn run(&self, target: &ProbeTarget) -> AdapterResult<ProbeReport> {
        let mut samples = Vec::with_capacity(LATENCY_SAMPLES);
        for _ in 0..LATENCY_SAMPLES {
            match target.chat(&minimal_turns(), &minimal_options()).await {
                Ok(outcome) => samples.push(outcome.total.as_millis() as u64),
                Err(e) if retryable(&e) => return Err(e),
                Err(e) => {
                    // Partial samples still yield a verdict; none at all
                    // surfaces the error.
                    if samples.is_empty() {
                        return Ok(report_for_error(self.name(), &e));
                    }
                    break;
                }
            }
        }
        Ok(evaluate_latency(self.name(), &samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::types::ProbeOutcome;

    #[test]
    fn test_latency_score_endpoints() {
        assert_eq!(latency_p95_score(100.0), 100.0);
        assert_eq!(latency_p95_score(500.0), 100.0);
        assert_eq!(latency_p95_score(10_000.0), 0.0);
        assert_eq!(latency_p95_score(30_000.0), 0.0);
        let mid = latency_p95_score(5250.0);
        assert!((mid - 50.0).abs() < 0.01, "got {}", mid);
    }

    #[test]
    fn test_latency_score_is_monotone() {
        let mut last = 101.0;
        for p95 in (0..12_000).step_by(500) {
            let score = latency_p95_score(p95 as f64);
            assert!(score <= last);
            last = score;
        }
    }

    #[test]
    fn test_responsiveness_bonus_rule() {
        let fast = evaluate_responsiveness("responsiveness", Some(800), 2_000, "OK");
        assert_eq!(fast.outcome, ProbeOutcome::Pass);
        assert_eq!(fast.score, Some(100.0));

        let slow_first = evaluate_responsiveness("responsiveness", Some(15_000), 20_000, "OK");
        assert_eq!(slow_first.outcome, ProbeOutcome::Pass);
        assert_eq!(slow_first.score, Some(70.0));

        let too_slow = evaluate_responsiveness("responsiveness", None, 61_000, "OK");
        assert_eq!(too_slow.outcome, ProbeOutcome::Fail);
    }

    #[test]
    fn test_evaluate_latency_reports_stats() {
        let report = evaluate_latency("latency-sample", &[200, 250, 300, 280, 260]);
        assert_eq!(report.outcome, ProbeOutcome::Pass);
        assert_eq!(report.score, Some(100.0));
        assert!(report.detail.as_deref().unwrap().contains("n=5"));
    }

    #[test]
    fn test_error_mapping() {
        let report = report_for_error("x", &AdapterError::unsupported("embed"));
        assert_eq!(report.outcome, ProbeOutcome::Inapplicable);

        let report = report_for_error("x", &AdapterError::Network("reset".into()));
        assert_eq!(report.outcome, ProbeOutcome::Errored);
        assert_eq!(report.error_kind.as_deref(), Some("network"));

        let report = report_for_error("x", &AdapterError::AuthFailed("denied".into()));
        assert_eq!(report.outcome, ProbeOutcome::Fail);
    }
}
