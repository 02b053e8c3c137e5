//! Probe verdict types and evidence capture.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Outcome of one probe in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Pass,
    Fail,
    /// The probe does not apply to this model; omitted from aggregation.
    Inapplicable,
    /// The adapter failed in a way that prevents a verdict.
    Errored,
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
            Self::Inapplicable => write!(f, "inapplicable"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// Bounded evidence kept from a response: hash plus a short excerpt.
/// Full responses are never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    /// SHA-256 of the full canonicalised response.
    pub sha256: String,
    /// First bytes of the response, capped at [`Evidence::MAX_EXCERPT`].
    pub excerpt: String,
}

impl Evidence {
    pub const MAX_EXCERPT: usize = 512;

    pub fn capture(response: &str) -> Self {
        let mut end = response.len().min(Self::MAX_EXCERPT);
        while !response.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            sha256: hex::encode(Sha256::digest(response.as_bytes())),
            excerpt: response[..end].to_string(),
        }
    }
}

/// Verdict of one probe in one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub probe: String,
    pub outcome: ProbeOutcome,
    /// Numeric score in [0, 100]. Only meaningful for pass/fail.
    pub score: Option<f64>,
    pub first_token_ms: Option<u64>,
    pub total_ms: Option<u64>,
    pub evidence: Option<Evidence>,
    /// Stable adapter error kind when outcome is errored.
    pub error_kind: Option<String>,
    /// Short human detail (rubric notes, sub-probe tallies).
    pub detail: Option<String>,
}

impl ProbeReport {
    pub fn pass(probe: impl Into<String>, score: f64) -> Self {
        Self {
            probe: probe.into(),
            outcome: ProbeOutcome::Pass,
            score: Some(score.clamp(0.0, 100.0)),
            first_token_ms: None,
            total_ms: None,
            evidence: None,
            error_kind: None,
            detail: None,
        }
    }

    pub fn fail(probe: impl Into<String>, score: f64) -> Self {
        Self {
            probe: probe.into(),
            outcome: ProbeOutcome::Fail,
            score: Some(score.clamp(0.0, 100.0)),
            first_token_ms: None,
            total_ms: None,
            evidence: None,
            error_kind: None,
            detail: None,
        }
    }

    pub fn inapplicable(probe: impl Into<String>) -> Self {
        Self {
            probe: probe.into(),
            outcome: ProbeOutcome::Inapplicable,
            score: None,
            first_token_ms: None,
            total_ms: None,
            evidence: None,
            error_kind: None,
            detail: None,
        }
    }

    pub fn errored(probe: impl Into<String>, error_kind: impl Into<String>) -> Self {
        Self {
            probe: probe.into(),
            outcome: ProbeOutcome::Errored,
            score: None,
            first_token_ms: None,
            total_ms: None,
            evidence: None,
            error_kind: Some(error_kind.into()),
            detail: None,
        }
    }

    pub fn with_evidence(mut self, response: &str) -> Self {
        self.evidence = Some(Evidence::capture(response));
        self
    }

    pub fn with_latency(mut self, first_token_ms: Option<u64>, total_ms: u64) -> Self {
        self.first_token_ms = first_token_ms;
        self.total_ms = Some(total_ms);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_error_kind(mut self, kind: impl Into<String>) -> Self {
        self.error_kind = Some(kind.into());
        self
    }

    pub fn passed(&self) -> bool {
        self.outcome == ProbeOutcome::Pass
    }
}

/// Aggregate latency statistics from repeated samples, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub mean_ms: f64,
    pub p95_ms: f64,
    pub stddev_ms: f64,
    pub samples: usize,
}

impl LatencyStats {
    /// Compute stats over raw millisecond samples. Empty input yields the
    /// zero value with `samples == 0`.
    pub fn from_samples(samples_ms: &[u64]) -> Self {
        if samples_ms.is_empty() {
            return Self::default();
        }
        let n = samples_ms.len();
        let mean = samples_ms.iter().sum::<u64>() as f64 / n as f64;
        let variance = samples_ms
            .iter()
            .map(|&s| {
                let d = s as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n as f64;

        let mut sorted = samples_ms.to_vec();
        sorted.sort_unstable();
        // Nearest-rank p95.
        let rank = ((0.95 * n as f64).ceil() as usize).clamp(1, n);
        let p95 = sorted[rank - 1] as f64;

        Self {
            mean_ms: mean,
            p95_ms: p95,
            stddev_ms: variance.sqrt(),
            samples: n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evidence_excerpt_is_bounded() {
        let long = "a".repeat(2000);
        let evidence = Evidence::capture(&long);
        assert_eq!(evidence.excerpt.len(), Evidence::MAX_EXCERPT);
        assert_eq!(evidence.sha256.len(), 64);
    }

    #[test]
    fn test_evidence_respects_char_boundaries() {
        let text = "é".repeat(400); // 2 bytes each, boundary at 512 is mid-char
        let evidence = Evidence::capture(&text);
        assert!(evidence.excerpt.len() <= Evidence::MAX_EXCERPT);
        assert!(text.starts_with(&evidence.excerpt));
    }

    #[test]
    fn test_evidence_is_deterministic() {
        let a = Evidence::capture("same bytes");
        let b = Evidence::capture("same bytes");
        assert_eq!(a, b);
    }

    #[test]
    fn test_score_is_clamped() {
        assert_eq!(ProbeReport::pass("p", 150.0).score, Some(100.0));
        assert_eq!(ProbeReport::fail("p", -3.0).score, Some(0.0));
    }

    #[test]
    fn test_latency_stats() {
        let stats = LatencyStats::from_samples(&[100, 200, 300, 400, 500]);
        assert_eq!(stats.mean_ms, 300.0);
        assert_eq!(stats.p95_ms, 500.0);
        assert_eq!(stats.samples, 5);
        assert!(stats.stddev_ms > 140.0 && stats.stddev_ms < 142.0);
    }

    #[test]
    fn test_latency_stats_empty() {
        assert_eq!(LatencyStats::from_samples(&[]).samples, 0);
    }
}
