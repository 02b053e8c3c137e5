//! Composite scoring and classification.
//!
//! Weights are fixed, tuned to favour reliability for coding use. All
//! functions here are pure over the run's verdicts and observations, so
//! canned responses pin exact scores in tests.

use chrono::{Datelike, NaiveDate, Utc};
use std::collections::BTreeSet;

use crate::adapter::DeclaredCaps;
use crate::catalog::{feature_bits, AxisScores, Classification, PricingSample};
use crate::probe::{ProbeOutcome, ProbeReport};

// Axis weights; must sum to 1.
pub const WEIGHT_CODING: f64 = 0.30;
pub const WEIGHT_RESPONSIVENESS: f64 = 0.20;
pub const WEIGHT_RELIABILITY: f64 = 0.20;
pub const WEIGHT_FEATURES: f64 = 0.15;
pub const WEIGHT_COST: f64 = 0.10;
pub const WEIGHT_RECENCY: f64 = 0.05;

/// Neutral axis value when the input is unknown.
const NEUTRAL: f64 = 50.0;

// Cost axis bounds, USD per million tokens (input + output combined).
const COST_FLOOR: f64 = 1.0;
const COST_CEIL: f64 = 60.0;

// Recency axis bounds, months since release.
const RECENT_MONTHS: f64 = 6.0;
const STALE_MONTHS: f64 = 36.0;

/// Everything scoring derives from one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreComputation {
    pub axes: AxisScores,
    pub overall: u8,
    pub classifications: BTreeSet<Classification>,
    pub features: u16,
}

fn probe_score(verdicts: &[ProbeReport], name: &str) -> f64 {
    verdicts
        .iter()
        .find(|v| v.probe == name)
        .and_then(|v| match v.outcome {
            ProbeOutcome::Pass | ProbeOutcome::Fail => v.score,
            _ => None,
        })
        .unwrap_or(0.0)
}

fn probe_passed(verdicts: &[ProbeReport], name: &str) -> bool {
    verdicts
        .iter()
        .any(|v| v.probe == name && v.outcome == ProbeOutcome::Pass)
}

/// Fraction of applicable probes that passed, ignoring inapplicable ones.
/// Errored probes count against reliability: they were applicable and
/// produced no pass.
pub fn reliability_score(verdicts: &[ProbeReport]) -> f64 {
    let applicable = verdicts
        .iter()
        .filter(|v| v.outcome != ProbeOutcome::Inapplicable)
        .count();
    if applicable == 0 {
        return 0.0;
    }
    let passed = verdicts
        .iter()
        .filter(|v| v.outcome == ProbeOutcome::Pass)
        .count();
    passed as f64 / applicable as f64 * 100.0
}

/// Feature bitmap from probe passes.
pub fn feature_bitmap(verdicts: &[ProbeReport]) -> u16 {
    let table = [
        ("streaming", feature_bits::STREAMING),
        ("function-calling", feature_bits::TOOLS),
        ("vision", feature_bits::VISION),
        ("embeddings", feature_bits::EMBEDDINGS),
        ("acp-comprehension", feature_bits::ACP),
        ("mcp-comprehension", feature_bits::MCP),
        ("lsp-comprehension", feature_bits::LSP),
        ("reranking", feature_bits::RERANK),
        ("generation-image", feature_bits::GEN_IMAGE),
        ("generation-audio", feature_bits::GEN_AUDIO),
        ("generation-video", feature_bits::GEN_VIDEO),
    ];
    table
        .iter()
        .filter(|(probe, _)| probe_passed(verdicts, probe))
        .fold(0u16, |bitmap, (_, bit)| bitmap | bit)
}

fn feature_richness(features: u16) -> f64 {
    let supported = feature_bits::HIGH_VALUE
        .iter()
        .filter(|&&bit| features & bit != 0)
        .count();
    supported as f64 / feature_bits::HIGH_VALUE.len() as f64 * 100.0
}

/// Monotone decreasing in combined per-token price. Missing pricing is
/// neutral.
pub fn cost_score(pricing: Option<&PricingSample>) -> f64 {
    let Some(pricing) = pricing else {
        return NEUTRAL;
    };
    let combined = pricing.input_per_mtok + pricing.output_per_mtok;
    if combined <= COST_FLOOR {
        100.0
    } else if combined >= COST_CEIL {
        0.0
    } else {
        100.0 * (COST_CEIL - combined) / (COST_CEIL - COST_FLOOR)
    }
}

/// Monotone in declared release date. Missing dates are neutral.
pub fn recency_score(release_date: Option<NaiveDate>) -> f64 {
    let Some(date) = release_date else {
        return NEUTRAL;
    };
    let today = Utc::now().date_naive();
    let months = (today.year() - date.year()) as f64 * 12.0
        + (today.month() as f64 - date.month() as f64);
    if months <= RECENT_MONTHS {
        100.0
    } else if months >= STALE_MONTHS {
        0.0
    } else {
        100.0 * (STALE_MONTHS - months) / (STALE_MONTHS - RECENT_MONTHS)
    }
}

/// Compute axes, overall, classifications and the feature bitmap from a
/// run's verdicts and observations.
pub fn score_run(
    verdicts: &[ProbeReport],
    pricing: Option<&PricingSample>,
    release_date: Option<NaiveDate>,
    caps: &DeclaredCaps,
) -> ScoreComputation {
    let features = feature_bitmap(verdicts);
    let axes = AxisScores {
        coding: probe_score(verdicts, "coding-task"),
        responsiveness: probe_score(verdicts, "latency-sample"),
        reliability: reliability_score(verdicts),
        feature_richness: feature_richness(features),
        cost_effectiveness: cost_score(pricing),
        recency: recency_score(release_date),
    }
    .rounded();

    let overall = (axes.coding * WEIGHT_CODING
        + axes.responsiveness * WEIGHT_RESPONSIVENESS
        + axes.reliability * WEIGHT_RELIABILITY
        + axes.feature_richness * WEIGHT_FEATURES
        + axes.cost_effectiveness * WEIGHT_COST
        + axes.recency * WEIGHT_RECENCY)
        .round()
        .clamp(0.0, 100.0) as u8;

    let mut classifications = BTreeSet::new();
    if probe_passed(verdicts, "existence") {
        classifications.insert(Classification::Chat);
    }
    if probe_passed(verdicts, "function-calling") {
        classifications.insert(Classification::Tools);
    }
    if axes.coding >= 60.0 && axes.reliability >= 70.0 {
        classifications.insert(Classification::Coding);
    }
    if caps.reasoning == Some(true) || axes.coding >= 85.0 {
        classifications.insert(Classification::Reasoning);
    }
    if probe_passed(verdicts, "vision") {
        classifications.insert(Classification::Vision);
    }
    if probe_passed(verdicts, "embeddings") {
        classifications.insert(Classification::Embeddings);
    }
    if probe_passed(verdicts, "generation-image") {
        classifications.insert(Classification::GenerativeImage);
    }
    if probe_passed(verdicts, "generation-audio") {
        classifications.insert(Classification::GenerativeAudio);
    }
    if probe_passed(verdicts, "generation-video") {
        classifications.insert(Classification::GenerativeVideo);
    }

    ScoreComputation {
        axes,
        overall,
        classifications,
        features,
    }
}

/// Axis names that differ between two snapshots at surfaced precision.
pub fn changed_axes(previous: &AxisScores, new: &AxisScores) -> Vec<&'static str> {
    let pairs = [
        ("coding", previous.coding, new.coding),
        ("responsiveness", previous.responsiveness, new.responsiveness),
        ("reliability", previous.reliability, new.reliability),
        (
            "feature_richness",
            previous.feature_richness,
            new.feature_richness,
        ),
        (
            "cost_effectiveness",
            previous.cost_effectiveness,
            new.cost_effectiveness,
        ),
        ("recency", previous.recency, new.recency),
    ];
    pairs
        .iter()
        .filter(|(_, a, b)| (a - b).abs() >= 0.05)
        .map(|(name, _, _)| *name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn verdicts_all_pass() -> Vec<ProbeReport> {
        vec![
            ProbeReport::pass("existence", 100.0),
            ProbeReport::pass("responsiveness", 100.0),
            ProbeReport::pass("latency-sample", 90.0),
            ProbeReport::pass("streaming", 100.0),
            ProbeReport::pass("function-calling", 100.0),
            ProbeReport::pass("vision", 100.0),
            ProbeReport::pass("embeddings", 100.0),
            ProbeReport::pass("mcp-comprehension", 100.0),
            ProbeReport::pass("lsp-comprehension", 100.0),
            ProbeReport::pass("acp-comprehension", 80.0),
            ProbeReport::inapplicable("generation-image"),
            ProbeReport::inapplicable("generation-audio"),
            ProbeReport::inapplicable("generation-video"),
            ProbeReport::inapplicable("reranking"),
            ProbeReport::pass("coding-task", 85.0),
        ]
    }

    #[test]
    fn test_weights_sum_to_one() {
        let total = WEIGHT_CODING
            + WEIGHT_RESPONSIVENESS
            + WEIGHT_RELIABILITY
            + WEIGHT_FEATURES
            + WEIGHT_COST
            + WEIGHT_RECENCY;
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_reliability_ignores_inapplicable() {
        let verdicts = vec![
            ProbeReport::pass("a", 100.0),
            ProbeReport::fail("b", 0.0),
            ProbeReport::inapplicable("c"),
            ProbeReport::errored("d", "network"),
        ];
        // 1 pass of 3 applicable.
        let score = reliability_score(&verdicts);
        assert!((score - 33.333).abs() < 0.01);
    }

    #[test]
    fn test_feature_bitmap_and_richness() {
        let verdicts = verdicts_all_pass();
        let bitmap = feature_bitmap(&verdicts);
        assert_ne!(bitmap & feature_bits::STREAMING, 0);
        assert_ne!(bitmap & feature_bits::MCP, 0);
        assert_eq!(bitmap & feature_bits::RERANK, 0);
        // All seven high-value features present.
        assert_eq!(feature_richness(bitmap), 100.0);
    }

    #[test]
    fn test_cost_score_bounds() {
        assert_eq!(cost_score(None), 50.0);
        let cheap = PricingSample {
            input_per_mtok: 0.15,
            output_per_mtok: 0.6,
            cached_read_per_mtok: None,
            effective_at: Utc::now(),
        };
        assert_eq!(cost_score(Some(&cheap)), 100.0);
        let pricey = PricingSample {
            input_per_mtok: 15.0,
            output_per_mtok: 75.0,
            cached_read_per_mtok: None,
            effective_at: Utc::now(),
        };
        assert_eq!(cost_score(Some(&pricey)), 0.0);
    }

    #[test]
    fn test_recency_score() {
        assert_eq!(recency_score(None), 50.0);
        let fresh = (Utc::now() - Duration::days(30)).date_naive();
        assert_eq!(recency_score(Some(fresh)), 100.0);
        let ancient = (Utc::now() - Duration::days(4 * 365)).date_naive();
        assert_eq!(recency_score(Some(ancient)), 0.0);
    }

    #[test]
    fn test_score_run_classifications() {
        let computation = score_run(
            &verdicts_all_pass(),
            None,
            None,
            &DeclaredCaps::default(),
        );
        assert!(computation.classifications.contains(&Classification::Chat));
        assert!(computation.classifications.contains(&Classification::Tools));
        assert!(computation.classifications.contains(&Classification::Coding));
        // coding 85 ⇒ reasoning without a declared capability.
        assert!(computation
            .classifications
            .contains(&Classification::Reasoning));
        assert!(computation.classifications.contains(&Classification::Vision));
        assert!(computation
            .classifications
            .contains(&Classification::Embeddings));
    }

    #[test]
    fn test_coding_classification_needs_reliability() {
        let verdicts = vec![
            ProbeReport::pass("coding-task", 90.0),
            ProbeReport::fail("existence", 0.0),
            ProbeReport::fail("streaming", 0.0),
            ProbeReport::fail("vision", 0.0),
        ];
        let computation = score_run(&verdicts, None, None, &DeclaredCaps::default());
        // Reliability 25% < 70 blocks the coding classification.
        assert!(!computation.classifications.contains(&Classification::Coding));
    }

    #[test]
    fn test_score_run_is_deterministic() {
        let verdicts = verdicts_all_pass();
        let a = score_run(&verdicts, None, None, &DeclaredCaps::default());
        let b = score_run(&verdicts, None, None, &DeclaredCaps::default());
        assert_eq!(a, b);
    }

    #[test]
    fn test_overall_is_weighted_sum() {
        let computation = score_run(&verdicts_all_pass(), None, None, &DeclaredCaps::default());
        let axes = computation.axes;
        let expected = (axes.coding * WEIGHT_CODING
            + axes.responsiveness * WEIGHT_RESPONSIVENESS
            + axes.reliability * WEIGHT_RELIABILITY
            + axes.feature_richness * WEIGHT_FEATURES
            + axes.cost_effectiveness * WEIGHT_COST
            + axes.recency * WEIGHT_RECENCY)
            .round() as u8;
        assert_eq!(computation.overall, expected);
    }

    #[test]
    fn test_changed_axes() {
        let a = AxisScores {
            coding: 80.0,
            responsiveness: 90.0,
            ..Default::default()
        };
        let b = AxisScores {
            coding: 80.0,
            responsiveness: 60.0,
            ..Default::default()
        };
        assert_eq!(changed_axes(&a, &b), vec!["responsiveness"]);
        assert!(changed_axes(&a, &a).is_empty());
    }
}
