//! Catalog entities: providers, models, runs, snapshots, samples, issues.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::adapter::{AdapterKind, DeclaredCaps, RateLimitHints, TokenUsage};
use crate::probe::ProbeReport;

/// Generate an opaque stable identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// How models are discovered for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryMode {
    /// `list_models` endpoint only.
    Endpoint,
    /// Statically configured list only.
    Static,
    /// Endpoint results merged with the static list.
    Both,
}

/// A configured provider endpoint.
#[derive(Debug, Clone)]
pub struct ProviderRecord {
    pub id: String,
    pub name: String,
    pub base_url: String,
    /// Decrypted only inside the process; sealed in the store.
    pub auth_secret: String,
    pub kind: AdapterKind,
    pub discovery: DiscoveryMode,
    pub static_models: Vec<String>,
    pub declared_rpm: Option<u32>,
    pub declared_burst: Option<u32>,
    pub max_concurrency: Option<usize>,
    pub created_at: DateTime<Utc>,
}

/// A (provider, vendor model id) pair in the catalog.
#[derive(Debug, Clone)]
pub struct ModelRecord {
    pub id: String,
    pub provider_id: String,
    pub vendor_id: String,
    pub display_name: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub withdrawn: bool,
    pub caps: DeclaredCaps,
    pub release_date: Option<NaiveDate>,
    /// Enrichment payload, free-form.
    pub metadata: Option<serde_json::Value>,
}

/// What triggered a verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Manual,
    Scheduled { job_id: String },
    OnDemand,
}

impl RunTrigger {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled { .. } => "scheduled",
            Self::OnDemand => "on-demand",
        }
    }
}

/// One complete verification pass against one model.
#[derive(Debug, Clone)]
pub struct VerificationRun {
    pub id: String,
    pub model_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub trigger: RunTrigger,
    pub suite_version: u32,
    pub verdicts: Vec<ProbeReport>,
    pub usage: TokenUsage,
    pub limit_hints: RateLimitHints,
    pub pricing: Option<PricingSample>,
}

/// Usage category memberships; a set, not exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    Chat,
    Tools,
    Coding,
    Vision,
    Reasoning,
    Embeddings,
    GenerativeImage,
    GenerativeAudio,
    GenerativeVideo,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Tools => "tools",
            Self::Coding => "coding",
            Self::Vision => "vision",
            Self::Reasoning => "reasoning",
            Self::Embeddings => "embeddings",
            Self::GenerativeImage => "generative-image",
            Self::GenerativeAudio => "generative-audio",
            Self::GenerativeVideo => "generative-video",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "chat" => Self::Chat,
            "tools" => Self::Tools,
            "coding" => Self::Coding,
            "vision" => Self::Vision,
            "reasoning" => Self::Reasoning,
            "embeddings" => Self::Embeddings,
            "generative-image" => Self::GenerativeImage,
            "generative-audio" => Self::GenerativeAudio,
            "generative-video" => Self::GenerativeVideo,
            _ => return None,
        })
    }
}

/// Supported-feature bitmap. Bits are part of the stored format; append
/// only.
pub mod feature_bits {
    pub const STREAMING: u16 = 1 << 0;
    pub const TOOLS: u16 = 1 << 1;
    pub const VISION: u16 = 1 << 2;
    pub const EMBEDDINGS: u16 = 1 << 3;
    pub const ACP: u16 = 1 << 4;
    pub const MCP: u16 = 1 << 5;
    pub const LSP: u16 = 1 << 6;
    pub const RERANK: u16 = 1 << 7;
    pub const GEN_IMAGE: u16 = 1 << 8;
    pub const GEN_AUDIO: u16 = 1 << 9;
    pub const GEN_VIDEO: u16 = 1 << 10;

    /// The seven features counted by the feature-richness axis.
    pub const HIGH_VALUE: [u16; 7] = [STREAMING, TOOLS, VISION, EMBEDDINGS, ACP, MCP, LSP];

    pub fn names(bitmap: u16) -> Vec<&'static str> {
        let table = [
            (STREAMING, "streaming"),
            (TOOLS, "tools"),
            (VISION, "vision"),
            (EMBEDDINGS, "embeddings"),
            (ACP, "acp"),
            (MCP, "mcp"),
            (LSP, "lsp"),
            (RERANK, "rerank"),
            (GEN_IMAGE, "generation-image"),
            (GEN_AUDIO, "generation-audio"),
            (GEN_VIDEO, "generation-video"),
        ];
        table
            .iter()
            .filter(|(bit, _)| bitmap & bit != 0)
            .map(|(_, name)| *name)
            .collect()
    }
}

/// Per-axis sub-scores, each in [0, 100].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisScores {
    pub coding: f64,
    pub responsiveness: f64,
    pub reliability: f64,
    pub feature_richness: f64,
    pub cost_effectiveness: f64,
    pub recency: f64,
}

impl AxisScores {
    /// Round every axis to one decimal place, the surfaced precision.
    pub fn rounded(self) -> Self {
        let r = |v: f64| (v * 10.0).round() / 10.0;
        Self {
            coding: r(self.coding),
            responsiveness: r(self.responsiveness),
            reliability: r(self.reliability),
            feature_richness: r(self.feature_richness),
            cost_effectiveness: r(self.cost_effectiveness),
            recency: r(self.recency),
        }
    }
}

/// The registry's current view of a model, derived from its latest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub model_id: String,
    pub source_run_id: String,
    /// Overall usability, surfaced as an integer.
    pub overall: u8,
    pub axes: AxisScores,
    pub classifications: BTreeSet<Classification>,
    pub features: u16,
    pub updated_at: DateTime<Utc>,
}

/// A timestamped pricing observation, USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingSample {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
    pub cached_read_per_mtok: Option<f64>,
    pub effective_at: DateTime<Utc>,
}

/// A timestamped rate-limit observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitSnapshot {
    pub declared_rpm: Option<u32>,
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
    pub observed_at: DateTime<Utc>,
}

/// Issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "info" => Self::Info,
            "warning" => Self::Warning,
            "error" => Self::Error,
            "fatal" => Self::Fatal,
            _ => return None,
        })
    }
}

/// What an issue is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum IssueSubject {
    Provider(String),
    Model(String),
}

impl IssueSubject {
    pub fn id(&self) -> &str {
        match self {
            Self::Provider(id) | Self::Model(id) => id,
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Provider(_) => "provider",
            Self::Model(_) => "model",
        }
    }
}

/// A recorded fault with a model or provider. Reopened on recurrence
/// after close; never silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub subject: IssueSubject,
    pub severity: Severity,
    /// Stable machine kind, e.g. `degradation`, `auth-failed`, `overflow`.
    pub kind: String,
    pub description: String,
    pub workaround: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub open: bool,
}

impl Issue {
    pub fn new(
        subject: IssueSubject,
        severity: Severity,
        kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            subject,
            severity,
            kind: kind.into(),
            description: description.into(),
            workaround: None,
            first_seen_at: now,
            last_seen_at: now,
            open: true,
        }
    }

    pub fn with_workaround(mut self, workaround: impl Into<String>) -> Self {
        self.workaround = Some(workaround.into());
        self
    }
}

/// Which targets a scheduled job covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "ids")]
pub enum TargetSelector {
    All,
    ProviderSet(Vec<String>),
    ModelSet(Vec<String>),
}

/// What happens when a job fires while its previous firing still runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlapPolicy {
    SkipIfRunning,
    Queue,
}

impl Default for OverlapPolicy {
    fn default() -> Self {
        Self::SkipIfRunning
    }
}

/// A persisted scheduler job. The cadence is kept in its textual form;
/// the scheduler owns parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub name: String,
    pub selector: TargetSelector,
    pub cadence: String,
    pub overlap: OverlapPolicy,
    pub paused: bool,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// A durable notifier binding: a configured outbound delivery target the
/// event bus treats as a permanent subscription equivalent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableBinding {
    pub id: String,
    pub name: String,
    /// Event-kind filter; empty means all kinds.
    pub kinds: Vec<String>,
    pub providers: Vec<String>,
    pub models: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Serialise a classification set into the stored wrapped-comma form,
/// e.g. `,chat,coding,`; LIKE-filterable and deterministic.
pub fn classifications_to_text(set: &BTreeSet<Classification>) -> String {
    if set.is_empty() {
        return String::new();
    }
    let mut text = String::from(",");
    for c in set {
        text.push_str(c.as_str());
        text.push(',');
    }
    text
}

pub fn classifications_from_text(text: &str) -> BTreeSet<Classification> {
    text.split(',')
        .filter(|s| !s.is_empty())
        .filter_map(Classification::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_text_roundtrip() {
        let mut set = BTreeSet::new();
        set.insert(Classification::Coding);
        set.insert(Classification::Chat);
        let text = classifications_to_text(&set);
        assert_eq!(text, ",chat,coding,");
        assert_eq!(classifications_from_text(&text), set);
    }

    #[test]
    fn test_empty_classifications() {
        assert_eq!(classifications_to_text(&BTreeSet::new()), "");
        assert!(classifications_from_text("").is_empty());
    }

    #[test]
    fn test_feature_bit_names() {
        let bitmap = feature_bits::STREAMING | feature_bits::MCP;
        let names = feature_bits::names(bitmap);
        assert_eq!(names, vec!["streaming", "mcp"]);
    }

    #[test]
    fn test_axis_rounding() {
        let axes = AxisScores {
            coding: 66.666,
            responsiveness: 99.99,
            ..Default::default()
        };
        let rounded = axes.rounded();
        assert_eq!(rounded.coding, 66.7);
        assert_eq!(rounded.responsiveness, 100.0);
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(new_id(), new_id());
    }
}
