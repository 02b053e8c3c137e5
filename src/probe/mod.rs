//! Probe suite.
//!
//! A probe is one named test of a model capability: an applicability rule,
//! a request builder, and a deterministic evaluator. Evaluators are pure
//! functions over canonicalised responses (rule-based only, never a
//! second LLM call) so tests can pin expected scores exactly.

mod coding;
mod core;
mod features;
mod protocol;
mod types;

pub use coding::{CodingProbe, RUBRIC_DOCSTRING_WEIGHT, RUBRIC_ERROR_HANDLING_WEIGHT,
    RUBRIC_FENCE_WEIGHT, RUBRIC_FORBIDDEN_WEIGHT, RUBRIC_NAME_WEIGHT, RUBRIC_PARSE_WEIGHT,
    RUBRIC_TYPE_HINTS_WEIGHT};
pub use self::core::{ExistenceProbe, LatencySampleProbe, ResponsivenessProbe, LATENCY_SAMPLES};
pub use features::{
    EmbeddingsProbe, FunctionCallingProbe, GenerationProbe, RerankProbe, StreamingProbe,
    VisionProbe,
};
pub use protocol::{AcpProbe, JsonRpcProbe};
pub use types::{Evidence, LatencyStats, ProbeOutcome, ProbeReport};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::adapter::{
    ArtifactDescriptor, ArtifactKind, ChatOptions, ChatOutcome, ChatTurn, DeclaredCaps,
    EmbeddingOutcome, ProviderAdapter, ProviderEndpoint, RateLimitHints, RerankScore, StreamItem,
    TokenUsage,
};
use crate::error::AdapterResult;
use crate::governor::RateGovernor;

/// Version of the probe set. Embedded in every verification run so scores
/// remain comparable only within one suite generation.
pub const SUITE_VERSION: u32 = 1;

/// Everything a probe needs to exercise one (provider, model) target.
///
/// All adapter I/O goes through this façade: each call is admitted by the
/// rate governor first, and its outcome is fed back so retry-after and
/// overload back-off are honoured. The latest rate-limit hints and token
/// usage are accumulated for the run record.
pub struct ProbeTarget {
    pub provider_id: String,
    pub model: String,
    pub caps: DeclaredCaps,
    endpoint: ProviderEndpoint,
    adapter: Arc<dyn ProviderAdapter>,
    governor: Arc<RateGovernor>,
    observed: std::sync::Mutex<Observed>,
}

#[derive(Default)]
struct Observed {
    hints: RateLimitHints,
    usage: TokenUsage,
}

impl ProbeTarget {
    pub fn new(
        provider_id: impl Into<String>,
        model: impl Into<String>,
        caps: DeclaredCaps,
        endpoint: ProviderEndpoint,
        adapter: Arc<dyn ProviderAdapter>,
        governor: Arc<RateGovernor>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            model: model.into(),
            caps,
            endpoint,
            adapter,
            governor,
            observed: std::sync::Mutex::new(Observed::default()),
        }
    }

    fn note_hints(&self, hints: &RateLimitHints) {
        if hints.is_empty() {
            return;
        }
        let mut observed = self.observed.lock().unwrap_or_else(|e| e.into_inner());
        observed.hints = hints.clone();
    }

    fn note_usage(&self, usage: Option<TokenUsage>) {
        if let Some(usage) = usage {
            let mut observed = self.observed.lock().unwrap_or_else(|e| e.into_inner());
            observed.usage.add(usage);
        }
    }

    /// Latest rate-limit hints observed on this target.
    pub fn observed_hints(&self) -> RateLimitHints {
        self.observed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .hints
            .clone()
    }

    /// Accumulated token usage across all probe calls.
    pub fn observed_usage(&self) -> TokenUsage {
        self.observed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .usage
    }

    pub async fn chat(
        &self,
        turns: &[ChatTurn],
        options: &ChatOptions,
    ) -> AdapterResult<ChatOutcome> {
        let _permit = self.governor.admit(&self.provider_id).await;
        let result = self
            .adapter
            .chat(&self.endpoint, &self.model, turns, options)
            .await;
        self.governor.observe(&self.provider_id, &result);
        if let Ok(outcome) = &result {
            self.note_hints(&outcome.hints);
            self.note_usage(outcome.usage);
        }
        result
    }

    pub async fn chat_stream(
        &self,
        turns: &[ChatTurn],
        options: &ChatOptions,
    ) -> AdapterResult<mpsc::Receiver<StreamItem>> {
        let _permit = self.governor.admit(&self.provider_id).await;
        let result = self
            .adapter
            .chat_stream(&self.endpoint, &self.model, turns, options)
            .await;
        self.governor.observe(&self.provider_id, &result);
        result
    }

    pub async fn embed(&self, texts: &[String]) -> AdapterResult<EmbeddingOutcome> {
        let _permit = self.governor.admit(&self.provider_id).await;
        let result = self.adapter.embed(&self.endpoint, &self.model, texts).await;
        self.governor.observe(&self.provider_id, &result);
        if let Ok(outcome) = &result {
            self.note_hints(&outcome.hints);
            self.note_usage(outcome.usage);
        }
        result
    }

    pub async fn generate(
        &self,
        kind: ArtifactKind,
        prompt: &str,
    ) -> AdapterResult<ArtifactDescriptor> {
        let _permit = self.governor.admit(&self.provider_id).await;
        let result = self
            .adapter
            .generate(&self.endpoint, &self.model, kind, prompt)
            .await;
        self.governor.observe(&self.provider_id, &result);
        result
    }

    pub async fn rerank(
        &self,
        query: &str,
        candidates: &[String],
    ) -> AdapterResult<Vec<RerankScore>> {
        let _permit = self.governor.admit(&self.provider_id).await;
        let result = self
            .adapter
            .rerank(&self.endpoint, &self.model, query, candidates)
            .await;
        self.governor.observe(&self.provider_id, &result);
        result
    }
}

/// One named test of a model capability.
///
/// `run` returns `Err` only for transient adapter failures, so the engine
/// can apply its retry policy; permanent failures are folded into the
/// returned report (fail / inapplicable / errored).
#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this probe applies to a model with the given declared
    /// capabilities.
    fn applicability(&self, caps: &DeclaredCaps) -> bool;

    async fn run(&self, target: &ProbeTarget) -> AdapterResult<ProbeReport>;
}

/// The standard suite, split by execution phase.
pub struct ProbeSuite {
    /// Sequential gating prefix, in order.
    pub gating: Vec<Arc<dyn Probe>>,
    /// Feature probes; run concurrently up to the engine's fan-out cap.
    pub features: Vec<Arc<dyn Probe>>,
    /// Closing probes, after the feature phase.
    pub closing: Vec<Arc<dyn Probe>>,
}

impl ProbeSuite {
    pub fn standard() -> Self {
        Self {
            gating: vec![
                Arc::new(ExistenceProbe),
                Arc::new(ResponsivenessProbe),
                Arc::new(LatencySampleProbe),
            ],
            features: vec![
                Arc::new(StreamingProbe),
                Arc::new(FunctionCallingProbe),
                Arc::new(VisionProbe),
                Arc::new(EmbeddingsProbe),
                Arc::new(JsonRpcProbe::mcp()),
                Arc::new(JsonRpcProbe::lsp()),
                Arc::new(AcpProbe),
                Arc::new(GenerationProbe::new(ArtifactKind::Image)),
                Arc::new(GenerationProbe::new(ArtifactKind::Audio)),
                Arc::new(GenerationProbe::new(ArtifactKind::Video)),
                Arc::new(RerankProbe),
            ],
            closing: vec![Arc::new(CodingProbe)],
        }
    }

    /// All probe names in execution order. A run's verdict set is exactly
    /// this list for the suite version it was recorded under.
    pub fn probe_names(&self) -> Vec<&'static str> {
        self.gating
            .iter()
            .chain(&self.features)
            .chain(&self.closing)
            .map(|p| p.name())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.gating.len() + self.features.len() + self.closing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_suite_shape() {
        let suite = ProbeSuite::standard();
        let names = suite.probe_names();
        assert_eq!(names[0], "existence");
        assert_eq!(names[1], "responsiveness");
        assert_eq!(names[2], "latency-sample");
        assert_eq!(*names.last().unwrap(), "coding-task");
        assert_eq!(names.len(), suite.len());
        // The mandatory probe set.
        for expected in [
            "existence",
            "responsiveness",
            "latency-sample",
            "streaming",
            "function-calling",
            "vision",
            "embeddings",
            "mcp-comprehension",
            "lsp-comprehension",
            "acp-comprehension",
            "coding-task",
            "generation-image",
            "generation-audio",
            "generation-video",
            "reranking",
        ] {
            assert!(names.contains(&expected), "missing probe {}", expected);
        }
    }

    #[test]
    fn test_no_duplicate_probe_names() {
        let suite = ProbeSuite::standard();
        let mut names = suite.probe_names();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
    }
}
