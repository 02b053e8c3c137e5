//! Feature probes: streaming, tool calling, vision, embeddings, artifact
//! generation, reranking.

use async_trait::async_trait;
use serde_json::json;

use crate::adapter::{
    ArtifactDescriptor, ArtifactKind, ChatOptions, ChatTurn, DeclaredCaps, ImageAttachment,
    RerankScore, StreamItem, ToolDecl,
};
use crate::error::{AdapterError, AdapterResult};

use super::core::{report_for_error, retryable};
use super::types::ProbeReport;
use super::{Probe, ProbeTarget};

/// Single red pixel, PNG.
const RED_PIXEL_PNG_B64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";

const WEATHER_TOOL_NAME: &str = "get_weather";

/// Does the endpoint stream? Pass requires at least one chunk, in-order
/// chunks, and a clean close.
pub struct StreamingProbe;

pub(crate) struct StreamObservation {
    pub chunks: Vec<(usize, String)>,
    pub clean_end: bool,
    pub error_kind: Option<String>,
    pub first_token_ms: Option<u64>,
    pub total_ms: Option<u64>,
}

pub(crate) fn evaluate_stream(name: &'static str, obs: &StreamObservation) -> ProbeReport {
    if let Some(kind) = &obs.error_kind {
        return ProbeReport::fail(name, 0.0).with_detail(format!("stream error: {}", kind));
    }
    if obs.chunks.is_empty() {
        return ProbeReport::fail(name, 0.0).with_detail("no chunks received");
    }
    let ordered = obs.chunks.windows(2).all(|w| w[1].0 > w[0].0);
    if !ordered {
        return ProbeReport::fail(name, 0.0).with_detail("chunks out of order");
    }
    if !obs.clean_end {
        return ProbeReport::fail(name, 0.0).with_detail("stream did not close cleanly");
    }
    let content: String = obs.chunks.iter().map(|(_, d)| d.as_str()).collect();
    ProbeReport::pass(name, 100.0)
        .with_evidence(&content)
        .with_latency(obs.first_token_ms, obs.total_ms.unwrap_or(0))
        .with_detail(format!("{} chunks", obs.chunks.len()))
}

#[async_trait]
impl Probe for StreamingProbe {
    fn name(&self) -> &'static str {
        "streaming"
    }

    fn applicability(&self, caps: &DeclaredCaps) -> bool {
        caps.streaming != Some(false)
    }

    async fn run(&self, target: &ProbeTarget) -> AdapterResult<ProbeReport> {
        let turns = vec![ChatTurn::user("Count from 1 to 5, one number per line.")];
        let options = ChatOptions {
            max_tokens: Some(64),
            ..Default::default()
        };
        let mut rx = match target.chat_stream(&turns, &options).await {
            Ok(rx) => rx,
            Err(e) if retryable(&e) => return Err(e),
            Err(e) => return Ok(report_for_error(self.name(), &e)),
        };

        let mut obs = StreamObservation {
            chunks: Vec::new(),
            clean_end: false,
            error_kind: None,
            first_token_ms: None,
            total_ms: None,
        };
        while let Some(item) = rx.recv().await {
            match item {
                StreamItem::Chunk { seq, delta } => obs.chunks.push((seq, delta)),
                StreamItem::End {
                    first_token, total, ..
                } => {
                    obs.clean_end = true;
                    obs.first_token_ms = first_token.map(|d| d.as_millis() as u64);
                    obs.total_ms = Some(total.as_millis() as u64);
                }
                StreamItem::Error(e) => {
                    obs.error_kind = Some(e.kind().to_string());
                    break;
                }
            }
        }
        Ok(evaluate_stream(self.name(), &obs))
    }
}

/// Can the model produce a structurally valid call to a declared tool?
pub struct FunctionCallingProbe;

fn weather_tool() -> ToolDecl {
    ToolDecl {
        name: WEATHER_TOOL_NAME.to_string(),
        description: "Get the current weather for a location".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "location": {"type": "string", "description": "City name"}
            },
            "required": ["location"]
        }),
    }
}

pub(crate) fn evaluate_tool_call(
    name: &'static str,
    calls: &[crate::adapter::ToolCall],
    content: &str,
) -> ProbeReport {
    let valid = calls
        .iter()
        .any(|c| c.name == WEATHER_TOOL_NAME && c.arguments.is_object());
    if valid {
        let rendered = serde_json::to_string(calls).unwrap_or_default();
        ProbeReport::pass(name, 100.0).with_evidence(&rendered)
    } else if calls.is_empty() {
        ProbeReport::fail(name, 0.0)
            .with_evidence(content)
            .with_detail("no tool call in response")
    } else {
        ProbeReport::fail(name, 0.0).with_detail("tool call did not target the declared tool")
    }
}

#[async_trait]
impl Probe for FunctionCallingProbe {
    fn name(&self) -> &'static str {
        "function-calling"
    }

    fn applicability(&self, caps: &DeclaredCaps) -> bool {
        caps.tools != Some(false)
    }

    async fn run(&self, target: &ProbeTarget) -> AdapterResult<ProbeReport> {
        let turns = vec![ChatTurn::user(
            "What is the weather in Paris right now? Use the get_weather tool.",
        )];
        let options = ChatOptions {
            tools: vec![weather_tool()],
            max_tokens: Some(128),
            ..Default::default()
        };
        match target.chat(&turns, &options).await {
            Ok(outcome) => Ok(evaluate_tool_call(
                self.name(),
                &outcome.tool_calls,
                &outcome.content,
            )),
            Err(e) if retryable(&e) => Err(e),
            Err(e) => Ok(report_for_error(self.name(), &e)),
        }
    }
}

/// Can the model see? A single red pixel must be described as red.
/// Unlike other features, `Unsupported` here is a fail: the probe only
/// runs when vision is advertised or unknown, and an endpoint that
/// rejects image parts does not have the feature.
pub struct VisionProbe;

pub(crate) fn evaluate_vision(name: &'static str, content: &str) -> ProbeReport {
    if content.to_lowercase().contains("red") {
        ProbeReport::pass(name, 100.0).with_evidence(content)
    } else {
        ProbeReport::fail(name, 0.0)
            .with_evidence(content)
            .with_detail("response does not reference the visible content")
    }
}

#[async_trait]
impl Probe for VisionProbe {
    fn name(&self) -> &'static str {
        "vision"
    }

    fn applicability(&self, caps: &DeclaredCaps) -> bool {
        caps.vision != Some(false)
    }

    async fn run(&self, target: &ProbeTarget) -> AdapterResult<ProbeReport> {
        let turn = ChatTurn::user("What colour is this image? Answer with one word.").with_image(
            ImageAttachment {
                media_type: "image/png".to_string(),
                base64_data: RED_PIXEL_PNG_B64.to_string(),
            },
        );
        let options = ChatOptions {
            max_tokens: Some(16),
            ..Default::default()
        };
        match target.chat(&[turn], &options).await {
            Ok(outcome) => Ok(evaluate_vision(self.name(), &outcome.content)),
            Err(AdapterError::Unsupported(_)) => Ok(ProbeReport::fail(self.name(), 0.0)
                .with_detail("image input not supported")),
            Err(e) if retryable(&e) => Err(e),
            Err(e) => Ok(report_for_error(self.name(), &e)),
        }
    }
}

/// Does the endpoint embed, and stably so? Two calls over the same text
/// must agree on dimension and closely on values.
pub struct EmbeddingsProbe;

const EMBED_TEXT: &str = "A stable sentence for embedding comparison.";
const EMBED_MAX_DRIFT: f32 = 0.05;

pub(crate) fn evaluate_embeddings(
    name: &'static str,
    first: &[f32],
    second: &[f32],
) -> ProbeReport {
    if first.is_empty() || second.is_empty() {
        return ProbeReport::fail(name, 0.0).with_detail("zero-dimension vector");
    }
    if first.len() != second.len() {
        return ProbeReport::fail(name, 0.0).with_detail(format!(
            "dimension unstable across repeats: {} vs {}",
            first.len(),
            second.len()
        ));
    }
    let max_drift = first
        .iter()
        .zip(second)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f32, f32::max);
    if max_drift > EMBED_MAX_DRIFT {
        return ProbeReport::fail(name, 0.0)
            .with_detail(format!("values unstable across repeats (drift {:.3})", max_drift));
    }
    ProbeReport::pass(name, 100.0).with_detail(format!("dimension {}", first.len()))
}

#[async_trait]
impl Probe for EmbeddingsProbe {
    fn name(&self) -> &'static str {
        "embeddings"
    }

    fn applicability(&self, caps: &DeclaredCaps) -> bool {
        caps.embeddings != Some(false)
    }

    async fn run(&self, target: &ProbeTarget) -> AdapterResult<ProbeReport> {
        let texts = vec![EMBED_TEXT.to_string()];
        let first = match target.embed(&texts).await {
            Ok(outcome) => outcome,
            Err(e) if retryable(&e) => return Err(e),
            Err(e) => return Ok(report_for_error(self.name(), &e)),
        };
        let second = match target.embed(&texts).await {
            Ok(outcome) => outcome,
            Err(e) if retryable(&e) => return Err(e),
            Err(e) => return Ok(report_for_error(self.name(), &e)),
        };
        let empty = Vec::new();
        let a = first.vectors.first().unwrap_or(&empty);
        let b = second.vectors.first().unwrap_or(&empty);
        Ok(evaluate_embeddings(self.name(), a, b))
    }
}

/// Artifact generation, one probe instance per kind. Applies only when
/// the provider advertises the capability.
pub struct GenerationProbe {
    kind: ArtifactKind,
    name: &'static str,
}

impl GenerationProbe {
    pub fn new(kind: ArtifactKind) -> Self {
        let name = match kind {
            ArtifactKind::Image => "generation-image",
            ArtifactKind::Audio => "generation-audio",
            ArtifactKind::Video => "generation-video",
        };
        Self { kind, name }
    }
}

pub(crate) fn evaluate_artifact(name: &'static str, artifact: &ArtifactDescriptor) -> ProbeReport {
    if artifact.bytes_len > 0 || artifact.uri.is_some() {
        ProbeReport::pass(name, 100.0)
            .with_detail(format!("{} bytes", artifact.bytes_len))
    } else {
        ProbeReport::fail(name, 0.0).with_detail("empty artifact")
    }
}

#[async_trait]
impl Probe for GenerationProbe {
    fn name(&self) -> &'static str {
        self.name
    }

    fn applicability(&self, caps: &DeclaredCaps) -> bool {
        let advertised = match self.kind {
            ArtifactKind::Image => caps.image_generation,
            ArtifactKind::Audio => caps.audio_generation,
            ArtifactKind::Video => caps.video_generation,
        };
        advertised == Some(true)
    }

    async fn run(&self, target: &ProbeTarget) -> AdapterResult<ProbeReport> {
        let prompt = "A small blue circle on a white background";
        match target.generate(self.kind, prompt).await {
            Ok(artifact) => Ok(evaluate_artifact(self.name, &artifact)),
            Err(e) if retryable(&e) => Err(e),
            Err(e) => Ok(report_for_error(self.name, &e)),
        }
    }
}

/// Reranking: three candidates in, an ordered score list out.
pub struct RerankProbe;

pub(crate) fn evaluate_rerank(name: &'static str, scores: &[RerankScore]) -> ProbeReport {
    if scores.len() != 3 {
        return ProbeReport::fail(name, 0.0)
            .with_detail(format!("expected 3 scores, got {}", scores.len()));
    }
    let mut seen = [false; 3];
    for s in scores {
        if s.index >= 3 || !s.score.is_finite() {
            return ProbeReport::fail(name, 0.0).with_detail("invalid score entry");
        }
        seen[s.index] = true;
    }
    if !seen.iter().all(|&s| s) {
        return ProbeReport::fail(name, 0.0).with_detail("candidate indices incomplete");
    }
    let ordered = scores.windows(2).all(|w| w[0].score >= w[1].score);
    if !ordered {
        return ProbeReport::fail(name, 0.0).with_detail("scores not in descending order");
    }
    ProbeReport::pass(name, 100.0)
}

#[async_trait]
impl Probe for RerankProbe {
    fn name(&self) -> &'static str {
        "reranking"
    }

    fn applicability(&self, caps: &DeclaredCaps) -> bool {
        caps.rerank == Some(true)
    }

    async fn run(&self, target: &ProbeTarget) -> AdapterResult<ProbeReport> {
        let query = "How do I parse JSON in Rust?";
        let candidates = vec![
            "serde_json deserializes JSON into Rust types.".to_string(),
            "Paris is the capital of France.".to_string(),
            "Football is played with eleven players.".to_string(),
        ];
        match target.rerank(query, &candidates).await {
            Ok(scores) => Ok(evaluate_rerank(self.name(), &scores)),
            Err(e) if retryable(&e) => Err(e),
            Err(e) => Ok(report_for_error(self.name(), &e)),
        }
    }
}
