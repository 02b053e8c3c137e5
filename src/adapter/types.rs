//! Wire-level types shared by all provider adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Adapter kind tag selecting the wire protocol family for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterKind {
    /// OpenAI-style `/v1/chat/completions` wire format. The default.
    OpenaiCompatible,
    /// Anthropic `/v1/messages` wire format.
    AnthropicNative,
    /// Google `generateContent` wire format.
    GoogleNative,
    /// Unknown vendor that still speaks the OpenAI shape closely enough.
    Generic,
}

impl Default for AdapterKind {
    fn default() -> Self {
        Self::OpenaiCompatible
    }
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenaiCompatible => write!(f, "openai-compatible"),
            Self::AnthropicNative => write!(f, "anthropic-native"),
            Self::GoogleNative => write!(f, "google-native"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

/// Opaque authentication material. Redacted in Debug output and zeroized
/// on drop; the catalog store is the only place it is persisted, encrypted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AuthMaterial(String);

impl AuthMaterial {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Expose the secret for building a request header.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for AuthMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthMaterial(***)")
    }
}

/// Resolved runtime view of a provider endpoint handed to adapters.
#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    /// Absolute base URL, no trailing slash.
    pub base_url: String,
    /// Decrypted auth material, in memory only.
    pub auth: AuthMaterial,
    /// Hard per-call timeout.
    pub timeout: Duration,
}

impl ProviderEndpoint {
    pub fn new(base_url: impl Into<String>, auth: AuthMaterial, timeout: Duration) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            auth,
            timeout,
        }
    }
}

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single turn of a chat probe.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
    /// Optional inline image for vision probes.
    pub image: Option<ImageAttachment>,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            image: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            image: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }
}

/// Base64-encoded inline image.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    /// Media type, e.g. `image/png`.
    pub media_type: String,
    /// Raw base64 payload without a data-URL prefix.
    pub base64_data: String,
}

/// Tool declaration passed to tool-capable endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDecl {
    pub name: String,
    pub description: String,
    /// JSON-Schema parameter object.
    pub parameters: serde_json::Value,
}

/// Response-format hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

/// Options controlling a chat probe call.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub tools: Vec<ToolDecl>,
    pub response_format: Option<ResponseFormat>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            tools: Vec::new(),
            response_format: None,
            max_tokens: Some(512),
            // Deterministic-ish responses make keyword evaluators stabler.
            temperature: Some(0.0),
        }
    }
}

/// A structurally parsed tool call from a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: Option<String>,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Rate-limit hints extracted from response headers.
///
/// Unknown header schemes yield the empty value; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitHints {
    pub requests_limit: Option<u64>,
    pub requests_remaining: Option<u64>,
    pub tokens_remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
    /// Seconds the provider asked us to wait, from `retry-after`.
    pub retry_after_secs: Option<u64>,
}

impl RateLimitHints {
    pub fn is_empty(&self) -> bool {
        self.requests_limit.is_none()
            && self.requests_remaining.is_none()
            && self.tokens_remaining.is_none()
            && self.reset_at.is_none()
            && self.retry_after_secs.is_none()
    }
}

/// Result of a non-streaming chat probe call.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<TokenUsage>,
    /// Time to the first byte of the response body.
    pub first_token: Option<Duration>,
    pub total: Duration,
    pub hints: RateLimitHints,
}

/// One item on a streaming chat channel.
///
/// The adapter closes the channel after sending `End`, or after a terminal
/// `Error` when the stream broke mid-flight.
#[derive(Debug)]
pub enum StreamItem {
    /// An incremental content delta, with its position in the stream.
    Chunk { seq: usize, delta: String },
    /// Clean end of stream.
    End {
        usage: Option<TokenUsage>,
        first_token: Option<Duration>,
        total: Duration,
        hints: RateLimitHints,
    },
    /// Terminal mid-stream failure.
    Error(crate::error::AdapterError),
}

/// Capacity of the bounded streaming channel.
pub const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Result of an embeddings call.
#[derive(Debug, Clone)]
pub struct EmbeddingOutcome {
    pub vectors: Vec<Vec<f32>>,
    pub usage: Option<TokenUsage>,
    pub hints: RateLimitHints,
}

/// Generated artifact kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Image,
    Audio,
    Video,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Descriptor of a generated artifact. The artifact bytes themselves are
/// never persisted; only size and fingerprint are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub kind: ArtifactKind,
    pub media_type: Option<String>,
    pub bytes_len: usize,
    pub uri: Option<String>,
    /// SHA-256 of the artifact bytes or URI.
    pub fingerprint: String,
}

/// One scored candidate from a rerank call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankScore {
    pub index: usize,
    pub score: f64,
}

/// A model as listed by a provider's discovery endpoint.
#[derive(Debug, Clone)]
pub struct ListedModel {
    pub id: String,
    pub display_name: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub caps: DeclaredCaps,
}

impl ListedModel {
    pub fn bare(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            created: None,
            caps: DeclaredCaps::default(),
        }
    }
}

/// Capabilities a provider declares for a model.
///
/// Tri-state: `Some(true)` advertised, `Some(false)` explicitly absent,
/// `None` unknown. Probe applicability rules distinguish all three.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredCaps {
    pub streaming: Option<bool>,
    pub tools: Option<bool>,
    pub vision: Option<bool>,
    pub embeddings: Option<bool>,
    pub reasoning: Option<bool>,
    pub image_generation: Option<bool>,
    pub audio_generation: Option<bool>,
    pub video_generation: Option<bool>,
    pub rerank: Option<bool>,
}

impl DeclaredCaps {
    /// Merge provider-declared capabilities with enrichment hints.
    /// Known values win over unknown; the left side wins conflicts.
    pub fn merged_with(self, other: DeclaredCaps) -> DeclaredCaps {
        DeclaredCaps {
            streaming: self.streaming.or(other.streaming),
            tools: self.tools.or(other.tools),
            vision: self.vision.or(other.vision),
            embeddings: self.embeddings.or(other.embeddings),
            reasoning: self.reasoning.or(other.reasoning),
            image_generation: self.image_generation.or(other.image_generation),
            audio_generation: self.audio_generation.or(other.audio_generation),
            video_generation: self.video_generation.or(other.video_generation),
            rerank: self.rerank.or(other.rerank),
        }
    }
}
