//! Provider adapter layer.
//!
//! One trait hides vendor HTTP differences behind a generic probe surface:
//! list models, chat (plain and streaming), embed, generate, rerank. Each
//! operation returns either a typed result or a typed [`AdapterError`];
//! rate-limit hints found in response headers are always extracted and
//! surfaced alongside results. Adapters move bytes to structure and never
//! interpret content; evaluation belongs to the probe suite.

mod anthropic;
mod google;
mod headers;
mod openai;
mod types;

pub use anthropic::AnthropicAdapter;
pub use google::GoogleAdapter;
pub use headers::{extract_hints, retry_after_secs};
pub use openai::OpenAiAdapter;
pub use types::{
    AdapterKind, ArtifactDescriptor, ArtifactKind, AuthMaterial, ChatOptions, ChatOutcome,
    ChatRole, ChatTurn, DeclaredCaps, EmbeddingOutcome, ImageAttachment, ListedModel,
    ProviderEndpoint, RateLimitHints, RerankScore, ResponseFormat, StreamItem, TokenUsage,
    ToolCall, ToolDecl, STREAM_CHANNEL_CAPACITY,
};

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::{AdapterError, AdapterResult};

/// Vendor-neutral probe surface for one wire protocol family.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The wire protocol family this adapter speaks.
    fn kind(&self) -> AdapterKind;

    /// List models via the provider's discovery endpoint.
    async fn list_models(&self, endpoint: &ProviderEndpoint) -> AdapterResult<Vec<ListedModel>>;

    /// One non-streaming chat exchange.
    async fn chat(
        &self,
        endpoint: &ProviderEndpoint,
        model: &str,
        turns: &[ChatTurn],
        options: &ChatOptions,
    ) -> AdapterResult<ChatOutcome>;

    /// One streaming chat exchange, reified as a bounded channel of chunks.
    /// The adapter closes the channel after `StreamItem::End`, or after a
    /// terminal `StreamItem::Error` if the stream broke mid-flight.
    async fn chat_stream(
        &self,
        endpoint: &ProviderEndpoint,
        model: &str,
        turns: &[ChatTurn],
        options: &ChatOptions,
    ) -> AdapterResult<mpsc::Receiver<StreamItem>>;

    /// Embed texts; `Unsupported` when the provider has no embedding surface.
    async fn embed(
        &self,
        endpoint: &ProviderEndpoint,
        model: &str,
        texts: &[String],
    ) -> AdapterResult<EmbeddingOutcome>;

    /// Generate an image/audio/video artifact.
    async fn generate(
        &self,
        endpoint: &ProviderEndpoint,
        model: &str,
        kind: ArtifactKind,
        prompt: &str,
    ) -> AdapterResult<ArtifactDescriptor>;

    /// Rerank candidates against a query.
    async fn rerank(
        &self,
        endpoint: &ProviderEndpoint,
        model: &str,
        query: &str,
        candidates: &[String],
    ) -> AdapterResult<Vec<RerankScore>>;
}

/// Build the adapter for a provider's declared kind.
///
/// `Generic` dispatches to the OpenAI-compatible adapter: in practice the
/// unknown vendors worth probing speak that shape.
pub fn adapter_for(kind: AdapterKind) -> Arc<dyn ProviderAdapter> {
    match kind {
        AdapterKind::OpenaiCompatible | AdapterKind::Generic => Arc::new(OpenAiAdapter::new()),
        AdapterKind::AnthropicNative => Arc::new(AnthropicAdapter::new()),
        AdapterKind::GoogleNative => Arc::new(GoogleAdapter::new()),
    }
}

/// Shared HTTP client construction. Per-call timeouts are applied at the
/// request level so one client per adapter suffices.
pub(crate) fn build_http_client() -> Client {
    Client::builder()
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Map an HTTP status + body onto the adapter error taxonomy.
pub(crate) fn classify_status(
    status: reqwest::StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> AdapterError {
    match status.as_u16() {
        401 | 403 => AdapterError::AuthFailed(excerpt(body)),
        404 => AdapterError::NotFound(excerpt(body)),
        429 => AdapterError::RateLimited {
            retry_after: retry_after.map(Duration::from_secs),
        },
        408 => AdapterError::Timeout(Duration::from_secs(0)),
        500 | 502 | 503 | 529 => AdapterError::Overloaded,
        _ => AdapterError::Malformed(format!("unexpected status {}: {}", status, excerpt(body))),
    }
}

/// Map transport-level reqwest failures onto the taxonomy.
pub(crate) fn classify_transport(err: reqwest::Error, timeout: Duration) -> AdapterError {
    if err.is_timeout() {
        AdapterError::Timeout(timeout)
    } else {
        AdapterError::Network(err.to_string())
    }
}

/// Bounded body excerpt for error messages.
pub(crate) fn excerpt(body: &str) -> String {
    const MAX: usize = 256;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

/// Join a base URL and an API path, tolerating bases that already carry
/// the `/v1` segment (common with OpenAI-compatible gateways).
pub(crate) fn join_api(base: &str, path: &str) -> String {
    debug_assert!(path.starts_with('/'));
    if let Some(versioned) = path.strip_prefix("/v1") {
        if base.ends_with("/v1") {
            return format!("{}{}", base, versioned);
        }
    }
    format!("{}{}", base, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_api_handles_versioned_base() {
        assert_eq!(
            join_api("https://api.example.com", "/v1/models"),
            "https://api.example.com/v1/models"
        );
        assert_eq!(
            join_api("https://api.example.com/v1", "/v1/models"),
            "https://api.example.com/v1/models"
        );
    }

    #[test]
    fn test_classify_status_taxonomy() {
        use reqwest::StatusCode;
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None, "no"),
            AdapterError::AuthFailed(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, None, "no model"),
            AdapterError::NotFound(_)
        ));
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(2), ""),
            AdapterError::RateLimited {
                retry_after: Some(Duration::from_secs(2))
            }
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, None, ""),
            AdapterError::Overloaded
        );
    }

    #[test]
    fn test_excerpt_bounds_body() {
        let long = "x".repeat(1000);
        assert!(excerpt(&long).len() < 300);
        assert_eq!(excerpt("short"), "short");
    }

    #[test]
    fn test_dispatch_by_kind() {
        assert_eq!(
            adapter_for(AdapterKind::OpenaiCompatible).kind(),
            AdapterKind::OpenaiCompatible
        );
        assert_eq!(
            adapter_for(AdapterKind::Generic).kind(),
            AdapterKind::OpenaiCompatible
        );
        assert_eq!(
            adapter_for(AdapterKind::AnthropicNative).kind(),
            AdapterKind::AnthropicNative
        );
        assert_eq!(
            adapter_for(AdapterKind::GoogleNative).kind(),
            AdapterKind::GoogleNative
        );
    }
}
