//! Anthropic-native adapter.
//!
//! Speaks `/v1/messages` with `x-api-key` auth and the Anthropic content
//! block shapes for text, images and tool use. Embeddings, artifact
//! generation and reranking have no native surface and return
//! `Unsupported`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::error::{AdapterError, AdapterResult};

use super::types::*;
use super::{build_http_client, classify_status, classify_transport, extract_hints, join_api};

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    http: Client,
}

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self {
            http: build_http_client(),
        }
    }

    fn auth_request(
        &self,
        endpoint: &ProviderEndpoint,
        builder: reqwest::RequestBuilder,
    ) -> reqwest::RequestBuilder {
        builder
            .header("x-api-key", endpoint.auth.expose())
            .header("anthropic-version", API_VERSION)
            .timeout(endpoint.timeout)
    }
}

impl Default for AnthropicAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    content: Vec<WireContentBlock>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireModelList {
    data: Vec<WireModelEntry>,
}

#[derive(Debug, Deserialize)]
struct WireModelEntry {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireStreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    delta: Option<WireStreamDelta>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize, Default)]
struct WireStreamDelta {
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic has no system role in `messages`; system turns are lifted
/// into the top-level `system` field.
fn split_turns(turns: &[ChatTurn]) -> (Option<String>, Vec<WireMessage>) {
    let mut system = Vec::new();
    let mut messages = Vec::new();
    for turn in turns {
        match turn.role {
            ChatRole::System => system.push(turn.content.clone()),
            ChatRole::User | ChatRole::Assistant => {
                let role = match turn.role {
                    ChatRole::Assistant => "assistant",
                    _ => "user",
                };
                let content = match &turn.image {
                    None => serde_json::Value::String(turn.content.clone()),
                    Some(image) => serde_json::json!([
                        {"type": "image", "source": {
                            "type": "base64",
                            "media_type": image.media_type,
                            "data": image.base64_data,
                        }},
                        {"type": "text", "text": turn.content},
                    ]),
                };
                messages.push(WireMessage { role, content });
            }
        }
    }
    let system = if system.is_empty() {
        None
    } else {
        Some(system.join("\n"))
    };
    (system, messages)
}

fn wire_request(model: &str, turns: &[ChatTurn], options: &ChatOptions, stream: bool) -> WireRequest {
    let (system, messages) = split_turns(turns);
    WireRequest {
        model: model.to_string(),
        max_tokens: options.max_tokens.unwrap_or(512),
        messages,
        system,
        temperature: options.temperature,
        tools: options
            .tools
            .iter()
            .map(|t| WireTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect(),
        stream,
    }
}

#[async_trait]
impl super::ProviderAdapter for AnthropicAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::AnthropicNative
    }

    async fn list_models(&self, endpoint: &ProviderEndpoint) -> AdapterResult<Vec<ListedModel>> {
        let url = join_api(&endpoint.base_url, "/v1/models");
        let response = self
            .auth_request(endpoint, self.http.get(&url))
            .send()
            .await
            .map_err(|e| classify_transport(e, endpoint.timeout))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(e, endpoint.timeout))?;
        if !status.is_success() {
            let hints = extract_hints(self.kind(), &headers);
            return Err(classify_status(status, hints.retry_after_secs, &body));
        }
        let list: WireModelList = serde_json::from_str(&body)
            .map_err(|e| AdapterError::malformed(format!("model list: {}", e)))?;
        Ok(list
            .data
            .into_iter()
            .map(|entry| ListedModel {
                created: entry
                    .created_at
                    .as_deref()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc)),
                display_name: entry.display_name,
                caps: DeclaredCaps {
                    streaming: Some(true),
                    tools: Some(true),
                    vision: Some(true),
                    embeddings: Some(false),
                    rerank: Some(false),
                    image_generation: Some(false),
                    audio_generation: Some(false),
                    video_generation: Some(false),
                    ..Default::default()
                },
                id: entry.id,
            })
            .collect())
    }

    async fn chat(
        &self,
        endpoint: &ProviderEndpoint,
        model: &str,
        turns: &[ChatTurn],
        options: &ChatOptions,
    ) -> AdapterResult<ChatOutcome> {
        let request = wire_request(model, turns, options, false);
        let url = join_api(&endpoint.base_url, "/v1/messages");
        let start = Instant::now();
        let response = self
            .auth_request(endpoint, self.http.post(&url))
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport(e, endpoint.timeout))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(e, endpoint.timeout))?;
        let total = start.elapsed();
        let hints = extract_hints(self.kind(), &headers);

        if !status.is_success() {
            return Err(classify_status(status, hints.retry_after_secs, &body));
        }

        let parsed: WireResponse = serde_json::from_str(&body)
            .map_err(|e| AdapterError::malformed(format!("messages response: {}", e)))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block.block_type.as_str() {
                "text" => content.push_str(block.text.as_deref().unwrap_or("")),
                "tool_use" => tool_calls.push(ToolCall {
                    id: block.id,
                    name: block.name.unwrap_or_default(),
                    arguments: block.input.unwrap_or(serde_json::Value::Null),
                }),
                _ => {}
            }
        }

        Ok(ChatOutcome {
            content,
            tool_calls,
            usage: parsed.usage.map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
            first_token: None,
            total,
            hints,
        })
    }

    async fn chat_stream(
        &self,
        endpoint: &ProviderEndpoint,
        model: &str,
        turns: &[ChatTurn],
        options: &ChatOptions,
    ) -> AdapterResult<mpsc::Receiver<StreamItem>> {
        let request = wire_request(model, turns, options, true);
        let url = join_api(&endpoint.base_url, "/v1/messages");
        let start = Instant::now();
        let response = self
            .auth_request(endpoint, self.http.post(&url))
            .header("content-type", "application/json")
            .header("accept", "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport(e, endpoint.timeout))?;

        let status = response.status();
        let headers = response.headers().clone();
        let hints = extract_hints(self.kind(), &headers);
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, hints.retry_after_secs, &body));
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream().eventsource();
            let mut seq = 0usize;
            let mut first_token: Option<Duration> = None;
            let mut usage: Option<TokenUsage> = None;

            while let Some(event) = stream.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        let _ = tx
                            .send(StreamItem::Error(AdapterError::Network(e.to_string())))
                            .await;
                        return;
                    }
                };
                let parsed: WireStreamEvent = match serde_json::from_str(&event.data) {
                    Ok(parsed) => parsed,
                    // Ping and unknown event payloads are skipped.
                    Err(_) => continue,
                };
                match parsed.event_type.as_str() {
                    "content_block_delta" => {
                        if let Some(text) = parsed.delta.and_then(|d| d.text) {
                            if !text.is_empty() {
                                first_token.get_or_insert_with(|| start.elapsed());
                                if tx
                                    .send(StreamItem::Chunk { seq, delta: text })
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                                seq += 1;
                            }
                        }
                    }
                    "message_delta" | "message_start" => {
                        if let Some(u) = parsed.usage {
                            usage = Some(TokenUsage {
                                input_tokens: u.input_tokens,
                                output_tokens: u.output_tokens,
                            });
                        }
                    }
                    "message_stop" => break,
                    "error" => {
                        let _ = tx
                            .send(StreamItem::Error(AdapterError::Overloaded))
                            .await;
                        return;
                    }
                    _ => {}
                }
            }

            let _ = tx
                .send(StreamItem::End {
                    usage,
                    first_token,
                    total: start.elapsed(),
                    hints,
                })
                .await;
        });

        Ok(rx)
    }

    async fn embed(
        &self,
        _endpoint: &ProviderEndpoint,
        _model: &str,
        _texts: &[String],
    ) -> AdapterResult<EmbeddingOutcome> {
        Err(AdapterError::unsupported("embeddings"))
    }

    async fn generate(
        &self,
        _endpoint: &ProviderEndpoint,
        _model: &str,
        kind: ArtifactKind,
        _prompt: &str,
    ) -> AdapterResult<ArtifactDescriptor> {
        Err(AdapterError::unsupported(format!("{} generation", kind)))
    }

    async fn rerank(
        &self,
        _endpoint: &ProviderEndpoint,
        _model: &str,
        _query: &str,
        _candidates: &[String],
    ) -> AdapterResult<Vec<RerankScore>> {
        Err(AdapterError::unsupported("rerank"))
    }
}
