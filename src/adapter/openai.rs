//! OpenAI-compatible adapter.
//!
//! Speaks the `/v1/chat/completions` wire family: chat with optional tool
//! declarations and image parts, SSE streaming, `/v1/models` discovery,
//! `/v1/embeddings`, `/v1/images/generations`, `/v1/audio/speech` and the
//! `/v1/rerank` shape used by rerank-capable gateways.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::error::{AdapterError, AdapterResult};

use super::types::*;
use super::{
    build_http_client, classify_status, classify_transport, excerpt, extract_hints, join_api,
    retry_after_secs,
};

pub struct OpenAiAdapter {
    http: Client,
}

impl OpenAiAdapter {
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
            .bearer_auth(endpoint.auth.expose())
            .timeout(endpoint.timeout)
    }

    async fn post_json<B: Serialize>(
        &self,
        endpoint: &ProviderEndpoint,
        path: &str,
        body: &B,
    ) -> AdapterResult<(reqwest::StatusCode, reqwest::header::HeaderMap, String)> {
        let url = join_api(&endpoint.base_url, path);
        let response = self
            .auth_request(endpoint, self.http.post(&url))
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| classify_transport(e, endpoint.timeout))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(e, endpoint.timeout))?;
        Ok((status, headers, body))
    }
}

impl Default for OpenAiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

// Wire types.

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
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
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ToolDecl,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    function: WireToolCallFunction,
}

#[derive(Debug, Deserialize)]
struct WireToolCallFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireStreamEvent {
    #[serde(default)]
    choices: Vec<WireStreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    delta: WireStreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct WireStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireModelList {
    data: Vec<WireModelEntry>,
}

#[derive(Debug, Deserialize)]
struct WireModelEntry {
    id: String,
    #[serde(default)]
    created: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WireEmbeddingResponse {
    data: Vec<WireEmbeddingData>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireEmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct WireImageResponse {
    data: Vec<WireImageData>,
}

#[derive(Debug, Deserialize, Default)]
struct WireImageData {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireRerankResponse {
    results: Vec<WireRerankResult>,
}

#[derive(Debug, Deserialize)]
struct WireRerankResult {
    index: usize,
    relevance_score: f64,
}

fn role_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

fn wire_messages(turns: &[ChatTurn]) -> Vec<WireMessage> {
    turns
        .iter()
        .map(|turn| {
            let content = match &turn.image {
                None => serde_json::Value::String(turn.content.clone()),
                Some(image) => serde_json::json!([
                    {"type": "text", "text": turn.content},
                    {"type": "image_url", "image_url": {
                        "url": format!("data:{};base64,{}", image.media_type, image.base64_data)
                    }},
                ]),
            };
            WireMessage {
                role: role_str(turn.role),
                content,
            }
        })
        .collect()
}

fn wire_request(model: &str, turns: &[ChatTurn], options: &ChatOptions, stream: bool) -> WireRequest {
    WireRequest {
        model: model.to_string(),
        messages: wire_messages(turns),
        max_tokens: options.max_tokens,
        temperature: options.temperature,
        tools: options
            .tools
            .iter()
            .cloned()
            .map(|function| WireTool {
                tool_type: "function",
                function,
            })
            .collect(),
        response_format: options.response_format.and_then(|f| match f {
            ResponseFormat::JsonObject => Some(serde_json::json!({"type": "json_object"})),
            ResponseFormat::Text => None,
        }),
        stream,
    }
}

fn parse_tool_calls(calls: Vec<WireToolCall>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .map(|c| ToolCall {
            id: c.id,
            name: c.function.name,
            arguments: serde_json::from_str(&c.function.arguments)
                .unwrap_or(serde_json::Value::Null),
        })
        .collect()
}

#[async_trait]
impl super::ProviderAdapter for OpenAiAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::OpenaiCompatible
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
            return Err(classify_status(status, retry_after_secs(&headers), &body));
        }

        let list: WireModelList = serde_json::from_str(&body)
            .map_err(|e| AdapterError::malformed(format!("model list: {}", e)))?;

        Ok(list
            .data
            .into_iter()
            .map(|entry| {
                let caps = DeclaredCaps {
                    embeddings: Some(entry.id.contains("embedding")),
                    ..Default::default()
                };
                ListedModel {
                    display_name: None,
                    created: entry
                        .created
                        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
                    caps,
                    id: entry.id,
                }
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
        let start = Instant::now();
        let (status, headers, body) = self
            .post_json(endpoint, "/v1/chat/completions", &request)
            .await?;
        let total = start.elapsed();
        let hints = extract_hints(self.kind(), &headers);

        if !status.is_success() {
            return Err(classify_status(status, hints.retry_after_secs, &body));
        }

        let parsed: WireResponse = serde_json::from_str(&body)
            .map_err(|e| AdapterError::malformed(format!("chat completion: {}", e)))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::malformed("no choices in response"))?;

        Ok(ChatOutcome {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: parse_tool_calls(choice.message.tool_calls),
            usage: parsed.usage.map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
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
        let url = join_api(&endpoint.base_url, "/v1/chat/completions");
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
                if event.data.trim() == "[DONE]" {
                    break;
                }
                let parsed: WireStreamEvent = match serde_json::from_str(&event.data) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        let _ = tx
                            .send(StreamItem::Error(AdapterError::malformed(format!(
                                "stream event: {} in {}",
                                e,
                                excerpt(&event.data)
                            ))))
                            .await;
                        return;
                    }
                };
                if let Some(u) = parsed.usage {
                    usage = Some(TokenUsage {
                        input_tokens: u.prompt_tokens,
                        output_tokens: u.completion_tokens,
                    });
                }
                for choice in parsed.choices {
                    if let Some(delta) = choice.delta.content {
                        if !delta.is_empty() {
                            first_token.get_or_insert_with(|| start.elapsed());
                            if tx.send(StreamItem::Chunk { seq, delta }).await.is_err() {
                                return;
                            }
                            seq += 1;
                        }
                    }
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
        endpoint: &ProviderEndpoint,
        model: &str,
        texts: &[String],
    ) -> AdapterResult<EmbeddingOutcome> {
        let request = serde_json::json!({ "model": model, "input": texts });
        let (status, headers, body) = self.post_json(endpoint, "/v1/embeddings", &request).await?;
        let hints = extract_hints(self.kind(), &headers);

        if status == reqwest::StatusCode::NOT_FOUND {
            // Compatible gateways without an embedding surface 404 here.
            return Err(AdapterError::unsupported("embeddings"));
        }
        if !status.is_success() {
            return Err(classify_status(status, hints.retry_after_secs, &body));
        }

        let parsed: WireEmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| AdapterError::malformed(format!("embeddings: {}", e)))?;

        Ok(EmbeddingOutcome {
            vectors: parsed.data.into_iter().map(|d| d.embedding).collect(),
            usage: parsed.usage.map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: 0,
            }),
            hints,
        })
    }

    async fn generate(
        &self,
        endpoint: &ProviderEndpoint,
        model: &str,
        kind: ArtifactKind,
        prompt: &str,
    ) -> AdapterResult<ArtifactDescriptor> {
        match kind {
            ArtifactKind::Image => {
                let request = serde_json::json!({ "model": model, "prompt": prompt, "n": 1 });
                let (status, headers, body) = self
                    .post_json(endpoint, "/v1/images/generations", &request)
                    .await?;
                if status == reqwest::StatusCode::NOT_FOUND {
                    return Err(AdapterError::unsupported("image generation"));
                }
                if !status.is_success() {
                    return Err(classify_status(status, retry_after_secs(&headers), &body));
                }
                let parsed: WireImageResponse = serde_json::from_str(&body)
                    .map_err(|e| AdapterError::malformed(format!("image generation: {}", e)))?;
                let first = parsed.data.into_iter().next().unwrap_or_default();
                let uri = first.url;
                let bytes = match first.b64_json.as_deref() {
                    Some(payload) if !payload.is_empty() => BASE64
                        .decode(payload)
                        .map_err(|_| AdapterError::malformed("image payload is not base64"))?,
                    _ => Vec::new(),
                };
                if bytes.is_empty() && uri.is_none() {
                    return Err(AdapterError::malformed("empty image payload"));
                }
                let fingerprint = if bytes.is_empty() {
                    hex::encode(Sha256::digest(
                        uri.as_deref().unwrap_or_default().as_bytes(),
                    ))
                } else {
                    hex::encode(Sha256::digest(&bytes))
                };
                Ok(ArtifactDescriptor {
                    kind,
                    media_type: Some("image/png".to_string()),
                    bytes_len: bytes.len(),
                    uri,
                    fingerprint,
                })
            }
            ArtifactKind::Audio => {
                let request = serde_json::json!({
                    "model": model, "input": prompt, "voice": "alloy"
                });
                let url = join_api(&endpoint.base_url, "/v1/audio/speech");
                let response = self
                    .auth_request(endpoint, self.http.post(&url))
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| classify_transport(e, endpoint.timeout))?;
                let status = response.status();
                let headers = response.headers().clone();
                if status == reqwest::StatusCode::NOT_FOUND {
                    return Err(AdapterError::unsupported("audio generation"));
                }
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(classify_status(status, retry_after_secs(&headers), &body));
                }
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| classify_transport(e, endpoint.timeout))?;
                if bytes.is_empty() {
                    return Err(AdapterError::malformed("empty audio payload"));
                }
                Ok(ArtifactDescriptor {
                    kind,
                    media_type: Some("audio/mpeg".to_string()),
                    bytes_len: bytes.len(),
                    uri: None,
                    fingerprint: hex::encode(Sha256::digest(&bytes)),
                })
            }
            ArtifactKind::Video => Err(AdapterError::unsupported("video generation")),
        }
    }

    async fn rerank(
        &self,
        endpoint: &ProviderEndpoint,
        model: &str,
        query: &str,
        candidates: &[String],
    ) -> AdapterResult<Vec<RerankScore>> {
        let request = serde_json::json!({
            "model": model, "query": query, "documents": candidates
        });
        let (status, headers, body) = self.post_json(endpoint, "/v1/rerank", &request).await?;
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AdapterError::unsupported("rerank"));
        }
        if !status.is_success() {
            return Err(classify_status(status, retry_after_secs(&headers), &body));
        }
        let parsed: WireRerankResponse = serde_json::from_str(&body)
            .map_err(|e| AdapterError::malformed(format!("rerank: {}", e)))?;
        Ok(parsed
            .results
            .into_iter()
            .map(|r| RerankScore {
                index: r.index,
                score: r.relevance_score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_request_omits_empty_tools() {
        let request = wire_request("m", &[ChatTurn::user("hi")], &ChatOptions::default(), false);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("stream").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hi");
    }

    #[test]
    fn test_wire_request_with_image_builds_parts() {
        let turn = ChatTurn::user("what colour?").with_image(ImageAttachment {
            media_type: "image/png".into(),
            base64_data: "AAAA".into(),
        });
        let request = wire_request("m", &[turn], &ChatOptions::default(), false);
        let json = serde_json::to_value(&request).unwrap();
        let parts = json["messages"][0]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["type"], "image_url");
        assert!(parts[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_parse_tool_calls_decodes_arguments() {
        let calls = vec![WireToolCall {
            id: Some("call_1".into()),
            function: WireToolCallFunction {
                name: "get_weather".into(),
                arguments: r#"{"location":"Paris"}"#.into(),
            },
        }];
        let parsed = parse_tool_calls(calls);
        assert_eq!(parsed[0].name, "get_weather");
        assert_eq!(parsed[0].arguments["location"], "Paris");
    }

    #[test]
    fn test_parse_tool_calls_tolerates_bad_arguments() {
        let calls = vec![WireToolCall {
            id: None,
            function: WireToolCallFunction {
                name: "t".into(),
                arguments: "not json".into(),
            },
        }];
        assert_eq!(parse_tool_calls(calls)[0].arguments, serde_json::Value::Null);
    }
}
