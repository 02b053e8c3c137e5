//! Google-native adapter.
//!
//! Speaks the `generativelanguage` wire family: `models` discovery,
//! `generateContent`, `streamGenerateContent?alt=sse` and `embedContent`.
//! Auth is a query-string key. Artifact generation and reranking return
//! `Unsupported`.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::error::{AdapterError, AdapterResult};

use super::types::*;
use super::{build_http_client, classify_status, classify_transport, extract_hints, retry_after_secs};

pub struct GoogleAdapter {
    http: Client,
}

impl GoogleAdapter {
    pub fn new() -> Self {
        Self {
            http: build_http_client(),
        }
    }

    fn url(&self, endpoint: &ProviderEndpoint, suffix: &str) -> String {
        let sep = if suffix.contains('?') { '&' } else { '?' };
        format!(
            "{}/v1beta/{}{}key={}",
            endpoint.base_url,
            suffix,
            sep,
            endpoint.auth.expose()
        )
    }
}

impl Default for GoogleAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<WireGenerationConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireToolBundle>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct WireContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireToolBundle {
    function_declarations: Vec<ToolDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(default)]
    usage_metadata: Option<WireUsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct WireCandidate {
    #[serde(default)]
    content: Option<WireContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireModelList {
    #[serde(default)]
    models: Vec<WireModelEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireModelEntry {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireEmbedResponse {
    embedding: WireEmbedding,
}

#[derive(Debug, Deserialize)]
struct WireEmbedding {
    values: Vec<f32>,
}

fn wire_request(turns: &[ChatTurn], options: &ChatOptions) -> WireRequest {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();
    for turn in turns {
        let mut parts = Vec::new();
        if let Some(image) = &turn.image {
            parts.push(serde_json::json!({"inline_data": {
                "mime_type": image.media_type,
                "data": image.base64_data,
            }}));
        }
        parts.push(serde_json::json!({"text": turn.content}));
        match turn.role {
            ChatRole::System => system_parts.extend(parts),
            ChatRole::User => contents.push(WireContent {
                role: Some("user".to_string()),
                parts,
            }),
            ChatRole::Assistant => contents.push(WireContent {
                role: Some("model".to_string()),
                parts,
            }),
        }
    }
    WireRequest {
        contents,
        system_instruction: if system_parts.is_empty() {
            None
        } else {
            Some(WireContent {
                role: None,
                parts: system_parts,
            })
        },
        generation_config: Some(WireGenerationConfig {
            max_output_tokens: options.max_tokens,
            temperature: options.temperature,
        }),
        tools: if options.tools.is_empty() {
            Vec::new()
        } else {
            vec![WireToolBundle {
                function_declarations: options.tools.clone(),
            }]
        },
    }
}

fn collect_candidate(content: Option<WireContent>) -> (String, Vec<ToolCall>) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    if let Some(content) = content {
        for part in content.parts {
            if let Some(t) = part.get("text").and_then(|t| t.as_str()) {
                text.push_str(t);
            }
            if let Some(call) = part.get("functionCall") {
                tool_calls.push(ToolCall {
                    id: None,
                    name: call
                        .get("name")
                        .and_then(|n| n.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    arguments: call.get("args").cloned().unwrap_or(serde_json::Value::Null),
                });
            }
        }
    }
    (text, tool_calls)
}

#[async_trait]
impl super::ProviderAdapter for GoogleAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::GoogleNative
    }

    async fn list_models(&self, endpoint: &ProviderEndpoint) -> AdapterResult<Vec<ListedModel>> {
        let url = self.url(endpoint, "models?pageSize=200");
        let response = self
            .http
            .get(&url)
            .timeout(endpoint.timeout)
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
            .models
            .into_iter()
            .map(|entry| {
                let methods = &entry.supported_generation_methods;
                let chat = methods.iter().any(|m| m == "generateContent");
                let embed = methods.iter().any(|m| m == "embedContent");
                ListedModel {
                    // "models/gemini-x" → "gemini-x"
                    id: entry
                        .name
                        .strip_prefix("models/")
                        .unwrap_or(&entry.name)
                        .to_string(),
                    display_name: entry.display_name,
                    created: None,
                    caps: DeclaredCaps {
                        streaming: Some(chat),
                        tools: if chat { None } else { Some(false) },
                        vision: if chat { None } else { Some(false) },
                        embeddings: Some(embed),
                        rerank: Some(false),
                        image_generation: Some(false),
                        audio_generation: Some(false),
                        video_generation: Some(false),
                        ..Default::default()
                    },
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
        let request = wire_request(turns, options);
        let url = self.url(endpoint, &format!("models/{}:generateContent", model));
        let start = Instant::now();
        let response = self
            .http
            .post(&url)
            .timeout(endpoint.timeout)
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
            .map_err(|e| AdapterError::malformed(format!("generateContent: {}", e)))?;
        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::malformed("no candidates in response"))?;
        let (content, tool_calls) = collect_candidate(candidate.content);

        Ok(ChatOutcome {
            content,
            tool_calls,
            usage: parsed.usage_metadata.map(|u| TokenUsage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count.unwrap_or(0),
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
        let request = wire_request(turns, options);
        let url = self.url(
            endpoint,
            &format!("models/{}:streamGenerateContent?alt=sse", model),
        );
        let start = Instant::now();
        let response = self
            .http
            .post(&url)
            .timeout(endpoint.timeout)
            .header("content-type", "application/json")
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
                let parsed: WireResponse = match serde_json::from_str(&event.data) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        let _ = tx
                            .send(StreamItem::Error(AdapterError::malformed(format!(
                                "stream event: {}",
                                e
                            ))))
                            .await;
                        return;
                    }
                };
                if let Some(u) = parsed.usage_metadata {
                    usage = Some(TokenUsage {
                        input_tokens: u.prompt_token_count,
                        output_tokens: u.candidates_token_count.unwrap_or(0),
                    });
                }
                for candidate in parsed.candidates {
                    let (text, _) = collect_candidate(candidate.content);
                    if !text.is_empty() {
                        first_token.get_or_insert_with(|| start.elapsed());
                        if tx.send(StreamItem::Chunk { seq, delta: text }).await.is_err() {
                            return;
                        }
                        seq += 1;
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
        let mut vectors = Vec::with_capacity(texts.len());
        let mut hints = RateLimitHints::default();
        for text in texts {
            let request = serde_json::json!({
                "model": format!("models/{}", model),
                "content": {"parts": [{"text": text}]},
            });
            let url = self.url(endpoint, &format!("models/{}:embedContent", model));
            let response = self
                .http
                .post(&url)
                .timeout(endpoint.timeout)
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
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(AdapterError::unsupported("embeddings"));
            }
            if !status.is_success() {
                return Err(classify_status(status, retry_after_secs(&headers), &body));
            }
            let parsed: WireEmbedResponse = serde_json::from_str(&body)
                .map_err(|e| AdapterError::malformed(format!("embedContent: {}", e)))?;
            vectors.push(parsed.embedding.values);
            hints = extract_hints(self.kind(), &headers);
        }
        Ok(EmbeddingOutcome {
            vectors,
            usage: None,
            hints,
        })
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_request_roles() {
        let request = wire_request(
            &[
                ChatTurn::system("short answers"),
                ChatTurn::user("hi"),
                ChatTurn::assistant("hello"),
            ],
            &ChatOptions::default(),
        );
        assert!(request.system_instruction.is_some());
        assert_eq!(request.contents.len(), 2);
        assert_eq!(request.contents[0].role.as_deref(), Some("user"));
        assert_eq!(request.contents[1].role.as_deref(), Some("model"));
    }

    #[test]
    fn test_collect_candidate_extracts_function_call() {
        let content: WireContent = serde_json::from_value(serde_json::json!({
            "role": "model",
            "parts": [
                {"text": "calling"},
                {"functionCall": {"name": "get_weather", "args": {"location": "Paris"}}}
            ]
        }))
        .unwrap();
        let (text, calls) = collect_candidate(Some(content));
        assert_eq!(text, "calling");
        assert_eq!(calls[0].name, "get_weather");
        assert_eq!(calls[0].arguments["location"], "Paris");
    }

    #[test]
    fn test_model_name_prefix_stripped() {
        let entry = WireModelEntry {
            name: "models/gemini-2.0-flash".into(),
            display_name: None,
            supported_generation_methods: vec!["generateContent".into()],
        };
        let stripped = entry.name.strip_prefix("models/").unwrap();
        assert_eq!(stripped, "gemini-2.0-flash");
    }
}
