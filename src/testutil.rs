//! Shared test support: a scriptable in-process provider adapter and a
//! fully wired engine harness over in-memory stores.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::adapter::{
    AdapterKind, ArtifactDescriptor, ArtifactKind, ChatOptions, ChatOutcome, ChatTurn,
    EmbeddingOutcome, ListedModel, ProviderAdapter, ProviderEndpoint, RateLimitHints,
    RerankScore, StreamItem, TokenUsage, ToolCall,
};
use crate::catalog::{
    AuditLog, CatalogStore, DiscoveryMode, ModelRegistry, ProviderRecord,
};
use crate::engine::{EngineConfig, VerificationEngine};
use crate::enrich::NoEnrichment;
use crate::error::{AdapterError, AdapterResult};
use crate::events::EventBus;
use crate::governor::{ProviderLimits, RateGovernor};

const GOOD_PYTHON_ANSWER: &str = r#"```python
def parse_duration(text: str) -> int:
    """Parse a duration like '2h', '30m' or '45s' into seconds."""
    units = {"h": 3600, "m": 60, "s": 1}
    if not text or text[-1] not in units:
        raise ValueError(f"malformed duration: {text!r}")
    try:
        value = int(text[:-1])
    except ValueError:
        raise ValueError(f"malformed duration: {text!r}")
    return value * units[text[-1]]
```"#;

/// How a scripted model behaves.
#[derive(Debug, Clone)]
pub struct ModelBehavior {
    /// Reported total latency per chat call, milliseconds.
    pub latency_ms: u64,
    /// Competence switch: protocol answers, retention, coding quality.
    pub smart: bool,
    /// Answers JSON-RPC prompts with conformant responses.
    pub speaks_jsonrpc: bool,
    pub tools: bool,
    pub vision: bool,
    pub streams: bool,
    pub embeds: bool,
}

impl Default for ModelBehavior {
    fn default() -> Self {
        Self {
            latency_ms: 300,
            smart: true,
            speaks_jsonrpc: true,
            tools: true,
            vision: true,
            streams: true,
            embeds: false,
        }
    }
}

/// Extract the JSON-RPC id from a probe prompt.
fn prompt_rpc_id(prompt: &str) -> i64 {
    prompt
        .split("\"id\":")
        .nth(1)
        .and_then(|rest| {
            rest.trim_start()
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .ok()
        })
        .unwrap_or(0)
}

fn behavior_response(behavior: &ModelBehavior, turns: &[ChatTurn]) -> String {
    let prompt = turns
        .iter()
        .rev()
        .find(|t| matches!(t.role, crate::adapter::ChatRole::User))
        .map(|t| t.content.as_str())
        .unwrap_or("");

    if turns.iter().any(|t| t.image.is_some()) {
        return if behavior.vision {
            "Red.".to_string()
        } else {
            "I see a small square.".to_string()
        };
    }
    if prompt.contains("JSON-RPC") {
        return if behavior.speaks_jsonrpc {
            format!(
                "{{\"jsonrpc\": \"2.0\", \"id\": {}, \"result\": {{}}}}",
                prompt_rpc_id(prompt)
            )
        } else {
            "Sure! I would reply with a list of available tools.".to_string()
        };
    }
    if prompt.contains("Which single tool") {
        return if behavior.smart {
            "read_file".to_string()
        } else {
            "write_file".to_string()
        };
    }
    if prompt.contains("session token") {
        return if behavior.smart {
            "The token was ZEPHYR-31.".to_string()
        } else {
            "I don't recall any token.".to_string()
        };
    }
    if prompt.contains("Complete this Python") {
        return if behavior.smart {
            "    return a + b".to_string()
        } else {
            "pass".to_string()
        };
    }
    if prompt.contains("bug") && prompt.contains("Python") {
        return if behavior.smart {
            "The range ends at len(xs) + 1, an off-by-one going out of bounds.".to_string()
        } else {
            "It looks correct to me.".to_string()
        };
    }
    if prompt.contains("Write a Python function") {
        return if behavior.smart {
            GOOD_PYTHON_ANSWER.to_string()
        } else {
            "You could split the string and multiply by the unit.".to_string()
        };
    }
    "OK".to_string()
}

/// A scriptable adapter: per-model behaviours, one-shot error queues and
/// a call log with virtual-time stamps.
#[derive(Default)]
pub struct MockAdapter {
    models: Mutex<Vec<String>>,
    behaviors: Mutex<HashMap<String, ModelBehavior>>,
    chat_errors: Mutex<HashMap<String, VecDeque<AdapterError>>>,
    list_errors: Mutex<VecDeque<AdapterError>>,
    chat_calls: Mutex<Vec<(String, tokio::time::Instant)>>,
}

impl MockAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_model(&self, id: &str, behavior: ModelBehavior) {
        let mut models = self.models.lock().unwrap();
        if !models.iter().any(|m| m == id) {
            models.push(id.to_string());
        }
        self.behaviors
            .lock()
            .unwrap()
            .insert(id.to_string(), behavior);
    }

    pub fn remove_model(&self, id: &str) {
        self.models.lock().unwrap().retain(|m| m != id);
    }

    pub fn set_behavior(&self, id: &str, behavior: ModelBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(id.to_string(), behavior);
    }

    /// Queue a one-shot error for the next chat call against a model.
    pub fn push_chat_error(&self, id: &str, error: AdapterError) {
        self.chat_errors
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn push_list_error(&self, error: AdapterError) {
        self.list_errors.lock().unwrap().push_back(error);
    }

    pub fn chat_calls(&self) -> Vec<(String, tokio::time::Instant)> {
        self.chat_calls.lock().unwrap().clone()
    }

    fn behavior(&self, model: &str) -> Option<ModelBehavior> {
        self.behaviors.lock().unwrap().get(model).cloned()
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::OpenaiCompatible
    }

    async fn list_models(&self, _endpoint: &ProviderEndpoint) -> AdapterResult<Vec<ListedModel>> {
        if let Some(error) = self.list_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(self
            .models
            .lock()
            .unwrap()
            .iter()
            .map(|id| ListedModel::bare(id.clone()))
            .collect())
    }

    async fn chat(
        &self,
        _endpoint: &ProviderEndpoint,
        model: &str,
        turns: &[ChatTurn],
        options: &ChatOptions,
    ) -> AdapterResult<ChatOutcome> {
        self.chat_calls
            .lock()
            .unwrap()
            .push((model.to_string(), tokio::time::Instant::now()));

        if let Some(error) = self
            .chat_errors
            .lock()
            .unwrap()
            .get_mut(model)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let Some(behavior) = self.behavior(model) else {
            return Err(AdapterError::NotFound(format!("no such model: {}", model)));
        };

        let tool_calls = if !options.tools.is_empty() && behavior.tools {
            vec![ToolCall {
                id: Some("call_1".to_string()),
                name: options.tools[0].name.clone(),
                arguments: serde_json::json!({"location": "Paris"}),
            }]
        } else {
            Vec::new()
        };
        let content = if tool_calls.is_empty() {
            behavior_response(&behavior, turns)
        } else {
            String::new()
        };

        Ok(ChatOutcome {
            content,
            tool_calls,
            usage: Some(TokenUsage {
                input_tokens: 20,
                output_tokens: 10,
            }),
            first_token: Some(Duration::from_millis(behavior.latency_ms / 2)),
            total: Duration::from_millis(behavior.latency_ms),
            hints: RateLimitHints {
                requests_remaining: Some(99),
                ..Default::default()
            },
        })
    }

    async fn chat_stream(
        &self,
        _endpoint: &ProviderEndpoint,
        model: &str,
        _turns: &[ChatTurn],
        _options: &ChatOptions,
    ) -> AdapterResult<mpsc::Receiver<StreamItem>> {
        let Some(behavior) = self.behavior(model) else {
            return Err(AdapterError::NotFound(format!("no such model: {}", model)));
        };
        if !behavior.streams {
            return Err(AdapterError::unsupported("streaming"));
        }
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for (seq, delta) in ["1\n", "2\n", "3\n"].iter().enumerate() {
                if tx
                    .send(StreamItem::Chunk {
                        seq,
                        delta: delta.to_string(),
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            let _ = tx
                .send(StreamItem::End {
                    usage: None,
                    first_token: Some(Duration::from_millis(50)),
                    total: Duration::from_millis(behavior.latency_ms),
                    hints: RateLimitHints::default(),
                })
                .await;
        });
        Ok(rx)
    }

    async fn embed(
        &self,
        _endpoint: &ProviderEndpoint,
        model: &str,
        texts: &[String],
    ) -> AdapterResult<EmbeddingOutcome> {
        let Some(behavior) = self.behavior(model) else {
            return Err(AdapterError::NotFound(format!("no such model: {}", model)));
        };
        if !behavior.embeds {
            return Err(AdapterError::unsupported("embeddings"));
        }
        Ok(EmbeddingOutcome {
            vectors: texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect(),
            usage: None,
            hints: RateLimitHints::default(),
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

/// A fully wired engine over in-memory stores and the mock adapter.
pub struct Harness {
    pub store: Arc<CatalogStore>,
    pub audit: Arc<AuditLog>,
    pub bus: Arc<EventBus>,
    pub engine: Arc<VerificationEngine>,
    pub mock: Arc<MockAdapter>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(CatalogStore::in_memory("test-secret").unwrap());
        let audit = Arc::new(AuditLog::in_memory("test-secret").unwrap());
        let registry = Arc::new(ModelRegistry::new(store.clone()));
        let bus = Arc::new(EventBus::default());
        // Generous defaults keep virtual-time tests from throttling.
        let governor = Arc::new(RateGovernor::new(ProviderLimits {
            rpm: 60_000,
            burst: 1_000,
            max_concurrency: 32,
        }));
        let mock = MockAdapter::new();
        let engine = Arc::new(VerificationEngine::new(
            registry,
            bus.clone(),
            governor,
            audit.clone(),
            Arc::new(NoEnrichment),
            config,
        ));
        engine.override_adapter(AdapterKind::OpenaiCompatible, mock.clone());
        Self {
            store,
            audit,
            bus,
            engine,
            mock,
        }
    }

    /// Insert a provider with generous declared limits, returning it.
    pub fn add_provider(&self, id: &str) -> ProviderRecord {
        let provider = ProviderRecord {
            id: id.to_string(),
            name: id.to_string(),
            base_url: "https://stub.example.com".to_string(),
            auth_secret: "k".to_string(),
            kind: AdapterKind::OpenaiCompatible,
            discovery: DiscoveryMode::Endpoint,
            static_models: Vec::new(),
            declared_rpm: Some(60_000),
            declared_burst: Some(1_000),
            max_concurrency: Some(32),
            created_at: chrono::Utc::now(),
        };
        self.store.upsert_provider(&provider).unwrap();
        provider
    }
}
