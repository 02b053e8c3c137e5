//! TOML configuration loading and validation.
//!
//! Invalid configuration is a typed error the driver maps to exit code 2.
//! Auth values are opaque secret references: `env:VAR` reads the named
//! environment variable at resolution time, anything else is taken
//! literally.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapter::AdapterKind;
use crate::catalog::{DiscoveryMode, OverlapPolicy, ProviderRecord, TargetSelector};
use crate::error::{Error, Result};
use crate::governor::ProviderLimits;
use crate::scheduler::cadence_schedule;

fn default_timeout_secs() -> u64 {
    60
}

fn default_concurrency() -> usize {
    8
}

fn default_score_delta() -> f64 {
    5.0
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("catalog.db")
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("audit.db")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    pub rpm: Option<u32>,
    pub burst: Option<u32>,
    pub max_concurrency: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Display identifier; doubles as the stable provider id.
    pub name: String,
    /// Absolute base URL.
    pub endpoint: String,
    /// Opaque secret reference.
    pub auth: String,
    #[serde(default)]
    pub adapter: AdapterKind,
    /// When present, probe only these models instead of discovering.
    #[serde(default)]
    pub models: Option<Vec<String>>,
    #[serde(default)]
    pub rate_limits: Option<RateLimitConfig>,
}

impl ProviderConfig {
    /// Resolve the opaque auth reference to the secret itself.
    pub fn resolve_auth(&self) -> Result<String> {
        if let Some(var) = self.auth.strip_prefix("env:") {
            std::env::var(var).map_err(|_| {
                Error::config(format!(
                    "provider '{}': environment variable {} is not set",
                    self.name, var
                ))
            })
        } else {
            Ok(self.auth.clone())
        }
    }

    /// Build the catalog record for this provider.
    pub fn to_record(&self) -> Result<ProviderRecord> {
        let discovery = match &self.models {
            Some(models) if !models.is_empty() => DiscoveryMode::Static,
            _ => DiscoveryMode::Endpoint,
        };
        Ok(ProviderRecord {
            id: self.name.clone(),
            name: self.name.clone(),
            base_url: self.endpoint.clone(),
            auth_secret: self.resolve_auth()?,
            kind: self.adapter,
            discovery,
            static_models: self.models.clone().unwrap_or_default(),
            declared_rpm: self.rate_limits.as_ref().and_then(|r| r.rpm),
            declared_burst: self.rate_limits.as_ref().and_then(|r| r.burst),
            max_concurrency: self.rate_limits.as_ref().and_then(|r| r.max_concurrency),
            created_at: Utc::now(),
        })
    }

    pub fn limits(&self) -> ProviderLimits {
        let defaults = ProviderLimits::default();
        match &self.rate_limits {
            Some(limits) => ProviderLimits {
                rpm: limits.rpm.unwrap_or(defaults.rpm),
                burst: limits.burst.unwrap_or(defaults.burst),
                max_concurrency: limits.max_concurrency.unwrap_or(defaults.max_concurrency),
            },
            None => defaults,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Default adapter timeout, seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Global work-pool size.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Overall-score delta that triggers `score-changed`.
    #[serde(default = "default_score_delta")]
    pub score_delta_threshold: f64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
            score_delta_threshold: default_score_delta(),
        }
    }
}

impl GlobalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    pub name: String,
    pub cadence: String,
    #[serde(default = "default_targets")]
    pub targets: TargetSelector,
    #[serde(default)]
    pub overlap: OverlapPolicy,
}

fn default_targets() -> TargetSelector {
    TargetSelector::All
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExportAgentConfig {
    pub kind: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub default_path: Option<PathBuf>,
    #[serde(default)]
    pub agents: Vec<ExportAgentConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscriptionConfig {
    pub name: String,
    #[serde(default)]
    pub kinds: Vec<String>,
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default)]
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EventConfig {
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,
    #[serde(default = "default_audit_path")]
    pub audit_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
            audit_path: default_audit_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VerifierConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
    #[serde(default)]
    pub regenerate_configurations_on_score_changes: bool,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub event: EventConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl VerifierConfig {
    pub fn from_str(text: &str) -> Result<Self> {
        let config: VerifierConfig =
            toml::from_str(text).map_err(|e| Error::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(&path).map_err(|e| {
            Error::config(format!(
                "cannot read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            return Err(Error::config("at least one provider is required"));
        }

        let mut names = HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(Error::config("provider name must not be empty"));
            }
            if !names.insert(provider.name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate provider name: {}",
                    provider.name
                )));
            }
            let url = reqwest::Url::parse(&provider.endpoint).map_err(|_| {
                Error::config(format!(
                    "provider '{}': endpoint is not an absolute URL: {}",
                    provider.name, provider.endpoint
                ))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::config(format!(
                    "provider '{}': endpoint must be http(s)",
                    provider.name
                )));
            }
            if provider.auth.trim().is_empty() {
                return Err(Error::config(format!(
                    "provider '{}': auth must not be empty",
                    provider.name
                )));
            }
        }

        let mut schedule_names = HashSet::new();
        for schedule in &self.schedules {
            if !schedule_names.insert(schedule.name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate schedule name: {}",
                    schedule.name
                )));
            }
            cadence_schedule(&schedule.cadence)?;
        }

        for agent in &self.export.agents {
            crate::export::AgentKind::parse(&agent.kind)?;
        }

        if self.global.concurrency == 0 {
            return Err(Error::config("global.concurrency must be positive"));
        }
        if self.global.timeout_secs == 0 {
            return Err(Error::config("global.timeout_secs must be positive"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [[providers]]
        name = "stub"
        endpoint = "https://api.example.com"
        auth = "k"
    "#;

    #[test]
    fn test_minimal_config() {
        let config = VerifierConfig::from_str(MINIMAL).unwrap();
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].adapter, AdapterKind::OpenaiCompatible);
        assert_eq!(config.global.timeout_secs, 60);
        assert_eq!(config.global.score_delta_threshold, 5.0);
    }

    #[test]
    fn test_full_config() {
        let text = r#"
            regenerate_configurations_on_score_changes = true

            [[providers]]
            name = "openai"
            endpoint = "https://api.openai.com"
            auth = "env:OPENAI_API_KEY"
            adapter = "openai-compatible"
            models = ["gpt-4o", "gpt-4o-mini"]

            [providers.rate_limits]
            rpm = 120
            burst = 20
            max_concurrency = 6

            [global]
            timeout_secs = 30
            concurrency = 4
            score_delta_threshold = 10.0

            [[schedules]]
            name = "hourly-all"
            cadence = "hourly"
            targets = { kind = "all" }
            overlap = "queue"

            [export]
            default_path = "exports"

            [[export.agents]]
            kind = "opencode"
            path = "exports/opencode.json"

            [[event.subscriptions]]
            name = "webhook"
            kinds = ["score-changed"]
        "#;
        let config = VerifierConfig::from_str(text).unwrap();
        let provider = &config.providers[0];
        assert_eq!(provider.models.as_ref().unwrap().len(), 2);
        assert_eq!(provider.limits().rpm, 120);
        assert_eq!(config.schedules[0].targets, TargetSelector::All);
        assert_eq!(config.schedules[0].overlap, OverlapPolicy::Queue);
        assert!(config.regenerate_configurations_on_score_changes);
        assert_eq!(config.event.subscriptions[0].kinds, vec!["score-changed"]);
    }

    #[test]
    fn test_static_models_select_static_discovery() {
        let text = r#"
            [[providers]]
            name = "pinned"
            endpoint = "https://api.example.com"
            auth = "k"
            models = ["x"]
        "#;
        let config = VerifierConfig::from_str(text).unwrap();
        let record = config.providers[0].to_record().unwrap();
        assert_eq!(record.discovery, DiscoveryMode::Static);
        assert_eq!(record.static_models, vec!["x"]);
    }

    #[test]
    fn test_rejects_bad_configs() {
        assert!(VerifierConfig::from_str("").is_err());

        let relative = r#"
            [[providers]]
            name = "p"
            endpoint = "not-a-url"
            auth = "k"
        "#;
        assert!(VerifierConfig::from_str(relative).is_err());

        let duplicate = r#"
            [[providers]]
            name = "p"
            endpoint = "https://a.example.com"
            auth = "k"

            [[providers]]
            name = "p"
            endpoint = "https://b.example.com"
            auth = "k"
        "#;
        assert!(VerifierConfig::from_str(duplicate).is_err());

        let bad_cadence = format!(
            "{}\n[[schedules]]\nname = \"s\"\ncadence = \"sometimes\"\n",
            MINIMAL
        );
        assert!(VerifierConfig::from_str(&bad_cadence).is_err());

        let bad_agent = format!(
            "{}\n[[export.agents]]\nkind = \"vim\"\npath = \"x.json\"\n",
            MINIMAL
        );
        assert!(VerifierConfig::from_str(&bad_agent).is_err());
    }

    #[test]
    fn test_auth_env_resolution() {
        let provider = ProviderConfig {
            name: "p".into(),
            endpoint: "https://api.example.com".into(),
            auth: "literal-key".into(),
            adapter: AdapterKind::OpenaiCompatible,
            models: None,
            rate_limits: None,
        };
        assert_eq!(provider.resolve_auth().unwrap(), "literal-key");

        let missing = ProviderConfig {
            auth: "env:VERIFIER_TEST_UNSET_VAR".into(),
            ..provider
        };
        assert!(missing.resolve_auth().is_err());
    }
}
