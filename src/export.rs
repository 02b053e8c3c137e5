//! Export contract for external agent-config generators.
//!
//! `export_for_agent` is a pure function of committed catalog state: it
//! assembles a deterministic document (stable field order, sorted model
//! lists, no timestamps) that downstream generators turn into OpenCode /
//! Crush / Claude Code configuration files. The document hash is stable
//! across runs of the same build for a fixed catalog.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::catalog::{CatalogStore, QueryFilter};
use crate::engine::report::ReportBuilder;
use crate::error::{Error, Result};

/// Coding agents with known configuration surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    Opencode,
    Crush,
    ClaudeCode,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opencode => "opencode",
            Self::Crush => "crush",
            Self::ClaudeCode => "claude-code",
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        match text {
            "opencode" => Ok(Self::Opencode),
            "crush" => Ok(Self::Crush),
            "claude-code" => Ok(Self::ClaudeCode),
            other => Err(Error::config(format!("unknown agent kind: {}", other))),
        }
    }
}

/// One model entry in an export document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportModel {
    pub provider_id: String,
    pub vendor_id: String,
    pub display_name: Option<String>,
    pub overall: u8,
    pub coding: f64,
    pub responsiveness: f64,
    pub classifications: Vec<String>,
    pub features: Vec<String>,
    pub input_per_mtok: Option<f64>,
    pub output_per_mtok: Option<f64>,
}

/// The export document. Version bumps on schema changes only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub agent: String,
    pub schema_version: u32,
    pub models: Vec<ExportModel>,
}

pub const EXPORT_SCHEMA_VERSION: u32 = 1;

/// Assemble the export document for an agent kind over a catalog filter.
pub fn export_for_agent(
    store: &Arc<CatalogStore>,
    agent: AgentKind,
    filter: &QueryFilter,
) -> Result<String> {
    let builder = ReportBuilder::new(store.clone());
    let mut models: Vec<ExportModel> = builder
        .filtered(filter)?
        .into_iter()
        .map(|m| ExportModel {
            provider_id: m.provider_id,
            vendor_id: m.vendor_id,
            display_name: m.display_name,
            overall: m.overall,
            coding: m.axes.coding,
            responsiveness: m.axes.responsiveness,
            classifications: m.classifications,
            features: m.features,
            input_per_mtok: m.pricing.as_ref().map(|p| p.input_per_mtok),
            output_per_mtok: m.pricing.as_ref().map(|p| p.output_per_mtok),
        })
        .collect();
    // Query ordering already applies tie-breaks; a final sort keyed on
    // (overall, vendor) guards determinism regardless of filter order.
    models.sort_by(|a, b| {
        b.overall
            .cmp(&a.overall)
            .then_with(|| a.vendor_id.cmp(&b.vendor_id))
    });

    let document = ExportDocument {
        agent: agent.as_str().to_string(),
        schema_version: EXPORT_SCHEMA_VERSION,
        models,
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

/// Stable content hash of an export document.
pub fn document_hash(document: &str) -> String {
    hex::encode(Sha256::digest(document.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_kind_roundtrip() {
        for kind in [AgentKind::Opencode, AgentKind::Crush, AgentKind::ClaudeCode] {
            assert_eq!(AgentKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(AgentKind::parse("vim").is_err());
    }

    #[test]
    fn test_empty_catalog_exports_deterministically() {
        let store = Arc::new(CatalogStore::in_memory("secret").unwrap());
        let a = export_for_agent(&store, AgentKind::Opencode, &QueryFilter::default()).unwrap();
        let b = export_for_agent(&store, AgentKind::Opencode, &QueryFilter::default()).unwrap();
        assert_eq!(a, b);
        assert_eq!(document_hash(&a), document_hash(&b));
        let parsed: ExportDocument = serde_json::from_str(&a).unwrap();
        assert_eq!(parsed.agent, "opencode");
        assert!(parsed.models.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_catalog_hash_is_stable() {
        use crate::catalog::RunTrigger;
        use crate::engine::{CancelToken, RunOutcome};
        use crate::testutil::{Harness, ModelBehavior};

        let harness = Harness::new();
        let provider = harness.add_provider("p1");
        harness.mock.add_model("x-fast", ModelBehavior::default());

        let cancel = CancelToken::new();
        let summary = harness
            .engine
            .verify_provider(&provider, RunTrigger::Manual, &cancel)
            .await
            .unwrap();
        assert!(matches!(
            summary.runs[0].outcome,
            RunOutcome::Completed { .. }
        ));

        let a =
            export_for_agent(&harness.store, AgentKind::Opencode, &QueryFilter::default())
                .unwrap();
        let b =
            export_for_agent(&harness.store, AgentKind::Opencode, &QueryFilter::default())
                .unwrap();
        assert_eq!(document_hash(&a), document_hash(&b));

        let parsed: ExportDocument = serde_json::from_str(&a).unwrap();
        assert_eq!(parsed.models.len(), 1);
        assert_eq!(parsed.models[0].vendor_id, "x-fast");
        assert!(parsed.models[0].classifications.contains(&"coding".to_string()));
    }
}
