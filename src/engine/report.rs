//! Verification reports.
//!
//! Two artifacts per full verification: a human Markdown report (one
//! section per model with sub-score tables, classifications, issues and
//! the latest rate-limit/pricing snapshots) and a machine JSON report
//! mirroring the score snapshots plus sorted index lists. The JSON schema
//! is stable: parse and re-serialise is byte-equal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::catalog::{
    feature_bits, AxisScores, CatalogStore, LimitSnapshot, PricingSample, QueryFilter,
};
use crate::error::Result;
use crate::probe::SUITE_VERSION;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueReport {
    pub kind: String,
    pub severity: String,
    pub description: String,
    pub workaround: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReport {
    pub model_id: String,
    pub provider_id: String,
    pub vendor_id: String,
    pub display_name: Option<String>,
    pub overall: u8,
    pub axes: AxisScores,
    pub classifications: Vec<String>,
    pub features: Vec<String>,
    pub pricing: Option<PricingSample>,
    pub limits: Option<LimitSnapshot>,
    pub issues: Vec<IssueReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderReport {
    pub provider_id: String,
    pub name: String,
    pub reachable: bool,
    pub model_count: usize,
    pub open_issues: usize,
}

/// Sorted vendor-id index lists for downstream systems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportIndexes {
    pub by_overall: Vec<String>,
    pub by_coding: Vec<String>,
    pub by_responsiveness: Vec<String>,
    pub by_cost: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonReport {
    pub generated_at: DateTime<Utc>,
    pub suite_version: u32,
    pub providers: Vec<ProviderReport>,
    pub models: Vec<ModelReport>,
    pub indexes: ReportIndexes,
}

/// Tie-breaks for ordering by overall: coding, reliability, inverse
/// cost, then vendor id.
fn cmp_overall(a: &ModelReport, b: &ModelReport) -> Ordering {
    b.overall
        .cmp(&a.overall)
        .then_with(|| b.axes.coding.total_cmp(&a.axes.coding))
        .then_with(|| b.axes.reliability.total_cmp(&a.axes.reliability))
        .then_with(|| b.axes.cost_effectiveness.total_cmp(&a.axes.cost_effectiveness))
        .then_with(|| a.vendor_id.cmp(&b.vendor_id))
}

fn sorted_index<F>(models: &[ModelReport], key: F) -> Vec<String>
where
    F: Fn(&ModelReport) -> f64,
{
    let mut sorted: Vec<&ModelReport> = models.iter().collect();
    sorted.sort_by(|a, b| {
        key(b)
            .total_cmp(&key(a))
            .then_with(|| a.vendor_id.cmp(&b.vendor_id))
    });
    sorted.iter().map(|m| m.vendor_id.clone()).collect()
}

pub struct ReportBuilder {
    store: Arc<CatalogStore>,
}

impl ReportBuilder {
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self { store }
    }

    /// Assemble the JSON report from the committed catalog state.
    pub fn build(&self) -> Result<JsonReport> {
        let mut models = Vec::new();
        let mut providers = Vec::new();

        for provider in self.store.list_providers()? {
            let records = self.store.models_for_provider(&provider.id, false)?;
            let provider_issues = self.store.open_issues(Some(&provider.id))?;
            providers.push(ProviderReport {
                provider_id: provider.id.clone(),
                name: provider.name.clone(),
                reachable: !provider_issues
                    .iter()
                    .any(|i| i.kind == "provider-unreachable" || i.kind == "auth-failed"),
                model_count: records.len(),
                open_issues: provider_issues.len(),
            });

            for record in records {
                let Some(snapshot) = self.store.get_snapshot(&record.id)? else {
                    continue;
                };
                let issues = self
                    .store
                    .open_issues(Some(&record.id))?
                    .into_iter()
                    .map(|issue| IssueReport {
                        kind: issue.kind,
                        severity: issue.severity.as_str().to_string(),
                        description: issue.description,
                        workaround: issue.workaround,
                    })
                    .collect();
                models.push(ModelReport {
                    model_id: record.id.clone(),
                    provider_id: provider.id.clone(),
                    vendor_id: record.vendor_id.clone(),
                    display_name: record.display_name.clone(),
                    overall: snapshot.overall,
                    axes: snapshot.axes,
                    classifications: snapshot
                        .classifications
                        .iter()
                        .map(|c| c.as_str().to_string())
                        .collect(),
                    features: feature_bits::names(snapshot.features)
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                    pricing: self.store.latest_pricing(&record.id)?,
                    limits: self.store.latest_limit(&record.id)?,
                    issues,
                });
            }
        }

        models.sort_by(cmp_overall);
        let indexes = ReportIndexes {
            by_overall: models.iter().map(|m| m.vendor_id.clone()).collect(),
            by_coding: sorted_index(&models, |m| m.axes.coding),
            by_responsiveness: sorted_index(&models, |m| m.axes.responsiveness),
            // Cheapest first: highest cost-effectiveness first.
            by_cost: sorted_index(&models, |m| m.axes.cost_effectiveness),
        };

        Ok(JsonReport {
            generated_at: Utc::now(),
            suite_version: SUITE_VERSION,
            providers,
            models,
            indexes,
        })
    }

    /// Query-shaped view for external callers (same rows as `build`, but
    /// filtered).
    pub fn filtered(&self, filter: &QueryFilter) -> Result<Vec<ModelReport>> {
        let mut out = Vec::new();
        for (record, snapshot) in self.store.query(filter)? {
            out.push(ModelReport {
                model_id: record.id.clone(),
                provider_id: record.provider_id.clone(),
                vendor_id: record.vendor_id.clone(),
                display_name: record.display_name.clone(),
                overall: snapshot.overall,
                axes: snapshot.axes,
                classifications: snapshot
                    .classifications
                    .iter()
                    .map(|c| c.as_str().to_string())
                    .collect(),
                features: feature_bits::names(snapshot.features)
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                pricing: self.store.latest_pricing(&record.id)?,
                limits: self.store.latest_limit(&record.id)?,
                issues: Vec::new(),
            });
        }
        Ok(out)
    }
}

/// Render the human Markdown report.
pub fn to_markdown(report: &JsonReport) -> String {
    let mut md = String::new();
    md.push_str("# Model Verification Report\n\n");
    md.push_str(&format!(
        "Generated: {}  \nSuite version: {}\n\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.suite_version
    ));

    md.push_str("## Providers\n\n");
    md.push_str("| Provider | Reachable | Models | Open issues |\n");
    md.push_str("|---|---|---:|---:|\n");
    for provider in &report.providers {
        md.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            provider.name,
            if provider.reachable { "yes" } else { "no" },
            provider.model_count,
            provider.open_issues
        ));
    }
    md.push('\n');

    for model in &report.models {
        let title = model.display_name.as_deref().unwrap_or(&model.vendor_id);
        md.push_str(&format!("## {} (`{}`)\n\n", title, model.vendor_id));
        md.push_str(&format!("Overall usability: **{}**/100\n\n", model.overall));

        md.push_str("| Axis | Score |\n|---|---:|\n");
        let axes = &model.axes;
        for (name, value) in [
            ("Coding capability", axes.coding),
            ("Responsiveness", axes.responsiveness),
            ("Reliability", axes.reliability),
            ("Feature richness", axes.feature_richness),
            ("Cost effectiveness", axes.cost_effectiveness),
            ("Recency", axes.recency),
        ] {
            md.push_str(&format!("| {} | {:.1} |\n", name, value));
        }
        md.push('\n');

        if !model.classifications.is_empty() {
            md.push_str(&format!(
                "Classifications: {}\n\n",
                model.classifications.join(", ")
            ));
        }
        if !model.features.is_empty() {
            md.push_str(&format!("Features: {}\n\n", model.features.join(", ")));
        }
        if let Some(pricing) = &model.pricing {
            md.push_str(&format!(
                "Pricing: ${:.2}/M input, ${:.2}/M output\n\n",
                pricing.input_per_mtok, pricing.output_per_mtok
            ));
        }
        if let Some(limits) = &model.limits {
            md.push_str(&format!(
                "Rate limits: declared rpm {}, remaining {}\n\n",
                limits
                    .declared_rpm
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "unknown".into()),
                limits
                    .remaining
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "unknown".into()),
            ));
        }
        if !model.issues.is_empty() {
            md.push_str("### Issues\n\n");
            md.push_str("| Severity | Kind | Description | Workaround |\n|---|---|---|---|\n");
            for issue in &model.issues {
                md.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    issue.severity,
                    issue.kind,
                    issue.description,
                    issue.workaround.as_deref().unwrap_or("—")
                ));
            }
            md.push('\n');
        }
    }

    md
}
