//! Model registry: read-through/write-through façade over the catalog
//! store with a process-local snapshot cache.
//!
//! The cache is read-mostly; `record_run` refreshes the cached entry only
//! after the store transaction commits, so readers observe either the old
//! snapshot or the committed new one, never an intermediate state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::adapter::ListedModel;
use crate::error::Result;

use super::store::{CatalogStore, DiscoveryDiff, QueryFilter};
use super::types::{Issue, ModelRecord, ProviderRecord, ScoreSnapshot, VerificationRun};

pub struct ModelRegistry {
    store: Arc<CatalogStore>,
    cache: RwLock<HashMap<String, ScoreSnapshot>>,
}

impl ModelRegistry {
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<CatalogStore> {
        &self.store
    }

    /// Diff discovered models against the last known set.
    pub fn upsert_models_for_provider(
        &self,
        provider_id: &str,
        discovered: &[ListedModel],
    ) -> Result<DiscoveryDiff> {
        self.store
            .upsert_models_for_provider(provider_id, discovered)
    }

    /// Transactionally record a run, replacing the model's snapshot.
    /// Returns the previous and new snapshots so the caller can compute
    /// deltas.
    pub fn record_run(
        &self,
        run: &VerificationRun,
        snapshot: &ScoreSnapshot,
        issues: &[Issue],
    ) -> Result<(Option<ScoreSnapshot>, ScoreSnapshot)> {
        let previous = self.store.record_run(run, snapshot, issues)?;
        // Write-through after commit.
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.insert(snapshot.model_id.clone(), snapshot.clone());
        Ok((previous, snapshot.clone()))
    }

    /// Current snapshot for a model, read through the cache.
    pub fn snapshot(&self, model_id: &str) -> Result<Option<ScoreSnapshot>> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(snapshot) = cache.get(model_id) {
                return Ok(Some(snapshot.clone()));
            }
        }
        let loaded = self.store.get_snapshot(model_id)?;
        if let Some(snapshot) = &loaded {
            let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
            cache.insert(model_id.to_string(), snapshot.clone());
        }
        Ok(loaded)
    }

    /// Multi-dimensional catalog query; always answered from the store so
    /// filters and ordering see committed state.
    pub fn query(&self, filter: &QueryFilter) -> Result<Vec<(ModelRecord, ScoreSnapshot)>> {
        self.store.query(filter)
    }

    pub fn provider(&self, provider_id: &str) -> Result<Option<ProviderRecord>> {
        self.store.get_provider(provider_id)
    }

    pub fn models_for_provider(
        &self,
        provider_id: &str,
        include_withdrawn: bool,
    ) -> Result<Vec<ModelRecord>> {
        self.store.models_for_provider(provider_id, include_withdrawn)
    }

    /// Drop a model's cached snapshot (tests and provider deletion).
    pub fn invalidate(&self, model_id: &str) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.remove(model_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterKind, RateLimitHints, TokenUsage};
    use crate::catalog::{AxisScores, DiscoveryMode, RunTrigger};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn registry() -> ModelRegistry {
        let store = Arc::new(CatalogStore::in_memory("secret").unwrap());
        store
            .upsert_provider(&ProviderRecord {
                id: "p1".into(),
                name: "P".into(),
                base_url: "https://api.example.com".into(),
                auth_secret: "k".into(),
                kind: AdapterKind::OpenaiCompatible,
                discovery: DiscoveryMode::Endpoint,
                static_models: Vec::new(),
                declared_rpm: None,
                declared_burst: None,
                max_concurrency: None,
                created_at: Utc::now(),
            })
            .unwrap();
        ModelRegistry::new(store)
    }

    fn snapshot(model_id: &str, run_id: &str, overall: u8) -> ScoreSnapshot {
        ScoreSnapshot {
            model_id: model_id.into(),
            source_run_id: run_id.into(),
            overall,
            axes: AxisScores::default(),
            classifications: BTreeSet::new(),
            features: 0,
            updated_at: Utc::now(),
        }
    }

    fn run(model_id: &str, run_id: &str) -> VerificationRun {
        VerificationRun {
            id: run_id.into(),
            model_id: model_id.into(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            trigger: RunTrigger::Manual,
            suite_version: 1,
            verdicts: Vec::new(),
            usage: TokenUsage::default(),
            limit_hints: RateLimitHints::default(),
            pricing: None,
        }
    }

    #[test]
    fn test_record_run_returns_previous_and_new() {
        let registry = registry();
        let diff = registry
            .upsert_models_for_provider("p1", &[ListedModel::bare("m")])
            .unwrap();
        let model_id = diff.added[0].id.clone();

        let (previous, new) = registry
            .record_run(&run(&model_id, "r1"), &snapshot(&model_id, "r1", 70), &[])
            .unwrap();
        assert!(previous.is_none());
        assert_eq!(new.overall, 70);

        let (previous, new) = registry
            .record_run(&run(&model_id, "r2"), &snapshot(&model_id, "r2", 55), &[])
            .unwrap();
        assert_eq!(previous.unwrap().overall, 70);
        assert_eq!(new.overall, 55);

        // Read-your-writes through the cache.
        let cached = registry.snapshot(&model_id).unwrap().unwrap();
        assert_eq!(cached.source_run_id, "r2");
    }

    #[test]
    fn test_snapshot_read_through() {
        let registry = registry();
        let diff = registry
            .upsert_models_for_provider("p1", &[ListedModel::bare("m")])
            .unwrap();
        let model_id = diff.added[0].id.clone();
        assert!(registry.snapshot(&model_id).unwrap().is_none());

        registry
            .record_run(&run(&model_id, "r1"), &snapshot(&model_id, "r1", 70), &[])
            .unwrap();
        registry.invalidate(&model_id);
        // Cache miss falls through to the store.
        assert_eq!(registry.snapshot(&model_id).unwrap().unwrap().overall, 70);
    }
}
