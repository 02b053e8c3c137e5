//! Encrypted SQLite catalog store.
//!
//! Owns all persisted state. Auth material and response evidence are
//! sealed with the store key before touching disk; the unencrypted `meta`
//! header carries only the schema version and the key-derivation salt.
//! Writes are transactional per run; `record_run` replaces the score
//! snapshot and returns the previous one so callers can compute deltas.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::adapter::{AdapterKind, DeclaredCaps, ListedModel};
use crate::error::{Error, Result};
use crate::probe::{Evidence, ProbeOutcome, ProbeReport};

use super::crypto::{generate_salt, Crypto};
use super::schema::{get_meta, initialize_schema, set_meta};
use super::types::*;

/// Result set of a discovery diff.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryDiff {
    pub added: Vec<ModelRecord>,
    pub withdrawn: Vec<ModelRecord>,
}

impl DiscoveryDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.withdrawn.is_empty()
    }
}

/// Numeric attribute to order query results by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    Overall,
    Coding,
    Responsiveness,
    Reliability,
    FeatureRichness,
    CostEffectiveness,
    Recency,
}

impl OrderBy {
    fn column(self) -> &'static str {
        match self {
            Self::Overall => "s.overall",
            Self::Coding => "s.coding",
            Self::Responsiveness => "s.responsiveness",
            Self::Reliability => "s.reliability",
            Self::FeatureRichness => "s.feature_richness",
            Self::CostEffectiveness => "s.cost_effectiveness",
            Self::Recency => "s.recency",
        }
    }
}

/// Multi-dimensional catalog query.
#[derive(Debug, Clone)]
pub struct QueryFilter {
    /// Every listed classification must be present.
    pub classifications: Vec<Classification>,
    pub min_overall: Option<u8>,
    /// Feature bits that must all be set; 0 disables the filter.
    pub features_all: u16,
    /// Maximum input cost per million tokens, from the latest sample.
    pub max_input_cost: Option<f64>,
    /// Minimum observed remaining quota, from the latest limit snapshot.
    pub min_remaining_quota: Option<u64>,
    /// Restrict to these provider ids; empty means all.
    pub providers: Vec<String>,
    pub order_by: OrderBy,
    pub descending: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            classifications: Vec::new(),
            min_overall: None,
            features_all: 0,
            max_input_cost: None,
            min_remaining_quota: None,
            providers: Vec::new(),
            order_by: OrderBy::Overall,
            descending: true,
            limit: None,
            offset: 0,
        }
    }
}

fn parse_dt(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

fn parse_opt_dt(text: Option<String>) -> Option<DateTime<Utc>> {
    text.as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// The encrypted catalog store.
pub struct CatalogStore {
    conn: Arc<Mutex<Connection>>,
    crypto: Crypto,
}

impl CatalogStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: impl AsRef<Path>, secret: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::store(e.to_string()))?;
        Self::from_connection(conn, secret)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory(secret: &str) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::store(e.to_string()))?;
        Self::from_connection(conn, secret)
    }

    fn from_connection(conn: Connection, secret: &str) -> Result<Self> {
        initialize_schema(&conn).map_err(|e| Error::store(e.to_string()))?;

        let salt = match get_meta(&conn, "store_salt").map_err(|e| Error::store(e.to_string()))? {
            Some(hex_salt) => {
                hex::decode(&hex_salt).map_err(|_| Error::Crypto("corrupt store salt".into()))?
            }
            None => {
                let salt = generate_salt();
                set_meta(&conn, "store_salt", &hex::encode(salt))
                    .map_err(|e| Error::store(e.to_string()))?;
                salt.to_vec()
            }
        };
        let crypto = Crypto::derive(secret.as_bytes(), &salt)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            crypto,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ==================== Providers ====================

    /// Insert or replace a provider. Providers are never mutated in place
    /// by callers; a changed configuration is a new version under the
    /// same id.
    pub fn upsert_provider(&self, provider: &ProviderRecord) -> Result<()> {
        let auth_cipher = self.crypto.seal_str(&provider.auth_secret)?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO providers (id, name, base_url, auth_cipher, kind, discovery,
                                    static_models, declared_rpm, declared_burst,
                                    max_concurrency, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                base_url = excluded.base_url,
                auth_cipher = excluded.auth_cipher,
                kind = excluded.kind,
                discovery = excluded.discovery,
                static_models = excluded.static_models,
                declared_rpm = excluded.declared_rpm,
                declared_burst = excluded.declared_burst,
                max_concurrency = excluded.max_concurrency",
            params![
                provider.id,
                provider.name,
                provider.base_url,
                auth_cipher,
                serde_json::to_value(provider.kind)?.as_str().unwrap_or("openai-compatible"),
                serde_json::to_value(provider.discovery)?.as_str().unwrap_or("endpoint"),
                serde_json::to_string(&provider.static_models)?,
                provider.declared_rpm,
                provider.declared_burst,
                provider.max_concurrency.map(|c| c as i64),
                provider.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn row_to_provider(&self, row: &Row<'_>) -> rusqlite::Result<ProviderRecord> {
        let auth_cipher: Vec<u8> = row.get("auth_cipher")?;
        let kind: String = row.get("kind")?;
        let discovery: String = row.get("discovery")?;
        let static_models: String = row.get("static_models")?;
        Ok(ProviderRecord {
            id: row.get("id")?,
            name: row.get("name")?,
            base_url: row.get("base_url")?,
            auth_secret: self.crypto.open_str(&auth_cipher).unwrap_or_default(),
            kind: serde_json::from_value(serde_json::Value::String(kind))
                .unwrap_or(AdapterKind::OpenaiCompatible),
            discovery: serde_json::from_value(serde_json::Value::String(discovery))
                .unwrap_or(DiscoveryMode::Endpoint),
            static_models: serde_json::from_str(&static_models).unwrap_or_default(),
            declared_rpm: row.get("declared_rpm")?,
            declared_burst: row.get("declared_burst")?,
            max_concurrency: row
                .get::<_, Option<i64>>("max_concurrency")?
                .map(|c| c as usize),
            created_at: parse_dt(&row.get::<_, String>("created_at")?),
        })
    }

    pub fn get_provider(&self, id: &str) -> Result<Option<ProviderRecord>> {
        let conn = self.lock();
        let provider = conn
            .query_row(
                "SELECT * FROM providers WHERE id = ?1",
                params![id],
                |row| self.row_to_provider(row),
            )
            .optional()?;
        Ok(provider)
    }

    pub fn list_providers(&self) -> Result<Vec<ProviderRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT * FROM providers ORDER BY name")?;
        let providers = stmt
            .query_map([], |row| self.row_to_provider(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(providers)
    }

    /// Delete a provider; models, runs and samples cascade.
    pub fn delete_provider(&self, id: &str) -> Result<bool> {
        let conn = self.lock();
        let rows = conn.execute("DELETE FROM providers WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // ==================== Models ====================

    fn row_to_model(row: &Row<'_>) -> rusqlite::Result<ModelRecord> {
        let caps: String = row.get("caps")?;
        let metadata: Option<String> = row.get("metadata")?;
        Ok(ModelRecord {
            id: row.get("id")?,
            provider_id: row.get("provider_id")?,
            vendor_id: row.get("vendor_id")?,
            display_name: row.get("display_name")?,
            discovered_at: parse_dt(&row.get::<_, String>("discovered_at")?),
            last_seen_at: parse_dt(&row.get::<_, String>("last_seen_at")?),
            withdrawn: row.get::<_, i64>("withdrawn")? != 0,
            caps: serde_json::from_str(&caps).unwrap_or_default(),
            release_date: row
                .get::<_, Option<String>>("release_date")?
                .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
            metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        })
    }

    /// Diff freshly discovered models against the last known set for a
    /// provider: new ids are inserted, present ids refresh last-seen and
    /// withdrawn status, absent ids are marked withdrawn.
    pub fn upsert_models_for_provider(
        &self,
        provider_id: &str,
        discovered: &[ListedModel],
    ) -> Result<DiscoveryDiff> {
        let now = Utc::now();
        let mut diff = DiscoveryDiff::default();

        let mut guard = self.lock();
        let tx = guard.transaction()?;
        {
            let existing: Vec<(String, String, bool)> = {
                let mut stmt = tx.prepare(
                    "SELECT id, vendor_id, withdrawn FROM models WHERE provider_id = ?1",
                )?;
                let rows = stmt
                    .query_map(params![provider_id], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)? != 0,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            };

            let discovered_ids: BTreeSet<&str> =
                discovered.iter().map(|m| m.id.as_str()).collect();

            for listed in discovered {
                match existing.iter().find(|(_, vendor, _)| vendor == &listed.id) {
                    None => {
                        let record = ModelRecord {
                            id: new_id(),
                            provider_id: provider_id.to_string(),
                            vendor_id: listed.id.clone(),
                            display_name: listed.display_name.clone(),
                            discovered_at: now,
                            last_seen_at: now,
                            withdrawn: false,
                            caps: listed.caps,
                            release_date: listed.created.map(|dt| dt.date_naive()),
                            metadata: None,
                        };
                        tx.execute(
                            "INSERT INTO models (id, provider_id, vendor_id, display_name,
                                                 discovered_at, last_seen_at, withdrawn, caps,
                                                 release_date, metadata)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, NULL)",
                            params![
                                record.id,
                                record.provider_id,
                                record.vendor_id,
                                record.display_name,
                                record.discovered_at.to_rfc3339(),
                                record.last_seen_at.to_rfc3339(),
                                serde_json::to_string(&record.caps)?,
                                record.release_date.map(|d| d.format("%Y-%m-%d").to_string()),
                            ],
                        )?;
                        diff.added.push(record);
                    }
                    Some((_, _, was_withdrawn)) => {
                        tx.execute(
                            "UPDATE models SET last_seen_at = ?1, withdrawn = 0, caps = ?2
                             WHERE provider_id = ?3 AND vendor_id = ?4",
                            params![
                                now.to_rfc3339(),
                                serde_json::to_string(&listed.caps)?,
                                provider_id,
                                listed.id,
                            ],
                        )?;
                        if *was_withdrawn {
                            // Reappearance counts as an addition for
                            // catalog-updated purposes.
                            if let Some(record) = tx
                                .query_row(
                                    "SELECT * FROM models
                                     WHERE provider_id = ?1 AND vendor_id = ?2",
                                    params![provider_id, listed.id],
                                    Self::row_to_model,
                                )
                                .optional()?
                            {
                                diff.added.push(record);
                            }
                        }
                    }
                }
            }

            for (_, vendor_id, was_withdrawn) in &existing {
                if !discovered_ids.contains(vendor_id.as_str()) && !was_withdrawn {
                    tx.execute(
                        "UPDATE models SET withdrawn = 1
                         WHERE provider_id = ?1 AND vendor_id = ?2",
                        params![provider_id, vendor_id],
                    )?;
                    if let Some(record) = tx
                        .query_row(
                            "SELECT * FROM models WHERE provider_id = ?1 AND vendor_id = ?2",
                            params![provider_id, vendor_id],
                            Self::row_to_model,
                        )
                        .optional()?
                    {
                        diff.withdrawn.push(record);
                    }
                }
            }
        }
        tx.commit()?;
        Ok(diff)
    }

    pub fn get_model(&self, id: &str) -> Result<Option<ModelRecord>> {
        let conn = self.lock();
        let model = conn
            .query_row(
                "SELECT * FROM models WHERE id = ?1",
                params![id],
                Self::row_to_model,
            )
            .optional()?;
        Ok(model)
    }

    pub fn models_for_provider(
        &self,
        provider_id: &str,
        include_withdrawn: bool,
    ) -> Result<Vec<ModelRecord>> {
        let conn = self.lock();
        let sql = if include_withdrawn {
            "SELECT * FROM models WHERE provider_id = ?1 ORDER BY vendor_id"
        } else {
            "SELECT * FROM models WHERE provider_id = ?1 AND withdrawn = 0 ORDER BY vendor_id"
        };
        let mut stmt = conn.prepare(sql)?;
        let models = stmt
            .query_map(params![provider_id], Self::row_to_model)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(models)
    }

    /// Apply enrichment metadata to a model.
    pub fn update_model_enrichment(
        &self,
        model_id: &str,
        display_name: Option<&str>,
        release_date: Option<NaiveDate>,
        caps: &DeclaredCaps,
        metadata: Option<&serde_json::Value>,
    ) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE models SET
                display_name = COALESCE(?1, display_name),
                release_date = COALESCE(?2, release_date),
                caps = ?3,
                metadata = COALESCE(?4, metadata)
             WHERE id = ?5",
            params![
                display_name,
                release_date.map(|d| d.format("%Y-%m-%d").to_string()),
                serde_json::to_string(caps)?,
                metadata.map(|m| m.to_string()),
                model_id,
            ],
        )?;
        Ok(())
    }

    // ==================== Runs & snapshots ====================

    fn row_to_snapshot(row: &Row<'_>) -> rusqlite::Result<ScoreSnapshot> {
        let classifications: String = row.get("classifications")?;
        Ok(ScoreSnapshot {
            model_id: row.get("model_id")?,
            source_run_id: row.get("source_run_id")?,
            overall: row.get::<_, i64>("overall")? as u8,
            axes: AxisScores {
                coding: row.get("coding")?,
                responsiveness: row.get("responsiveness")?,
                reliability: row.get("reliability")?,
                feature_richness: row.get("feature_richness")?,
                cost_effectiveness: row.get("cost_effectiveness")?,
                recency: row.get("recency")?,
            },
            classifications: classifications_from_text(&classifications),
            features: row.get::<_, i64>("features")? as u16,
            updated_at: parse_dt(&row.get::<_, String>("updated_at")?),
        })
    }

    /// Transactionally record a completed run: append the run and its
    /// verdicts, replace the model's snapshot, refresh last-seen, append
    /// pricing/limit samples, and upsert issues. Returns the previous
    /// snapshot, when one existed.
    pub fn record_run(
        &self,
        run: &VerificationRun,
        snapshot: &ScoreSnapshot,
        issues: &[Issue],
    ) -> Result<Option<ScoreSnapshot>> {
        let mut guard = self.lock();
        let tx = guard.transaction()?;

        let previous = tx
            .query_row(
                "SELECT * FROM score_snapshots WHERE model_id = ?1",
                params![run.model_id],
                Self::row_to_snapshot,
            )
            .optional()?;

        let (job_id, trigger) = match &run.trigger {
            RunTrigger::Scheduled { job_id } => (Some(job_id.clone()), "scheduled"),
            RunTrigger::Manual => (None, "manual"),
            RunTrigger::OnDemand => (None, "on-demand"),
        };
        tx.execute(
            "INSERT INTO verification_runs (id, model_id, started_at, finished_at, trigger,
                                            job_id, suite_version, usage_input, usage_output)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run.id,
                run.model_id,
                run.started_at.to_rfc3339(),
                run.finished_at.to_rfc3339(),
                trigger,
                job_id,
                run.suite_version,
                run.usage.input_tokens as i64,
                run.usage.output_tokens as i64,
            ],
        )?;

        for verdict in &run.verdicts {
            let evidence_cipher = match &verdict.evidence {
                Some(evidence) => Some(self.crypto.seal_str(&evidence.excerpt)?),
                None => None,
            };
            tx.execute(
                "INSERT INTO probe_results (run_id, probe, outcome, score, first_token_ms,
                                            total_ms, evidence_hash, evidence_cipher,
                                            error_kind, detail)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    run.id,
                    verdict.probe,
                    verdict.outcome.to_string(),
                    verdict.score,
                    verdict.first_token_ms.map(|v| v as i64),
                    verdict.total_ms.map(|v| v as i64),
                    verdict.evidence.as_ref().map(|e| e.sha256.clone()),
                    evidence_cipher,
                    verdict.error_kind,
                    verdict.detail,
                ],
            )?;
        }

        tx.execute(
            "INSERT INTO score_snapshots (model_id, source_run_id, overall, coding,
                                          responsiveness, reliability, feature_richness,
                                          cost_effectiveness, recency, classifications,
                                          features, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(model_id) DO UPDATE SET
                source_run_id = excluded.source_run_id,
                overall = excluded.overall,
                coding = excluded.coding,
                responsiveness = excluded.responsiveness,
                reliability = excluded.reliability,
                feature_richness = excluded.feature_richness,
                cost_effectiveness = excluded.cost_effectiveness,
                recency = excluded.recency,
                classifications = excluded.classifications,
                features = excluded.features,
                updated_at = excluded.updated_at",
            params![
                snapshot.model_id,
                snapshot.source_run_id,
                snapshot.overall as i64,
                snapshot.axes.coding,
                snapshot.axes.responsiveness,
                snapshot.axes.reliability,
                snapshot.axes.feature_richness,
                snapshot.axes.cost_effectiveness,
                snapshot.axes.recency,
                classifications_to_text(&snapshot.classifications),
                snapshot.features as i64,
                snapshot.updated_at.to_rfc3339(),
            ],
        )?;

        tx.execute(
            "UPDATE models SET last_seen_at = ?1 WHERE id = ?2",
            params![run.finished_at.to_rfc3339(), run.model_id],
        )?;

        if let Some(pricing) = &run.pricing {
            tx.execute(
                "INSERT INTO pricing_samples (model_id, input_per_mtok, output_per_mtok,
                                              cached_read_per_mtok, effective_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    run.model_id,
                    pricing.input_per_mtok,
                    pricing.output_per_mtok,
                    pricing.cached_read_per_mtok,
                    pricing.effective_at.to_rfc3339(),
                ],
            )?;
        }

        if !run.limit_hints.is_empty() {
            tx.execute(
                "INSERT INTO limit_snapshots (model_id, declared_rpm, remaining, reset_at,
                                              observed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    run.model_id,
                    run.limit_hints.requests_limit.map(|v| v as i64),
                    run.limit_hints.requests_remaining.map(|v| v as i64),
                    run.limit_hints.reset_at.map(|dt| dt.to_rfc3339()),
                    run.finished_at.to_rfc3339(),
                ],
            )?;
        }

        for issue in issues {
            Self::upsert_issue_tx(&tx, issue)?;
        }

        tx.commit()?;
        Ok(previous)
    }

    pub fn get_snapshot(&self, model_id: &str) -> Result<Option<ScoreSnapshot>> {
        let conn = self.lock();
        let snapshot = conn
            .query_row(
                "SELECT * FROM score_snapshots WHERE model_id = ?1",
                params![model_id],
                Self::row_to_snapshot,
            )
            .optional()?;
        Ok(snapshot)
    }

    /// Verdicts of one run, evidence decrypted.
    pub fn run_verdicts(&self, run_id: &str) -> Result<Vec<ProbeReport>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT probe, outcome, score, first_token_ms, total_ms, evidence_hash,
                    evidence_cipher, error_kind, detail
             FROM probe_results WHERE run_id = ?1 ORDER BY probe",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<Vec<u8>>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut verdicts = Vec::with_capacity(rows.len());
        for (probe, outcome, score, first_token, total, hash, cipher, error_kind, detail) in rows {
            let outcome = match outcome.as_str() {
                "pass" => ProbeOutcome::Pass,
                "fail" => ProbeOutcome::Fail,
                "inapplicable" => ProbeOutcome::Inapplicable,
                _ => ProbeOutcome::Errored,
            };
            let evidence = match (hash, cipher) {
                (Some(sha256), Some(cipher)) => Some(Evidence {
                    sha256,
                    excerpt: self.crypto.open_str(&cipher)?,
                }),
                _ => None,
            };
            verdicts.push(ProbeReport {
                probe,
                outcome,
                score,
                first_token_ms: first_token.map(|v| v as u64),
                total_ms: total.map(|v| v as u64),
                evidence,
                error_kind,
                detail,
            });
        }
        Ok(verdicts)
    }

    /// Recent run ids and finish times for a model, newest first.
    pub fn run_history(&self, model_id: &str, limit: usize) -> Result<Vec<(String, DateTime<Utc>)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, finished_at FROM verification_runs
             WHERE model_id = ?1 ORDER BY started_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![model_id, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    parse_dt(&row.get::<_, String>(1)?),
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn latest_pricing(&self, model_id: &str) -> Result<Option<PricingSample>> {
        let conn = self.lock();
        let sample = conn
            .query_row(
                "SELECT input_per_mtok, output_per_mtok, cached_read_per_mtok, effective_at
                 FROM pricing_samples WHERE model_id = ?1
                 ORDER BY effective_at DESC, id DESC LIMIT 1",
                params![model_id],
                |row| {
                    Ok(PricingSample {
                        input_per_mtok: row.get(0)?,
                        output_per_mtok: row.get(1)?,
                        cached_read_per_mtok: row.get(2)?,
                        effective_at: parse_dt(&row.get::<_, String>(3)?),
                    })
                },
            )
            .optional()?;
        Ok(sample)
    }

    pub fn latest_limit(&self, model_id: &str) -> Result<Option<LimitSnapshot>> {
        let conn = self.lock();
        let snapshot = conn
            .query_row(
                "SELECT declared_rpm, remaining, reset_at, observed_at
                 FROM limit_snapshots WHERE model_id = ?1
                 ORDER BY observed_at DESC, id DESC LIMIT 1",
                params![model_id],
                |row| {
                    Ok(LimitSnapshot {
                        declared_rpm: row.get::<_, Option<i64>>(0)?.map(|v| v as u32),
                        remaining: row.get::<_, Option<i64>>(1)?.map(|v| v as u64),
                        reset_at: parse_opt_dt(row.get(2)?),
                        observed_at: parse_dt(&row.get::<_, String>(3)?),
                    })
                },
            )
            .optional()?;
        Ok(snapshot)
    }

    // ==================== Query ====================

    /// Indexed multi-dimensional query over models with snapshots.
    pub fn query(&self, filter: &QueryFilter) -> Result<Vec<(ModelRecord, ScoreSnapshot)>> {
        let mut sql = String::from(
            "SELECT m.id AS m_id, s.model_id AS s_model_id
             FROM models m JOIN score_snapshots s ON s.model_id = m.id
             WHERE m.withdrawn = 0",
        );
        let mut bind: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        for classification in &filter.classifications {
            sql.push_str(" AND s.classifications LIKE ?");
            bind.push(Box::new(format!("%,{},%", classification.as_str())));
        }
        if let Some(min) = filter.min_overall {
            sql.push_str(" AND s.overall >= ?");
            bind.push(Box::new(min as i64));
        }
        if filter.features_all != 0 {
            sql.push_str(" AND (s.features & ?) = ?");
            bind.push(Box::new(filter.features_all as i64));
            bind.push(Box::new(filter.features_all as i64));
        }
        if let Some(max_cost) = filter.max_input_cost {
            sql.push_str(
                " AND (SELECT p.input_per_mtok FROM pricing_samples p
                       WHERE p.model_id = m.id
                       ORDER BY p.effective_at DESC, p.id DESC LIMIT 1) <= ?",
            );
            bind.push(Box::new(max_cost));
        }
        if let Some(min_quota) = filter.min_remaining_quota {
            sql.push_str(
                " AND (SELECT l.remaining FROM limit_snapshots l
                       WHERE l.model_id = m.id
                       ORDER BY l.observed_at DESC, l.id DESC LIMIT 1) >= ?",
            );
            bind.push(Box::new(min_quota as i64));
        }
        if !filter.providers.is_empty() {
            let placeholders = vec!["?"; filter.providers.len()].join(",");
            sql.push_str(&format!(" AND m.provider_id IN ({})", placeholders));
            for provider in &filter.providers {
                bind.push(Box::new(provider.clone()));
            }
        }

        let direction = if filter.descending { "DESC" } else { "ASC" };
        // Ordering ties break on coding, reliability, inverse cost, then
        // vendor id.
        sql.push_str(&format!(
            " ORDER BY {} {}, s.coding DESC, s.reliability DESC,
              s.cost_effectiveness DESC, m.vendor_id ASC",
            filter.order_by.column(),
            direction
        ));
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, filter.offset));
        } else if filter.offset > 0 {
            sql.push_str(&format!(" LIMIT -1 OFFSET {}", filter.offset));
        }

        let ids: Vec<String> = {
            let conn = self.lock();
            let mut stmt = conn.prepare(&sql)?;
            let params = rusqlite::params_from_iter(bind.iter().map(|b| b.as_ref()));
            let rows = stmt
                .query_map(params, |row| row.get::<_, String>("m_id"))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            if let (Some(model), Some(snapshot)) = (self.get_model(&id)?, self.get_snapshot(&id)?)
            {
                results.push((model, snapshot));
            }
        }
        Ok(results)
    }

    // ==================== Issues ====================

    fn row_to_issue(row: &Row<'_>) -> rusqlite::Result<Issue> {
        let subject_kind: String = row.get("subject_kind")?;
        let subject_id: String = row.get("subject_id")?;
        let severity: String = row.get("severity")?;
        Ok(Issue {
            id: row.get("id")?,
            subject: if subject_kind == "provider" {
                IssueSubject::Provider(subject_id)
            } else {
                IssueSubject::Model(subject_id)
            },
            severity: Severity::parse(&severity).unwrap_or(Severity::Warning),
            kind: row.get("kind")?,
            description: row.get("description")?,
            workaround: row.get("workaround")?,
            first_seen_at: parse_dt(&row.get::<_, String>("first_seen_at")?),
            last_seen_at: parse_dt(&row.get::<_, String>("last_seen_at")?),
            open: row.get::<_, i64>("open")? != 0,
        })
    }

    fn upsert_issue_tx(tx: &Connection, issue: &Issue) -> Result<()> {
        // Recurrence of a known issue (open or closed) refreshes and
        // reopens it rather than duplicating the row.
        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM issues
                 WHERE subject_kind = ?1 AND subject_id = ?2 AND kind = ?3
                 ORDER BY last_seen_at DESC LIMIT 1",
                params![issue.subject.kind_str(), issue.subject.id(), issue.kind],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE issues SET last_seen_at = ?1, open = 1, severity = ?2,
                                       description = ?3
                     WHERE id = ?4",
                    params![
                        issue.last_seen_at.to_rfc3339(),
                        issue.severity.as_str(),
                        issue.description,
                        id,
                    ],
                )?;
            }
            None => {
                tx.execute(
                    "INSERT INTO issues (id, subject_kind, subject_id, severity, kind,
                                         description, workaround, first_seen_at,
                                         last_seen_at, open)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1)",
                    params![
                        issue.id,
                        issue.subject.kind_str(),
                        issue.subject.id(),
                        issue.severity.as_str(),
                        issue.kind,
                        issue.description,
                        issue.workaround,
                        issue.first_seen_at.to_rfc3339(),
                        issue.last_seen_at.to_rfc3339(),
                    ],
                )?;
            }
        }
        Ok(())
    }

    /// Record an issue outside a run transaction. Returns true when this
    /// recurrence reopened or created an open row that was not open
    /// before (i.e. an `issue-opened` event is due).
    pub fn upsert_issue(&self, issue: &Issue) -> Result<bool> {
        let conn = self.lock();
        let was_open: Option<bool> = conn
            .query_row(
                "SELECT open FROM issues
                 WHERE subject_kind = ?1 AND subject_id = ?2 AND kind = ?3
                 ORDER BY last_seen_at DESC LIMIT 1",
                params![issue.subject.kind_str(), issue.subject.id(), issue.kind],
                |row| Ok(row.get::<_, i64>(0)? != 0),
            )
            .optional()?;
        Self::upsert_issue_tx(&conn, issue)?;
        Ok(!was_open.unwrap_or(false))
    }

    pub fn close_issue(&self, id: &str) -> Result<bool> {
        let conn = self.lock();
        let rows = conn.execute("UPDATE issues SET open = 0 WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    pub fn open_issues(&self, subject_id: Option<&str>) -> Result<Vec<Issue>> {
        let conn = self.lock();
        let issues = match subject_id {
            Some(subject) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM issues WHERE open = 1 AND subject_id = ?1
                     ORDER BY last_seen_at DESC",
                )?;
                let rows = stmt
                    .query_map(params![subject], Self::row_to_issue)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn
                    .prepare("SELECT * FROM issues WHERE open = 1 ORDER BY last_seen_at DESC")?;
                let rows = stmt
                    .query_map([], Self::row_to_issue)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(issues)
    }

    // ==================== Jobs ====================

    pub fn upsert_job(&self, job: &JobRecord) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO jobs (id, name, selector, cadence, overlap, paused, created_at,
                               last_run_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                selector = excluded.selector,
                cadence = excluded.cadence,
                overlap = excluded.overlap,
                paused = excluded.paused,
                last_run_at = excluded.last_run_at",
            params![
                job.id,
                job.name,
                serde_json::to_string(&job.selector)?,
                job.cadence,
                serde_json::to_value(job.overlap)?.as_str().unwrap_or("skip-if-running"),
                job.paused as i64,
                job.created_at.to_rfc3339(),
                job.last_run_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT * FROM jobs ORDER BY name")?;
        let jobs = stmt
            .query_map([], |row| {
                let selector: String = row.get("selector")?;
                let overlap: String = row.get("overlap")?;
                Ok(JobRecord {
                    id: row.get("id")?,
                    name: row.get("name")?,
                    selector: serde_json::from_str(&selector)
                        .unwrap_or(TargetSelector::All),
                    cadence: row.get("cadence")?,
                    overlap: serde_json::from_value(serde_json::Value::String(overlap))
                        .unwrap_or_default(),
                    paused: row.get::<_, i64>("paused")? != 0,
                    created_at: parse_dt(&row.get::<_, String>("created_at")?),
                    last_run_at: parse_opt_dt(row.get("last_run_at")?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    pub fn delete_job(&self, id: &str) -> Result<bool> {
        let conn = self.lock();
        let rows = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // ==================== Durable bindings ====================

    pub fn add_durable_binding(&self, binding: &DurableBinding) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO subscriptions_durable (id, name, kinds, providers, models, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                kinds = excluded.kinds,
                providers = excluded.providers,
                models = excluded.models",
            params![
                binding.id,
                binding.name,
                serde_json::to_string(&binding.kinds)?,
                serde_json::to_string(&binding.providers)?,
                serde_json::to_string(&binding.models)?,
                binding.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_durable_bindings(&self) -> Result<Vec<DurableBinding>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT * FROM subscriptions_durable ORDER BY name")?;
        let bindings = stmt
            .query_map([], |row| {
                let kinds: String = row.get("kinds")?;
                let providers: String = row.get("providers")?;
                let models: String = row.get("models")?;
                Ok(DurableBinding {
                    id: row.get("id")?,
                    name: row.get("name")?,
                    kinds: serde_json::from_str(&kinds).unwrap_or_default(),
                    providers: serde_json::from_str(&providers).unwrap_or_default(),
                    models: serde_json::from_str(&models).unwrap_or_default(),
                    created_at: parse_dt(&row.get::<_, String>("created_at")?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(bindings)
    }

    pub fn remove_durable_binding(&self, id: &str) -> Result<bool> {
        let conn = self.lock();
        let rows = conn.execute(
            "DELETE FROM subscriptions_durable WHERE id = ?1",
            params![id],
        )?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{RateLimitHints, TokenUsage};
    use crate::probe::ProbeReport;

    fn store() -> CatalogStore {
        CatalogStore::in_memory("test-secret").unwrap()
    }

    fn provider(id: &str) -> ProviderRecord {
        ProviderRecord {
            id: id.to_string(),
            name: format!("Provider {}", id),
            base_url: "https://api.example.com".to_string(),
            auth_secret: "sk-secret".to_string(),
            kind: AdapterKind::OpenaiCompatible,
            discovery: DiscoveryMode::Endpoint,
            static_models: Vec::new(),
            declared_rpm: Some(60),
            declared_burst: None,
            max_concurrency: None,
            created_at: Utc::now(),
        }
    }

    fn snapshot_for(model_id: &str, run_id: &str, overall: u8) -> ScoreSnapshot {
        let mut classifications = BTreeSet::new();
        classifications.insert(Classification::Chat);
        ScoreSnapshot {
            model_id: model_id.to_string(),
            source_run_id: run_id.to_string(),
            overall,
            axes: AxisScores {
                coding: 70.0,
                responsiveness: 90.0,
                reliability: 80.0,
                feature_richness: 40.0,
                cost_effectiveness: 50.0,
                recency: 50.0,
            },
            classifications,
            features: feature_bits::STREAMING,
            updated_at: Utc::now(),
        }
    }

    fn run_for(model_id: &str, run_id: &str) -> VerificationRun {
        VerificationRun {
            id: run_id.to_string(),
            model_id: model_id.to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            trigger: RunTrigger::Manual,
            suite_version: 1,
            verdicts: vec![
                ProbeReport::pass("existence", 100.0).with_evidence("OK"),
                ProbeReport::fail("vision", 0.0),
            ],
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
            limit_hints: RateLimitHints {
                requests_remaining: Some(99),
                ..Default::default()
            },
            pricing: Some(PricingSample {
                input_per_mtok: 2.5,
                output_per_mtok: 10.0,
                cached_read_per_mtok: None,
                effective_at: Utc::now(),
            }),
        }
    }

    fn seed_model(store: &CatalogStore, provider_id: &str, vendor_id: &str) -> ModelRecord {
        let diff = store
            .upsert_models_for_provider(provider_id, &[ListedModel::bare(vendor_id)])
            .unwrap();
        diff.added
            .into_iter()
            .find(|m| m.vendor_id == vendor_id)
            .unwrap()
    }

    #[test]
    fn test_provider_auth_roundtrip_is_encrypted() {
        let s = store();
        s.upsert_provider(&provider("p1")).unwrap();
        let loaded = s.get_provider("p1").unwrap().unwrap();
        assert_eq!(loaded.auth_secret, "sk-secret");

        // The raw column must not contain the plaintext secret.
        let conn = s.lock();
        let cipher: Vec<u8> = conn
            .query_row("SELECT auth_cipher FROM providers WHERE id = 'p1'", [], |r| r.get(0))
            .unwrap();
        drop(conn);
        assert!(!cipher.windows(9).any(|w| w == b"sk-secret"));
    }

    #[test]
    fn test_discovery_diff_and_idempotence() {
        let s = store();
        s.upsert_provider(&provider("p1")).unwrap();

        let first = s
            .upsert_models_for_provider(
                "p1",
                &[ListedModel::bare("x-fast"), ListedModel::bare("x-slow")],
            )
            .unwrap();
        assert_eq!(first.added.len(), 2);
        assert!(first.withdrawn.is_empty());

        // Unchanged discovery: no diff.
        let second = s
            .upsert_models_for_provider(
                "p1",
                &[ListedModel::bare("x-fast"), ListedModel::bare("x-slow")],
            )
            .unwrap();
        assert!(second.is_empty());

        // Same ids, same rows.
        let models = s.models_for_provider("p1", true).unwrap();
        assert_eq!(models.len(), 2);
        let first_ids: BTreeSet<_> = first.added.iter().map(|m| m.id.clone()).collect();
        let now_ids: BTreeSet<_> = models.iter().map(|m| m.id.clone()).collect();
        assert_eq!(first_ids, now_ids);
    }

    #[test]
    fn test_withdrawal_and_reappearance() {
        let s = store();
        s.upsert_provider(&provider("p1")).unwrap();
        s.upsert_models_for_provider(
            "p1",
            &[ListedModel::bare("a"), ListedModel::bare("b")],
        )
        .unwrap();

        let diff = s
            .upsert_models_for_provider("p1", &[ListedModel::bare("a")])
            .unwrap();
        assert_eq!(diff.withdrawn.len(), 1);
        assert_eq!(diff.withdrawn[0].vendor_id, "b");
        assert_eq!(s.models_for_provider("p1", false).unwrap().len(), 1);

        // Reappearance surfaces as an addition again.
        let diff = s
            .upsert_models_for_provider(
                "p1",
                &[ListedModel::bare("a"), ListedModel::bare("b")],
            )
            .unwrap();
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].vendor_id, "b");
        assert_eq!(s.models_for_provider("p1", false).unwrap().len(), 2);
    }

    #[test]
    fn test_record_run_atomic_snapshot() {
        let s = store();
        s.upsert_provider(&provider("p1")).unwrap();
        let model = seed_model(&s, "p1", "x-fast");

        let run = run_for(&model.id, "run-1");
        let previous = s
            .record_run(&run, &snapshot_for(&model.id, "run-1", 70), &[])
            .unwrap();
        assert!(previous.is_none());

        let snapshot = s.get_snapshot(&model.id).unwrap().unwrap();
        assert_eq!(snapshot.source_run_id, "run-1");
        assert_eq!(snapshot.overall, 70);

        // Second run replaces the snapshot and returns the previous one.
        let run2 = run_for(&model.id, "run-2");
        let previous = s
            .record_run(&run2, &snapshot_for(&model.id, "run-2", 55), &[])
            .unwrap()
            .unwrap();
        assert_eq!(previous.overall, 70);
        let snapshot = s.get_snapshot(&model.id).unwrap().unwrap();
        assert_eq!(snapshot.source_run_id, "run-2");
        assert_eq!(snapshot.overall, 55);

        // Run history preserved, newest first.
        let history = s.run_history(&model.id, 10).unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_run_verdict_evidence_roundtrip() {
        let s = store();
        s.upsert_provider(&provider("p1")).unwrap();
        let model = seed_model(&s, "p1", "x-fast");
        let run = run_for(&model.id, "run-1");
        s.record_run(&run, &snapshot_for(&model.id, "run-1", 70), &[])
            .unwrap();

        let verdicts = s.run_verdicts("run-1").unwrap();
        assert_eq!(verdicts.len(), 2);
        let existence = verdicts.iter().find(|v| v.probe == "existence").unwrap();
        assert_eq!(existence.outcome, ProbeOutcome::Pass);
        assert_eq!(existence.evidence.as_ref().unwrap().excerpt, "OK");
    }

    #[test]
    fn test_pricing_and_limits_are_time_series() {
        let s = store();
        s.upsert_provider(&provider("p1")).unwrap();
        let model = seed_model(&s, "p1", "x-fast");
        s.record_run(
            &run_for(&model.id, "run-1"),
            &snapshot_for(&model.id, "run-1", 70),
            &[],
        )
        .unwrap();

        let pricing = s.latest_pricing(&model.id).unwrap().unwrap();
        assert_eq!(pricing.input_per_mtok, 2.5);
        let limit = s.latest_limit(&model.id).unwrap().unwrap();
        assert_eq!(limit.remaining, Some(99));
    }

    #[test]
    fn test_query_filters_and_ordering() {
        let s = store();
        s.upsert_provider(&provider("p1")).unwrap();
        let fast = seed_model(&s, "p1", "x-fast");
        let slow = seed_model(&s, "p1", "x-slow");

        let mut good = snapshot_for(&fast.id, "r1", 80);
        good.classifications.insert(Classification::Coding);
        s.record_run(&run_for(&fast.id, "r1"), &good, &[]).unwrap();
        s.record_run(&run_for(&slow.id, "r2"), &snapshot_for(&slow.id, "r2", 40), &[])
            .unwrap();

        let all = s.query(&QueryFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0.vendor_id, "x-fast");

        let coding_only = s
            .query(&QueryFilter {
                classifications: vec![Classification::Coding],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(coding_only.len(), 1);

        let min_score = s
            .query(&QueryFilter {
                min_overall: Some(60),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(min_score.len(), 1);

        let features = s
            .query(&QueryFilter {
                features_all: feature_bits::STREAMING,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(features.len(), 2);

        let cheap = s
            .query(&QueryFilter {
                max_input_cost: Some(1.0),
                ..Default::default()
            })
            .unwrap();
        assert!(cheap.is_empty());

        let quota = s
            .query(&QueryFilter {
                min_remaining_quota: Some(50),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(quota.len(), 2);
    }

    #[test]
    fn test_issue_reopen_on_recurrence() {
        let s = store();
        let issue = Issue::new(
            IssueSubject::Model("m1".into()),
            Severity::Warning,
            "degradation",
            "score dropped",
        );
        assert!(s.upsert_issue(&issue).unwrap());
        let open = s.open_issues(Some("m1")).unwrap();
        assert_eq!(open.len(), 1);
        let id = open[0].id.clone();

        s.close_issue(&id).unwrap();
        assert!(s.open_issues(Some("m1")).unwrap().is_empty());

        // Recurrence reopens the same row.
        let again = Issue::new(
            IssueSubject::Model("m1".into()),
            Severity::Warning,
            "degradation",
            "score dropped again",
        );
        assert!(s.upsert_issue(&again).unwrap());
        let open = s.open_issues(Some("m1")).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, id);
        assert_eq!(open[0].description, "score dropped again");

        // A still-open issue does not announce again.
        assert!(!s.upsert_issue(&again).unwrap());
    }

    #[test]
    fn test_job_persistence() {
        let s = store();
        let job = JobRecord {
            id: "j1".into(),
            name: "hourly-all".into(),
            selector: TargetSelector::All,
            cadence: "hourly".into(),
            overlap: OverlapPolicy::SkipIfRunning,
            paused: false,
            created_at: Utc::now(),
            last_run_at: None,
        };
        s.upsert_job(&job).unwrap();
        let jobs = s.list_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].selector, TargetSelector::All);

        let mut updated = job.clone();
        updated.paused = true;
        updated.last_run_at = Some(Utc::now());
        s.upsert_job(&updated).unwrap();
        let jobs = s.list_jobs().unwrap();
        assert!(jobs[0].paused);
        assert!(jobs[0].last_run_at.is_some());

        assert!(s.delete_job("j1").unwrap());
        assert!(s.list_jobs().unwrap().is_empty());
    }

    #[test]
    fn test_durable_bindings() {
        let s = store();
        let binding = DurableBinding {
            id: "b1".into(),
            name: "webhook".into(),
            kinds: vec!["score-changed".into()],
            providers: Vec::new(),
            models: Vec::new(),
            created_at: Utc::now(),
        };
        s.add_durable_binding(&binding).unwrap();
        assert_eq!(s.list_durable_bindings().unwrap().len(), 1);
        assert!(s.remove_durable_binding("b1").unwrap());
        assert!(s.list_durable_bindings().unwrap().is_empty());
    }

    #[test]
    fn test_provider_delete_cascades_models() {
        let s = store();
        s.upsert_provider(&provider("p1")).unwrap();
        seed_model(&s, "p1", "x-fast");
        assert!(s.delete_provider("p1").unwrap());
        assert!(s.models_for_provider("p1", true).unwrap().is_empty());
    }

    #[test]
    fn test_reopen_from_disk_with_same_secret() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");

        {
            let s = CatalogStore::open(&path, "the-secret").unwrap();
            s.upsert_provider(&provider("p1")).unwrap();
        }

        let reopened = CatalogStore::open(&path, "the-secret").unwrap();
        let loaded = reopened.get_provider("p1").unwrap().unwrap();
        assert_eq!(loaded.auth_secret, "sk-secret");

        // A wrong secret opens the file but cannot decrypt auth material.
        let wrong = CatalogStore::open(&path, "not-the-secret").unwrap();
        let loaded = wrong.get_provider("p1").unwrap().unwrap();
        assert!(loaded.auth_secret.is_empty());
    }
}
