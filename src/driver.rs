//! Pipeline driver.
//!
//! Wires configuration, stores, bus, governor, engine and scheduler
//! together; runs one full verification pass (or the scheduler loop) and
//! writes the Markdown/JSON reports and agent exports. Failures map onto
//! the process exit codes: 0 normal, 2 config invalid, 3 catalog store
//! unavailable, 4 all providers unreachable, 1 otherwise.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{
    new_id, AuditLog, CatalogStore, DurableBinding, ModelRegistry, QueryFilter, RunTrigger,
};
use crate::config::VerifierConfig;
use crate::engine::report::{to_markdown, JsonReport, ReportBuilder};
use crate::engine::{CancelToken, EngineConfig, VerificationEngine};
use crate::enrich::StaticEnrichment;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, EventFilter, EventKind};
use crate::export::{export_for_agent, AgentKind};
use crate::governor::{ProviderLimits, RateGovernor};
use crate::scheduler::{Scheduler, SystemClock};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CONFIG_INVALID: i32 = 2;
pub const EXIT_STORE_UNAVAILABLE: i32 = 3;
pub const EXIT_ALL_PROVIDERS_UNREACHABLE: i32 = 4;

pub struct Driver {
    config: VerifierConfig,
    engine: Arc<VerificationEngine>,
    scheduler: Arc<Scheduler>,
    bus: Arc<EventBus>,
}

impl Driver {
    /// Open stores and assemble the pipeline. A store that cannot be
    /// opened or written is fatal-per-system.
    pub fn build(config: VerifierConfig, secret: &str) -> Result<Self> {
        let store = Arc::new(CatalogStore::open(&config.storage.catalog_path, secret)?);
        let audit = Arc::new(AuditLog::open(&config.storage.audit_path, secret)?);
        Self::build_with_stores(config, store, audit)
    }

    /// Assemble over explicit stores (tests use in-memory ones).
    pub fn build_with_stores(
        config: VerifierConfig,
        store: Arc<CatalogStore>,
        audit: Arc<AuditLog>,
    ) -> Result<Self> {
        let registry = Arc::new(ModelRegistry::new(store.clone()));
        let bus = Arc::new(EventBus::default());
        let governor = Arc::new(RateGovernor::new(ProviderLimits::default()));

        let engine_config = EngineConfig {
            adapter_timeout: config.global.timeout(),
            model_parallelism: config.global.concurrency,
            score_delta_threshold: config.global.score_delta_threshold,
            ..Default::default()
        };
        let engine = Arc::new(VerificationEngine::new(
            registry,
            bus.clone(),
            governor,
            audit,
            Arc::new(StaticEnrichment::builtin()),
            engine_config,
        ));
        let scheduler = Arc::new(Scheduler::new(engine.clone(), Arc::new(SystemClock)));

        Ok(Self {
            config,
            engine,
            scheduler,
            bus,
        })
    }

    pub fn engine(&self) -> &Arc<VerificationEngine> {
        &self.engine
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Load configuration state into the catalog: providers, durable
    /// notifier bindings, scheduled jobs.
    pub fn sync_configuration(&self) -> Result<()> {
        let store = self.engine.registry().store();

        for provider in &self.config.providers {
            store.upsert_provider(&provider.to_record()?)?;
        }

        for subscription in &self.config.event.subscriptions {
            let binding = DurableBinding {
                id: format!("binding-{}", subscription.name),
                name: subscription.name.clone(),
                kinds: subscription.kinds.clone(),
                providers: subscription.providers.clone(),
                models: subscription.models.clone(),
                created_at: Utc::now(),
            };
            store.add_durable_binding(&binding)?;
            self.bus.register_durable(binding);
        }

        // Jobs are matched by name so restarts keep their history.
        let existing = store.list_jobs()?;
        for schedule in &self.config.schedules {
            match existing.iter().find(|j| j.name == schedule.name) {
                Some(job) => {
                    let mut updated = job.clone();
                    updated.cadence = schedule.cadence.clone();
                    updated.selector = schedule.targets.clone();
                    updated.overlap = schedule.overlap;
                    store.upsert_job(&updated)?;
                }
                None => {
                    let job = crate::catalog::JobRecord {
                        id: new_id(),
                        name: schedule.name.clone(),
                        selector: schedule.targets.clone(),
                        cadence: schedule.cadence.clone(),
                        overlap: schedule.overlap,
                        paused: false,
                        created_at: Utc::now(),
                        last_run_at: None,
                    };
                    store.upsert_job(&job)?;
                }
            }
        }
        self.scheduler.reconcile()?;
        Ok(())
    }

    /// Announce a fatal pipeline failure before it propagates to the exit
    /// code.
    fn fail_system(&self, error: Error) -> Error {
        tracing::error!(error = %error, "fatal pipeline failure");
        if self.bus.has_consumers() {
            self.engine.publish(Event::system_error(&error.to_string()));
        }
        error
    }

    fn report_paths(&self) -> (PathBuf, PathBuf) {
        let base = self
            .config
            .export
            .default_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        (base.join("report.md"), base.join("report.json"))
    }

    /// Write the Markdown and JSON reports.
    pub fn write_reports(&self) -> Result<JsonReport> {
        let builder = ReportBuilder::new(self.engine.registry().store().clone());
        let report = builder.build()?;
        let (md_path, json_path) = self.report_paths();
        if let Some(parent) = md_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Internal(format!("cannot create report dir: {}", e)))?;
        }
        std::fs::write(&md_path, to_markdown(&report))
            .map_err(|e| Error::Internal(format!("cannot write {}: {}", md_path.display(), e)))?;
        std::fs::write(&json_path, serde_json::to_string_pretty(&report)?)
            .map_err(|e| Error::Internal(format!("cannot write {}: {}", json_path.display(), e)))?;
        tracing::info!(md = %md_path.display(), json = %json_path.display(), "reports written");
        Ok(report)
    }

    /// Invoke the external export contract for every configured agent.
    pub fn write_exports(&self) -> Result<()> {
        let store = self.engine.registry().store();
        for agent in &self.config.export.agents {
            let kind = AgentKind::parse(&agent.kind)?;
            let document = export_for_agent(store, kind, &QueryFilter::default())?;
            if let Some(parent) = agent.path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Internal(format!("cannot create export dir: {}", e)))?;
            }
            std::fs::write(&agent.path, document).map_err(|e| {
                Error::Internal(format!("cannot write {}: {}", agent.path.display(), e))
            })?;
            tracing::info!(agent = kind.as_str(), path = %agent.path.display(), "export written");
        }
        Ok(())
    }

    /// One full verification pass over all configured providers.
    pub async fn run_once(&self) -> Result<i32> {
        self.sync_configuration()?;

        // Watch for score changes while the pass runs so configured
        // regeneration can react afterwards.
        let mut score_watch = if self.config.regenerate_configurations_on_score_changes {
            Some(
                self.bus
                    .subscribe(EventFilter::for_kinds([EventKind::ScoreChanged])),
            )
        } else {
            None
        };

        let cancel = CancelToken::new();
        let verifications = self
            .engine
            .run_targets(
                &crate::catalog::TargetSelector::All,
                RunTrigger::Manual,
                &cancel,
            )
            .await
            .map_err(|e| self.fail_system(e))?;

        self.write_reports().map_err(|e| self.fail_system(e))?;
        self.write_exports()?;

        if let Some(watch) = score_watch.as_mut() {
            let mut changed = false;
            while watch.try_recv().is_some() {
                changed = true;
            }
            if changed {
                tracing::info!("score changes detected, regenerating agent exports");
                self.write_exports()?;
            }
        }

        let all_unreachable =
            !verifications.is_empty() && verifications.iter().all(|v| v.unreachable);
        if all_unreachable {
            tracing::error!("all providers unreachable");
            return Ok(EXIT_ALL_PROVIDERS_UNREACHABLE);
        }
        Ok(EXIT_OK)
    }

    /// Run the scheduler loop until shutdown is signalled.
    pub async fn serve(&self, shutdown: tokio::sync::watch::Receiver<bool>) -> Result<i32> {
        self.sync_configuration()?;
        // Schedules drive everything from here; an empty schedule set
        // degrades to a single immediate pass.
        if self.config.schedules.is_empty() {
            tracing::warn!("no schedules configured, running a single pass");
            return self.run_once().await;
        }
        self.scheduler.run(Duration::from_secs(1), shutdown).await;
        self.write_reports()?;
        Ok(EXIT_OK)
    }
}

/// Map a pipeline error onto the driver exit code.
pub fn exit_code_for(error: &Error) -> i32 {
    match error {
        Error::Config(_) => EXIT_CONFIG_INVALID,
        Error::Store(_) | Error::Crypto(_) => EXIT_STORE_UNAVAILABLE,
        _ => EXIT_FAILURE,
    }
}
