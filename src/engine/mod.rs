//! Verification engine.
//!
//! Drives the probe suite against (provider, model) targets through the
//! run state machine:
//!
//! ```text
//! Idle → Queued → Probing → Scoring → Persisting → Emitting → Idle
//!                      ↘ Aborted (fatal provider error) ↘ Idle
//! ```
//!
//! Runs for the same model are serialised by a per-model lock. Within a
//! run the gating probes execute sequentially; feature probes fan out
//! concurrently up to a fixed cap. Transient adapter failures are retried
//! with governor-honoured back-off; the run is reported with partial
//! verdicts when retries exhaust. Emission is elided entirely when the
//! bus has no consumers.

pub mod report;
pub mod scoring;

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

use crate::adapter::{
    adapter_for, AdapterKind, AuthMaterial, ListedModel, ProviderAdapter, ProviderEndpoint,
};
use crate::catalog::{
    new_id, AuditLog, AuditRecord, DiscoveryMode, Issue, IssueSubject, ModelRecord, ModelRegistry,
    PricingSample, ProviderRecord, RunTrigger, ScoreSnapshot, Severity, TargetSelector,
    VerificationRun,
};
use crate::enrich::ModelEnrichment;
use crate::error::{AdapterError, Error, Result};
use crate::events::{Event, EventBus};
use crate::governor::{ProviderLimits, RateGovernor};
use crate::probe::{Probe, ProbeOutcome, ProbeReport, ProbeSuite, ProbeTarget, SUITE_VERSION};

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard per-adapter-call timeout.
    pub adapter_timeout: Duration,
    /// Retries for rate-limited/overloaded probe calls.
    pub probe_retries: u32,
    /// Concurrent feature probes within one run.
    pub feature_parallelism: usize,
    /// Concurrent model runs within one provider.
    pub model_parallelism: usize,
    /// Overall-score delta that triggers `score-changed`.
    pub score_delta_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            adapter_timeout: Duration::from_secs(60),
            probe_retries: 3,
            feature_parallelism: 3,
            model_parallelism: 4,
            score_delta_threshold: 5.0,
        }
    }
}

impl EngineConfig {
    /// Per-run hard timeout: ten adapter timeouts.
    pub fn run_timeout(&self) -> Duration {
        self.adapter_timeout * 10
    }
}

/// Cooperative cancellation handle carried by every run.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Registering before the re-check closes the window where a
            // cancel lands between the flag test and the wait.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Why a run aborted without persisting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The existence probe failed; the model is unreachable.
    ExistenceFailed,
    /// The provider rejected our credentials.
    AuthFailed,
    /// Cancelled cooperatively.
    Cancelled,
    /// The per-run hard timeout elapsed.
    RunTimeout,
    /// The provider was already marked unreachable this tick.
    ProviderUnreachable,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExistenceFailed => write!(f, "existence-failed"),
            Self::AuthFailed => write!(f, "auth-failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::RunTimeout => write!(f, "run-timeout"),
            Self::ProviderUnreachable => write!(f, "provider-unreachable"),
        }
    }
}

/// Outcome of one model verification.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed {
        run_id: String,
        overall: u8,
        previous_overall: Option<u8>,
        /// Whether emission happened (false when the bus had no consumers).
        emitted: bool,
    },
    Aborted(AbortReason),
}

/// Summary of one model within a provider pass.
#[derive(Debug, Clone)]
pub struct ModelRunSummary {
    pub model_id: String,
    pub vendor_id: String,
    pub outcome: RunOutcome,
}

/// Summary of one provider pass (discovery + runs).
#[derive(Debug, Clone, Default)]
pub struct ProviderVerification {
    pub provider_id: String,
    pub discovered: usize,
    pub added: usize,
    pub withdrawn: usize,
    pub runs: Vec<ModelRunSummary>,
    pub unreachable: bool,
}

pub struct VerificationEngine {
    registry: Arc<ModelRegistry>,
    bus: Arc<EventBus>,
    governor: Arc<RateGovernor>,
    audit: Arc<AuditLog>,
    enrichment: Arc<dyn ModelEnrichment>,
    suite: ProbeSuite,
    config: EngineConfig,
    adapter_overrides: Mutex<HashMap<AdapterKind, Arc<dyn ProviderAdapter>>>,
    model_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl VerificationEngine {
    pub fn new(
        registry: Arc<ModelRegistry>,
        bus: Arc<EventBus>,
        governor: Arc<RateGovernor>,
        audit: Arc<AuditLog>,
        enrichment: Arc<dyn ModelEnrichment>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            bus,
            governor,
            audit,
            enrichment,
            suite: ProbeSuite::standard(),
            config,
            adapter_overrides: Mutex::new(HashMap::new()),
            model_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Publish an event and record an `overflow` issue for every
    /// subscription buffer that dropped its oldest entry.
    pub fn publish(&self, event: Event) {
        let outcome = self.bus.publish(event);
        for overflow in outcome.overflows {
            let issue = Issue::new(
                IssueSubject::Provider("event-bus".to_string()),
                Severity::Warning,
                "overflow",
                format!(
                    "subscription {} dropped {} events total",
                    overflow.subscription_id, overflow.total_dropped
                ),
            );
            if let Err(e) = self.registry.store().upsert_issue(&issue) {
                tracing::error!(error = %e, "failed to record overflow issue");
            }
        }
    }

    /// Replace the adapter used for a kind. Tests install mock adapters
    /// through this.
    pub fn override_adapter(&self, kind: AdapterKind, adapter: Arc<dyn ProviderAdapter>) {
        let mut overrides = self
            .adapter_overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        overrides.insert(kind, adapter);
    }

    fn adapter(&self, kind: AdapterKind) -> Arc<dyn ProviderAdapter> {
        let overrides = self
            .adapter_overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        overrides.get(&kind).cloned().unwrap_or_else(|| adapter_for(kind))
    }

    fn model_lock(&self, model_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.model_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(model_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn endpoint_for(&self, provider: &ProviderRecord) -> ProviderEndpoint {
        ProviderEndpoint::new(
            provider.base_url.clone(),
            AuthMaterial::new(provider.auth_secret.clone()),
            self.config.adapter_timeout,
        )
    }

    fn limits_for(provider: &ProviderRecord) -> ProviderLimits {
        let defaults = ProviderLimits::default();
        ProviderLimits {
            rpm: provider.declared_rpm.unwrap_or(defaults.rpm),
            burst: provider.declared_burst.unwrap_or(defaults.burst),
            max_concurrency: provider.max_concurrency.unwrap_or(defaults.max_concurrency),
        }
    }

    /// Run one probe with applicability, cancellation and transient retry.
    async fn run_probe(
        &self,
        probe: &Arc<dyn Probe>,
        target: &ProbeTarget,
        cancel: &CancelToken,
    ) -> ProbeReport {
        if !probe.applicability(&target.caps) {
            return ProbeReport::inapplicable(probe.name());
        }

        let mut attempt: u32 = 0;
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    return ProbeReport::errored(probe.name(), "cancelled");
                }
                result = probe.run(target) => result,
            };
            match result {
                Ok(report) => return report,
                Err(err) => {
                    attempt += 1;
                    if attempt > self.config.probe_retries {
                        tracing::warn!(
                            probe = probe.name(),
                            model = %target.model,
                            error = %err,
                            "probe retries exhausted"
                        );
                        return ProbeReport::errored(probe.name(), err.kind());
                    }
                    // The governor has already halted the provider; an
                    // explicit wait honours retry-after even when the next
                    // admit would not touch the same bucket window.
                    let wait = err
                        .retry_after()
                        .unwrap_or_else(|| Duration::from_millis(250 * attempt as u64));
                    tracing::debug!(
                        probe = probe.name(),
                        model = %target.model,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "transient probe error, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Probing phase: sequential gating prefix, bounded feature fan-out,
    /// closing probes. Returns collected verdicts or an abort reason.
    async fn probing_phase(
        &self,
        target: &ProbeTarget,
        cancel: &CancelToken,
    ) -> std::result::Result<Vec<ProbeReport>, AbortReason> {
        let mut verdicts = Vec::with_capacity(self.suite.len());

        for probe in &self.suite.gating {
            if cancel.is_cancelled() {
                return Err(AbortReason::Cancelled);
            }
            let report = self.run_probe(probe, target, cancel).await;
            let is_existence = probe.name() == "existence";
            let abort = is_existence && report.outcome == ProbeOutcome::Fail;
            let auth_failed = report.error_kind.as_deref() == Some("auth-failed");
            verdicts.push(report);
            if abort {
                return Err(if auth_failed {
                    AbortReason::AuthFailed
                } else {
                    AbortReason::ExistenceFailed
                });
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.config.feature_parallelism.max(1)));
        let feature_futures = self.suite.features.iter().map(|probe| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("feature semaphore closed");
                self.run_probe(probe, target, cancel).await
            }
        });
        verdicts.extend(futures::future::join_all(feature_futures).await);

        for probe in &self.suite.closing {
            if cancel.is_cancelled() {
                return Err(AbortReason::Cancelled);
            }
            verdicts.push(self.run_probe(probe, target, cancel).await);
        }

        if cancel.is_cancelled() {
            return Err(AbortReason::Cancelled);
        }
        Ok(verdicts)
    }

    /// Verify one model end to end.
    pub async fn verify_model(
        &self,
        provider: &ProviderRecord,
        model: &ModelRecord,
        trigger: RunTrigger,
        cancel: &CancelToken,
    ) -> Result<RunOutcome> {
        tracing::debug!(provider = %provider.id, model = %model.vendor_id, state = "queued", "run state");
        let lock = self.model_lock(&model.id);
        let _guard = lock.lock().await;

        let started_at = Utc::now();
        let started_instant = tokio::time::Instant::now();

        let enriched = self.enrichment.lookup(&model.vendor_id);
        let caps = model
            .caps
            .merged_with(enriched.as_ref().map(|e| e.caps).unwrap_or_default());

        let target = ProbeTarget::new(
            provider.id.clone(),
            model.vendor_id.clone(),
            caps,
            self.endpoint_for(provider),
            self.adapter(provider.kind),
            self.governor.clone(),
        );

        let consumers_at_start = self.bus.has_consumers();
        if consumers_at_start {
            self.publish(Event::run_started(&model.id, &provider.id));
        }

        tracing::debug!(state = "probing", "run state");
        let probing = self.probing_phase(&target, cancel);
        let verdicts = match tokio::time::timeout(self.config.run_timeout(), probing).await {
            Ok(Ok(verdicts)) => verdicts,
            Ok(Err(reason)) => {
                self.log_abort(model, &reason, started_instant.elapsed());
                if reason == AbortReason::ExistenceFailed {
                    self.open_model_issue(
                        model,
                        Severity::Error,
                        "model-unreachable",
                        format!("model {} did not answer the existence probe", model.vendor_id),
                    )?;
                }
                tracing::debug!(state = "aborted", reason = %reason, "run state");
                return Ok(RunOutcome::Aborted(reason));
            }
            Err(_) => {
                cancel.cancel();
                let reason = AbortReason::RunTimeout;
                self.log_abort(model, &reason, started_instant.elapsed());
                tracing::debug!(state = "aborted", reason = %reason, "run state");
                return Ok(RunOutcome::Aborted(reason));
            }
        };

        tracing::debug!(state = "scoring", "run state");
        let pricing = enriched.as_ref().and_then(|e| {
            match (e.input_per_mtok, e.output_per_mtok) {
                (Some(input), Some(output)) => Some(PricingSample {
                    input_per_mtok: input,
                    output_per_mtok: output,
                    cached_read_per_mtok: None,
                    effective_at: started_at,
                }),
                _ => None,
            }
        });
        let release_date = model
            .release_date
            .or(enriched.as_ref().and_then(|e| e.release_date));
        let computation = scoring::score_run(&verdicts, pricing.as_ref(), release_date, &caps);

        tracing::debug!(state = "persisting", "run state");
        let finished_at = Utc::now();
        let run = VerificationRun {
            id: new_id(),
            model_id: model.id.clone(),
            started_at,
            finished_at,
            trigger,
            suite_version: SUITE_VERSION,
            verdicts,
            usage: target.observed_usage(),
            limit_hints: target.observed_hints(),
            pricing,
        };
        let snapshot = ScoreSnapshot {
            model_id: model.id.clone(),
            source_run_id: run.id.clone(),
            overall: computation.overall,
            axes: computation.axes,
            classifications: computation.classifications.clone(),
            features: computation.features,
            updated_at: finished_at,
        };

        // The per-model lock makes this read stable until our commit.
        let prior = self.registry.snapshot(&model.id)?;
        let previously_open: HashSet<String> = self
            .registry
            .store()
            .open_issues(Some(&model.id))?
            .into_iter()
            .map(|issue| issue.kind)
            .collect();
        let issues = self.derive_issues(model, &run, prior.as_ref(), &snapshot);

        let (previous, new) = self.registry.record_run(&run, &snapshot, &issues)?;

        self.audit.append(&AuditRecord {
            run_id: run.id.clone(),
            model_id: model.id.clone(),
            summary: format!("completed overall={}", new.overall),
            duration_ms: started_instant.elapsed().as_millis() as u64,
            recorded_at: finished_at,
        })?;

        // Emitting, elided entirely when nothing consumes events.
        let emitted = if self.bus.has_consumers() {
            tracing::debug!(state = "emitting", "run state");
            self.emit_run_events(model, &run, previous.as_ref(), &new, &issues, &previously_open);
            true
        } else {
            false
        };

        tracing::info!(
            provider = %provider.id,
            model = %model.vendor_id,
            overall = new.overall,
            duration_ms = started_instant.elapsed().as_millis() as u64,
            "run complete"
        );
        Ok(RunOutcome::Completed {
            run_id: run.id,
            overall: new.overall,
            previous_overall: previous.as_ref().map(|s| s.overall),
            emitted,
        })
    }

    fn log_abort(&self, model: &ModelRecord, reason: &AbortReason, elapsed: Duration) {
        // Aborted runs persist nothing except the audit entry.
        let record = AuditRecord {
            run_id: new_id(),
            model_id: model.id.clone(),
            summary: format!("aborted {}", reason),
            duration_ms: elapsed.as_millis() as u64,
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.audit.append(&record) {
            tracing::error!(error = %e, "failed to append abort audit record");
        }
    }

    fn open_model_issue(
        &self,
        model: &ModelRecord,
        severity: Severity,
        kind: &str,
        description: String,
    ) -> Result<()> {
        let issue = Issue::new(IssueSubject::Model(model.id.clone()), severity, kind, description);
        let newly_opened = self.registry.store().upsert_issue(&issue)?;
        if newly_opened && self.bus.has_consumers() {
            self.publish(Event::issue_opened(&issue));
        }
        Ok(())
    }

    /// Issues implied by a run: errored probes (exhausted retries or
    /// permanent errors) and score degradation past the threshold.
    fn derive_issues(
        &self,
        model: &ModelRecord,
        run: &VerificationRun,
        prior: Option<&ScoreSnapshot>,
        snapshot: &ScoreSnapshot,
    ) -> Vec<Issue> {
        let mut issues = Vec::new();
        for verdict in &run.verdicts {
            if let Some(kind) = &verdict.error_kind {
                if kind == "cancelled" {
                    continue;
                }
                issues.push(Issue::new(
                    IssueSubject::Model(model.id.clone()),
                    Severity::Warning,
                    format!("{}-{}", verdict.probe, kind),
                    format!(
                        "probe {} ended {} ({})",
                        verdict.probe, verdict.outcome, kind
                    ),
                ));
            }
        }
        if let Some(prior) = prior {
            let delta = prior.overall as f64 - snapshot.overall as f64;
            if delta >= self.config.score_delta_threshold {
                issues.push(
                    Issue::new(
                        IssueSubject::Model(model.id.clone()),
                        Severity::Warning,
                        "degradation",
                        format!(
                            "overall score dropped from {} to {}",
                            prior.overall, snapshot.overall
                        ),
                    )
                    .with_workaround("re-run verification; consider a fallback model"),
                );
            }
        }
        issues
    }

    fn emit_run_events(
        &self,
        model: &ModelRecord,
        run: &VerificationRun,
        previous: Option<&ScoreSnapshot>,
        new: &ScoreSnapshot,
        issues: &[Issue],
        previously_open: &HashSet<String>,
    ) {
        self.publish(Event::run_finished(&model.id, &run.id, Some(new.overall)));

        if let Some(previous) = previous {
            let delta = (previous.overall as f64 - new.overall as f64).abs();
            let classification_changed = previous.classifications != new.classifications;
            let features_changed = previous.features != new.features;
            if delta >= self.config.score_delta_threshold
                || classification_changed
                || features_changed
            {
                let axes = scoring::changed_axes(&previous.axes, &new.axes);
                self.publish(Event::score_changed(
                    &model.id,
                    previous.overall,
                    new.overall,
                    &axes,
                ));
            }
        }

        for issue in issues {
            if !previously_open.contains(&issue.kind) {
                self.publish(Event::issue_opened(issue));
            }
        }
    }

    /// Discover models for a provider according to its discovery mode.
    async fn discover(
        &self,
        provider: &ProviderRecord,
    ) -> std::result::Result<Vec<ListedModel>, AdapterError> {
        let static_list: Vec<ListedModel> = provider
            .static_models
            .iter()
            .map(|id| ListedModel::bare(id.clone()))
            .collect();
        if provider.discovery == DiscoveryMode::Static {
            return Ok(static_list);
        }

        let adapter = self.adapter(provider.kind);
        let endpoint = self.endpoint_for(provider);
        let mut attempt: u32 = 0;
        let mut listed = loop {
            let _permit = self.governor.admit(&provider.id).await;
            let result = adapter.list_models(&endpoint).await;
            self.governor.observe(&provider.id, &result);
            match result {
                Ok(listed) => break listed,
                Err(err) if err.is_transient() && attempt < self.config.probe_retries => {
                    attempt += 1;
                    let wait = err
                        .retry_after()
                        .unwrap_or_else(|| Duration::from_millis(250 * attempt as u64));
                    tokio::time::sleep(wait).await;
                }
                Err(err) => return Err(err),
            }
        };

        if provider.discovery == DiscoveryMode::Both {
            for extra in static_list {
                if !listed.iter().any(|m| m.id == extra.id) {
                    listed.push(extra);
                }
            }
        }
        Ok(listed)
    }

    /// Batch mode: discover a provider's models, diff the catalog, then
    /// verify every active model.
    pub async fn verify_provider(
        &self,
        provider: &ProviderRecord,
        trigger: RunTrigger,
        cancel: &CancelToken,
    ) -> Result<ProviderVerification> {
        self.governor
            .configure_provider(&provider.id, Self::limits_for(provider));

        let mut summary = ProviderVerification {
            provider_id: provider.id.clone(),
            ..Default::default()
        };

        let listed = match self.discover(provider).await {
            Ok(listed) => listed,
            Err(err) => {
                tracing::warn!(provider = %provider.id, error = %err, "discovery failed");
                let issue = Issue::new(
                    IssueSubject::Provider(provider.id.clone()),
                    Severity::Error,
                    "provider-unreachable",
                    format!("model discovery failed: {}", err),
                );
                let newly_opened = self.registry.store().upsert_issue(&issue)?;
                if newly_opened && self.bus.has_consumers() {
                    self.publish(Event::issue_opened(&issue));
                }
                summary.unreachable = true;
                return Ok(summary);
            }
        };
        summary.discovered = listed.len();

        let diff = self.registry.upsert_models_for_provider(&provider.id, &listed)?;
        summary.added = diff.added.len();
        summary.withdrawn = diff.withdrawn.len();

        // catalog-updated fires only when the membership actually changed.
        if !diff.is_empty() && self.bus.has_consumers() {
            let added: Vec<String> = diff.added.iter().map(|m| m.vendor_id.clone()).collect();
            let withdrawn: Vec<String> =
                diff.withdrawn.iter().map(|m| m.vendor_id.clone()).collect();
            self.publish(Event::catalog_updated(&provider.id, &added, &withdrawn));
        }

        for model in &diff.added {
            if let Some(enriched) = self.enrichment.lookup(&model.vendor_id) {
                self.registry.store().update_model_enrichment(
                    &model.id,
                    enriched.display_name.as_deref(),
                    enriched.release_date,
                    &model.caps.merged_with(enriched.caps),
                    None,
                )?;
            }
        }

        let models = self.registry.models_for_provider(&provider.id, false)?;
        let semaphore = Arc::new(Semaphore::new(self.config.model_parallelism.max(1)));
        let auth_failures = AtomicUsize::new(0);
        let attempts = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);

        let run_futures = models.iter().map(|model| {
            let semaphore = semaphore.clone();
            let trigger = trigger.clone();
            let auth_failures = &auth_failures;
            let attempts = &attempts;
            let stop = &stop;
            async move {
                if stop.load(Ordering::Acquire) || cancel.is_cancelled() {
                    return ModelRunSummary {
                        model_id: model.id.clone(),
                        vendor_id: model.vendor_id.clone(),
                        outcome: RunOutcome::Aborted(AbortReason::ProviderUnreachable),
                    };
                }
                let _permit = semaphore.acquire().await.expect("model semaphore closed");
                let outcome = match self.verify_model(provider, model, trigger, cancel).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!(model = %model.vendor_id, error = %e, "run failed");
                        RunOutcome::Aborted(AbortReason::ProviderUnreachable)
                    }
                };
                let done = attempts.fetch_add(1, Ordering::AcqRel) + 1;
                if matches!(outcome, RunOutcome::Aborted(AbortReason::AuthFailed)) {
                    let auth = auth_failures.fetch_add(1, Ordering::AcqRel) + 1;
                    // Every model so far rejected our credentials: the
                    // provider is unreachable for the rest of this tick.
                    if auth >= 2 && auth == done {
                        stop.store(true, Ordering::Release);
                    }
                }
                ModelRunSummary {
                    model_id: model.id.clone(),
                    vendor_id: model.vendor_id.clone(),
                    outcome,
                }
            }
        });
        summary.runs = futures::future::join_all(run_futures).await;

        let auth = auth_failures.load(Ordering::Acquire);
        if !summary.runs.is_empty() && auth >= summary.runs.len().min(2) && auth == attempts.load(Ordering::Acquire)
        {
            let issue = Issue::new(
                IssueSubject::Provider(provider.id.clone()),
                Severity::Error,
                "auth-failed",
                "authentication failed across all probed models".to_string(),
            )
            .with_workaround("rotate or re-issue the provider credential");
            let newly_opened = self.registry.store().upsert_issue(&issue)?;
            if newly_opened && self.bus.has_consumers() {
                self.publish(Event::issue_opened(&issue));
            }
            summary.unreachable = true;
        }

        Ok(summary)
    }

    /// Verify everything a target selector names.
    pub async fn run_targets(
        &self,
        selector: &TargetSelector,
        trigger: RunTrigger,
        cancel: &CancelToken,
    ) -> Result<Vec<ProviderVerification>> {
        let store = self.registry.store();
        match selector {
            TargetSelector::All => {
                let providers = store.list_providers()?;
                let futures = providers
                    .iter()
                    .map(|p| self.verify_provider(p, trigger.clone(), cancel));
                futures::future::join_all(futures)
                    .await
                    .into_iter()
                    .collect()
            }
            TargetSelector::ProviderSet(ids) => {
                let mut out = Vec::with_capacity(ids.len());
                for id in ids {
                    let Some(provider) = store.get_provider(id)? else {
                        return Err(Error::config(format!("unknown provider: {}", id)));
                    };
                    out.push(
                        self.verify_provider(&provider, trigger.clone(), cancel)
                            .await?,
                    );
                }
                Ok(out)
            }
            TargetSelector::ModelSet(ids) => {
                let mut by_provider: HashMap<String, ProviderVerification> = HashMap::new();
                for id in ids {
                    let Some(model) = store.get_model(id)? else {
                        return Err(Error::config(format!("unknown model: {}", id)));
                    };
                    let Some(provider) = store.get_provider(&model.provider_id)? else {
                        return Err(Error::config(format!(
                            "model {} references unknown provider {}",
                            id, model.provider_id
                        )));
                    };
                    self.governor
                        .configure_provider(&provider.id, Self::limits_for(&provider));
                    let outcome = self
                        .verify_model(&provider, &model, trigger.clone(), cancel)
                        .await?;
                    let entry = by_provider
                        .entry(provider.id.clone())
                        .or_insert_with(|| ProviderVerification {
                            provider_id: provider.id.clone(),
                            ..Default::default()
                        });
                    entry.runs.push(ModelRunSummary {
                        model_id: model.id,
                        vendor_id: model.vendor_id,
                        outcome,
                    });
                }
                Ok(by_provider.into_values().collect())
            }
        }
    }
}
