//! Scheduler for named recurring verification jobs.
//!
//! Jobs are persisted in the catalog store and reconciled against the
//! wall clock on start: missed firings are not back-filled, but a single
//! catch-up run fires when the next due instant is already in the past.
//! The scheduler is tick-driven; each tick fires every due job and awaits
//! its runs, which keeps behaviour deterministic under a test clock.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::catalog::{new_id, JobRecord, OverlapPolicy, TargetSelector};
use crate::engine::{CancelToken, VerificationEngine};
use crate::error::{Error, Result};
use crate::events::Event;

/// Translate a cadence into a cron schedule. Coarse cadences map onto
/// generated expressions; anything else is parsed as a calendar
/// expression (seconds-resolution cron; five-field forms get a seconds
/// column prepended).
pub fn cadence_schedule(cadence: &str) -> Result<Schedule> {
    let expression = match cadence.trim() {
        "hourly" => "0 0 * * * *".to_string(),
        "daily" => "0 0 0 * * *".to_string(),
        "weekly" => "0 0 0 * * Mon".to_string(),
        "monthly" => "0 0 0 1 * *".to_string(),
        custom => {
            let fields = custom.split_whitespace().count();
            if fields == 5 {
                format!("0 {}", custom)
            } else {
                custom.to_string()
            }
        }
    };
    Schedule::from_str(&expression)
        .map_err(|e| Error::Schedule(format!("bad cadence '{}': {}", cadence, e)))
}

/// Next due instant strictly after the reference.
pub fn next_due(cadence: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    let schedule = cadence_schedule(cadence)?;
    Ok(schedule.after(&after).next())
}

/// Clock abstraction so tests can drive virtual time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct Scheduler {
    engine: Arc<VerificationEngine>,
    clock: Arc<dyn Clock>,
    jobs: Mutex<HashMap<String, JobRecord>>,
    running: Mutex<HashSet<String>>,
    queued: Mutex<HashMap<String, u32>>,
    cancels: Mutex<HashMap<String, CancelToken>>,
    /// Jobs granted a one-shot catch-up because their next due instant
    /// was already past at reconciliation.
    catch_up: Mutex<HashSet<String>>,
}

impl Scheduler {
    pub fn new(engine: Arc<VerificationEngine>, clock: Arc<dyn Clock>) -> Self {
        Self {
            engine,
            clock,
            jobs: Mutex::new(HashMap::new()),
            running: Mutex::new(HashSet::new()),
            queued: Mutex::new(HashMap::new()),
            cancels: Mutex::new(HashMap::new()),
            catch_up: Mutex::new(HashSet::new()),
        }
    }

    /// Load persisted jobs and mark overdue ones for a single catch-up.
    pub fn reconcile(&self) -> Result<()> {
        let persisted = self.engine.registry().store().list_jobs()?;
        let now = self.clock.now();
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let mut catch_up = self.catch_up.lock().unwrap_or_else(|e| e.into_inner());
        for job in persisted {
            if !job.paused {
                let reference = job.last_run_at.unwrap_or(job.created_at);
                if let Some(due) = next_due(&job.cadence, reference)? {
                    if due <= now {
                        catch_up.insert(job.id.clone());
                    }
                }
            }
            jobs.insert(job.id.clone(), job);
        }
        tracing::info!(
            jobs = jobs.len(),
            catch_up = catch_up.len(),
            "scheduler reconciled"
        );
        Ok(())
    }

    // ==================== Job operations ====================

    pub fn create_job(
        &self,
        name: impl Into<String>,
        selector: TargetSelector,
        cadence: impl Into<String>,
        overlap: OverlapPolicy,
    ) -> Result<JobRecord> {
        let cadence = cadence.into();
        // Validate up front; a job with an unparsable cadence can never fire.
        cadence_schedule(&cadence)?;
        let job = JobRecord {
            id: new_id(),
            name: name.into(),
            selector,
            cadence,
            overlap,
            paused: false,
            created_at: self.clock.now(),
            last_run_at: None,
        };
        self.engine.registry().store().upsert_job(&job)?;
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    pub fn list_jobs(&self) -> Vec<JobRecord> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<JobRecord> = jobs.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    fn update_job<F>(&self, id: &str, mutate: F) -> Result<JobRecord>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| Error::Schedule(format!("unknown job: {}", id)))?;
        mutate(job);
        let job = job.clone();
        drop(jobs);
        self.engine.registry().store().upsert_job(&job)?;
        Ok(job)
    }

    pub fn pause(&self, id: &str) -> Result<JobRecord> {
        self.update_job(id, |job| job.paused = true)
    }

    pub fn resume(&self, id: &str) -> Result<JobRecord> {
        self.update_job(id, |job| job.paused = false)
    }

    pub fn reschedule(&self, id: &str, cadence: impl Into<String>) -> Result<JobRecord> {
        let cadence = cadence.into();
        cadence_schedule(&cadence)?;
        self.update_job(id, |job| job.cadence = cadence)
    }

    /// Delete a job, cancelling its in-flight runs.
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.cancel_job(id);
        {
            let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
            jobs.remove(id);
        }
        self.engine.registry().store().delete_job(id)
    }

    /// Cancel a job's in-flight runs; the cancellation propagates to
    /// every run the job started.
    pub fn cancel_job(&self, id: &str) {
        let cancels = self.cancels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = cancels.get(id) {
            token.cancel();
        }
    }

    // ==================== Firing ====================

    fn is_due(&self, job: &JobRecord, now: DateTime<Utc>) -> bool {
        if job.paused {
            return false;
        }
        {
            let catch_up = self.catch_up.lock().unwrap_or_else(|e| e.into_inner());
            if catch_up.contains(&job.id) {
                return true;
            }
        }
        let reference = job.last_run_at.unwrap_or(job.created_at);
        match next_due(&job.cadence, reference) {
            Ok(Some(due)) => due <= now,
            _ => false,
        }
    }

    /// Fire one job now, honouring its overlap policy, and await its runs.
    async fn fire(&self, job: JobRecord) -> Result<()> {
        {
            let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            if running.contains(&job.id) {
                match job.overlap {
                    OverlapPolicy::SkipIfRunning => {
                        tracing::debug!(job = %job.name, "overlap: skipping firing");
                        return Ok(());
                    }
                    OverlapPolicy::Queue => {
                        drop(running);
                        let mut queued = self.queued.lock().unwrap_or_else(|e| e.into_inner());
                        *queued.entry(job.id.clone()).or_insert(0) += 1;
                        tracing::debug!(job = %job.name, "overlap: queued follow-up firing");
                        return Ok(());
                    }
                }
            }
        }

        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job.id.clone());
        let cancel = CancelToken::new();
        self.cancels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job.id.clone(), cancel.clone());

        loop {
            let fired_at = self.clock.now();
            let bus = self.engine.bus();
            if bus.has_consumers() {
                self.engine.publish(Event::job_started(&job.id));
            }

            let result = self
                .engine
                .run_targets(&job.selector, crate::catalog::RunTrigger::Scheduled {
                    job_id: job.id.clone(),
                }, &cancel)
                .await;

            let runs = match &result {
                Ok(verifications) => verifications.iter().map(|v| v.runs.len()).sum(),
                Err(_) => 0,
            };
            if let Err(e) = &result {
                tracing::error!(job = %job.name, error = %e, "job run failed");
            }
            if bus.has_consumers() {
                self.engine.publish(Event::job_finished(&job.id, runs));
            }

            self.update_job(&job.id, |j| j.last_run_at = Some(fired_at))?;
            {
                let mut catch_up = self.catch_up.lock().unwrap_or_else(|e| e.into_inner());
                catch_up.remove(&job.id);
            }

            // Drain one queued firing, if the overlap policy queued any.
            let run_again = {
                let mut queued = self.queued.lock().unwrap_or_else(|e| e.into_inner());
                match queued.get_mut(&job.id) {
                    Some(count) if *count > 0 => {
                        *count -= 1;
                        true
                    }
                    _ => false,
                }
            };
            if !run_again || cancel.is_cancelled() {
                break;
            }
        }

        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&job.id);
        self.cancels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&job.id);
        Ok(())
    }

    /// One scheduler pass: fire every due job and await their runs.
    pub async fn tick(&self) -> Result<usize> {
        let now = self.clock.now();
        let due: Vec<JobRecord> = {
            let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
            jobs.values()
                .filter(|job| self.is_due(job, now))
                .cloned()
                .collect()
        };
        let fired = due.len();
        for job in due {
            self.fire(job).await?;
        }
        Ok(fired)
    }

    /// Run the scheduler loop until `shutdown` resolves.
    pub async fn run(&self, tick_interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "scheduler tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("scheduler shutting down");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cadence_mapping() {
        for cadence in ["hourly", "daily", "weekly", "monthly"] {
            assert!(cadence_schedule(cadence).is_ok(), "cadence {}", cadence);
        }
        // Explicit six-field calendar expression.
        assert!(cadence_schedule("0 30 9 * * Mon-Fri").is_ok());
        // Five-field forms gain a seconds column.
        assert!(cadence_schedule("30 9 * * Mon-Fri").is_ok());
        assert!(cadence_schedule("every now and then").is_err());
    }

    #[test]
    fn test_next_due_hourly() {
        let reference = DateTime::parse_from_rfc3339("2026-03-01T10:15:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let due = next_due("hourly", reference).unwrap().unwrap();
        assert_eq!(due.to_rfc3339(), "2026-03-01T11:00:00+00:00");
    }

    #[test]
    fn test_manual_clock() {
        let start = Utc::now();
        let clock = ManualClock::starting_at(start);
        clock.advance(chrono::Duration::hours(2));
        assert_eq!(clock.now(), start + chrono::Duration::hours(2));
    }

    use crate::testutil::{Harness, ModelBehavior};

    fn scheduler_harness() -> (Harness, Arc<ManualClock>, Scheduler) {
        let harness = Harness::new();
        harness.add_provider("p1");
        harness.mock.add_model("m", ModelBehavior::default());
        let clock = Arc::new(ManualClock::starting_at(
            DateTime::parse_from_rfc3339("2026-03-01T10:30:00Z")
                .unwrap()
                .with_timezone(&Utc),
        ));
        let scheduler = Scheduler::new(harness.engine.clone(), clock.clone());
        (harness, clock, scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_hourly_job_fires_once_per_hour() {
        let (harness, clock, scheduler) = scheduler_harness();
        scheduler
            .create_job(
                "hourly-p1",
                TargetSelector::ProviderSet(vec!["p1".into()]),
                "hourly",
                OverlapPolicy::SkipIfRunning,
            )
            .unwrap();

        // Not yet due.
        assert_eq!(scheduler.tick().await.unwrap(), 0);

        // Advance three hours, ticking once per hour: exactly three runs.
        for _ in 0..3 {
            clock.advance(chrono::Duration::hours(1));
            assert_eq!(scheduler.tick().await.unwrap(), 1);
            // A second tick in the same hour fires nothing.
            assert_eq!(scheduler.tick().await.unwrap(), 0);
        }

        let models = harness.store.models_for_provider("p1", false).unwrap();
        assert_eq!(models.len(), 1);
        let history = harness.store.run_history(&models[0].id, 10).unwrap();
        assert_eq!(history.len(), 3);
        // Runs are temporally ordered (newest first).
        assert!(history.windows(2).all(|w| w[0].1 >= w[1].1));

        let jobs = scheduler.list_jobs();
        assert!(jobs[0].last_run_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_catch_up_fires_single_run() {
        let (harness, clock, scheduler) = scheduler_harness();
        let job = scheduler
            .create_job(
                "hourly-all",
                TargetSelector::All,
                "hourly",
                OverlapPolicy::SkipIfRunning,
            )
            .unwrap();

        // Simulate a long offline gap, then reconcile as on process start.
        clock.advance(chrono::Duration::hours(5));
        scheduler.reconcile().unwrap();

        // One catch-up firing, not five.
        assert_eq!(scheduler.tick().await.unwrap(), 1);
        assert_eq!(scheduler.tick().await.unwrap(), 0);

        let models = harness.store.models_for_provider("p1", false).unwrap();
        let history = harness.store.run_history(&models[0].id, 10).unwrap();
        assert_eq!(history.len(), 1);
        let _ = job;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_and_delete() {
        let (harness, clock, scheduler) = scheduler_harness();
        let job = scheduler
            .create_job(
                "hourly-all",
                TargetSelector::All,
                "hourly",
                OverlapPolicy::SkipIfRunning,
            )
            .unwrap();

        scheduler.pause(&job.id).unwrap();
        clock.advance(chrono::Duration::hours(2));
        assert_eq!(scheduler.tick().await.unwrap(), 0);

        scheduler.resume(&job.id).unwrap();
        assert_eq!(scheduler.tick().await.unwrap(), 1);

        assert!(scheduler.delete(&job.id).unwrap());
        assert!(scheduler.list_jobs().is_empty());
        assert!(harness
            .engine
            .registry()
            .store()
            .list_jobs()
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_validates_cadence() {
        let (_harness, _clock, scheduler) = scheduler_harness();
        let job = scheduler
            .create_job(
                "hourly-all",
                TargetSelector::All,
                "hourly",
                OverlapPolicy::SkipIfRunning,
            )
            .unwrap();
        assert!(scheduler.reschedule(&job.id, "nonsense").is_err());
        let updated = scheduler.reschedule(&job.id, "daily").unwrap();
        assert_eq!(updated.cadence, "daily");
    }
}
