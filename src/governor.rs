//! Per-provider rate governance.
//!
//! Each provider gets a token bucket (capacity = configured burst, refill =
//! configured RPM) and a concurrency semaphore capping in-flight requests.
//! `RateLimited(retry-after)` halts the bucket for at least the hinted
//! duration; repeated `Overloaded` applies exponential back-off with full
//! jitter (base 500 ms, cap 60 s).

use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::error::AdapterError;

pub const BACKOFF_BASE: Duration = Duration::from_millis(500);
pub const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Per-provider limits. Values come from configuration or provider
/// declarations; defaults are deliberately conservative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderLimits {
    /// Sustained refill rate, requests per minute.
    pub rpm: u32,
    /// Bucket capacity (burst size).
    pub burst: u32,
    /// In-flight request cap.
    pub max_concurrency: usize,
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self {
            rpm: 60,
            burst: 10,
            max_concurrency: 4,
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
    halted_until: Option<Instant>,
}

struct ProviderGate {
    limits: ProviderLimits,
    bucket: Mutex<BucketState>,
    semaphore: Arc<Semaphore>,
    overload_strikes: AtomicU32,
}

impl ProviderGate {
    fn new(limits: ProviderLimits) -> Self {
        Self {
            bucket: Mutex::new(BucketState {
                tokens: limits.burst as f64,
                last_refill: Instant::now(),
                halted_until: None,
            }),
            semaphore: Arc::new(Semaphore::new(limits.max_concurrency.max(1))),
            overload_strikes: AtomicU32::new(0),
            limits,
        }
    }

    /// Try to take one token; on failure return how long to wait before
    /// the next attempt.
    fn try_take(&self) -> std::result::Result<(), Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        if let Some(until) = bucket.halted_until {
            if now < until {
                return Err(until - now);
            }
            bucket.halted_until = None;
        }

        let refill_per_sec = self.limits.rpm as f64 / 60.0;
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens =
            (bucket.tokens + elapsed * refill_per_sec).min(self.limits.burst as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else if refill_per_sec > 0.0 {
            let deficit = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(deficit / refill_per_sec))
        } else {
            Err(Duration::from_secs(1))
        }
    }

    fn halt_for(&self, wait: Duration) {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        let until = Instant::now() + wait;
        match bucket.halted_until {
            Some(existing) if existing >= until => {}
            _ => bucket.halted_until = Some(until),
        }
    }
}

/// A held admission: one in-flight request slot on one provider.
pub struct AdmitPermit {
    _permit: OwnedSemaphorePermit,
}

/// Rate governor over all configured providers.
pub struct RateGovernor {
    gates: Mutex<HashMap<String, Arc<ProviderGate>>>,
    defaults: ProviderLimits,
}

impl RateGovernor {
    pub fn new(defaults: ProviderLimits) -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
            defaults,
        }
    }

    /// Register provider-specific limits, replacing any previous gate.
    pub fn configure_provider(&self, provider_id: &str, limits: ProviderLimits) {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        gates.insert(provider_id.to_string(), Arc::new(ProviderGate::new(limits)));
    }

    fn gate(&self, provider_id: &str) -> Arc<ProviderGate> {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        gates
            .entry(provider_id.to_string())
            .or_insert_with(|| Arc::new(ProviderGate::new(self.defaults)))
            .clone()
    }

    /// Admit one request for the provider: wait for a concurrency slot,
    /// then for a bucket token (honouring any halt in force).
    pub async fn admit(&self, provider_id: &str) -> AdmitPermit {
        let gate = self.gate(provider_id);
        let permit = gate
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("governor semaphore closed");

        loop {
            match gate.try_take() {
                Ok(()) => break,
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
        AdmitPermit { _permit: permit }
    }

    /// Feed an adapter call result back into the governor. Returns the
    /// back-off the caller should honour before retrying, when any.
    pub fn observe<T>(
        &self,
        provider_id: &str,
        result: &std::result::Result<T, AdapterError>,
    ) -> Option<Duration> {
        match result {
            Ok(_) => {
                self.gate(provider_id)
                    .overload_strikes
                    .store(0, Ordering::Relaxed);
                None
            }
            Err(AdapterError::RateLimited { retry_after }) => {
                Some(self.report_rate_limited(provider_id, *retry_after))
            }
            Err(AdapterError::Overloaded) => Some(self.report_overloaded(provider_id)),
            Err(_) => None,
        }
    }

    /// Halt the provider for at least the hinted duration (or one back-off
    /// step when no hint was supplied). Returns the wait applied.
    pub fn report_rate_limited(
        &self,
        provider_id: &str,
        retry_after: Option<Duration>,
    ) -> Duration {
        let gate = self.gate(provider_id);
        let wait = retry_after.unwrap_or_else(|| {
            let strikes = gate.overload_strikes.fetch_add(1, Ordering::Relaxed);
            backoff_with_jitter(strikes)
        });
        gate.halt_for(wait);
        tracing::debug!(provider = provider_id, wait_ms = wait.as_millis() as u64, "rate limited, bucket halted");
        wait
    }

    /// Record an overload and halt with exponential back-off + full jitter.
    pub fn report_overloaded(&self, provider_id: &str) -> Duration {
        let gate = self.gate(provider_id);
        let strikes = gate.overload_strikes.fetch_add(1, Ordering::Relaxed);
        let wait = backoff_with_jitter(strikes);
        gate.halt_for(wait);
        tracing::debug!(provider = provider_id, strikes = strikes + 1, wait_ms = wait.as_millis() as u64, "overloaded, backing off");
        wait
    }
}

/// Full-jitter exponential back-off: uniform in (0, base × 2^strikes],
/// capped at [`BACKOFF_CAP`].
fn backoff_with_jitter(strikes: u32) -> Duration {
    let exp = BACKOFF_BASE.as_millis() as u64 * (1u64 << strikes.min(10));
    let ceiling = exp.min(BACKOFF_CAP.as_millis() as u64).max(1);
    Duration::from_millis(rand::thread_rng().gen_range(1..=ceiling))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_refill() {
        let governor = RateGovernor::new(ProviderLimits {
            rpm: 60,
            burst: 2,
            max_concurrency: 8,
        });

        // Burst admits immediately.
        let start = Instant::now();
        governor.admit("p").await;
        governor.admit("p").await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        // Third token needs ~1s of refill at 60 rpm.
        governor.admit("p").await;
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_halts_bucket() {
        let governor = RateGovernor::new(ProviderLimits::default());
        governor.admit("p").await;

        let wait = governor.report_rate_limited("p", Some(Duration::from_secs(2)));
        assert_eq!(wait, Duration::from_secs(2));

        let start = Instant::now();
        governor.admit("p").await;
        // No request admitted before retry-after has elapsed.
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let governor = Arc::new(RateGovernor::new(ProviderLimits {
            rpm: 6000,
            burst: 100,
            max_concurrency: 1,
        }));

        let first = governor.admit("p").await;
        let g = governor.clone();
        let second = tokio::spawn(async move { g.admit("p").await });
        tokio::task::yield_now().await;
        assert!(!second.is_finished());

        drop(first);
        second.await.unwrap();
    }

    #[tokio::test]
    async fn test_observe_resets_strikes_on_success() {
        let governor = RateGovernor::new(ProviderLimits::default());
        governor.report_overloaded("p");
        governor.report_overloaded("p");
        assert!(governor.gate("p").overload_strikes.load(Ordering::Relaxed) >= 2);

        governor.observe::<()>("p", &Ok(()));
        assert_eq!(governor.gate("p").overload_strikes.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        for strikes in 0..20 {
            let wait = backoff_with_jitter(strikes);
            assert!(wait <= BACKOFF_CAP);
            assert!(wait >= Duration::from_millis(1));
        }
    }
}
