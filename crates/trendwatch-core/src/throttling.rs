use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter as GovernorLimiter};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::backoff::BackoffPolicy;
use crate::config::TrendsConfig;

type DirectRateLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Process-wide gate in front of the upstream.
///
/// A batch holds the single upstream slot from [`RateLimiter::wait_for_slot`]
/// until its [`SlotPermit`] drops. Every individual upstream call additionally
/// draws from a `governor` quota.
#[derive(Clone)]
pub struct RateLimiter {
    slot: Arc<Mutex<()>>,
    quota: Arc<DirectRateLimiter>,
    clock: DefaultClock,
    base_delay: Duration,
    inter_kind_delay: Duration,
    backoff: BackoffPolicy,
    stats: Arc<LimiterCounters>,
}

/// Exclusive right to talk to the upstream for one batch.
#[derive(Debug)]
pub struct SlotPermit {
    _guard: OwnedMutexGuard<()>,
}

#[derive(Debug, Default)]
struct LimiterCounters {
    slots_granted: AtomicU64,
    inter_kind_pauses: AtomicU64,
    quota_waits: AtomicU64,
    backoff_sleeps: AtomicU64,
}

/// Point-in-time copy of the limiter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimiterStats {
    pub slots_granted: u64,
    pub inter_kind_pauses: u64,
    pub quota_waits: u64,
    pub backoff_sleeps: u64,
}

impl RateLimiter {
    pub fn new(
        base_delay: Duration,
        inter_kind_delay: Duration,
        backoff: BackoffPolicy,
        quota_window: Duration,
        quota_limit: u32,
    ) -> Self {
        Self {
            slot: Arc::new(Mutex::new(())),
            quota: Arc::new(GovernorLimiter::direct(quota_from_window(
                quota_window,
                quota_limit,
            ))),
            clock: DefaultClock::default(),
            base_delay,
            inter_kind_delay,
            backoff,
            stats: Arc::new(LimiterCounters::default()),
        }
    }

    pub fn from_config(config: &TrendsConfig) -> Self {
        Self::new(
            config.base_delay,
            config.inter_kind_delay,
            config.backoff_policy(),
            config.quota_window,
            config.quota_limit,
        )
    }

    /// Waits for exclusive upstream access, then pays the base delay.
    pub async fn wait_for_slot(&self) -> SlotPermit {
        let guard = Arc::clone(&self.slot).lock_owned().await;
        debug!(
            delay_ms = duration_ms(self.base_delay),
            "upstream slot acquired, pacing before batch"
        );
        tokio::time::sleep(self.base_delay).await;
        self.stats.slots_granted.fetch_add(1, Ordering::Relaxed);
        SlotPermit { _guard: guard }
    }

    pub async fn inter_kind_pause(&self) {
        self.stats.inter_kind_pauses.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.inter_kind_delay).await;
    }

    /// Blocks until the call quota admits one more upstream request.
    pub async fn acquire_call_budget(&self) {
        while let Err(not_until) = self.quota.check() {
            let wait = not_until.wait_time_from(self.clock.now());
            self.stats.quota_waits.fetch_add(1, Ordering::Relaxed);
            debug!(delay_ms = duration_ms(wait), "upstream call quota exhausted, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Sleeps `backoff_delay(attempt)` and returns the delay paid.
    pub async fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        self.stats.backoff_sleeps.fetch_add(1, Ordering::Relaxed);
        debug!(attempt, delay_ms = duration_ms(delay), "backing off after rate limit");
        tokio::time::sleep(delay).await;
        delay
    }

    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            slots_granted: self.stats.slots_granted.load(Ordering::Relaxed),
            inter_kind_pauses: self.stats.inter_kind_pauses.load(Ordering::Relaxed),
            quota_waits: self.stats.quota_waits.load(Ordering::Relaxed),
            backoff_sleeps: self.stats.backoff_sleeps.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("base_delay", &self.base_delay)
            .field("inter_kind_delay", &self.inter_kind_delay)
            .field("backoff", &self.backoff)
            .field("stats", &self.stats())
            .finish()
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32) -> Quota {
    let burst = NonZeroU32::new(quota_limit.max(1)).unwrap_or(NonZeroU32::MIN);
    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(burst.get())).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
