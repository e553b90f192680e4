use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorLimiter};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::entity::marketplace::Marketplace;

/// Type alias for the governor rate limiter.
type HourlyLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

const WINDOW: Duration = Duration::from_secs(60);
const SECOND: Duration = Duration::from_secs(1);

/// Default request budgets per marketplace.
pub mod rate_limits {
    pub const OZON_RPS: u32 = 10;
    pub const OZON_RPM: u32 = 300;
    pub const OZON_RPH: u32 = 10_000;

    pub const WILDBERRIES_RPS: u32 = 5;
    pub const WILDBERRIES_RPM: u32 = 100;
    pub const WILDBERRIES_RPH: u32 = 3_000;
}

/// Request budget for one marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
}

impl RateLimitConfig {
    /// Default budget for a marketplace.
    pub fn for_marketplace(marketplace: Marketplace) -> Self {
        match marketplace {
            Marketplace::Ozon => Self {
                requests_per_second: rate_limits::OZON_RPS,
                requests_per_minute: rate_limits::OZON_RPM,
                requests_per_hour: rate_limits::OZON_RPH,
            },
            Marketplace::Wildberries => Self {
                requests_per_second: rate_limits::WILDBERRIES_RPS,
                requests_per_minute: rate_limits::WILDBERRIES_RPM,
                requests_per_hour: rate_limits::WILDBERRIES_RPH,
            },
        }
    }
}

/// Budgets for every marketplace, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub ozon: RateLimitConfig,
    pub wildberries: RateLimitConfig,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            ozon: RateLimitConfig::for_marketplace(Marketplace::Ozon),
            wildberries: RateLimitConfig::for_marketplace(Marketplace::Wildberries),
        }
    }
}

impl RateLimitSettings {
    pub fn get(&self, marketplace: Marketplace) -> RateLimitConfig {
        match marketplace {
            Marketplace::Ozon => self.ozon,
            Marketplace::Wildberries => self.wildberries,
        }
    }
}

#[derive(Debug)]
struct RateLimitState {
    config: RateLimitConfig,
    /// Request timestamps from the last 60 seconds, oldest first.
    window: VecDeque<Instant>,
}

impl RateLimitState {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            window: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.window.front() {
            if now.saturating_duration_since(oldest) >= WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn admit(&mut self, now: Instant) -> Duration {
        self.prune(now);

        if let Some(&oldest) = self.window.front()
            && self.window.len() >= self.config.requests_per_minute as usize
        {
            return WINDOW.saturating_sub(now.saturating_duration_since(oldest));
        }

        let last_second = self
            .window
            .iter()
            .rev()
            .take_while(|t| now.saturating_duration_since(**t) < SECOND)
            .count();
        let rps = self.config.requests_per_second.max(1);
        if last_second >= rps as usize {
            return SECOND / rps;
        }

        Duration::ZERO
    }
}

/// Sliding-window request admission per marketplace.
///
/// Per-second and per-minute limits are enforced from a 60 second window of
/// request timestamps; the hourly budget is delegated to a `governor` quota
/// so the window never has to hold an hour of history.
///
/// # Example
///
/// ```ignore
/// let limiter = RateLimiter::new(&RateLimitSettings::default());
/// limiter.wait(Marketplace::Ozon).await;
/// let page = client.fetch_page(None, &filters).await;
/// limiter.record(Marketplace::Ozon);
/// ```
pub struct RateLimiter {
    states: Mutex<HashMap<Marketplace, RateLimitState>>,
    hourly: HashMap<Marketplace, Arc<HourlyLimiter>>,
}

impl RateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Self {
        let mut states = HashMap::new();
        let mut hourly = HashMap::new();
        for marketplace in Marketplace::ALL {
            let config = settings.get(marketplace);
            let per_hour =
                NonZeroU32::new(config.requests_per_hour).unwrap_or(NonZeroU32::MIN);
            hourly.insert(
                marketplace,
                Arc::new(GovernorLimiter::direct(Quota::per_hour(per_hour))),
            );
            states.insert(marketplace, RateLimitState::new(config));
        }

        Self {
            states: Mutex::new(states),
            hourly,
        }
    }

    /// How long the caller must wait before the next request to `source`.
    ///
    /// Returns zero when a request may be sent immediately.
    pub fn admit(&self, source: Marketplace) -> Duration {
        let now = Instant::now();
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states
            .entry(source)
            .or_insert_with(|| RateLimitState::new(RateLimitConfig::for_marketplace(source)))
            .admit(now)
    }

    /// Record that a request to `source` has just completed.
    pub fn record(&self, source: Marketplace) {
        let now = Instant::now();
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let state = states
            .entry(source)
            .or_insert_with(|| RateLimitState::new(RateLimitConfig::for_marketplace(source)));
        state.prune(now);
        state.window.push_back(now);
    }

    /// Wait until a request to `source` is admitted.
    pub async fn wait(&self, source: Marketplace) {
        loop {
            let delay = self.admit(source);
            if delay.is_zero() {
                break;
            }
            tracing::debug!(
                source = %source,
                delay_ms = delay.as_millis() as u64,
                "Rate limit window full, waiting"
            );
            tokio::time::sleep(delay).await;
        }

        if let Some(hourly) = self.hourly.get(&source) {
            hourly.until_ready().await;
        }
    }

    /// Number of requests currently counted in the 60 second window.
    pub fn window_len(&self, source: Marketplace) -> usize {
        let now = Instant::now();
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.get_mut(&source).map_or(0, |state| {
            state.prune(now);
            state.window.len()
        })
    }
}
