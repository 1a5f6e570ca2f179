//! Quota-aware rate limiter for Gmail API calls
//!
//! Gmail meters each user in quota units per second (250 by default). The
//! operations used by the draft automation cost:
//! - `messages.list`, `messages.get`, `messages.modify`: 5 units
//! - `drafts.list`, `drafts.get`: 5 units
//! - `drafts.create`: 10 units
//!
//! A token bucket tracks the units: it refills continuously at the quota rate,
//! allows bursting up to its capacity and makes callers wait when it runs dry.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::{AutomationError, Result};

/// Bucket capacity in seconds of quota
pub const QUOTA_BURST_SECONDS: f64 = 2.0;

/// Gmail API operations and their quota cost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaCost {
    MessagesList,
    MessagesGet,
    MessagesModify,
    DraftsList,
    DraftsGet,
    DraftsCreate,
}

impl QuotaCost {
    /// Cost of the most expensive operation; a bucket must hold at least this much
    pub const MAX_UNITS: u32 = 10;

    /// Quota units charged for the operation
    pub fn units(&self) -> u32 {
        match self {
            QuotaCost::MessagesList
            | QuotaCost::MessagesGet
            | QuotaCost::MessagesModify
            | QuotaCost::DraftsList
            | QuotaCost::DraftsGet => 5,
            QuotaCost::DraftsCreate => 10,
        }
    }
}

/// Token bucket shared by every request of one client
#[derive(Debug, Clone)]
pub struct QuotaRateLimiter {
    inner: Arc<Mutex<BucketState>>,
}

#[derive(Debug)]
struct BucketState {
    available_units: f64,
    max_units: f64,
    /// Units added per second
    refill_rate: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.available_units = (self.available_units + elapsed * self.refill_rate).min(self.max_units);
        self.last_refill = now;
    }

    fn take(&mut self, units: f64) -> bool {
        if self.available_units >= units {
            self.available_units -= units;
            true
        } else {
            false
        }
    }
}

impl QuotaRateLimiter {
    /// 250 units/second with a two second burst
    pub fn new() -> Self {
        Self::per_second(250.0)
    }

    /// Bucket refilling at `units_per_second` that holds `QUOTA_BURST_SECONDS` of quota
    pub fn per_second(units_per_second: f64) -> Self {
        Self::with_config(units_per_second, units_per_second * QUOTA_BURST_SECONDS)
    }

    pub fn with_config(refill_rate: f64, max_units: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BucketState {
                available_units: max_units,
                max_units,
                refill_rate,
                last_refill: Instant::now(),
            })),
        }
    }

    /// Consume the units for `cost`, sleeping until the bucket holds enough
    ///
    /// Fails straight away when the bucket can never hold `cost`.
    pub async fn acquire(&self, cost: QuotaCost) -> Result<()> {
        let units_needed = cost.units() as f64;

        loop {
            let wait_time = {
                let mut state = self.inner.lock().await;
                if units_needed > state.max_units || state.refill_rate <= 0.0 {
                    return Err(AutomationError::Config(format!(
                        "quota bucket of {:.0} units at {:.1}/s cannot cover {:?} ({} units)",
                        state.max_units, state.refill_rate, cost, units_needed
                    )));
                }
                state.refill();

                trace!(
                    "Quota state: {:.1}/{:.1} units available, requesting {:.0} for {:?}",
                    state.available_units,
                    state.max_units,
                    units_needed,
                    cost
                );

                if state.take(units_needed) {
                    return Ok(());
                }

                let deficit = units_needed - state.available_units;
                Duration::from_secs_f64(deficit / state.refill_rate)
            };

            // Sleep without holding the lock
            debug!(
                "Quota exhausted, waiting {:.2}s for {} units",
                wait_time.as_secs_f64(),
                units_needed
            );
            tokio::time::sleep(wait_time).await;
        }
    }

    #[cfg(test)]
    async fn available_units(&self) -> f64 {
        let mut state = self.inner.lock().await;
        state.refill();
        state.available_units
    }
}

impl Default for QuotaRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
