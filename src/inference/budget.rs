// src/inference/budget.rs
//! Shared upstream quota: one `governor` rate limiter + one daily counter for all
//! task kinds, since summarize/sentiment/bias hit the same provider account.

use std::num::NonZeroU32;
use std::sync::Mutex;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

use super::InferenceError;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone)]
struct DailyCounter {
    day: i64,
    count: u32,
}

impl Default for DailyCounter {
    fn default() -> Self {
        Self { day: today(), count: 0 }
    }
}

impl DailyCounter {
    fn is_expired(&self) -> bool {
        self.day != today()
    }

    fn reset_to_today(&mut self) {
        self.day = today();
        self.count = 0;
    }
}

pub struct QuotaBudget {
    limiter: Option<DirectLimiter>,
    daily_limit: Option<u32>,
    counter: Mutex<DailyCounter>,
}

impl std::fmt::Debug for QuotaBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaBudget")
            .field("paced", &self.limiter.is_some())
            .field("daily_limit", &self.daily_limit)
            .finish()
    }
}

impl QuotaBudget {
    /// `per_minute = None` disables pacing; `daily_limit = None` disables the hard cap.
    pub fn new(per_minute: Option<u32>, daily_limit: Option<u32>) -> Self {
        let limiter = per_minute
            .and_then(NonZeroU32::new)
            .map(|rpm| RateLimiter::direct(Quota::per_minute(rpm)));
        Self {
            limiter,
            daily_limit,
            counter: Mutex::new(DailyCounter::default()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None, None)
    }

    /// Calls made today (diagnostics).
    pub fn used_today(&self) -> u32 {
        self.counter.lock().unwrap_or_else(|p| p.into_inner()).count
    }

    /// Take one request slot. Fails fast with `RateLimited` once the daily quota
    /// is gone, otherwise waits for the per-minute limiter.
    pub async fn acquire(&self) -> Result<(), InferenceError> {
        {
            let mut g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
            if g.is_expired() {
                g.reset_to_today();
            }
            if let Some(limit) = self.daily_limit {
                if g.count >= limit {
                    return Err(InferenceError::RateLimited {
                        message: format!("daily quota of {limit} requests exhausted"),
                    });
                }
            }
            g.count = g.count.saturating_add(1);
        }

        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        Ok(())
    }
}

fn today() -> i64 {
    chrono::Utc::now().timestamp().div_euclid(86_400)
}
