//! Per-client token buckets for the rate limiter.
//!
//! A bucket refills by `elapsed_nanoseconds * rate / 1e9`, capped at
//! `max_tokens`; each admitted request consumes one token. Buckets are
//! created lazily per client address and live until process exit. The
//! registry mutex guards the address map; each bucket has its own mutex so
//! per-address decisions are linearizable without serializing all clients.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

#[derive(Debug)]
pub struct TokenBucket {
    rate: i64,
    max_tokens: i64,
    now_tokens: i64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate: i64, max_tokens: i64) -> Self {
        Self {
            rate,
            max_tokens,
            now_tokens: max_tokens,
            last_refill: Instant::now(),
        }
    }

    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.now_tokens > 0 {
            self.now_tokens -= 1;
            return true;
        }
        false
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let earned = elapsed.as_nanos() as i64 * self.rate / NANOS_PER_SECOND;
        self.now_tokens = self.max_tokens.min(self.now_tokens + earned);
        self.last_refill = now;
    }
}

pub struct RateLimiter {
    rate: i64,
    max_tokens: i64,
    clients: Mutex<HashMap<IpAddr, Arc<Mutex<TokenBucket>>>>,
}

impl RateLimiter {
    pub fn new(rate: i64, max_tokens: i64) -> Self {
        Self {
            rate,
            max_tokens,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// One admission decision for `addr`. Lazily creates the bucket on the
    /// first request from an address.
    pub fn allow(&self, addr: IpAddr) -> bool {
        let bucket = {
            let mut clients = self
                .clients
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            clients
                .entry(addr)
                .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(self.rate, self.max_tokens))))
                .clone()
        };

        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.allow()
    }
}
