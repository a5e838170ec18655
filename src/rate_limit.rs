//! Per-client sliding-window rate limiting.
//!
//! Clients are keyed by IP. Each key keeps the admission instants from the
//! last window; a request is denied once that count reaches capacity. Idle
//! keys are swept periodically so the table does not grow without bound.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::http::HeaderMap;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

const FORWARDED_FOR: &str = "x-forwarded-for";
const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug)]
struct Buckets {
    hits: HashMap<String, VecDeque<Instant>>,
    last_sweep: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    sweep_interval: Duration,
    state: Mutex<Buckets>,
}

impl RateLimiter {
    /// Limiter admitting `capacity` requests per client per minute.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_window(capacity, DEFAULT_WINDOW, DEFAULT_SWEEP_INTERVAL)
    }

    #[must_use]
    pub fn with_window(capacity: usize, window: Duration, sweep_interval: Duration) -> Self {
        Self::starting_at(capacity, window, sweep_interval, Instant::now())
    }

    fn starting_at(
        capacity: usize,
        window: Duration,
        sweep_interval: Duration,
        now: Instant,
    ) -> Self {
        Self {
            capacity,
            window,
            sweep_interval,
            state: Mutex::new(Buckets {
                hits: HashMap::new(),
                last_sweep: now,
            }),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record a request from `client` and report whether it is allowed.
    pub fn admit(&self, client: &str) -> bool {
        self.admit_at(client, Instant::now())
    }

    /// Same as [`RateLimiter::admit`] with an explicit clock reading.
    pub fn admit_at(&self, client: &str, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if now.saturating_duration_since(state.last_sweep) >= self.sweep_interval {
            self.sweep(&mut state, now);
        }

        let bucket = state.hits.entry(client.to_string()).or_default();
        prune(bucket, now, self.window);
        if bucket.len() >= self.capacity {
            tracing::debug!(client, "rate limit exceeded");
            return false;
        }
        bucket.push_back(now);
        true
    }

    /// Number of clients currently holding window state.
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .hits
            .len()
    }

    fn sweep(&self, state: &mut Buckets, now: Instant) {
        let before = state.hits.len();
        state.hits.retain(|_, bucket| {
            prune(bucket, now, self.window);
            !bucket.is_empty()
        });
        state.last_sweep = now;
        let removed = before - state.hits.len();
        if removed > 0 {
            tracing::debug!(removed, "swept idle rate-limit entries");
        }
    }
}

// Entries at or before `now - window` have left the window.
fn prune(bucket: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = bucket.front() {
        if now.saturating_duration_since(oldest) >= window {
            bucket.pop_front();
        } else {
            break;
        }
    }
}

/// Resolve the client key: first `X-Forwarded-For` hop, else the peer address.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }
    peer.map_or_else(|| UNKNOWN_CLIENT.to_string(), |addr| addr.ip().to_string())
}
