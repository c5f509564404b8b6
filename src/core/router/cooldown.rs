//! Cooldown windows and per-deployment runtime stats
//!
//! Both live only in the dispatcher process and are never persisted. The
//! failure window drives health filtering; the stats drive the least-busy
//! and latency-based strategies.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Default sliding-window length
pub const DEFAULT_COOLDOWN_TIME: Duration = Duration::from_secs(60);

/// Default failures within the window before a deployment is excluded
pub const DEFAULT_FAILURE_THRESHOLD: usize = 3;

/// Sliding failure window per deployment
pub struct CooldownTracker {
    cooldown_time: Duration,
    failure_threshold: usize,
    failures: Mutex<HashMap<Uuid, Vec<Instant>>>,
}

impl CooldownTracker {
    pub fn new(cooldown_time: Duration, failure_threshold: usize) -> Self {
        Self {
            cooldown_time,
            failure_threshold,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Append a failure; returns true when the deployment has just crossed
    /// the threshold and is now in cooldown.
    pub fn record_failure(&self, deployment_id: Uuid) -> bool {
        let now = Instant::now();
        let mut failures = self.failures.lock();
        let window = failures.entry(deployment_id).or_default();

        window.push(now);
        window.retain(|at| now.duration_since(*at) < self.cooldown_time);

        window.len() >= self.failure_threshold
    }

    /// Clear the window after a success
    pub fn record_success(&self, deployment_id: Uuid) {
        self.failures.lock().remove(&deployment_id);
    }

    /// Healthy means fewer than `failure_threshold` failures inside the
    /// window. Old failures age out on read, so a cooled-down deployment
    /// returns to healthy after `cooldown_time` with no new failures.
    pub fn is_healthy(&self, deployment_id: Uuid) -> bool {
        let now = Instant::now();
        let mut failures = self.failures.lock();
        match failures.get_mut(&deployment_id) {
            Some(window) => {
                window.retain(|at| now.duration_since(*at) < self.cooldown_time);
                window.len() < self.failure_threshold
            }
            None => true,
        }
    }

    pub fn cooldown_time(&self) -> Duration {
        self.cooldown_time
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_TIME, DEFAULT_FAILURE_THRESHOLD)
    }
}

/// Runtime counters for one deployment. All fields are atomics; routing
/// tolerates slightly stale reads.
#[derive(Debug, Default)]
pub struct DeploymentStats {
    in_flight: AtomicU32,
    total: AtomicU64,
    failures: AtomicU32,
    /// EWMA latency in microseconds; 0 means unsampled
    avg_latency_us: AtomicU64,
    /// Unix seconds of last use
    last_used: AtomicU64,
}

impl DeploymentStats {
    /// Mark a dispatch as started: increments in-flight and total exactly
    /// once. Must be paired with exactly one `end_request`.
    pub fn begin_request(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    /// Mark a dispatch as finished on every exit path
    pub fn end_request(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.touch();
    }

    /// Fold a measured latency into the EWMA: first sample is taken as-is,
    /// afterwards `avg = 0.7*avg + 0.3*sample`.
    pub fn record_latency(&self, latency: Duration) {
        let sample = latency.as_micros() as u64;
        let current = self.avg_latency_us.load(Ordering::Relaxed);
        let updated = if current == 0 {
            sample
        } else {
            (7 * current + 3 * sample) / 10
        };
        self.avg_latency_us.store(updated, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Average latency in seconds; 0.0 means no samples yet
    pub fn avg_latency(&self) -> f64 {
        self.avg_latency_us.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    pub fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.last_used.store(now, Ordering::Relaxed);
    }
}

/// Lazily-created stats per deployment, living for the process
#[derive(Debug, Default)]
pub struct StatsRegistry {
    stats: DashMap<Uuid, Arc<DeploymentStats>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, deployment_id: Uuid) -> Arc<DeploymentStats> {
        self.stats
            .entry(deployment_id)
            .or_insert_with(|| Arc::new(DeploymentStats::default()))
            .clone()
    }
}
