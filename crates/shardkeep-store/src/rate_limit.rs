//! Store I/O rate limiting
//!
//! `StoreRateLimiting` is the single shared throttle configuration for the
//! node. Writers read it on every call through a `RateLimiter`, so a settings
//! refresh takes effect on the next write without reopening anything.

use crate::error::StoreError;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shardkeep_core::ByteSizeValue;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Which store writes are throttled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitMode {
    /// No throttling
    #[default]
    None,
    /// Throttle merge writes only
    Merge,
    /// Throttle every store write
    All,
}

impl RateLimitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitMode::None => "none",
            RateLimitMode::Merge => "merge",
            RateLimitMode::All => "all",
        }
    }
}

impl FromStr for RateLimitMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(RateLimitMode::None),
            "merge" => Ok(RateLimitMode::Merge),
            "all" => Ok(RateLimitMode::All),
            _ => Err(StoreError::InvalidRateLimitMode(s.to_string())),
        }
    }
}

impl fmt::Display for RateLimitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of store write being paced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoKind {
    /// Segment merge
    Merge,
    /// Any other write (flush, recovery, ...)
    Other,
}

/// Snapshot of the throttle configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitConfig {
    pub mode: RateLimitMode,
    /// Zero means unlimited
    pub max_bytes_per_sec: ByteSizeValue,
}

impl RateLimitConfig {
    pub fn new(mode: RateLimitMode, max_bytes_per_sec: ByteSizeValue) -> Self {
        Self {
            mode,
            max_bytes_per_sec,
        }
    }

    /// Whether writes of `kind` are paced under this configuration
    pub fn applies_to(&self, kind: IoKind) -> bool {
        if self.max_bytes_per_sec.is_zero() {
            return false;
        }
        match self.mode {
            RateLimitMode::None => false,
            RateLimitMode::Merge => kind == IoKind::Merge,
            RateLimitMode::All => true,
        }
    }
}

/// Shared, live-updatable throttle configuration
#[derive(Debug)]
pub struct StoreRateLimiting {
    config: ArcSwap<RateLimitConfig>,
    /// Bumped on every effective change
    revision: AtomicU64,
}

impl StoreRateLimiting {
    /// Unthrottled
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            revision: AtomicU64::new(0),
        }
    }

    /// Current configuration
    pub fn config(&self) -> RateLimitConfig {
        **self.config.load()
    }

    pub fn mode(&self) -> RateLimitMode {
        self.config.load().mode
    }

    pub fn max_bytes_per_sec(&self) -> ByteSizeValue {
        self.config.load().max_bytes_per_sec
    }

    /// Number of effective changes so far
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Whether writes of `kind` are currently paced
    pub fn applies_to(&self, kind: IoKind) -> bool {
        self.config.load().applies_to(kind)
    }

    /// Set the mode; returns whether it changed
    pub fn set_mode(&self, mode: RateLimitMode) -> bool {
        self.update(|cur| RateLimitConfig { mode, ..cur })
    }

    /// Set the rate; returns whether it changed
    pub fn set_max_rate(&self, max_bytes_per_sec: ByteSizeValue) -> bool {
        self.update(|cur| RateLimitConfig {
            max_bytes_per_sec,
            ..cur
        })
    }

    fn update<F>(&self, f: F) -> bool
    where
        F: Fn(RateLimitConfig) -> RateLimitConfig,
    {
        let mut changed = false;
        self.config.rcu(|cur| {
            let next = f(**cur);
            changed = next != **cur;
            if changed {
                Arc::new(next)
            } else {
                Arc::clone(cur)
            }
        });
        if changed {
            self.revision.fetch_add(1, Ordering::AcqRel);
        }
        changed
    }

    /// Pacer for writes of `kind` that follows this configuration
    pub fn limiter(self: &Arc<Self>, kind: IoKind) -> RateLimiter {
        RateLimiter::new(Arc::clone(self), kind)
    }
}

impl Default for StoreRateLimiting {
    fn default() -> Self {
        Self::new()
    }
}

/// Paces one stream of writes against the shared configuration.
///
/// Each call reserves its bytes on a virtual timeline that advances at the
/// configured rate; the caller waits until its reservation is due. Idle time
/// is not banked.
#[derive(Debug)]
pub struct RateLimiter {
    limiting: Arc<StoreRateLimiting>,
    kind: IoKind,
    /// End of the last reservation
    next_free: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(limiting: Arc<StoreRateLimiting>, kind: IoKind) -> Self {
        Self {
            limiting,
            kind,
            next_free: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> IoKind {
        self.kind
    }

    /// How long the caller must wait before writing `bytes`
    pub fn pause(&self, bytes: u64) -> Duration {
        self.pause_at(bytes, Instant::now())
    }

    /// Wait as long as `pause` says
    pub fn throttle(&self, bytes: u64) -> Duration {
        let wait = self.pause(bytes);
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        wait
    }

    pub(crate) fn pause_at(&self, bytes: u64, now: Instant) -> Duration {
        let config = self.limiting.config();
        if !config.applies_to(self.kind) {
            *self.next_free.lock() = None;
            return Duration::ZERO;
        }

        let rate = config.max_bytes_per_sec.bytes() as u128;
        let nanos = (bytes as u128 * 1_000_000_000 / rate).min(u64::MAX as u128) as u64;

        let mut next_free = self.next_free.lock();
        let start = match *next_free {
            Some(t) if t > now => t,
            _ => now,
        };
        let target = start + Duration::from_nanos(nanos);
        *next_free = Some(target);
        target.saturating_duration_since(now)
    }
}
