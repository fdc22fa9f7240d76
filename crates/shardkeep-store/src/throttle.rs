//! Store throttle settings
//!
//! Applies `store.throttle.type` and `store.throttle.max_bytes_per_sec` to
//! the shared `StoreRateLimiting` at startup and on every refresh.

use crate::rate_limit::{RateLimitConfig, RateLimitMode, StoreRateLimiting};
use shardkeep_core::ByteSizeValue;
use shardkeep_settings::{Settings, SettingsError, SettingsListener};
use std::sync::Arc;
use tracing::{debug, info};

/// Throttle type key: `none`, `merge` or `all`
pub const THROTTLE_TYPE: &str = "store.throttle.type";
/// Throttle rate key; `0` disables throttling
pub const THROTTLE_MAX_BYTES_PER_SEC: &str = "store.throttle.max_bytes_per_sec";

/// What a refresh changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottleUpdate {
    pub mode_changed: bool,
    pub rate_changed: bool,
}

impl ThrottleUpdate {
    pub fn is_noop(&self) -> bool {
        !self.mode_changed && !self.rate_changed
    }
}

/// Keeps the shared rate limiter in line with the throttle settings
pub struct ThrottleController {
    rate_limiting: Arc<StoreRateLimiting>,
}

impl ThrottleController {
    /// Apply the node's startup settings. Absent keys default to `none` and
    /// unlimited.
    pub fn new(
        node_settings: &Settings,
        rate_limiting: Arc<StoreRateLimiting>,
    ) -> Result<Self, SettingsError> {
        let defaults = RateLimitConfig::default();
        let mode = parse_mode(node_settings, defaults.mode)?;
        let max_bytes_per_sec = parse_rate(node_settings, defaults.max_bytes_per_sec)?;
        rate_limiting.set_mode(mode);
        rate_limiting.set_max_rate(max_bytes_per_sec);
        debug!(
            "using [{}] [{}], with [{}] [{}]",
            THROTTLE_TYPE, mode, THROTTLE_MAX_BYTES_PER_SEC, max_bytes_per_sec
        );
        Ok(Self { rate_limiting })
    }

    pub fn rate_limiting(&self) -> &Arc<StoreRateLimiting> {
        &self.rate_limiting
    }

    /// Apply refreshed settings. The type is handled before the rate, so an
    /// invalid rate is reported after a valid type has already been applied.
    /// Absent keys keep their current value.
    pub fn apply(&self, settings: &Settings) -> Result<ThrottleUpdate, SettingsError> {
        let current = self.rate_limiting.config();
        let mut update = ThrottleUpdate::default();

        let mode = parse_mode(settings, current.mode)?;
        if mode != current.mode {
            info!(
                "updating [{}] from [{}] to [{}]",
                THROTTLE_TYPE, current.mode, mode
            );
            update.mode_changed = self.rate_limiting.set_mode(mode);
        }

        let max_bytes_per_sec = parse_rate(settings, current.max_bytes_per_sec)?;
        if max_bytes_per_sec != current.max_bytes_per_sec {
            info!(
                "updating [{}] from [{}] to [{}], note, type is [{}]",
                THROTTLE_MAX_BYTES_PER_SEC, current.max_bytes_per_sec, max_bytes_per_sec, mode
            );
            update.rate_changed = self.rate_limiting.set_max_rate(max_bytes_per_sec);
        }

        Ok(update)
    }
}

impl SettingsListener for ThrottleController {
    fn on_refresh_settings(&self, settings: &Settings) -> shardkeep_settings::Result<()> {
        self.apply(settings).map(|_| ())
    }
}

fn parse_mode(settings: &Settings, current: RateLimitMode) -> Result<RateLimitMode, SettingsError> {
    match settings.get(THROTTLE_TYPE) {
        None => Ok(current),
        Some(raw) => raw
            .parse::<RateLimitMode>()
            .map_err(|_| SettingsError::InvalidValue {
                key: THROTTLE_TYPE.to_string(),
                value: raw.to_string(),
                reason: "expected one of [none, merge, all]".to_string(),
            }),
    }
}

fn parse_rate(settings: &Settings, current: ByteSizeValue) -> Result<ByteSizeValue, SettingsError> {
    Ok(settings
        .get_as_bytes_size(THROTTLE_MAX_BYTES_PER_SEC)?
        .unwrap_or(current))
}
