//! Retry and bandwidth policy

use std::time::Duration;

use super::fetch::FetchOptions;
use crate::config::SyncConfig;
use crate::models::{DataUsage, LedgerEntry, SyncSettings};
use crate::network::ConnectivityState;

const BACKOFF_BASE_SECS: u64 = 30;
const BACKOFF_CAP_SECS: u64 = 60 * 60;

/// How long automatic passes leave a module alone after `consecutive_failures`.
///
/// `None` below `max_failures`; from there `30s * 2^(failures - max)`, capped
/// at one hour.
pub fn backoff_delay(consecutive_failures: u32, max_failures: u32) -> Option<Duration> {
    if consecutive_failures < max_failures {
        return None;
    }
    let exponent = (consecutive_failures - max_failures).min(16);
    let secs = BACKOFF_BASE_SECS
        .saturating_mul(2_u64.pow(exponent))
        .min(BACKOFF_CAP_SECS);
    Some(Duration::from_secs(secs))
}

/// Whether an automatic pass should skip the module right now.
pub fn is_backed_off(entry: &LedgerEntry, max_failures: u32, now: i64) -> bool {
    let Some(delay) = backoff_delay(entry.consecutive_failures, max_failures) else {
        return false;
    };
    let Some(last_attempt) = entry.last_attempt_at else {
        return false;
    };
    let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    now < last_attempt.saturating_add(delay_ms)
}

/// Request hints for a pass.
pub fn fetch_options(
    config: &SyncConfig,
    settings: &SyncSettings,
    connectivity: &ConnectivityState,
) -> FetchOptions {
    FetchOptions {
        compressed: config.request_compression,
        low_bandwidth: settings.data_usage == DataUsage::Low || connectivity.is_constrained(),
    }
}
