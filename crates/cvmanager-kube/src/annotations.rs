//! Workload annotation parsing

use std::collections::BTreeMap;
use std::time::Duration;

pub use cvmanager_core::ROLLBACK_AFTER_ANNOTATION;

/// Get an annotation value from optional object annotations
pub fn get_annotation<'a>(
    annotations: Option<&'a BTreeMap<String, String>>,
    key: &str,
) -> Option<&'a str> {
    annotations.and_then(|a| a.get(key)).map(|s| s.as_str())
}

/// Parse the rollback-after duration stored under `key`.
///
/// A missing, empty or malformed value disables rollback for the workload.
pub fn parse_rollback_after(
    annotations: Option<&BTreeMap<String, String>>,
    key: &str,
) -> Option<Duration> {
    get_annotation(annotations, key).and_then(parse_duration)
}

/// Parse a rollback-after duration: `250ms`, `30s`, `5m`, `1h`, or a bare
/// number of seconds. Values that do not fit a `Duration` are rejected.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();

    let (digits, millis_per_unit) = [("ms", 1), ("s", 1_000), ("m", 60_000), ("h", 3_600_000)]
        .into_iter()
        .find_map(|(suffix, factor)| value.strip_suffix(suffix).map(|n| (n, factor)))
        .unwrap_or((value, 1_000));

    let amount: u64 = digits.parse().ok()?;
    amount.checked_mul(millis_per_unit).map(Duration::from_millis)
}
