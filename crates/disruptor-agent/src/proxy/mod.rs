//! Fault-injecting proxies.
//!
//! Both proxies share the same disruption mechanics: a request that is not
//! excluded is delayed by a value sampled around the configured average, and
//! fails with the configured error at the configured rate. What an "error"
//! looks like is protocol specific and lives in the respective module.

pub mod grpc;
pub mod http;

use std::time::Duration;

use rand::Rng;

/// Sample the delay for one request: the average plus a uniform variation
/// in `[-variation, +variation]`, clamped at zero.
pub(crate) fn sample_delay(average: Duration, variation: Duration) -> Duration {
    if average.is_zero() {
        return Duration::ZERO;
    }
    if variation.is_zero() {
        return average;
    }

    let average_ms = average.as_millis() as i64;
    let variation_ms = variation.as_millis() as i64;
    let jitter = rand::thread_rng().gen_range(-variation_ms..=variation_ms);
    Duration::from_millis(average_ms.saturating_add(jitter).max(0) as u64)
}

/// Decide whether one request is faulted.
pub(crate) fn roll_fault(rate: f64) -> bool {
    rate > 0.0 && rand::thread_rng().gen::<f64>() < rate
}

/// Whether the request path matches an exclusion entry.
///
/// An entry matches the path itself or any sub-path, so `/payments` excludes
/// `/payments/refund` but not `/payments2`. gRPC exclusions name services
/// and match every method of the service.
pub(crate) fn is_excluded(excluded: &[String], path: &str) -> bool {
    let path = path.trim_start_matches('/');
    excluded.iter().any(|entry| {
        let entry = entry.trim_start_matches('/');
        !entry.is_empty() && (path == entry || path.starts_with(&format!("{}/", entry)))
    })
}
