//! Metrics definitions for the authentication service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `authn_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `result` (key set refresh): 4 values (refreshed, throttled, in_progress, error)
//! - `origin`: 4 values (keycloak, kas, ssa, custom)
//! - `result` (token validation): bounded by error codes
//! - `status` (profile sync): 2 values (success, error)
//!
//! Issuers are never used as labels; third-party issuers are unbounded.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Key set fetches are bounded by a 5s timeout
        .set_buckets_for_metric(
            Matcher::Prefix("authn_keyset_fetch".to_string()),
            &[0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000],
        )
        .map_err(|e| format!("Failed to set key set fetch buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("authn_profile_sync".to_string()),
            &[0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 30.000],
        )
        .map_err(|e| format!("Failed to set profile sync buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Key Set Metrics
// ============================================================================

/// Record the outcome of a key set refresh call.
///
/// Metric: `authn_keyset_refresh_total`
/// Labels: `result`
pub fn record_keyset_refresh(result: &'static str) {
    counter!("authn_keyset_refresh_total", "result" => result).increment(1);
}

/// Record the duration of one JWKS fetch, successful or not.
///
/// Metric: `authn_keyset_fetch_duration_seconds`
pub fn record_keyset_fetch_duration(duration: Duration) {
    histogram!("authn_keyset_fetch_duration_seconds").record(duration.as_secs_f64());
}

// ============================================================================
// Token Validation Metrics
// ============================================================================

/// Record a token validation outcome.
///
/// Metric: `authn_token_validations_total`
/// Labels: `origin`, `result` (`success` or an error code)
pub fn record_token_validation(origin: &'static str, result: &'static str) {
    counter!("authn_token_validations_total",
        "origin" => origin,
        "result" => result
    )
    .increment(1);
}

// ============================================================================
// Profile Sync Metrics
// ============================================================================

/// Record a profile-sync workflow run.
///
/// Metric: `authn_profile_sync_total`, `authn_profile_sync_duration_seconds`
/// Labels: `status`
pub fn record_profile_sync(status: &'static str, duration: Duration) {
    histogram!("authn_profile_sync_duration_seconds", "status" => status)
        .record(duration.as_secs_f64());
    counter!("authn_profile_sync_total", "status" => status).increment(1);
}
