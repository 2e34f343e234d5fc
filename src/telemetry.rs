//! Prometheus metrics setup and descriptions.
//!
//! Metrics are recorded throughout the codebase using the `metrics` crate's
//! macros. This module installs the Prometheus recorder and registers
//! human-readable descriptions for each metric; without it the macros are
//! no-ops, so library consumers that bring their own recorder still get the
//! measurements.

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::PrometheusHandle;

/// Install the Prometheus recorder and register metric descriptions.
///
/// Returns `None` if a recorder is already installed (e.g. in tests where
/// several runs share a process). Metric recording still works — the macros
/// route to whichever recorder was installed first.
pub fn install() -> Option<PrometheusHandle> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .ok()?;
    describe();
    Some(handle)
}

fn describe() {
    describe_counter!(
        "polder_policies_derived_total",
        "Candidate policies emitted, per algorithm"
    );
    describe_histogram!(
        "polder_derivation_duration_seconds",
        "Wall-clock duration of a full derivation run"
    );
    describe_counter!(
        "polder_profile_cache_total",
        "Container-profile cache lookups, by outcome"
    );
    describe_counter!(
        "polder_predictor_fallback_total",
        "Times the performance predictor was unavailable and a documented default was substituted"
    );
}
