//! Orchestrator: validates the deployed state against the catalog, windows
//! the forecast, dispatches the configured strategy — or all of them — and
//! aggregates the resulting policies.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use metrics::{counter, histogram};
use tracing::{info, warn};

use crate::clients::SchedulerClient;
use crate::config::SystemConfiguration;
use crate::profiles::ProfileBroker;
use crate::strategy::{
    BestBaseInstanceStrategy, BestResourcePairStrategy, DeltaLoadStrategy, DeltaRepackedStrategy,
    DerivationContext, DerivationStrategy, NaiveStrategy, SmallStepStrategy, ALL_ALGORITHMS,
    BEST_BASE_INSTANCE_ALGORITHM, BEST_RESOURCE_PAIR_ALGORITHM, DELTA_LOAD_ALGORITHM,
    DELTA_REPACKED_ALGORITHM, NAIVE_ALGORITHM, SMALL_STEP_ALGORITHM,
};
use crate::types::{
    CriticalInterval, DerivationError, Forecast, Policy, ProcessedForecast, State, VmCatalog,
};

/// Seam for the forecast-windowing collaborator: turns the raw forecast into
/// the critical intervals the strategies iterate. The real peak-of-interest
/// pipeline lives outside this crate.
pub trait WindowDerivation: Send + Sync {
    fn window(&self, forecast: &Forecast) -> ProcessedForecast;
}

/// Minimal windowing: one critical interval per pair of consecutive samples,
/// carrying the demand at the interval's left edge.
#[derive(Debug, Default)]
pub struct IntervalWindowing;

impl WindowDerivation for IntervalWindowing {
    fn window(&self, forecast: &Forecast) -> ProcessedForecast {
        let critical_intervals = forecast
            .timestamps
            .windows(2)
            .zip(&forecast.requests)
            .map(|(window, &requests)| CriticalInterval {
                time_start: window[0],
                time_end: window[1],
                requests,
            })
            .collect();
        ProcessedForecast { critical_intervals }
    }
}

/// Derive candidate scaling policies for the given run.
///
/// Fetches the deployed state, fails fast on an undeployed service or a VM
/// type missing from the catalog, then runs the preferred strategy — or all
/// of them concurrently when none is configured. Output order across
/// strategies always follows the fixed enumeration order.
pub async fn derive_policies(
    config: Arc<SystemConfiguration>,
    catalog: Arc<VmCatalog>,
    broker: Arc<ProfileBroker>,
    scheduler: &dyn SchedulerClient,
    windowing: &dyn WindowDerivation,
    forecast: &Forecast,
) -> Result<Vec<Policy>, DerivationError> {
    let run_start = Instant::now();

    info!("requesting current state");
    let current_state = scheduler.current_state().await?;

    let main_service = &config.main_service_name;
    let deployed_scale = current_state
        .services
        .get(main_service)
        .map(|s| s.scale)
        .unwrap_or(0);
    if deployed_scale == 0 {
        return Err(DerivationError::ServiceNotDeployed(main_service.clone()));
    }
    for vm_type in current_state.vms.types() {
        if !catalog.contains(vm_type) {
            return Err(DerivationError::UnknownVmType(vm_type.clone()));
        }
    }

    let processed = windowing.window(forecast);
    info!(
        intervals = processed.critical_intervals.len(),
        "forecast windowed"
    );

    let ctx = DerivationContext {
        config: config.clone(),
        catalog,
        broker,
    };

    let preferred = config
        .preferred_algorithm
        .as_deref()
        .filter(|name| ALL_ALGORITHMS.contains(name));
    let selected: Vec<&str> = match preferred {
        Some(name) => vec![name],
        None => ALL_ALGORITHMS.to_vec(),
    };

    let runs = selected.into_iter().map(|name| {
        let mut strategy = build_strategy(name, &ctx, &current_state);
        let processed = &processed;
        async move { strategy.create_policies(processed).await }
    });
    let policies: Vec<Policy> = join_all(runs).await.into_iter().flatten().collect();

    for policy in &policies {
        counter!("polder_policies_derived_total", "algorithm" => policy.algorithm.clone())
            .increment(1);
    }
    histogram!("polder_derivation_duration_seconds").record(run_start.elapsed().as_secs_f64());
    if policies.is_empty() {
        warn!("no strategy produced a feasible policy");
    }

    Ok(policies)
}

fn build_strategy(
    name: &str,
    ctx: &DerivationContext,
    current_state: &State,
) -> Box<dyn DerivationStrategy> {
    let ctx = ctx.clone();
    let state = current_state.clone();
    match name {
        NAIVE_ALGORITHM => Box::new(NaiveStrategy::new(ctx, state)),
        BEST_BASE_INSTANCE_ALGORITHM => Box::new(BestBaseInstanceStrategy::new(ctx, state)),
        BEST_RESOURCE_PAIR_ALGORITHM => Box::new(BestResourcePairStrategy::new(ctx, state)),
        SMALL_STEP_ALGORITHM => Box::new(SmallStepStrategy::new(ctx, state)),
        DELTA_REPACKED_ALGORITHM => Box::new(DeltaRepackedStrategy::new(ctx, state)),
        DELTA_LOAD_ALGORITHM => Box::new(DeltaLoadStrategy::new(ctx, state)),
        _ => Box::new(NaiveStrategy::new(ctx, state)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn windowing_pairs_consecutive_samples() {
        let t = |s: i64| Utc.timestamp_opt(s, 0).unwrap();
        let forecast = Forecast {
            timestamps: vec![t(0), t(300), t(600)],
            requests: vec![10.0, 40.0, 25.0],
        };
        let processed = IntervalWindowing.window(&forecast);
        assert_eq!(processed.critical_intervals.len(), 2);
        assert_eq!(processed.critical_intervals[0].time_start, t(0));
        assert_eq!(processed.critical_intervals[0].time_end, t(300));
        assert_eq!(processed.critical_intervals[0].requests, 10.0);
        assert_eq!(processed.critical_intervals[1].requests, 40.0);
    }

    #[test]
    fn windowing_handles_short_forecasts() {
        let processed = IntervalWindowing.window(&Forecast::default());
        assert!(processed.critical_intervals.is_empty());
    }

    #[test]
    fn unknown_algorithm_selects_all() {
        assert!(!ALL_ALGORITHMS.contains(&"quantum"));
        assert_eq!(ALL_ALGORITHMS[0], NAIVE_ALGORITHM);
        assert_eq!(ALL_ALGORITHMS[5], DELTA_LOAD_ALGORITHM);
    }
}
