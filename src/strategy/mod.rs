//! Derivation strategies: the pluggable rules that turn a processed forecast
//! into one or more candidate scaling policies.
//!
//! Strategies share the same substrate — capacity model, packers, profile
//! broker, transition timer — and diverge only in which container limits and
//! packer they use per interval and whether container resize is considered.
//! A strategy that cannot serve an interval emits no policy at all; partial
//! timelines are never returned.

mod best_base_instance;
mod best_resource_pair;
mod delta_load;
mod delta_repacked;
mod naive;
mod small_step;

pub use best_base_instance::BestBaseInstanceStrategy;
pub use best_resource_pair::BestResourcePairStrategy;
pub use delta_load::DeltaLoadStrategy;
pub use delta_repacked::DeltaRepackedStrategy;
pub use naive::NaiveStrategy;
pub use small_step::SmallStepStrategy;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::config::SystemConfiguration;
use crate::profiles::ProfileBroker;
use crate::types::{
    ContainersConfig, DerivationError, Limit, Policy, PolicyMetrics, PolicyParameters,
    PolicyStatus, ProcessedForecast, ScalingStep, ServiceInfo, State, VMScale, VmCatalog,
};

pub const NAIVE_ALGORITHM: &str = "naive";
pub const BEST_BASE_INSTANCE_ALGORITHM: &str = "best-base-instance";
pub const BEST_RESOURCE_PAIR_ALGORITHM: &str = "best-resource-pair";
pub const SMALL_STEP_ALGORITHM: &str = "small-step";
pub const DELTA_REPACKED_ALGORITHM: &str = "delta-repacked";
pub const DELTA_LOAD_ALGORITHM: &str = "delta-load";

/// Fixed enumeration order for all-algorithms mode; policy output order
/// matches it.
pub const ALL_ALGORITHMS: [&str; 6] = [
    NAIVE_ALGORITHM,
    BEST_BASE_INSTANCE_ALGORITHM,
    BEST_RESOURCE_PAIR_ALGORITHM,
    SMALL_STEP_ALGORITHM,
    DELTA_REPACKED_ALGORITHM,
    DELTA_LOAD_ALGORITHM,
];

/// Read-only collaborators for one derivation run. Strategies share the
/// catalog, configuration and broker; nothing here is mutated after the run
/// starts, so parallel strategies do not race.
#[derive(Clone)]
pub struct DerivationContext {
    pub config: Arc<SystemConfiguration>,
    pub catalog: Arc<VmCatalog>,
    pub broker: Arc<ProfileBroker>,
}

/// A rule for deriving scaling policies over a processed forecast.
#[async_trait]
pub trait DerivationStrategy: Send {
    fn name(&self) -> &'static str;

    /// Derive zero or more candidate policies. Infeasible timelines yield an
    /// empty vector, never an error and never a partial policy.
    async fn create_policies(&mut self, forecast: &ProcessedForecast) -> Vec<Policy>;
}

/// Under-provisioning acceptance rule. The formula is
/// `(demand − supply) · demand / supply ≤ allowance` — deliberately not a
/// plain percentage; downstream consumers depend on its scale.
pub(crate) fn is_under_provision_in_range(demand: f64, supply: f64, allowance: f64) -> bool {
    supply > 0.0 && (demand - supply) * demand / supply <= allowance
}

/// Container-resize rule: resize only when the candidate strictly reduces
/// the aggregate resource footprint `replicas · (cpu + mem)`.
pub(crate) fn should_resize_container(
    current: &ContainersConfig,
    candidate: &ContainersConfig,
) -> bool {
    utilization_factor(current) > utilization_factor(candidate)
}

/// Aggregate resource footprint of a configuration.
pub(crate) fn utilization_factor(config: &ContainersConfig) -> f64 {
    f64::from(config.msc_setting.replicas) * (config.limits.cpu_cores + config.limits.memory_gb)
}

/// Resource efficiency of a configuration relative to the load it sustains;
/// lower is better.
pub(crate) fn efficiency(config: &ContainersConfig) -> f64 {
    if config.msc_setting.msc_per_second > 0.0 {
        utilization_factor(config) / config.msc_setting.msc_per_second
    } else {
        f64::INFINITY
    }
}

/// The type the current cluster is dominated by: largest memory wins. Used
/// where a strategy needs one representative type for a possibly mixed set.
pub(crate) fn dominant_vm_type(set: &VMScale, catalog: &VmCatalog) -> Option<String> {
    let dominant = set
        .types()
        .filter_map(|t| catalog.get(t))
        .max_by(|a, b| {
            a.memory_gb
                .partial_cmp(&b.memory_gb)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|vm| vm.vm_type.clone());
    if set.type_count() > 1 {
        if let Some(ref t) = dominant {
            warn!(vm_type = %t, "current cluster is heterogeneous, continuing with its largest type");
        }
    }
    dominant
}

/// Choose the container configuration for one interval: the over-provision
/// profile packed by `pack`, optionally displaced by an under-provision
/// candidate when it is cheaper and its deficit is within the allowance.
pub(crate) async fn choose_interval_config(
    ctx: &DerivationContext,
    load: f64,
    limits: Limit,
    pack: impl Fn(u32, &Limit) -> Result<VMScale, DerivationError>,
) -> Result<ContainersConfig, DerivationError> {
    let mut over = ctx
        .broker
        .select_profile_for_load(load, limits, false)
        .await?;
    over.vm_set = pack(over.msc_setting.replicas, &over.limits)?;
    over.cost = over.vm_set.cost(&ctx.catalog);

    let settings = &ctx.config.policy_settings;
    if !settings.under_provisioning_allowed {
        return Ok(over);
    }

    let Ok(mut under) = ctx.broker.select_profile_for_load(load, limits, true).await else {
        return Ok(over);
    };
    if under.msc_setting.msc_per_second >= load {
        // The broker had no genuine under-provision candidate to offer.
        return Ok(over);
    }
    let Ok(vm_set) = pack(under.msc_setting.replicas, &under.limits) else {
        return Ok(over);
    };
    under.vm_set = vm_set;
    under.cost = under.vm_set.cost(&ctx.catalog);

    if under.cost > 0.0
        && under.cost < over.cost
        && is_under_provision_in_range(
            load,
            under.msc_setting.msc_per_second,
            settings.max_under_provision_percentage,
        )
    {
        Ok(under)
    } else {
        Ok(over)
    }
}

/// Desired cluster state for a chosen configuration: the main service at the
/// configuration's scale and limits, on the configuration's VM set.
pub(crate) fn state_for(service_name: &str, config: &ContainersConfig) -> State {
    let mut services = BTreeMap::new();
    services.insert(
        service_name.to_string(),
        ServiceInfo {
            scale: config.msc_setting.replicas,
            cpu_cores: config.limits.cpu_cores,
            memory_gb: config.limits.memory_gb,
        },
    );
    State::new(services, config.vm_set.clone())
}

/// Assemble a policy from a derived timeline; a timeline with no steps
/// yields no policy.
pub(crate) fn assemble_policy(
    algorithm: &str,
    parameters: PolicyParameters,
    steps: Vec<ScalingStep>,
    started_at: chrono::DateTime<Utc>,
) -> Option<Policy> {
    let (first, last) = match (steps.first(), steps.last()) {
        (Some(first), Some(last)) => (first.time_start, last.time_end),
        _ => return None,
    };
    let finished_at = Utc::now();
    Some(Policy {
        id: Uuid::new_v4(),
        algorithm: algorithm.to_string(),
        parameters,
        time_window_start: first,
        time_window_end: last,
        metrics: PolicyMetrics {
            start_time_derivation: started_at,
            finish_time_derivation: finished_at,
            derivation_duration_secs: (finished_at - started_at).num_milliseconds() as f64
                / 1000.0,
            number_scaling_actions: steps.len() as u32,
        },
        scaling_actions: steps,
        status: PolicyStatus::Discarded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MSCSetting;

    fn config(replicas: u32, cpu: f64, mem: f64, msc: f64) -> ContainersConfig {
        ContainersConfig {
            limits: Limit::new(cpu, mem),
            msc_setting: MSCSetting {
                replicas,
                msc_per_second: msc,
                boot_time_sec: 0.0,
                stddev_boot_time_sec: 0.0,
            },
            vm_set: VMScale::new(),
            cost: 0.0,
        }
    }

    #[test]
    fn under_provision_range_uses_the_scaled_formula() {
        // Deficit 5 at supply 95: (100 - 95) * 100 / 95 ≈ 5.26.
        assert!(is_under_provision_in_range(100.0, 95.0, 6.0));
        assert!(!is_under_provision_in_range(100.0, 95.0, 4.0));
        assert!(!is_under_provision_in_range(100.0, 0.0, 50.0));
    }

    #[test]
    fn resize_requires_strictly_smaller_footprint() {
        let current = config(4, 1.0, 2.0, 100.0); // footprint 12
        let smaller = config(3, 1.0, 2.0, 100.0); // footprint 9
        let equal = config(4, 2.0, 1.0, 100.0); // footprint 12
        assert!(should_resize_container(&current, &smaller));
        assert!(!should_resize_container(&current, &equal));
    }

    #[test]
    fn efficiency_orders_by_footprint_per_msc() {
        let lean = config(2, 0.5, 1.0, 100.0); // 3 / 100
        let heavy = config(4, 1.0, 2.0, 100.0); // 12 / 100
        assert!(efficiency(&lean) < efficiency(&heavy));
        assert!(efficiency(&config(1, 1.0, 1.0, 0.0)).is_infinite());
    }
}
