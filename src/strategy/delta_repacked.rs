//! Delta-repacked strategy: per interval, weigh three ways of reaching the
//! needed capacity — keep the running set (growing it only by the
//! shortfall), repack from zero, or resize the containers to a leaner limit
//! shape that still fits the running set. Resize is considered only when the
//! configuration allows it and strictly shrinks the resource footprint.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::small_step::repack;
use super::{
    assemble_policy, choose_interval_config, dominant_vm_type, efficiency,
    should_resize_container, state_for, DerivationContext, DerivationStrategy,
    DELTA_REPACKED_ALGORITHM,
};
use crate::capacity::replicas_capacity;
use crate::steps::set_scaling_steps;
use crate::types::{
    ContainersConfig, DerivationError, Policy, PolicyParameters, ProcessedForecast, ScaleMethod,
    ScalingStep, State, VMScale,
};

pub struct DeltaRepackedStrategy {
    ctx: DerivationContext,
    current_state: State,
    current_config: ContainersConfig,
}

impl DeltaRepackedStrategy {
    pub fn new(ctx: DerivationContext, current_state: State) -> Self {
        Self {
            ctx,
            current_state,
            current_config: ContainersConfig::default(),
        }
    }

    /// A container configuration with different limits that meets the load
    /// on the VMs already running, ranked by resource efficiency. Candidate
    /// limits come from every cached profile that fits the set's biggest
    /// type.
    async fn resize_option(&self, load: f64, current_set: &VMScale) -> Option<ContainersConfig> {
        let biggest = dominant_vm_type(current_set, &self.ctx.catalog)?;
        let vm = self.ctx.catalog.get(&biggest)?.clone();

        let mut fitting = self
            .ctx
            .broker
            .profiles_under_limit(vm.cpu_cores, vm.memory_gb);
        fitting.sort_by(|a, b| {
            b.limits
                .cpu_cores
                .partial_cmp(&a.limits.cpu_cores)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut options: Vec<ContainersConfig> = Vec::new();
        for profile in fitting {
            let Ok(mut config) = self
                .ctx
                .broker
                .select_profile_for_load(load, profile.limits, false)
                .await
            else {
                continue;
            };
            let hosts = replicas_capacity(current_set, &self.ctx.catalog, &config.limits)
                >= config.msc_setting.replicas;
            if hosts && config.msc_setting.msc_per_second >= load {
                config.vm_set = current_set.clone();
                config.cost = current_set.cost(&self.ctx.catalog);
                options.push(config);
            }
        }
        options.sort_by(|a, b| {
            efficiency(a)
                .partial_cmp(&efficiency(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        options.into_iter().next()
    }

    /// Pick the interval's configuration among resize / keep-and-grow /
    /// full repack.
    async fn choose_config(&self, load: f64) -> Result<ContainersConfig, DerivationError> {
        let limits = self.current_config.limits;
        let current_set = &self.current_state.vms;

        if self.ctx.config.policy_settings.pods_resize_allowed {
            if let Some(candidate) = self.resize_option(load, current_set).await {
                if should_resize_container(&self.current_config, &candidate) {
                    debug!(
                        cpu = candidate.limits.cpu_cores,
                        memory = candidate.limits.memory_gb,
                        replicas = candidate.msc_setting.replicas,
                        "resizing containers in place"
                    );
                    return Ok(candidate);
                }
            }
        }

        let catalog = self.ctx.catalog.clone();
        let repacked = choose_interval_config(&self.ctx, load, limits, |replicas, limit| {
            repack(replicas, limit, &catalog)
        })
        .await?;

        // Keeping the running set (plus any shortfall) competes with the
        // repack on cost.
        let needed = repacked.msc_setting.replicas;
        let capacity = replicas_capacity(current_set, &self.ctx.catalog, &limits);
        let kept_set = if capacity >= needed {
            current_set.clone()
        } else {
            let mut grown = current_set.clone();
            grown.merge(&repack(needed - capacity, &limits, &self.ctx.catalog)?);
            grown
        };
        let kept_cost = kept_set.cost(&self.ctx.catalog);

        if kept_cost <= repacked.cost {
            let mut kept = repacked.clone();
            kept.vm_set = kept_set;
            kept.cost = kept_cost;
            Ok(kept)
        } else {
            Ok(repacked)
        }
    }
}

#[async_trait]
impl DerivationStrategy for DeltaRepackedStrategy {
    fn name(&self) -> &'static str {
        DELTA_REPACKED_ALGORITHM
    }

    async fn create_policies(&mut self, forecast: &ProcessedForecast) -> Vec<Policy> {
        info!(algorithm = self.name(), "deriving policies");
        let started_at = Utc::now();

        let service = self
            .current_state
            .services
            .get(&self.ctx.config.main_service_name)
            .copied();
        let Some(service) = service else {
            warn!(algorithm = self.name(), "main service missing from current state");
            return Vec::new();
        };
        let initial_setting = self
            .ctx
            .broker
            .profile_by_limits_and_replicas(service.limits(), service.scale)
            .await;
        self.current_config = ContainersConfig {
            limits: service.limits(),
            msc_setting: initial_setting,
            vm_set: self.current_state.vms.clone(),
            cost: self.current_state.vms.cost(&self.ctx.catalog),
        };

        let mut steps: Vec<ScalingStep> = Vec::new();
        for interval in &forecast.critical_intervals {
            let chosen = match self.choose_config(interval.requests).await {
                Ok(chosen) => chosen,
                Err(e) => {
                    warn!(algorithm = self.name(), error = %e, "interval infeasible, dropping policy");
                    return Vec::new();
                }
            };

            let new_state = state_for(&self.ctx.config.main_service_name, &chosen);
            set_scaling_steps(
                &mut steps,
                &self.ctx.broker,
                &self.current_state,
                new_state.clone(),
                interval.time_start,
                interval.time_end,
                chosen.msc_setting.boot_time_sec,
                chosen.msc_setting.msc_per_second,
            )
            .await;
            self.current_state = new_state;
            self.current_config = chosen;
        }

        let settings = self.ctx.config.policy_settings;
        let parameters = PolicyParameters {
            method: ScaleMethod::Horizontal,
            heterogeneous: true,
            under_provisioning: settings.under_provisioning_allowed,
            resize_pods: settings.pods_resize_allowed,
        };
        assemble_policy(self.name(), parameters, steps, started_at)
            .into_iter()
            .collect()
    }
}
