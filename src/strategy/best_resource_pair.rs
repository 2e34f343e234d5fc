//! Best-resource-pair strategy: commit to the single (VM type, container
//! limits) pair that serves the forecast's hardest interval with the best
//! resource efficiency, then derive one policy from that pair alone.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use super::{
    assemble_policy, choose_interval_config, efficiency, state_for, DerivationContext,
    DerivationStrategy, BEST_RESOURCE_PAIR_ALGORITHM,
};
use crate::packing::build_single_type_vm_set;
use crate::steps::set_scaling_steps;
use crate::types::{
    Limit, Policy, PolicyParameters, ProcessedForecast, ScaleMethod, ScalingStep, State,
    VmProfile,
};

pub struct BestResourcePairStrategy {
    ctx: DerivationContext,
    current_state: State,
}

impl BestResourcePairStrategy {
    pub fn new(ctx: DerivationContext, current_state: State) -> Self {
        Self { ctx, current_state }
    }

    /// Rank every (type, fitting limits) pair at the peak demand and return
    /// the most efficient one that can actually be packed.
    async fn select_pair(&self, peak_load: f64) -> Option<(VmProfile, Limit)> {
        let mut best: Option<(f64, VmProfile, Limit)> = None;

        for vm in self.ctx.catalog.profiles() {
            let fitting = self
                .ctx
                .broker
                .profiles_under_limit(vm.cpu_cores, vm.memory_gb);
            for profile in fitting {
                let Ok(config) = self
                    .ctx
                    .broker
                    .select_profile_for_load(peak_load, profile.limits, false)
                    .await
                else {
                    continue;
                };
                if build_single_type_vm_set(config.msc_setting.replicas, &profile.limits, vm)
                    .is_err()
                {
                    continue;
                }
                let score = efficiency(&config);
                if best.as_ref().map(|(s, _, _)| score < *s).unwrap_or(true) {
                    best = Some((score, vm.clone(), profile.limits));
                }
            }
        }
        best.map(|(_, vm, limits)| (vm, limits))
    }
}

#[async_trait]
impl DerivationStrategy for BestResourcePairStrategy {
    fn name(&self) -> &'static str {
        BEST_RESOURCE_PAIR_ALGORITHM
    }

    async fn create_policies(&mut self, forecast: &ProcessedForecast) -> Vec<Policy> {
        info!(algorithm = self.name(), "deriving policies");
        let started_at = Utc::now();

        let peak_load = forecast
            .critical_intervals
            .iter()
            .map(|i| i.requests)
            .fold(0.0, f64::max);
        let Some((vm, limits)) = self.select_pair(peak_load).await else {
            warn!(algorithm = self.name(), "no (type, limits) pair covers the peak demand");
            return Vec::new();
        };
        info!(
            algorithm = self.name(),
            vm_type = %vm.vm_type,
            cpu = limits.cpu_cores,
            memory = limits.memory_gb,
            "selected base resource pair"
        );

        let mut steps: Vec<ScalingStep> = Vec::new();
        for interval in &forecast.critical_intervals {
            let chosen = match choose_interval_config(
                &self.ctx,
                interval.requests,
                limits,
                |replicas, limit| build_single_type_vm_set(replicas, limit, &vm),
            )
            .await
            {
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
        }

        let parameters = PolicyParameters {
            method: ScaleMethod::Horizontal,
            heterogeneous: false,
            under_provisioning: self.ctx.config.policy_settings.under_provisioning_allowed,
            resize_pods: self.ctx.config.policy_settings.pods_resize_allowed,
        };
        assemble_policy(self.name(), parameters, steps, started_at)
            .into_iter()
            .collect()
    }
}
