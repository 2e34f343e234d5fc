//! Best-base-instance strategy: for every VM type in the catalog, and every
//! cached container-limit shape that fits inside it, derive one candidate
//! policy built entirely from that (type, limits) pair. Pairs whose timeline
//! is infeasible anywhere are dropped; the external evaluator ranks the
//! survivors.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use super::{
    assemble_policy, choose_interval_config, state_for, DerivationContext, DerivationStrategy,
    BEST_BASE_INSTANCE_ALGORITHM,
};
use crate::packing::build_single_type_vm_set;
use crate::steps::set_scaling_steps;
use crate::types::{
    Limit, Policy, PolicyParameters, ProcessedForecast, ScaleMethod, ScalingStep, State,
    VmProfile,
};

pub struct BestBaseInstanceStrategy {
    ctx: DerivationContext,
    initial_state: State,
}

impl BestBaseInstanceStrategy {
    pub fn new(ctx: DerivationContext, initial_state: State) -> Self {
        Self { ctx, initial_state }
    }

    /// Derive the candidate policy for one (type, limits) pair, starting
    /// from the run's initial state. Returns `None` when any interval cannot
    /// be served by this pair.
    async fn derive_candidate(
        &self,
        forecast: &ProcessedForecast,
        vm: &VmProfile,
        limits: Limit,
    ) -> Option<Policy> {
        let started_at = Utc::now();
        let mut current_state = self.initial_state.clone();
        let mut steps: Vec<ScalingStep> = Vec::new();

        for interval in &forecast.critical_intervals {
            let chosen = match choose_interval_config(
                &self.ctx,
                interval.requests,
                limits,
                |replicas, limit| build_single_type_vm_set(replicas, limit, vm),
            )
            .await
            {
                Ok(chosen) => chosen,
                Err(e) => {
                    debug!(
                        vm_type = %vm.vm_type,
                        cpu = limits.cpu_cores,
                        memory = limits.memory_gb,
                        error = %e,
                        "pair cannot serve interval, dropping candidate"
                    );
                    return None;
                }
            };

            let new_state = state_for(&self.ctx.config.main_service_name, &chosen);
            set_scaling_steps(
                &mut steps,
                &self.ctx.broker,
                &current_state,
                new_state.clone(),
                interval.time_start,
                interval.time_end,
                chosen.msc_setting.boot_time_sec,
                chosen.msc_setting.msc_per_second,
            )
            .await;
            current_state = new_state;
        }

        let settings = self.ctx.config.policy_settings;
        let parameters = PolicyParameters {
            method: ScaleMethod::Horizontal,
            heterogeneous: false,
            under_provisioning: settings.under_provisioning_allowed,
            resize_pods: settings.pods_resize_allowed,
        };
        assemble_policy(BEST_BASE_INSTANCE_ALGORITHM, parameters, steps, started_at)
    }
}

#[async_trait]
impl DerivationStrategy for BestBaseInstanceStrategy {
    fn name(&self) -> &'static str {
        BEST_BASE_INSTANCE_ALGORITHM
    }

    async fn create_policies(&mut self, forecast: &ProcessedForecast) -> Vec<Policy> {
        info!(algorithm = self.name(), "deriving policies");
        let mut policies = Vec::new();

        for vm in self.ctx.catalog.profiles() {
            let fitting = self
                .ctx
                .broker
                .profiles_under_limit(vm.cpu_cores, vm.memory_gb);
            for profile in fitting {
                if let Some(policy) = self.derive_candidate(forecast, vm, profile.limits).await {
                    policies.push(policy);
                }
            }
        }
        policies
    }
}
