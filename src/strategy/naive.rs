//! Naive strategy: keep the current container limits and grow or shrink a
//! homogeneous cluster of the type the service already runs on.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use super::{
    assemble_policy, choose_interval_config, state_for, DerivationContext, DerivationStrategy,
    NAIVE_ALGORITHM,
};
use crate::packing::build_single_type_vm_set;
use crate::steps::set_scaling_steps;
use crate::types::{
    Policy, PolicyParameters, ProcessedForecast, ScaleMethod, ScalingStep, State,
};

pub struct NaiveStrategy {
    ctx: DerivationContext,
    current_state: State,
}

impl NaiveStrategy {
    pub fn new(ctx: DerivationContext, current_state: State) -> Self {
        Self { ctx, current_state }
    }
}

#[async_trait]
impl DerivationStrategy for NaiveStrategy {
    fn name(&self) -> &'static str {
        NAIVE_ALGORITHM
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
        let limits = service.limits();

        let Some(vm_type) = super::dominant_vm_type(&self.current_state.vms, &self.ctx.catalog)
        else {
            warn!(algorithm = self.name(), "current state has no usable VM type");
            return Vec::new();
        };
        let vm = match self.ctx.catalog.get(&vm_type) {
            Some(vm) => vm.clone(),
            None => return Vec::new(),
        };

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
            resize_pods: false,
        };
        assemble_policy(self.name(), parameters, steps, started_at)
            .into_iter()
            .collect()
    }
}
