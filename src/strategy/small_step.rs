//! Small-step strategy: repack the cluster from zero at every interval,
//! letting homogeneous and heterogeneous covers compete on cost. The
//! heterogeneous packer also serves as the fallback when no single type can
//! host the replicas.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use super::{
    assemble_policy, choose_interval_config, state_for, DerivationContext, DerivationStrategy,
    SMALL_STEP_ALGORITHM,
};
use crate::packing::{build_heterogeneous_vm_set, build_homogeneous_vm_set};
use crate::steps::set_scaling_steps;
use crate::types::{
    DerivationError, Limit, Policy, PolicyParameters, ProcessedForecast, ScaleMethod,
    ScalingStep, State, VMScale, VmCatalog,
};

/// Cheapest of the homogeneous and heterogeneous covers; heterogeneous wins
/// ties and is the fallback when homogeneous packing fails.
pub(super) fn repack(
    replicas: u32,
    limit: &Limit,
    catalog: &VmCatalog,
) -> Result<VMScale, DerivationError> {
    let hetero = build_heterogeneous_vm_set(replicas, limit, catalog);
    let homo = build_homogeneous_vm_set(replicas, limit, catalog);
    match (homo, hetero) {
        (Ok(homo), Ok(hetero)) => {
            if homo.cost(catalog) < hetero.cost(catalog) {
                Ok(homo)
            } else {
                Ok(hetero)
            }
        }
        (Err(_), Ok(hetero)) => Ok(hetero),
        (Ok(homo), Err(_)) => Ok(homo),
        (Err(e), Err(_)) => Err(e),
    }
}

pub struct SmallStepStrategy {
    ctx: DerivationContext,
    current_state: State,
}

impl SmallStepStrategy {
    pub fn new(ctx: DerivationContext, current_state: State) -> Self {
        Self { ctx, current_state }
    }
}

#[async_trait]
impl DerivationStrategy for SmallStepStrategy {
    fn name(&self) -> &'static str {
        SMALL_STEP_ALGORITHM
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

        let catalog = self.ctx.catalog.clone();
        let mut steps: Vec<ScalingStep> = Vec::new();
        for interval in &forecast.critical_intervals {
            let chosen = match choose_interval_config(
                &self.ctx,
                interval.requests,
                limits,
                |replicas, limit| repack(replicas, limit, &catalog),
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
            heterogeneous: true,
            under_provisioning: self.ctx.config.policy_settings.under_provisioning_allowed,
            resize_pods: false,
        };
        assemble_policy(self.name(), parameters, steps, started_at)
            .into_iter()
            .collect()
    }
}
