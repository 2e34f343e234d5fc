//! Delta-load strategy: never rebuild the cluster from zero. On a load
//! increase only the additional replicas are packed and the result merges
//! into the running set; on a decrease VMs are released priciest-first while
//! the remainder still hosts the needed replicas.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use super::small_step::repack;
use super::{
    assemble_policy, is_under_provision_in_range, state_for, DerivationContext,
    DerivationStrategy, DELTA_LOAD_ALGORITHM,
};
use crate::capacity::replicas_capacity;
use crate::steps::set_scaling_steps;
use crate::types::{
    ContainersConfig, DerivationError, Limit, Policy, PolicyParameters, ProcessedForecast,
    ScaleMethod, ScalingStep, State, VMScale,
};

pub struct DeltaLoadStrategy {
    ctx: DerivationContext,
    current_state: State,
}

impl DeltaLoadStrategy {
    pub fn new(ctx: DerivationContext, current_state: State) -> Self {
        Self { ctx, current_state }
    }

    /// Grow or shrink `base` so it hosts exactly the needed replicas:
    /// additional demand is covered by packing only the shortfall, spare
    /// capacity is released starting from the most expensive type.
    fn adjust_set(
        &self,
        base: &VMScale,
        replicas: u32,
        limit: &Limit,
    ) -> Result<VMScale, DerivationError> {
        let catalog = &self.ctx.catalog;
        let capacity = replicas_capacity(base, catalog, limit);
        if capacity < replicas {
            let mut grown = base.clone();
            grown.merge(&repack(replicas - capacity, limit, catalog)?);
            return Ok(grown);
        }

        let mut trimmed = base.clone();
        let mut types_by_price: Vec<String> = trimmed.types().cloned().collect();
        types_by_price.sort_by(|a, b| {
            let pa = catalog.get(a).map(|vm| vm.price_per_second).unwrap_or(0.0);
            let pb = catalog.get(b).map(|vm| vm.price_per_second).unwrap_or(0.0);
            pb.partial_cmp(&pa).unwrap_or(std::cmp::Ordering::Equal)
        });
        for vm_type in types_by_price {
            while trimmed.count(&vm_type) > 0 {
                let mut candidate = trimmed.clone();
                candidate.set(&vm_type, candidate.count(&vm_type) - 1);
                if replicas_capacity(&candidate, catalog, limit) >= replicas {
                    trimmed = candidate;
                } else {
                    break;
                }
            }
        }
        Ok(trimmed)
    }

    /// The interval's configuration with the VM set adjusted from the
    /// running set rather than rebuilt, under-provision gate included.
    async fn choose_config(
        &self,
        load: f64,
        limits: Limit,
    ) -> Result<ContainersConfig, DerivationError> {
        let mut over = self
            .ctx
            .broker
            .select_profile_for_load(load, limits, false)
            .await?;
        over.vm_set = self.adjust_set(&self.current_state.vms, over.msc_setting.replicas, &limits)?;
        over.cost = over.vm_set.cost(&self.ctx.catalog);

        let settings = self.ctx.config.policy_settings;
        if !settings.under_provisioning_allowed {
            return Ok(over);
        }
        let Ok(mut under) = self.ctx.broker.select_profile_for_load(load, limits, true).await
        else {
            return Ok(over);
        };
        if under.msc_setting.msc_per_second >= load {
            return Ok(over);
        }
        let Ok(vm_set) =
            self.adjust_set(&self.current_state.vms, under.msc_setting.replicas, &limits)
        else {
            return Ok(over);
        };
        under.vm_set = vm_set;
        under.cost = under.vm_set.cost(&self.ctx.catalog);

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
}

#[async_trait]
impl DerivationStrategy for DeltaLoadStrategy {
    fn name(&self) -> &'static str {
        DELTA_LOAD_ALGORITHM
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

        let mut steps: Vec<ScalingStep> = Vec::new();
        for interval in &forecast.critical_intervals {
            let chosen = match self.choose_config(interval.requests, limits).await {
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
