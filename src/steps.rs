//! Transition timing: turning a sequence of desired states into scaling
//! steps whose transitions begin early enough that the new capacity is hot
//! by each interval boundary.
//!
//! Lead-times are composed from VM boot time, the time to join a node to the
//! cluster, and pod start time; scale-in only needs the VM shutdown window.
//! When a transition both adds and removes VMs the old capacity is kept
//! running while the new one boots, so the previous step is extended by the
//! shutdown window instead.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use crate::profiles::ProfileBroker;
use crate::types::{ScalingStep, State, StepMetrics, VMScale};

/// Seconds to register a freshly booted VM as a cluster node.
pub const TIME_ADD_NODE_TO_K8S_SEC: f64 = 60.0;
/// Seconds to start a container on an already-registered node.
pub const TIME_CONTAINER_START_SEC: f64 = 10.0;

/// Append the step for `[time_start, time_end)` targeting `new_state`, or
/// extend the previous step when the desired state has not changed.
///
/// `pod_boot_sec` is the container boot time of the chosen configuration and
/// `load_capacity` the MSC it sustains. The desired state's content hash is
/// stamped here, right before the state becomes part of the timeline.
#[allow(clippy::too_many_arguments)]
pub async fn set_scaling_steps(
    steps: &mut Vec<ScalingStep>,
    broker: &ProfileBroker,
    current_state: &State,
    mut new_state: State,
    time_start: DateTime<Utc>,
    time_end: DateTime<Utc>,
    pod_boot_sec: f64,
    load_capacity: f64,
) {
    if let Some(last) = steps.last_mut() {
        if last.desired_state == new_state {
            last.time_end = time_end;
            return;
        }
    }

    let (added, removed) = VMScale::delta(&current_state.vms, &new_state.vms);

    let transition_start = if !removed.is_empty() && !added.is_empty() {
        // Overlap: keep the outgoing VMs serving while the new ones boot.
        if let Some(last) = steps.last_mut() {
            let shutdown_sec = broker.vm_shutdown_time(&removed).await;
            last.time_end += seconds(shutdown_sec);
        }
        scale_out_start(broker, &added, time_start, pod_boot_sec).await
    } else if !removed.is_empty() {
        let shutdown_sec = broker.vm_shutdown_time(&removed).await;
        time_start - seconds(shutdown_sec)
    } else {
        // Scale-out, or a service-only change on the same VM set.
        scale_out_start(broker, &added, time_start, pod_boot_sec).await
    };

    new_state.hash = content_hash(&new_state);
    steps.push(ScalingStep {
        initial_state: current_state.clone(),
        desired_state: new_state,
        time_start,
        time_end,
        time_start_transition: transition_start,
        metrics: StepMetrics {
            requests_capacity: load_capacity,
        },
    });
}

/// When the transition to a scaled-out state must begin: VM boot plus node
/// join plus pod boot when VMs are added, just the container start window
/// otherwise.
async fn scale_out_start(
    broker: &ProfileBroker,
    added: &VMScale,
    time_start: DateTime<Utc>,
    pod_boot_sec: f64,
) -> DateTime<Utc> {
    if added.is_empty() {
        time_start - seconds(TIME_CONTAINER_START_SEC)
    } else {
        let boot_sec = broker.vm_boot_time(added).await;
        time_start - seconds(boot_sec) - seconds(TIME_ADD_NODE_TO_K8S_SEC) - seconds(pod_boot_sec)
    }
}

/// Stable content hash of a state, independent of process and insertion
/// order. Services and VMs iterate in canonical key order.
pub fn content_hash(state: &State) -> String {
    let mut hasher = Sha256::new();
    for (name, svc) in &state.services {
        hasher.update(name.as_bytes());
        hasher.update(format!("|{}|{}|{}\n", svc.scale, svc.cpu_cores, svc.memory_gb));
    }
    for (vm_type, count) in state.vms.iter() {
        hasher.update(vm_type.as_bytes());
        hasher.update(format!("#{count}\n"));
    }
    hex::encode(hasher.finalize())
}

fn seconds(sec: f64) -> Duration {
    Duration::milliseconds((sec * 1000.0) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{ClientError, PerformanceClient, PredictedMsc, VmTimes};
    use crate::profiles::{ProfileCache, VmTimingSample};
    use crate::types::ServiceInfo;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    struct NoPredictor;

    #[async_trait]
    impl PerformanceClient for NoPredictor {
        async fn predict_replicas(
            &self,
            _load: f64,
            _limits: crate::types::Limit,
        ) -> Result<PredictedMsc, ClientError> {
            Err(ClientError::Predictor("unavailable".into()))
        }

        async fn predict_msc_by_replicas(
            &self,
            _replicas: u32,
            _limits: crate::types::Limit,
        ) -> Result<PredictedMsc, ClientError> {
            Err(ClientError::Predictor("unavailable".into()))
        }

        async fn vm_boot_shutdown(
            &self,
            _vm_type: &str,
            _count: u32,
        ) -> Result<VmTimes, ClientError> {
            Err(ClientError::Predictor("unavailable".into()))
        }
    }

    fn broker() -> ProfileBroker {
        ProfileBroker::new(ProfileCache::new(), Arc::new(NoPredictor))
    }

    fn state(scale: u32, vms: VMScale) -> State {
        let mut services = BTreeMap::new();
        services.insert(
            "api".to_string(),
            ServiceInfo {
                scale,
                cpu_cores: 1.0,
                memory_gb: 1.0,
            },
        );
        State::new(services, vms)
    }

    fn t(sec: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + sec, 0).unwrap()
    }

    #[tokio::test]
    async fn equal_desired_state_extends_previous_step() {
        let broker = broker();
        let mut steps = Vec::new();
        let current = state(1, VMScale::single("a", 1));
        let desired = state(2, VMScale::single("a", 2));

        set_scaling_steps(&mut steps, &broker, &current, desired.clone(), t(0), t(100), 30.0, 50.0)
            .await;
        set_scaling_steps(&mut steps, &broker, &desired, desired.clone(), t(100), t(200), 30.0, 50.0)
            .await;

        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].time_end, t(200));
    }

    #[tokio::test]
    async fn scale_out_lead_time_includes_boot_join_and_pods() {
        let broker = broker();
        broker.seed_vm_timing(
            "a",
            VmTimingSample {
                count: 5,
                boot_time_sec: 120.0,
                shutdown_time_sec: 40.0,
            },
        );
        let mut steps = Vec::new();
        let current = state(1, VMScale::single("a", 1));
        let desired = state(6, VMScale::single("a", 6));

        set_scaling_steps(&mut steps, &broker, &current, desired, t(600), t(900), 30.0, 300.0)
            .await;

        // 120 boot + 60 node join + 30 pod boot ahead of the boundary.
        let lead = 120.0 + TIME_ADD_NODE_TO_K8S_SEC + 30.0;
        assert_eq!(steps[0].time_start_transition, t(600 - lead as i64));
    }

    #[tokio::test]
    async fn service_only_change_uses_container_start_window() {
        let broker = broker();
        let mut steps = Vec::new();
        let current = state(1, VMScale::single("a", 2));
        let desired = state(2, VMScale::single("a", 2));

        set_scaling_steps(&mut steps, &broker, &current, desired, t(600), t(900), 30.0, 100.0)
            .await;

        assert_eq!(
            steps[0].time_start_transition,
            t(600 - TIME_CONTAINER_START_SEC as i64)
        );
    }

    #[tokio::test]
    async fn scale_in_backs_off_by_shutdown_time_without_touching_previous_step() {
        let broker = broker();
        broker.seed_vm_timing(
            "a",
            VmTimingSample {
                count: 2,
                boot_time_sec: 100.0,
                shutdown_time_sec: 45.0,
            },
        );
        let mut steps = Vec::new();
        let s1 = state(3, VMScale::single("a", 3));
        set_scaling_steps(&mut steps, &broker, &state(1, VMScale::single("a", 3)), s1.clone(), t(0), t(600), 30.0, 150.0)
            .await;

        let desired = state(1, VMScale::single("a", 1));
        set_scaling_steps(&mut steps, &broker, &s1, desired, t(600), t(900), 30.0, 50.0).await;

        assert_eq!(steps.len(), 2);
        // No overlap: nothing was added, the previous window is untouched.
        assert_eq!(steps[0].time_end, t(600));
        assert_eq!(steps[1].time_start_transition, t(600 - 45));
    }

    #[tokio::test]
    async fn overlap_extends_previous_step_and_times_the_scale_out() {
        let broker = broker();
        broker.seed_vm_timing(
            "a",
            VmTimingSample {
                count: 2,
                boot_time_sec: 100.0,
                shutdown_time_sec: 50.0,
            },
        );
        broker.seed_vm_timing(
            "b",
            VmTimingSample {
                count: 1,
                boot_time_sec: 80.0,
                shutdown_time_sec: 35.0,
            },
        );

        let mut steps = Vec::new();
        let s1 = state(2, VMScale::single("a", 2));
        set_scaling_steps(&mut steps, &broker, &state(1, VMScale::single("a", 1)), s1.clone(), t(0), t(600), 30.0, 100.0)
            .await;

        let desired = state(2, VMScale::single("b", 1));
        set_scaling_steps(&mut steps, &broker, &s1, desired, t(600), t(900), 30.0, 100.0).await;

        // Previous window stretched by the shutdown of {a: 2}.
        assert_eq!(steps[0].time_end, t(600 + 50));
        // New transition timed on the boot of {b: 1}.
        let lead = 80.0 + TIME_ADD_NODE_TO_K8S_SEC + 30.0;
        assert_eq!(steps[1].time_start_transition, t(600 - lead as i64));
    }

    #[tokio::test]
    async fn lead_time_never_puts_transition_after_start() {
        let broker = broker();
        let mut steps = Vec::new();
        let current = state(1, VMScale::single("a", 1));
        let desired = state(2, VMScale::single("a", 2));
        set_scaling_steps(&mut steps, &broker, &current, desired, t(600), t(900), 0.0, 100.0)
            .await;
        assert!(steps[0].time_start_transition <= steps[0].time_start);
    }

    #[test]
    fn content_hash_is_stable_and_structural() {
        let a = state(2, VMScale::single("a", 2));
        let b = state(2, VMScale::single("a", 2));
        assert_eq!(content_hash(&a), content_hash(&b));

        let c = state(3, VMScale::single("a", 2));
        assert_ne!(content_hash(&a), content_hash(&c));

        let mut vms1 = VMScale::new();
        vms1.set("x", 1);
        vms1.set("y", 2);
        let mut vms2 = VMScale::new();
        vms2.set("y", 2);
        vms2.set("x", 1);
        assert_eq!(
            content_hash(&state(1, vms1)),
            content_hash(&state(1, vms2))
        );
    }
}
