//! Shared domain types used across the codebase.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clients::ClientError;

/// Errors from policy derivation.
#[derive(Debug, thiserror::Error)]
pub enum DerivationError {
    #[error("service {0} is not deployed")]
    ServiceNotDeployed(String),

    #[error("no catalog information for VM type {0}")]
    UnknownVmType(String),

    #[error("no VM candidate can host {replicas} replicas under the given limits")]
    NoVmCandidate { replicas: u32 },

    #[error("no performance profile matches load {load} req/s under the given limits")]
    NoProfileMatch { load: f64 },

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// A VM instance type as listed in the provider catalog. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmProfile {
    /// Opaque instance-type identifier (e.g. "t2.medium").
    #[serde(rename = "type")]
    pub vm_type: String,
    pub cpu_cores: f64,
    pub memory_gb: f64,
    pub price_per_second: f64,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub csp: String,
}

/// Per-container resource limits. Value type.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Limit {
    pub cpu_cores: f64,
    pub memory_gb: f64,
}

impl Limit {
    pub fn new(cpu_cores: f64, memory_gb: f64) -> Self {
        Self {
            cpu_cores,
            memory_gb,
        }
    }

    /// Whether this limit fits inside the given caps on both axes.
    pub fn fits_within(&self, cpu_cap: f64, mem_cap: f64) -> bool {
        self.cpu_cores <= cpu_cap && self.memory_gb <= mem_cap
    }
}

/// A multiset of VM instances: type → count. Counts are always > 0; setting a
/// type to zero removes it. `BTreeMap` keeps iteration (and therefore hashing
/// and serialization) in canonical type order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VMScale(BTreeMap<String, u32>);

impl VMScale {
    pub fn new() -> Self {
        Self::default()
    }

    /// A homogeneous set of `count` instances of one type.
    pub fn single(vm_type: &str, count: u32) -> Self {
        let mut set = Self::new();
        set.set(vm_type, count);
        set
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn count(&self, vm_type: &str) -> u32 {
        self.0.get(vm_type).copied().unwrap_or(0)
    }

    pub fn set(&mut self, vm_type: &str, count: u32) {
        if count == 0 {
            self.0.remove(vm_type);
        } else {
            self.0.insert(vm_type.to_string(), count);
        }
    }

    pub fn add(&mut self, vm_type: &str, count: u32) {
        if count > 0 {
            *self.0.entry(vm_type.to_string()).or_insert(0) += count;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, u32)> {
        self.0.iter().map(|(t, n)| (t, *n))
    }

    pub fn types(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Number of distinct instance types in the set.
    pub fn type_count(&self) -> usize {
        self.0.len()
    }

    pub fn total_vms(&self) -> u32 {
        self.0.values().sum()
    }

    /// Price per second of running the whole set.
    pub fn cost(&self, catalog: &VmCatalog) -> f64 {
        self.iter()
            .map(|(t, n)| {
                catalog
                    .get(t)
                    .map(|vm| vm.price_per_second * f64::from(n))
                    .unwrap_or(0.0)
            })
            .sum()
    }

    /// Absorb another set into this one.
    pub fn merge(&mut self, other: &VMScale) {
        for (t, n) in other.iter() {
            self.add(t, n);
        }
    }

    /// Per-type difference between two sets: `(added, removed)` going from
    /// `from` to `to`.
    pub fn delta(from: &VMScale, to: &VMScale) -> (VMScale, VMScale) {
        let mut added = VMScale::new();
        let mut removed = VMScale::new();
        for (t, n_to) in to.iter() {
            let n_from = from.count(t);
            if n_to > n_from {
                added.set(t, n_to - n_from);
            }
        }
        for (t, n_from) in from.iter() {
            let n_to = to.count(t);
            if n_from > n_to {
                removed.set(t, n_from - n_to);
            }
        }
        (added, removed)
    }
}

/// The VM catalog for a derivation run: profiles sorted by ascending price,
/// plus a by-type index. Loaded once, read-only thereafter.
#[derive(Debug, Clone)]
pub struct VmCatalog {
    sorted: Vec<VmProfile>,
    by_type: HashMap<String, VmProfile>,
}

impl VmCatalog {
    pub fn new(mut profiles: Vec<VmProfile>) -> Self {
        profiles.sort_by(|a, b| {
            a.price_per_second
                .partial_cmp(&b.price_per_second)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let by_type = profiles
            .iter()
            .map(|p| (p.vm_type.clone(), p.clone()))
            .collect();
        Self {
            sorted: profiles,
            by_type,
        }
    }

    pub fn get(&self, vm_type: &str) -> Option<&VmProfile> {
        self.by_type.get(vm_type)
    }

    pub fn contains(&self, vm_type: &str) -> bool {
        self.by_type.contains_key(vm_type)
    }

    /// All profiles, cheapest first.
    pub fn profiles(&self) -> &[VmProfile] {
        &self.sorted
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }
}

/// The sustained load a given (limits, replicas) configuration serves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MSCSetting {
    pub replicas: u32,
    /// Maximum service capacity in requests per second.
    pub msc_per_second: f64,
    pub boot_time_sec: f64,
    #[serde(default)]
    pub stddev_boot_time_sec: f64,
}

/// A candidate container configuration for one interval: limits, the MSC
/// setting chosen for them, and the VM set (with its cost) that hosts it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainersConfig {
    pub limits: Limit,
    pub msc_setting: MSCSetting,
    #[serde(default)]
    pub vm_set: VMScale,
    #[serde(default)]
    pub cost: f64,
}

/// Deployed shape of one service: replica count and per-replica limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub scale: u32,
    pub cpu_cores: f64,
    pub memory_gb: f64,
}

impl ServiceInfo {
    pub fn limits(&self) -> Limit {
        Limit::new(self.cpu_cores, self.memory_gb)
    }
}

/// A cluster state: services with their shapes plus the VM multiset hosting
/// them. `hash` is a stable content hash stamped when the state is emitted
/// into a scaling step; it is excluded from equality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct State {
    pub services: BTreeMap<String, ServiceInfo>,
    pub vms: VMScale,
    #[serde(default)]
    pub hash: String,
}

impl State {
    pub fn new(services: BTreeMap<String, ServiceInfo>, vms: VMScale) -> Self {
        Self {
            services,
            vms,
            hash: String::new(),
        }
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.services == other.services && self.vms == other.vms
    }
}

/// Raw forecast handed to the windowing collaborator: parallel arrays of
/// sample instants and demand values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Forecast {
    pub timestamps: Vec<DateTime<Utc>>,
    pub requests: Vec<f64>,
}

/// One contiguous slice of forecast at which a new capacity decision may be
/// made.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriticalInterval {
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,
    /// Demand over the interval in requests per second.
    pub requests: f64,
}

/// Ordered, contiguous, non-overlapping critical intervals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessedForecast {
    pub critical_intervals: Vec<CriticalInterval>,
}

/// Metrics attached to one scaling step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StepMetrics {
    /// Requests per second the desired configuration sustains.
    pub requests_capacity: f64,
}

/// One entry in a policy timeline: the state to reach, the window in which it
/// applies, and the instant the transition must begin so that capacity is hot
/// by `time_start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingStep {
    pub initial_state: State,
    pub desired_state: State,
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,
    /// Always `<= time_start`; the gap is the computed transition lead-time.
    pub time_start_transition: DateTime<Utc>,
    pub metrics: StepMetrics,
}

/// How replicas are scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMethod {
    Horizontal,
    Vertical,
}

/// Derivation parameters recorded on an emitted policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyParameters {
    pub method: ScaleMethod,
    pub heterogeneous: bool,
    pub under_provisioning: bool,
    pub resize_pods: bool,
}

/// Lifecycle status of a derived policy. Every policy starts out discarded;
/// an external evaluator promotes the one it selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    Discarded,
    Selected,
}

/// Timing metrics for one derivation run of one strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyMetrics {
    pub start_time_derivation: DateTime<Utc>,
    pub finish_time_derivation: DateTime<Utc>,
    pub derivation_duration_secs: f64,
    pub number_scaling_actions: u32,
}

/// A candidate scaling policy: an ordered timeline of scaling steps covering
/// the forecast window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    pub algorithm: String,
    pub parameters: PolicyParameters,
    pub scaling_actions: Vec<ScalingStep>,
    pub time_window_start: DateTime<Utc>,
    pub time_window_end: DateTime<Utc>,
    pub metrics: PolicyMetrics,
    pub status: PolicyStatus,
}
