//! # polder
//!
//! Scaling-policy derivation engine for cloud-deployed microservices.
//!
//! Given a workload forecast broken into demand intervals, a catalog of VM
//! instance types, service performance profiles and the currently deployed
//! state, polder derives candidate scaling policies: timelines of scaling
//! steps, each naming a desired cluster state (VM multiset + container
//! configuration) and the instant its transition must begin so the capacity
//! is hot by the interval boundary. Policies are candidates only — an
//! external evaluator scores and selects them.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        polder                             │
//! │  ┌─────────────────────────────────────────────────────┐  │
//! │  │ Orchestrator (derivation)                           │  │
//! │  │ - Validates deployed state against the catalog      │  │
//! │  │ - Windows the forecast into critical intervals      │  │
//! │  │ - Dispatches one strategy, or all of them           │  │
//! │  └─────────────────────────────────────────────────────┘  │
//! │                          │                                │
//! │  ┌─────────────────────────────────────────────────────┐  │
//! │  │ Strategies (strategy::*)                            │  │
//! │  │ naive · best-base-instance · best-resource-pair     │  │
//! │  │ small-step · delta-repacked · delta-load            │  │
//! │  └─────────────────────────────────────────────────────┘  │
//! │             │                          │                  │
//! │  ┌────────────────────┐   ┌──────────────────────────┐   │
//! │  │ Profile broker     │   │ Packers + capacity model │   │
//! │  │ cache ⇄ predictor  │   │ homogeneous/heterogeneous│   │
//! │  └────────────────────┘   └──────────────────────────┘   │
//! │                          │                                │
//! │  ┌─────────────────────────────────────────────────────┐  │
//! │  │ Transition timer (steps)                            │  │
//! │  │ boot/join/pod lead-times, overlap, coalescing       │  │
//! │  └─────────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//!          │                                    │
//!     [scheduler]                  [performance-profile service]
//! ```

pub mod capacity;
mod clients;
mod config;
mod derivation;
mod packing;
mod profiles;
pub mod steps;
pub mod strategy;
pub mod telemetry;
mod types;

pub use clients::{
    ClientError, HttpPerformanceClient, HttpSchedulerClient, PerformanceClient, PredictedMsc,
    SchedulerClient, VmTimes,
};
pub use config::{ComponentEndpoint, PolicySettings, SystemConfiguration};
pub use derivation::{derive_policies, IntervalWindowing, WindowDerivation};
pub use packing::{build_heterogeneous_vm_set, build_homogeneous_vm_set, build_single_type_vm_set};
pub use profiles::{
    PerformanceProfile, ProfileBroker, ProfileCache, VmTimingSample, DEFAULT_POD_BOOT_TIME_SEC,
    DEFAULT_VM_BOOT_TIME_SEC, DEFAULT_VM_SHUTDOWN_TIME_SEC,
};
pub use types::{
    ContainersConfig, CriticalInterval, DerivationError, Forecast, Limit, MSCSetting, Policy,
    PolicyMetrics, PolicyParameters, PolicyStatus, ProcessedForecast, ScaleMethod, ScalingStep,
    ServiceInfo, State, StepMetrics, VMScale, VmCatalog, VmProfile,
};
