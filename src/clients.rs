//! HTTP clients for the external collaborators: the scheduler that reports
//! the currently deployed state, and the performance-profile service that
//! predicts MSC settings and VM boot/shutdown times.
//!
//! Both are modelled as traits so derivation runs against stubs in tests;
//! the reqwest implementations are what the binary wires in. Each call
//! carries the client-wide timeout — nothing is retried at this layer.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::types::{Limit, State};

const ENDPOINT_CURRENT_STATE: &str = "/api/current-state";
const ENDPOINT_PROFILE_BY_MSC: &str = "/api/service-profile/by-msc";
const ENDPOINT_PROFILE_BY_REPLICAS: &str = "/api/service-profile/by-replicas";
const ENDPOINT_VM_TIMES: &str = "/api/vms/boot-shutdown";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from the outbound collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("scheduler request failed: {0}")]
    Scheduler(String),

    #[error("performance-profile service unavailable: {0}")]
    Predictor(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

/// Predicted MSC setting as returned by the performance-profile service.
/// Boot times come back in milliseconds and are converted by the broker.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PredictedMsc {
    pub replicas: u32,
    pub msc_per_second: f64,
    #[serde(default)]
    pub boot_time_ms: f64,
    #[serde(default)]
    pub stddev_boot_time_ms: f64,
}

/// Boot and shutdown duration for a (type, count) VM group.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct VmTimes {
    pub boot_time_sec: f64,
    pub shutdown_time_sec: f64,
}

/// Reports the currently deployed cluster state.
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    async fn current_state(&self) -> Result<State, ClientError>;
}

/// Performance predictions for container configurations and VM groups.
#[async_trait]
pub trait PerformanceClient: Send + Sync {
    /// Smallest replica count (plus its MSC) expected to sustain `load`
    /// under the given per-replica limits.
    async fn predict_replicas(&self, load: f64, limits: Limit)
        -> Result<PredictedMsc, ClientError>;

    /// Sustained MSC for a fixed replica count under the given limits.
    async fn predict_msc_by_replicas(
        &self,
        replicas: u32,
        limits: Limit,
    ) -> Result<PredictedMsc, ClientError>;

    /// Boot/shutdown profile for `count` VMs of `vm_type`.
    async fn vm_boot_shutdown(&self, vm_type: &str, count: u32) -> Result<VmTimes, ClientError>;
}

/// Scheduler client over HTTP.
pub struct HttpSchedulerClient {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpSchedulerClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl SchedulerClient for HttpSchedulerClient {
    async fn current_state(&self) -> Result<State, ClientError> {
        let url = format!("{}{}", self.endpoint, ENDPOINT_CURRENT_STATE);
        debug!(%url, "requesting current state");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ClientError::Scheduler(e.to_string()))?;
        response
            .json::<State>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}

/// Performance-profile client over HTTP. Carries the application identity
/// and deployment location so callers only pass what varies per query.
pub struct HttpPerformanceClient {
    endpoint: String,
    app_name: String,
    app_type: String,
    main_service_name: String,
    csp: String,
    region: String,
    http: reqwest::Client,
}

impl HttpPerformanceClient {
    pub fn new(
        endpoint: impl Into<String>,
        app_name: impl Into<String>,
        app_type: impl Into<String>,
        main_service_name: impl Into<String>,
        csp: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            app_name: app_name.into(),
            app_type: app_type.into(),
            main_service_name: main_service_name.into(),
            csp: csp.into(),
            region: region.into(),
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    async fn get_predicted(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<PredictedMsc, ClientError> {
        let url = format!("{}{}", self.endpoint, path);
        let mut params = vec![
            ("app_name", self.app_name.clone()),
            ("app_type", self.app_type.clone()),
            ("service", self.main_service_name.clone()),
        ];
        params.extend(query.iter().map(|(k, v)| (*k, v.clone())));
        debug!(%url, "querying performance predictor");
        let response = self
            .http
            .get(&url)
            .query(&params)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ClientError::Predictor(e.to_string()))?;
        response
            .json::<PredictedMsc>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PerformanceClient for HttpPerformanceClient {
    async fn predict_replicas(
        &self,
        load: f64,
        limits: Limit,
    ) -> Result<PredictedMsc, ClientError> {
        self.get_predicted(
            ENDPOINT_PROFILE_BY_MSC,
            &[
                ("load", load.to_string()),
                ("cpu_cores", limits.cpu_cores.to_string()),
                ("memory_gb", limits.memory_gb.to_string()),
            ],
        )
        .await
    }

    async fn predict_msc_by_replicas(
        &self,
        replicas: u32,
        limits: Limit,
    ) -> Result<PredictedMsc, ClientError> {
        self.get_predicted(
            ENDPOINT_PROFILE_BY_REPLICAS,
            &[
                ("replicas", replicas.to_string()),
                ("cpu_cores", limits.cpu_cores.to_string()),
                ("memory_gb", limits.memory_gb.to_string()),
            ],
        )
        .await
    }

    async fn vm_boot_shutdown(&self, vm_type: &str, count: u32) -> Result<VmTimes, ClientError> {
        let url = format!("{}{}", self.endpoint, ENDPOINT_VM_TIMES);
        debug!(%url, vm_type, count, "querying VM boot/shutdown profile");
        let response = self
            .http
            .get(&url)
            .query(&[
                ("vm_type", vm_type.to_string()),
                ("count", count.to_string()),
                ("csp", self.csp.clone()),
                ("region", self.region.clone()),
            ])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ClientError::Predictor(e.to_string()))?;
        response
            .json::<VmTimes>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}
