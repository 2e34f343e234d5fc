//! System configuration for a derivation run.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::strategy::ALL_ALGORITHMS;

/// Top-level configuration. Loaded once per run, read-only thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfiguration {
    pub app_name: String,

    /// Application class used by the performance predictor (e.g. "web").
    #[serde(default)]
    pub app_type: String,

    /// The service whose replicas the policies scale.
    pub main_service_name: String,

    /// Cloud service provider identifier, passed through to VM timing queries.
    #[serde(default)]
    pub csp: String,

    #[serde(default)]
    pub region: String,

    /// Strategy to run. Unset or unrecognized means "run them all".
    #[serde(default)]
    pub preferred_algorithm: Option<String>,

    #[serde(default)]
    pub policy_settings: PolicySettings,

    pub scheduler_component: ComponentEndpoint,

    pub performance_profiles_component: ComponentEndpoint,
}

/// Location of an external collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentEndpoint {
    pub endpoint: String,
}

/// Knobs shared by all strategies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PolicySettings {
    #[serde(default)]
    pub under_provisioning_allowed: bool,

    /// Ceiling for the under-provision acceptance rule, as a fraction.
    #[serde(default = "default_max_under_provision")]
    pub max_under_provision_percentage: f64,

    #[serde(default)]
    pub pods_resize_allowed: bool,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            under_provisioning_allowed: false,
            max_under_provision_percentage: default_max_under_provision(),
            pods_resize_allowed: false,
        }
    }
}

fn default_max_under_provision() -> f64 {
    0.05
}

impl SystemConfiguration {
    /// Load configuration from a JSON file.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Warn about common misconfigurations.
    pub fn validate(&self) {
        if let Some(ref algorithm) = self.preferred_algorithm {
            if !ALL_ALGORITHMS.contains(&algorithm.as_str()) {
                warn!(
                    %algorithm,
                    "preferred_algorithm is not a known strategy; all strategies will run"
                );
            }
        }
        if self.policy_settings.max_under_provision_percentage < 0.0 {
            warn!("max_under_provision_percentage is negative; under-provisioning will never be accepted");
        }
    }
}
