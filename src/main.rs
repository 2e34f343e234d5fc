//! polder - scaling-policy derivation for cloud microservices
//!
//! This binary loads the system configuration, VM catalog and forecast,
//! runs the configured derivation strategies against the live scheduler and
//! performance-profile service, and prints the candidate policies as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use polder::{
    derive_policies, HttpPerformanceClient, HttpSchedulerClient, IntervalWindowing,
    PerformanceProfile, ProfileBroker, ProfileCache, SystemConfiguration, VmCatalog, VmProfile,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "polder")]
#[command(about = "Derive candidate scaling policies from a workload forecast")]
struct Args {
    /// Path to the system configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Path to the VM catalog file (JSON array of VM profiles)
    #[arg(long)]
    catalog: PathBuf,

    /// Path to the forecast file
    #[arg(long)]
    forecast: PathBuf,

    /// Optional seed file with previously discovered performance profiles
    #[arg(long)]
    profiles: Option<PathBuf>,

    /// Write policies to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the Prometheus metrics snapshot after the run
    #[arg(long)]
    metrics: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf, what: &str) -> Result<T> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {} file: {}", what, path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {} file: {}", what, path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("polder=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let metrics_handle = polder::telemetry::install();

    let config = SystemConfiguration::from_file(&args.config)
        .await
        .context("Failed to load configuration")?;
    config.validate();

    let vm_profiles: Vec<VmProfile> = read_json(&args.catalog, "catalog").await?;
    let forecast = read_json(&args.forecast, "forecast").await?;
    info!(
        service = %config.main_service_name,
        vm_types = vm_profiles.len(),
        algorithm = config.preferred_algorithm.as_deref().unwrap_or("all"),
        "Configuration loaded"
    );

    let catalog = Arc::new(VmCatalog::new(vm_profiles));
    let scheduler = HttpSchedulerClient::new(config.scheduler_component.endpoint.clone());
    let predictor = Arc::new(HttpPerformanceClient::new(
        config.performance_profiles_component.endpoint.clone(),
        config.app_name.clone(),
        config.app_type.clone(),
        config.main_service_name.clone(),
        config.csp.clone(),
        config.region.clone(),
    ));
    let broker = Arc::new(ProfileBroker::new(ProfileCache::new(), predictor));

    if let Some(ref path) = args.profiles {
        let seed: Vec<PerformanceProfile> = read_json(path, "profiles").await?;
        info!(profiles = seed.len(), "Seeding profile cache");
        broker.seed_profiles(seed);
    }

    let policies = derive_policies(
        Arc::new(config),
        catalog,
        broker,
        &scheduler,
        &IntervalWindowing,
        &forecast,
    )
    .await
    .context("Policy derivation failed")?;

    info!(policies = policies.len(), "Derivation finished");

    let rendered = serde_json::to_string_pretty(&policies).context("Failed to encode policies")?;
    match args.output {
        Some(path) => tokio::fs::write(&path, rendered)
            .await
            .with_context(|| format!("Failed to write policies to {}", path.display()))?,
        None => println!("{rendered}"),
    }

    if args.metrics {
        if let Some(handle) = metrics_handle {
            eprintln!("{}", handle.render());
        }
    }

    Ok(())
}
