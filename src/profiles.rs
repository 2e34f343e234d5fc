//! Profile broker: the bridge between the local profile cache and the remote
//! performance-prediction service.
//!
//! Lookups are cache-first. On a miss the broker calls the predictor and
//! writes the discovered setting back, so later runs (and parallel
//! strategies) see it. On predictor failure it substitutes the documented
//! defaults and derivation continues — profile data degrades gracefully,
//! it never aborts a run.
//!
//! The cache is the only shared mutable resource in a derivation run. Writes
//! go through `std::sync::RwLock` and never hold the lock across an await;
//! stale reads from parallel strategies are acceptable since profile values
//! evolve slowly.

use std::sync::{Arc, RwLock};

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clients::{PerformanceClient, PredictedMsc};
use crate::types::{ContainersConfig, DerivationError, Limit, MSCSetting, VMScale};

/// Fallback pod boot time when the predictor reports none.
pub const DEFAULT_POD_BOOT_TIME_SEC: f64 = 20.0;
/// Fallback per-group VM boot time when neither cache nor predictor has one.
pub const DEFAULT_VM_BOOT_TIME_SEC: f64 = 180.0;
/// Fallback per-group VM shutdown time when neither cache nor predictor has one.
pub const DEFAULT_VM_SHUTDOWN_TIME_SEC: f64 = 120.0;

/// All known MSC settings for one container limit shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceProfile {
    pub limits: Limit,
    /// Sorted by ascending replica count.
    pub settings: Vec<MSCSetting>,
}

/// One observed boot/shutdown sample for a (type, count) VM group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VmTimingSample {
    pub count: u32,
    pub boot_time_sec: f64,
    pub shutdown_time_sec: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct VmTimingProfile {
    vm_type: String,
    samples: Vec<VmTimingSample>,
}

/// In-memory cache of container performance profiles and VM timing samples.
#[derive(Debug, Default)]
pub struct ProfileCache {
    profiles: RwLock<Vec<PerformanceProfile>>,
    vm_timings: RwLock<Vec<VmTimingProfile>>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the container-profile contents, e.g. from a seed file.
    pub fn seed_profiles(&self, profiles: Vec<PerformanceProfile>) {
        let mut guard = self.profiles.write().unwrap();
        *guard = profiles;
        for profile in guard.iter_mut() {
            profile
                .settings
                .sort_by_key(|s| s.replicas);
        }
    }

    fn find_setting(&self, limits: Limit, replicas: u32) -> Option<MSCSetting> {
        self.profiles
            .read()
            .unwrap()
            .iter()
            .find(|p| p.limits == limits)
            .and_then(|p| p.settings.iter().find(|s| s.replicas == replicas))
            .copied()
    }

    /// Smallest-replica setting sustaining at least `load`.
    fn over_candidate(&self, limits: Limit, load: f64) -> Option<MSCSetting> {
        self.profiles
            .read()
            .unwrap()
            .iter()
            .find(|p| p.limits == limits)
            .and_then(|p| {
                p.settings
                    .iter()
                    .filter(|s| s.msc_per_second >= load)
                    .min_by_key(|s| s.replicas)
            })
            .copied()
    }

    /// Largest-capacity setting still below `load`.
    fn under_candidate(&self, limits: Limit, load: f64) -> Option<MSCSetting> {
        self.profiles
            .read()
            .unwrap()
            .iter()
            .find(|p| p.limits == limits)
            .and_then(|p| {
                p.settings
                    .iter()
                    .filter(|s| s.msc_per_second < load && s.msc_per_second > 0.0)
                    .max_by(|a, b| {
                        a.msc_per_second
                            .partial_cmp(&b.msc_per_second)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
            })
            .copied()
    }

    fn profiles_under(&self, cpu_cap: f64, mem_cap: f64) -> Vec<PerformanceProfile> {
        self.profiles
            .read()
            .unwrap()
            .iter()
            .filter(|p| p.limits.fits_within(cpu_cap, mem_cap))
            .cloned()
            .collect()
    }

    fn upsert_setting(&self, limits: Limit, setting: MSCSetting) {
        let mut profiles = self.profiles.write().unwrap();
        let Some(profile) = profiles.iter_mut().find(|p| p.limits == limits) else {
            profiles.push(PerformanceProfile {
                limits,
                settings: vec![setting],
            });
            return;
        };
        match profile
            .settings
            .iter_mut()
            .find(|s| s.replicas == setting.replicas)
        {
            Some(existing) => *existing = setting,
            None => {
                profile.settings.push(setting);
                profile.settings.sort_by_key(|s| s.replicas);
            }
        }
    }

    fn vm_timing(&self, vm_type: &str, count: u32) -> Option<VmTimingSample> {
        self.vm_timings
            .read()
            .unwrap()
            .iter()
            .find(|p| p.vm_type == vm_type)
            .and_then(|p| p.samples.iter().find(|s| s.count == count))
            .copied()
    }

    fn record_vm_timing(&self, vm_type: &str, sample: VmTimingSample) {
        let mut timings = self.vm_timings.write().unwrap();
        match timings.iter_mut().find(|p| p.vm_type == vm_type) {
            Some(profile) => {
                if !profile.samples.iter().any(|s| s.count == sample.count) {
                    profile.samples.push(sample);
                }
            }
            None => timings.push(VmTimingProfile {
                vm_type: vm_type.to_string(),
                samples: vec![sample],
            }),
        }
    }
}

/// Brokers profile lookups between the cache and the remote predictor.
pub struct ProfileBroker {
    cache: ProfileCache,
    predictor: Arc<dyn PerformanceClient>,
}

impl ProfileBroker {
    pub fn new(cache: ProfileCache, predictor: Arc<dyn PerformanceClient>) -> Self {
        Self { cache, predictor }
    }

    /// MSC setting for a fixed (limits, replicas) configuration. Cache-first;
    /// discovered settings are written back. On predictor failure the
    /// capacity is unknown (0) and the pod boot time falls back to the
    /// default, with a warning.
    pub async fn profile_by_limits_and_replicas(
        &self,
        limits: Limit,
        replicas: u32,
    ) -> MSCSetting {
        if let Some(setting) = self.cache.find_setting(limits, replicas) {
            counter!("polder_profile_cache_total", "outcome" => "hit").increment(1);
            return setting;
        }
        counter!("polder_profile_cache_total", "outcome" => "miss").increment(1);

        match self.predictor.predict_msc_by_replicas(replicas, limits).await {
            Ok(predicted) => {
                let setting = setting_from_prediction(predicted);
                self.cache.upsert_setting(limits, setting);
                setting
            }
            Err(e) => {
                warn!(error = %e, replicas, "predictor unavailable, using default pod boot time");
                counter!("polder_predictor_fallback_total").increment(1);
                MSCSetting {
                    replicas,
                    msc_per_second: 0.0,
                    boot_time_sec: DEFAULT_POD_BOOT_TIME_SEC,
                    stddev_boot_time_sec: 0.0,
                }
            }
        }
    }

    /// Container configuration for a load under fixed limits.
    ///
    /// Without `allow_under` this returns the smallest-replica configuration
    /// whose MSC covers the load, asking the predictor (and writing back) on
    /// a cache miss. With `allow_under` it returns the largest configuration
    /// still below the load when one exists — the caller decides whether the
    /// deficit is acceptable and whether it wins on VM-set cost.
    pub async fn select_profile_for_load(
        &self,
        load: f64,
        limits: Limit,
        allow_under: bool,
    ) -> Result<ContainersConfig, DerivationError> {
        if allow_under {
            if let Some(setting) = self.cache.under_candidate(limits, load) {
                return Ok(config_for(limits, setting));
            }
        }

        if let Some(setting) = self.cache.over_candidate(limits, load) {
            return Ok(config_for(limits, setting));
        }

        match self.predictor.predict_replicas(load, limits).await {
            Ok(predicted) if predicted.replicas > 0 => {
                let setting = setting_from_prediction(predicted);
                self.cache.upsert_setting(limits, setting);
                Ok(config_for(limits, setting))
            }
            Ok(_) => Err(DerivationError::NoProfileMatch { load }),
            Err(e) => {
                warn!(error = %e, load, "predictor unavailable and no cached profile fits");
                counter!("polder_predictor_fallback_total").increment(1);
                Err(DerivationError::NoProfileMatch { load })
            }
        }
    }

    /// All cached profiles whose limits fit within the given caps, used to
    /// enumerate container-resize options.
    pub fn profiles_under_limit(&self, cpu_cap: f64, mem_cap: f64) -> Vec<PerformanceProfile> {
        self.cache.profiles_under(cpu_cap, mem_cap)
    }

    /// Total boot time for a VM set, summed per (type, count) group.
    pub async fn vm_boot_time(&self, set: &VMScale) -> f64 {
        self.vm_times(set, |s| s.boot_time_sec, DEFAULT_VM_BOOT_TIME_SEC)
            .await
    }

    /// Total shutdown time for a VM set, summed per (type, count) group.
    pub async fn vm_shutdown_time(&self, set: &VMScale) -> f64 {
        self.vm_times(set, |s| s.shutdown_time_sec, DEFAULT_VM_SHUTDOWN_TIME_SEC)
            .await
    }

    async fn vm_times(
        &self,
        set: &VMScale,
        pick: impl Fn(&VmTimingSample) -> f64,
        default_sec: f64,
    ) -> f64 {
        let mut total = 0.0;
        for (vm_type, count) in set.iter() {
            if let Some(sample) = self.cache.vm_timing(vm_type, count) {
                total += pick(&sample);
                continue;
            }
            match self.predictor.vm_boot_shutdown(vm_type, count).await {
                Ok(times) => {
                    let sample = VmTimingSample {
                        count,
                        boot_time_sec: times.boot_time_sec,
                        shutdown_time_sec: times.shutdown_time_sec,
                    };
                    self.cache.record_vm_timing(vm_type, sample);
                    total += pick(&sample);
                }
                Err(e) => {
                    warn!(error = %e, vm_type, count, "VM timing unavailable, using default");
                    counter!("polder_predictor_fallback_total").increment(1);
                    total += default_sec;
                }
            }
        }
        total
    }

    /// Seed the container-profile cache, e.g. from a profiles file.
    pub fn seed_profiles(&self, profiles: Vec<PerformanceProfile>) {
        self.cache.seed_profiles(profiles);
    }

    /// Record a VM timing sample directly, e.g. from a seed file.
    pub fn seed_vm_timing(&self, vm_type: &str, sample: VmTimingSample) {
        self.cache.record_vm_timing(vm_type, sample);
    }

    fn debug_profile_count(&self) -> usize {
        self.cache.profiles.read().unwrap().len()
    }
}

impl std::fmt::Debug for ProfileBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileBroker")
            .field("cached_profiles", &self.debug_profile_count())
            .finish_non_exhaustive()
    }
}

fn setting_from_prediction(predicted: PredictedMsc) -> MSCSetting {
    let boot_time_sec = if predicted.boot_time_ms > 0.0 {
        predicted.boot_time_ms / 1000.0
    } else {
        DEFAULT_POD_BOOT_TIME_SEC
    };
    MSCSetting {
        replicas: predicted.replicas,
        msc_per_second: predicted.msc_per_second,
        boot_time_sec,
        stddev_boot_time_sec: predicted.stddev_boot_time_ms / 1000.0,
    }
}

fn config_for(limits: Limit, setting: MSCSetting) -> ContainersConfig {
    ContainersConfig {
        limits,
        msc_setting: setting,
        vm_set: VMScale::new(),
        cost: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{ClientError, VmTimes};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Predictor stub: either answers with a fixed prediction or fails.
    struct StubPredictor {
        prediction: Option<PredictedMsc>,
        vm_times: Option<VmTimes>,
        calls: AtomicUsize,
    }

    impl StubPredictor {
        fn answering(prediction: PredictedMsc, vm_times: VmTimes) -> Self {
            Self {
                prediction: Some(prediction),
                vm_times: Some(vm_times),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                prediction: None,
                vm_times: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PerformanceClient for StubPredictor {
        async fn predict_replicas(
            &self,
            _load: f64,
            _limits: Limit,
        ) -> Result<PredictedMsc, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prediction
                .ok_or_else(|| ClientError::Predictor("stub down".into()))
        }

        async fn predict_msc_by_replicas(
            &self,
            _replicas: u32,
            _limits: Limit,
        ) -> Result<PredictedMsc, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prediction
                .ok_or_else(|| ClientError::Predictor("stub down".into()))
        }

        async fn vm_boot_shutdown(
            &self,
            _vm_type: &str,
            _count: u32,
        ) -> Result<VmTimes, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.vm_times
                .ok_or_else(|| ClientError::Predictor("stub down".into()))
        }
    }

    fn limits() -> Limit {
        Limit::new(1.0, 2.0)
    }

    fn setting(replicas: u32, msc: f64) -> MSCSetting {
        MSCSetting {
            replicas,
            msc_per_second: msc,
            boot_time_sec: 30.0,
            stddev_boot_time_sec: 0.0,
        }
    }

    fn seeded_cache() -> ProfileCache {
        let cache = ProfileCache::new();
        cache.seed_profiles(vec![PerformanceProfile {
            limits: limits(),
            settings: vec![setting(1, 50.0), setting(2, 95.0), setting(3, 140.0)],
        }]);
        cache
    }

    #[tokio::test]
    async fn over_provision_picks_smallest_covering_replica_count() {
        let predictor = Arc::new(StubPredictor::failing());
        let broker = ProfileBroker::new(seeded_cache(), predictor.clone());

        let config = broker
            .select_profile_for_load(90.0, limits(), false)
            .await
            .unwrap();
        assert_eq!(config.msc_setting.replicas, 2);
        assert_eq!(predictor.call_count(), 0);
    }

    #[tokio::test]
    async fn under_provision_offers_largest_deficit_candidate() {
        let broker = ProfileBroker::new(seeded_cache(), Arc::new(StubPredictor::failing()));

        let config = broker
            .select_profile_for_load(100.0, limits(), true)
            .await
            .unwrap();
        assert_eq!(config.msc_setting.replicas, 2);
        assert!(config.msc_setting.msc_per_second < 100.0);
    }

    #[tokio::test]
    async fn cache_miss_queries_predictor_and_writes_back() {
        let predictor = Arc::new(StubPredictor::answering(
            PredictedMsc {
                replicas: 4,
                msc_per_second: 210.0,
                boot_time_ms: 15_000.0,
                stddev_boot_time_ms: 0.0,
            },
            VmTimes::default(),
        ));
        let broker = ProfileBroker::new(ProfileCache::new(), predictor.clone());

        let config = broker
            .select_profile_for_load(200.0, limits(), false)
            .await
            .unwrap();
        assert_eq!(config.msc_setting.replicas, 4);
        assert!((config.msc_setting.boot_time_sec - 15.0).abs() < 1e-9);

        // Second lookup is served from the cache.
        let again = broker
            .select_profile_for_load(200.0, limits(), false)
            .await
            .unwrap();
        assert_eq!(again.msc_setting.replicas, 4);
        assert_eq!(predictor.call_count(), 1);
    }

    #[tokio::test]
    async fn predictor_failure_without_cache_is_no_match() {
        let broker = ProfileBroker::new(ProfileCache::new(), Arc::new(StubPredictor::failing()));
        let err = broker
            .select_profile_for_load(100.0, limits(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, DerivationError::NoProfileMatch { .. }));
    }

    #[tokio::test]
    async fn fixed_replica_lookup_falls_back_to_default_boot_time() {
        let broker = ProfileBroker::new(ProfileCache::new(), Arc::new(StubPredictor::failing()));
        let setting = broker.profile_by_limits_and_replicas(limits(), 3).await;
        assert_eq!(setting.replicas, 3);
        assert_eq!(setting.boot_time_sec, DEFAULT_POD_BOOT_TIME_SEC);
    }

    #[tokio::test]
    async fn vm_times_cache_first_then_predictor_then_default() {
        let predictor = Arc::new(StubPredictor::answering(
            PredictedMsc::default(),
            VmTimes {
                boot_time_sec: 90.0,
                shutdown_time_sec: 45.0,
            },
        ));
        let broker = ProfileBroker::new(ProfileCache::new(), predictor.clone());
        broker.seed_vm_timing(
            "cached",
            VmTimingSample {
                count: 2,
                boot_time_sec: 60.0,
                shutdown_time_sec: 30.0,
            },
        );

        let mut set = VMScale::new();
        set.set("cached", 2);
        set.set("fresh", 1);
        let boot = broker.vm_boot_time(&set).await;
        assert!((boot - 150.0).abs() < 1e-9);
        // Only the uncached type hit the predictor, and its sample was
        // written back for the shutdown query.
        assert_eq!(predictor.call_count(), 1);
        let shutdown = broker.vm_shutdown_time(&set).await;
        assert!((shutdown - 75.0).abs() < 1e-9);
        assert_eq!(predictor.call_count(), 1);

        let failing = ProfileBroker::new(ProfileCache::new(), Arc::new(StubPredictor::failing()));
        let boot = failing.vm_boot_time(&VMScale::single("unknown", 1)).await;
        assert_eq!(boot, DEFAULT_VM_BOOT_TIME_SEC);
    }

    #[tokio::test]
    async fn profiles_under_limit_filters_by_caps() {
        let cache = ProfileCache::new();
        cache.seed_profiles(vec![
            PerformanceProfile {
                limits: Limit::new(0.5, 1.0),
                settings: vec![setting(1, 20.0)],
            },
            PerformanceProfile {
                limits: Limit::new(2.0, 4.0),
                settings: vec![setting(1, 80.0)],
            },
            PerformanceProfile {
                limits: Limit::new(1.0, 8.0),
                settings: vec![setting(1, 40.0)],
            },
        ]);
        let broker = ProfileBroker::new(cache, Arc::new(StubPredictor::failing()));

        let fitting = broker.profiles_under_limit(2.0, 4.0);
        assert_eq!(fitting.len(), 2);
        assert!(fitting.iter().all(|p| p.limits.fits_within(2.0, 4.0)));
    }
}
