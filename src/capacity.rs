//! Replica capacity model for VM instance types.
//!
//! Kubernetes reserves a slice of every node for the kubelet and system
//! daemons before pods can be scheduled, so the usable share of a VM is
//! smaller than its nominal size. All packing decisions go through
//! [`max_replicas`] so the reservation is applied in exactly one place.

use crate::types::{Limit, VMScale, VmCatalog, VmProfile};

/// Fraction of CPU cores reserved for the container platform on every node.
pub const RESERVED_CPU_FRACTION: f64 = 0.06;
/// Fraction of memory reserved for the container platform on every node.
pub const RESERVED_MEM_FRACTION: f64 = 0.25;

/// Max number of service replicas a VM can host under the given per-replica
/// limits, after platform reservations. Returns 0 when the limit does not fit
/// the reserved-adjusted VM at all; callers must treat 0 as "unfit".
pub fn max_replicas(vm: &VmProfile, limit: &Limit) -> u32 {
    let cpu_available = vm.cpu_cores * (1.0 - RESERVED_CPU_FRACTION);
    let mem_available = vm.memory_gb * (1.0 - RESERVED_MEM_FRACTION);
    let by_cpu = cpu_available / limit.cpu_cores;
    let by_mem = mem_available / limit.memory_gb;
    let n = by_cpu.min(by_mem);
    if n.is_finite() && n >= 1.0 {
        n.floor() as u32
    } else {
        0
    }
}

/// Total replicas a VM set can host under the given limits.
pub fn replicas_capacity(set: &VMScale, catalog: &VmCatalog, limit: &Limit) -> u32 {
    set.iter()
        .map(|(t, n)| {
            catalog
                .get(t)
                .map(|vm| n * max_replicas(vm, limit))
                .unwrap_or(0)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm(cpu: f64, mem: f64) -> VmProfile {
        VmProfile {
            vm_type: "t".into(),
            cpu_cores: cpu,
            memory_gb: mem,
            price_per_second: 0.01,
            region: String::new(),
            csp: String::new(),
        }
    }

    #[test]
    fn floor_of_binding_dimension() {
        // 4 cores -> 3.76 usable; 16 GB -> 12 usable.
        // limit 1 core / 2 GB: cpu allows 3.76, mem allows 6 -> 3 replicas.
        let n = max_replicas(&vm(4.0, 16.0), &Limit::new(1.0, 2.0));
        assert_eq!(n, 3);
    }

    #[test]
    fn memory_bound_wins_when_tighter() {
        // cpu allows 7.52, mem allows 1.5 -> 1 replica.
        let n = max_replicas(&vm(8.0, 2.0), &Limit::new(1.0, 1.0));
        assert_eq!(n, 1);
    }

    #[test]
    fn oversized_limit_is_unfit() {
        let n = max_replicas(&vm(1.0, 2.0), &Limit::new(1.0, 2.0));
        // 0.94 cores and 1.5 GB available: a 1-core container does not fit.
        assert_eq!(n, 0);
    }

    #[test]
    fn set_capacity_sums_per_type() {
        let catalog = VmCatalog::new(vec![
            VmProfile {
                vm_type: "a".into(),
                cpu_cores: 4.0,
                memory_gb: 16.0,
                price_per_second: 0.01,
                region: String::new(),
                csp: String::new(),
            },
            VmProfile {
                vm_type: "b".into(),
                cpu_cores: 8.0,
                memory_gb: 32.0,
                price_per_second: 0.02,
                region: String::new(),
                csp: String::new(),
            },
        ]);
        let mut set = VMScale::new();
        set.set("a", 2);
        set.set("b", 1);
        let limit = Limit::new(1.0, 2.0);
        // a hosts 3 each, b hosts 7 (7.52 cpu / 12 mem).
        assert_eq!(replicas_capacity(&set, &catalog, &limit), 13);
    }
}
