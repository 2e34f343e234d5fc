//! VM-set construction: given a replica count and per-replica limits, build
//! the multiset of VM instances that will host them.
//!
//! Three packers share the catalog: a homogeneous packer (cheapest
//! single-type cover), a heterogeneous packer (exhaustive mixed-type search),
//! and a fixed-type packer used when a strategy has already committed to one
//! instance type. All are pure CPU; the heterogeneous search is exponential
//! in principle but replica counts are bounded by the service profiles and
//! catalogs stay small, so exhaustive enumeration is acceptable.

use std::collections::BTreeMap;

use crate::capacity::max_replicas;
use crate::types::{DerivationError, Limit, VMScale, VmCatalog, VmProfile};

/// Cheapest homogeneous VM set hosting `replicas` containers under `limit`.
/// Ties on cost break toward the smaller set.
pub fn build_homogeneous_vm_set(
    replicas: u32,
    limit: &Limit,
    catalog: &VmCatalog,
) -> Result<VMScale, DerivationError> {
    let mut candidates: Vec<VMScale> = Vec::new();
    for vm in catalog.profiles() {
        let cap = max_replicas(vm, limit);
        if cap > 0 {
            let num_vms = replicas.div_ceil(cap);
            candidates.push(VMScale::single(&vm.vm_type, num_vms));
        }
    }
    pick_cheapest(candidates, catalog, TieBreak::FewerVms)
        .ok_or(DerivationError::NoVmCandidate { replicas })
}

/// Cheapest VM set hosting `replicas` containers under `limit`, allowing
/// mixed instance types. Ties on cost break toward the larger set, favouring
/// spread across more, smaller instances.
///
/// Candidates are generated by walking a search tree: at each node, a type
/// that covers the remaining replicas closes a leaf, a type that covers some
/// of them recurses on the remainder. Only the leaf multisets are kept.
pub fn build_heterogeneous_vm_set(
    replicas: u32,
    limit: &Limit,
    catalog: &VmCatalog,
) -> Result<VMScale, DerivationError> {
    let capacities: BTreeMap<String, u32> = catalog
        .profiles()
        .iter()
        .map(|vm| (vm.vm_type.clone(), max_replicas(vm, limit)))
        .collect();

    let mut candidates = Vec::new();
    collect_leaf_sets(replicas, &capacities, &VMScale::new(), &mut candidates);
    pick_cheapest(candidates, catalog, TieBreak::MoreVms)
        .ok_or(DerivationError::NoVmCandidate { replicas })
}

/// Smallest set of a single, fixed instance type hosting `replicas`
/// containers under `limit`.
pub fn build_single_type_vm_set(
    replicas: u32,
    limit: &Limit,
    vm: &VmProfile,
) -> Result<VMScale, DerivationError> {
    let cap = max_replicas(vm, limit);
    if cap == 0 {
        return Err(DerivationError::NoVmCandidate { replicas });
    }
    Ok(VMScale::single(&vm.vm_type, replicas.div_ceil(cap)))
}

fn collect_leaf_sets(
    remaining: u32,
    capacities: &BTreeMap<String, u32>,
    partial: &VMScale,
    out: &mut Vec<VMScale>,
) {
    for (vm_type, cap) in capacities {
        if *cap >= remaining {
            let mut leaf = partial.clone();
            leaf.add(vm_type, 1);
            out.push(leaf);
        } else if *cap > 0 {
            let mut branch = partial.clone();
            branch.add(vm_type, 1);
            collect_leaf_sets(remaining - cap, capacities, &branch, out);
        }
    }
}

enum TieBreak {
    FewerVms,
    MoreVms,
}

fn pick_cheapest(
    mut candidates: Vec<VMScale>,
    catalog: &VmCatalog,
    tie_break: TieBreak,
) -> Option<VMScale> {
    candidates.sort_by(|a, b| {
        let by_cost = a
            .cost(catalog)
            .partial_cmp(&b.cost(catalog))
            .unwrap_or(std::cmp::Ordering::Equal);
        by_cost.then_with(|| match tie_break {
            TieBreak::FewerVms => a.total_vms().cmp(&b.total_vms()),
            TieBreak::MoreVms => b.total_vms().cmp(&a.total_vms()),
        })
    });
    // Distinct branches of the search can reach the same multiset.
    candidates.dedup();
    candidates.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm(t: &str, cpu: f64, mem: f64, price: f64) -> VmProfile {
        VmProfile {
            vm_type: t.into(),
            cpu_cores: cpu,
            memory_gb: mem,
            price_per_second: price,
            region: String::new(),
            csp: String::new(),
        }
    }

    // Capacities under limit (1c, 2g): small -> 1, medium -> 3, large -> 7.
    fn catalog() -> VmCatalog {
        VmCatalog::new(vec![
            vm("small", 2.0, 4.0, 0.010),
            vm("medium", 4.0, 16.0, 0.025),
            vm("large", 8.0, 32.0, 0.060),
        ])
    }

    fn limit() -> Limit {
        Limit::new(1.0, 2.0)
    }

    #[test]
    fn homogeneous_picks_globally_cheapest_type() {
        // 6 replicas: small -> 6 VMs ($0.06), medium -> 2 VMs ($0.05),
        // large -> 1 VM ($0.06).
        let set = build_homogeneous_vm_set(6, &limit(), &catalog()).unwrap();
        assert_eq!(set, VMScale::single("medium", 2));
    }

    #[test]
    fn homogeneous_tie_breaks_on_fewer_vms() {
        // 6 replicas, small and large both cost $0.06: prefer 1 large over
        // 6 small.
        let catalog = VmCatalog::new(vec![
            vm("small", 2.0, 4.0, 0.010),
            vm("large", 8.0, 32.0, 0.060),
        ]);
        let set = build_homogeneous_vm_set(6, &limit(), &catalog).unwrap();
        assert_eq!(set, VMScale::single("large", 1));
    }

    #[test]
    fn homogeneous_fails_when_nothing_fits() {
        let catalog = VmCatalog::new(vec![vm("tiny", 0.5, 1.0, 0.001)]);
        let err = build_homogeneous_vm_set(2, &limit(), &catalog).unwrap_err();
        assert!(matches!(err, DerivationError::NoVmCandidate { replicas: 2 }));
    }

    #[test]
    fn heterogeneous_never_beats_itself_on_cost() {
        // Mixed cover for 4 replicas: medium(3) + small(1) = $0.035 beats
        // any homogeneous cover (2 medium = $0.05, 4 small = $0.04).
        let set = build_heterogeneous_vm_set(4, &limit(), &catalog()).unwrap();
        let homo = build_homogeneous_vm_set(4, &limit(), &catalog()).unwrap();
        let c = catalog();
        assert!(set.cost(&c) <= homo.cost(&c));
        let mut expected = VMScale::single("medium", 1);
        expected.add("small", 1);
        assert_eq!(set, expected);
    }

    #[test]
    fn heterogeneous_tie_breaks_on_more_vms() {
        // 2 replicas with equal-cost covers: two singles ($0.02) vs one
        // double ($0.02). The spread wins.
        let catalog = VmCatalog::new(vec![
            vm("one", 2.0, 4.0, 0.010),
            vm("two", 4.0, 8.0, 0.020),
        ]);
        let set = build_heterogeneous_vm_set(2, &limit(), &catalog).unwrap();
        assert_eq!(set, VMScale::single("one", 2));
    }

    #[test]
    fn heterogeneous_fails_when_nothing_fits() {
        let catalog = VmCatalog::new(vec![vm("tiny", 0.5, 1.0, 0.001)]);
        let err = build_heterogeneous_vm_set(1, &limit(), &catalog).unwrap_err();
        assert!(matches!(err, DerivationError::NoVmCandidate { replicas: 1 }));
    }

    #[test]
    fn single_type_rounds_up() {
        let set = build_single_type_vm_set(7, &limit(), &vm("medium", 4.0, 16.0, 0.025)).unwrap();
        assert_eq!(set, VMScale::single("medium", 3));
    }

    #[test]
    fn single_type_rejects_unfit_vm() {
        let err = build_single_type_vm_set(1, &limit(), &vm("tiny", 0.5, 1.0, 0.001)).unwrap_err();
        assert!(matches!(err, DerivationError::NoVmCandidate { .. }));
    }
}
