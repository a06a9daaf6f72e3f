// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Policy record store
//!
//! `CatDb` holds every CLOS mask the user has set or the generator has
//! defaulted, keyed by cache region, VM, vCPU and policy type. It is the
//! durable source of truth policy generation merges with its defaults:
//! records are created on first write or first defaulted read, updated in
//! place afterwards, and never deleted. Records whose region or VM went
//! away simply stop being read.
//!
//! Records are keyed by the VM's `@id`. Scenario documents name the VM of a
//! policy instead, so the name is resolved against the VM list once, when
//! the store is imported with [`CatDb::from_scenario`]. A policy naming no
//! current VM is kept with an unresolved id and never matches a lookup.
//!
//! The virtual CAT directive of a VM is written as `(VM, VCPU 0, Unified)`,
//! the same triple as the policy of its first vCPU, yet the two hold
//! different masks at different widths. Records therefore carry a `vcat`
//! flag. On import, a VM's `(VCPU 0, Unified)` policy is taken as its
//! virtual CAT directive when virtual CAT is active for the VM and either a
//! regular policy for vCPU 0 already came first in the same region, or
//! vCPU 0 does not run in that region at all.

use log::warn;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::bitmask::full_mask;
use crate::bitmask::normalize_to_contiguous;
use crate::CacheRegion;
use crate::PolicyType;
use crate::Scenario;
use crate::Vm;

#[derive(Debug, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PolicyKey {
    pub cache_id: String,
    pub cache_level: u32,
    pub vm_id: u32,
    pub vcpu: usize,
    pub policy_type: PolicyType,
    /// Virtual CAT directive rather than a per-vCPU policy.
    pub vcat: bool,
}

impl PolicyKey {
    pub fn new(
        cache_id: &str,
        cache_level: u32,
        vm_id: u32,
        vcpu: usize,
        policy_type: PolicyType,
    ) -> Self {
        Self {
            cache_id: cache_id.to_string(),
            cache_level,
            vm_id,
            vcpu,
            policy_type,
            vcat: false,
        }
    }

    /// Key of the virtual CAT directive of VM `vm_id`.
    pub fn vcat(cache_id: &str, cache_level: u32, vm_id: u32) -> Self {
        Self {
            vcat: true,
            ..Self::new(cache_id, cache_level, vm_id, 0, PolicyType::Unified)
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct PolicyRecord {
    pub cache_id: String,
    pub cache_level: u32,
    /// `None` when the VM name could not be resolved on import.
    pub vm_id: Option<u32>,
    pub vm_name: String,
    pub vcpu: usize,
    pub policy_type: PolicyType,
    pub vcat: bool,
    pub clos_mask: String,
}

impl PolicyRecord {
    fn matches(&self, key: &PolicyKey) -> bool {
        self.vm_id == Some(key.vm_id)
            && self.vcpu == key.vcpu
            && self.policy_type == key.policy_type
            && self.vcat == key.vcat
            && self.cache_level == key.cache_level
            && self.cache_id == key.cache_id
    }
}

#[derive(Debug, Clone, Default)]
pub struct CatDb {
    records: Vec<PolicyRecord>,
}

impl CatDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Import the persisted `CACHE_ALLOCATION` policies of `scenario`.
    ///
    /// Without the board's regions, a lone `(VCPU 0, Unified)` policy of a
    /// virtual CAT VM is taken as a per-vCPU policy. Use
    /// [`CatDb::from_scenario_with_regions`] when the regions are known.
    pub fn from_scenario(scenario: &Scenario) -> Self {
        Self::from_scenario_with_regions(scenario, &[])
    }

    /// Like [`CatDb::from_scenario`], using `regions` to tell virtual CAT
    /// directives from vCPU 0 policies.
    pub fn from_scenario_with_regions(scenario: &Scenario, regions: &[CacheRegion]) -> Self {
        let mut features = scenario.features().clone();
        let vcat_enabled = features.correct() && features.vcat_enabled;
        let mut catdb = Self::new();

        for allocation in scenario.cache_allocation() {
            let region = regions.iter().find(|region| {
                region.level == allocation.cache_level && region.id == allocation.cache_id
            });
            // VMs whose vCPU 0 policy was already seen in this allocation.
            let mut vcpu0_seen = BTreeSet::new();

            for policy in allocation.policy.iter() {
                let vm = match scenario.vm_by_name(&policy.vm) {
                    Some(vm) => vm,
                    None => {
                        warn!(
                            "Dropping policy of L{} {} for unknown VM {:?}",
                            allocation.cache_level, allocation.cache_id, policy.vm
                        );
                        catdb.records.push(PolicyRecord {
                            cache_id: allocation.cache_id.clone(),
                            cache_level: allocation.cache_level,
                            vm_id: None,
                            vm_name: policy.vm.clone(),
                            vcpu: policy.vcpu,
                            policy_type: policy.policy_type,
                            vcat: false,
                            clos_mask: policy.clos_mask.clone(),
                        });
                        continue;
                    }
                };

                let mut key = PolicyKey::new(
                    &allocation.cache_id,
                    allocation.cache_level,
                    vm.id,
                    policy.vcpu,
                    policy.policy_type,
                );
                if policy.vcpu == 0 && policy.policy_type == PolicyType::Unified {
                    key.vcat = vcat_enabled
                        && vm.virtual_cat_support
                        && (vcpu0_seen.contains(&vm.id) || !vcpu0_in(vm, region));
                    if !key.vcat {
                        vcpu0_seen.insert(vm.id);
                    }
                }
                catdb.upsert(&key, &policy.vm, &policy.clos_mask);
            }
        }

        catdb
    }

    pub fn lookup(&self, key: &PolicyKey) -> Option<&PolicyRecord> {
        self.records.iter().find(|record| record.matches(key))
    }

    /// Update the record for `key` in place, or append a new one.
    pub fn upsert(&mut self, key: &PolicyKey, vm_name: &str, clos_mask: &str) {
        match self.records.iter_mut().find(|record| record.matches(key)) {
            Some(record) => {
                record.vm_name = vm_name.to_string();
                record.clos_mask = clos_mask.to_string();
            }
            None => self.records.push(PolicyRecord {
                cache_id: key.cache_id.clone(),
                cache_level: key.cache_level,
                vm_id: Some(key.vm_id),
                vm_name: vm_name.to_string(),
                vcpu: key.vcpu,
                policy_type: key.policy_type,
                vcat: key.vcat,
                clos_mask: clos_mask.to_string(),
            }),
        }
    }

    /// The stored mask for `key` renormalized to `width`, without touching
    /// the store.
    pub fn try_get(&self, key: &PolicyKey, width: usize) -> Option<String> {
        self.lookup(key)
            .map(|record| normalized_mask(&record.clos_mask, width))
    }

    /// The stored mask for `key` renormalized to `width`. A missing record
    /// is created with every way enabled.
    ///
    /// The renormalized mask is not written back; only a missing record
    /// changes the store.
    pub fn get_or_insert_default(
        &mut self,
        key: &PolicyKey,
        vm_name: &str,
        width: usize,
    ) -> String {
        if let Some(mask) = self.try_get(key, width) {
            return mask;
        }

        let mask = full_mask(width);
        self.upsert(key, vm_name, &mask);
        mask
    }

    pub fn records(&self) -> &[PolicyRecord] {
        &self.records
    }

    /// Records whose VM could not be resolved on import.
    pub fn unresolved(&self) -> impl Iterator<Item = &PolicyRecord> {
        self.records.iter().filter(|record| record.vm_id.is_none())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Whether vCPU 0 of `vm` runs in `region`. Unknown regions count as yes.
fn vcpu0_in(vm: &Vm, region: Option<&CacheRegion>) -> bool {
    match (region, vm.affinity().first()) {
        (Some(region), Some(pcpu)) => region.contains(pcpu.pcpu_id),
        (Some(_), None) => false,
        (None, _) => true,
    }
}

fn normalized_mask(clos_mask: &str, width: usize) -> String {
    match normalize_to_contiguous(clos_mask, width) {
        Ok(mask) => mask,
        Err(e) => {
            warn!("Ignoring stored CLOS mask: {e:#}");
            full_mask(width)
        }
    }
}
