// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # CLOS table
//!
//! The hardware provides a limited number of Class-of-Service entries, while
//! the persisted allocation lists one policy per vCPU. `ClosTable` folds the
//! persisted policies into the minimal list of distinct CLOS entries, each
//! shared by every owner whose masks agree with it.
//!
//! An entry has one L3 slot and one slot per L2 cache id named in the
//! allocation. Two entries are compatible when, slot by slot, the masks are
//! equal or at least one of them is empty. Merging fills the empty slots
//! and takes over the owners.
//!
//! With CDP on, the `Data` and `Code` policies of a vCPU form a pair which
//! only merges when both halves are compatible; the table keeps the halves
//! as two consecutive entries, `Data` first. Owners belonging to a VM using
//! virtual CAT keep their own entries.

use log::debug;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::CacheAllocation;
use crate::PolicyType;
use crate::Scenario;

#[derive(Debug, Clone, Eq, Hash, PartialEq, Serialize)]
pub struct PolicyOwner {
    pub vm_name: String,
    pub vcpu: usize,
    pub policy_type: PolicyType,
}

impl PolicyOwner {
    pub fn new(vm_name: &str, vcpu: usize, policy_type: PolicyType) -> Self {
        Self {
            vm_name: vm_name.to_string(),
            vcpu,
            policy_type,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaskSlot {
    pub cache_id: Option<String>,
    pub clos_mask: Option<String>,
}

impl MaskSlot {
    fn filled(cache_id: &str, clos_mask: &str) -> Self {
        Self {
            cache_id: Some(cache_id.to_string()),
            clos_mask: Some(clos_mask.to_string()),
        }
    }

    fn matches(&self, other: &MaskSlot) -> bool {
        match (&self.clos_mask, &other.clos_mask) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => true,
        }
    }

    fn fill_from(&mut self, other: &MaskSlot) {
        if self.clos_mask.is_none() && other.clos_mask.is_some() {
            *self = other.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosEntry {
    /// One slot per L2 cache id, in [`ClosTable::l2_ids`] order.
    pub l2: Vec<MaskSlot>,
    pub l3: MaskSlot,
    pub owners: Vec<PolicyOwner>,
    #[serde(skip)]
    mergeable: bool,
}

impl ClosEntry {
    fn new(
        l2_ids: &[String],
        allocation: &[CacheAllocation],
        owner: PolicyOwner,
        type_filter: Option<PolicyType>,
        mergeable: bool,
    ) -> Self {
        let mut l2 = vec![MaskSlot::default(); l2_ids.len()];
        let mut l3 = MaskSlot::default();

        for cache in allocation {
            let policies = cache.policy.iter().filter(|policy| {
                policy.vm == owner.vm_name
                    && policy.vcpu == owner.vcpu
                    && type_filter.map_or(true, |t| policy.policy_type == t)
            });
            for policy in policies {
                let slot = MaskSlot::filled(&cache.cache_id, &policy.clos_mask);
                if cache.cache_level == 2 {
                    if let Some(index) = l2_ids.iter().position(|id| *id == cache.cache_id) {
                        l2[index] = slot;
                    }
                } else {
                    l3 = slot;
                }
            }
        }

        Self {
            l2,
            l3,
            owners: vec![owner],
            mergeable,
        }
    }

    fn matches(&self, other: &ClosEntry) -> bool {
        self.l3.matches(&other.l3)
            && self
                .l2
                .iter()
                .zip(other.l2.iter())
                .all(|(a, b)| a.matches(b))
    }

    fn merge(&mut self, other: ClosEntry) {
        self.l3.fill_from(&other.l3);
        for (slot, src) in self.l2.iter_mut().zip(other.l2.iter()) {
            slot.fill_from(src);
        }
        self.owners.extend(other.owners);
    }
}

/// A CLOS candidate: a single entry, or a `Data`/`Code` pair with CDP.
#[derive(Debug)]
enum Candidate {
    Single(ClosEntry),
    Cdp { data: ClosEntry, code: ClosEntry },
}

impl Candidate {
    fn mergeable(&self) -> bool {
        match self {
            Candidate::Single(entry) => entry.mergeable,
            Candidate::Cdp { data, code } => data.mergeable && code.mergeable,
        }
    }

    /// Merge `src` into `self` if both sides allow it and all their slots
    /// agree. Gives `src` back otherwise.
    fn try_merge(&mut self, src: Candidate) -> Option<Candidate> {
        if !self.mergeable() || !src.mergeable() {
            return Some(src);
        }

        match (self, src) {
            (Candidate::Single(dst), Candidate::Single(src)) if dst.matches(&src) => {
                dst.merge(src);
                None
            }
            (
                Candidate::Cdp { data, code },
                Candidate::Cdp {
                    data: src_data,
                    code: src_code,
                },
            ) if data.matches(&src_data) && code.matches(&src_code) => {
                data.merge(src_data);
                code.merge(src_code);
                None
            }
            (_, src) => Some(src),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClosTable {
    l2_ids: Vec<String>,
    entries: Vec<ClosEntry>,
}

impl ClosTable {
    pub fn from_scenario(scenario: &Scenario) -> Self {
        let allocation = scenario.cache_allocation();
        let features = scenario.features();

        let l2_ids: Vec<String> = allocation
            .iter()
            .filter(|cache| cache.cache_level == 2)
            .map(|cache| cache.cache_id.clone())
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect();

        let mut seen = BTreeSet::new();
        let owners: Vec<PolicyOwner> = allocation
            .iter()
            .flat_map(|cache| cache.policy.iter())
            .map(|policy| PolicyOwner::new(&policy.vm, policy.vcpu, policy.policy_type))
            .filter(|owner| seen.insert((owner.vm_name.clone(), owner.vcpu, owner.policy_type)))
            .collect();

        let mut candidates = Vec::new();
        for owner in owners {
            if features.cdp_enabled {
                // A pair is built from its Data owner; Code owners ride along.
                if owner.policy_type != PolicyType::Data {
                    continue;
                }
                let code_owner = PolicyOwner::new(&owner.vm_name, owner.vcpu, PolicyType::Code);
                let code =
                    ClosEntry::new(&l2_ids, allocation, code_owner, Some(PolicyType::Code), true);
                let data = ClosEntry::new(&l2_ids, allocation, owner, Some(PolicyType::Data), true);
                candidates.push(Candidate::Cdp { data, code });
            } else {
                let vcat = features.vcat_enabled
                    && scenario
                        .vm_by_name(&owner.vm_name)
                        .map_or(false, |vm| vm.virtual_cat_support);
                candidates.push(Candidate::Single(ClosEntry::new(
                    &l2_ids, allocation, owner, None, !vcat,
                )));
            }
        }

        let mut merged: Vec<Candidate> = Vec::new();
        for candidate in candidates {
            let mut pending = Some(candidate);
            for dst in merged.iter_mut() {
                match pending.take() {
                    Some(src) => pending = dst.try_merge(src),
                    None => break,
                }
            }
            if let Some(src) = pending {
                merged.push(src);
            }
        }

        let mut entries = Vec::new();
        for candidate in merged {
            match candidate {
                Candidate::Single(entry) => entries.push(entry),
                Candidate::Cdp { data, code } => {
                    entries.push(data);
                    entries.push(code);
                }
            }
        }

        debug!("{} CLOS entries for {} L2 caches", entries.len(), l2_ids.len());
        Self { l2_ids, entries }
    }

    /// Sorted L2 cache ids, the order of every entry's L2 slots.
    pub fn l2_ids(&self) -> &[String] {
        &self.l2_ids
    }

    pub fn entries(&self) -> &[ClosEntry] {
        &self.entries
    }

    /// Index of the CLOS entry used by `owner`.
    pub fn clos_of(&self, owner: &PolicyOwner) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.owners.contains(owner))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
