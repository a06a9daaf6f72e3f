// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Cache allocation policy generation
//!
//! [`PolicyGenerator::generate`] turns a scenario and the board's cache
//! regions into the per-region policy lists shown to the user, pulling every
//! CLOS mask from (and defaulting it into) the [`CatDb`] it owns.
//!
//! The vCPUs sharing a region are split into three disjoint buckets:
//!
//! - RTCore: real-time vCPUs of RTVMs.
//! - Standard: every other vCPU with a declared affinity, followed by the
//!   service VM's vCPUs, one per CPU not claimed by a pre-launched VM.
//! - VCAT: one directive per VM exposing virtual CAT, sized to the VM's
//!   virtual CAT width instead of the region's. Only the region serving
//!   processor 0 carries these.
//!
//! Generation never fails. Boards without partitionable caches and VMs
//! lacking an affinity are reported through [`CatUiData::error_msg`].
//! Repeated runs against the same input produce the same output and add no
//! records after the first one.

use log::debug;
use log::warn;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::cpu_assign::vms_missing_affinity;
use crate::BoardInfo;
use crate::CacheAllocation;
use crate::CacheRegion;
use crate::CatDb;
use crate::ClosRange;
use crate::CpuAssignmentIndex;
use crate::LoadOrder;
use crate::Policy;
use crate::PolicyKey;
use crate::PolicyType;
use crate::Scenario;
use crate::Vm;

pub const NO_CAT_CAPABILITY_MSG: &str = concat!(
    "This board does not support Cache Allocation Technology (CAT), ",
    "or every cache region supporting it is used by a single processor."
);

/// The policies of one cache region, bucket by bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegionPolicies {
    #[serde(rename = "RTCore")]
    pub rt_core: Vec<Policy>,
    #[serde(rename = "Standard")]
    pub standard: Vec<Policy>,
    #[serde(rename = "VCAT")]
    pub vcat: Vec<Policy>,
}

impl RegionPolicies {
    pub fn is_empty(&self) -> bool {
        self.rt_core.is_empty() && self.standard.is_empty() && self.vcat.is_empty()
    }

    /// All policies, RTCore first, then Standard, then VCAT.
    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.rt_core
            .iter()
            .chain(self.standard.iter())
            .chain(self.vcat.iter())
    }

    fn sort(&mut self) {
        for bucket in [&mut self.rt_core, &mut self.standard, &mut self.vcat] {
            bucket.sort_by(|a, b| {
                (&a.vm, a.vcpu, a.policy_type).cmp(&(&b.vm, b.vcpu, b.policy_type))
            });
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionView {
    pub level: u32,
    pub id: String,
    pub capacity_mask_length: usize,
    pub cache_size: u64,
    pub processors: BTreeSet<usize>,
    pub data: RegionPolicies,
}

impl RegionView {
    fn new(region: &CacheRegion, data: RegionPolicies) -> Self {
        Self {
            level: region.level,
            id: region.id.clone(),
            capacity_mask_length: region.capacity_mask_length,
            cache_size: region.cache_size,
            processors: region.processors.clone(),
            data,
        }
    }
}

/// Region count of one cache level and the position of each region id
/// within the level, for labeling.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LevelSummary {
    pub count: usize,
    #[serde(flatten)]
    pub index: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CatUiData {
    /// Advisory text. Regions may be populated even when it is not empty.
    #[serde(rename = "errorMsg")]
    pub error_msg: String,
    pub regions: Vec<RegionView>,
    pub summary: BTreeMap<u32, LevelSummary>,
}

#[derive(Debug, Default)]
pub struct PolicyGenerator {
    catdb: CatDb,
}

impl PolicyGenerator {
    pub fn new(catdb: CatDb) -> Self {
        Self { catdb }
    }

    /// A generator whose store starts from the policies persisted in
    /// `scenario`.
    pub fn from_scenario(scenario: &Scenario) -> Self {
        Self::new(CatDb::from_scenario(scenario))
    }

    /// Like [`Self::from_scenario`], resolving virtual CAT directives
    /// against the partitionable regions of `board`.
    pub fn from_scenario_on_board(scenario: &Scenario, board: &BoardInfo) -> Self {
        Self::new(CatDb::from_scenario_with_regions(
            scenario,
            &board.cat_regions(),
        ))
    }

    pub fn catdb(&self) -> &CatDb {
        &self.catdb
    }

    pub fn catdb_mut(&mut self) -> &mut CatDb {
        &mut self.catdb
    }

    /// [`Self::generate`] over the partitionable regions and CPUs of `board`.
    pub fn generate_for_board(
        &mut self,
        scenario: &mut Scenario,
        board: &BoardInfo,
    ) -> CatUiData {
        self.generate(scenario, &board.cat_regions(), &board.cpu_ids())
    }

    /// Compute the policies of every region in `regions`.
    ///
    /// The RDT switches of `scenario` are corrected in place first; nothing
    /// else in the scenario is modified. `board_cpus` lists every physical
    /// CPU of the board in enumeration order.
    pub fn generate(
        &mut self,
        scenario: &mut Scenario,
        regions: &[CacheRegion],
        board_cpus: &[usize],
    ) -> CatUiData {
        let mut ui = CatUiData::default();

        if regions.is_empty() {
            ui.error_msg = NO_CAT_CAPABILITY_MSG.to_string();
            return ui;
        }

        if !scenario.features_mut().correct() {
            debug!("RDT disabled, no cache allocation policies");
            return ui;
        }

        ui.error_msg = vms_missing_affinity(&scenario.vm)
            .iter()
            .map(|vm| {
                format!(
                    "VM {}: cpu_affinity is required to configure cache allocation.",
                    vm.name
                )
            })
            .collect::<Vec<String>>()
            .join("\n");

        let scenario: &Scenario = scenario;
        let assignment = CpuAssignmentIndex::new(&scenario.vm);
        let service_cpus = assignment.service_vm_cpus(board_cpus);

        for region in regions {
            let mut data = RegionPolicies::default();
            self.fill_rt_core(scenario, region, &mut data.rt_core);
            self.fill_standard(scenario, region, &service_cpus, &mut data.standard);
            self.fill_vcat(scenario, region, &mut data.vcat);
            data.sort();

            let level = ui.summary.entry(region.level).or_default();
            level.index.insert(region.id.clone(), level.count);
            level.count += 1;

            ui.regions.push(RegionView::new(region, data));
        }

        ui
    }

    /// Store a user edited way range for one vCPU of `vm`.
    pub fn set_policy_range(
        &mut self,
        region: &CacheRegion,
        vm: &Vm,
        vcpu: usize,
        policy_type: PolicyType,
        range: ClosRange,
        width: usize,
    ) {
        let key = PolicyKey::new(&region.id, region.level, vm.id, vcpu, policy_type);
        self.catdb.upsert(&key, &vm.name, &range.encode(width));
    }

    /// Store a user edited way range for the virtual CAT directive of `vm`.
    /// `width` is the VM's `virtual_cat_number`.
    pub fn set_vcat_range(
        &mut self,
        region: &CacheRegion,
        vm: &Vm,
        range: ClosRange,
        width: usize,
    ) {
        let key = PolicyKey::vcat(&region.id, region.level, vm.id);
        self.catdb.upsert(&key, &vm.name, &range.encode(width));
    }

    fn fill_rt_core(
        &mut self,
        scenario: &Scenario,
        region: &CacheRegion,
        bucket: &mut Vec<Policy>,
    ) {
        let cdp = scenario.features().cdp_enabled;

        for vm in scenario.vm.iter().filter(|vm| vm.is_rtvm()) {
            for (vcpu, pcpu) in vm.affinity().iter().enumerate() {
                if region.contains(pcpu.pcpu_id) && pcpu.real_time_vcpu {
                    self.push_policies(region, vm, vcpu, cdp, bucket);
                }
            }
        }
    }

    fn fill_standard(
        &mut self,
        scenario: &Scenario,
        region: &CacheRegion,
        service_cpus: &[usize],
        bucket: &mut Vec<Policy>,
    ) {
        let cdp = scenario.features().cdp_enabled;

        // Service VM vCPUs come from the CPU assignment, not its affinity.
        for vm in scenario
            .vm
            .iter()
            .filter(|vm| vm.load_order != LoadOrder::Service)
        {
            for (vcpu, pcpu) in vm.affinity().iter().enumerate() {
                if region.contains(pcpu.pcpu_id) && !(pcpu.real_time_vcpu && vm.is_rtvm()) {
                    self.push_policies(region, vm, vcpu, cdp, bucket);
                }
            }
        }

        if let Some(service_vm) = scenario.service_vm() {
            for (vcpu, cpu) in service_cpus.iter().enumerate() {
                if region.contains(*cpu) {
                    self.push_policies(region, service_vm, vcpu, cdp, bucket);
                }
            }
        }
    }

    fn fill_vcat(&mut self, scenario: &Scenario, region: &CacheRegion, bucket: &mut Vec<Policy>) {
        if !scenario.features().vcat_enabled || !region.contains(0) {
            return;
        }

        for vm in scenario
            .vm
            .iter()
            .filter(|vm| vm.virtual_cat_support && vm.has_affinity())
        {
            let width = match vm.virtual_cat_number {
                Some(width) => width,
                None => {
                    warn!("VM {} supports virtual CAT without virtual_cat_number", vm.name);
                    continue;
                }
            };
            let key = PolicyKey::vcat(&region.id, region.level, vm.id);
            bucket.push(self.policy(key, vm, width));
        }
    }

    fn push_policies(
        &mut self,
        region: &CacheRegion,
        vm: &Vm,
        vcpu: usize,
        cdp: bool,
        bucket: &mut Vec<Policy>,
    ) {
        let types: &[PolicyType] = if cdp {
            &[PolicyType::Code, PolicyType::Data]
        } else {
            &[PolicyType::Unified]
        };
        for policy_type in types {
            let key = PolicyKey::new(&region.id, region.level, vm.id, vcpu, *policy_type);
            bucket.push(self.policy(key, vm, region.capacity_mask_length));
        }
    }

    fn policy(&mut self, key: PolicyKey, vm: &Vm, width: usize) -> Policy {
        Policy {
            vm: vm.name.clone(),
            vcpu: key.vcpu,
            policy_type: key.policy_type,
            clos_mask: self.catdb.get_or_insert_default(&key, &vm.name, width),
        }
    }
}

/// The `CACHE_ALLOCATION` list for the generated regions, or `None` when no
/// region has a policy.
pub fn to_scenario_cache_allocation(regions: &[RegionView]) -> Option<Vec<CacheAllocation>> {
    let allocation: Vec<CacheAllocation> = regions
        .iter()
        .filter(|region| !region.data.is_empty())
        .map(|region| CacheAllocation {
            cache_id: region.id.clone(),
            cache_level: region.level,
            policy: region.data.iter().cloned().collect(),
        })
        .collect();

    if allocation.is_empty() {
        None
    } else {
        Some(allocation)
    }
}
