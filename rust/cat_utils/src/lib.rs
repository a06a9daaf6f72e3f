// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Cache allocation policy engine
//!
//! Intel Cache Allocation Technology (CAT) lets a hypervisor partition a
//! shared cache into ways and restrict each vCPU to a contiguous range of
//! them through a Class-of-Service (CLOS) mask. Code and Data
//! Prioritization (CDP) splits every mask into a code and a data half, and
//! virtual CAT (vCAT) hands a range of ways to a guest to partition itself.
//!
//! This crate computes, stores and validates those masks for a hypervisor
//! scenario. The pieces build on each other:
//!
//! ## Documents
//!
//! [`Scenario`] and [`BoardInfo`] are the JSON documents the engine reads.
//! The scenario carries the RDT switches ([`RdtFeatures`]), the VMs and
//! their CPU affinities, and the persisted `CACHE_ALLOCATION`. The board
//! describes the caches supporting allocation.
//!
//! ## Allocation
//!
//! [`ClosRange`] converts between hexadecimal masks and way ranges.
//! [`CatDb`] remembers every mask that was set or defaulted.
//! [`PolicyGenerator`] derives the per-region policy lists from the
//! scenario, and [`to_scenario_cache_allocation`] turns them back into the
//! persisted form.
//!
//! ## Reporting
//!
//! [`ClosTable`] folds the persisted policies into hardware CLOS entries,
//! [`vm_cache_usage`] sums up what each VM gets, and
//! [`check_cache_allocation`] lists what the hardware would reject.

mod fields;

mod bitmask;
pub use bitmask::full_mask;
pub use bitmask::is_contiguous;
pub use bitmask::mask_bit_length;
pub use bitmask::normalize_to_contiguous;
pub use bitmask::union_weight;
pub use bitmask::ClosRange;

mod switches;
pub use switches::parse_yes_no;
pub use switches::yes_no_token;
pub use switches::RdtFeatures;
pub use switches::Switch;

mod scenario;
pub use scenario::CacheAllocation;
pub use scenario::CacheRegionConfig;
pub use scenario::CpuAffinity;
pub use scenario::Features;
pub use scenario::Hypervisor;
pub use scenario::LoadOrder;
pub use scenario::Pcpu;
pub use scenario::Policy;
pub use scenario::PolicyType;
pub use scenario::Scenario;
pub use scenario::Vm;
pub use scenario::VmType;

mod board;
pub use board::BoardInfo;
pub use board::CacheRegion;

mod cpu_assign;
pub use cpu_assign::vms_missing_affinity;
pub use cpu_assign::CpuAssignmentIndex;

mod catdb;
pub use catdb::CatDb;
pub use catdb::PolicyKey;
pub use catdb::PolicyRecord;

mod policy;
pub use policy::to_scenario_cache_allocation;
pub use policy::CatUiData;
pub use policy::LevelSummary;
pub use policy::PolicyGenerator;
pub use policy::RegionPolicies;
pub use policy::RegionView;
pub use policy::NO_CAT_CAPABILITY_MSG;

mod clos;
pub use clos::ClosEntry;
pub use clos::ClosTable;
pub use clos::MaskSlot;
pub use clos::PolicyOwner;

mod usage;
pub use usage::vm_cache_usage;
pub use usage::VmCacheUsage;

mod check;
pub use check::check_cache_allocation;
