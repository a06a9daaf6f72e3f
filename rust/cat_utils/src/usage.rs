// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Per-VM cache usage of a persisted allocation, for summaries.

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use serde::Serialize;

use crate::bitmask::union_weight;
use crate::BoardInfo;
use crate::Scenario;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VmCacheUsage {
    pub cache_id: String,
    pub vm_name: String,
    /// Ways enabled by the union of the VM's masks in this region.
    pub ways: usize,
    pub bytes: u64,
}

/// Usage of every VM holding a policy in a level `level` region. Regions
/// come in allocation order and VMs in order of their first policy.
pub fn vm_cache_usage(
    scenario: &Scenario,
    board: &BoardInfo,
    level: u32,
) -> Result<Vec<VmCacheUsage>> {
    let mut usage = Vec::new();

    for allocation in scenario
        .cache_allocation()
        .iter()
        .filter(|allocation| allocation.cache_level == level)
    {
        let region = match board.region(level, &allocation.cache_id) {
            Some(region) => region,
            None => bail!("L{} cache {} is not on the board", level, allocation.cache_id),
        };

        let mut vm_names: Vec<&str> = Vec::new();
        for policy in allocation.policy.iter() {
            if !vm_names.contains(&policy.vm.as_str()) {
                vm_names.push(&policy.vm);
            }
        }

        for vm_name in vm_names {
            let masks = allocation
                .policy
                .iter()
                .filter(|policy| policy.vm == vm_name)
                .map(|policy| policy.clos_mask.as_str());
            let ways = union_weight(masks).with_context(|| {
                format!("Invalid CLOS mask of VM {} in L{} cache {}", vm_name, level, region.id)
            })?;

            usage.push(VmCacheUsage {
                cache_id: region.id.clone(),
                vm_name: vm_name.to_string(),
                ways,
                bytes: ways as u64 * region.way_size(),
            });
        }
    }

    Ok(usage)
}
