// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Physical CPU ownership derived from a scenario.
//!
//! Pre-launched VMs claim the CPUs listed in their affinity exclusively. The
//! service VM does not list its CPUs; it implicitly owns every board CPU no
//! pre-launched VM has claimed.

use std::collections::BTreeSet;

use crate::LoadOrder;
use crate::Vm;

#[derive(Debug, Clone, Default)]
pub struct CpuAssignmentIndex {
    pre_launched: BTreeSet<usize>,
}

impl CpuAssignmentIndex {
    pub fn new(vms: &[Vm]) -> Self {
        let pre_launched = vms
            .iter()
            .filter(|vm| vm.load_order == LoadOrder::PreLaunched)
            .flat_map(|vm| vm.affinity().iter().map(|pcpu| pcpu.pcpu_id))
            .collect();

        Self { pre_launched }
    }

    /// CPUs claimed by pre-launched VMs.
    pub fn pre_launched_cpus(&self) -> &BTreeSet<usize> {
        &self.pre_launched
    }

    /// CPUs owned by the service VM, in board enumeration order.
    pub fn service_vm_cpus(&self, board_cpus: &[usize]) -> Vec<usize> {
        board_cpus
            .iter()
            .copied()
            .filter(|cpu| !self.pre_launched.contains(cpu))
            .collect()
    }
}

/// Non-service VMs without a CPU affinity, in scenario order.
pub fn vms_missing_affinity(vms: &[Vm]) -> Vec<&Vm> {
    vms.iter()
        .filter(|vm| vm.load_order != LoadOrder::Service && !vm.has_affinity())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CpuAffinity;
    use crate::Pcpu;
    use crate::VmType;

    fn vm(id: u32, load_order: LoadOrder, cpus: &[usize]) -> Vm {
        let mut vm = Vm::new(id, &format!("VM{id}"), load_order, VmType::Standard);
        if !cpus.is_empty() {
            vm.cpu_affinity = Some(CpuAffinity {
                pcpu: cpus.iter().map(|cpu| Pcpu::new(*cpu, false)).collect(),
                ..Default::default()
            });
        }
        vm
    }

    #[test]
    fn test_service_vm_gets_unclaimed_cpus() {
        let vms = vec![
            vm(0, LoadOrder::PreLaunched, &[5, 1]),
            vm(1, LoadOrder::Service, &[]),
            vm(2, LoadOrder::PostLaunched, &[2, 3]),
        ];
        let index = CpuAssignmentIndex::new(&vms);

        assert_eq!(
            index.pre_launched_cpus().iter().copied().collect::<Vec<_>>(),
            vec![1, 5]
        );
        // Post-launched VMs share the service VM's CPUs.
        assert_eq!(
            index.service_vm_cpus(&[3, 2, 1, 0, 4, 5]),
            vec![3, 2, 0, 4]
        );
    }

    #[test]
    fn test_no_pre_launched_vms() {
        let vms = vec![vm(0, LoadOrder::Service, &[])];
        let index = CpuAssignmentIndex::new(&vms);
        assert!(index.pre_launched_cpus().is_empty());
        assert_eq!(index.service_vm_cpus(&[0, 1]), vec![0, 1]);
    }

    #[test]
    fn test_vms_missing_affinity() {
        let vms = vec![
            vm(0, LoadOrder::PreLaunched, &[]),
            vm(1, LoadOrder::Service, &[]),
            vm(2, LoadOrder::PostLaunched, &[2]),
            vm(3, LoadOrder::PostLaunched, &[]),
        ];
        let ids: Vec<u32> = vms_missing_affinity(&vms).iter().map(|vm| vm.id).collect();
        assert_eq!(ids, vec![0, 3]);
    }
}
