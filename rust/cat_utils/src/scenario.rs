// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Scenario document
//!
//! The subset of a scenario the cache allocation engine reads and writes:
//! the RDT switches, the persisted `hv.CACHE_REGION.CACHE_ALLOCATION` list
//! and the VM list. Every other key of the document is kept in the `other`
//! maps so that a loaded scenario is written back without losing data.
//!
//! Documents are the JSON form of the scenario XML. Leaves may be text
//! (`"3"`) or numbers (`3`), and single element lists may be unwrapped;
//! both shapes are accepted.

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::fields;
use crate::fields::yes_no;
use crate::RdtFeatures;

#[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
#[derive(Serialize, Deserialize)]
pub enum LoadOrder {
    #[serde(rename = "PRE_LAUNCHED_VM")]
    PreLaunched,
    #[serde(rename = "SERVICE_VM")]
    Service,
    #[serde(rename = "POST_LAUNCHED_VM")]
    PostLaunched,
}

#[derive(Debug, Clone, Copy, Default, Eq, Hash, PartialEq)]
#[derive(Serialize, Deserialize)]
pub enum VmType {
    #[default]
    #[serde(rename = "STANDARD_VM")]
    Standard,
    #[serde(rename = "RTVM")]
    Rtvm,
    #[serde(rename = "TEE_VM")]
    Tee,
    #[serde(rename = "REE_VM")]
    Ree,
}

/// Kind of cache an allocation directive applies to. Without CDP every
/// directive is `Unified`; with CDP each vCPU gets a `Code` and a `Data`
/// directive.
///
/// The variant order is the textual order, which is what policy lists are
/// sorted by.
#[derive(Debug, Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Serialize, Deserialize)]
pub enum PolicyType {
    Code,
    Data,
    Unified,
}

impl PolicyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyType::Code => "Code",
            PolicyType::Data => "Data",
            PolicyType::Unified => "Unified",
        }
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `cpu_affinity.pcpu` entry of a VM. Its position in the affinity
/// list is the vCPU index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pcpu {
    #[serde(deserialize_with = "fields::number")]
    pub pcpu_id: usize,
    #[serde(default, with = "yes_no")]
    pub real_time_vcpu: bool,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Pcpu {
    pub fn new(pcpu_id: usize, real_time_vcpu: bool) -> Self {
        Self {
            pcpu_id,
            real_time_vcpu,
            other: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuAffinity {
    #[serde(default, deserialize_with = "fields::one_or_many")]
    pub pcpu: Vec<Pcpu>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vm {
    #[serde(rename = "@id", deserialize_with = "fields::number")]
    pub id: u32,
    pub name: String,
    pub load_order: LoadOrder,
    #[serde(default)]
    pub vm_type: VmType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_affinity: Option<CpuAffinity>,
    #[serde(default, with = "yes_no")]
    pub virtual_cat_support: bool,
    #[serde(
        default,
        deserialize_with = "fields::opt_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub virtual_cat_number: Option<usize>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Vm {
    pub fn new(id: u32, name: &str, load_order: LoadOrder, vm_type: VmType) -> Self {
        Self {
            id,
            name: name.to_string(),
            load_order,
            vm_type,
            cpu_affinity: None,
            virtual_cat_support: false,
            virtual_cat_number: None,
            other: Map::new(),
        }
    }

    /// The declared affinity, empty when none is declared.
    pub fn affinity(&self) -> &[Pcpu] {
        match &self.cpu_affinity {
            Some(affinity) => &affinity.pcpu,
            None => &[],
        }
    }

    pub fn has_affinity(&self) -> bool {
        !self.affinity().is_empty()
    }

    pub fn is_rtvm(&self) -> bool {
        self.vm_type == VmType::Rtvm
    }
}

/// A persisted allocation directive, also the element type of the policy
/// lists shown per cache region.
#[derive(Debug, Clone, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(rename = "VM")]
    pub vm: String,
    #[serde(rename = "VCPU", deserialize_with = "fields::number")]
    pub vcpu: usize,
    #[serde(rename = "TYPE")]
    pub policy_type: PolicyType,
    #[serde(rename = "CLOS_MASK")]
    pub clos_mask: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheAllocation {
    #[serde(rename = "CACHE_ID")]
    pub cache_id: String,
    #[serde(rename = "CACHE_LEVEL", deserialize_with = "fields::number")]
    pub cache_level: u32,
    #[serde(
        rename = "POLICY",
        default,
        deserialize_with = "fields::one_or_many"
    )]
    pub policy: Vec<Policy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheRegionConfig {
    #[serde(
        rename = "CACHE_ALLOCATION",
        default,
        deserialize_with = "fields::opt_one_or_many",
        skip_serializing_if = "Option::is_none"
    )]
    pub cache_allocation: Option<Vec<CacheAllocation>>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Features {
    #[serde(rename = "RDT", default)]
    pub rdt: RdtFeatures,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hypervisor {
    #[serde(rename = "FEATURES", default)]
    pub features: Features,
    #[serde(
        rename = "CACHE_REGION",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub cache_region: Option<CacheRegionConfig>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub hv: Hypervisor,
    #[serde(default, deserialize_with = "fields::one_or_many")]
    pub vm: Vec<Vm>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Scenario {
    pub fn parse(input: &str) -> Result<Scenario> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn load(path: &Path) -> Result<Scenario> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse scenario {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content + "\n")
            .with_context(|| format!("Failed to write scenario {}", path.display()))
    }

    pub fn features(&self) -> &RdtFeatures {
        &self.hv.features.rdt
    }

    pub fn features_mut(&mut self) -> &mut RdtFeatures {
        &mut self.hv.features.rdt
    }

    pub fn vm_by_id(&self, id: u32) -> Option<&Vm> {
        self.vm.iter().find(|vm| vm.id == id)
    }

    pub fn vm_by_name(&self, name: &str) -> Option<&Vm> {
        self.vm.iter().find(|vm| vm.name == name)
    }

    /// The first VM with a `SERVICE_VM` load order.
    pub fn service_vm(&self) -> Option<&Vm> {
        self.vm
            .iter()
            .find(|vm| vm.load_order == LoadOrder::Service)
    }

    /// Persisted allocations, empty when the key is absent.
    pub fn cache_allocation(&self) -> &[CacheAllocation] {
        self.hv
            .cache_region
            .as_ref()
            .and_then(|region| region.cache_allocation.as_deref())
            .unwrap_or(&[])
    }

    /// Replace the persisted allocations. `None` removes the
    /// `CACHE_ALLOCATION` key rather than storing an empty list.
    pub fn set_cache_allocation(&mut self, allocation: Option<Vec<CacheAllocation>>) {
        match allocation {
            Some(allocation) => {
                self.hv
                    .cache_region
                    .get_or_insert_with(CacheRegionConfig::default)
                    .cache_allocation = Some(allocation);
            }
            None => {
                if let Some(region) = self.hv.cache_region.as_mut() {
                    region.cache_allocation = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
    {
        "hv": {
            "FEATURES": {
                "RDT": {"RDT_ENABLED": "y", "CDP_ENABLED": "n", "VCAT_ENABLED": "n"},
                "IVSHMEM": {"IVSHMEM_ENABLED": "n"}
            },
            "CACHE_REGION": {
                "CACHE_ALLOCATION": {
                    "CACHE_ID": "0x0",
                    "CACHE_LEVEL": "3",
                    "POLICY": {"VM": "VM0", "VCPU": "0", "TYPE": "Unified", "CLOS_MASK": "0xff"}
                }
            },
            "DEBUG_OPTIONS": {"BUILD_TYPE": "debug"}
        },
        "vm": [
            {
                "@id": "0",
                "name": "VM0",
                "load_order": "PRE_LAUNCHED_VM",
                "vm_type": "RTVM",
                "cpu_affinity": {"pcpu": {"pcpu_id": "2", "real_time_vcpu": "y"}},
                "virtual_cat_support": "y",
                "virtual_cat_number": "4",
                "memory": {"size": "1024"}
            },
            {
                "@id": 1,
                "name": "ServiceVM",
                "load_order": "SERVICE_VM"
            }
        ],
        "@version": "3.0"
    }"#;

    #[test]
    fn test_parse_text_leaves_and_unwrapped_lists() {
        let scenario = Scenario::parse(SCENARIO).unwrap();
        assert!(scenario.features().rdt_enabled);
        assert_eq!(scenario.vm.len(), 2);

        let vm0 = scenario.vm_by_name("VM0").unwrap();
        assert_eq!(vm0.id, 0);
        assert!(vm0.is_rtvm());
        assert_eq!(vm0.affinity(), &[Pcpu::new(2, true)]);
        assert!(vm0.virtual_cat_support);
        assert_eq!(vm0.virtual_cat_number, Some(4));

        let service = scenario.service_vm().unwrap();
        assert_eq!(service.id, 1);
        assert!(!service.has_affinity());
        assert_eq!(service.vm_type, VmType::Standard);

        let allocation = scenario.cache_allocation();
        assert_eq!(allocation.len(), 1);
        assert_eq!(allocation[0].cache_level, 3);
        assert_eq!(allocation[0].policy[0].policy_type, PolicyType::Unified);
    }

    #[test]
    fn test_unknown_keys_survive_round_trip() {
        let scenario = Scenario::parse(SCENARIO).unwrap();
        let value = serde_json::to_value(&scenario).unwrap();

        assert_eq!(value["@version"], "3.0");
        assert_eq!(value["hv"]["DEBUG_OPTIONS"]["BUILD_TYPE"], "debug");
        assert_eq!(value["hv"]["FEATURES"]["IVSHMEM"]["IVSHMEM_ENABLED"], "n");
        assert_eq!(value["vm"][0]["memory"]["size"], "1024");
        assert_eq!(value["vm"][0]["virtual_cat_support"], "y");

        let reparsed: Scenario = serde_json::from_value(value).unwrap();
        assert_eq!(reparsed, scenario);
    }

    #[test]
    fn test_set_cache_allocation_none_drops_key() {
        let mut scenario = Scenario::parse(SCENARIO).unwrap();
        scenario.set_cache_allocation(None);
        assert!(scenario.cache_allocation().is_empty());

        let value = serde_json::to_value(&scenario).unwrap();
        assert!(value["hv"]["CACHE_REGION"]
            .as_object()
            .unwrap()
            .get("CACHE_ALLOCATION")
            .is_none());
    }

    #[test]
    fn test_set_cache_allocation_creates_region() {
        let mut scenario = Scenario::default();
        scenario.set_cache_allocation(Some(vec![CacheAllocation {
            cache_id: "0x1".to_string(),
            cache_level: 2,
            policy: vec![],
        }]));
        assert_eq!(scenario.cache_allocation()[0].cache_id, "0x1");
    }

    #[test]
    fn test_load_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.json");
        std::fs::write(&path, SCENARIO).unwrap();

        let mut scenario = Scenario::load(&path).unwrap();
        scenario.features_mut().rdt_enabled = false;
        scenario.save(&path).unwrap();

        let reloaded = Scenario::load(&path).unwrap();
        assert!(!reloaded.features().rdt_enabled);
        assert!(Scenario::load(&dir.path().join("missing.json")).is_err());
    }
}
