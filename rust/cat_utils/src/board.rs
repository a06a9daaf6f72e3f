// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Board cache topology
//!
//! The board descriptor lists every cache that supports allocation
//! (`CAT_INFO`) together with the processors sharing it, and enumerates all
//! physical CPUs of the board. A loaded board is read-only; if the board
//! changes, a new BoardInfo should be loaded.

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::fields;

/// One hardware cache partitioning domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRegion {
    #[serde(deserialize_with = "fields::number")]
    pub level: u32,
    pub id: String,
    #[serde(deserialize_with = "fields::number")]
    pub capacity_mask_length: usize,
    #[serde(deserialize_with = "fields::number")]
    pub cache_size: u64,
    pub processors: BTreeSet<usize>,
    /// Number of hardware Class-of-Service entries, when the board reports
    /// it.
    #[serde(
        default,
        deserialize_with = "fields::opt_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub clos_number: Option<usize>,
}

impl CacheRegion {
    pub fn new(
        level: u32,
        id: &str,
        capacity_mask_length: usize,
        cache_size: u64,
        processors: &[usize],
    ) -> Self {
        Self {
            level,
            id: id.to_string(),
            capacity_mask_length,
            cache_size,
            processors: processors.iter().copied().collect(),
            clos_number: None,
        }
    }

    pub fn contains(&self, cpu: usize) -> bool {
        self.processors.contains(&cpu)
    }

    /// Bytes of cache behind one bit of the capacity mask.
    pub fn way_size(&self) -> u64 {
        match self.capacity_mask_length {
            0 => 0,
            ways => self.cache_size / ways as u64,
        }
    }

    /// Whether the region can be partitioned at all: it has ways to hand out
    /// and more than one processor to hand them to.
    pub fn is_partitionable(&self) -> bool {
        self.capacity_mask_length > 0 && self.processors.len() > 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardInfo {
    #[serde(rename = "CAT_INFO", default)]
    pub cat_info: Vec<CacheRegion>,
    /// Physical CPU ids in board enumeration order.
    #[serde(default)]
    pub processors: Vec<usize>,
}

impl BoardInfo {
    pub fn parse(input: &str) -> Result<BoardInfo> {
        let board: BoardInfo = serde_json::from_str(input)?;

        let mut seen = BTreeSet::new();
        for region in board.cat_info.iter() {
            if !seen.insert((region.level, region.id.as_str())) {
                bail!("Duplicate cache region L{} {}", region.level, region.id);
            }
        }

        Ok(board)
    }

    pub fn load(path: &Path) -> Result<BoardInfo> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read board {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse board {}", path.display()))
    }

    /// Regions cache allocation policies are generated for, in board order.
    pub fn cat_regions(&self) -> Vec<CacheRegion> {
        self.cat_info
            .iter()
            .filter(|region| region.is_partitionable())
            .cloned()
            .collect()
    }

    pub fn region(&self, level: u32, id: &str) -> Option<&CacheRegion> {
        self.cat_info
            .iter()
            .find(|region| region.level == level && region.id == id)
    }

    /// All physical CPU ids. Boards without an explicit enumeration fall
    /// back to the processors of their cache regions, in ascending order.
    pub fn cpu_ids(&self) -> Vec<usize> {
        if !self.processors.is_empty() {
            return self.processors.clone();
        }

        self.cat_info
            .iter()
            .flat_map(|region| region.processors.iter().copied())
            .collect::<BTreeSet<usize>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOARD: &str = r#"
    {
        "CAT_INFO": [
            {"level": "2", "id": "0x8", "capacity_mask_length": "4", "cache_size": "1048576",
             "processors": [2, 3]},
            {"level": 2, "id": "0xc", "capacity_mask_length": 4, "cache_size": 1048576,
             "processors": [4]},
            {"level": 3, "id": "0x0", "capacity_mask_length": 12, "cache_size": 12582912,
             "processors": [0, 1, 2, 3, 4, 5], "clos_number": "8"}
        ],
        "processors": [0, 1, 2, 3, 4, 5]
    }"#;

    #[test]
    fn test_parse_board() {
        let board = BoardInfo::parse(BOARD).unwrap();
        assert_eq!(board.cat_info.len(), 3);
        assert_eq!(board.cpu_ids(), vec![0, 1, 2, 3, 4, 5]);

        let l3 = board.region(3, "0x0").unwrap();
        assert_eq!(l3.clos_number, Some(8));
        assert_eq!(l3.way_size(), 1048576);
        assert!(l3.contains(5));
        assert!(!l3.contains(6));
    }

    #[test]
    fn test_cat_regions_skip_single_processor_regions() {
        let board = BoardInfo::parse(BOARD).unwrap();
        let ids: Vec<String> = board.cat_regions().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["0x8", "0x0"]);
    }

    #[test]
    fn test_cpu_ids_fallback() {
        let board = BoardInfo {
            cat_info: vec![
                CacheRegion::new(2, "0x0", 4, 0, &[3, 1]),
                CacheRegion::new(2, "0x1", 4, 0, &[2, 0]),
            ],
            processors: vec![],
        };
        assert_eq!(board.cpu_ids(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_duplicate_region_rejected() {
        let input = r#"{"CAT_INFO": [
            {"level": 3, "id": "0x0", "capacity_mask_length": 8, "cache_size": 0,
             "processors": [0, 1]},
            {"level": 3, "id": "0x0", "capacity_mask_length": 8, "cache_size": 0,
             "processors": [0, 1]}
        ]}"#;
        assert!(BoardInfo::parse(input).is_err());
    }

    #[test]
    fn test_empty_board() {
        let board = BoardInfo::parse("{}").unwrap();
        assert!(board.cat_regions().is_empty());
        assert!(board.cpu_ids().is_empty());
    }
}
