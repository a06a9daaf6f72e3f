// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Sanity checks of a persisted cache allocation against the board.
//!
//! Every issue is reported as a human readable line; an empty list means the
//! allocation can be programmed as is.

use log::debug;

use crate::bitmask::is_contiguous;
use crate::bitmask::mask_bit_length;
use crate::bitmask::union_weight;
use crate::BoardInfo;
use crate::ClosTable;
use crate::Scenario;

pub fn check_cache_allocation(scenario: &Scenario, board: &BoardInfo) -> Vec<String> {
    let mut issues = Vec::new();

    for allocation in scenario.cache_allocation() {
        let region = match board.region(allocation.cache_level, &allocation.cache_id) {
            Some(region) => region,
            None => {
                issues.push(format!(
                    "L{} cache {} is not described by the board",
                    allocation.cache_level, allocation.cache_id
                ));
                continue;
            }
        };

        for policy in allocation.policy.iter() {
            let owner = format!(
                "{} vCPU {} {} policy of L{} cache {}",
                policy.vm, policy.vcpu, policy.policy_type, region.level, region.id
            );

            let bit_length = match mask_bit_length(&policy.clos_mask) {
                Ok(bit_length) => bit_length,
                Err(_) => {
                    issues.push(format!(
                        "{}: CLOS mask {:?} is not a hexadecimal number",
                        owner, policy.clos_mask
                    ));
                    continue;
                }
            };

            if bit_length > region.capacity_mask_length {
                issues.push(format!(
                    "{}: CLOS mask {} exceeds the {} ways of the cache",
                    owner, policy.clos_mask, region.capacity_mask_length
                ));
            }
            if let Ok(false) = is_contiguous(&policy.clos_mask) {
                issues.push(format!(
                    "{}: CLOS mask {} is not contiguous",
                    owner, policy.clos_mask
                ));
            }
            if let Ok(0) = union_weight([policy.clos_mask.as_str()]) {
                issues.push(format!("{}: CLOS mask enables no cache way", owner));
            }
        }
    }

    let clos_limit = board
        .cat_info
        .iter()
        .filter_map(|region| region.clos_number)
        .min();
    if let Some(limit) = clos_limit {
        let table = ClosTable::from_scenario(scenario);
        debug!("{} CLOS entries used, {} available", table.len(), limit);
        if table.len() > limit {
            issues.push(format!(
                "{} CLOS entries are needed but the board only provides {}",
                table.len(),
                limit
            ));
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOARD: &str = r#"{"CAT_INFO": [
        {"level": 2, "id": "0x0", "capacity_mask_length": 4, "cache_size": 1048576,
         "processors": [0, 1], "clos_number": 8},
        {"level": 3, "id": "0x0", "capacity_mask_length": 8, "cache_size": 8388608,
         "processors": [0, 1, 2, 3], "clos_number": 3}
    ]}"#;

    fn scenario(policies: &str) -> Scenario {
        Scenario::parse(&format!(
            r#"{{"hv": {{"CACHE_REGION": {{"CACHE_ALLOCATION": [
                {{"CACHE_ID": "0x0", "CACHE_LEVEL": 3, "POLICY": [{policies}]}}
            ]}}}}}}"#
        ))
        .unwrap()
    }

    fn policy(vm: &str, mask: &str) -> String {
        format!(r#"{{"VM": "{vm}", "VCPU": 0, "TYPE": "Unified", "CLOS_MASK": "{mask}"}}"#)
    }

    #[test]
    fn test_clean_allocation() {
        let board = BoardInfo::parse(BOARD).unwrap();
        let s = scenario(&[policy("VM0", "0xf0"), policy("VM1", "0x0f")].join(","));
        assert!(check_cache_allocation(&s, &board).is_empty());
    }

    #[test]
    fn test_mask_issues() {
        let board = BoardInfo::parse(BOARD).unwrap();
        let policies = [policy("VM0", "0x1ff"), policy("VM1", "0xa5"), policy("VM2", "xyz")];
        let s = scenario(&policies.join(","));

        let issues = check_cache_allocation(&s, &board);
        assert_eq!(issues.len(), 3, "{issues:?}");
        assert!(issues[0].contains("exceeds the 8 ways"));
        assert!(issues[1].contains("not contiguous"));
        assert!(issues[2].contains("not a hexadecimal number"));
    }

    #[test]
    fn test_empty_mask() {
        let board = BoardInfo::parse(BOARD).unwrap();
        let s = scenario(&policy("VM0", "0x0"));
        let issues = check_cache_allocation(&s, &board);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("no cache way"));
    }

    #[test]
    fn test_unknown_region() {
        let board = BoardInfo::parse(r#"{"CAT_INFO": []}"#).unwrap();
        let s = scenario(&policy("VM0", "0xff"));
        let issues = check_cache_allocation(&s, &board);
        assert_eq!(issues, vec!["L3 cache 0x0 is not described by the board".to_string()]);
    }

    #[test]
    fn test_too_many_clos() {
        let board = BoardInfo::parse(BOARD).unwrap();
        let s = scenario(
            &[
                policy("VM0", "0xc0"),
                policy("VM1", "0x30"),
                policy("VM2", "0x0c"),
                policy("VM3", "0x03"),
                policy("VM4", "0x30"),
            ]
            .join(","),
        );
        let issues = check_cache_allocation(&s, &board);
        assert_eq!(
            issues,
            vec!["4 CLOS entries are needed but the board only provides 3".to_string()]
        );
    }
}
