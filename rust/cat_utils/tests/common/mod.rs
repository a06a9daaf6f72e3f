use cat_utils::BoardInfo;
use cat_utils::Scenario;

pub const BOARD: &str = r#"
{
    "CAT_INFO": [
        {"level": 2, "id": "0x0", "capacity_mask_length": 4, "cache_size": 1048576,
         "processors": [0, 1]},
        {"level": 2, "id": "0x2", "capacity_mask_length": 4, "cache_size": 1048576,
         "processors": [2, 3]},
        {"level": 3, "id": "0x0", "capacity_mask_length": 8, "cache_size": 8388608,
         "processors": [0, 1, 2, 3], "clos_number": 8}
    ],
    "processors": [0, 1, 2, 3]
}"#;

/// An RTVM pinned to CPUs 2 (real-time) and 3, the service VM, and a
/// post-launched VM sharing CPU 1 with it.
pub fn scenario(rdt: &str, cdp: &str, vcat: &str) -> Scenario {
    Scenario::parse(&format!(
        r#"{{
            "hv": {{"FEATURES": {{"RDT": {{
                "RDT_ENABLED": "{rdt}", "CDP_ENABLED": "{cdp}", "VCAT_ENABLED": "{vcat}"
            }}}}}},
            "vm": [
                {{
                    "@id": "0",
                    "name": "RTVM0",
                    "load_order": "PRE_LAUNCHED_VM",
                    "vm_type": "RTVM",
                    "cpu_affinity": {{"pcpu": [
                        {{"pcpu_id": "2", "real_time_vcpu": "y"}},
                        {{"pcpu_id": "3", "real_time_vcpu": "n"}}
                    ]}},
                    "virtual_cat_support": "y",
                    "virtual_cat_number": "2"
                }},
                {{"@id": "1", "name": "Service", "load_order": "SERVICE_VM"}},
                {{
                    "@id": "2",
                    "name": "Post",
                    "load_order": "POST_LAUNCHED_VM",
                    "cpu_affinity": {{"pcpu": {{"pcpu_id": "1"}}}}
                }}
            ]
        }}"#
    ))
    .unwrap()
}

pub fn board() -> BoardInfo {
    BoardInfo::parse(BOARD).unwrap()
}
