// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # RDT feature switches
//!
//! The scenario enables cache allocation through three switches under
//! `hv.FEATURES.RDT`. Code and Data Prioritization and virtual CAT are
//! mutually exclusive, and either one requires RDT, so the only reachable
//! states of `(RDT, CDP, VCAT)` are:
//!
//! | RDT | CDP | VCAT |
//! |-----|-----|------|
//! | n   | n   | n    |
//! | y   | n   | n    |
//! | y   | y   | n    |
//! | y   | n   | y    |
//!
//! [`RdtFeatures::set`] with propagation keeps the triple inside this set;
//! [`RdtFeatures::correct`] pulls an arbitrary triple (e.g. one loaded from
//! a hand edited file) back into it.

use anyhow::bail;
use anyhow::Result;
use log::debug;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::fields::yes_no;

#[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
pub enum Switch {
    Rdt,
    Cdp,
    Vcat,
}

impl Switch {
    pub const ALL: [Switch; 3] = [Switch::Rdt, Switch::Cdp, Switch::Vcat];

    /// Key of the switch in the scenario document.
    pub fn key(&self) -> &'static str {
        match self {
            Switch::Rdt => "RDT_ENABLED",
            Switch::Cdp => "CDP_ENABLED",
            Switch::Vcat => "VCAT_ENABLED",
        }
    }
}

impl fmt::Display for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Switch {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_uppercase();
        match name.strip_suffix("_ENABLED").unwrap_or(&name) {
            "RDT" => Ok(Switch::Rdt),
            "CDP" => Ok(Switch::Cdp),
            "VCAT" => Ok(Switch::Vcat),
            _ => bail!("Unknown RDT switch {:?}", s),
        }
    }
}

/// The `'y'` / `'n'` token for a switch value.
pub fn yes_no_token(value: bool) -> &'static str {
    if value {
        "y"
    } else {
        "n"
    }
}

pub fn parse_yes_no(token: &str) -> Result<bool> {
    match token.trim() {
        "y" | "Y" | "yes" | "true" => Ok(true),
        "n" | "N" | "no" | "false" | "" => Ok(false),
        other => bail!("Expected 'y' or 'n', found {:?}", other),
    }
}

/// `hv.FEATURES.RDT` of a scenario. Keys other than the three switches
/// (e.g. legacy `CLOS_MASK` lists) are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RdtFeatures {
    #[serde(rename = "RDT_ENABLED", default, with = "yes_no")]
    pub rdt_enabled: bool,
    #[serde(rename = "CDP_ENABLED", default, with = "yes_no")]
    pub cdp_enabled: bool,
    #[serde(rename = "VCAT_ENABLED", default, with = "yes_no")]
    pub vcat_enabled: bool,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl RdtFeatures {
    pub fn new(rdt_enabled: bool, cdp_enabled: bool, vcat_enabled: bool) -> Self {
        Self {
            rdt_enabled,
            cdp_enabled,
            vcat_enabled,
            other: Map::new(),
        }
    }

    pub fn get(&self, switch: Switch) -> bool {
        match switch {
            Switch::Rdt => self.rdt_enabled,
            Switch::Cdp => self.cdp_enabled,
            Switch::Vcat => self.vcat_enabled,
        }
    }

    /// Set one switch. With `propagate`, the other two are adjusted so the
    /// triple stays reachable: turning RDT off turns CDP and VCAT off,
    /// turning CDP or VCAT on turns RDT on and the other one off.
    pub fn set(&mut self, switch: Switch, value: bool, propagate: bool) {
        match switch {
            Switch::Rdt => self.rdt_enabled = value,
            Switch::Cdp => self.cdp_enabled = value,
            Switch::Vcat => self.vcat_enabled = value,
        }
        if !propagate {
            return;
        }

        match (switch, value) {
            (Switch::Rdt, false) => {
                self.cdp_enabled = false;
                self.vcat_enabled = false;
            }
            (Switch::Cdp, true) => {
                self.rdt_enabled = true;
                self.vcat_enabled = false;
            }
            (Switch::Vcat, true) => {
                self.rdt_enabled = true;
                self.cdp_enabled = false;
            }
            _ => {}
        }
    }

    /// Whether the triple is one of the four reachable states.
    pub fn is_consistent(&self) -> bool {
        !(self.cdp_enabled && self.vcat_enabled)
            && (self.rdt_enabled || !(self.cdp_enabled || self.vcat_enabled))
    }

    /// Pull the triple back into a reachable state and return whether RDT
    /// ends up enabled. CDP wins over VCAT when both are set, and either
    /// one forces RDT on.
    pub fn correct(&mut self) -> bool {
        if !self.is_consistent() {
            debug!(
                "Correcting RDT switches RDT={} CDP={} VCAT={}",
                yes_no_token(self.rdt_enabled),
                yes_no_token(self.cdp_enabled),
                yes_no_token(self.vcat_enabled)
            );
        }

        if self.cdp_enabled {
            self.set(Switch::Cdp, true, true);
        } else if self.vcat_enabled {
            self.set(Switch::Vcat, true, true);
        }

        self.rdt_enabled
    }
}
