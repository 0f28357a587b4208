//------------ Config --------------------------------------------------------

//! Configuration options for a RIB.
//!
//! Every field has a default, so a configuration can be created with
//! `Config::default()`, or read from JSON that only names the fields that
//! differ from the defaults.
//!
//! ```
//! use rotonda_pipeline::rib::config::Config;
//! use rotonda_pipeline::tables::TieBreaker;
//!
//! let config = Config::from_json(
//!     r#"{ "deletion_batch_size": 100, "admin_distances": { "babel": 125 } }"#,
//! ).unwrap();
//! assert_eq!(config.deletion_batch_size(), 100);
//! assert_eq!(config.admin_distance("babel"), 125);
//! assert_eq!(config.admin_distance("ospf"), 110);
//! assert_eq!(config.tie_breakers[0], TieBreaker::LocalPreference);
//! ```
use std::collections::BTreeMap;

use log::warn;
use serde_derive::{Deserialize, Serialize};

use crate::tables::TieBreaker;

/// The administrative distance of a protocol nobody configured one for.
/// Routes with this distance lose against routes of every known protocol.
pub const UNKNOWN_ADMIN_DISTANCE: u16 = 255;

/// The administrative distances of the well-known protocols.
pub const DEFAULT_ADMIN_DISTANCES: &[(&str, u16)] = &[
    ("connected", 0),
    ("static", 1),
    ("eigrp-summary", 5),
    ("ebgp", 20),
    ("eigrp-internal", 90),
    ("igrp", 100),
    ("ospf", 110),
    ("is-is", 115),
    ("rip", 120),
    ("eigrp-external", 170),
    ("ibgp", 200),
    ("fib2mrib", 254),
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The number of routes a background deletion pass withdraws.
    pub deletion_batch_size: usize,
    /// The number of entries a dump step examines.
    pub dump_batch_size: usize,
    /// The number of routes a policy push step re-evaluates.
    pub push_batch_size: usize,
    /// The number of routes a stale sweep step examines.
    pub sweep_batch_size: usize,
    /// Whether this is the multicast RIB.
    pub multicast: bool,
    /// Whether the nexthops of EGP routes are resolved over IGP routes
    /// before they are handed to consumers. EGP routes whose nexthop no IGP
    /// route covers are held back.
    pub resolve_egp_nexthops: bool,
    pub admin_distances: BTreeMap<String, u16>,
    /// The decision process, in order of precedence.
    pub tie_breakers: Vec<TieBreaker>,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn deletion_batch_size(&self) -> usize {
        self.deletion_batch_size.max(1)
    }

    pub fn dump_batch_size(&self) -> usize {
        self.dump_batch_size.max(1)
    }

    pub fn push_batch_size(&self) -> usize {
        self.push_batch_size.max(1)
    }

    pub fn sweep_batch_size(&self) -> usize {
        self.sweep_batch_size.max(1)
    }

    /// The administrative distance for the protocol `name`. Configured
    /// values override the defaults.
    pub fn admin_distance(&self, name: &str) -> u16 {
        if let Some(distance) = self.admin_distances.get(name) {
            return *distance;
        }
        DEFAULT_ADMIN_DISTANCES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, d)| *d)
            .unwrap_or_else(|| {
                warn!(
                    "no admin distance for protocol {}, using {}",
                    name, UNKNOWN_ADMIN_DISTANCE
                );
                UNKNOWN_ADMIN_DISTANCE
            })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            deletion_batch_size: 1,
            dump_batch_size: 1,
            push_batch_size: 1,
            sweep_batch_size: 16,
            multicast: false,
            resolve_egp_nexthops: false,
            admin_distances: BTreeMap::new(),
            tie_breakers: TieBreaker::default_chain(),
        }
    }
}
