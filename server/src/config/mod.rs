/*
 * Created on Fri Mar 10 2023
 *
 * This file is a part of Skytree
 * Skytree is a free and open-source distributed dataset tree written by
 * Sayan Nandan ("the Author") with the vision to provide an ordered,
 * dynamically rebalancing partition of the keyspace without compromising
 * on correctness or availability.
 *
 * Copyright (c) 2023, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! Configuration of a machine and the datasets it hosts.
//!
//! Three layers, the later overriding the earlier: built-in defaults, an
//! optional YAML file (`--withconfig <path>` or `SKYTREE_CONFIG`) and the
//! `SKYTREE_*` environment variables.

use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs;

#[cfg(test)]
mod tests;

consts! {
    /// The maximum number of kids a node may have before growth must occur
    /// at its parent
    pub DEFAULT_KIDS_LIMIT: u64 = 200;
    /// The remaining-capacity threshold below which a node is considered out
    /// of capacity
    pub DEFAULT_CAPACITY_TRIGGER: u64 = 5;
    /// The monitor tick and summary emission period
    pub DEFAULT_SUMMARY_INTERVAL_MS: u64 = 200;
    /// Default height of the root spawned by the daemon
    pub DEFAULT_ROOT_HEIGHT: u32 = 2;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemConfig {
    /// `DATA_NODE_KIDS_LIMIT`: max kids per node
    pub data_node_kids_limit: u64,
    /// `TOTAL_KID_CAPACITY_TRIGGER`: low-capacity threshold
    pub total_kid_capacity_trigger: u64,
    /// `KID_SUMMARY_INTERVAL_MS`: monitor tick period
    pub kid_summary_interval_ms: u64,
    /// Seed for the machine's key sampler; fixed seeds give reproducible
    /// trees
    pub seed: u64,
    /// Height of the root dataset the daemon spawns on startup
    pub root_height: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            data_node_kids_limit: DEFAULT_KIDS_LIMIT,
            total_kid_capacity_trigger: DEFAULT_CAPACITY_TRIGGER,
            kid_summary_interval_ms: DEFAULT_SUMMARY_INTERVAL_MS,
            seed: 0,
            root_height: DEFAULT_ROOT_HEIGHT,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    OnRead(std::io::Error),
    OnParse(serde_yaml::Error),
    BadEnv(&'static str, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnRead(e) => write!(f, "couldn't read the config file: {}", e),
            Self::OnParse(e) => write!(f, "couldn't parse the config file: {}", e),
            Self::BadEnv(var, val) => write!(f, "bad value `{}` for {}", val, var),
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::OnParse(e)
    }
}

/// On-disk layout of the config file
#[derive(Debug, Deserialize, Default, PartialEq, Eq)]
struct ConfigFile {
    system: Option<SystemSection>,
    dataset: Option<DatasetSection>,
}

#[derive(Debug, Deserialize, Default, PartialEq, Eq)]
struct SystemSection {
    kids_limit: Option<u64>,
    capacity_trigger: Option<u64>,
    summary_interval_ms: Option<u64>,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize, Default, PartialEq, Eq)]
struct DatasetSection {
    height: Option<u32>,
}

impl SystemConfig {
    /// Resolve the full configuration from argv, the environment and the
    /// optional config file
    pub fn resolve() -> Result<Self, ConfigError> {
        let mut args = env::args().skip(1);
        let mut file_path = env::var("SKYTREE_CONFIG").ok();
        while let Some(arg) = args.next() {
            if arg == "--withconfig" {
                file_path = args.next();
            }
        }
        let mut cfg = match file_path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(ConfigError::OnRead)?;
                Self::from_yaml_str(&raw)?
            }
            None => Self::default(),
        };
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_yaml::from_str(raw)?;
        let mut cfg = Self::default();
        if let Some(system) = file.system {
            if let Some(limit) = system.kids_limit {
                cfg.data_node_kids_limit = limit;
            }
            if let Some(trigger) = system.capacity_trigger {
                cfg.total_kid_capacity_trigger = trigger;
            }
            if let Some(interval) = system.summary_interval_ms {
                cfg.kid_summary_interval_ms = interval;
            }
            if let Some(seed) = system.seed {
                cfg.seed = seed;
            }
        }
        if let Some(dataset) = file.dataset {
            if let Some(height) = dataset.height {
                cfg.root_height = height;
            }
        }
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        env_override("SKYTREE_KIDS_LIMIT", &mut self.data_node_kids_limit)?;
        env_override(
            "SKYTREE_CAPACITY_TRIGGER",
            &mut self.total_kid_capacity_trigger,
        )?;
        env_override(
            "SKYTREE_SUMMARY_INTERVAL_MS",
            &mut self.kid_summary_interval_ms,
        )?;
        env_override("SKYTREE_SEED", &mut self.seed)?;
        env_override("SKYTREE_ROOT_HEIGHT", &mut self.root_height)?;
        Ok(())
    }
}

fn env_override<T: std::str::FromStr>(
    var: &'static str,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Ok(raw) = env::var(var) {
        match raw.parse() {
            Ok(v) => *target = v,
            Err(_) => return Err(ConfigError::BadEnv(var, raw)),
        }
    }
    Ok(())
}
