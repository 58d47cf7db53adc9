/*
 * Created on Mon Mar 06 2023
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

//! # Skytree
//!
//! The `skytreed` crate (or the `server` folder) is the control plane of a
//! Skytree dataset: an ordered partition of the keyspace over a tree of data
//! nodes that splits, merges and re-levels itself online. See the individual
//! modules for their respective documentation.

use env_logger::Builder;
use libskytree::util::terminal;
use libskytree::{URL, VERSION};
use std::env;
use std::process;

#[macro_use]
mod util;
mod arbiter;
mod config;
mod ids;
mod keyspace;
mod machine;
mod msg;
mod node;
mod txn;
#[cfg(test)]
mod tests;

use config::SystemConfig;

/// The terminal art shown on startup
static TEXT: &str = "
███████ ██   ██ ██    ██ ████████ ██████  ███████ ███████
██      ██  ██   ██  ██     ██    ██   ██ ██      ██
███████ █████     ████      ██    ██████  █████   █████
     ██ ██  ██     ██       ██    ██   ██ ██      ██
███████ ██   ██    ██       ██    ██   ██ ███████ ███████
";

fn main() {
    Builder::new()
        .parse_filters(&env::var("SKYTREE_LOG").unwrap_or_else(|_| "info".to_owned()))
        .init();
    println!("{}", TEXT);
    let _ = terminal::write_info(format!("Skytree v{} | {}\n", VERSION, URL));
    let config = match SystemConfig::resolve() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", util::Error::from(e));
            process::exit(0x01);
        }
    };
    // the whole machine is cooperative: one thread is all we need
    let runtime = tokio::runtime::Builder::new_current_thread()
        .thread_name("skytreed")
        .enable_all()
        .build()
        .unwrap();
    if let Err(e) = runtime.block_on(arbiter::run(config)) {
        log::error!("the daemon exited with an error: {}", e);
        process::exit(0x01);
    }
    log::info!("goodbye");
}
