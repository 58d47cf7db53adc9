/*
 * Created on Wed Mar 22 2023
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

//! Boots a machine, spawns the root dataset onto it and supervises both
//! until a termination signal arrives.

use crate::config::SystemConfig;
use crate::ids::{NodeId, TransactionId};
use crate::machine::Machine;
use crate::msg::{DataNodeConfig, DatasetProgramConfig, NodeHandle, ParticipantConfig};
use libskytree::TResult;
use tokio::time::{self, Duration, MissedTickBehavior};

/// How often the supervisor logs the root's vital signs
const STATUS_INTERVAL_SECS: u64 = 5;

/// Spawn a fresh root dataset of the given height on the machine
pub fn spawn_root_dataset(machine: &Machine, height: u32) -> NodeHandle {
    machine.spawn_node(DataNodeConfig {
        id: NodeId::random(),
        parent: None,
        height,
        program_config: DatasetProgramConfig::default(),
        start_role: Some((
            TransactionId::random(),
            ParticipantConfig::NewDataset { requester: None },
        )),
    })
}

/// Run the machine until CTRL+C
pub async fn run(config: SystemConfig) -> TResult<()> {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            let machine = Machine::new(config.clone());
            let root = spawn_root_dataset(&machine, config.root_height);
            log::info!(
                "spawned the root dataset {} at height {}",
                root.id,
                config.root_height
            );
            let api = machine.api(root.id)?;
            let mut status = time::interval(Duration::from_secs(STATUS_INTERVAL_SECS));
            status.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = status.tick() => {
                        if let Ok(stats) = api.get_stats().await {
                            log::info!(
                                "root {}: height {}, {} kids, ~{} leaves",
                                stats.id, stats.height, stats.n_kids, stats.size
                            );
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            log::info!("signalling all workers to shut down");
            machine.shutdown();
            Ok(())
        })
        .await
}
