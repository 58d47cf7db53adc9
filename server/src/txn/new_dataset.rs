/*
 * Created on Sun Mar 19 2023
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

//! Bring a fresh root to life: install its kid set over the whole keyspace
//! and, for roots above height 1, seed the first interior kid inline.

use super::{spawn_kid, RoleController};
use crate::keyspace::Key;
use crate::msg::{RoleHandle, RoleMessage};
use crate::node::kids::KidSet;
use crate::util::{Error, TreeResult};

pub(super) async fn new_dataset(
    controller: &RoleController,
    requester: Option<RoleHandle>,
) -> TreeResult<()> {
    let node = controller.node();
    if !node.kids.borrow().is_empty() {
        return Err(Error::internal(
            "cannot start a new dataset on a node that already has kids",
        ));
    }
    if !node.is_root() {
        return Err(Error::internal(
            "cannot start a new dataset on a node with a parent",
        ));
    }

    *node.kids.borrow_mut() = KidSet::new(Key::Min, Some(Key::Max));
    log::debug!(
        "node {} hosting a dataset with {} input and {} output link keys",
        node.id(),
        node.program_config().input_link_keys.len(),
        node.program_config().output_link_keys.len()
    );

    if node.height() > 1 {
        log::info!("node {} dispatching NewDataset to SpawnKid", node.id());
        spawn_kid::spawn_kid(controller, false, true).await?;
    } else {
        log::info!(
            "node {} starting a dataset without kids at height {}",
            node.id(),
            node.height()
        );
    }

    if let Some(requester) = requester {
        controller.send(
            &requester,
            RoleMessage::StartedDataset {
                root: controller.new_handle(requester.id()),
            },
        );
    }
    Ok(())
}
