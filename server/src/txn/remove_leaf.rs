/*
 * Created on Mon Mar 20 2023
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

//! Drop a departed leaf from its parent's kid set.

use super::RoleController;
use crate::ids::NodeId;
use crate::util::TreeResult;

pub(super) async fn remove_leaf(controller: &RoleController, kid_id: NodeId) -> TreeResult<()> {
    let node = controller.node();
    node.updated_summary.set(true);
    let present = node.kids.borrow().contains(kid_id);
    if present {
        log::info!("node {} removing leaf {}", node.id(), kid_id);
        node.kids.borrow_mut().remove_kid(kid_id)?;
    } else {
        log::info!("node {}: leaf {} to remove was not found", node.id(), kid_id);
    }
    node.send_kid_summary();
    node.check_limits();
    Ok(())
}
