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

//! Admit a new leaf: the leaf asks its parent-to-be for a key, the parent
//! allocates a fresh one strictly inside its interval and installs the leaf
//! over the open-ended range starting there.

use super::RoleController;
use crate::keyspace::Interval;
use crate::msg::{KidSummary, MessageKind, NodeHandle, ParticipantConfig, RoleHandle, RoleMessage};
use crate::node::kids::KidSet;
use crate::util::TreeResult;

/// Runs on the joining leaf itself
pub(super) async fn add_leaf(controller: &RoleController, parent: NodeHandle) -> TreeResult<()> {
    let node = controller.node();
    log::info!("node {} joining under {}", node.id(), parent.id);

    // the one upward enlist in the protocol: a fresh leaf owns nothing and
    // is known to nobody, so it cannot be part of an ownership cycle
    controller.grant(parent.id);
    controller.enlist(
        &parent,
        ParticipantConfig::AddLeafParent {
            kid: controller.new_handle(parent.id),
            kid_summary: KidSummary::empty(0),
        },
    )?;

    let (message, _sender) = controller.listen(MessageKind::SetLeafKey).await?;
    let key = expect_message!(message, RoleMessage::SetLeafKey { key } => key);
    // leaves have no right endpoint of their own
    *node.kids.borrow_mut() = KidSet::new(key, None);
    node.check_limits();
    Ok(())
}

/// Runs on the immediate parent of the joining leaf
pub(super) async fn add_leaf_parent(
    controller: &RoleController,
    kid: RoleHandle,
    kid_summary: KidSummary,
) -> TreeResult<()> {
    let node = controller.node();
    log::info!("node {} adding leaf {}", node.id(), kid.id());
    node.updated_summary.set(true);

    let key = node.new_kid_key();
    node.kids.borrow_mut().add_kid(
        controller.role_handle_to_node_handle(&kid),
        Interval::new(key, None),
        Some(kid_summary),
    )?;
    controller.send(&kid, RoleMessage::SetLeafKey { key });

    if node.out_of_capacity() {
        log::info!("node {} is out of capacity, pushing a summary up", node.id());
        node.send_kid_summary();
    }
    node.check_limits();
    Ok(())
}
