/*
 * Created on Fri Mar 17 2023
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

//! Seed a kidless interval node with its first kid. A node that already has
//! kids grows through `SplitKid` instead.

use super::RoleController;
use crate::ids::NodeId;
use crate::msg::{DataNodeConfig, KidSummary, MessageKind, ParticipantConfig, RoleMessage};
use crate::util::{Error, TreeResult};

pub(super) async fn spawn_kid(
    controller: &RoleController,
    force: bool,
    send_summary: bool,
) -> TreeResult<()> {
    let node = controller.node();
    if node.height() == 0 {
        return Err(Error::internal("height 0 nodes cannot spawn kids"));
    }
    if !node.kids.borrow().is_empty() {
        // should have used SplitKid instead
        return Err(Error::internal(
            "a node with existing kids must not run a SpawnKid transaction",
        ));
    }
    if !force && !node.out_of_capacity() {
        log::info!(
            "node {} canceling SpawnKid: the node is not out of capacity",
            node.id()
        );
        return Ok(());
    }

    let kid_id = NodeId::random();
    log::info!("node {} spawning kid {}", node.id(), kid_id);
    let interval = node.kids.borrow().interval();
    controller.spawn_enlist(
        DataNodeConfig {
            id: kid_id,
            parent: Some(node.handle()),
            height: node.height() - 1,
            program_config: node.program_config().clone(),
            start_role: None,
        },
        ParticipantConfig::StartDataNode {
            parent: controller.new_handle(kid_id),
            interval,
        },
    );

    let (message, _sender) = controller.listen(MessageKind::HelloParent).await?;
    let (kid, kid_summary) = expect_message!(
        message,
        RoleMessage::HelloParent { kid, kid_summary, .. } => (kid, kid_summary)
    );
    let summary = kid_summary.unwrap_or_else(|| KidSummary::empty(node.height() - 1));
    node.kids.borrow_mut().add_kid(
        controller.role_handle_to_node_handle(&kid),
        interval,
        Some(summary),
    )?;
    if send_summary {
        node.send_kid_summary();
    }
    node.check_limits();
    Ok(())
}
