/*
 * Created on Sat Mar 18 2023
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

//! Raise a saturated root by one level: spawn a proxy at the root's own
//! height, transfer every kid to it, then immediately split the proxy to
//! restore healthy fan-out.

use super::{split_kid, RoleController};
use crate::ids::NodeId;
use crate::msg::{DataNodeConfig, MessageKind, ParticipantConfig, RoleMessage};
use crate::util::{Error, TreeResult};
use std::collections::HashSet;

pub(super) async fn bump_height(controller: &RoleController) -> TreeResult<()> {
    let node = controller.node();
    if !node.is_root() {
        return Err(Error::internal("only the root node may bump its height"));
    }

    let proxy_id = NodeId::random();
    log::debug!("node {} spawning proxy {}", node.id(), proxy_id);
    let interval = node.kids.borrow().interval();
    controller.spawn_enlist(
        DataNodeConfig {
            id: proxy_id,
            parent: Some(node.handle()),
            height: node.height(),
            program_config: node.program_config().clone(),
            start_role: None,
        },
        ParticipantConfig::NewAbsorber {
            parent: controller.new_handle(proxy_id),
            interval,
        },
    );
    let (message, _sender) = controller.listen(MessageKind::HelloParent).await?;
    let proxy = expect_message!(message, RoleMessage::HelloParent { kid, .. } => kid);
    log::debug!("node {} received hello from the proxy", node.id());

    let kids_to_absorb: Vec<(NodeId, _)> = {
        let kids = node.kids.borrow();
        kids.iter().map(|(id, e)| (id, e.handle)).collect()
    };
    controller.send(
        &proxy,
        RoleMessage::AbsorbTheseKids {
            kid_ids: kids_to_absorb.iter().map(|(id, _)| *id).collect(),
            left_endpoint: interval.lo,
        },
    );
    log::debug!(
        "node {} sending {} kids to leave for the proxy",
        node.id(),
        kids_to_absorb.len()
    );
    for (kid_id, handle) in &kids_to_absorb {
        controller.enlist(
            handle,
            ParticipantConfig::FosterChild {
                old_parent: controller.new_handle(*kid_id),
                new_parent: controller.transfer_handle(&proxy, *kid_id),
            },
        )?;
    }

    let mut expected: HashSet<_> = kids_to_absorb.iter().map(|(id, _)| *id).collect();
    while !expected.is_empty() {
        let (_message, sender) = controller.listen(MessageKind::GoodbyeParent).await?;
        expected.remove(&sender);
    }
    log::debug!("node {}: all kids have left", node.id());

    let (message, _sender) = controller.listen(MessageKind::FinishedAbsorbing).await?;
    let summary = expect_message!(message, RoleMessage::FinishedAbsorbing { summary, .. } => summary);

    // restore node state one level up
    node.height.set(node.height() + 1);
    {
        let mut kids = node.kids.borrow_mut();
        kids.clear();
        kids.add_kid(
            controller.role_handle_to_node_handle(&proxy),
            interval,
            Some(summary),
        )?;
    }

    // after bumping the height we will certainly need a second kid
    split_kid::split_kid(controller, proxy_id).await?;

    log::info!("node {} finished bumping its height to {}", node.id(), node.height());
    Ok(())
}
