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

//! Merge two underfull adjacent kids: the left one terminates and the right
//! one adopts its kids, extending leftward.

use super::RoleController;
use crate::ids::NodeId;
use crate::msg::{MessageKind, ParticipantConfig, RoleMessage};
use crate::util::TreeResult;

pub(super) async fn merge_kids(
    controller: &RoleController,
    left: NodeId,
    right: NodeId,
) -> TreeResult<()> {
    let node = controller.node();
    // the kids may have stopped being mergeable while this transaction sat
    // in the queue
    if !node.kids_are_mergeable(left, right) {
        log::info!(
            "node {} canceling MergeKids: the kids are no longer mergeable",
            node.id()
        );
        return Ok(());
    }
    log::info!("node {} merging {} into {}", node.id(), left, right);

    let Some(right_handle) = node.kids.borrow().get(right).map(|e| e.handle) else {
        return Ok(());
    };
    controller.enlist(
        &right_handle,
        ParticipantConfig::GrowAbsorber {
            parent: controller.new_handle(right),
        },
    )?;
    let (message, _sender) = controller.listen(MessageKind::HelloParent).await?;
    let absorber = expect_message!(message, RoleMessage::HelloParent { kid, .. } => kid);
    log::debug!("node {} got hello from the absorber", node.id());

    let Some(left_handle) = node.kids.borrow().get(left).map(|e| e.handle) else {
        return Ok(());
    };
    controller.enlist(
        &left_handle,
        ParticipantConfig::Absorbee {
            parent: controller.new_handle(left),
            absorber: controller.transfer_handle(&absorber, left),
        },
    )?;

    let _goodbye = controller.listen(MessageKind::GoodbyeParent).await?;
    log::debug!("node {} got goodbye from the absorbee", node.id());
    let (message, _sender) = controller.listen(MessageKind::FinishedAbsorbing).await?;
    let summary = expect_message!(message, RoleMessage::FinishedAbsorbing { summary, .. } => summary);
    log::debug!("node {} got finished_absorbing from the absorber", node.id());

    {
        let mut kids = node.kids.borrow_mut();
        kids.set_summary(right, summary);
        kids.merge_right(left)?;
    }
    node.check_limits();
    node.send_kid_summary();
    Ok(())
}
