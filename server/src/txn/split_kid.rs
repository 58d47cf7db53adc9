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

//! Split one overfull kid in two.
//!
//! The originator (the kid's parent) spawns an absorber starting on an empty
//! interval at the kid's right endpoint. The kid then shrinks from the
//! right, handing the detached half of its kids to the absorber; the
//! midpoint is chosen by `shrink_right` alone, deterministically given the
//! existing intervals. Only when both halves report completion does the
//! parent's kid set change, in a single `split` application.

use super::RoleController;
use crate::ids::NodeId;
use crate::keyspace::Interval;
use crate::msg::{DataNodeConfig, MessageKind, ParticipantConfig, RoleHandle, RoleMessage};
use crate::util::{Error, TreeResult};
use std::collections::HashSet;

pub(super) async fn split_kid(controller: &RoleController, kid_id: NodeId) -> TreeResult<()> {
    let node = controller.node();
    if node.height() == 0 {
        return Err(Error::internal("height 0 nodes cannot split their kids"));
    }
    let Some(entry) = node.kids.borrow().get(kid_id).cloned() else {
        log::info!(
            "node {} canceling SplitKid: the kid was gone when the transaction started",
            node.id()
        );
        return Ok(());
    };
    let old_hi = entry.interval.hi.ok_or_else(|| {
        Error::internal("cannot split a kid whose interval has no right endpoint")
    })?;

    let new_id = NodeId::random();
    log::info!("node {} splitting {} off of {}", node.id(), new_id, kid_id);
    controller.spawn_enlist(
        DataNodeConfig {
            id: new_id,
            parent: Some(node.handle()),
            height: node.height() - 1,
            program_config: node.program_config().clone(),
            start_role: None,
        },
        ParticipantConfig::NewAbsorber {
            parent: controller.new_handle(new_id),
            // start with an empty interval; the left side will grow leftward
            interval: Interval::empty_at(old_hi),
        },
    );
    let (message, _sender) = controller.listen(MessageKind::HelloParent).await?;
    let new = expect_message!(message, RoleMessage::HelloParent { kid, .. } => kid);
    log::debug!("node {} got hello from the new kid", node.id());

    controller.enlist(
        &entry.handle,
        ParticipantConfig::SplitNode {
            absorber: controller.transfer_handle(&new, kid_id),
            parent: controller.new_handle(kid_id),
        },
    )?;

    let (message, _sender) = controller.listen(MessageKind::FinishedAbsorbing).await?;
    let (new_summary, new_interval) = expect_message!(
        message,
        RoleMessage::FinishedAbsorbing { summary, new_interval } => (summary, new_interval)
    );
    log::debug!("node {} got finished_absorbing", node.id());

    let (message, _sender) = controller.listen(MessageKind::FinishedSplitting).await?;
    let kid_summary =
        expect_message!(message, RoleMessage::FinishedSplitting { summary } => summary);
    log::debug!("node {} got finished_splitting", node.id());

    node.kids.borrow_mut().split(
        kid_id,
        new_interval.lo,
        controller.role_handle_to_node_handle(&new),
        new_summary,
        kid_summary,
    )?;
    node.check_limits();
    Ok(())
}

/// Participant on the kid being split: shrink from the right and send the
/// detached kids to the absorber
pub(super) async fn split_node(
    controller: &RoleController,
    parent: RoleHandle,
    absorber: RoleHandle,
) -> TreeResult<()> {
    let node = controller.node();
    let (mid, leaving) = node.shrink_kids_right();
    log::info!(
        "node {} splitting at midpoint {}: keeping {} kids, handing off {}",
        node.id(),
        mid,
        node.kids.borrow().len(),
        leaving.len()
    );

    controller.send(
        &absorber,
        RoleMessage::AbsorbTheseKids {
            kid_ids: leaving.iter().map(|e| e.handle.id).collect(),
            left_endpoint: mid,
        },
    );
    for entry in &leaving {
        // the detached kids were ours when this transaction started; their
        // removal from the kid set is what this handoff is about
        controller.grant(entry.handle.id);
        controller.enlist(
            &entry.handle,
            ParticipantConfig::FosterChild {
                old_parent: controller.new_handle(entry.handle.id),
                new_parent: controller.transfer_handle(&absorber, entry.handle.id),
            },
        )?;
    }

    log::debug!("node {} waiting for goodbyes from kids", node.id());
    let mut expected: HashSet<_> = leaving.iter().map(|e| e.handle.id).collect();
    while !expected.is_empty() {
        let (_message, sender) = controller.listen(MessageKind::GoodbyeParent).await?;
        expected.remove(&sender);
    }
    log::debug!("node {} got goodbyes from kids", node.id());

    controller.send(
        &parent,
        RoleMessage::FinishedSplitting {
            summary: node.kid_summary_message(),
        },
    );
    node.check_limits();
    Ok(())
}
