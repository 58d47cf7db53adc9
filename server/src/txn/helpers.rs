/*
 * Created on Thu Mar 16 2023
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

//! Participant roles shared by the structural transactions: starting a fresh
//! node under a parent, absorbing kids, handing kids over and switching
//! parents.

use super::{spawn_kid, RoleController};
use crate::keyspace::Interval;
use crate::msg::{MessageKind, ParticipantConfig, RoleHandle, RoleMessage};
use crate::node::kids::KidSet;
use crate::util::TreeResult;
use std::collections::HashSet;

/// Initialize a freshly spawned node under `parent`, covering `interval`.
/// Nodes above height 1 start with a single kid spawned inline, inside the
/// same transaction
pub(super) async fn start_data_node(
    controller: &RoleController,
    parent: RoleHandle,
    interval: Interval,
) -> TreeResult<()> {
    let node = controller.node();
    *node.parent.borrow_mut() = Some(controller.role_handle_to_node_handle(&parent));
    *node.kids.borrow_mut() = KidSet::new(interval.lo, interval.hi);

    if node.height() > 1 {
        log::info!("node {} starting with a single kid", node.id());
        spawn_kid::spawn_kid(controller, false, false).await?;
    } else {
        log::info!(
            "node {} starting without kids at height {}",
            node.id(),
            node.height()
        );
    }

    controller.send(
        &parent,
        RoleMessage::HelloParent {
            kid: controller.new_handle(parent.id()),
            kid_summary: Some(node.kid_summary_message()),
            interval: Some(interval),
        },
    );
    node.check_limits();
    Ok(())
}

/// Like [`grow_absorber`], but for a node that is just starting up: install
/// the (typically empty) interval first
pub(super) async fn new_absorber(
    controller: &RoleController,
    parent: RoleHandle,
    interval: Interval,
) -> TreeResult<()> {
    *controller.node().kids.borrow_mut() = KidSet::new(interval.lo, interval.hi);
    log::debug!("node {} dispatching to the absorber role", controller.node().id());
    grow_absorber(controller, parent).await
}

/// Adopt all the kids handed over by another role, growing leftward to the
/// announced boundary
pub(super) async fn grow_absorber(
    controller: &RoleController,
    parent: RoleHandle,
) -> TreeResult<()> {
    let node = controller.node();
    controller.send(
        &parent,
        RoleMessage::HelloParent {
            kid: controller.new_handle(parent.id()),
            kid_summary: Some(node.kid_summary_message()),
            interval: None,
        },
    );

    let (message, _sender) = controller.listen(MessageKind::AbsorbTheseKids).await?;
    let (kid_ids, left_endpoint) = expect_message!(
        message,
        RoleMessage::AbsorbTheseKids { kid_ids, left_endpoint } => (kid_ids, left_endpoint)
    );
    node.kids.borrow_mut().grow_left(left_endpoint);

    log::debug!("node {} waiting for hellos from kids", node.id());
    let mut expected: HashSet<_> = kid_ids.into_iter().collect();
    while !expected.is_empty() {
        let (message, sender) = controller.listen(MessageKind::HelloParent).await?;
        let (kid, kid_summary, interval) = expect_message!(
            message,
            RoleMessage::HelloParent { kid, kid_summary, interval } => (kid, kid_summary, interval)
        );
        if !expected.remove(&sender) {
            return Err(crate::util::Error::internal(format!(
                "hello from {}, which is not an expected kid",
                sender
            )));
        }
        let interval = interval.ok_or_else(|| {
            crate::util::Error::internal("a fostered kid said hello without an interval")
        })?;
        node.kids.borrow_mut().add_kid(
            controller.role_handle_to_node_handle(&kid),
            interval,
            kid_summary,
        )?;
    }
    log::debug!("node {} got hellos from all kids", node.id());

    controller.send(
        &parent,
        RoleMessage::FinishedAbsorbing {
            summary: node.kid_summary_message(),
            new_interval: node.kids.borrow().interval(),
        },
    );
    node.send_kid_summary();
    node.check_limits();
    Ok(())
}

/// Transfer all of this node's kids to an absorber, then leave the system
pub(super) async fn absorbee(
    controller: &RoleController,
    parent: RoleHandle,
    absorber: RoleHandle,
) -> TreeResult<()> {
    let node = controller.node();
    log::info!("node {} being absorbed by {}", node.id(), absorber.id());

    let kid_entries: Vec<_> = {
        let kids = node.kids.borrow();
        kids.iter().map(|(id, e)| (id, e.handle)).collect()
    };
    controller.send(
        &absorber,
        RoleMessage::AbsorbTheseKids {
            kid_ids: kid_entries.iter().map(|(id, _)| *id).collect(),
            left_endpoint: node.kids.borrow().left(),
        },
    );
    for (kid_id, handle) in &kid_entries {
        controller.enlist(
            handle,
            ParticipantConfig::FosterChild {
                old_parent: controller.new_handle(*kid_id),
                new_parent: controller.transfer_handle(&absorber, *kid_id),
            },
        )?;
    }

    log::debug!("node {} waiting for goodbyes from kids", node.id());
    let mut expected: HashSet<_> = kid_entries.iter().map(|(id, _)| *id).collect();
    while !expected.is_empty() {
        let (_message, sender) = controller.listen(MessageKind::GoodbyeParent).await?;
        expected.remove(&sender);
    }
    log::debug!("node {} got goodbyes from all kids", node.id());

    controller.send(&parent, RoleMessage::GoodbyeParent);
    node.terminate();
    Ok(())
}

/// Switch the parent of this node
pub(super) async fn foster_child(
    controller: &RoleController,
    old_parent: RoleHandle,
    new_parent: RoleHandle,
) -> TreeResult<()> {
    let node = controller.node();
    log::info!(
        "node {} leaving old parent {} for new parent {}",
        node.id(),
        old_parent.id(),
        new_parent.id()
    );
    controller.send(&old_parent, RoleMessage::GoodbyeParent);
    controller.send(
        &new_parent,
        RoleMessage::HelloParent {
            kid: controller.new_handle(new_parent.id()),
            kid_summary: Some(node.kid_summary_message()),
            interval: Some(node.kids.borrow().interval()),
        },
    );
    *node.parent.borrow_mut() = Some(controller.role_handle_to_node_handle(&new_parent));
    node.send_kid_summary();
    node.check_limits();
    Ok(())
}
