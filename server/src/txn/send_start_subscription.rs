/*
 * Created on Tue Mar 21 2023
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

//! The sending half of the subscription handshake.
//!
//! A subtree of data nodes subscribes to a target, level by level. When the
//! target is taller than this node, the node stands in as its own unique kid
//! and pairs with a proxy the target advertises, walking down the target
//! chain until the heights agree; then kids are matched to the target's
//! leftmost kids by equal left endpoint, one to one. Any unmatched endpoint
//! on either side is a protocol violation.

use super::RoleController;
use crate::ids::{LinkKey, NodeId};
use crate::keyspace::Key;
use crate::msg::{
    Load, MessageKind, ParticipantConfig, RoleHandle, RoleMessage,
};
use crate::util::{Error, TreeResult};
use std::collections::{BTreeMap, HashMap};

pub(super) async fn send_start_subscription(
    controller: &RoleController,
    parent: RoleHandle,
    link_key: LinkKey,
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

    let (message, _sender) = controller.listen(MessageKind::SubscribeTo).await?;
    let (mut target, mut target_height) = expect_message!(
        message,
        RoleMessage::SubscribeTo { target, height } => (target, height)
    );
    while target_height > node.height() {
        log::info!(
            "node {}: target height {} is above our height {}, pairing with a proxy",
            node.id(),
            target_height,
            node.height()
        );
        target = subscribe_to_greater_height_target(controller, &link_key, &target).await?;
        target_height -= 1;
    }

    subscribe_to_same_height_target(controller, &link_key, &target).await?;
    node.publisher
        .borrow_mut()
        .subscribe_output(link_key, controller.role_handle_to_node_handle(&target));
    Ok(())
}

fn validate_link_key(ours: &LinkKey, theirs: &LinkKey) -> TreeResult<()> {
    if ours != theirs {
        return Err(Error::internal(format!(
            "mismatched link keys: ours is \"{}\", theirs is \"{}\"",
            ours, theirs
        )));
    }
    Ok(())
}

/// Subscribe to a target one level taller than this node: this node stands
/// in as its own unique kid, and the target answers with a single proxy to
/// pair with. Returns the proxy, the next target in the chain
async fn subscribe_to_greater_height_target(
    controller: &RoleController,
    link_key: &LinkKey,
    target: &RoleHandle,
) -> TreeResult<RoleHandle> {
    let node = controller.node();
    log::info!(
        "node {} starting a subscription to overly tall target {}",
        node.id(),
        target.id()
    );
    let interval = node.kids.borrow().interval();
    controller.send(
        target,
        RoleMessage::StartSubscription {
            subscriber: controller.new_handle(target.id()),
            link_key: link_key.clone(),
            load: Load {
                messages_per_second: node.estimated_messages_per_second(),
            },
            height: node.height(),
            source_interval: interval,
            // we stand in as the unique kid of ourselves to even out the
            // mismatched heights
            kid_intervals: vec![interval],
        },
    );

    let (message, _sender) = controller.listen(MessageKind::SubscriptionStarted).await?;
    let (their_key, leftmost_kids) = expect_message!(
        message,
        RoleMessage::SubscriptionStarted { link_key, leftmost_kids, .. } => (link_key, leftmost_kids)
    );
    validate_link_key(link_key, &their_key)?;
    if leftmost_kids.len() != 1 {
        return Err(Error::internal(
            "subscribed to a taller target but did not get a unique proxy to pair with",
        ));
    }
    let proxy = leftmost_kids[0];

    // tell the target to connect its proxy to this node itself, not to one
    // of our kids, balancing out the mismatched heights
    let mut edges: BTreeMap<NodeId, Vec<RoleHandle>> = BTreeMap::new();
    edges.insert(proxy.id(), vec![controller.new_handle(target.id())]);
    controller.send(target, RoleMessage::SubscriptionEdges { edges });

    Ok(proxy)
}

async fn subscribe_to_same_height_target(
    controller: &RoleController,
    link_key: &LinkKey,
    target: &RoleHandle,
) -> TreeResult<()> {
    let node = controller.node();

    // enlist every kid as a sender of its own and wait for them to come up
    log::debug!("node {} enlisting kids as senders", node.id());
    let kid_entries: Vec<_> = {
        let kids = node.kids.borrow();
        kids.iter().map(|(id, e)| (id, e.handle)).collect()
    };
    for (kid_id, handle) in &kid_entries {
        controller.enlist(
            handle,
            ParticipantConfig::SendStartSubscription {
                parent: controller.new_handle(*kid_id),
                link_key: link_key.clone(),
            },
        )?;
    }
    let mut kid_roles: HashMap<NodeId, RoleHandle> = HashMap::new();
    while kid_roles.len() < kid_entries.len() {
        let (message, sender) = controller.listen(MessageKind::HelloParent).await?;
        let kid = expect_message!(message, RoleMessage::HelloParent { kid, .. } => kid);
        kid_roles.insert(sender, kid);
    }
    log::debug!("node {} got hellos from its kids", node.id());

    log::info!(
        "node {} starting a subscription to {}",
        node.id(),
        target.id()
    );
    let patched = node.patched_kid_intervals();
    controller.send(
        target,
        RoleMessage::StartSubscription {
            subscriber: controller.new_handle(target.id()),
            link_key: link_key.clone(),
            load: Load {
                messages_per_second: node.estimated_messages_per_second(),
            },
            height: node.height(),
            source_interval: node.kids.borrow().interval(),
            kid_intervals: patched.iter().map(|(_, interval)| *interval).collect(),
        },
    );

    log::debug!("node {} awaiting subscription_started", node.id());
    let (message, _sender) = controller.listen(MessageKind::SubscriptionStarted).await?;
    let (their_key, leftmost_kids, target_intervals) = expect_message!(
        message,
        RoleMessage::SubscriptionStarted { link_key, leftmost_kids, target_intervals } =>
            (link_key, leftmost_kids, target_intervals)
    );
    validate_link_key(link_key, &their_key)?;

    // match kids by equal left endpoint; the matching must be a bijection
    let mut my_kid_by_start: BTreeMap<Key, NodeId> = patched
        .iter()
        .map(|(id, interval)| (interval.lo, *id))
        .collect();
    let mut edges: BTreeMap<NodeId, Vec<RoleHandle>> = BTreeMap::new();
    for other_kid in leftmost_kids {
        let other_start = target_intervals
            .get(&other_kid.id())
            .ok_or_else(|| {
                Error::internal("an advertised leftmost kid came without a target interval")
            })?
            .lo;
        let my_kid_id = my_kid_by_start.remove(&other_start).ok_or_else(|| {
            Error::internal(
                "mismatched adjacent leftmost kids: no kid of ours starts at the advertised endpoint",
            )
        })?;
        let my_kid = kid_roles.get(&my_kid_id).ok_or_else(|| {
            Error::internal("a matched kid never said hello")
        })?;
        edges
            .entry(other_kid.id())
            .or_default()
            .push(controller.transfer_handle(my_kid, target.id()));
        controller.send(
            my_kid,
            RoleMessage::SubscribeTo {
                target: controller.transfer_handle(&other_kid, my_kid_id),
                height: node.height().saturating_sub(1),
            },
        );
    }
    if !my_kid_by_start.is_empty() {
        return Err(Error::internal(
            "mismatched adjacent leftmost kids: some of our kids remained unmatched",
        ));
    }

    controller.send(target, RoleMessage::SubscriptionEdges { edges });
    Ok(())
}
