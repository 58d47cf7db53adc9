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

//! The receiving half of the subscription handshake.
//!
//! While the source is taller than this node, the node re-advertises itself
//! as the unique "leftmost kid" and expects exactly one counterpart in the
//! returned edges; each round the next `start_subscription` arrives from one
//! level further down the source, until the heights agree.

use super::RoleController;
use crate::ids::{LinkKey, NodeId};
use crate::keyspace::Interval;
use crate::msg::{MessageKind, ParticipantConfig, RoleHandle, RoleMessage};
use crate::util::{Error, TreeResult};
use std::collections::BTreeMap;

pub(super) async fn receive_start_subscription(
    controller: &RoleController,
    requester: RoleHandle,
    link_key: LinkKey,
) -> TreeResult<()> {
    let node = controller.node();
    controller.send(
        &requester,
        RoleMessage::HelloParent {
            kid: controller.new_handle(requester.id()),
            kid_summary: Some(node.kid_summary_message()),
            interval: None,
        },
    );

    let (mut subscriber, mut source_height) =
        listen_start_subscription(controller, &link_key).await?;
    while source_height > node.height() {
        log::info!(
            "node {}: source height {} is above our height {}, advertising ourselves as proxy",
            node.id(),
            source_height,
            node.height()
        );
        let next =
            receive_from_greater_height_source(controller, &link_key, &subscriber).await?;
        subscriber = next.0;
        source_height = next.1;
    }

    log::info!(
        "node {} receiving a subscription from {}",
        node.id(),
        subscriber.id()
    );
    let leftmost = enlist_kids_and_await_hellos(controller, &link_key).await?;
    let target_intervals: BTreeMap<NodeId, Interval> =
        node.patched_kid_intervals().into_iter().collect();
    controller.send(
        &subscriber,
        RoleMessage::SubscriptionStarted {
            link_key: link_key.clone(),
            leftmost_kids: leftmost
                .iter()
                .map(|(_, role)| controller.transfer_handle(role, subscriber.id()))
                .collect(),
            target_intervals,
        },
    );

    // the edges only matter to the link layer; we record them so they are
    // not lost and so the data flow can be wired up later
    let (message, _sender) = controller.listen(MessageKind::SubscriptionEdges).await?;
    let edges = expect_message!(message, RoleMessage::SubscriptionEdges { edges } => edges);
    {
        let mut publisher = node.publisher.borrow_mut();
        publisher.record_edges(
            link_key.clone(),
            edges
                .iter()
                .map(|(target, senders)| (*target, senders.iter().map(|h| h.id()).collect()))
                .collect(),
        );
        publisher.subscribe_input(link_key, controller.role_handle_to_node_handle(&subscriber));
    }
    Ok(())
}

/// Wait for a `start_subscription` and check its link key
async fn listen_start_subscription(
    controller: &RoleController,
    link_key: &LinkKey,
) -> TreeResult<(RoleHandle, u32)> {
    let (message, _sender) = controller.listen(MessageKind::StartSubscription).await?;
    let (subscriber, their_key, height) = expect_message!(
        message,
        RoleMessage::StartSubscription { subscriber, link_key, height, .. } =>
            (subscriber, link_key, height)
    );
    if their_key != *link_key {
        return Err(Error::internal(format!(
            "mismatched link keys: ours is \"{}\", theirs is \"{}\"",
            link_key, their_key
        )));
    }
    Ok((subscriber, height))
}

/// One round of height reconciliation against a taller source. Returns the
/// subscriber and height of the next `start_subscription`, which comes from
/// the source's proxy
async fn receive_from_greater_height_source(
    controller: &RoleController,
    link_key: &LinkKey,
    subscriber: &RoleHandle,
) -> TreeResult<(RoleHandle, u32)> {
    let node = controller.node();
    let mut target_intervals = BTreeMap::new();
    target_intervals.insert(node.id(), node.kids.borrow().interval());
    controller.send(
        subscriber,
        RoleMessage::SubscriptionStarted {
            link_key: link_key.clone(),
            leftmost_kids: vec![controller.new_handle(subscriber.id())],
            target_intervals,
        },
    );

    let (message, _sender) = controller.listen(MessageKind::SubscriptionEdges).await?;
    let edges = expect_message!(message, RoleMessage::SubscriptionEdges { edges } => edges);
    let proxies = edges.get(&node.id()).ok_or_else(|| {
        Error::internal("the taller source returned edges that do not mention us")
    })?;
    if proxies.len() != 1 {
        return Err(Error::internal(
            "received from a taller source but did not get a unique proxy to pair with",
        ));
    }

    listen_start_subscription(controller, link_key).await
}

/// Enlist every kid as a receiver of its own and collect their role handles
async fn enlist_kids_and_await_hellos(
    controller: &RoleController,
    link_key: &LinkKey,
) -> TreeResult<Vec<(NodeId, RoleHandle)>> {
    let node = controller.node();
    log::debug!("node {} enlisting kids as receivers", node.id());
    let kid_entries: Vec<_> = {
        let kids = node.kids.borrow();
        kids.iter().map(|(id, e)| (id, e.handle)).collect()
    };
    for (kid_id, handle) in &kid_entries {
        controller.enlist(
            handle,
            ParticipantConfig::ReceiveStartSubscription {
                requester: controller.new_handle(*kid_id),
                link_key: link_key.clone(),
            },
        )?;
    }
    let mut roles: BTreeMap<NodeId, RoleHandle> = BTreeMap::new();
    while roles.len() < kid_entries.len() {
        let (message, sender) = controller.listen(MessageKind::HelloParent).await?;
        let kid = expect_message!(message, RoleMessage::HelloParent { kid, .. } => kid);
        roles.insert(sender, kid);
    }
    log::debug!("node {} got hellos from its kids", node.id());
    // present the kids in interval order
    Ok(kid_entries
        .iter()
        .filter_map(|(id, _)| roles.get(id).map(|role| (*id, *role)))
        .collect())
}
