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

//! The transaction runtime.
//!
//! A transaction is an identifier-tagged subgraph of nodes each running one
//! role: a suspendable procedure whose only suspension point is
//! [`RoleController::listen`]. The controller gives a role everything it may
//! do: mint and transfer handles, send typed messages, enlist owned nodes
//! into the transaction and spawn brand-new nodes directly into it.
//!
//! Ownership discipline: `enlist` only accepts targets inside the enlisting
//! node's owned subtree (its kids, plus nodes this very role spawned). The
//! ownership graph is a tree, so at any instant some in-flight transaction
//! has no other transaction strictly below it and is guaranteed to make
//! progress. The one upward edge in the protocol is a brand-new leaf
//! enlisting its parent-to-be: a fresh leaf owns nothing and nobody can
//! enlist it, so it cannot participate in a cycle; that grant is recorded
//! explicitly when the role is constructed.

pub mod add_leaf;
pub mod bump_height;
pub mod consume_proxy;
pub mod helpers;
pub mod merge_kids;
pub mod new_dataset;
pub mod receive_start_subscription;
pub mod remove_leaf;
pub mod send_start_subscription;
pub mod spawn_kid;
pub mod split_kid;

use crate::ids::{NodeId, TransactionId};
use crate::msg::{
    DataNodeConfig, Envelope, MessageKind, NodeHandle, NodeMessage, ParticipantConfig, RoleHandle,
    RoleMessage,
};
use crate::node::DataNode;
use crate::util::{Error, TreeResult};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use tokio::sync::oneshot;

/// The originator roles a node can schedule on itself
#[derive(Debug, Clone)]
pub enum Originator {
    SpawnKid { force: bool, send_summary: bool },
    SplitKid { kid_id: NodeId },
    MergeKids { left: NodeId, right: NodeId },
    BumpHeight,
    ConsumeProxy,
    RemoveLeaf { kid_id: NodeId },
    CheckLimits { ms: u64 },
}

impl Originator {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SpawnKid { .. } => "SpawnKid",
            Self::SplitKid { .. } => "SplitKid",
            Self::MergeKids { .. } => "MergeKids",
            Self::BumpHeight => "BumpHeight",
            Self::ConsumeProxy => "ConsumeProxy",
            Self::RemoveLeaf { .. } => "RemoveLeaf",
            Self::CheckLimits { .. } => "CheckLimits",
        }
    }
}

/// Message rendezvous state for one role: messages that arrived before a
/// listener was installed, and the listener (at most one per kind) waiting
/// for the next message
#[derive(Default)]
struct Matcher {
    buffered: HashMap<MessageKind, VecDeque<(RoleMessage, NodeId)>>,
    waiting: HashMap<MessageKind, oneshot::Sender<(RoleMessage, NodeId)>>,
}

/// The per-(node, transaction) mailbox a role listens on
pub struct RoleSlot {
    matcher: RefCell<Matcher>,
}

impl RoleSlot {
    pub fn new() -> Self {
        Self {
            matcher: RefCell::new(Matcher::default()),
        }
    }

    /// Deliver a message to the role: wake the matching listener, or buffer
    /// FIFO until one is installed
    pub fn deliver(&self, message: RoleMessage, sender: NodeId) {
        let mut matcher = self.matcher.borrow_mut();
        let kind = message.kind();
        match matcher.waiting.remove(&kind) {
            Some(listener) => {
                let _ = listener.send((message, sender));
            }
            None => matcher
                .buffered
                .entry(kind)
                .or_default()
                .push_back((message, sender)),
        }
    }
}

/// Controller handed to every role to interact with the overall transaction
pub struct RoleController {
    node: Rc<DataNode>,
    transaction_id: TransactionId,
    slot: Rc<RoleSlot>,
    /// Nodes this role may enlist beyond its current kids
    granted: RefCell<HashSet<NodeId>>,
}

impl RoleController {
    pub(crate) fn new(node: Rc<DataNode>, transaction_id: TransactionId, slot: Rc<RoleSlot>) -> Self {
        Self {
            node,
            transaction_id,
            slot,
            granted: RefCell::new(HashSet::new()),
        }
    }

    pub fn node(&self) -> &Rc<DataNode> {
        &self.node
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// Create a role handle the identified role can use to send to this one
    pub fn new_handle(&self, _for_node_id: NodeId) -> RoleHandle {
        RoleHandle::new(self.node.handle(), self.transaction_id)
    }

    /// Re-address a role handle so that a third role can use it. Handles are
    /// plain values, so this is a re-stamping, not a transfer of ownership
    pub fn transfer_handle(&self, role_handle: &RoleHandle, _for_node_id: NodeId) -> RoleHandle {
        RoleHandle::new(role_handle.node, self.transaction_id)
    }

    /// Strip the transaction stamp off a role handle
    pub fn role_handle_to_node_handle(&self, role_handle: &RoleHandle) -> NodeHandle {
        role_handle.node
    }

    /// Send a message to another role of the same transaction. Delivery is
    /// reliable and in-order per (sender, receiver) pair
    pub fn send(&self, to: &RoleHandle, message: RoleMessage) {
        self.node.machine().send(
            &to.node,
            Envelope::new(
                self.node.id(),
                NodeMessage::Transaction {
                    transaction_id: to.transaction_id,
                    message,
                },
            ),
        );
    }

    /// Record that this role may enlist the identified node even though it
    /// is not currently one of our kids (freshly spawned nodes, detached
    /// kids mid-handoff, a joining leaf's parent-to-be)
    pub(crate) fn grant(&self, id: NodeId) {
        self.granted.borrow_mut().insert(id);
    }

    /// Enlist an existing owned node into this transaction with a role
    pub fn enlist(&self, target: &NodeHandle, role: ParticipantConfig) -> TreeResult<()> {
        let owned =
            self.node.kids.borrow().contains(target.id) || self.granted.borrow().contains(&target.id);
        if !owned {
            return Err(Error::internal(format!(
                "cannot enlist {}: it is outside the subtree owned by {}",
                target.id,
                self.node.id()
            )));
        }
        self.node.machine().send(
            target,
            Envelope::new(
                self.node.id(),
                NodeMessage::StartParticipantRole {
                    transaction_id: self.transaction_id,
                    role,
                },
            ),
        );
        Ok(())
    }

    /// Spawn a brand-new node whose first action is to run `role` inside the
    /// current transaction
    pub fn spawn_enlist(&self, mut config: DataNodeConfig, role: ParticipantConfig) -> NodeHandle {
        config.start_role = Some((self.transaction_id, role));
        self.grant(config.id);
        self.node.machine().spawn_node(config)
    }

    /// Suspend until a message of the given kind arrives for this role.
    /// Installing a second listener for the same kind is a fatal protocol
    /// violation
    pub async fn listen(&self, kind: MessageKind) -> TreeResult<(RoleMessage, NodeId)> {
        let receiver = {
            let mut matcher = self.slot.matcher.borrow_mut();
            if let Some(queue) = matcher.buffered.get_mut(&kind) {
                if let Some(ready) = queue.pop_front() {
                    return Ok(ready);
                }
            }
            if matcher.waiting.contains_key(&kind) {
                return Err(Error::internal(format!(
                    "a listener was already installed for messages of kind {:?}",
                    kind
                )));
            }
            let (tx, rx) = oneshot::channel();
            matcher.waiting.insert(kind, tx);
            rx
        };
        receiver
            .await
            .map_err(|_| Error::internal("the role mailbox closed while listening"))
    }
}

/// Construct and run a participant role from its config. The registry is a
/// closed enum, so this is a total function
pub(crate) async fn run_participant(
    controller: &RoleController,
    role: ParticipantConfig,
) -> TreeResult<()> {
    match role {
        ParticipantConfig::StartDataNode { parent, interval } => {
            helpers::start_data_node(controller, parent, interval).await
        }
        ParticipantConfig::NewAbsorber { parent, interval } => {
            helpers::new_absorber(controller, parent, interval).await
        }
        ParticipantConfig::GrowAbsorber { parent } => {
            helpers::grow_absorber(controller, parent).await
        }
        ParticipantConfig::Absorbee { parent, absorber } => {
            helpers::absorbee(controller, parent, absorber).await
        }
        ParticipantConfig::FosterChild {
            old_parent,
            new_parent,
        } => helpers::foster_child(controller, old_parent, new_parent).await,
        ParticipantConfig::SplitNode { parent, absorber } => {
            split_kid::split_node(controller, parent, absorber).await
        }
        ParticipantConfig::NewDataset { requester } => {
            new_dataset::new_dataset(controller, requester).await
        }
        ParticipantConfig::AddLeaf { parent } => add_leaf::add_leaf(controller, parent).await,
        ParticipantConfig::AddLeafParent { kid, kid_summary } => {
            add_leaf::add_leaf_parent(controller, kid, kid_summary).await
        }
        ParticipantConfig::SendStartSubscription { parent, link_key } => {
            send_start_subscription::send_start_subscription(controller, parent, link_key).await
        }
        ParticipantConfig::ReceiveStartSubscription {
            requester,
            link_key,
        } => {
            receive_start_subscription::receive_start_subscription(controller, requester, link_key)
                .await
        }
    }
}

/// Run an originator role to completion
pub(crate) async fn run_originator(
    controller: &RoleController,
    originator: Originator,
) -> TreeResult<()> {
    match originator {
        Originator::SpawnKid {
            force,
            send_summary,
        } => spawn_kid::spawn_kid(controller, force, send_summary).await,
        Originator::SplitKid { kid_id } => split_kid::split_kid(controller, kid_id).await,
        Originator::MergeKids { left, right } => {
            merge_kids::merge_kids(controller, left, right).await
        }
        Originator::BumpHeight => bump_height::bump_height(controller).await,
        Originator::ConsumeProxy => consume_proxy::consume_proxy(controller).await,
        Originator::RemoveLeaf { kid_id } => remove_leaf::remove_leaf(controller, kid_id).await,
        Originator::CheckLimits { ms } => {
            log::trace!(
                "node {} running a limit check inside {}",
                controller.node().id(),
                controller.transaction_id()
            );
            controller.node().monitor_pass(ms)
        }
    }
}
