/*
 * Created on Thu Mar 09 2023
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

//! The wire-level message schema.
//!
//! Everything a node can receive travels inside an [`Envelope`]. Transaction
//! traffic is a [`RoleMessage`] stamped with its [`TransactionId`];
//! participant roles are started from a [`ParticipantConfig`], a closed
//! registry of role constructors: building a role from one is a total match,
//! there is no stringly-typed dispatch anywhere.

use crate::ids::{LinkKey, NodeId, TransactionId};
use crate::keyspace::{Interval, Key};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The addressing record used to send to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHandle {
    pub id: NodeId,
}

impl NodeHandle {
    pub const fn new(id: NodeId) -> Self {
        Self { id }
    }
}

/// A [`NodeHandle`] stamped with a transaction id: messages sent through one
/// are routed to the role that node runs in that transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleHandle {
    pub node: NodeHandle,
    pub transaction_id: TransactionId,
}

impl RoleHandle {
    pub const fn new(node: NodeHandle, transaction_id: TransactionId) -> Self {
        Self {
            node,
            transaction_id,
        }
    }

    pub fn id(&self) -> NodeId {
        self.node.id
    }
}

/// Periodically sent by kids to their parents to summarize the state of the
/// subtree below the sender
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KidSummary {
    /// An estimate of the number of leaves descended from the sender
    pub size: u64,
    /// The number of immediate kids of the sender
    pub n_kids: u64,
    /// The height of the sender
    pub height: u32,
    /// The estimated delivery rate for the sender and all its descendants
    /// combined, in hertz
    pub messages_per_second: f64,
}

impl KidSummary {
    pub fn empty(height: u32) -> Self {
        Self {
            size: 0,
            n_kids: 0,
            height,
            messages_per_second: 0.0,
        }
    }
}

/// The expected load along a subscription
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Load {
    pub messages_per_second: f64,
}

/// Opaque per-dataset payload. It is propagated verbatim to every descendant
/// a dataset spawns; the control plane itself only ever copies it around
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetProgramConfig {
    pub input_link_keys: Vec<LinkKey>,
    pub output_link_keys: Vec<LinkKey>,
}

/// Everything the machine controller needs to create a data node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataNodeConfig {
    pub id: NodeId,
    /// `None` iff the new node is a root
    pub parent: Option<NodeHandle>,
    pub height: u32,
    pub program_config: DatasetProgramConfig,
    /// The role the new node runs as its first action, if any
    pub start_role: Option<(TransactionId, ParticipantConfig)>,
}

/// The closed registry of participant role constructors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ParticipantConfig {
    /// Initialize a freshly spawned interior (or leaf) node under a parent
    StartDataNode { parent: RoleHandle, interval: Interval },
    /// Like `GrowAbsorber`, but for a node that is just starting up
    NewAbsorber { parent: RoleHandle, interval: Interval },
    /// Adopt all the kids handed over by another role
    GrowAbsorber { parent: RoleHandle },
    /// Hand every kid to an absorber, say goodbye and terminate
    Absorbee { parent: RoleHandle, absorber: RoleHandle },
    /// Switch the parent of a node
    FosterChild {
        old_parent: RoleHandle,
        new_parent: RoleHandle,
    },
    /// Split the local kid set in two and send the right half to an absorber
    SplitNode { parent: RoleHandle, absorber: RoleHandle },
    /// Install a kid set over the whole keyspace on a fresh root
    NewDataset { requester: Option<RoleHandle> },
    /// Run on a new leaf: ask the parent-to-be for a key
    AddLeaf { parent: NodeHandle },
    /// Run on the immediate parent of a joining leaf
    AddLeafParent { kid: RoleHandle, kid_summary: KidSummary },
    /// Prepare a (sub)tree to send `start_subscription` messages
    SendStartSubscription { parent: RoleHandle, link_key: LinkKey },
    /// Prepare a (sub)tree to receive `start_subscription` messages
    ReceiveStartSubscription { requester: RoleHandle, link_key: LinkKey },
}

impl ParticipantConfig {
    /// The display name of the role this config constructs
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartDataNode { .. } => "StartDataNode",
            Self::NewAbsorber { .. } => "NewAbsorber",
            Self::GrowAbsorber { .. } => "GrowAbsorber",
            Self::Absorbee { .. } => "Absorbee",
            Self::FosterChild { .. } => "FosterChild",
            Self::SplitNode { .. } => "SplitNode",
            Self::NewDataset { .. } => "NewDataset",
            Self::AddLeaf { .. } => "AddLeaf",
            Self::AddLeafParent { .. } => "AddLeafParent",
            Self::SendStartSubscription { .. } => "SendStartSubscription",
            Self::ReceiveStartSubscription { .. } => "ReceiveStartSubscription",
        }
    }
}

/// A message between two roles of the same transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RoleMessage {
    /// Sent by a kid to its (possibly new) parent to indicate that it is live
    HelloParent {
        kid: RoleHandle,
        kid_summary: Option<KidSummary>,
        interval: Option<Interval>,
    },
    /// Sent by a kid that is leaving its parent for good
    GoodbyeParent,
    /// Tells an absorber which kids to wait for and where its new left
    /// boundary lies
    AbsorbTheseKids {
        kid_ids: Vec<NodeId>,
        left_endpoint: Key,
    },
    /// The absorber is done adopting everything it was promised
    FinishedAbsorbing {
        summary: KidSummary,
        new_interval: Interval,
    },
    /// The splitting node has handed off its right half
    FinishedSplitting { summary: KidSummary },
    /// Assigns a joining leaf its key
    SetLeafKey { key: Key },
    /// Optional acknowledgement of a `NewDataset` request
    StartedDataset { root: RoleHandle },
    /// Request to start a subscription; sent by the side that will produce
    /// the data
    StartSubscription {
        subscriber: RoleHandle,
        link_key: LinkKey,
        load: Load,
        height: u32,
        source_interval: Interval,
        /// Abutting sub-intervals covering `source_interval`, one per kid of
        /// the sender
        kid_intervals: Vec<Interval>,
    },
    /// Reply to `StartSubscription`: the responder advertises its kids and
    /// the interval each of them is responsible for
    SubscriptionStarted {
        link_key: LinkKey,
        leftmost_kids: Vec<RoleHandle>,
        target_intervals: BTreeMap<NodeId, Interval>,
    },
    /// Final word of the sender: which of its kids feed which of the
    /// responder's kids
    SubscriptionEdges {
        edges: BTreeMap<NodeId, Vec<RoleHandle>>,
    },
    /// Tells a sending role which target it should subscribe to
    SubscribeTo { target: RoleHandle, height: u32 },
}

/// The kind of a [`RoleMessage`], used to key listeners and buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    HelloParent,
    GoodbyeParent,
    AbsorbTheseKids,
    FinishedAbsorbing,
    FinishedSplitting,
    SetLeafKey,
    StartedDataset,
    StartSubscription,
    SubscriptionStarted,
    SubscriptionEdges,
    SubscribeTo,
}

impl RoleMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::HelloParent { .. } => MessageKind::HelloParent,
            Self::GoodbyeParent => MessageKind::GoodbyeParent,
            Self::AbsorbTheseKids { .. } => MessageKind::AbsorbTheseKids,
            Self::FinishedAbsorbing { .. } => MessageKind::FinishedAbsorbing,
            Self::FinishedSplitting { .. } => MessageKind::FinishedSplitting,
            Self::SetLeafKey { .. } => MessageKind::SetLeafKey,
            Self::StartedDataset { .. } => MessageKind::StartedDataset,
            Self::StartSubscription { .. } => MessageKind::StartSubscription,
            Self::SubscriptionStarted { .. } => MessageKind::SubscriptionStarted,
            Self::SubscriptionEdges { .. } => MessageKind::SubscriptionEdges,
            Self::SubscribeTo { .. } => MessageKind::SubscribeTo,
        }
    }
}

/// Everything a node can receive from another node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeMessage {
    /// A message addressed to the role this node runs in the identified
    /// transaction
    Transaction {
        transaction_id: TransactionId,
        message: RoleMessage,
    },
    /// Instructs the node to construct and schedule a participant role
    StartParticipantRole {
        transaction_id: TransactionId,
        role: ParticipantConfig,
    },
    /// Out-of-band summary refresh from a kid
    KidSummary { summary: KidSummary },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: NodeId,
    pub message: NodeMessage,
}

impl Envelope {
    pub fn new(sender: NodeId, message: NodeMessage) -> Self {
        Self { sender, message }
    }
}
