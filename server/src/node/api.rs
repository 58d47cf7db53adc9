/*
 * Created on Sun Mar 12 2023
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

//! Synchronous request/response surface of a node. API requests travel over
//! a dedicated local channel, not the wire: they carry reply senders, so they
//! are deliberately kept out of the serializable message schema.

use crate::ids::{LinkKey, NodeId};
use crate::keyspace::Interval;
use crate::msg::{KidSummary, NodeHandle};
use std::collections::BTreeMap;
use tokio::sync::oneshot;

#[derive(Debug)]
pub enum ApiRequest {
    GetKids(oneshot::Sender<Vec<KidInfo>>),
    GetStats(oneshot::Sender<NodeStats>),
    GetInterval(oneshot::Sender<Interval>),
    GetCapacity(oneshot::Sender<CapacityInfo>),
    GetSenders(oneshot::Sender<Vec<(LinkKey, NodeHandle)>>),
    GetReceivers(oneshot::Sender<Vec<(LinkKey, NodeHandle)>>),
    GetLeftmostKids(oneshot::Sender<Vec<NodeHandle>>),
    GetDataLink {
        link_key: LinkKey,
        resp: oneshot::Sender<Option<DataLinkInfo>>,
    },
    /// Schedule a `RemoveLeaf` transaction for the identified kid
    RemoveLeaf { kid_id: NodeId },
    KillNode,
}

#[derive(Debug, Clone)]
pub struct KidInfo {
    pub handle: NodeHandle,
    pub interval: Interval,
    pub summary: Option<KidSummary>,
}

#[derive(Debug, Clone)]
pub struct NodeStats {
    pub id: NodeId,
    pub height: u32,
    pub size: u64,
    pub n_kids: u64,
    pub parent: Option<NodeHandle>,
}

#[derive(Debug, Clone)]
pub struct CapacityInfo {
    pub height: u32,
    pub n_kids: u64,
    pub kids_limit: u64,
    pub out_of_capacity: bool,
}

/// The recorded outcome of a subscription handshake for one link key
#[derive(Debug, Clone)]
pub struct DataLinkInfo {
    pub link_key: LinkKey,
    pub input: Option<NodeHandle>,
    pub output: Option<NodeHandle>,
    pub edges: BTreeMap<NodeId, Vec<NodeId>>,
}
