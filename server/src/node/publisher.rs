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

//! Per-node registry of link counterparties established by the subscription
//! handshake. The data flow itself belongs to the link subsystem; the control
//! plane only remembers who it talks to under which link key.

use crate::ids::{LinkKey, NodeId};
use crate::msg::NodeHandle;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
pub struct Publisher {
    inputs: HashMap<LinkKey, NodeHandle>,
    outputs: HashMap<LinkKey, NodeHandle>,
    /// The final `subscription_edges` of a handshake, recorded on the
    /// receiving side: target kid id -> the sender kids feeding it
    edges: HashMap<LinkKey, BTreeMap<NodeId, Vec<NodeId>>>,
}

impl Publisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_input(&mut self, link_key: LinkKey, counterparty: NodeHandle) {
        self.inputs.insert(link_key, counterparty);
    }

    pub fn subscribe_output(&mut self, link_key: LinkKey, counterparty: NodeHandle) {
        self.outputs.insert(link_key, counterparty);
    }

    pub fn record_edges(&mut self, link_key: LinkKey, edges: BTreeMap<NodeId, Vec<NodeId>>) {
        self.edges.insert(link_key, edges);
    }

    pub fn inputs(&self) -> impl Iterator<Item = (&LinkKey, &NodeHandle)> {
        self.inputs.iter()
    }

    pub fn outputs(&self) -> impl Iterator<Item = (&LinkKey, &NodeHandle)> {
        self.outputs.iter()
    }

    pub fn input(&self, link_key: &LinkKey) -> Option<&NodeHandle> {
        self.inputs.get(link_key)
    }

    pub fn output(&self, link_key: &LinkKey) -> Option<&NodeHandle> {
        self.outputs.get(link_key)
    }

    pub fn edges(&self, link_key: &LinkKey) -> Option<&BTreeMap<NodeId, Vec<NodeId>>> {
        self.edges.get(link_key)
    }
}
