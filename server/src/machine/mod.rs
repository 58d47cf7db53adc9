/*
 * Created on Mon Mar 13 2023
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

//! The in-process machine controller.
//!
//! The controller owns the route table, spawns nodes onto the local
//! single-threaded scheduler, supplies seedable randomness and fans the
//! shutdown signal out to every task it started. Delivery is reliable and
//! in-order per (sender, receiver) pair: each node drains one ordered
//! mailbox.

use crate::config::SystemConfig;
use crate::ids::NodeId;
use crate::msg::{DataNodeConfig, Envelope, NodeHandle};
use crate::node::api::ApiRequest;
use crate::node::DataNode;
use crate::util::{Error, TreeResult};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::{RefCell, RefMut};
use std::collections::HashMap;
use std::rc::Rc;
use tokio::sync::{broadcast, mpsc, oneshot};

mod client;
pub use client::ApiClient;

/// A listener for the machine-wide termination signal
pub struct Terminator {
    terminate: bool,
    signal: broadcast::Receiver<()>,
}

impl Terminator {
    pub const fn new(signal: broadcast::Receiver<()>) -> Self {
        Self {
            terminate: false,
            signal,
        }
    }
    /// Wait for the machine to signal termination
    pub async fn receive_signal(&mut self) {
        if self.terminate {
            return;
        }
        let _ = self.signal.recv().await;
        self.terminate = true;
    }
}

struct MachineInner {
    config: SystemConfig,
    rng: RefCell<StdRng>,
    routes: RefCell<HashMap<NodeId, mpsc::UnboundedSender<Envelope>>>,
    apis: RefCell<HashMap<NodeId, mpsc::UnboundedSender<ApiRequest>>>,
    nodes: RefCell<HashMap<NodeId, Rc<DataNode>>>,
    shutdown: broadcast::Sender<()>,
}

/// Cheaply cloneable handle to the machine controller
#[derive(Clone)]
pub struct Machine {
    inner: Rc<MachineInner>,
}

impl Machine {
    pub fn new(config: SystemConfig) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        let seed = config.seed;
        Self {
            inner: Rc::new(MachineInner {
                config,
                rng: RefCell::new(StdRng::seed_from_u64(seed)),
                routes: RefCell::new(HashMap::new()),
                apis: RefCell::new(HashMap::new()),
                nodes: RefCell::new(HashMap::new()),
                shutdown,
            }),
        }
    }

    pub fn config(&self) -> &SystemConfig {
        &self.inner.config
    }

    /// The machine's key sampler. Seeded once at startup (and on
    /// [`Machine::reseed`]) so trees are reproducible
    pub fn rng(&self) -> RefMut<'_, StdRng> {
        self.inner.rng.borrow_mut()
    }

    /// Reset the key sampler. Meant for reproducing exact trees across
    /// machines and runs
    pub fn reseed(&self, seed: u64) {
        *self.inner.rng.borrow_mut() = StdRng::seed_from_u64(seed);
    }

    pub fn terminator(&self) -> Terminator {
        Terminator::new(self.inner.shutdown.subscribe())
    }

    /// Signal every task on this machine to shut down
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(());
    }

    /// Create a node on this machine. The returned handle is valid
    /// immediately; the node's start role (if any) is its first action
    pub fn spawn_node(&self, config: DataNodeConfig) -> NodeHandle {
        let id = config.id;
        let height = config.height;
        let (route_tx, route_rx) = mpsc::unbounded_channel();
        let (api_tx, api_rx) = mpsc::unbounded_channel();
        let node = DataNode::new(self.clone(), config);
        self.inner.routes.borrow_mut().insert(id, route_tx);
        self.inner.apis.borrow_mut().insert(id, api_tx);
        self.inner.nodes.borrow_mut().insert(id, node.clone());
        tokio::task::spawn_local(node.clone().run(route_rx, api_rx, self.terminator()));
        tokio::task::spawn_local(node.drive_transactions(self.terminator()));
        log::debug!("spawned node {} at height {}", id, height);
        NodeHandle::new(id)
    }

    /// Tear a node down: its mailboxes are closed and its tasks unwind on
    /// their next dispatch
    pub fn terminate_node(&self, id: NodeId) {
        self.inner.routes.borrow_mut().remove(&id);
        self.inner.apis.borrow_mut().remove(&id);
        self.inner.nodes.borrow_mut().remove(&id);
        log::debug!("terminated node {}", id);
    }

    /// Deliver an envelope. Messages to departed nodes are dropped; the
    /// protocol tolerates stragglers by design of the role lifecycles
    pub fn send(&self, to: &NodeHandle, envelope: Envelope) {
        let routes = self.inner.routes.borrow();
        match routes.get(&to.id) {
            Some(tx) => {
                let _ = tx.send(envelope);
            }
            None => log::debug!("dropping a message addressed to departed node {}", to.id),
        }
    }

    /// Register a raw endpoint in the route table and return its mailbox.
    /// This is how an external collaborator (the link subsystem, or a test
    /// rig) takes part in a handshake without being a data node
    pub fn register_endpoint(&self, id: NodeId) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.routes.borrow_mut().insert(id, tx);
        rx
    }

    /// The API surface of a node hosted on this machine
    pub fn api(&self, id: NodeId) -> TreeResult<ApiClient> {
        let apis = self.inner.apis.borrow();
        apis.get(&id)
            .map(|tx| ApiClient::new(tx.clone()))
            .ok_or_else(|| Error::internal(format!("no node {} on this machine", id)))
    }

    #[cfg(test)]
    pub(crate) fn node(&self, id: NodeId) -> Option<Rc<DataNode>> {
        self.inner.nodes.borrow().get(&id).cloned()
    }
}

pub(crate) fn api_roundtrip_err() -> Error {
    Error::internal("the node went away while serving an API request")
}

pub(crate) async fn api_roundtrip<T>(
    tx: &mpsc::UnboundedSender<ApiRequest>,
    req: ApiRequest,
    rx: oneshot::Receiver<T>,
) -> TreeResult<T> {
    tx.send(req).map_err(|_| api_roundtrip_err())?;
    rx.await.map_err(|_| api_roundtrip_err())
}
