/*
 * Created on Tue Mar 14 2023
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

//! The per-node actor.
//!
//! A data node is a single-threaded cooperative actor: it drains one ordered
//! mailbox, runs any number of transaction roles concurrently (at most one
//! per transaction) and mutates its own fields only from those roles. Roles
//! suspend exclusively inside `listen`, so between two suspension points a
//! role observes and mutates the node without interleaving.

pub mod api;
pub mod kids;
pub mod monitor;
pub mod publisher;
pub mod rate;

use self::api::{ApiRequest, CapacityInfo, DataLinkInfo, KidInfo, NodeStats};
use self::kids::{KidEntry, KidSet};
use self::monitor::Monitor;
use self::publisher::Publisher;
use self::rate::MessageRateTracker;
use crate::ids::{NodeId, TransactionId};
use crate::keyspace::{Interval, Key};
use crate::machine::{Machine, Terminator};
use crate::msg::{
    DataNodeConfig, DatasetProgramConfig, Envelope, KidSummary, NodeHandle, NodeMessage,
    ParticipantConfig, RoleMessage,
};
use crate::txn::{self, Originator, RoleSlot};
use crate::util::Error;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use tokio::sync::{mpsc, Notify};
use tokio::time::{self, Duration, Instant, MissedTickBehavior};

consts! {
    /// How many finished transaction ids to remember for straggler
    /// detection before forgetting the oldest
    FINISHED_TXN_MEMORY: usize = 4096;
}

pub struct DataNode {
    id: NodeId,
    machine: Machine,
    program_config: DatasetProgramConfig,
    started: Instant,
    start_role: RefCell<Option<(TransactionId, ParticipantConfig)>>,
    // tree state; mutated only by roles running on this node
    pub(crate) height: Cell<u32>,
    pub(crate) parent: RefCell<Option<NodeHandle>>,
    pub(crate) kids: RefCell<KidSet>,
    pub(crate) updated_summary: Cell<bool>,
    // transaction runtime state
    roles: RefCell<HashMap<TransactionId, Rc<RoleSlot>>>,
    pending: RefCell<HashMap<TransactionId, VecDeque<(RoleMessage, NodeId)>>>,
    finished: RefCell<(VecDeque<TransactionId>, HashSet<TransactionId>)>,
    queue: RefCell<VecDeque<Originator>>,
    queue_wakeup: Notify,
    // collaborating subsystems
    monitor: RefCell<Monitor>,
    pub(crate) publisher: RefCell<Publisher>,
    rate: RefCell<MessageRateTracker>,
    terminated: Cell<bool>,
}

impl DataNode {
    pub fn new(machine: Machine, config: DataNodeConfig) -> Rc<Self> {
        Rc::new(Self {
            id: config.id,
            machine,
            program_config: config.program_config,
            started: Instant::now(),
            start_role: RefCell::new(config.start_role),
            height: Cell::new(config.height),
            parent: RefCell::new(config.parent),
            kids: RefCell::new(KidSet::new(Key::Min, Some(Key::Max))),
            updated_summary: Cell::new(false),
            roles: RefCell::new(HashMap::new()),
            pending: RefCell::new(HashMap::new()),
            finished: RefCell::new((VecDeque::new(), HashSet::new())),
            queue: RefCell::new(VecDeque::new()),
            queue_wakeup: Notify::new(),
            monitor: RefCell::new(Monitor::new()),
            publisher: RefCell::new(Publisher::new()),
            rate: RefCell::new(MessageRateTracker::new()),
            terminated: Cell::new(false),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle::new(self.id)
    }

    pub fn height(&self) -> u32 {
        self.height.get()
    }

    pub fn is_root(&self) -> bool {
        self.parent.borrow().is_none()
    }

    pub(crate) fn machine(&self) -> &Machine {
        &self.machine
    }

    pub(crate) fn program_config(&self) -> &DatasetProgramConfig {
        &self.program_config
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// The message pump: dispatches envelopes, API requests and monitor
    /// ticks until the node terminates or the machine shuts down
    pub(crate) async fn run(
        self: Rc<Self>,
        mut inbox: mpsc::UnboundedReceiver<Envelope>,
        mut api: mpsc::UnboundedReceiver<ApiRequest>,
        mut terminator: Terminator,
    ) {
        let start_role = self.start_role.borrow_mut().take();
        if let Some((transaction_id, role)) = start_role {
            self.start_participant(transaction_id, role);
        }
        let tick_ms = self.machine.config().kid_summary_interval_ms;
        let mut ticker = time::interval(Duration::from_millis(tick_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                envelope = inbox.recv() => match envelope {
                    Some(envelope) => self.receive(envelope),
                    None => break,
                },
                request = api.recv() => match request {
                    Some(request) => self.handle_api(request),
                    None => break,
                },
                _ = ticker.tick() => {
                    self.start_transaction_eventually(Originator::CheckLimits { ms: tick_ms });
                }
                _ = terminator.receive_signal() => break,
            }
            if self.terminated.get() {
                break;
            }
        }
        log::debug!("node {} stopped its message pump", self.id);
    }

    /// Runs queued originator transactions one at a time. Serializing them
    /// keeps each structural transaction's view of the kid set exclusive
    pub(crate) async fn drive_transactions(self: Rc<Self>, mut terminator: Terminator) {
        loop {
            if self.terminated.get() {
                break;
            }
            let next = self.queue.borrow_mut().pop_front();
            match next {
                Some(originator) => {
                    let transaction_id = TransactionId::random();
                    let slot = self.install_role(transaction_id);
                    let controller = txn::RoleController::new(self.clone(), transaction_id, slot);
                    let name = originator.name();
                    let result = txn::run_originator(&controller, originator).await;
                    self.finish_transaction(transaction_id);
                    if let Err(e) = result {
                        self.fail(name, e);
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.queue_wakeup.notified() => {}
                        _ = terminator.receive_signal() => break,
                    }
                }
            }
        }
    }

    /// Queue an originator role to run the next time this node is idle
    pub(crate) fn start_transaction_eventually(&self, originator: Originator) {
        if self.terminated.get() {
            return;
        }
        self.queue.borrow_mut().push_back(originator);
        self.queue_wakeup.notify_one();
    }

    /// Schedule a limit check right away (roles call this as they wind down)
    pub(crate) fn check_limits(&self) {
        self.start_transaction_eventually(Originator::CheckLimits { ms: 0 });
    }

    fn receive(self: &Rc<Self>, envelope: Envelope) {
        let now = self.now_ms();
        self.rate.borrow_mut().increment(now);
        let Envelope { sender, message } = envelope;
        match message {
            NodeMessage::Transaction {
                transaction_id,
                message,
            } => self.deliver_transaction(transaction_id, message, sender),
            NodeMessage::StartParticipantRole {
                transaction_id,
                role,
            } => self.start_participant(transaction_id, role),
            NodeMessage::KidSummary { summary } => {
                let mut kids = self.kids.borrow_mut();
                if !kids.contains(sender) {
                    log::debug!(
                        "node {} ignoring a summary from {}, which is not a kid",
                        self.id,
                        sender
                    );
                    return;
                }
                let changed = kids.get(sender).and_then(|e| e.summary) != Some(summary);
                kids.set_summary(sender, summary);
                if changed {
                    self.updated_summary.set(true);
                }
            }
        }
    }

    fn deliver_transaction(&self, transaction_id: TransactionId, message: RoleMessage, sender: NodeId) {
        let slot = self.roles.borrow().get(&transaction_id).cloned();
        match slot {
            Some(slot) => slot.deliver(message, sender),
            None => {
                if self.finished.borrow().1.contains(&transaction_id) {
                    log::debug!(
                        "node {} dropping a {:?} straggler for finished {}",
                        self.id,
                        message.kind(),
                        transaction_id
                    );
                } else {
                    // the role has not started yet; hold the message until
                    // the start_participant_role instruction lands
                    self.pending
                        .borrow_mut()
                        .entry(transaction_id)
                        .or_default()
                        .push_back((message, sender));
                }
            }
        }
    }

    fn install_role(&self, transaction_id: TransactionId) -> Rc<RoleSlot> {
        let slot = Rc::new(RoleSlot::new());
        self.roles.borrow_mut().insert(transaction_id, slot.clone());
        if let Some(buffered) = self.pending.borrow_mut().remove(&transaction_id) {
            for (message, sender) in buffered {
                slot.deliver(message, sender);
            }
        }
        slot
    }

    fn start_participant(self: &Rc<Self>, transaction_id: TransactionId, role: ParticipantConfig) {
        if self.roles.borrow().contains_key(&transaction_id) {
            self.fail(
                role.name(),
                Error::internal(format!(
                    "a role for {} is already running on this node",
                    transaction_id
                )),
            );
            return;
        }
        log::debug!(
            "node {} starting participant {} for {}",
            self.id,
            role.name(),
            transaction_id
        );
        let slot = self.install_role(transaction_id);
        let controller = txn::RoleController::new(self.clone(), transaction_id, slot);
        let node = self.clone();
        tokio::task::spawn_local(async move {
            let name = role.name();
            let result = txn::run_participant(&controller, role).await;
            node.finish_transaction(transaction_id);
            if let Err(e) = result {
                node.fail(name, e);
            }
        });
    }

    fn finish_transaction(&self, transaction_id: TransactionId) {
        self.roles.borrow_mut().remove(&transaction_id);
        self.pending.borrow_mut().remove(&transaction_id);
        let mut finished = self.finished.borrow_mut();
        finished.0.push_back(transaction_id);
        finished.1.insert(transaction_id);
        while finished.0.len() > FINISHED_TXN_MEMORY {
            if let Some(evicted) = finished.0.pop_front() {
                finished.1.remove(&evicted);
            }
        }
    }

    /// Leave the system. The machine drops the routes, which unwinds the
    /// pump and the transaction driver
    pub(crate) fn terminate(&self) {
        if self.terminated.replace(true) {
            return;
        }
        log::debug!("node {} terminating", self.id);
        self.machine.terminate_node(self.id);
        self.queue_wakeup.notify_one();
    }

    /// A role observed a protocol violation: abort the node
    pub(crate) fn fail(&self, role: &str, error: Error) {
        log::error!("node {} aborting: {} failed with: {}", self.id, role, error);
        self.terminate();
    }

    // ---- summaries & capacity ----

    pub(crate) fn kid_summary_message(&self) -> KidSummary {
        let kids = self.kids.borrow();
        let height = self.height.get();
        let size = if height <= 1 {
            kids.len() as u64
        } else {
            kids.summaries().map(|(_, s)| s.size).sum()
        };
        KidSummary {
            size,
            n_kids: kids.len() as u64,
            height,
            messages_per_second: self.estimated_messages_per_second(),
        }
    }

    pub(crate) fn send_kid_summary(&self) {
        let parent = *self.parent.borrow();
        if let Some(parent) = parent {
            let summary = self.kid_summary_message();
            self.machine.send(
                &parent,
                Envelope::new(self.id, NodeMessage::KidSummary { summary }),
            );
        }
    }

    pub(crate) fn estimated_messages_per_second(&self) -> f64 {
        let now = self.now_ms();
        self.rate.borrow_mut().estimate_rate_hz(now)
    }

    /// The capacity of one kid: how many leaves a full subtree of the kid's
    /// height can hold
    pub(crate) fn kid_capacity_limit(&self) -> u64 {
        let limit = self.machine.config().data_node_kids_limit;
        let height = self.height.get();
        if height <= 1 {
            limit
        } else {
            limit.saturating_pow(height - 1)
        }
    }

    /// Whether the remaining capacity across all summarized kids has fallen
    /// to the configured trigger
    pub(crate) fn out_of_capacity(&self) -> bool {
        let kids = self.kids.borrow();
        let cap = self.kid_capacity_limit() as i64;
        let total: i64 = kids.summaries().map(|(_, s)| cap - s.size as i64).sum();
        total <= self.machine.config().total_kid_capacity_trigger as i64
    }

    // ---- merge candidates ----

    pub(crate) fn kids_are_mergeable(&self, left: NodeId, right: NodeId) -> bool {
        let kids = self.kids.borrow();
        self.mergeable_in(&kids, left, right)
    }

    fn mergeable_in(&self, kids: &KidSet, left: NodeId, right: NodeId) -> bool {
        if kids.right_neighbor(left) != Some(right) {
            return false;
        }
        let summaries = match (kids.get(left), kids.get(right)) {
            (Some(l), Some(r)) => l.summary.zip(r.summary),
            _ => None,
        };
        let Some((l, r)) = summaries else {
            return false;
        };
        l.height == r.height
            && l.size + r.size < self.kid_capacity_limit()
            && l.n_kids + r.n_kids <= self.machine.config().data_node_kids_limit
    }

    /// The first adjacent mergeable pair not touching `excluded`, in
    /// interval order
    pub(crate) fn best_mergeable_kids(
        &self,
        excluded: &HashSet<NodeId>,
    ) -> Option<(NodeId, NodeId)> {
        let kids = self.kids.borrow();
        kids.adjacent_pairs()
            .into_iter()
            .filter(|(l, r)| !excluded.contains(l) && !excluded.contains(r))
            .find(|(l, r)| self.mergeable_in(&kids, *l, *r))
    }

    /// One monitor pass; runs inside the `CheckLimits` transaction
    pub(crate) fn monitor_pass(&self, ms: u64) -> crate::util::TreeResult<()> {
        let mut monitor = self.monitor.borrow_mut();
        monitor.check(self, ms)
    }

    // ---- subscription support ----

    /// Kid intervals with open right endpoints patched to the next kid's
    /// start (the rightmost one to this node's own right endpoint)
    pub(crate) fn patched_kid_intervals(&self) -> Vec<(NodeId, Interval)> {
        let kids = self.kids.borrow();
        let mut out: Vec<(NodeId, Interval)> = Vec::with_capacity(kids.len());
        for (id, entry) in kids.iter() {
            if let Some(last) = out.last_mut() {
                if last.1.hi.is_none() {
                    last.1.hi = Some(entry.interval.lo);
                }
            }
            out.push((id, entry.interval));
        }
        if let Some(last) = out.last_mut() {
            if last.1.hi.is_none() {
                last.1.hi = kids.right();
            }
        }
        out
    }

    // ---- API surface ----

    fn handle_api(&self, request: ApiRequest) {
        match request {
            ApiRequest::GetKids(resp) => {
                let kids = self.kids.borrow();
                let infos = kids
                    .iter()
                    .map(|(_, e)| KidInfo {
                        handle: e.handle,
                        interval: e.interval,
                        summary: e.summary,
                    })
                    .collect();
                let _ = resp.send(infos);
            }
            ApiRequest::GetStats(resp) => {
                let summary = self.kid_summary_message();
                let _ = resp.send(NodeStats {
                    id: self.id,
                    height: self.height.get(),
                    size: summary.size,
                    n_kids: summary.n_kids,
                    parent: *self.parent.borrow(),
                });
            }
            ApiRequest::GetInterval(resp) => {
                let _ = resp.send(self.kids.borrow().interval());
            }
            ApiRequest::GetCapacity(resp) => {
                let _ = resp.send(CapacityInfo {
                    height: self.height.get(),
                    n_kids: self.kids.borrow().len() as u64,
                    kids_limit: self.machine.config().data_node_kids_limit,
                    out_of_capacity: self.out_of_capacity(),
                });
            }
            ApiRequest::GetSenders(resp) => {
                let publisher = self.publisher.borrow();
                let _ = resp.send(
                    publisher
                        .outputs()
                        .map(|(k, h)| (k.clone(), *h))
                        .collect(),
                );
            }
            ApiRequest::GetReceivers(resp) => {
                let publisher = self.publisher.borrow();
                let _ = resp.send(publisher.inputs().map(|(k, h)| (k.clone(), *h)).collect());
            }
            ApiRequest::GetLeftmostKids(resp) => {
                let kids = self.kids.borrow();
                let _ = resp.send(kids.iter().map(|(_, e)| e.handle).collect());
            }
            ApiRequest::GetDataLink { link_key, resp } => {
                let publisher = self.publisher.borrow();
                let known = publisher.input(&link_key).is_some()
                    || publisher.output(&link_key).is_some()
                    || publisher.edges(&link_key).is_some();
                let _ = resp.send(known.then(|| DataLinkInfo {
                    input: publisher.input(&link_key).copied(),
                    output: publisher.output(&link_key).copied(),
                    edges: publisher.edges(&link_key).cloned().unwrap_or_default(),
                    link_key,
                }));
            }
            ApiRequest::RemoveLeaf { kid_id } => {
                self.start_transaction_eventually(Originator::RemoveLeaf { kid_id });
            }
            ApiRequest::KillNode => self.terminate(),
        }
    }

    // ---- helpers for roles ----

    /// Pick a fresh key strictly inside this node's interval
    pub(crate) fn new_kid_key(&self) -> Key {
        let mut rng = self.machine.rng();
        self.kids.borrow().new_kid_key(&mut *rng)
    }

    /// Shrink this node's interval from the right, detaching the kids past
    /// the new endpoint
    pub(crate) fn shrink_kids_right(&self) -> (Key, Vec<KidEntry>) {
        let mut rng = self.machine.rng();
        self.kids.borrow_mut().shrink_right(&mut *rng)
    }
}
