/*
 * Created on Thu Mar 23 2023
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

//! A raw endpoint registered in the machine's route table. The rig plays the
//! link side of subscription handshakes over real envelopes: it can start
//! participant roles on data nodes, exchange transaction messages with them
//! and match replies by kind, like a role's matcher would.

use crate::ids::{NodeId, TransactionId};
use crate::machine::Machine;
use crate::msg::{
    Envelope, MessageKind, NodeHandle, NodeMessage, ParticipantConfig, RoleHandle, RoleMessage,
};
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc;

pub struct LinkRig {
    machine: Machine,
    id: NodeId,
    mailbox: mpsc::UnboundedReceiver<Envelope>,
    buffered: HashMap<MessageKind, VecDeque<(RoleMessage, NodeId)>>,
}

impl LinkRig {
    pub fn new(machine: &Machine) -> Self {
        let id = NodeId::random();
        let mailbox = machine.register_endpoint(id);
        Self {
            machine: machine.clone(),
            id,
            mailbox,
            buffered: HashMap::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle::new(self.id)
    }

    pub fn role(&self, transaction_id: TransactionId) -> RoleHandle {
        RoleHandle::new(self.handle(), transaction_id)
    }

    /// Enlist a node into a transaction, the way an owning role would
    pub fn start_participant(
        &self,
        target: NodeHandle,
        transaction_id: TransactionId,
        role: ParticipantConfig,
    ) {
        self.machine.send(
            &target,
            Envelope::new(
                self.id,
                NodeMessage::StartParticipantRole {
                    transaction_id,
                    role,
                },
            ),
        );
    }

    pub fn send(&self, to: &RoleHandle, message: RoleMessage) {
        self.machine.send(
            &to.node,
            Envelope::new(
                self.id,
                NodeMessage::Transaction {
                    transaction_id: to.transaction_id,
                    message,
                },
            ),
        );
    }

    /// Wait for the next transaction message of the given kind; everything
    /// else that arrives in the meantime is buffered
    pub async fn recv(&mut self, kind: MessageKind) -> (RoleMessage, NodeId) {
        if let Some(queue) = self.buffered.get_mut(&kind) {
            if let Some(ready) = queue.pop_front() {
                return ready;
            }
        }
        loop {
            let envelope = self.mailbox.recv().await.expect("the rig mailbox closed");
            if let NodeMessage::Transaction { message, .. } = envelope.message {
                if message.kind() == kind {
                    return (message, envelope.sender);
                }
                self.buffered
                    .entry(message.kind())
                    .or_default()
                    .push_back((message, envelope.sender));
            }
        }
    }

    /// Receive a `hello_parent` and return the announcing role's handle
    pub async fn recv_hello(&mut self) -> (RoleHandle, NodeId) {
        let (message, sender) = self.recv(MessageKind::HelloParent).await;
        match message {
            RoleMessage::HelloParent { kid, .. } => (kid, sender),
            _ => unreachable!("recv matched on kind"),
        }
    }
}
