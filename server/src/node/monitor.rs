/*
 * Created on Wed Mar 15 2023
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

//! The periodic local health check.
//!
//! Every monitor pass runs inside a dedicated no-op `CheckLimits`
//! transaction, so its structural decisions are serialized with the other
//! transactions originated by this node: a scheduled split or merge always
//! runs before the next pass re-evaluates the tree.

use super::DataNode;
use crate::ids::NodeId;
use crate::txn::Originator;
use crate::util::{Error, TreeResult};
use std::collections::{HashMap, HashSet};

consts! {
    /// How long a pair of kids must stay mergeable before a merge is
    /// scheduled
    TIME_TO_WAIT_BEFORE_KID_MERGE_MS: u64 = 2 * 1000;
    /// How long a root must continuously have a proxy before consuming it
    TIME_TO_WAIT_BEFORE_CONSUME_PROXY_MS: u64 = 4 * 1000;
    /// Roots never shrink below this height: the serving layer below the
    /// root must stay addressable
    ROOT_HEIGHT_FLOOR: u32 = 2;
}

#[derive(Debug)]
pub struct Monitor {
    time_since_no_consumable_proxy: u64,
    /// Limits repeated warnings while capacity stays low
    warned_low_capacity: bool,
    /// Mergeable pairs and how long they have been mergeable
    pair_timers: HashMap<(NodeId, NodeId), u64>,
    /// Every id appearing in `pair_timers`
    watched_ids: HashSet<NodeId>,
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            time_since_no_consumable_proxy: 0,
            warned_low_capacity: false,
            pair_timers: HashMap::new(),
            watched_ids: HashSet::new(),
        }
    }

    /// One pass over all limits; `ms` is the simulated time since the last
    /// pass
    pub fn check(&mut self, node: &DataNode, ms: u64) -> TreeResult<()> {
        if node.updated_summary.get() || node.height() == 1 {
            node.send_kid_summary();
            node.updated_summary.set(false);
        }
        self.check_for_low_capacity(node)?;
        self.check_for_mergeable_kids(node, ms);
        self.check_for_consumable_proxy(node, ms);
        Ok(())
    }

    /// Check whether the total capacity of this node's kids is too low
    fn check_for_low_capacity(&mut self, node: &DataNode) -> TreeResult<()> {
        if node.height() <= 1 {
            // nodes of height <= 1 never address low capacity themselves
            return Ok(());
        }
        if node.kids.borrow().is_empty() {
            // an in-flight absorption can empty the kid set between two
            // role steps; there is nothing to split or bump here
            return Ok(());
        }
        if !node.kids.borrow().all_summaries_known() {
            // wait till we have summaries for all our kids
            return Ok(());
        }
        if node.out_of_capacity() {
            let n_kids = node.kids.borrow().len() as u64;
            if n_kids < node.machine().config().data_node_kids_limit {
                self.schedule_split(node)?;
            } else if node.is_root() {
                node.start_transaction_eventually(Originator::BumpHeight);
            } else {
                node.send_kid_summary();
                if !self.warned_low_capacity {
                    self.warned_low_capacity = true;
                    log::warn!(
                        "node {} has too little capacity and no room to spawn more kids; \
                         capacity remains low and is not being increased",
                        node.id()
                    );
                }
            }
        } else {
            self.warned_low_capacity = false;
        }
        Ok(())
    }

    /// Schedule a split of the kid with the most grandkids
    fn schedule_split(&self, node: &DataNode) -> TreeResult<()> {
        let mut best: Option<(NodeId, u64)> = None;
        {
            let kids = node.kids.borrow();
            for (id, summary) in kids.summaries() {
                if best.map_or(true, |(_, fitness)| summary.n_kids >= fitness) {
                    best = Some((id, summary.n_kids));
                }
            }
        }
        let (kid_id, fitness) = best.ok_or_else(|| {
            Error::internal("the monitor tried to split when no suitable kids exist")
        })?;
        if fitness <= 1 {
            // a node that is low on capacity must have kids that themselves
            // have more than one kid
            return Err(Error::internal(
                "the monitor tried to split when no kid has more than one kid",
            ));
        }
        node.start_transaction_eventually(Originator::SplitKid { kid_id });
        Ok(())
    }

    /// Check whether any two adjacent kids should be merged
    fn check_for_mergeable_kids(&mut self, node: &DataNode, ms: u64) {
        if node.height() <= 1 {
            return;
        }
        let watched: Vec<(NodeId, NodeId)> = self.pair_timers.keys().copied().collect();
        for pair in watched {
            let waited = {
                let timer = self.pair_timers.entry(pair).or_insert(0);
                *timer += ms;
                *timer
            };
            if !node.kids_are_mergeable(pair.0, pair.1) {
                // no longer mergeable, forget about them
                self.unwatch(pair);
            } else if waited >= TIME_TO_WAIT_BEFORE_KID_MERGE_MS {
                self.unwatch(pair);
                node.start_transaction_eventually(Originator::MergeKids {
                    left: pair.0,
                    right: pair.1,
                });
            }
        }
        while let Some(pair) = node.best_mergeable_kids(&self.watched_ids) {
            self.watch(pair);
        }
    }

    fn watch(&mut self, pair: (NodeId, NodeId)) {
        self.pair_timers.insert(pair, 0);
        self.watched_ids.insert(pair.0);
        self.watched_ids.insert(pair.1);
    }

    fn unwatch(&mut self, pair: (NodeId, NodeId)) {
        self.pair_timers.remove(&pair);
        self.watched_ids.remove(&pair.0);
        self.watched_ids.remove(&pair.1);
    }

    /// Check whether the root's unique child should be absorbed
    fn check_for_consumable_proxy(&mut self, node: &DataNode, ms: u64) {
        if !node.is_root() || node.height() <= ROOT_HEIGHT_FLOOR {
            return;
        }
        if node.kids.borrow().get_proxy().is_some() {
            self.time_since_no_consumable_proxy += ms;
            if self.time_since_no_consumable_proxy >= TIME_TO_WAIT_BEFORE_CONSUME_PROXY_MS {
                node.start_transaction_eventually(Originator::ConsumeProxy);
            }
        } else {
            self.time_since_no_consumable_proxy = 0;
        }
    }
}
