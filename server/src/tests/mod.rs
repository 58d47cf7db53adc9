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

//! End-to-end scenarios for the control plane. Every test runs a whole
//! machine on the paused clock: simulated waits cost no wall time, and the
//! fixed seed makes trees reproducible.

mod rig;

use self::rig::LinkRig;
use crate::config::SystemConfig;
use crate::ids::{LinkKey, NodeId, TransactionId};
use crate::keyspace::{Interval, Key};
use crate::machine::Machine;
use crate::msg::{
    DataNodeConfig, DatasetProgramConfig, MessageKind, NodeHandle, ParticipantConfig, RoleMessage,
};
use crate::txn::Originator;
use std::collections::{BTreeMap, HashSet};
use tokio::task::LocalSet;
use tokio::time::{self, Duration};

fn test_config() -> SystemConfig {
    SystemConfig {
        data_node_kids_limit: 3,
        total_kid_capacity_trigger: 0,
        kid_summary_interval_ms: 200,
        seed: 0xda7a,
        root_height: 2,
    }
}

fn roomy_config() -> SystemConfig {
    SystemConfig {
        data_node_kids_limit: 10,
        ..test_config()
    }
}

fn spawn_dataset(machine: &Machine, height: u32) -> NodeHandle {
    machine.spawn_node(DataNodeConfig {
        id: NodeId::random(),
        parent: None,
        height,
        program_config: DatasetProgramConfig::default(),
        start_role: Some((
            TransactionId::random(),
            ParticipantConfig::NewDataset { requester: None },
        )),
    })
}

async fn settle(ms: u64) {
    time::sleep(Duration::from_millis(ms)).await;
}

/// Descend to a height-1 node the way the routing layer would: towards the
/// emptiest subtree
async fn find_leaf_parent(machine: &Machine, root: NodeHandle) -> NodeHandle {
    let mut current = root;
    loop {
        // a concurrent merge may tear the current node down; restart from
        // the root when that happens
        let Ok(api) = machine.api(current.id) else {
            current = root;
            continue;
        };
        let Ok(stats) = api.get_stats().await else {
            current = root;
            continue;
        };
        if stats.height <= 1 {
            return current;
        }
        let Ok(kids) = api.get_kids().await else {
            current = root;
            continue;
        };
        match kids
            .iter()
            .min_by_key(|kid| kid.summary.map(|s| s.size).unwrap_or(0))
        {
            Some(best) => current = best.handle,
            None => {
                // the first kid of a fresh dataset may still be spawning
                settle(50).await;
            }
        }
    }
}

async fn add_leaf(machine: &Machine, root: NodeHandle) -> NodeHandle {
    let parent = find_leaf_parent(machine, root).await;
    machine.spawn_node(DataNodeConfig {
        id: NodeId::random(),
        parent: Some(parent),
        height: 0,
        program_config: DatasetProgramConfig::default(),
        start_role: Some((
            TransactionId::random(),
            ParticipantConfig::AddLeaf { parent },
        )),
    })
}

async fn collect_leaves(machine: &Machine, root: NodeHandle) -> Vec<NodeHandle> {
    let mut leaves = Vec::new();
    let mut queue = vec![root];
    while let Some(handle) = queue.pop() {
        let Ok(api) = machine.api(handle.id) else {
            continue;
        };
        let stats = api.get_stats().await.unwrap();
        if stats.height == 0 {
            leaves.push(handle);
            continue;
        }
        for kid in api.get_kids().await.unwrap() {
            queue.push(kid.handle);
        }
    }
    leaves
}

/// Remove a leaf through its current parent, then tear the leaf node down.
/// Re-resolves the parent because a concurrent merge or split may foster the
/// leaf away between the lookup and the removal
async fn kill_leaf(machine: &Machine, leaf: NodeHandle) {
    for _ in 0..8 {
        let Ok(leaf_api) = machine.api(leaf.id) else {
            return;
        };
        let Ok(stats) = leaf_api.get_stats().await else {
            return;
        };
        let Some(parent) = stats.parent else {
            return;
        };
        let Ok(parent_api) = machine.api(parent.id) else {
            continue;
        };
        let _ = parent_api.remove_leaf(leaf.id);
        settle(300).await;
        // confirm the leaf's current parent no longer lists it
        let Ok(leaf_api) = machine.api(leaf.id) else {
            return;
        };
        let Ok(stats) = leaf_api.get_stats().await else {
            return;
        };
        let removed = match stats.parent {
            Some(current) => match machine.api(current.id) {
                Ok(api) => !api
                    .get_kids()
                    .await
                    .unwrap_or_default()
                    .iter()
                    .any(|kid| kid.handle.id == leaf.id),
                Err(_) => true,
            },
            None => true,
        };
        if removed {
            break;
        }
    }
    if let Ok(api) = machine.api(leaf.id) {
        let _ = api.kill_node();
    }
}

async fn root_height(machine: &Machine, root: NodeHandle) -> u32 {
    machine
        .api(root.id)
        .unwrap()
        .get_stats()
        .await
        .unwrap()
        .height
}

/// Poll until the root reaches the given height, or panic after `max_ms` of
/// simulated time
async fn wait_for_height(machine: &Machine, root: NodeHandle, target: u32, max_ms: u64) {
    let mut waited = 0;
    loop {
        if root_height(machine, root).await == target {
            return;
        }
        assert!(
            waited < max_ms,
            "root never reached height {} within {} ms",
            target,
            max_ms
        );
        settle(500).await;
        waited += 500;
    }
}

/// Walk the whole tree and check the partition, height and parent-link
/// invariants at a quiescent instant
async fn assert_tree_invariants(machine: &Machine, root: NodeHandle) {
    let mut queue = vec![root];
    while let Some(handle) = queue.pop() {
        let api = machine.api(handle.id).unwrap();
        let stats = api.get_stats().await.unwrap();
        if stats.height == 0 {
            continue;
        }
        let interval = api.get_interval().await.unwrap();
        let kids = api.get_kids().await.unwrap();
        for kid in &kids {
            let kid_stats = machine.api(kid.handle.id).unwrap().get_stats().await.unwrap();
            assert_eq!(
                kid_stats.height + 1,
                stats.height,
                "height invariant broken between {} and {}",
                handle.id,
                kid.handle.id
            );
            assert_eq!(
                kid_stats.parent,
                Some(handle),
                "parent link broken at {}",
                kid.handle.id
            );
        }
        if stats.height >= 2 {
            assert!(!kids.is_empty(), "interior node {} has no kids", handle.id);
            for kid in &kids {
                assert!(
                    kid.interval.is_subinterval_of(&interval),
                    "kid {} spills out of {}",
                    kid.handle.id,
                    handle.id
                );
            }
            assert_eq!(
                kids[0].interval.lo, interval.lo,
                "partition broken at the left edge of {}",
                handle.id
            );
            let mut prev_hi = None;
            for kid in &kids {
                if let Some(prev) = prev_hi {
                    assert_eq!(
                        Some(kid.interval.lo),
                        prev,
                        "kid intervals do not abut inside {}",
                        handle.id
                    );
                }
                prev_hi = Some(kid.interval.hi);
            }
            assert_eq!(
                prev_hi.expect("at least one kid"),
                interval.hi,
                "partition broken at the right edge of {}",
                handle.id
            );
            queue.extend(kids.iter().map(|kid| kid.handle));
        } else {
            // a leaf parent: keys strictly increasing, inside the interval
            let mut prev: Option<Key> = None;
            for kid in &kids {
                assert!(kid.interval.lo >= interval.lo);
                if let Some(prev) = prev {
                    assert!(kid.interval.lo > prev, "leaf keys collide in {}", handle.id);
                }
                prev = Some(kid.interval.lo);
            }
        }
    }
}

// ---- scenarios ----

#[tokio::test(start_paused = true)]
async fn empty_tree_stays_idle() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let machine = Machine::new(test_config());
            let root = spawn_dataset(&machine, 0);
            settle(200).await;
            let api = machine.api(root.id).unwrap();
            assert!(api.get_kids().await.unwrap().is_empty());
            assert_eq!(api.get_interval().await.unwrap(), Interval::full());
            machine.shutdown();
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn a_single_leaf_joins_the_tree() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let machine = Machine::new(test_config());
            let root = spawn_dataset(&machine, 2);
            settle(300).await;
            let leaf = add_leaf(&machine, root).await;
            settle(2000).await;

            let leaves = collect_leaves(&machine, root).await;
            assert_eq!(leaves.len(), 1);
            assert_eq!(leaves[0], leaf);
            let interval = machine.api(leaf.id).unwrap().get_interval().await.unwrap();
            assert!(Key::Min < interval.lo && interval.lo < Key::Max);
            assert_eq!(interval.hi, None);
            machine.shutdown();
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn the_tree_grows_under_load_and_shrinks_when_it_drains() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let machine = Machine::new(test_config());
            let root = spawn_dataset(&machine, 2);
            settle(300).await;

            // nine leaves saturate a height-2 tree with a kid limit of 3
            for _ in 0..9 {
                add_leaf(&machine, root).await;
                settle(1000).await;
            }
            settle(6000).await;
            assert_eq!(root_height(&machine, root).await, 3);
            assert_eq!(
                machine.api(root.id).unwrap().get_interval().await.unwrap(),
                Interval::full()
            );
            assert_tree_invariants(&machine, root).await;

            // eighteen more saturate height 3
            for _ in 0..18 {
                add_leaf(&machine, root).await;
                settle(1000).await;
            }
            wait_for_height(&machine, root, 4, 30_000).await;
            assert_eq!(
                machine.api(root.id).unwrap().get_interval().await.unwrap(),
                Interval::full()
            );
            assert_tree_invariants(&machine, root).await;
            let leaves = collect_leaves(&machine, root).await;
            assert_eq!(leaves.len(), 27);

            // drain the dataset: the tree merges and re-levels down to the
            // height floor
            for leaf in leaves {
                kill_leaf(&machine, leaf).await;
                settle(1000).await;
            }
            wait_for_height(&machine, root, 2, 50_000).await;
            assert!(collect_leaves(&machine, root).await.is_empty());
            assert_tree_invariants(&machine, root).await;
            machine.shutdown();
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn a_full_kid_is_split_by_the_monitor() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let machine = Machine::new(test_config());
            let root = spawn_dataset(&machine, 2);
            settle(300).await;
            let api = machine.api(root.id).unwrap();
            assert_eq!(api.get_kids().await.unwrap().len(), 1);

            // drive the only kid to the limit; the next monitor pass splits
            for _ in 0..3 {
                add_leaf(&machine, root).await;
                settle(300).await;
            }
            settle(2000).await;

            let kids = api.get_kids().await.unwrap();
            assert_eq!(kids.len(), 2);
            // the partition is unchanged: the kids cover the whole keyspace
            assert_eq!(kids[0].interval.lo, Key::Min);
            assert_eq!(kids[0].interval.hi, Some(kids[1].interval.lo));
            assert_eq!(kids[1].interval.hi, Some(Key::Max));
            assert!(kids[0].summary.unwrap().messages_per_second > 0.0);

            let capacity = api.get_capacity().await.unwrap();
            assert_eq!(capacity.height, 2);
            assert_eq!(capacity.kids_limit, 3);
            assert_eq!(capacity.n_kids, 2);
            assert!(!capacity.out_of_capacity);
            let leftmost = api.get_leftmost_kids().await.unwrap();
            assert_eq!(leftmost.len(), 2);
            assert_eq!(leftmost[0], kids[0].handle);
            assert_tree_invariants(&machine, root).await;
            machine.shutdown();
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn splitting_then_merging_restores_the_tree() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let machine = Machine::new(roomy_config());
            let root = spawn_dataset(&machine, 2);
            settle(300).await;
            for _ in 0..4 {
                add_leaf(&machine, root).await;
                settle(300).await;
            }
            settle(1000).await;

            let api = machine.api(root.id).unwrap();
            let before = api.get_kids().await.unwrap();
            assert_eq!(before.len(), 1);
            let kid_id = before[0].handle.id;

            let node = machine.node(root.id).unwrap();
            node.start_transaction_eventually(Originator::SplitKid { kid_id });
            settle(1000).await;
            let halves = api.get_kids().await.unwrap();
            assert_eq!(halves.len(), 2);
            assert_tree_invariants(&machine, root).await;

            node.start_transaction_eventually(Originator::MergeKids {
                left: halves[0].handle.id,
                right: halves[1].handle.id,
            });
            settle(1000).await;
            let after = api.get_kids().await.unwrap();
            assert_eq!(after.len(), 1);
            assert_eq!(after[0].interval, before[0].interval);
            assert_eq!(collect_leaves(&machine, root).await.len(), 4);
            assert_tree_invariants(&machine, root).await;
            machine.shutdown();
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn bumping_then_consuming_restores_the_height() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let machine = Machine::new(roomy_config());
            let root = spawn_dataset(&machine, 2);
            settle(300).await;
            for _ in 0..4 {
                add_leaf(&machine, root).await;
                settle(300).await;
            }
            // split by hand so the root has two kids before the bump
            let api = machine.api(root.id).unwrap();
            let kid_id = api.get_kids().await.unwrap()[0].handle.id;
            let node = machine.node(root.id).unwrap();
            node.start_transaction_eventually(Originator::SplitKid { kid_id });
            settle(1000).await;
            assert_eq!(api.get_kids().await.unwrap().len(), 2);

            node.start_transaction_eventually(Originator::BumpHeight);
            settle(1000).await;
            assert_eq!(root_height(&machine, root).await, 3);
            assert_tree_invariants(&machine, root).await;

            // the monitor merges the bump's split back together and then
            // consumes the resulting proxy, restoring the original height
            wait_for_height(&machine, root, 2, 30_000).await;
            assert_eq!(collect_leaves(&machine, root).await.len(), 4);
            assert_tree_invariants(&machine, root).await;
            machine.shutdown();
        })
        .await;
}

// ---- subscriptions ----

#[tokio::test(start_paused = true)]
async fn subscription_matches_equal_height_trees_one_to_one() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let machine = Machine::new(roomy_config());
            let left = spawn_dataset(&machine, 1);
            let right = spawn_dataset(&machine, 1);
            settle(300).await;

            // identical leaf keys on both sides: replay the sampler per round
            for round in 0..2u64 {
                machine.reseed(1000 + round);
                add_leaf(&machine, left).await;
                settle(200).await;
                machine.reseed(1000 + round);
                add_leaf(&machine, right).await;
                settle(200).await;
            }
            settle(500).await;

            let left_api = machine.api(left.id).unwrap();
            let right_api = machine.api(right.id).unwrap();
            let left_kids = left_api.get_kids().await.unwrap();
            let right_kids = right_api.get_kids().await.unwrap();
            assert_eq!(left_kids.len(), 2);
            assert_eq!(right_kids.len(), 2);
            for (l, r) in left_kids.iter().zip(right_kids.iter()) {
                assert_eq!(l.interval.lo, r.interval.lo);
            }

            let mut rig = LinkRig::new(&machine);
            let transaction_id = TransactionId::random();
            let link_key = LinkKey::new("scenario-link");
            rig.start_participant(
                right,
                transaction_id,
                ParticipantConfig::ReceiveStartSubscription {
                    requester: rig.role(transaction_id),
                    link_key: link_key.clone(),
                },
            );
            let (right_role, _) = rig.recv_hello().await;
            rig.start_participant(
                left,
                transaction_id,
                ParticipantConfig::SendStartSubscription {
                    parent: rig.role(transaction_id),
                    link_key: link_key.clone(),
                },
            );
            let (left_role, _) = rig.recv_hello().await;
            rig.send(
                &left_role,
                RoleMessage::SubscribeTo {
                    target: right_role,
                    height: 1,
                },
            );
            settle(1000).await;

            // both sides registered the counterparty
            let senders = left_api.get_senders().await.unwrap();
            assert_eq!(senders, vec![(link_key.clone(), right)]);
            let receivers = right_api.get_receivers().await.unwrap();
            assert_eq!(receivers, vec![(link_key.clone(), left)]);

            // the recorded edges are a bijection matching left endpoints
            let link = right_api
                .get_data_link(link_key.clone())
                .await
                .unwrap()
                .expect("the handshake recorded no edges");
            assert_eq!(link.input, Some(left));
            assert_eq!(link.output, None);
            assert_eq!(link.edges.len(), 2);
            let mut seen = HashSet::new();
            for (target, sources) in &link.edges {
                assert_eq!(sources.len(), 1, "a target kid has multiple feeders");
                assert!(seen.insert(sources[0]), "a sender kid feeds two targets");
                let target_lo = right_kids
                    .iter()
                    .find(|k| k.handle.id == *target)
                    .expect("edge names an unknown target kid")
                    .interval
                    .lo;
                let source_lo = left_kids
                    .iter()
                    .find(|k| k.handle.id == sources[0])
                    .expect("edge names an unknown sender kid")
                    .interval
                    .lo;
                assert_eq!(target_lo, source_lo);
            }
            machine.shutdown();
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn a_sender_pairs_with_the_proxy_of_a_taller_target() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let machine = Machine::new(roomy_config());
            let left = spawn_dataset(&machine, 1);
            settle(300).await;
            add_leaf(&machine, left).await;
            settle(200).await;
            add_leaf(&machine, left).await;
            settle(500).await;
            let left_api = machine.api(left.id).unwrap();
            let leaf_keys: Vec<Key> = left_api
                .get_kids()
                .await
                .unwrap()
                .iter()
                .map(|k| k.interval.lo)
                .collect();

            let mut top = LinkRig::new(&machine);
            let mut proxy = LinkRig::new(&machine);
            let mut feeders = vec![LinkRig::new(&machine), LinkRig::new(&machine)];
            let transaction_id = TransactionId::random();
            let link_key = LinkKey::new("tall-target");

            top.start_participant(
                left,
                transaction_id,
                ParticipantConfig::SendStartSubscription {
                    parent: top.role(transaction_id),
                    link_key: link_key.clone(),
                },
            );
            let (left_role, _) = top.recv_hello().await;
            top.send(
                &left_role,
                RoleMessage::SubscribeTo {
                    target: top.role(transaction_id),
                    height: 2,
                },
            );

            // the sender stands in as its own unique kid
            let (message, _) = top.recv(MessageKind::StartSubscription).await;
            let RoleMessage::StartSubscription {
                height,
                source_interval,
                kid_intervals,
                load,
                ..
            } = message
            else {
                unreachable!()
            };
            assert_eq!(height, 1);
            assert_eq!(kid_intervals, vec![source_interval]);
            assert!(load.messages_per_second > 0.0);
            top.send(
                &left_role,
                RoleMessage::SubscriptionStarted {
                    link_key: link_key.clone(),
                    leftmost_kids: vec![proxy.role(transaction_id)],
                    target_intervals: BTreeMap::from([(proxy.id(), source_interval)]),
                },
            );
            let (message, _) = top.recv(MessageKind::SubscriptionEdges).await;
            let RoleMessage::SubscriptionEdges { edges } = message else {
                unreachable!()
            };
            assert_eq!(edges.len(), 1);
            assert_eq!(edges[&proxy.id()].len(), 1);
            assert_eq!(edges[&proxy.id()][0].id(), left.id);

            // one level down, the heights agree and the kids are matched
            let (message, _) = proxy.recv(MessageKind::StartSubscription).await;
            let RoleMessage::StartSubscription { kid_intervals, .. } = message else {
                unreachable!()
            };
            assert_eq!(kid_intervals.len(), 2);
            let target_intervals: BTreeMap<NodeId, Interval> = feeders
                .iter()
                .zip(kid_intervals.iter())
                .map(|(f, interval)| (f.id(), *interval))
                .collect();
            proxy.send(
                &left_role,
                RoleMessage::SubscriptionStarted {
                    link_key: link_key.clone(),
                    leftmost_kids: feeders
                        .iter()
                        .map(|f| f.role(transaction_id))
                        .collect(),
                    target_intervals,
                },
            );
            let (message, _) = proxy.recv(MessageKind::SubscriptionEdges).await;
            let RoleMessage::SubscriptionEdges { edges } = message else {
                unreachable!()
            };
            assert_eq!(edges.len(), 2);

            // the left leaves now subscribe to the matching feeders
            for (feeder, expected_key) in feeders.iter_mut().zip(leaf_keys.iter()) {
                let (message, _) = feeder.recv(MessageKind::StartSubscription).await;
                let RoleMessage::StartSubscription {
                    subscriber,
                    source_interval,
                    height,
                    ..
                } = message
                else {
                    unreachable!()
                };
                assert_eq!(height, 0);
                assert_eq!(source_interval.lo, *expected_key);
                feeder.send(
                    &subscriber,
                    RoleMessage::SubscriptionStarted {
                        link_key: link_key.clone(),
                        leftmost_kids: Vec::new(),
                        target_intervals: BTreeMap::new(),
                    },
                );
                let (message, _) = feeder.recv(MessageKind::SubscriptionEdges).await;
                let RoleMessage::SubscriptionEdges { edges } = message else {
                    unreachable!()
                };
                assert!(edges.is_empty());
            }
            settle(500).await;

            // the sender registered the proxy, not the top target
            let senders = left_api.get_senders().await.unwrap();
            assert_eq!(senders, vec![(link_key.clone(), proxy.handle())]);
            machine.shutdown();
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn a_receiver_advertises_itself_to_a_taller_source() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let machine = Machine::new(roomy_config());
            let right = spawn_dataset(&machine, 1);
            settle(300).await;
            add_leaf(&machine, right).await;
            settle(200).await;
            add_leaf(&machine, right).await;
            settle(500).await;
            let right_api = machine.api(right.id).unwrap();

            let mut source = LinkRig::new(&machine);
            let mut deep_source = LinkRig::new(&machine);
            let mut leaf_feeders = vec![LinkRig::new(&machine), LinkRig::new(&machine)];
            let transaction_id = TransactionId::random();
            let link_key = LinkKey::new("tall-source");

            source.start_participant(
                right,
                transaction_id,
                ParticipantConfig::ReceiveStartSubscription {
                    requester: source.role(transaction_id),
                    link_key: link_key.clone(),
                },
            );
            let (right_role, _) = source.recv_hello().await;
            source.send(
                &right_role,
                RoleMessage::StartSubscription {
                    subscriber: source.role(transaction_id),
                    link_key: link_key.clone(),
                    load: crate::msg::Load {
                        messages_per_second: 3.0,
                    },
                    height: 2,
                    source_interval: Interval::full(),
                    kid_intervals: vec![Interval::full()],
                },
            );

            // the receiver re-advertises itself as the unique leftmost kid
            let (message, _) = source.recv(MessageKind::SubscriptionStarted).await;
            let RoleMessage::SubscriptionStarted {
                leftmost_kids,
                target_intervals,
                ..
            } = message
            else {
                unreachable!()
            };
            assert_eq!(leftmost_kids.len(), 1);
            assert_eq!(leftmost_kids[0].id(), right.id);
            assert_eq!(target_intervals[&right.id], Interval::full());
            source.send(
                &right_role,
                RoleMessage::SubscriptionEdges {
                    edges: BTreeMap::from([(right.id, vec![source.role(transaction_id)])]),
                },
            );

            // the next start_subscription comes from one level further down
            deep_source.send(
                &right_role,
                RoleMessage::StartSubscription {
                    subscriber: deep_source.role(transaction_id),
                    link_key: link_key.clone(),
                    load: crate::msg::Load {
                        messages_per_second: 3.0,
                    },
                    height: 1,
                    source_interval: Interval::full(),
                    kid_intervals: vec![Interval::full()],
                },
            );
            let (message, _) = deep_source.recv(MessageKind::SubscriptionStarted).await;
            let RoleMessage::SubscriptionStarted {
                leftmost_kids,
                target_intervals,
                ..
            } = message
            else {
                unreachable!()
            };
            assert_eq!(leftmost_kids.len(), 2);
            let right_kids = right_api.get_kids().await.unwrap();
            for kid in &right_kids {
                assert!(target_intervals.contains_key(&kid.handle.id));
            }

            // wire each advertised leaf to one feeder and finish the leaves
            let mut edges = BTreeMap::new();
            for (leaf_role, feeder) in leftmost_kids.iter().zip(leaf_feeders.iter()) {
                edges.insert(leaf_role.id(), vec![feeder.role(transaction_id)]);
            }
            deep_source.send(&right_role, RoleMessage::SubscriptionEdges { edges });
            for (leaf_role, feeder) in leftmost_kids.iter().zip(leaf_feeders.iter_mut()) {
                feeder.send(
                    leaf_role,
                    RoleMessage::StartSubscription {
                        subscriber: feeder.role(transaction_id),
                        link_key: link_key.clone(),
                        load: crate::msg::Load {
                            messages_per_second: 3.0,
                        },
                        height: 0,
                        source_interval: target_intervals[&leaf_role.id()],
                        kid_intervals: Vec::new(),
                    },
                );
                let (message, _) = feeder.recv(MessageKind::SubscriptionStarted).await;
                let RoleMessage::SubscriptionStarted { leftmost_kids, .. } = message else {
                    unreachable!()
                };
                assert!(leftmost_kids.is_empty());
                feeder.send(
                    leaf_role,
                    RoleMessage::SubscriptionEdges {
                        edges: BTreeMap::new(),
                    },
                );
            }
            settle(500).await;

            // the root recorded the deeper source as its input
            let receivers = right_api.get_receivers().await.unwrap();
            assert_eq!(receivers, vec![(link_key.clone(), deep_source.handle())]);
            let link = right_api
                .get_data_link(link_key.clone())
                .await
                .unwrap()
                .expect("the handshake recorded no edges");
            assert_eq!(link.edges.len(), 2);
            machine.shutdown();
        })
        .await;
}
