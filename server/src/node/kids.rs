/*
 * Created on Sat Mar 11 2023
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

//! The canonical representation of a node's child partition.
//!
//! A `KidSet` owns the ordered partition of this node's interval among its
//! children, keyed by interval start. Two kids never share a start point.
//! Every modifying operation is `O(log n)` on the underlying ordered map.

use crate::ids::NodeId;
use crate::keyspace::{Interval, Key};
use crate::msg::{KidSummary, NodeHandle};
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Bound;

#[derive(Debug)]
pub enum KidsError {
    /// The kid is not in this set
    NotFound(NodeId),
    /// The kid has no right neighbor to merge into
    Rightmost(NodeId),
    /// The split point does not fall strictly inside the kid's interval
    BadSplitPoint,
    /// Another kid already starts at this key
    DuplicateStart,
}

impl fmt::Display for KidsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "kid {} not found", id),
            Self::Rightmost(id) => write!(f, "kid {} has no right neighbor", id),
            Self::BadSplitPoint => f.write_str("split point outside the kid's interval"),
            Self::DuplicateStart => f.write_str("a kid already starts at this key"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KidEntry {
    pub handle: NodeHandle,
    pub interval: Interval,
    pub summary: Option<KidSummary>,
}

#[derive(Debug)]
pub struct KidSet {
    left: Key,
    right: Option<Key>,
    by_start: BTreeMap<Key, NodeId>,
    entries: HashMap<NodeId, KidEntry>,
}

impl KidSet {
    pub fn new(left: Key, right: Option<Key>) -> Self {
        Self {
            left,
            right,
            by_start: BTreeMap::new(),
            entries: HashMap::new(),
        }
    }

    /// Forget every kid; the node's own interval is untouched
    pub fn clear(&mut self) {
        self.by_start.clear();
        self.entries.clear();
    }

    pub fn left(&self) -> Key {
        self.left
    }

    pub fn right(&self) -> Option<Key> {
        self.right
    }

    pub fn interval(&self) -> Interval {
        Interval::new(self.left, self.right)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&KidEntry> {
        self.entries.get(&id)
    }

    /// Kid ids in interval order
    pub fn ids(&self) -> Vec<NodeId> {
        self.by_start.values().copied().collect()
    }

    /// `(id, entry)` pairs in interval order
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &KidEntry)> {
        self.by_start.values().map(move |id| (*id, &self.entries[id]))
    }

    pub fn left_endpoint(&self, id: NodeId) -> Option<Key> {
        self.entries.get(&id).map(|e| e.interval.lo)
    }

    /// Adjacent `(left, right)` id pairs in interval order
    pub fn adjacent_pairs(&self) -> Vec<(NodeId, NodeId)> {
        let ordered = self.ids();
        ordered.windows(2).map(|w| (w[0], w[1])).collect()
    }

    /// The kid immediately to the right of `id`, if any
    pub fn right_neighbor(&self, id: NodeId) -> Option<NodeId> {
        let start = self.left_endpoint(id)?;
        self.by_start
            .range((Bound::Excluded(start), Bound::Unbounded))
            .next()
            .map(|(_, id)| *id)
    }

    pub fn add_kid(
        &mut self,
        handle: NodeHandle,
        interval: Interval,
        summary: Option<KidSummary>,
    ) -> Result<(), KidsError> {
        if self.by_start.contains_key(&interval.lo) {
            return Err(KidsError::DuplicateStart);
        }
        self.by_start.insert(interval.lo, handle.id);
        self.entries.insert(
            handle.id,
            KidEntry {
                handle,
                interval,
                summary,
            },
        );
        Ok(())
    }

    pub fn remove_kid(&mut self, id: NodeId) -> Result<KidEntry, KidsError> {
        let entry = self.entries.remove(&id).ok_or(KidsError::NotFound(id))?;
        self.by_start.remove(&entry.interval.lo);
        Ok(entry)
    }

    pub fn set_summary(&mut self, id: NodeId, summary: KidSummary) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.summary = Some(summary);
        }
    }

    /// `(id, summary)` for every kid whose summary is known
    pub fn summaries(&self) -> impl Iterator<Item = (NodeId, &KidSummary)> {
        self.entries
            .iter()
            .filter_map(|(id, e)| e.summary.as_ref().map(|s| (*id, s)))
    }

    pub fn all_summaries_known(&self) -> bool {
        self.entries.values().all(|e| e.summary.is_some())
    }

    /// The unique kid when there is exactly one, else `None`
    pub fn get_proxy(&self) -> Option<&KidEntry> {
        if self.entries.len() == 1 {
            self.entries.values().next()
        } else {
            None
        }
    }

    /// Reduce this node's own left endpoint. Used by an absorber learning
    /// its new left boundary
    pub fn grow_left(&mut self, key: Key) {
        self.left = key;
    }

    /// Shrink the interval by reducing the right endpoint, detaching the
    /// right half of the kids in the process.
    ///
    /// Keeps the `⌊n/2⌋` leftmost kids and returns the new right endpoint
    /// along with the detached kids in interval order. The endpoint is
    /// guaranteed not to fall strictly inside any kid's interval.
    pub fn shrink_right<R: Rng>(&mut self, rng: &mut R) -> (Key, Vec<KidEntry>) {
        let n_to_keep = self.by_start.len() / 2;
        if n_to_keep == self.by_start.len() {
            // no kids: truncate at a fresh interior key instead
            let key = self.new_kid_key(rng);
            self.right = Some(key);
            return (key, Vec::new());
        }
        let mut ordered = self.ids();
        let leaving = ordered.split_off(n_to_keep);
        let mid = self.entries[&leaving[0]].interval.lo;
        self.right = Some(mid);
        let mut detached = Vec::with_capacity(leaving.len());
        for id in leaving {
            let entry = self.entries.remove(&id).expect("kid listed but not stored");
            self.by_start.remove(&entry.interval.lo);
            detached.push(entry);
        }
        (mid, detached)
    }

    /// Delete `left_id` and extend its right neighbor's interval leftward to
    /// cover it
    pub fn merge_right(&mut self, left_id: NodeId) -> Result<(), KidsError> {
        let start = self
            .left_endpoint(left_id)
            .ok_or(KidsError::NotFound(left_id))?;
        let right_id = self
            .right_neighbor(left_id)
            .ok_or(KidsError::Rightmost(left_id))?;
        self.entries.remove(&left_id);
        self.by_start.remove(&start);
        // the right neighbor's start changes, so it has to be re-keyed
        let entry = self
            .entries
            .get_mut(&right_id)
            .expect("neighbor listed but not stored");
        self.by_start.remove(&entry.interval.lo);
        entry.interval.lo = start;
        self.by_start.insert(start, right_id);
        Ok(())
    }

    /// Truncate `kid_id`'s interval to `[lo, mid)` and insert `new_handle`
    /// over `[mid, hi)`
    pub fn split(
        &mut self,
        kid_id: NodeId,
        mid: Key,
        new_handle: NodeHandle,
        new_summary: KidSummary,
        kid_summary: KidSummary,
    ) -> Result<(), KidsError> {
        let entry = self
            .entries
            .get_mut(&kid_id)
            .ok_or(KidsError::NotFound(kid_id))?;
        let hi = entry.interval.hi;
        let inside = entry.interval.lo < mid && hi.map_or(true, |h| mid < h);
        if !inside {
            return Err(KidsError::BadSplitPoint);
        }
        entry.interval.hi = Some(mid);
        entry.summary = Some(kid_summary);
        self.add_kid(new_handle, Interval::new(mid, hi), Some(new_summary))
    }

    /// Choose a fresh key strictly inside this node's interval, not equal to
    /// any existing kid boundary
    pub fn new_kid_key<R: Rng>(&self, rng: &mut R) -> Key {
        let lo = self.left.to_unit();
        let hi = self.right.map_or(1.0, |k| k.to_unit());
        loop {
            let candidate = Key::Val(rng.gen_range(lo..hi));
            let taken = self.by_start.contains_key(&candidate)
                || Some(candidate) == self.right
                || candidate == self.left;
            if !taken {
                return candidate;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn handle() -> NodeHandle {
        NodeHandle::new(NodeId::random())
    }

    fn iv(lo: f64, hi: f64) -> Interval {
        Interval::new(Key::Val(lo), Some(Key::Val(hi)))
    }

    /// A set over the full keyspace with kids at the given cut points
    fn set_with_cuts(cuts: &[f64]) -> (KidSet, Vec<NodeHandle>) {
        let mut kids = KidSet::new(Key::Min, Some(Key::Max));
        let mut handles = Vec::new();
        for (i, lo) in cuts.iter().enumerate() {
            let hi = cuts.get(i + 1).map(|v| Key::Val(*v)).unwrap_or(Key::Max);
            let h = handle();
            let lo = if i == 0 { Key::Min } else { Key::Val(*lo) };
            kids.add_kid(h, Interval::new(lo, Some(hi)), None).unwrap();
            handles.push(h);
        }
        (kids, handles)
    }

    #[test]
    fn kids_are_ordered_by_start() {
        let (kids, handles) = set_with_cuts(&[0.0, 0.25, 0.5, 0.75]);
        let ordered = kids.ids();
        assert_eq!(ordered, handles.iter().map(|h| h.id).collect::<Vec<_>>());
        assert_eq!(kids.right_neighbor(handles[1].id), Some(handles[2].id));
        assert_eq!(kids.right_neighbor(handles[3].id), None);
    }

    #[test]
    fn duplicate_starts_are_rejected() {
        let mut kids = KidSet::new(Key::Min, Some(Key::Max));
        kids.add_kid(handle(), iv(0.5, 0.7), None).unwrap();
        assert!(matches!(
            kids.add_kid(handle(), iv(0.5, 0.9), None),
            Err(KidsError::DuplicateStart)
        ));
    }

    #[test]
    fn merge_right_extends_the_neighbor() {
        let (mut kids, handles) = set_with_cuts(&[0.0, 0.4, 0.8]);
        kids.merge_right(handles[0].id).unwrap();
        assert_eq!(kids.len(), 2);
        let merged = kids.get(handles[1].id).unwrap();
        assert_eq!(merged.interval.lo, Key::Min);
        assert_eq!(merged.interval.hi, Some(Key::Val(0.8)));
        // partition is still intact
        assert_eq!(kids.ids(), vec![handles[1].id, handles[2].id]);
    }

    #[test]
    fn merge_right_fails_on_rightmost_and_unknown() {
        let (mut kids, handles) = set_with_cuts(&[0.0, 0.5]);
        assert!(matches!(
            kids.merge_right(handles[1].id),
            Err(KidsError::Rightmost(_))
        ));
        assert!(matches!(
            kids.merge_right(NodeId::random()),
            Err(KidsError::NotFound(_))
        ));
    }

    #[test]
    fn split_inserts_the_new_kid() {
        let (mut kids, handles) = set_with_cuts(&[0.0, 0.5]);
        let new = handle();
        kids.split(
            handles[0].id,
            Key::Val(0.25),
            new,
            KidSummary::empty(1),
            KidSummary::empty(1),
        )
        .unwrap();
        assert_eq!(kids.len(), 3);
        assert_eq!(
            kids.get(handles[0].id).unwrap().interval,
            Interval::new(Key::Min, Some(Key::Val(0.25)))
        );
        assert_eq!(kids.get(new.id).unwrap().interval, iv(0.25, 0.5));
    }

    #[test]
    fn split_rejects_points_outside_the_kid() {
        let (mut kids, handles) = set_with_cuts(&[0.0, 0.5]);
        let res = kids.split(
            handles[0].id,
            Key::Val(0.75),
            handle(),
            KidSummary::empty(1),
            KidSummary::empty(1),
        );
        assert!(matches!(res, Err(KidsError::BadSplitPoint)));
    }

    #[test]
    fn shrink_right_detaches_the_right_half() {
        let (mut kids, handles) = set_with_cuts(&[0.0, 0.2, 0.4, 0.6, 0.8]);
        let mut rng = StdRng::seed_from_u64(7);
        let (mid, detached) = kids.shrink_right(&mut rng);
        assert_eq!(mid, Key::Val(0.4));
        assert_eq!(kids.len(), 2);
        assert_eq!(kids.right(), Some(Key::Val(0.4)));
        assert_eq!(
            detached.iter().map(|e| e.handle.id).collect::<Vec<_>>(),
            vec![handles[2].id, handles[3].id, handles[4].id]
        );
    }

    #[test]
    fn shrink_right_without_kids_truncates_at_a_fresh_key() {
        let mut kids = KidSet::new(Key::Min, Some(Key::Max));
        let mut rng = StdRng::seed_from_u64(7);
        let (mid, detached) = kids.shrink_right(&mut rng);
        assert!(detached.is_empty());
        assert!(Key::Min < mid && mid < Key::Max);
        assert_eq!(kids.right(), Some(mid));
    }

    #[test]
    fn new_kid_key_stays_inside_and_avoids_boundaries() {
        let (kids, _) = set_with_cuts(&[0.0, 0.25, 0.5, 0.75]);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..64 {
            let key = kids.new_kid_key(&mut rng);
            assert!(kids.left() < key);
            assert!(Some(key) != kids.right());
            assert!(!kids.ids().iter().any(|id| kids.left_endpoint(*id) == Some(key)));
        }
    }

    #[test]
    fn proxy_is_the_unique_kid() {
        let (mut kids, handles) = set_with_cuts(&[0.0, 0.5]);
        assert!(kids.get_proxy().is_none());
        kids.remove_kid(handles[1].id).unwrap();
        assert_eq!(kids.get_proxy().unwrap().handle.id, handles[0].id);
        kids.clear();
        assert!(kids.get_proxy().is_none());
    }

    #[test]
    fn grow_left_moves_the_own_boundary() {
        let mut kids = KidSet::new(Key::Val(0.6), Some(Key::Val(0.6)));
        kids.grow_left(Key::Val(0.3));
        assert_eq!(kids.interval(), iv(0.3, 0.6));
    }
}
