/*
 * Created on Wed Mar 08 2023
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

//! The totally ordered key domain of a dataset.
//!
//! User keys live in the open unit interval; `Min` is strictly less than and
//! `Max` strictly greater than every user key. Values are compared with
//! [`f64::total_cmp`], so the order is total even though the payload is a
//! float. A leaf's interval has no right endpoint: the `hi` side of an
//! [`Interval`] is an `Option`, with `None` as the open sentinel.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Key {
    Min,
    Val(f64),
    Max,
}

impl Key {
    /// The numeric image of this key for sampling: the sentinels map to the
    /// bounds of the unit interval
    pub fn to_unit(self) -> f64 {
        match self {
            Self::Min => 0.0,
            Self::Val(v) => v,
            Self::Max => 1.0,
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Min, Self::Min) => Ordering::Equal,
            (Self::Min, _) => Ordering::Less,
            (_, Self::Min) => Ordering::Greater,
            (Self::Max, Self::Max) => Ordering::Equal,
            (Self::Max, _) => Ordering::Greater,
            (_, Self::Max) => Ordering::Less,
            (Self::Val(a), Self::Val(b)) => a.total_cmp(b),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Min => f.write_str("-inf"),
            Self::Max => f.write_str("inf"),
            Self::Val(v) => write!(f, "{}", v),
        }
    }
}

/// A contiguous key range `[lo, hi)`. `hi == None` is the open sentinel used
/// by leaf intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub lo: Key,
    pub hi: Option<Key>,
}

impl Interval {
    pub const fn new(lo: Key, hi: Option<Key>) -> Self {
        Self { lo, hi }
    }

    /// The whole keyspace
    pub const fn full() -> Self {
        Self::new(Key::Min, Some(Key::Max))
    }

    /// The degenerate interval `[at, at)`; an absorber starts on one of these
    /// and grows leftward
    pub const fn empty_at(at: Key) -> Self {
        Self::new(at, Some(at))
    }

    pub fn is_subinterval_of(&self, larger: &Interval) -> bool {
        let right_ok = match (self.hi, larger.hi) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(s), Some(l)) => s <= l,
        };
        larger.lo <= self.lo && right_ok
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hi {
            Some(hi) => write!(f, "[{}, {})", self.lo, hi),
            None => write!(f, "[{}, ..)", self.lo),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_order() {
        assert!(Key::Min < Key::Val(0.0));
        assert!(Key::Val(1.0) < Key::Max);
        assert!(Key::Min < Key::Max);
        assert!(Key::Val(0.25) < Key::Val(0.75));
        assert_eq!(Key::Val(0.5), Key::Val(0.5));
    }

    #[test]
    fn sentinels_compare_equal_to_themselves() {
        assert_eq!(Key::Min, Key::Min);
        assert_eq!(Key::Max, Key::Max);
        assert_ne!(Key::Min, Key::Max);
    }

    #[test]
    fn unit_projection() {
        assert_eq!(Key::Min.to_unit(), 0.0);
        assert_eq!(Key::Max.to_unit(), 1.0);
        assert_eq!(Key::Val(0.3).to_unit(), 0.3);
    }

    #[test]
    fn subintervals() {
        let full = Interval::full();
        let mid = Interval::new(Key::Val(0.2), Some(Key::Val(0.7)));
        let leaf = Interval::new(Key::Val(0.4), None);
        assert!(mid.is_subinterval_of(&full));
        assert!(!full.is_subinterval_of(&mid));
        assert!(leaf.is_subinterval_of(&leaf));
        assert!(!leaf.is_subinterval_of(&mid));
    }
}
