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

//! Windowed estimation of a node's message rate. The estimate feeds the
//! `messages_per_second` field of kid summaries and the advertised load of a
//! subscription.

consts! {
    /// Floor for the estimate, in hertz
    MIN_RATE_ESTIMATE_HZ: f64 = 3.0;
    /// Once a window grows older than this, a new window is started
    MAX_WINDOW_SIZE_MS: u64 = 1500;
    /// Windows beyond this count are discarded, oldest first
    MAX_WINDOWS: usize = 2;
}

#[derive(Debug)]
pub struct MessageRateTracker {
    /// `(window_start_ms, message_count)` in order of increasing start time
    windows: Vec<(u64, u64)>,
}

impl MessageRateTracker {
    pub fn new() -> Self {
        Self {
            windows: vec![(0, 0)],
        }
    }

    /// Record one delivered message
    pub fn increment(&mut self, now_ms: u64) {
        if let Some(last) = self.windows.last_mut() {
            last.1 += 1;
        }
        self.trim_windows(now_ms);
    }

    /// Estimate the current message rate in hertz
    pub fn estimate_rate_hz(&mut self, now_ms: u64) -> f64 {
        let result = self.rate(now_ms);
        self.trim_windows(now_ms);
        result
    }

    fn total_messages(&self) -> u64 {
        self.windows.iter().map(|(_, n)| n).sum()
    }

    fn rate(&self, now_ms: u64) -> f64 {
        let oldest = self.windows.first().map(|(start, _)| *start).unwrap_or(0);
        let total_time_sec = ((now_ms.saturating_sub(oldest)) as f64 / 1000.0).max(1.0);
        (self.total_messages() as f64 / total_time_sec).max(MIN_RATE_ESTIMATE_HZ)
    }

    fn trim_windows(&mut self, now_ms: u64) {
        let last_start = self.windows.last().map(|(start, _)| *start).unwrap_or(0);
        if now_ms.saturating_sub(last_start) >= MAX_WINDOW_SIZE_MS {
            self.windows.push((now_ms, 0));
            while self.windows.len() > MAX_WINDOWS {
                self.windows.remove(0);
            }
        }
    }
}
