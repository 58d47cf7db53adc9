/*
 * Created on Fri Mar 10 2023
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

use super::*;

#[test]
fn empty_file_gives_defaults() {
    let cfg = SystemConfig::from_yaml_str("{}").unwrap();
    assert_eq!(cfg, SystemConfig::default());
}

#[test]
fn file_overrides_defaults() {
    let raw = r#"
system:
  kids_limit: 3
  capacity_trigger: 0
  seed: 42
dataset:
  height: 4
"#;
    let cfg = SystemConfig::from_yaml_str(raw).unwrap();
    assert_eq!(cfg.data_node_kids_limit, 3);
    assert_eq!(cfg.total_kid_capacity_trigger, 0);
    assert_eq!(cfg.kid_summary_interval_ms, DEFAULT_SUMMARY_INTERVAL_MS);
    assert_eq!(cfg.seed, 42);
    assert_eq!(cfg.root_height, 4);
}

#[test]
fn partial_sections_keep_remaining_defaults() {
    let raw = r#"
system:
  summary_interval_ms: 500
"#;
    let cfg = SystemConfig::from_yaml_str(raw).unwrap();
    assert_eq!(cfg.kid_summary_interval_ms, 500);
    assert_eq!(cfg.data_node_kids_limit, DEFAULT_KIDS_LIMIT);
    assert_eq!(cfg.root_height, DEFAULT_ROOT_HEIGHT);
}

#[test]
fn garbage_fails() {
    assert!(SystemConfig::from_yaml_str("system: [this, is, not, a, map]").is_err());
}
