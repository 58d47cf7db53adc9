/*
 * Created on Tue Mar 07 2023
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

use crate::config::ConfigError;
use crate::node::kids::KidsError;
use std::fmt;

pub type TreeResult<T> = Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// A protocol violation. These are fatal: the node that observes one is
    /// aborted by the runtime
    Internal(String),
    /// A `KidSet` contract violation
    Kids(KidsError),
    /// A bad configuration
    Config(ConfigError),
}

impl Error {
    pub fn internal(msg: impl ToString) -> Self {
        Self::Internal(msg.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
            Self::Kids(kerr) => write!(f, "Kid set error: {}", kerr),
            Self::Config(cerr) => write!(f, "Configuration error: {}", cerr),
        }
    }
}

impl std::error::Error for Error {}

impl From<KidsError> for Error {
    fn from(kerr: KidsError) -> Self {
        Self::Kids(kerr)
    }
}

impl From<ConfigError> for Error {
    fn from(cerr: ConfigError) -> Self {
        Self::Config(cerr)
    }
}
