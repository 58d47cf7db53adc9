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

use super::{api_roundtrip, api_roundtrip_err};
use crate::ids::{LinkKey, NodeId};
use crate::keyspace::Interval;
use crate::msg::NodeHandle;
use crate::node::api::{ApiRequest, CapacityInfo, DataLinkInfo, KidInfo, NodeStats};
use crate::util::TreeResult;
use tokio::sync::{mpsc, oneshot};

/// Request/response client for one node's API surface
#[derive(Clone)]
pub struct ApiClient {
    tx: mpsc::UnboundedSender<ApiRequest>,
}

impl ApiClient {
    pub(super) fn new(tx: mpsc::UnboundedSender<ApiRequest>) -> Self {
        Self { tx }
    }

    pub async fn get_kids(&self) -> TreeResult<Vec<KidInfo>> {
        let (tx, rx) = oneshot::channel();
        api_roundtrip(&self.tx, ApiRequest::GetKids(tx), rx).await
    }

    pub async fn get_stats(&self) -> TreeResult<NodeStats> {
        let (tx, rx) = oneshot::channel();
        api_roundtrip(&self.tx, ApiRequest::GetStats(tx), rx).await
    }

    pub async fn get_interval(&self) -> TreeResult<Interval> {
        let (tx, rx) = oneshot::channel();
        api_roundtrip(&self.tx, ApiRequest::GetInterval(tx), rx).await
    }

    pub async fn get_capacity(&self) -> TreeResult<CapacityInfo> {
        let (tx, rx) = oneshot::channel();
        api_roundtrip(&self.tx, ApiRequest::GetCapacity(tx), rx).await
    }

    pub async fn get_senders(&self) -> TreeResult<Vec<(LinkKey, NodeHandle)>> {
        let (tx, rx) = oneshot::channel();
        api_roundtrip(&self.tx, ApiRequest::GetSenders(tx), rx).await
    }

    pub async fn get_receivers(&self) -> TreeResult<Vec<(LinkKey, NodeHandle)>> {
        let (tx, rx) = oneshot::channel();
        api_roundtrip(&self.tx, ApiRequest::GetReceivers(tx), rx).await
    }

    pub async fn get_leftmost_kids(&self) -> TreeResult<Vec<NodeHandle>> {
        let (tx, rx) = oneshot::channel();
        api_roundtrip(&self.tx, ApiRequest::GetLeftmostKids(tx), rx).await
    }

    pub async fn get_data_link(&self, link_key: LinkKey) -> TreeResult<Option<DataLinkInfo>> {
        let (tx, rx) = oneshot::channel();
        api_roundtrip(&self.tx, ApiRequest::GetDataLink { link_key, resp: tx }, rx).await
    }

    /// Ask the node to remove the identified leaf kid (runs as a
    /// `RemoveLeaf` transaction the next time the node is idle)
    pub fn remove_leaf(&self, kid_id: NodeId) -> TreeResult<()> {
        self.tx
            .send(ApiRequest::RemoveLeaf { kid_id })
            .map_err(|_| api_roundtrip_err())
    }

    pub fn kill_node(&self) -> TreeResult<()> {
        self.tx
            .send(ApiRequest::KillNode)
            .map_err(|_| api_roundtrip_err())
    }
}
