/*
 * Created on Sun Mar 19 2023
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

//! Absorb the unique child of a root into the root itself, lowering the
//! tree by one level.

use super::RoleController;
use crate::msg::{MessageKind, ParticipantConfig, RoleMessage};
use crate::util::{Error, TreeResult};
use std::collections::HashSet;

pub(super) async fn consume_proxy(controller: &RoleController) -> TreeResult<()> {
    let node = controller.node();
    let proxy = match node.kids.borrow().get_proxy() {
        Some(entry) => entry.handle,
        None => {
            log::info!(
                "node {} aborting a scheduled ConsumeProxy: the root has no proxy",
                node.id()
            );
            return Ok(());
        }
    };
    log::info!("node {} consuming its proxy {}", node.id(), proxy.id);

    let my_handle = controller.new_handle(proxy.id);
    controller.enlist(
        &proxy,
        ParticipantConfig::Absorbee {
            parent: my_handle,
            absorber: my_handle,
        },
    )?;

    let (message, _sender) = controller.listen(MessageKind::AbsorbTheseKids).await?;
    let kid_ids =
        expect_message!(message, RoleMessage::AbsorbTheseKids { kid_ids, .. } => kid_ids);

    node.kids.borrow_mut().clear();

    let mut expected: HashSet<_> = kid_ids.into_iter().collect();
    while !expected.is_empty() {
        let (message, sender) = controller.listen(MessageKind::HelloParent).await?;
        let (kid, kid_summary, interval) = expect_message!(
            message,
            RoleMessage::HelloParent { kid, kid_summary, interval } => (kid, kid_summary, interval)
        );
        if !expected.remove(&sender) {
            return Err(Error::internal(format!(
                "hello from {}, which is not a kid of the consumed proxy",
                sender
            )));
        }
        let interval = interval
            .ok_or_else(|| Error::internal("a fostered kid said hello without an interval"))?;
        node.kids.borrow_mut().add_kid(
            controller.role_handle_to_node_handle(&kid),
            interval,
            kid_summary,
        )?;
    }

    let _goodbye = controller.listen(MessageKind::GoodbyeParent).await?;

    node.height.set(node.height() - 1);
    log::info!(
        "node {} finished consuming {}; height is now {}",
        node.id(),
        proxy.id,
        node.height()
    );
    Ok(())
}
