// SPDX-FileCopyrightText: 2023 Huang-Huang Bao
// SPDX-License-Identifier: GPL-2.0-or-later
use std::io;

use futures_util::TryStreamExt;
use netlink_packet_route::link::{InfoBond, InfoData, LinkAttribute, LinkInfo, LinkMessage};
use rtnetlink::{new_connection, Handle};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct RouteHelper {
    handle: Handle,
}

impl RouteHelper {
    pub async fn query_link(&self, if_index: u32) -> Result<LinkMessage> {
        let link = self
            .handle
            .link()
            .get()
            .match_index(if_index)
            .execute()
            .try_next()
            .await
            .map_err(|e| {
                Error::not_found(
                    format!("interface with ifindex {}", if_index),
                    io::Error::new(io::ErrorKind::NotFound, e),
                )
            })?;

        link.ok_or_else(|| {
            Error::not_found(
                format!("interface with ifindex {}", if_index),
                io::ErrorKind::NotFound.into(),
            )
        })
    }

    pub async fn query_active_port(&self, bond_index: u32) -> Result<u32> {
        let link = self.query_link(bond_index).await?;
        active_port_of(&link).ok_or_else(|| {
            Error::not_found(
                format!("active member of bond with ifindex {}", bond_index),
                io::ErrorKind::NotFound.into(),
            )
        })
    }
}

fn active_port_of(link: &LinkMessage) -> Option<u32> {
    let infos = link.attributes.iter().find_map(|attr| {
        if let LinkAttribute::LinkInfo(infos) = attr {
            Some(infos)
        } else {
            None
        }
    })?;

    let bond = infos.iter().find_map(|info| {
        if let LinkInfo::Data(InfoData::Bond(bond)) = info {
            Some(bond)
        } else {
            None
        }
    })?;

    bond.iter().find_map(|attr| {
        if let InfoBond::ActivePort(if_index) = attr {
            Some(*if_index)
        } else {
            None
        }
    })
}

/// Queries the currently active member of a bond, blocking on a
/// dedicated current-thread runtime.
pub fn query_active_port(bond_index: u32) -> Result<u32> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::io("couldn't start netlink runtime", e))?;

    rt.block_on(async {
        let (conn, handle, _) =
            new_connection().map_err(|e| Error::io("couldn't open netlink connection", e))?;
        let task = tokio::spawn(conn);

        let res = RouteHelper { handle }.query_active_port(bond_index).await;

        task.abort();
        res
    })
}
