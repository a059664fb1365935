// SPDX-FileCopyrightText: 2023 Huang-Huang Bao
// SPDX-License-Identifier: GPL-2.0-or-later
use std::fmt::Display;
use std::path::PathBuf;

use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hook::{self, HookStatus, TcAttach};
use crate::netif::{self, BondMembership, InterfaceRef, NetIfs};
use crate::pin::{LinkPinning, SubscriptionPinner};
use crate::skel::{self, LoadConfig, ProgramLoader, Seeds};

#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub object: PathBuf,
    pub max_members: usize,
    pub state_max_entries: u32,
    pub pin_dir: PathBuf,
    pub debug: bool,
}

impl From<&Config> for InstanceConfig {
    fn from(config: &Config) -> Self {
        Self {
            object: config.object.clone(),
            max_members: config.max_members,
            state_max_entries: config.state_max_entries,
            pin_dir: config.pin_dir.clone(),
            debug: config.debug,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadSummary {
    pub bond: InterfaceRef,
    pub members: usize,
    pub active_ifindex: u32,
}

impl Display for LoadSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: Found {} ifaces, active idx {}",
            self.bond, self.members, self.active_ifindex
        )
    }
}

#[derive(Debug, Clone)]
pub struct MemberStatus {
    pub iface: InterfaceRef,
    pub hooks: HookStatus,
}

#[derive(Debug, Clone)]
pub struct BondStatus {
    pub bond: InterfaceRef,
    pub members: Vec<MemberStatus>,
    pub pinned: bool,
}

impl Display for BondStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let yes_no = |b: bool| if b { "yes" } else { "no" };

        writeln!(
            f,
            "{} (ifindex {}): subscription pinned: {}",
            self.bond,
            self.bond.index(),
            yes_no(self.pinned)
        )?;
        for member in &self.members {
            writeln!(
                f,
                "  {} (ifindex {}): egress {}, ingress {}",
                member.iface,
                member.iface.index(),
                yes_no(member.hooks.egress),
                yes_no(member.hooks.ingress)
            )?;
        }
        Ok(())
    }
}

/// Sequences membership resolution, program loading, hook attachment and
/// subscription pinning for one bond.
pub struct Instance<N, L, K> {
    config: InstanceConfig,
    netifs: N,
    loader: L,
    kernel: K,
    pinner: SubscriptionPinner,
}

impl<N, L, K> Instance<N, L, K>
where
    N: NetIfs,
    L: ProgramLoader,
    K: TcAttach<L::Programs> + LinkPinning<L::Programs>,
{
    pub fn new(config: InstanceConfig, netifs: N, loader: L, kernel: K) -> Self {
        let pinner = SubscriptionPinner::new(&config.pin_dir);
        Self {
            config,
            netifs,
            loader,
            kernel,
            pinner,
        }
    }

    pub fn netifs(&self) -> &N {
        &self.netifs
    }

    fn resolve(&self, bond_index: u32) -> Result<BondMembership> {
        netif::resolve_members(&self.netifs, bond_index, self.config.max_members)
    }

    /// Installs classifiers on every member and pins the change
    /// subscription. On failure nothing of this run stays installed.
    pub fn load(&mut self, bond_index: u32) -> Result<LoadSummary> {
        let membership = self.resolve(bond_index)?;

        // an earlier run still owns the bond, leave its hooks alone
        if self
            .pinner
            .is_pinned::<L::Programs, _>(&self.kernel, membership.bond())?
        {
            return Err(Error::AlreadyExists {
                what: format!(
                    "pinned link {} of bond {}",
                    self.pinner.pin_path(membership.bond()).display(),
                    membership.bond()
                ),
            });
        }

        let active_ifindex = self.netifs.active_member(bond_index)?;
        let netns_cookie = self
            .netifs
            .netns_cookie()
            .map_err(|e| Error::io("couldn't get network namespace cookie", e))?;

        let load_config = LoadConfig {
            object: self.config.object.clone(),
            state_max_entries: self.config.state_max_entries,
            seeds: Seeds {
                active_ifindex,
                bond_ifindex: bond_index,
                netns_cookie,
                debug: self.config.debug,
            },
        };
        debug!("loading with {:?}", load_config);

        let mut programs = Some(self.loader.load(&load_config)?);
        let res = programs
            .as_ref()
            .map_or(Ok(()), |programs| self.install(&membership, programs));
        skel::release(&mut programs);
        res?;

        info!(
            "loop filter installed on {} members of {}",
            membership.len(),
            membership.bond()
        );

        Ok(LoadSummary {
            bond: membership.bond().clone(),
            members: membership.len(),
            active_ifindex,
        })
    }

    fn install(&mut self, membership: &BondMembership, programs: &L::Programs) -> Result<()> {
        hook::attach_all(&mut self.kernel, membership.members(), programs)?;

        if let Err(err) = self
            .pinner
            .pin(&mut self.kernel, programs, membership.bond())
        {
            error!("{}", err);
            // a pin showing up since the check belongs to someone else
            self.rollback(membership, !err.is_already_exists());
            return Err(err);
        }

        Ok(())
    }

    fn rollback(&mut self, membership: &BondMembership, unpin: bool) {
        if unpin {
            if let Err(e) = self
                .pinner
                .unpin::<L::Programs, _>(&mut self.kernel, membership.bond())
            {
                error!("rollback: {}", e);
            }
        }

        let outcome = hook::detach_all(&mut self.kernel, membership.members());
        for (iface, e) in outcome.failures() {
            error!("rollback left hook point on {}: {}", iface, e);
        }
    }

    /// Removes hook points of every member and the pinned subscription,
    /// attempting all of them even if some fail.
    pub fn unload(&mut self, bond_index: u32) -> Result<()> {
        let membership = self.resolve(bond_index)?;

        let detached = hook::detach_all(&mut self.kernel, membership.members()).into_result();
        let unpinned = self
            .pinner
            .unpin::<L::Programs, _>(&mut self.kernel, membership.bond());

        match (detached, unpinned) {
            (Ok(()), Ok(())) => {
                info!("loop filter removed from {}", membership.bond());
                Ok(())
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Err(detach_err), Err(unpin_err)) => {
                error!("{}", unpin_err);
                Err(detach_err)
            }
        }
    }

    pub fn status(&self, bond_index: u32) -> Result<BondStatus> {
        let membership = self.resolve(bond_index)?;

        let members = membership
            .members()
            .iter()
            .map(|iface| {
                let hooks = hook::query_status(&self.kernel, iface)
                    .map_err(|e| Error::io(format!("couldn't query hooks on {}", iface), e))?;
                Ok(MemberStatus {
                    iface: iface.clone(),
                    hooks,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let pinned = self
            .pinner
            .is_pinned::<L::Programs, _>(&self.kernel, membership.bond())?;

        Ok(BondStatus {
            bond: membership.bond().clone(),
            members,
            pinned,
        })
    }
}
