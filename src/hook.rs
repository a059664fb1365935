// SPDX-FileCopyrightText: 2023 Huang-Huang Bao
// SPDX-License-Identifier: GPL-2.0-or-later
//! Traffic-control hook attachment across bond members
//!
//! The kernel has no transaction over multiple interfaces, so every member
//! carries an explicit [`HookState`] while attaching. On failure the members
//! that advanced past [`HookState::Absent`] are torn down again.

use std::io;

use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::netif::InterfaceRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachPoint {
    Egress,
    Ingress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HookState {
    Absent,
    HookCreated,
    EgressAttached,
    IngressAttached,
}

/// Hook point objects on interfaces, independent of loaded programs
pub trait TcHooks {
    /// Creates hook point for both directions, fails with `AlreadyExists`
    /// if it's there.
    fn hook_create(&mut self, if_index: u32) -> io::Result<()>;

    /// Removes hook point along with all classifiers attached to it, fails
    /// with `NotFound` if there is none.
    fn hook_destroy(&mut self, if_index: u32) -> io::Result<()>;

    /// Whether our classifier is installed at the attach point.
    fn hook_query(&self, if_index: u32, point: AttachPoint) -> io::Result<bool>;
}

pub trait TcAttach<P>: TcHooks {
    fn hook_attach(&mut self, programs: &P, if_index: u32, point: AttachPoint)
        -> io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct HookPoint {
    iface: InterfaceRef,
    state: HookState,
}

impl HookPoint {
    fn new(iface: InterfaceRef) -> Self {
        Self {
            iface,
            state: HookState::Absent,
        }
    }

    pub fn iface(&self) -> &InterfaceRef {
        &self.iface
    }

    pub fn state(&self) -> HookState {
        self.state
    }

    fn advance<P, T: TcAttach<P> + ?Sized>(&mut self, tc: &mut T, programs: &P) -> Result<()> {
        let if_index = self.iface.index();
        let next = match self.state {
            HookState::Absent => {
                match tc.hook_create(if_index) {
                    Ok(()) => (),
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                        debug!("hook point on {} already exists", self.iface);
                    }
                    Err(e) => return Err(self.attach_error("hook point", e)),
                }
                HookState::HookCreated
            }
            // egress first, a record-only hook is harmless if ingress fails
            HookState::HookCreated => {
                tc.hook_attach(programs, if_index, AttachPoint::Egress)
                    .map_err(|e| self.attach_error("egress program", e))?;
                HookState::EgressAttached
            }
            HookState::EgressAttached => {
                tc.hook_attach(programs, if_index, AttachPoint::Ingress)
                    .map_err(|e| self.attach_error("ingress program", e))?;
                HookState::IngressAttached
            }
            HookState::IngressAttached => HookState::IngressAttached,
        };

        debug!("{}: {:?} -> {:?}", self.iface, self.state, next);
        self.state = next;
        Ok(())
    }

    fn complete<P, T: TcAttach<P> + ?Sized>(&mut self, tc: &mut T, programs: &P) -> Result<()> {
        while self.state != HookState::IngressAttached {
            self.advance(tc, programs)?;
        }
        Ok(())
    }

    fn attach_error(&self, what: &'static str, source: io::Error) -> Error {
        Error::Attach {
            what,
            target: self.iface.to_string(),
            source,
        }
    }
}

/// Brings every member to [`HookState::IngressAttached`], or leaves none
/// with a hook point.
pub fn attach_all<P, T: TcAttach<P> + ?Sized>(
    tc: &mut T,
    members: &[InterfaceRef],
    programs: &P,
) -> Result<Vec<HookPoint>> {
    let mut progress: Vec<HookPoint> = Vec::with_capacity(members.len());

    for iface in members {
        let mut point = HookPoint::new(iface.clone());
        let res = point.complete(tc, programs);
        progress.push(point);

        if let Err(err) = res {
            error!("{}", err);
            rollback(tc, &progress);
            return Err(err);
        }
    }

    Ok(progress)
}

fn rollback<T: TcHooks + ?Sized>(tc: &mut T, progress: &[HookPoint]) {
    let advanced: Vec<InterfaceRef> = progress
        .iter()
        .filter(|point| point.state != HookState::Absent)
        .map(|point| point.iface.clone())
        .collect();

    warn!("rolling back hooks on {} interfaces", advanced.len());

    let outcome = detach_all(tc, &advanced);
    for (iface, e) in outcome.failures() {
        error!("rollback left hook point on {}: {}", iface, e);
    }
}

/// Interfaces whose hook point could not be removed
#[derive(Debug, Default)]
pub struct DetachOutcome {
    failures: Vec<(InterfaceRef, io::Error)>,
}

impl DetachOutcome {
    pub fn failures(&self) -> &[(InterfaceRef, io::Error)] {
        &self.failures
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_clean() {
            return Ok(());
        }
        Err(Error::PartialTeardown {
            interfaces: self
                .failures
                .iter()
                .map(|(iface, e)| format!("{} ({})", iface, e))
                .collect(),
        })
    }
}

/// Removes hook points of all given members, continuing past failures.
pub fn detach_all<T: TcHooks + ?Sized>(tc: &mut T, members: &[InterfaceRef]) -> DetachOutcome {
    let mut outcome = DetachOutcome::default();

    for iface in members {
        match tc.hook_destroy(iface.index()) {
            Ok(()) => debug!("removed hook point on {}", iface),
            Err(e) if is_absent(&e) => {
                debug!("no hook point on {}: {}", iface, e);
            }
            Err(e) => {
                warn!("couldn't remove clsact qdisc on {}: {}", iface, e);
                outcome.failures.push((iface.clone(), e));
            }
        }
    }

    outcome
}

// A clsact qdisc removed earlier leaves a noop ingress queue behind, whose
// handle no longer matches, so removing again reports EINVAL.
fn is_absent(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::InvalidInput
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HookStatus {
    pub egress: bool,
    pub ingress: bool,
}

pub fn query_status<T: TcHooks + ?Sized>(tc: &T, iface: &InterfaceRef) -> io::Result<HookStatus> {
    Ok(HookStatus {
        egress: tc.hook_query(iface.index(), AttachPoint::Egress)?,
        ingress: tc.hook_query(iface.index(), AttachPoint::Ingress)?,
    })
}
