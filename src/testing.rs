// SPDX-FileCopyrightText: 2023 Huang-Huang Bao
// SPDX-License-Identifier: GPL-2.0-or-later
//! In-memory stand-ins for the kernel-facing traits

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::hook::{AttachPoint, HookStatus, TcAttach, TcHooks};
use crate::netif::NetIfs;
use crate::pin::LinkPinning;
use crate::skel::{LoadConfig, ProgramLoader};

#[derive(Debug, Default)]
pub struct FakeNet {
    links: BTreeMap<u32, String>,
    slaves: HashMap<String, String>,
    active: Option<u32>,
    netns_cookie: u64,
}

impl FakeNet {
    pub fn new() -> Self {
        Self {
            netns_cookie: 4096,
            ..Default::default()
        }
    }

    pub fn with_link(mut self, index: u32, name: &str) -> Self {
        self.links.insert(index, name.to_string());
        self
    }

    pub fn with_slaves(mut self, bond: &str, record: &str) -> Self {
        self.slaves.insert(bond.to_string(), record.to_string());
        self
    }

    pub fn with_active(mut self, index: u32) -> Self {
        self.active = Some(index);
        self
    }

    pub fn without_link(mut self, index: u32) -> Self {
        self.links.remove(&index);
        self
    }
}

impl NetIfs for FakeNet {
    fn index_of(&self, name: &str) -> io::Result<u32> {
        self.links
            .iter()
            .find_map(|(index, link)| (link == name).then_some(*index))
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENODEV))
    }

    fn name_of(&self, index: u32) -> io::Result<String> {
        self.links
            .get(&index)
            .cloned()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENXIO))
    }

    fn bond_slaves_record(&self, bond_name: &str) -> io::Result<String> {
        self.slaves
            .get(bond_name)
            .cloned()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
    }

    fn active_member(&self, bond_index: u32) -> Result<u32> {
        self.active.ok_or_else(|| {
            Error::not_found(
                format!("active member of bond with ifindex {}", bond_index),
                io::ErrorKind::NotFound.into(),
            )
        })
    }

    fn netns_cookie(&self) -> io::Result<u64> {
        Ok(self.netns_cookie)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeOp {
    Create(u32),
    Attach(u32, AttachPoint),
    Destroy(u32),
    AttachNotifier,
    Pin(PathBuf),
    Unpin(PathBuf),
}

/// Programs handed out by [`FakeLoader`], counts drops.
#[derive(Debug, Default)]
pub struct FakeProgs {
    drops: Option<Rc<Cell<usize>>>,
}

impl Drop for FakeProgs {
    fn drop(&mut self) {
        if let Some(drops) = &self.drops {
            drops.set(drops.get() + 1);
        }
    }
}

#[derive(Debug)]
pub struct FakeLink;

/// Hook points, attachments and pins keyed the way the kernel keys them.
#[derive(Debug, Default)]
pub struct FakeKernel {
    hooks: BTreeMap<u32, HookStatus>,
    // interfaces whose hook point existed once and is gone now
    removed: BTreeSet<u32>,
    pins: BTreeSet<PathBuf>,
    ops: Vec<FakeOp>,
    failures: Vec<(FakeOp, i32)>,
}

impl FakeKernel {
    pub fn with_hook(mut self, if_index: u32) -> Self {
        self.hooks.insert(if_index, HookStatus::default());
        self
    }

    pub fn with_pin(mut self, path: &Path) -> Self {
        self.pins.insert(path.to_path_buf());
        self
    }

    /// Makes every later `op` fail with `errno`.
    pub fn fail_on(mut self, op: FakeOp, errno: i32) -> Self {
        self.failures.push((op, errno));
        self
    }

    pub fn has_hook(&self, if_index: u32) -> bool {
        self.hooks.contains_key(&if_index)
    }

    pub fn hook_status(&self, if_index: u32) -> Option<HookStatus> {
        self.hooks.get(&if_index).copied()
    }

    pub fn pins(&self) -> &BTreeSet<PathBuf> {
        &self.pins
    }

    pub fn ops(&self) -> Vec<FakeOp> {
        self.ops.clone()
    }

    /// Removes the hook point behind our back, as another tool would.
    pub fn remove_hook(&mut self, if_index: u32) {
        if self.hooks.remove(&if_index).is_some() {
            self.removed.insert(if_index);
        }
    }

    fn record(&mut self, op: FakeOp) -> io::Result<()> {
        let injected = self
            .failures
            .iter()
            .find_map(|(failing, errno)| (*failing == op).then_some(*errno));
        self.ops.push(op);
        match injected {
            Some(errno) => Err(io::Error::from_raw_os_error(errno)),
            None => Ok(()),
        }
    }
}

impl TcHooks for FakeKernel {
    fn hook_create(&mut self, if_index: u32) -> io::Result<()> {
        self.record(FakeOp::Create(if_index))?;
        if self.hooks.contains_key(&if_index) {
            return Err(io::Error::from_raw_os_error(libc::EEXIST));
        }
        self.hooks.insert(if_index, HookStatus::default());
        Ok(())
    }

    fn hook_destroy(&mut self, if_index: u32) -> io::Result<()> {
        self.record(FakeOp::Destroy(if_index))?;
        match self.hooks.remove(&if_index) {
            Some(_) => {
                self.removed.insert(if_index);
                Ok(())
            }
            None if self.removed.contains(&if_index) => {
                Err(io::Error::from_raw_os_error(libc::EINVAL))
            }
            None => Err(io::Error::from_raw_os_error(libc::ENOENT)),
        }
    }

    fn hook_query(&self, if_index: u32, point: AttachPoint) -> io::Result<bool> {
        let status = self.hooks.get(&if_index).copied().unwrap_or_default();
        Ok(match point {
            AttachPoint::Egress => status.egress,
            AttachPoint::Ingress => status.ingress,
        })
    }
}

impl TcAttach<FakeProgs> for FakeKernel {
    fn hook_attach(
        &mut self,
        _programs: &FakeProgs,
        if_index: u32,
        point: AttachPoint,
    ) -> io::Result<()> {
        self.record(FakeOp::Attach(if_index, point))?;
        let status = self
            .hooks
            .get_mut(&if_index)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        match point {
            AttachPoint::Egress => status.egress = true,
            AttachPoint::Ingress => status.ingress = true,
        }
        Ok(())
    }
}

impl LinkPinning<FakeProgs> for FakeKernel {
    type Link = FakeLink;

    fn attach_notifier(&mut self, _programs: &FakeProgs) -> io::Result<Self::Link> {
        self.record(FakeOp::AttachNotifier)?;
        Ok(FakeLink)
    }

    fn pin_link(&mut self, _link: &mut Self::Link, path: &Path) -> io::Result<()> {
        self.record(FakeOp::Pin(path.to_path_buf()))?;
        if !self.pins.insert(path.to_path_buf()) {
            return Err(io::Error::from_raw_os_error(libc::EEXIST));
        }
        Ok(())
    }

    fn is_pinned(&self, path: &Path) -> io::Result<bool> {
        Ok(self.pins.contains(path))
    }

    fn unpin(&mut self, path: &Path) -> io::Result<()> {
        self.record(FakeOp::Unpin(path.to_path_buf()))?;
        if !self.pins.remove(path) {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeLoader {
    drops: Rc<Cell<usize>>,
    loads: usize,
    last_config: Option<LoadConfig>,
    fail_with: Option<String>,
}

impl FakeLoader {
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// Number of loaded program sets dropped so far.
    pub fn released(&self) -> usize {
        self.drops.get()
    }

    pub fn loads(&self) -> usize {
        self.loads
    }

    pub fn last_config(&self) -> Option<&LoadConfig> {
        self.last_config.as_ref()
    }
}

impl ProgramLoader for FakeLoader {
    type Programs = FakeProgs;

    fn load(&mut self, config: &LoadConfig) -> Result<Self::Programs> {
        self.last_config = Some(config.clone());
        if let Some(message) = &self.fail_with {
            return Err(Error::Load {
                path: config.object.clone(),
                message: message.clone(),
            });
        }
        self.loads += 1;
        Ok(FakeProgs {
            drops: Some(self.drops.clone()),
        })
    }
}
