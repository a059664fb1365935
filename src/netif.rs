// SPDX-FileCopyrightText: 2023 Huang-Huang Bao
// SPDX-License-Identifier: GPL-2.0-or-later
//! Network interface identity and bond membership resolution

use std::cell::OnceCell;
use std::ffi::{CStr, CString};
use std::fmt::Display;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{self, Read};
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::PathBuf;

use tracing::debug;

use crate::error::{Error, Result};
use crate::route;

// sysfs attributes are at most one page
const SLAVES_RECORD_MAX_LEN: usize = 4096;

/// Stable interface identifier, name is only kept for diagnostics.
#[derive(Debug, Clone)]
pub struct InterfaceRef {
    index: u32,
    name: OnceCell<String>,
}

impl InterfaceRef {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            name: OnceCell::new(),
        }
    }

    pub fn with_name(index: u32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: OnceCell::from(name.into()),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Resolves the name on first use, falls back to the index if the
    /// interface is gone.
    pub fn name<N: NetIfs + ?Sized>(&self, netifs: &N) -> &str {
        self.name.get_or_init(|| {
            netifs
                .name_of(self.index)
                .unwrap_or_else(|_| format!("ifindex {}", self.index))
        })
    }
}

impl PartialEq for InterfaceRef {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for InterfaceRef {}

impl Hash for InterfaceRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state)
    }
}

impl Display for InterfaceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name.get() {
            Some(name) => f.write_str(name),
            None => write!(f, "ifindex {}", self.index),
        }
    }
}

/// Member interfaces of a bond device, in the order the kernel lists them.
#[derive(Debug, Clone)]
pub struct BondMembership {
    bond: InterfaceRef,
    members: Vec<InterfaceRef>,
}

impl BondMembership {
    pub fn bond(&self) -> &InterfaceRef {
        &self.bond
    }

    pub fn members(&self) -> &[InterfaceRef] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[allow(unused)]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Lookups of interface state on the host
pub trait NetIfs {
    fn index_of(&self, name: &str) -> io::Result<u32>;

    fn name_of(&self, index: u32) -> io::Result<String>;

    /// Raw bond membership record, a whitespace separated list of names.
    fn bond_slaves_record(&self, bond_name: &str) -> io::Result<String>;

    fn active_member(&self, bond_index: u32) -> Result<u32>;

    fn netns_cookie(&self) -> io::Result<u64>;
}

pub fn resolve_members<N: NetIfs + ?Sized>(
    netifs: &N,
    bond_index: u32,
    max_members: usize,
) -> Result<BondMembership> {
    let bond_name = netifs
        .name_of(bond_index)
        .map_err(|e| Error::not_found(format!("interface with ifindex {}", bond_index), e))?;

    let record = netifs.bond_slaves_record(&bond_name).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            Error::not_found(format!("bond slaves of {}", bond_name), e)
        } else {
            Error::io(format!("couldn't read bond slaves of {}", bond_name), e)
        }
    })?;

    let names: Vec<&str> = record.split_whitespace().collect();
    if names.len() > max_members {
        return Err(Error::CapacityExceeded {
            bond: bond_name,
            max: max_members,
        });
    }

    let members = names
        .into_iter()
        .map(|name| {
            let index = netifs
                .index_of(name)
                .map_err(|e| Error::not_found(format!("ifindex for iface '{}'", name), e))?;
            Ok(InterfaceRef::with_name(index, name))
        })
        .collect::<Result<Vec<_>>>()?;

    debug!("bond {} has members {:?}", bond_name, names_of(&members));

    Ok(BondMembership {
        bond: InterfaceRef::with_name(bond_index, bond_name),
        members,
    })
}

fn names_of(members: &[InterfaceRef]) -> Vec<String> {
    members.iter().map(ToString::to_string).collect()
}

/// Lookups against the running kernel
#[derive(Debug, Clone)]
pub struct SysNetIfs {
    sysfs_net_dir: PathBuf,
}

impl SysNetIfs {
    pub fn new(sysfs_net_dir: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_net_dir: sysfs_net_dir.into(),
        }
    }
}

impl NetIfs for SysNetIfs {
    fn index_of(&self, name: &str) -> io::Result<u32> {
        let name = CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
        if index == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(index)
    }

    fn name_of(&self, index: u32) -> io::Result<String> {
        let mut buf = [0 as libc::c_char; libc::IF_NAMESIZE];
        let ptr = unsafe { libc::if_indextoname(index, buf.as_mut_ptr()) };
        if ptr.is_null() {
            return Err(io::Error::last_os_error());
        }
        let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
        Ok(name.to_string_lossy().into_owned())
    }

    fn bond_slaves_record(&self, bond_name: &str) -> io::Result<String> {
        let path = self
            .sysfs_net_dir
            .join(bond_name)
            .join("bonding")
            .join("slaves");

        // single read to get a consistent snapshot of the list
        let mut buf = vec![0u8; SLAVES_RECORD_MAX_LEN];
        let len = File::open(path)?.read(&mut buf)?;
        buf.truncate(len);

        String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn active_member(&self, bond_index: u32) -> Result<u32> {
        route::query_active_port(bond_index)
    }

    fn netns_cookie(&self) -> io::Result<u64> {
        let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let sock = unsafe { OwnedFd::from_raw_fd(fd) };

        let mut cookie = 0u64;
        let mut len = mem::size_of::<u64>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                sock.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_NETNS_COOKIE,
                &mut cookie as *mut u64 as *mut libc::c_void,
                &mut len,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(cookie)
    }
}
