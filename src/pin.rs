// SPDX-FileCopyrightText: 2023 Huang-Huang Bao
// SPDX-License-Identifier: GPL-2.0-or-later
//! Persisted change-notification subscription of a bond

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::netif::InterfaceRef;

const PIN_PREFIX: &str = "pkt-loop-filter-";

pub trait LinkPinning<P> {
    type Link;

    fn attach_notifier(&mut self, programs: &P) -> io::Result<Self::Link>;

    fn pin_link(&mut self, link: &mut Self::Link, path: &Path) -> io::Result<()>;

    fn is_pinned(&self, path: &Path) -> io::Result<bool>;

    fn unpin(&mut self, path: &Path) -> io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct SubscriptionPinner {
    pin_dir: PathBuf,
}

impl SubscriptionPinner {
    pub fn new(pin_dir: impl Into<PathBuf>) -> Self {
        Self {
            pin_dir: pin_dir.into(),
        }
    }

    pub fn pin_path(&self, bond: &InterfaceRef) -> PathBuf {
        self.pin_dir
            .join(format!("{}{}", PIN_PREFIX, bond.index()))
    }

    pub fn is_pinned<P, T>(&self, ops: &T, bond: &InterfaceRef) -> Result<bool>
    where
        T: LinkPinning<P> + ?Sized,
    {
        let path = self.pin_path(bond);
        ops.is_pinned(&path)
            .map_err(|e| Error::io(format!("couldn't check {}", path.display()), e))
    }

    /// Attaches the change-notification program and persists the link, the
    /// link itself is released on return.
    pub fn pin<P, T>(&self, ops: &mut T, programs: &P, bond: &InterfaceRef) -> Result<()>
    where
        T: LinkPinning<P> + ?Sized,
    {
        let path = self.pin_path(bond);
        let already_exists = || Error::AlreadyExists {
            what: format!("pinned link {} of bond {}", path.display(), bond),
        };

        if self.is_pinned::<P, T>(ops, bond)? {
            return Err(already_exists());
        }

        let mut link = ops.attach_notifier(programs).map_err(|source| Error::Attach {
            what: "change notification program",
            target: bond.to_string(),
            source,
        })?;

        ops.pin_link(&mut link, &path).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                already_exists()
            } else {
                Error::io(format!("couldn't pin link to {}", path.display()), e)
            }
        })?;

        info!("pinned change notification link at {}", path.display());
        Ok(())
    }

    pub fn unpin<P, T>(&self, ops: &mut T, bond: &InterfaceRef) -> Result<()>
    where
        T: LinkPinning<P> + ?Sized,
    {
        let path = self.pin_path(bond);
        match ops.unpin(&path) {
            Ok(()) => {
                debug!("removed {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} is not pinned", path.display());
                Ok(())
            }
            Err(e) => Err(Error::io(
                format!("couldn't remove pinned link {}", path.display()),
                e,
            )),
        }
    }
}
