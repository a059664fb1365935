// SPDX-FileCopyrightText: 2023 Huang-Huang Bao
// SPDX-License-Identifier: GPL-2.0-or-later
//! Error kinds of interface-hook orchestration

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Interface, bond or program entry point is missing.
    #[error("couldn't find {what}: {source}")]
    NotFound {
        what: String,
        #[source]
        source: io::Error,
    },

    #[error("too many interfaces in bond {bond}, at most {max} are supported")]
    CapacityExceeded { bond: String, max: usize },

    /// Kernel rejected the program object, message is the loader's verbatim.
    #[error("failed to load BPF object {}: {message}", .path.display())]
    Load { path: PathBuf, message: String },

    #[error("couldn't attach {what} to {target}: {source}")]
    Attach {
        what: &'static str,
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("{what} already exists")]
    AlreadyExists { what: String },

    #[error("couldn't remove hooks on {}", .interfaces.join(", "))]
    PartialTeardown { interfaces: Vec<String> },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn not_found(what: impl Into<String>, source: io::Error) -> Self {
        Self::NotFound {
            what: what.into(),
            source,
        }
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}
