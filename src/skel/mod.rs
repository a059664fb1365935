// SPDX-FileCopyrightText: 2023 Huang-Huang Bao
// SPDX-License-Identifier: GPL-2.0-or-later

pub mod libbpf;
pub mod types;

use std::path::PathBuf;

use tracing::debug;

use crate::error::Result;

use types::{SeedCell, SECTION_BSS, SECTION_RODATA};

/// Write-once values exposed to the classifier before it is loaded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Seeds {
    pub active_ifindex: u32,
    pub bond_ifindex: u32,
    pub netns_cookie: u64,
    pub debug: bool,
}

impl Seeds {
    /// Named variables of the object to write before load.
    pub fn cells(&self) -> Vec<SeedCell> {
        vec![
            SeedCell::new(SECTION_RODATA, types::VAR_NETNS_COOKIE, self.netns_cookie),
            SeedCell::new(SECTION_RODATA, types::VAR_DEBUG_OUTPUT, u8::from(self.debug)),
            SeedCell::new(SECTION_BSS, types::VAR_ACTIVE_IFINDEX, self.active_ifindex),
            SeedCell::new(SECTION_BSS, types::VAR_BOND_IFINDEX, self.bond_ifindex),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub object: PathBuf,
    pub state_max_entries: u32,
    pub seeds: Seeds,
}

/// Opens, configures and loads the classifier object.
///
/// The returned programs are shared by reference with the hook and pin
/// operations of a run and dropped once when the run ends.
pub trait ProgramLoader {
    type Programs;

    fn load(&mut self, config: &LoadConfig) -> Result<Self::Programs>;
}

/// Frees loaded programs, no-op if already released.
pub fn release<P>(programs: &mut Option<P>) {
    if programs.take().is_some() {
        debug!("released BPF object");
    }
}
