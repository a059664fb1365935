// SPDX-FileCopyrightText: 2023 Huang-Huang Bao
// SPDX-License-Identifier: GPL-2.0-or-later
//! User-facing configuration types

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_object")]
    pub object: PathBuf,
    #[serde(default = "default_max_members")]
    pub max_members: usize,
    #[serde(default = "default_state_max_entries")]
    pub state_max_entries: u32,
    #[serde(default = "default_pin_dir")]
    pub pin_dir: PathBuf,
    #[serde(default = "default_sysfs_net_dir")]
    pub sysfs_net_dir: PathBuf,
    #[serde(default)]
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            object: default_object(),
            max_members: default_max_members(),
            state_max_entries: default_state_max_entries(),
            pin_dir: default_pin_dir(),
            sysfs_net_dir: default_sysfs_net_dir(),
            debug: false,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

fn default_object() -> PathBuf {
    PathBuf::from("/usr/lib/pkt-loop-filter/pkt-loop-filter.kern.o")
}

const fn default_max_members() -> usize {
    64
}

const fn default_state_max_entries() -> u32 {
    1024
}

fn default_pin_dir() -> PathBuf {
    PathBuf::from("/sys/fs/bpf")
}

fn default_sysfs_net_dir() -> PathBuf {
    PathBuf::from("/sys/class/net")
}
