// SPDX-FileCopyrightText: 2023 Huang-Huang Bao
// SPDX-License-Identifier: GPL-2.0-or-later
//! Names and write-once variables of the classifier object

use std::collections::HashMap;
use std::io;
use std::path::Path;

use crate::error::{Error, Result};

pub const PROG_RECORD_EGRESS: &str = "record_egress_pkt";
pub const PROG_FILTER_INGRESS: &str = "filter_ingress_pkt";
pub const PROG_CHANGE_SLAVE: &str = "handle_change_slave";

pub const MAP_IFACE_STATE: &str = "iface_state";

pub const SECTION_RODATA: &str = ".rodata";
pub const SECTION_BSS: &str = ".bss";

pub const VAR_NETNS_COOKIE: &str = "netns_cookie";
pub const VAR_DEBUG_OUTPUT: &str = "debug_output";
pub const VAR_ACTIVE_IFINDEX: &str = "active_ifindex";
pub const VAR_BOND_IFINDEX: &str = "bond_ifindex";

/// Value for one global variable of the object, in native byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedCell {
    pub section: &'static str,
    pub name: &'static str,
    pub value: Vec<u8>,
}

impl SeedCell {
    pub fn new<T: bytemuck::Pod>(section: &'static str, name: &'static str, value: T) -> Self {
        Self {
            section,
            name,
            value: bytemuck::bytes_of(&value).to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarPlacement {
    pub offset: usize,
    pub size: usize,
}

/// Variables of a data section as declared by the object's BTF.
#[derive(Debug, Clone, Default)]
pub struct SectionLayout {
    section: String,
    vars: HashMap<String, VarPlacement>,
}

impl SectionLayout {
    pub fn new(section: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            vars: HashMap::new(),
        }
    }

    pub fn with_var(mut self, name: impl Into<String>, offset: usize, size: usize) -> Self {
        self.vars.insert(name.into(), VarPlacement { offset, size });
        self
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    /// Writes the cells belonging to this section into its initial image.
    ///
    /// Every cell must name a declared variable of exactly the cell's width.
    pub fn write(&self, object: &Path, cells: &[SeedCell], image: &mut [u8]) -> Result<()> {
        for cell in cells.iter().filter(|cell| cell.section == self.section) {
            let placement = self.vars.get(cell.name).ok_or_else(|| {
                Error::not_found(
                    format!("variable '{}' in section {}", cell.name, self.section),
                    io::ErrorKind::NotFound.into(),
                )
            })?;

            let mismatch = |message: String| Error::Load {
                path: object.to_path_buf(),
                message,
            };

            if placement.size != cell.value.len() {
                return Err(mismatch(format!(
                    "variable '{}' is {} bytes, expected {}",
                    cell.name,
                    placement.size,
                    cell.value.len()
                )));
            }
            let range = placement.offset..placement.offset + placement.size;
            let dest = image.get_mut(range).ok_or_else(|| {
                mismatch(format!(
                    "variable '{}' lies outside section {}",
                    cell.name, self.section
                ))
            })?;

            dest.copy_from_slice(&cell.value);
        }
        Ok(())
    }
}
