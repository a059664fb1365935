// SPDX-FileCopyrightText: 2023 Huang-Huang Bao
// SPDX-License-Identifier: GPL-2.0-or-later

use std::cell::RefCell;
use std::fs::{self, File};
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;
use std::time::Instant;

use libbpf_rs::btf::{types as btf_types, Btf};
use libbpf_rs::{
    ErrorKind, Link, Object, ObjectBuilder, Program, TcAttachPoint, TcHook, TcHookBuilder,
    TC_EGRESS, TC_INGRESS,
};
use tracing::{debug, info};

use super::types::{self, SectionLayout};
use super::{LoadConfig, ProgramLoader};
use crate::error::{Error, Result};
use crate::hook::{AttachPoint, TcAttach, TcHooks};
use crate::pin::LinkPinning;

/// Loaded classifier object
pub struct LoopFilterObj {
    // libbpf-rs only attaches through mutable program handles
    obj: RefCell<Object>,
}

impl LoopFilterObj {
    fn has_prog(&self, name: &str) -> bool {
        self.obj.borrow().progs().any(|prog| prog.name() == name)
    }
}

fn find_prog<'obj>(obj: &'obj Object, name: &str) -> Option<Program<'obj>> {
    obj.progs().find(|prog| prog.name() == name)
}

fn section_layout(btf: &Btf<'_>, section: &str) -> Option<SectionLayout> {
    let datasec = btf.type_by_name::<btf_types::DataSec<'_>>(section)?;

    let layout = datasec.iter().fold(SectionLayout::new(section), |layout, info| {
        let name = btf
            .type_by_id::<btf_types::Var<'_>>(info.ty)
            .and_then(|var| var.name().and_then(|name| name.to_str()).map(str::to_string));
        match name {
            Some(name) => layout.with_var(name, info.offset as usize, info.size as usize),
            None => layout,
        }
    });
    Some(layout)
}

#[derive(Debug, Default)]
pub struct LibbpfLoader;

impl ProgramLoader for LibbpfLoader {
    type Programs = LoopFilterObj;

    fn load(&mut self, config: &LoadConfig) -> Result<Self::Programs> {
        let start = Instant::now();

        let load_err = |e: libbpf_rs::Error| Error::Load {
            path: config.object.clone(),
            message: e.to_string(),
        };

        let btf = Btf::from_path(&config.object).map_err(load_err)?;
        let cells = config.seeds.cells();

        let mut open_obj = ObjectBuilder::default()
            .debug(config.seeds.debug)
            .open_file(&config.object)
            .map_err(load_err)?;

        let mut iface_state_sized = false;
        let mut seeded = Vec::new();

        for mut map in open_obj.maps_mut() {
            let name = map.name().to_string_lossy().into_owned();
            if name == types::MAP_IFACE_STATE {
                map.set_max_entries(config.state_max_entries)
                    .map_err(load_err)?;
                iface_state_sized = true;
                continue;
            }

            let Some(section) = [types::SECTION_RODATA, types::SECTION_BSS]
                .into_iter()
                .find(|section| name.ends_with(section))
            else {
                continue;
            };

            let layout = section_layout(&btf, section).ok_or_else(|| Error::Load {
                path: config.object.clone(),
                message: format!("section {} has no BTF", section),
            })?;
            let image = map.initial_value_mut().ok_or_else(|| Error::Load {
                path: config.object.clone(),
                message: format!("section {} is not mmaped", section),
            })?;
            layout.write(&config.object, &cells, image)?;

            debug!("seeded section {} of map {}", layout.section(), name);
            seeded.push(section);
        }

        if !iface_state_sized {
            return Err(Error::not_found(
                format!("map '{}' in BPF object", types::MAP_IFACE_STATE),
                io::ErrorKind::NotFound.into(),
            ));
        }
        for section in [types::SECTION_RODATA, types::SECTION_BSS] {
            if !seeded.contains(&section) {
                return Err(Error::Load {
                    path: config.object.clone(),
                    message: format!("section {} is missing", section),
                });
            }
        }

        let obj = LoopFilterObj {
            obj: RefCell::new(open_obj.load().map_err(load_err)?),
        };

        for name in [
            types::PROG_RECORD_EGRESS,
            types::PROG_FILTER_INGRESS,
            types::PROG_CHANGE_SLAVE,
        ] {
            if !obj.has_prog(name) {
                return Err(Error::not_found(
                    format!("program '{}'", name),
                    io::ErrorKind::NotFound.into(),
                ));
            }
        }

        info!("loop filter BPF object loaded in {:?}", start.elapsed());

        Ok(obj)
    }
}

fn libbpf_io_error(err: libbpf_rs::Error) -> io::Error {
    let kind = match err.kind() {
        ErrorKind::NotFound => io::ErrorKind::NotFound,
        ErrorKind::AlreadyExists => io::ErrorKind::AlreadyExists,
        ErrorKind::PermissionDenied => io::ErrorKind::PermissionDenied,
        ErrorKind::InvalidInput => io::ErrorKind::InvalidInput,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, err.to_string())
}

impl AttachPoint {
    fn tc_attach_point(self) -> TcAttachPoint {
        match self {
            AttachPoint::Egress => TC_EGRESS,
            AttachPoint::Ingress => TC_INGRESS,
        }
    }

    fn prog_name(self) -> &'static str {
        match self {
            AttachPoint::Egress => types::PROG_RECORD_EGRESS,
            AttachPoint::Ingress => types::PROG_FILTER_INGRESS,
        }
    }
}

fn tc_hook(fd: BorrowedFd<'_>, if_index: u32, attach_point: TcAttachPoint) -> TcHook {
    TcHookBuilder::new(fd)
        .ifindex(if_index as _)
        .replace(true)
        .handle(1)
        .priority(1)
        .hook(attach_point)
}

/// Kernel hook and pin operations through libbpf
#[derive(Debug)]
pub struct LibbpfKernel {
    // Hook creation, removal and query never hand the program fd to the
    // kernel, they run without a loaded object in unload and status mode.
    no_prog: File,
}

impl LibbpfKernel {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            no_prog: File::open("/dev/null")?,
        })
    }

    fn hook_of(&self, if_index: u32, attach_point: TcAttachPoint) -> TcHook {
        tc_hook(self.no_prog.as_fd(), if_index, attach_point)
    }
}

impl TcHooks for LibbpfKernel {
    fn hook_create(&mut self, if_index: u32) -> io::Result<()> {
        self.hook_of(if_index, TC_INGRESS | TC_EGRESS)
            .create()
            .map_err(libbpf_io_error)?;
        Ok(())
    }

    fn hook_destroy(&mut self, if_index: u32) -> io::Result<()> {
        self.hook_of(if_index, TC_INGRESS | TC_EGRESS)
            .destroy()
            .map_err(libbpf_io_error)
    }

    fn hook_query(&self, if_index: u32, point: AttachPoint) -> io::Result<bool> {
        match self.hook_of(if_index, point.tc_attach_point()).query() {
            Ok(_prog_id) => Ok(true),
            Err(e) => {
                let e = libbpf_io_error(e);
                match e.kind() {
                    // missing hook point reports EINVAL
                    io::ErrorKind::NotFound | io::ErrorKind::InvalidInput => Ok(false),
                    _ => Err(e),
                }
            }
        }
    }
}

impl TcAttach<LoopFilterObj> for LibbpfKernel {
    fn hook_attach(
        &mut self,
        programs: &LoopFilterObj,
        if_index: u32,
        point: AttachPoint,
    ) -> io::Result<()> {
        let obj = programs.obj.borrow();
        let prog = find_prog(&obj, point.prog_name()).ok_or(io::ErrorKind::NotFound)?;

        tc_hook(prog.as_fd(), if_index, point.tc_attach_point())
            .attach()
            .map_err(libbpf_io_error)?;
        Ok(())
    }
}

impl LinkPinning<LoopFilterObj> for LibbpfKernel {
    type Link = Link;

    fn attach_notifier(&mut self, programs: &LoopFilterObj) -> io::Result<Self::Link> {
        let mut obj = programs.obj.borrow_mut();
        let prog = obj
            .progs_mut()
            .find(|prog| prog.name() == types::PROG_CHANGE_SLAVE)
            .ok_or(io::ErrorKind::NotFound)?;
        let link = prog.attach().map_err(libbpf_io_error)?;
        Ok(link)
    }

    fn pin_link(&mut self, link: &mut Self::Link, path: &Path) -> io::Result<()> {
        link.pin(path).map_err(libbpf_io_error)
    }

    fn is_pinned(&self, path: &Path) -> io::Result<bool> {
        path.try_exists()
    }

    fn unpin(&mut self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}
