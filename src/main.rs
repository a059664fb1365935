// SPDX-FileCopyrightText: 2023 Huang-Huang Bao
// SPDX-License-Identifier: GPL-2.0-or-later
mod config;
mod error;
mod hook;
mod instance;
mod netif;
mod pin;
mod route;
mod skel;
#[cfg(test)]
mod testing;

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use tracing::level_filters::LevelFilter;

use config::Config;
use instance::{Instance, InstanceConfig};
use netif::{NetIfs, SysNetIfs};
use skel::libbpf::{LibbpfKernel, LibbpfLoader};

const HELP: &str = "\
Packet loop filter for bond devices

USAGE:
  pkt-loop-filter [OPTIONS] <bond>

OPTIONS:
  -h, --help               Print this message
  -c, --config <file>      Path to configuration file
      --unload             Remove filters from members of the bond
      --status             Show filter state of members of the bond
      --debug              Enable debug output of BPF programs
      --object <file>      Path to BPF object file
      --pin-dir <dir>      Directory to pin the change notification link in
  -v                       Increase log verbosity, may be repeated
";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Mode {
    #[default]
    Load,
    Unload,
    Status,
}

#[derive(Default)]
struct Args {
    config_file: Option<PathBuf>,
    if_name: Option<String>,
    mode: Mode,
    debug: bool,
    object: Option<PathBuf>,
    pin_dir: Option<PathBuf>,
    verbose: u8,
}

fn parse_env_args() -> Result<Args> {
    use lexopt::prelude::*;
    let mut args = Args::default();
    let mut parser = lexopt::Parser::from_env();
    while let Some(opt) = parser.next()? {
        match opt {
            Short('h') | Long("help") => {
                print!("{}", HELP);
                std::process::exit(0);
            }
            Short('c') | Long("config") => {
                args.config_file = Some(parser.value()?.parse()?);
            }
            Long("unload") => {
                args.mode = Mode::Unload;
            }
            Long("status") => {
                args.mode = Mode::Status;
            }
            Long("debug") => {
                args.debug = true;
            }
            Long("object") => {
                args.object = Some(parser.value()?.parse()?);
            }
            Long("pin-dir") => {
                args.pin_dir = Some(parser.value()?.parse()?);
            }
            Short('v') => {
                args.verbose = args.verbose.saturating_add(1);
            }
            Value(if_name) if args.if_name.is_none() => {
                args.if_name = Some(if_name.string()?);
            }
            _ => return Err(opt.unexpected().into()),
        }
    }

    Ok(args)
}

fn log_level(verbose: u8, debug: bool) -> LevelFilter {
    match verbose {
        _ if debug => LevelFilter::DEBUG,
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    }
}

fn init_logging(level: LevelFilter) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = parse_env_args()?;

    let mut config = if let Some(config_path) = &args.config_file {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };

    if let Some(object) = args.object {
        config.object = object;
    }
    if let Some(pin_dir) = args.pin_dir {
        config.pin_dir = pin_dir;
    }
    config.debug |= args.debug;

    init_logging(log_level(args.verbose, config.debug));

    let if_name = args
        .if_name
        .ok_or_else(|| anyhow!("Missing interface name"))?;

    let mut inst = Instance::new(
        InstanceConfig::from(&config),
        SysNetIfs::new(&config.sysfs_net_dir),
        LibbpfLoader,
        LibbpfKernel::new()?,
    );

    let bond_index = inst
        .netifs()
        .index_of(&if_name)
        .map_err(|e| anyhow!("Couldn't find interface '{}': {}", if_name, e))?;

    match args.mode {
        Mode::Load => {
            let summary = inst.load(bond_index)?;
            println!("{}", summary);
        }
        Mode::Unload => inst.unload(bond_index)?,
        Mode::Status => print!("{}", inst.status(bond_index)?),
    }

    Ok(())
}
