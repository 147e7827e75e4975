// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! CLI argument parsing.
//!
//! This module only turns raw CLI strings into typed values. Files named here
//! are opened later by the launch sequence.

use anyhow::Context;
use clap::Parser;
use guest_loader::bootstrap::DEFAULT_ENTRY_ADDRESS;
use std::path::PathBuf;

/// Loads an ELF kernel and a boot sector into a new guest and starts it.
#[derive(Parser, Debug)]
pub struct Options {
    /// guest RAM size
    #[clap(
        short = 'm',
        long,
        value_name = "SIZE",
        default_value = "64MB",
        value_parser = parse_memory
    )]
    pub memory: u64,

    /// page-aligned guest physical address the boot sector is loaded at and
    /// executed from
    #[clap(
        long,
        value_name = "ADDRESS",
        default_value_t = DEFAULT_ENTRY_ADDRESS,
        value_parser = parse_number
    )]
    pub entry: u64,

    /// ELF kernel image
    #[clap(short = 'k', long, value_name = "FILE", default_value = "/vmm/kernel")]
    pub kernel: PathBuf,

    /// raw 512-byte boot sector image
    #[clap(short = 'b', long, value_name = "FILE", default_value = "/vmm/boot")]
    pub boot: PathBuf,

    /// clean disk image copied for each new guest; no disk is provisioned
    /// when omitted
    #[clap(long, value_name = "FILE")]
    pub disk_template: Option<PathBuf>,

    /// directory that receives the per-guest disk copies
    #[clap(long, value_name = "DIR", default_value = "/vmm", requires("disk_template"))]
    pub disk_dir: PathBuf,

    /// return as soon as the guest is runnable instead of waiting for it to exit
    #[clap(long)]
    pub no_wait: bool,

    /// write the guest's physical memory to FILE after launch
    #[clap(long, value_name = "FILE")]
    pub dump_memory: Option<PathBuf>,
}

fn parse_memory(s: &str) -> anyhow::Result<u64> {
    || -> Option<u64> {
        let mut b = s.as_bytes();
        if s.ends_with('B') {
            b = &b[..b.len() - 1]
        }
        if b.is_empty() {
            return None;
        }
        let multi = match b[b.len() - 1] as char {
            'T' => Some(1024 * 1024 * 1024 * 1024),
            'G' => Some(1024 * 1024 * 1024),
            'M' => Some(1024 * 1024),
            'K' => Some(1024),
            _ => None,
        };
        if multi.is_some() {
            b = &b[..b.len() - 1]
        }
        let n: u64 = std::str::from_utf8(b).ok()?.parse().ok()?;
        n.checked_mul(multi.unwrap_or(1))
    }()
    .with_context(|| format!("invalid memory size '{0}'", s))
}

/// Parse a number from a string that could be prefixed with 0x to indicate hex.
fn parse_number(s: &str) -> Result<u64, std::num::ParseIntError> {
    match s.strip_prefix("0x") {
        Some(rest) => u64::from_str_radix(rest, 16),
        None => s.parse::<u64>(),
    }
}
