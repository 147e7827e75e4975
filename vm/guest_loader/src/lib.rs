// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Loads an ELF kernel and a raw boot sector into the physical memory of a
//! freshly created guest before it is allowed to run.
//!
//! The loader never touches guest memory directly. Every page goes through a
//! [`staging::StagingPage`] and is handed to the [`hypervisor::Hypervisor`]
//! for installation, so the same code drives a real hypervisor backend or the
//! in-process [`memory::InMemoryHypervisor`].

#![forbid(unsafe_code)]

pub mod boot_sector;
pub mod bootstrap;
pub mod disk;
pub mod elf;
pub mod error;
pub mod hypervisor;
pub mod memory;
pub mod segment;
pub mod staging;
pub mod transfer;

#[cfg(test)]
mod test_helpers;

pub use error::Error;
pub use error::ErrorKind;
pub use error::Result;
