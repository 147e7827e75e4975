// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Guest launch sequence.
//!
//! A guest moves through [`BootstrapStage`]s in order. Any failure aborts the
//! sequence where it stands: memory already populated is left as is, and the
//! guest is never marked runnable.

use crate::boot_sector::load_boot_image;
use crate::disk::provision_disk;
use crate::disk::DiskConfig;
use crate::disk::DiskProvisioner;
use crate::disk::FsDiskProvisioner;
use crate::elf::load_kernel_image;
use crate::elf::KernelLoadInfo;
use crate::error::Error;
use crate::error::Result;
use crate::hypervisor::GuestHandle;
use crate::hypervisor::Hypervisor;
use std::path::PathBuf;

/// Entry address of the boot sector in guest physical memory.
pub const DEFAULT_ENTRY_ADDRESS: u64 = 0x7000;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum BootstrapStage {
    Created,
    KernelLoaded,
    BootloaderLoaded,
    DiskProvisioned,
    Runnable,
}

#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub memory_size: u64,
    pub entry_address: u64,
    pub kernel_path: PathBuf,
    pub boot_image_path: PathBuf,
    /// Disk provisioning is skipped when `None`, e.g. when the guest brings
    /// its own storage.
    pub disk: Option<DiskConfig>,
    /// Block until the guest exits once it is runnable.
    pub wait: bool,
}

#[derive(Debug)]
pub struct LaunchedGuest {
    pub guest: GuestHandle,
    pub stage: BootstrapStage,
    pub kernel: KernelLoadInfo,
    pub disk_image: Option<PathBuf>,
}

pub struct GuestBootstrapper<'a> {
    hv: &'a mut dyn Hypervisor,
    disks: Box<dyn 'a + DiskProvisioner>,
}

impl<'a> GuestBootstrapper<'a> {
    pub fn new(hv: &'a mut dyn Hypervisor) -> Self {
        Self {
            hv,
            disks: Box::new(FsDiskProvisioner),
        }
    }

    /// Replaces the default file system disk provisioner.
    pub fn with_disk_provisioner(mut self, disks: impl 'a + DiskProvisioner) -> Self {
        self.disks = Box::new(disks);
        self
    }

    pub fn launch_guest(&mut self, config: &LaunchConfig) -> Result<LaunchedGuest> {
        let guest = self
            .hv
            .create_guest(config.memory_size, config.entry_address)
            .map_err(|err| Error::GuestCreation {
                memory_size: config.memory_size,
                err,
            })?;
        let mut stage = BootstrapStage::Created;
        trace_stage(guest, stage);

        let kernel = load_kernel_image(self.hv, guest, &config.kernel_path)?;
        advance(guest, &mut stage, BootstrapStage::KernelLoaded);

        load_boot_image(self.hv, guest, &config.boot_image_path, config.entry_address)?;
        advance(guest, &mut stage, BootstrapStage::BootloaderLoaded);

        let disk_image = match &config.disk {
            Some(disk) => {
                let path = provision_disk(self.hv, &mut *self.disks, disk)?;
                advance(guest, &mut stage, BootstrapStage::DiskProvisioned);
                Some(path)
            }
            None => None,
        };

        self.hv
            .set_guest_runnable(guest)
            .map_err(|err| Error::SetRunnable { guest, err })?;
        advance(guest, &mut stage, BootstrapStage::Runnable);

        if config.wait {
            self.hv.wait_for_guest(guest);
        }

        Ok(LaunchedGuest {
            guest,
            stage,
            kernel,
            disk_image,
        })
    }
}

fn advance(guest: GuestHandle, stage: &mut BootstrapStage, next: BootstrapStage) {
    debug_assert!(next > *stage);
    *stage = next;
    trace_stage(guest, next);
}

fn trace_stage(guest: GuestHandle, stage: BootstrapStage) {
    tracing::info!(%guest, ?stage, "guest bootstrap");
}
