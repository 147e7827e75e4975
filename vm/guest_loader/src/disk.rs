// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-guest disk image provisioning.

use crate::error::Error;
use crate::error::Result;
use crate::hypervisor::Hypervisor;
use anyhow::Context as _;
use std::path::Path;
use std::path::PathBuf;

/// Where a guest's disk image comes from and where copies go.
#[derive(Debug, Clone)]
pub struct DiskConfig {
    /// The clean image each guest starts from.
    pub template: PathBuf,
    /// Directory that receives the per-guest copies.
    pub directory: PathBuf,
}

pub trait DiskProvisioner {
    /// Creates `destination` as a copy of `template`.
    fn copy_image_file(&mut self, template: &Path, destination: &Path) -> anyhow::Result<()>;
}

/// Copies disk images on the host file system.
#[derive(Debug, Default)]
pub struct FsDiskProvisioner;

impl DiskProvisioner for FsDiskProvisioner {
    fn copy_image_file(&mut self, template: &Path, destination: &Path) -> anyhow::Result<()> {
        if let Some(parent) = destination.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let len = fs_err::copy(template, destination).context("failed to copy disk image")?;
        tracing::debug!(
            template = %template.display(),
            destination = %destination.display(),
            len,
            "copied disk image"
        );
        Ok(())
    }
}

/// The path of disk image number `index` in `directory`.
pub fn disk_image_path(directory: &Path, index: u32) -> PathBuf {
    directory.join(format!("fs{index}.img"))
}

/// Allocates a fresh disk number from the hypervisor and copies the template
/// to the corresponding path, returning that path.
pub fn provision_disk(
    hv: &mut dyn Hypervisor,
    disks: &mut dyn DiskProvisioner,
    config: &DiskConfig,
) -> Result<PathBuf> {
    let index = hv.allocate_disk_index().map_err(Error::DiskIndex)?;
    let destination = disk_image_path(&config.directory, index);

    tracing::info!(destination = %destination.display(), "creating virtual disk");
    disks
        .copy_image_file(&config.template, &destination)
        .map_err(|err| Error::DiskProvision {
            destination: destination.clone(),
            err,
        })?;
    Ok(destination)
}
