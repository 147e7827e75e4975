// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Raw boot sector loading.

use crate::error::Error;
use crate::error::FormatError;
use crate::error::Result;
use crate::hypervisor::GuestHandle;
use crate::hypervisor::Hypervisor;
use crate::hypervisor::PAGE_SIZE;
use crate::segment::load_segment;
use crate::transfer::source_len;
use std::io::Read;
use std::io::Seek;
use std::path::Path;

/// Size of a boot sector image. This is architectural, not read from the
/// image.
pub const BOOT_SECTOR_SIZE: u64 = 512;

/// Opens the boot sector image at `path` and loads it at `entry_address`.
pub fn load_boot_image(
    hv: &mut dyn Hypervisor,
    guest: GuestHandle,
    path: &Path,
    entry_address: u64,
) -> Result<()> {
    tracing::debug!(%guest, path = %path.display(), "loading boot sector");
    let mut file = fs_err::File::open(path).map_err(|err| Error::Open {
        kind: "boot",
        err,
    })?;
    load_boot_sector(hv, guest, &mut file, entry_address)
}

/// Copies the boot sector in `source` verbatim to `entry_address`.
///
/// The image must be exactly [`BOOT_SECTOR_SIZE`] bytes and `entry_address`
/// must be page aligned. It has no zero-fill region beyond the rest of the
/// page it lands in.
pub fn load_boot_sector<F>(
    hv: &mut dyn Hypervisor,
    guest: GuestHandle,
    source: &mut F,
    entry_address: u64,
) -> Result<()>
where
    F: Read + Seek,
{
    if entry_address % PAGE_SIZE != 0 {
        return Err(Error::UnalignedEntryAddress(entry_address));
    }

    let len = source_len(source)?;
    if len != BOOT_SECTOR_SIZE {
        return Err(FormatError::BootSectorSize(len).into());
    }

    load_segment(
        hv,
        guest,
        entry_address,
        BOOT_SECTOR_SIZE,
        source,
        BOOT_SECTOR_SIZE,
        0,
    )?;

    tracing::info!(%guest, entry_address, "boot sector loaded");
    Ok(())
}
