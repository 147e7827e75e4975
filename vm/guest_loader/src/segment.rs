// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Loading of one file-backed segment into a guest physical range.

use crate::error::FormatError;
use crate::error::Result;
use crate::hypervisor::GuestHandle;
use crate::hypervisor::Hypervisor;
use crate::hypervisor::PAGE_SIZE;
use crate::staging::StagingPage;
use crate::transfer::install_zero_page;
use crate::transfer::transfer_page;
use std::io::Read;
use std::io::Seek;

/// A region of guest physical memory whose first `file_size` bytes come from
/// the source file and the remainder is zero.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Segment {
    pub gpa: u64,
    pub mem_size: u64,
    pub file_offset: u64,
    pub file_size: u64,
}

impl Segment {
    /// Checks the descriptor before any of it is used to address memory or
    /// the file.
    pub fn validate(&self) -> std::result::Result<(), FormatError> {
        if self.file_size > self.mem_size {
            return Err(FormatError::FileSizeExceedsMemSize {
                file_size: self.file_size,
                mem_size: self.mem_size,
            });
        }
        if self.gpa % PAGE_SIZE != 0 {
            return Err(FormatError::UnalignedSegment(self.gpa));
        }
        // The last page is installed whole, so its end must be addressable too.
        self.mem_size
            .checked_next_multiple_of(PAGE_SIZE)
            .and_then(|len| self.gpa.checked_add(len))
            .ok_or(FormatError::AddressOverflow {
                gpa: self.gpa,
                mem_size: self.mem_size,
            })?;
        self.file_offset
            .checked_add(self.file_size)
            .ok_or(FormatError::FileRangeOverflow {
                file_offset: self.file_offset,
                file_size: self.file_size,
            })?;
        Ok(())
    }

    /// Populates `[gpa, gpa + mem_size)` in `guest`.
    ///
    /// Nothing is rolled back on failure; pages installed before the failing
    /// one stay in the guest.
    pub fn load<F>(&self, hv: &mut dyn Hypervisor, guest: GuestHandle, source: &mut F) -> Result<()>
    where
        F: Read + Seek,
    {
        self.validate()?;
        if self.mem_size == 0 {
            return Ok(());
        }

        let mut staging = StagingPage::new();

        let mut offset = 0;
        while offset < self.file_size {
            let len = (self.file_size - offset).min(PAGE_SIZE);
            transfer_page(
                hv,
                &mut staging,
                source,
                self.file_offset + offset,
                guest,
                self.gpa + offset,
                len,
            )?;
            offset += len;
        }

        // The tail of the last file-backed page was zeroed by the transfer.
        let end = self.gpa + self.mem_size;
        let mut gpa = self.gpa + offset.next_multiple_of(PAGE_SIZE);
        while gpa < end {
            install_zero_page(hv, &mut staging, guest, gpa)?;
            gpa += PAGE_SIZE;
        }

        tracing::debug!(
            %guest,
            gpa = self.gpa,
            mem_size = self.mem_size,
            file_offset = self.file_offset,
            file_size = self.file_size,
            "loaded segment"
        );
        Ok(())
    }
}

/// Loads `file_size` bytes at `file_offset` of `source` into `guest` at
/// `gpa`, zero filling up to `mem_size`.
pub fn load_segment<F>(
    hv: &mut dyn Hypervisor,
    guest: GuestHandle,
    gpa: u64,
    mem_size: u64,
    source: &mut F,
    file_size: u64,
    file_offset: u64,
) -> Result<()>
where
    F: Read + Seek,
{
    Segment {
        gpa,
        mem_size,
        file_offset,
        file_size,
    }
    .load(hv, guest, source)
}
