// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Loader errors.

use crate::boot_sector::BOOT_SECTOR_SIZE;
use crate::hypervisor::GuestHandle;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open {kind} image")]
    Open {
        kind: &'static str,
        #[source]
        err: std::io::Error,
    },
    #[error("failed to query image length")]
    ImageLength(#[source] std::io::Error),
    #[error("failed to seek to offset {offset:#x}")]
    Seek {
        offset: u64,
        #[source]
        err: std::io::Error,
    },
    #[error("failed to read {len:#x} bytes at offset {offset:#x}")]
    Read {
        offset: u64,
        len: u64,
        #[source]
        err: std::io::Error,
    },
    #[error("short read at offset {offset:#x}: wanted {expected:#x} bytes, got {actual:#x}")]
    TruncatedRead { offset: u64, expected: u64, actual: u64 },
    #[error("invalid image format")]
    InvalidImageFormat(#[from] FormatError),
    #[error("invalid page transfer length {0:#x}")]
    InvalidTransferLength(u64),
    #[error("entry address {0:#x} is not page aligned")]
    UnalignedEntryAddress(u64),
    #[error("failed to install page at {gpa:#x} into guest {guest}")]
    Mapping {
        guest: GuestHandle,
        gpa: u64,
        #[source]
        err: anyhow::Error,
    },
    #[error("failed to create guest with {memory_size:#x} bytes of memory")]
    GuestCreation {
        memory_size: u64,
        #[source]
        err: anyhow::Error,
    },
    #[error("failed to allocate a disk image number")]
    DiskIndex(#[source] anyhow::Error),
    #[error("failed to provision disk image {}", .destination.display())]
    DiskProvision {
        destination: PathBuf,
        #[source]
        err: anyhow::Error,
    },
    #[error("failed to mark guest {guest} runnable")]
    SetRunnable {
        guest: GuestHandle,
        #[source]
        err: anyhow::Error,
    },
}

/// Malformed image or segment descriptors.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("bad ELF magic {0:02x?}")]
    BadMagic([u8; 4]),
    #[error("unsupported ELF class {0}, expected 64-bit")]
    UnsupportedClass(u8),
    #[error("unsupported ELF data encoding {0}, expected little endian")]
    UnsupportedByteOrder(u8),
    #[error("ELF target machine {0:#x} is not x86_64")]
    TargetMachineMismatch(u16),
    #[error("program header entry size {0:#x} is too small")]
    ProgramHeaderEntrySize(u16),
    #[error(
        "program header table at {offset:#x} ({count} x {entry_size:#x} bytes) \
         exceeds image length {image_len:#x}"
    )]
    ProgramHeaderTable {
        offset: u64,
        count: u16,
        entry_size: u16,
        image_len: u64,
    },
    #[error("segment file size {file_size:#x} exceeds memory size {mem_size:#x}")]
    FileSizeExceedsMemSize { file_size: u64, mem_size: u64 },
    #[error("segment at {gpa:#x} with memory size {mem_size:#x} overflows the address space")]
    AddressOverflow { gpa: u64, mem_size: u64 },
    #[error("segment file range at {file_offset:#x} with size {file_size:#x} overflows")]
    FileRangeOverflow { file_offset: u64, file_size: u64 },
    #[error("segment address {0:#x} is not page aligned")]
    UnalignedSegment(u64),
    #[error(
        "boot sector image is {0:#x} bytes, expected {expected:#x}",
        expected = BOOT_SECTOR_SIZE
    )]
    BootSectorSize(u64),
}

/// The broad failure categories reported to the operator.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Open, seek, or read failure on a source file.
    IoFailure,
    /// Fewer bytes were available than requested.
    TruncatedRead,
    /// The image or one of its descriptors is malformed.
    InvalidImageFormat,
    /// The hypervisor rejected a page installation.
    MappingFailure,
    /// The hypervisor could not create the guest.
    GuestCreationFailure,
    /// A caller violated an operation's contract.
    InvalidArgument,
    /// The guest disk image could not be provisioned.
    DiskProvisionFailure,
    /// The guest could not be marked runnable.
    RunnableFailure,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Open { .. }
            | Error::ImageLength(_)
            | Error::Seek { .. }
            | Error::Read { .. } => ErrorKind::IoFailure,
            Error::TruncatedRead { .. } => ErrorKind::TruncatedRead,
            Error::InvalidImageFormat(_) => ErrorKind::InvalidImageFormat,
            Error::InvalidTransferLength(_) | Error::UnalignedEntryAddress(_) => {
                ErrorKind::InvalidArgument
            }
            Error::Mapping { .. } => ErrorKind::MappingFailure,
            Error::GuestCreation { .. } => ErrorKind::GuestCreationFailure,
            Error::DiskIndex(_) | Error::DiskProvision { .. } => ErrorKind::DiskProvisionFailure,
            Error::SetRunnable { .. } => ErrorKind::RunnableFailure,
        }
    }
}
