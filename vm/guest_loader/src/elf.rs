// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Loader for static ELF64 kernel images.
//!
//! Every header field is untrusted. The file header is validated before any
//! other field is looked at, and the program header table and each segment's
//! file range are checked against the real image length before seeking.
//! Program headers are read one at a time, each at its own offset, so tables
//! with padding between entries load correctly.

use crate::error::Error;
use crate::error::FormatError;
use crate::error::Result;
use crate::hypervisor::GuestHandle;
use crate::hypervisor::Hypervisor;
use crate::segment::Segment;
use crate::transfer::read_full;
use crate::transfer::seek_to;
use crate::transfer::source_len;
use object::elf;
use std::io::Read;
use std::io::Seek;
use std::path::Path;

type LE = object::LittleEndian;
const LE: LE = LE {};

type FileHeader = elf::FileHeader64<LE>;
type ProgramHeader = elf::ProgramHeader64<LE>;

const FILE_HEADER_SIZE: usize = size_of::<FileHeader>();
const PROGRAM_HEADER_SIZE: usize = size_of::<ProgramHeader>();

/// Information about the loaded kernel image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelLoadInfo {
    /// The entry point recorded in the ELF header.
    pub entrypoint: u64,
    /// Number of `PT_LOAD` segments placed in guest memory.
    pub segments_loaded: usize,
    /// Lowest guest physical address covered by a loaded segment.
    pub lowest_address: Option<u64>,
    /// One past the highest guest physical address covered by a loaded
    /// segment.
    pub highest_address: Option<u64>,
}

/// Opens the ELF image at `path` and loads it into `guest`.
pub fn load_kernel_image(
    hv: &mut dyn Hypervisor,
    guest: GuestHandle,
    path: &Path,
) -> Result<KernelLoadInfo> {
    tracing::debug!(%guest, path = %path.display(), "loading kernel image");
    let mut file = fs_err::File::open(path).map_err(|err| Error::Open {
        kind: "kernel",
        err,
    })?;
    load_elf_image(hv, guest, &mut file)
}

/// Loads every `PT_LOAD` segment of the ELF image in `source` into `guest`,
/// at the segment's virtual address interpreted as a guest physical
/// address.
///
/// Stops at the first failing segment. Segments loaded before it remain in
/// guest memory.
pub fn load_elf_image<F>(
    hv: &mut dyn Hypervisor,
    guest: GuestHandle,
    source: &mut F,
) -> Result<KernelLoadInfo>
where
    F: Read + Seek,
{
    let image_len = source_len(source)?;
    let header = read_file_header(source)?;

    let ph_offset = header.e_phoff.get(LE);
    let ph_count = header.e_phnum.get(LE);
    let ph_entry_size = header.e_phentsize.get(LE);

    if ph_count != 0 {
        if usize::from(ph_entry_size) < PROGRAM_HEADER_SIZE {
            return Err(FormatError::ProgramHeaderEntrySize(ph_entry_size).into());
        }
        let table_len = u64::from(ph_count) * u64::from(ph_entry_size);
        ph_offset
            .checked_add(table_len)
            .filter(|&end| end <= image_len)
            .ok_or(FormatError::ProgramHeaderTable {
                offset: ph_offset,
                count: ph_count,
                entry_size: ph_entry_size,
                image_len,
            })?;
    }

    let mut info = KernelLoadInfo {
        entrypoint: header.e_entry.get(LE),
        segments_loaded: 0,
        lowest_address: None,
        highest_address: None,
    };

    for index in 0..ph_count {
        let entry_offset = ph_offset + u64::from(index) * u64::from(ph_entry_size);
        let phdr = read_program_header(source, entry_offset)?;

        let p_type = phdr.p_type.get(LE);
        if p_type != elf::PT_LOAD {
            tracing::trace!(index, p_type, "skipping program header");
            continue;
        }

        let segment = Segment {
            gpa: phdr.p_vaddr.get(LE),
            mem_size: phdr.p_memsz.get(LE),
            file_offset: phdr.p_offset.get(LE),
            file_size: phdr.p_filesz.get(LE),
        };
        segment.validate()?;

        // Catch truncated images before touching guest memory for this segment.
        let file_end = segment.file_offset + segment.file_size;
        if file_end > image_len {
            return Err(Error::TruncatedRead {
                offset: segment.file_offset,
                expected: segment.file_size,
                actual: image_len.saturating_sub(segment.file_offset),
            });
        }

        segment.load(hv, guest, source)?;

        if segment.mem_size != 0 {
            let end = segment.gpa + segment.mem_size;
            let lowest = info.lowest_address.map_or(segment.gpa, |a| a.min(segment.gpa));
            let highest = info.highest_address.map_or(end, |a| a.max(end));
            info.lowest_address = Some(lowest);
            info.highest_address = Some(highest);
        }
        info.segments_loaded += 1;
    }

    tracing::info!(
        %guest,
        entrypoint = info.entrypoint,
        segments = info.segments_loaded,
        lowest = ?info.lowest_address,
        highest = ?info.highest_address,
        "kernel image loaded"
    );
    Ok(info)
}

fn read_file_header<F>(source: &mut F) -> Result<FileHeader>
where
    F: Read + Seek,
{
    seek_to(source, 0)?;
    let mut buf = [0; FILE_HEADER_SIZE];
    let actual = read_full(source, &mut buf).map_err(|err| Error::Read {
        offset: 0,
        len: FILE_HEADER_SIZE as u64,
        err,
    })?;
    parse_file_header(&buf[..actual])
}

/// Parses and sanity checks an ELF file header from the start of `bytes`.
///
/// `bytes` may have any alignment.
fn parse_file_header(bytes: &[u8]) -> Result<FileHeader> {
    // Nothing else in the header means anything until the magic matches.
    let mut magic = [0; 4];
    let present = bytes.len().min(magic.len());
    magic[..present].copy_from_slice(&bytes[..present]);
    if magic != elf::ELFMAG {
        return Err(FormatError::BadMagic(magic).into());
    }

    let (header, _) =
        object::pod::from_bytes::<FileHeader>(bytes).map_err(|()| Error::TruncatedRead {
            offset: 0,
            expected: FILE_HEADER_SIZE as u64,
            actual: bytes.len() as u64,
        })?;

    let ident = &header.e_ident;
    if ident.class != elf::ELFCLASS64 {
        return Err(FormatError::UnsupportedClass(ident.class).into());
    }
    if ident.data != elf::ELFDATA2LSB {
        return Err(FormatError::UnsupportedByteOrder(ident.data).into());
    }
    let machine = header.e_machine.get(LE);
    if machine != elf::EM_X86_64 {
        tracing::error!(
            machine,
            "ELF file target machine mismatch, was the file built for x86_64?"
        );
        return Err(FormatError::TargetMachineMismatch(machine).into());
    }

    Ok(*header)
}

fn read_program_header<F>(source: &mut F, offset: u64) -> Result<ProgramHeader>
where
    F: Read + Seek,
{
    seek_to(source, offset)?;
    let mut buf = [0; PROGRAM_HEADER_SIZE];
    let actual = read_full(source, &mut buf).map_err(|err| Error::Read {
        offset,
        len: PROGRAM_HEADER_SIZE as u64,
        err,
    })?;
    parse_program_header(&buf[..actual], offset)
}

/// Parses the program header at file offset `offset` from `bytes`, which
/// may have any alignment.
fn parse_program_header(bytes: &[u8], offset: u64) -> Result<ProgramHeader> {
    let (phdr, _) =
        object::pod::from_bytes::<ProgramHeader>(bytes).map_err(|()| Error::TruncatedRead {
            offset,
            expected: PROGRAM_HEADER_SIZE as u64,
            actual: bytes.len() as u64,
        })?;
    Ok(*phdr)
}
