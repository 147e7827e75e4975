// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared test utilities: tracing setup and synthetic ELF images.

use object::elf;
use object::pod::bytes_of;
use object::U16;
use object::U32;
use object::U64;
use tracing::metadata::LevelFilter;

type LE = object::LittleEndian;
const LE: LE = LE {};

/// Routes `tracing` output to the test harness. Safe to call from every test.
pub fn init_tracing() {
    static ONCE: std::sync::Once = std::sync::Once::new();

    ONCE.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::builder()
            .with_default_directive(LevelFilter::TRACE.into())
            .from_env_lossy();
        let _ = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_test_writer()
            .with_env_filter(filter)
            .try_init();
    });
}

/// Deterministic non-zero filler so copied bytes are distinguishable from
/// zero fill.
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 + 1).collect()
}

pub struct TestSegment {
    pub p_type: u32,
    pub vaddr: u64,
    pub data: Vec<u8>,
    pub mem_size: u64,
}

impl TestSegment {
    pub fn load(vaddr: u64, data: Vec<u8>, mem_size: u64) -> Self {
        Self {
            p_type: elf::PT_LOAD,
            vaddr,
            data,
            mem_size,
        }
    }
}

/// Builds an ELF64 image with the program header table right after the file
/// header and each segment's bytes appended in order.
pub struct TestElf {
    pub entry: u64,
    pub class: u8,
    pub machine: u16,
    /// Distance between program header entries. Values above the natural
    /// entry size leave gaps in the table.
    pub ph_entry_size: u16,
    pub segments: Vec<TestSegment>,
}

pub const FILE_HEADER_SIZE: usize = size_of::<elf::FileHeader64<LE>>();
pub const PROGRAM_HEADER_SIZE: usize = size_of::<elf::ProgramHeader64<LE>>();

impl TestElf {
    pub fn new(entry: u64, segments: Vec<TestSegment>) -> Self {
        Self {
            entry,
            class: elf::ELFCLASS64,
            machine: elf::EM_X86_64,
            ph_entry_size: PROGRAM_HEADER_SIZE as u16,
            segments,
        }
    }

    /// File offset of segment `index`'s data.
    pub fn data_offset(&self, index: usize) -> usize {
        let table_end = FILE_HEADER_SIZE + self.segments.len() * self.ph_entry_size as usize;
        table_end
            + self.segments[..index]
                .iter()
                .map(|s| s.data.len())
                .sum::<usize>()
    }

    pub fn build(&self) -> Vec<u8> {
        let header = elf::FileHeader64::<LE> {
            e_ident: elf::Ident {
                magic: elf::ELFMAG,
                class: self.class,
                data: elf::ELFDATA2LSB,
                version: elf::EV_CURRENT,
                os_abi: elf::ELFOSABI_NONE,
                abi_version: 0,
                padding: [0; 7],
            },
            e_type: U16::new(LE, elf::ET_EXEC),
            e_machine: U16::new(LE, self.machine),
            e_version: U32::new(LE, elf::EV_CURRENT.into()),
            e_entry: U64::new(LE, self.entry),
            e_phoff: U64::new(LE, FILE_HEADER_SIZE as u64),
            e_shoff: U64::new(LE, 0),
            e_flags: U32::new(LE, 0),
            e_ehsize: U16::new(LE, FILE_HEADER_SIZE as u16),
            e_phentsize: U16::new(LE, self.ph_entry_size),
            e_phnum: U16::new(LE, self.segments.len() as u16),
            e_shentsize: U16::new(LE, 0),
            e_shnum: U16::new(LE, 0),
            e_shstrndx: U16::new(LE, 0),
        };

        let mut image = bytes_of(&header).to_vec();
        for (index, segment) in self.segments.iter().enumerate() {
            let phdr = elf::ProgramHeader64::<LE> {
                p_type: U32::new(LE, segment.p_type),
                p_flags: U32::new(LE, elf::PF_R | elf::PF_W | elf::PF_X),
                p_offset: U64::new(LE, self.data_offset(index) as u64),
                p_vaddr: U64::new(LE, segment.vaddr),
                p_paddr: U64::new(LE, segment.vaddr),
                p_filesz: U64::new(LE, segment.data.len() as u64),
                p_memsz: U64::new(LE, segment.mem_size),
                p_align: U64::new(LE, 0x1000),
            };
            image.extend_from_slice(bytes_of(&phdr));
            image.resize(
                image.len() + (self.ph_entry_size as usize).saturating_sub(PROGRAM_HEADER_SIZE),
                0,
            );
        }
        for segment in &self.segments {
            image.extend_from_slice(&segment.data);
        }
        image
    }
}
