//! Program header table

use crate::error::{ElfError, Result};
use crate::formats::elf::types::*;
use crate::formats::elf::view::{Record, RecordLayout, RecordTable};
use bitflags::bitflags;

bitflags! {
    /// Segment permission bits (`p_flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        const EXECUTE = PF_X;
        const WRITE = PF_W;
        const READ = PF_R;
    }
}

/// Segment type (`p_type`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Null,
    Load,
    Dynamic,
    Interp,
    Note,
    Shlib,
    Phdr,
    Tls,
    GnuEhFrame,
    GnuStack,
    GnuRelro,
    Other(u32),
}

impl From<u32> for SegmentKind {
    fn from(val: u32) -> Self {
        match val {
            PT_NULL => SegmentKind::Null,
            PT_LOAD => SegmentKind::Load,
            PT_DYNAMIC => SegmentKind::Dynamic,
            PT_INTERP => SegmentKind::Interp,
            PT_NOTE => SegmentKind::Note,
            PT_SHLIB => SegmentKind::Shlib,
            PT_PHDR => SegmentKind::Phdr,
            PT_TLS => SegmentKind::Tls,
            PT_GNU_EH_FRAME => SegmentKind::GnuEhFrame,
            PT_GNU_STACK => SegmentKind::GnuStack,
            PT_GNU_RELRO => SegmentKind::GnuRelro,
            other => SegmentKind::Other(other),
        }
    }
}

/// One program header, index-stable within its image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    pub header: ProgramHeader,
}

impl Segment {
    pub fn kind(&self) -> SegmentKind {
        SegmentKind::from(self.header.p_type)
    }

    pub fn flags(&self) -> SegmentFlags {
        SegmentFlags::from_bits_truncate(self.header.p_flags)
    }

    pub fn is_load(&self) -> bool {
        self.header.p_type == PT_LOAD
    }

    pub fn is_dynamic(&self) -> bool {
        self.header.p_type == PT_DYNAMIC
    }

    pub fn is_interp(&self) -> bool {
        self.header.p_type == PT_INTERP
    }

    pub fn is_note(&self) -> bool {
        self.header.p_type == PT_NOTE
    }

    pub fn is_tls(&self) -> bool {
        self.header.p_type == PT_TLS
    }

    pub fn is_executable(&self) -> bool {
        self.flags().contains(SegmentFlags::EXECUTE)
    }

    pub fn is_writable(&self) -> bool {
        self.flags().contains(SegmentFlags::WRITE)
    }

    pub fn is_readable(&self) -> bool {
        self.flags().contains(SegmentFlags::READ)
    }

    pub fn offset(&self) -> u64 {
        self.header.p_offset
    }

    pub fn vaddr(&self) -> u64 {
        self.header.p_vaddr
    }

    pub fn paddr(&self) -> u64 {
        self.header.p_paddr
    }

    pub fn file_size(&self) -> u64 {
        self.header.p_filesz
    }

    pub fn mem_size(&self) -> u64 {
        self.header.p_memsz
    }

    pub fn align(&self) -> u64 {
        self.header.p_align
    }

    pub fn contains_vaddr(&self, addr: u64) -> bool {
        addr >= self.header.p_vaddr
            && addr - self.header.p_vaddr < self.header.p_memsz
    }

    /// File offset of `vaddr` if this segment maps it from file bytes.
    pub fn vaddr_to_offset(&self, vaddr: u64) -> Option<u64> {
        let delta = vaddr.checked_sub(self.header.p_vaddr)?;
        if delta < self.header.p_filesz {
            self.header.p_offset.checked_add(delta)
        } else {
            None
        }
    }
}

/// Parse `count` program headers of `entry_size` bytes from `data`.
pub fn parse_program_headers(
    data: &[u8],
    entry_size: usize,
    count: usize,
    layout: RecordLayout,
) -> Result<Vec<Segment>> {
    let needed = entry_size.saturating_mul(count);
    let table_bytes = data.get(..needed).ok_or(ElfError::TruncatedTable {
        offset: 0,
        needed: needed as u64,
    })?;
    let table = RecordTable::new(table_bytes, entry_size, layout)?;

    table
        .iter()
        .enumerate()
        .map(|(index, record)| {
            Ok(Segment {
                index,
                header: parse_program_header(&record)?,
            })
        })
        .collect()
}

/// Parse a single program header
pub fn parse_program_header(record: &Record<'_>) -> Result<ProgramHeader> {
    match record.layout().class {
        ElfClass::Elf32 => Ok(ProgramHeader {
            p_type: record.u32(0)?,
            p_offset: record.u32(4)? as u64,
            p_vaddr: record.u32(8)? as u64,
            p_paddr: record.u32(12)? as u64,
            p_filesz: record.u32(16)? as u64,
            p_memsz: record.u32(20)? as u64,
            p_flags: record.u32(24)?,
            p_align: record.u32(28)? as u64,
        }),
        ElfClass::Elf64 => Ok(ProgramHeader {
            p_type: record.u32(0)?,
            p_flags: record.u32(4)?,
            p_offset: record.u64(8)?,
            p_vaddr: record.u64(16)?,
            p_paddr: record.u64(24)?,
            p_filesz: record.u64(32)?,
            p_memsz: record.u64(40)?,
            p_align: record.u64(48)?,
        }),
    }
}
