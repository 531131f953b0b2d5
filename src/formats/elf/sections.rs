//! Section header table

use crate::error::{ElfError, Result};
use crate::formats::elf::types::*;
use crate::formats::elf::view::{Record, RecordLayout, RecordTable};
use bitflags::bitflags;
use bytes::Bytes;

bitflags! {
    /// Section attribute bits (`sh_flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u64 {
        const WRITE = SHF_WRITE;
        const ALLOC = SHF_ALLOC;
        const EXECINSTR = SHF_EXECINSTR;
        const MERGE = SHF_MERGE;
        const STRINGS = SHF_STRINGS;
        const TLS = SHF_TLS;
    }
}

/// Section type (`sh_type`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Null,
    ProgBits,
    SymTab,
    StrTab,
    Rela,
    Hash,
    Dynamic,
    Note,
    NoBits,
    Rel,
    Shlib,
    DynSym,
    GnuHash,
    Other(u32),
}

impl From<u32> for SectionKind {
    fn from(val: u32) -> Self {
        match val {
            SHT_NULL => SectionKind::Null,
            SHT_PROGBITS => SectionKind::ProgBits,
            SHT_SYMTAB => SectionKind::SymTab,
            SHT_STRTAB => SectionKind::StrTab,
            SHT_RELA => SectionKind::Rela,
            SHT_HASH => SectionKind::Hash,
            SHT_DYNAMIC => SectionKind::Dynamic,
            SHT_NOTE => SectionKind::Note,
            SHT_NOBITS => SectionKind::NoBits,
            SHT_REL => SectionKind::Rel,
            SHT_SHLIB => SectionKind::Shlib,
            SHT_DYNSYM => SectionKind::DynSym,
            SHT_GNU_HASH => SectionKind::GnuHash,
            other => SectionKind::Other(other),
        }
    }
}

/// Where a section's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// Inside the image range; read in place.
    Resident,
    /// Outside the image range; fetched from the backing file on each access.
    FileBacked,
    /// Fetched from the backing file while loading and kept by the image.
    Fetched,
    /// No bytes (`SHT_NOBITS`, zero size, or a failed fetch).
    Empty,
}

/// One section header with its resolved name.
#[derive(Debug, Clone)]
pub struct Section {
    pub index: usize,
    pub header: SectionHeader,
    pub name: String,
    residency: Residency,
    fetched: Option<Bytes>,
}

impl Section {
    pub fn new(index: usize, header: SectionHeader, name: String, residency: Residency) -> Self {
        Self {
            index,
            header,
            name,
            residency,
            fetched: None,
        }
    }

    /// Attach bytes fetched from the backing file.
    pub fn with_fetched(mut self, bytes: Bytes) -> Self {
        self.residency = Residency::Fetched;
        self.fetched = Some(bytes);
        self
    }

    /// Mark the section as having no retrievable bytes.
    pub fn into_empty(mut self) -> Self {
        self.residency = Residency::Empty;
        self.fetched = None;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SectionKind {
        SectionKind::from(self.header.sh_type)
    }

    pub fn flags(&self) -> SectionFlags {
        SectionFlags::from_bits_truncate(self.header.sh_flags)
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    pub(crate) fn fetched(&self) -> Option<&Bytes> {
        self.fetched.as_ref()
    }

    pub fn address(&self) -> u64 {
        self.header.sh_addr
    }

    pub fn offset(&self) -> u64 {
        self.header.sh_offset
    }

    pub fn size(&self) -> u64 {
        self.header.sh_size
    }

    /// Index of the associated section (a symbol table's string table).
    pub fn link(&self) -> u32 {
        self.header.sh_link
    }

    pub fn info(&self) -> u32 {
        self.header.sh_info
    }

    pub fn entry_size(&self) -> u64 {
        self.header.sh_entsize
    }

    pub fn alignment(&self) -> u64 {
        self.header.sh_addralign
    }

    pub fn is_executable(&self) -> bool {
        self.flags().contains(SectionFlags::EXECINSTR)
    }

    pub fn is_writable(&self) -> bool {
        self.flags().contains(SectionFlags::WRITE)
    }

    pub fn is_allocated(&self) -> bool {
        self.flags().contains(SectionFlags::ALLOC)
    }

    /// True for sections that occupy no file bytes.
    pub fn is_nobits(&self) -> bool {
        self.header.sh_type == SHT_NOBITS
    }

    /// Symbol tables whose `link` names a string table.
    pub fn is_symbol_table(&self) -> bool {
        matches!(self.header.sh_type, SHT_SYMTAB | SHT_DYNSYM)
    }
}

/// Parse `count` section headers of `entry_size` bytes from `data`.
pub fn parse_section_headers(
    data: &[u8],
    entry_size: usize,
    count: usize,
    layout: RecordLayout,
) -> Result<Vec<SectionHeader>> {
    let needed = entry_size.saturating_mul(count);
    let table_bytes = data.get(..needed).ok_or(ElfError::TruncatedTable {
        offset: 0,
        needed: needed as u64,
    })?;
    let table = RecordTable::new(table_bytes, entry_size, layout)?;
    table.iter().map(|r| parse_section_header(&r)).collect()
}

/// Parse a single section header
pub fn parse_section_header(record: &Record<'_>) -> Result<SectionHeader> {
    match record.layout().class {
        ElfClass::Elf32 => Ok(SectionHeader {
            sh_name: record.u32(0)?,
            sh_type: record.u32(4)?,
            sh_flags: record.u32(8)? as u64,
            sh_addr: record.u32(12)? as u64,
            sh_offset: record.u32(16)? as u64,
            sh_size: record.u32(20)? as u64,
            sh_link: record.u32(24)?,
            sh_info: record.u32(28)?,
            sh_addralign: record.u32(32)? as u64,
            sh_entsize: record.u32(36)? as u64,
        }),
        ElfClass::Elf64 => Ok(SectionHeader {
            sh_name: record.u32(0)?,
            sh_type: record.u32(4)?,
            sh_flags: record.u64(8)?,
            sh_addr: record.u64(16)?,
            sh_offset: record.u64(24)?,
            sh_size: record.u64(32)?,
            sh_link: record.u32(40)?,
            sh_info: record.u32(44)?,
            sh_addralign: record.u64(48)?,
            sh_entsize: record.u64(56)?,
        }),
    }
}
