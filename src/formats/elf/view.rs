//! Bounds-checked views over fixed-size ELF records.
//!
//! A [`RecordTable`] splits a byte buffer into `entry_size` records; each
//! [`Record`] exposes typed field reads that fail with
//! [`ElfError::TruncatedTable`] instead of reading past the record.

use crate::error::{ElfError, Result};
use crate::formats::elf::types::{ElfClass, ElfData};
use crate::formats::elf::utils::{read_addr, EndianRead};

/// Class and byte order shared by every record of one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordLayout {
    pub class: ElfClass,
    pub endian: ElfData,
}

impl RecordLayout {
    pub fn new(class: ElfClass, endian: ElfData) -> Self {
        Self { class, endian }
    }

    pub fn word_size(&self) -> usize {
        self.class.word_size()
    }

    pub fn header_size(&self) -> usize {
        match self.class {
            ElfClass::Elf32 => 52,
            ElfClass::Elf64 => 64,
        }
    }

    pub fn program_header_size(&self) -> usize {
        match self.class {
            ElfClass::Elf32 => 32,
            ElfClass::Elf64 => 56,
        }
    }

    pub fn section_header_size(&self) -> usize {
        match self.class {
            ElfClass::Elf32 => 40,
            ElfClass::Elf64 => 64,
        }
    }

    pub fn dyn_size(&self) -> usize {
        match self.class {
            ElfClass::Elf32 => 8,
            ElfClass::Elf64 => 16,
        }
    }

    pub fn sym_size(&self) -> usize {
        match self.class {
            ElfClass::Elf32 => 16,
            ElfClass::Elf64 => 24,
        }
    }

    /// Size of a REL (`with_addend == false`) or RELA record.
    pub fn reloc_size(&self, with_addend: bool) -> usize {
        match (self.class, with_addend) {
            (ElfClass::Elf32, false) => 8,  // Elf32_Rel
            (ElfClass::Elf32, true) => 12,  // Elf32_Rela
            (ElfClass::Elf64, false) => 16, // Elf64_Rel
            (ElfClass::Elf64, true) => 24,  // Elf64_Rela
        }
    }
}

/// One record inside a [`RecordTable`].
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    bytes: &'a [u8],
    layout: RecordLayout,
}

impl<'a> Record<'a> {
    pub fn new(bytes: &'a [u8], layout: RecordLayout) -> Self {
        Self { bytes, layout }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn layout(&self) -> RecordLayout {
        self.layout
    }

    pub fn u8(&self, offset: usize) -> Result<u8> {
        self.bytes
            .get(offset)
            .copied()
            .ok_or(ElfError::TruncatedTable {
                offset: offset as u64,
                needed: 1,
            })
    }

    pub fn u16(&self, offset: usize) -> Result<u16> {
        self.bytes.read_u16(offset, self.layout.endian)
    }

    pub fn u32(&self, offset: usize) -> Result<u32> {
        self.bytes.read_u32(offset, self.layout.endian)
    }

    pub fn u64(&self, offset: usize) -> Result<u64> {
        self.bytes.read_u64(offset, self.layout.endian)
    }

    /// Address-sized unsigned field.
    pub fn word(&self, offset: usize) -> Result<u64> {
        read_addr(self.bytes, offset, self.layout.class, self.layout.endian)
    }

    /// Address-sized signed field.
    pub fn sword(&self, offset: usize) -> Result<i64> {
        match self.layout.class {
            ElfClass::Elf32 => self.bytes.read_i32(offset, self.layout.endian).map(i64::from),
            ElfClass::Elf64 => self.bytes.read_i64(offset, self.layout.endian),
        }
    }
}

/// A packed array of fixed-size records.
#[derive(Debug, Clone, Copy)]
pub struct RecordTable<'a> {
    data: &'a [u8],
    entry_size: usize,
    layout: RecordLayout,
}

impl<'a> RecordTable<'a> {
    /// Trailing bytes that do not fill a whole record are ignored.
    pub fn new(data: &'a [u8], entry_size: usize, layout: RecordLayout) -> Result<Self> {
        if entry_size == 0 {
            return Err(ElfError::MalformedHeader(
                "record entry size is zero".to_string(),
            ));
        }
        Ok(Self {
            data,
            entry_size,
            layout,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.entry_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    pub fn record(&self, index: usize) -> Option<Record<'a>> {
        if index >= self.len() {
            return None;
        }
        let start = index * self.entry_size;
        self.data
            .get(start..start + self.entry_size)
            .map(|bytes| Record::new(bytes, self.layout))
    }

    pub fn iter(&self) -> impl Iterator<Item = Record<'a>> + '_ {
        (0..self.len()).filter_map(move |i| self.record(i))
    }
}
