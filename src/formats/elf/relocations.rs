//! REL/RELA relocation tables
//!
//! Only symbol-resolution bookkeeping is done here: finding the slot a
//! relocation patches. Relocations are never applied.

use crate::error::Result;
use crate::formats::elf::types::*;
use crate::formats::elf::view::{Record, RecordLayout, RecordTable};
use bytes::Bytes;

/// Record layout of a relocation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// `Elf*_Rel`: offset and info.
    Rel,
    /// `Elf*_Rela`: offset, info and an explicit addend.
    Rela,
}

impl RelocKind {
    /// Decode the value of a `DT_PLTREL` entry.
    pub fn from_pltrel(val: u64) -> Option<Self> {
        match val as i64 {
            DT_REL => Some(RelocKind::Rel),
            DT_RELA => Some(RelocKind::Rela),
            _ => None,
        }
    }

    pub fn has_addend(&self) -> bool {
        matches!(self, RelocKind::Rela)
    }
}

/// Relocation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub r_offset: u64,
    pub r_info: u64,
    /// Zero for REL entries.
    pub r_addend: i64,
    symbol: u32,
    reloc_type: u32,
}

impl Relocation {
    pub fn decode(record: &Record<'_>, kind: RelocKind) -> Result<Self> {
        let layout = record.layout();
        let word = layout.word_size();
        let r_offset = record.word(0)?;
        let r_info = record.word(word)?;
        let r_addend = if kind.has_addend() {
            record.sword(2 * word)?
        } else {
            0
        };
        let (symbol, reloc_type) = match layout.class {
            ElfClass::Elf32 => ((r_info >> 8) as u32, (r_info & 0xff) as u32),
            ElfClass::Elf64 => ((r_info >> 32) as u32, (r_info & 0xffff_ffff) as u32),
        };
        Ok(Self {
            r_offset,
            r_info,
            r_addend,
            symbol,
            reloc_type,
        })
    }

    pub fn symbol_index(&self) -> u32 {
        self.symbol
    }

    pub fn reloc_type(&self) -> u32 {
        self.reloc_type
    }
}

/// A REL or RELA table copied out of the image.
#[derive(Debug, Clone)]
pub struct RelocationTable {
    bytes: Bytes,
    kind: RelocKind,
    entry_size: usize,
    layout: RecordLayout,
}

impl RelocationTable {
    pub fn new(bytes: Bytes, kind: RelocKind, entry_size: usize, layout: RecordLayout) -> Result<Self> {
        RecordTable::new(&bytes, entry_size, layout)?;
        Ok(Self {
            bytes,
            kind,
            entry_size,
            layout,
        })
    }

    pub fn kind(&self) -> RelocKind {
        self.kind
    }

    pub fn is_rela(&self) -> bool {
        self.kind.has_addend()
    }

    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / self.entry_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries that fail to decode (entry size smaller than the record) are skipped.
    pub fn iter(&self) -> impl Iterator<Item = Relocation> + '_ {
        let kind = self.kind;
        RecordTable::new(&self.bytes, self.entry_size, self.layout)
            .ok()
            .into_iter()
            .flat_map(move |table| {
                (0..table.len()).filter_map(move |i| Relocation::decode(&table.record(i)?, kind).ok())
            })
    }

    /// Slot patched by the first relocation whose symbol satisfies `symbol_matches`.
    ///
    /// The returned value is the relocation offset as stored; the addend is
    /// not applied.
    pub fn find_slot<F>(&self, mut symbol_matches: F) -> Option<u64>
    where
        F: FnMut(u32) -> bool,
    {
        self.iter()
            .find(|r| r.symbol_index() != 0 && symbol_matches(r.symbol_index()))
            .map(|r| r.r_offset)
    }
}
