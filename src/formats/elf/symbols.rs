//! Symbol table entries and the symbol view handed to callers

use crate::demangle::demangle_one;
use crate::error::{ElfError, Result};
use crate::formats::elf::image::LoadedImage;
use crate::formats::elf::types::*;
use crate::formats::elf::utils::{cstring_bytes, read_cstring};
use crate::formats::elf::view::{Record, RecordLayout, RecordTable};
use bytes::Bytes;
use std::fmt;

/// Symbol type (low nibble of `st_info`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    NoType,
    Object,
    Function,
    Section,
    File,
    Common,
    Tls,
    GnuIndirect,
    Other(u8),
}

impl From<u8> for SymbolKind {
    fn from(val: u8) -> Self {
        match val {
            STT_NOTYPE => SymbolKind::NoType,
            STT_OBJECT => SymbolKind::Object,
            STT_FUNC => SymbolKind::Function,
            STT_SECTION => SymbolKind::Section,
            STT_FILE => SymbolKind::File,
            STT_COMMON => SymbolKind::Common,
            STT_TLS => SymbolKind::Tls,
            STT_GNU_IFUNC => SymbolKind::GnuIndirect,
            other => SymbolKind::Other(other),
        }
    }
}

/// Symbol binding (high nibble of `st_info`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolBinding {
    Local,
    Global,
    Weak,
    Other(u8),
}

impl From<u8> for SymbolBinding {
    fn from(val: u8) -> Self {
        match val {
            STB_LOCAL => SymbolBinding::Local,
            STB_GLOBAL => SymbolBinding::Global,
            STB_WEAK => SymbolBinding::Weak,
            other => SymbolBinding::Other(other),
        }
    }
}

/// Symbol visibility (low bits of `st_other`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolVisibility {
    Default,
    Internal,
    Hidden,
    Protected,
}

impl From<u8> for SymbolVisibility {
    fn from(val: u8) -> Self {
        match val & 0x3 {
            STV_INTERNAL => SymbolVisibility::Internal,
            STV_HIDDEN => SymbolVisibility::Hidden,
            STV_PROTECTED => SymbolVisibility::Protected,
            _ => SymbolVisibility::Default,
        }
    }
}

/// One decoded symbol table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolEntry {
    /// Position in the table it was read from.
    pub index: usize,
    pub st_name: u32,
    pub st_value: u64,
    pub st_size: u64,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
}

impl SymbolEntry {
    pub fn decode(record: &Record<'_>, index: usize) -> Result<Self> {
        match record.layout().class {
            ElfClass::Elf32 => Ok(Self {
                index,
                st_name: record.u32(0)?,
                st_value: record.u32(4)? as u64,
                st_size: record.u32(8)? as u64,
                st_info: record.u8(12)?,
                st_other: record.u8(13)?,
                st_shndx: record.u16(14)?,
            }),
            ElfClass::Elf64 => Ok(Self {
                index,
                st_name: record.u32(0)?,
                st_info: record.u8(4)?,
                st_other: record.u8(5)?,
                st_shndx: record.u16(6)?,
                st_value: record.u64(8)?,
                st_size: record.u64(16)?,
            }),
        }
    }

    pub fn st_bind(&self) -> u8 {
        self.st_info >> 4
    }

    pub fn st_type(&self) -> u8 {
        self.st_info & 0xf
    }

    pub fn kind(&self) -> SymbolKind {
        SymbolKind::from(self.st_type())
    }

    pub fn binding(&self) -> SymbolBinding {
        SymbolBinding::from(self.st_bind())
    }

    pub fn visibility(&self) -> SymbolVisibility {
        SymbolVisibility::from(self.st_other)
    }

    pub fn is_undefined(&self) -> bool {
        self.st_shndx == SHN_UNDEF
    }

    /// Defined in a real section of this image: neither the undefined
    /// sentinel nor a reserved index (`SHN_ABS`, `SHN_COMMON`, ...).
    pub fn is_defined(&self) -> bool {
        self.st_shndx != SHN_UNDEF && !(SHN_LORESERVE..=SHN_HIRESERVE).contains(&self.st_shndx)
    }

    pub fn is_function(&self) -> bool {
        self.st_type() == STT_FUNC
    }

    /// Data symbols resolve through the general GOT; everything else through
    /// the PLT relocations.
    pub fn is_data(&self) -> bool {
        self.st_type() == STT_OBJECT
    }

    pub fn is_global(&self) -> bool {
        self.st_bind() == STB_GLOBAL
    }

    pub fn is_weak(&self) -> bool {
        self.st_bind() == STB_WEAK
    }
}

/// Decode the symbol at `index` of a raw symbol table.
pub(crate) fn symbol_at(
    symbols: &[u8],
    entry_size: usize,
    layout: RecordLayout,
    index: usize,
) -> Option<SymbolEntry> {
    let table = RecordTable::new(symbols, entry_size, layout).ok()?;
    let record = table.record(index)?;
    SymbolEntry::decode(&record, index).ok()
}

/// The link-time symbol table (`.symtab`) with its string table.
#[derive(Debug, Clone)]
pub struct StaticSymbols {
    symbols: Bytes,
    strings: Bytes,
    entry_size: usize,
    layout: RecordLayout,
}

impl StaticSymbols {
    pub fn new(symbols: Bytes, strings: Bytes, entry_size: usize, layout: RecordLayout) -> Result<Self> {
        RecordTable::new(&symbols, entry_size, layout)?;
        Ok(Self {
            symbols,
            strings,
            entry_size,
            layout,
        })
    }

    pub fn len(&self) -> usize {
        self.symbols.len() / self.entry_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entry(&self, index: usize) -> Option<SymbolEntry> {
        symbol_at(&self.symbols, self.entry_size, self.layout, index)
    }

    pub fn entries(&self) -> impl Iterator<Item = SymbolEntry> + '_ {
        (0..self.len()).filter_map(move |i| self.entry(i))
    }

    pub fn name(&self, entry: &SymbolEntry) -> Result<&str> {
        read_cstring(&self.strings, entry.st_name as usize)
    }

    /// Linear scan; the static table has no hash index.
    pub fn find_by_name(&self, name: &str) -> Option<SymbolEntry> {
        self.entries().find(|e| {
            e.st_name != 0
                && cstring_bytes(&self.strings, e.st_name as usize)
                    .map(|n| n == name.as_bytes())
                    .unwrap_or(false)
        })
    }
}

/// Which table a [`SymbolRecord`] was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolSource {
    Dynamic,
    Static,
}

/// A symbol table slot viewed through its owning image.
///
/// Records are created on demand by lookups and iteration. They borrow the
/// image, so they cannot outlive the snapshot that produced them.
#[derive(Clone, Copy)]
pub struct SymbolRecord<'img> {
    image: &'img LoadedImage,
    entry: SymbolEntry,
    source: SymbolSource,
    got_slot: Option<u64>,
    plt_stub: Option<u64>,
}

impl<'img> SymbolRecord<'img> {
    pub(crate) fn new(
        image: &'img LoadedImage,
        entry: SymbolEntry,
        source: SymbolSource,
        got_slot: Option<u64>,
        plt_stub: Option<u64>,
    ) -> Self {
        Self {
            image,
            entry,
            source,
            got_slot,
            plt_stub,
        }
    }

    pub fn image(&self) -> &'img LoadedImage {
        self.image
    }

    pub fn entry(&self) -> &SymbolEntry {
        &self.entry
    }

    pub fn source(&self) -> SymbolSource {
        self.source
    }

    pub fn index(&self) -> usize {
        self.entry.index
    }

    pub fn name_offset(&self) -> u32 {
        self.entry.st_name
    }

    pub fn value(&self) -> u64 {
        self.entry.st_value
    }

    pub fn size(&self) -> u64 {
        self.entry.st_size
    }

    pub fn kind(&self) -> SymbolKind {
        self.entry.kind()
    }

    pub fn binding(&self) -> SymbolBinding {
        self.entry.binding()
    }

    pub fn visibility(&self) -> SymbolVisibility {
        self.entry.visibility()
    }

    pub fn section_index(&self) -> u16 {
        self.entry.st_shndx
    }

    pub fn is_defined(&self) -> bool {
        self.entry.is_defined()
    }

    pub fn is_undefined(&self) -> bool {
        self.entry.is_undefined()
    }

    /// Resolve the name through the string table of the source table.
    pub fn try_name(&self) -> Result<&'img str> {
        match self.source {
            SymbolSource::Dynamic => self
                .image
                .dynamic()
                .ok_or(ElfError::NoStringTable)?
                .symbol_name(&self.entry),
            SymbolSource::Static => self
                .image
                .static_symbols()
                .ok_or(ElfError::NoStringTable)?
                .name(&self.entry),
        }
    }

    pub fn name(&self) -> Option<&'img str> {
        self.try_name().ok()
    }

    pub fn demangled_name(&self) -> Option<String> {
        self.name()
            .and_then(demangle_one)
            .map(|r| r.demangled)
    }

    /// GOT slot written by the dynamic linker for this symbol, if any.
    pub fn got_slot(&self) -> Option<u64> {
        self.got_slot
    }

    /// PLT stub derived from the GOT slot; only set for non-data symbols.
    pub fn plt_stub(&self) -> Option<u64> {
        self.plt_stub
    }

    /// Address a caller would reach this symbol at.
    ///
    /// Defined symbols use their value, rebased by the image base for
    /// shared objects. An undefined `STT_OBJECT` resolves to its GOT slot;
    /// every other undefined kind (`FUNC`, `NOTYPE`, `GNU_IFUNC`, ...)
    /// resolves to its PLT stub.
    pub fn effective_address(&self) -> Option<u64> {
        match self.entry.st_shndx {
            SHN_ABS => Some(self.entry.st_value),
            // Same split as the GOT/PLT scan in `LoadedImage::make_record`.
            SHN_UNDEF if self.entry.is_data() => self.got_slot,
            SHN_UNDEF => self.plt_stub,
            _ if self.image.header().is_shared_object() => {
                self.image.base().checked_add(self.entry.st_value)
            }
            _ => Some(self.entry.st_value),
        }
    }
}

impl fmt::Debug for SymbolRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolRecord")
            .field("image", &self.image.name())
            .field("name", &self.name())
            .field("entry", &self.entry)
            .field("source", &self.source)
            .field("got_slot", &self.got_slot)
            .field("plt_stub", &self.plt_stub)
            .finish()
    }
}

impl PartialEq for SymbolRecord<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.image, other.image)
            && self.source == other.source
            && self.entry == other.entry
    }
}
