//! Dynamic section analysis
//!
//! The `.dynamic` array is decoded once per image, then resolved in two
//! phases: first the symbol-side tables (strings, symbols, hash), then the
//! relocation-side tables (RELA, REL, JMPREL, PLTGOT). Each phase is a pure
//! function of the entries and the image memory and returns its own struct;
//! the table is assembled only after both have finished.
//!
//! Every table is copied out of image memory at construction, so lookups
//! never touch the process again.

use crate::error::{ElfError, Result};
use crate::formats::elf::address::{AddressSpace, Rebase};
use crate::formats::elf::hash::{hash_table_size, parse_hash_header, HashTable, HASH_HEADER_SIZE};
use crate::formats::elf::relocations::{RelocKind, RelocationTable};
use crate::formats::elf::symbols::{symbol_at, SymbolEntry};
use crate::formats::elf::types::*;
use crate::formats::elf::utils::{cstring_bytes, read_cstring};
use crate::formats::elf::view::{Record, RecordLayout, RecordTable};
use bytes::Bytes;
use tracing::{debug, trace};

/// Dynamic entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicEntry {
    pub d_tag: i64,
    pub d_val: u64,
}

impl DynamicEntry {
    pub fn decode(record: &Record<'_>) -> Result<Self> {
        let word = record.layout().word_size();
        Ok(Self {
            d_tag: record.sword(0)?,
            d_val: record.word(word)?,
        })
    }
}

/// Location of one table referenced from the dynamic section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableInfo {
    pub address: u64,
    pub size: u64,
    pub entry_size: u64,
}

impl TableInfo {
    pub fn is_present(&self) -> bool {
        self.address != 0
    }
}

/// Decode entries until `DT_NULL` or the end of `raw`, whichever comes first.
pub fn parse_entries(raw: &[u8], layout: RecordLayout) -> Result<Vec<DynamicEntry>> {
    let table = RecordTable::new(raw, layout.dyn_size(), layout)?;
    let mut entries = Vec::with_capacity(table.len());
    for record in table.iter() {
        let entry = DynamicEntry::decode(&record)?;
        if entry.d_tag == DT_NULL {
            break;
        }
        entries.push(entry);
    }
    Ok(entries)
}

/// Phase 1 result.
#[derive(Debug, Clone, Default)]
struct SymbolTables {
    string_table: TableInfo,
    strings: Option<Bytes>,
    symbol_table: TableInfo,
    symbols: Option<Bytes>,
    symbol_count: u32,
    hash_address: u64,
    hash: Option<HashTable>,
}

/// Phase 2 result.
#[derive(Debug, Clone, Default)]
struct RelocationTables {
    rela_info: TableInfo,
    rela: Option<RelocationTable>,
    rel_info: TableInfo,
    rel: Option<RelocationTable>,
    plt_info: TableInfo,
    plt_kind: Option<RelocKind>,
    plt: Option<RelocationTable>,
    plt_got: u64,
}

fn read_or_log(space: &AddressSpace, what: &'static str, addr: u64, len: u64) -> Option<Bytes> {
    match space.read_table(addr, len) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            debug!(table = what, addr = format_args!("{:#x}", addr), len, error = %e, "Dynamic table unreadable");
            None
        }
    }
}

fn resolve_symbol_tables(
    entries: &[DynamicEntry],
    space: &AddressSpace,
    layout: RecordLayout,
) -> SymbolTables {
    let rebase = space.rebase();
    let mut out = SymbolTables::default();
    let mut syment = 0u64;

    for e in entries {
        match e.d_tag {
            DT_STRTAB if out.string_table.address == 0 => {
                out.string_table.address = rebase.apply(e.d_val)
            }
            DT_STRSZ if out.string_table.size == 0 => out.string_table.size = e.d_val,
            DT_SYMTAB if out.symbol_table.address == 0 => {
                out.symbol_table.address = rebase.apply(e.d_val)
            }
            DT_SYMENT if syment == 0 => syment = e.d_val,
            DT_HASH if out.hash_address == 0 => out.hash_address = rebase.apply(e.d_val),
            _ => {}
        }
    }

    if out.string_table.is_present() && out.string_table.size > 0 {
        out.strings = read_or_log(space, "strtab", out.string_table.address, out.string_table.size);
    }

    if out.hash_address != 0 {
        out.hash = read_or_log(space, "hash", out.hash_address, HASH_HEADER_SIZE as u64)
            .and_then(|head| parse_hash_header(&head, layout.endian).ok())
            .and_then(|(nbucket, nchain)| {
                read_or_log(space, "hash", out.hash_address, hash_table_size(nbucket, nchain))
            })
            .and_then(|words| HashTable::parse(words, layout.endian).ok());
    }
    // The hash table's chain count is the only reliable dynamic symbol count.
    out.symbol_count = out.hash.as_ref().map_or(0, |h| h.chain_count());

    out.symbol_table.entry_size = if syment != 0 {
        syment
    } else {
        layout.sym_size() as u64
    };
    match (out.symbol_count as u64).checked_mul(out.symbol_table.entry_size) {
        Some(size) => out.symbol_table.size = size,
        None => {
            debug!(
                count = out.symbol_count,
                entry_size = out.symbol_table.entry_size,
                "Dynamic symbol table size overflows"
            );
            return out;
        }
    }
    if out.symbol_table.is_present() && out.symbol_table.size > 0 {
        out.symbols = read_or_log(space, "symtab", out.symbol_table.address, out.symbol_table.size);
    }

    out
}

fn load_relocations(
    space: &AddressSpace,
    what: &'static str,
    info: TableInfo,
    kind: RelocKind,
    layout: RecordLayout,
) -> Option<RelocationTable> {
    if !info.is_present() || info.size == 0 {
        return None;
    }
    let bytes = read_or_log(space, what, info.address, info.size)?;
    RelocationTable::new(bytes, kind, info.entry_size as usize, layout).ok()
}

fn resolve_relocation_tables(
    entries: &[DynamicEntry],
    space: &AddressSpace,
    layout: RecordLayout,
) -> RelocationTables {
    let rebase = space.rebase();
    let mut out = RelocationTables::default();

    for e in entries {
        match e.d_tag {
            DT_RELA if out.rela_info.address == 0 => out.rela_info.address = rebase.apply(e.d_val),
            DT_RELASZ if out.rela_info.size == 0 => out.rela_info.size = e.d_val,
            DT_RELAENT if out.rela_info.entry_size == 0 => out.rela_info.entry_size = e.d_val,
            DT_REL if out.rel_info.address == 0 => out.rel_info.address = rebase.apply(e.d_val),
            DT_RELSZ if out.rel_info.size == 0 => out.rel_info.size = e.d_val,
            DT_RELENT if out.rel_info.entry_size == 0 => out.rel_info.entry_size = e.d_val,
            DT_PLTGOT if out.plt_got == 0 => out.plt_got = rebase.apply(e.d_val),
            DT_JMPREL if out.plt_info.address == 0 => out.plt_info.address = rebase.apply(e.d_val),
            DT_PLTRELSZ if out.plt_info.size == 0 => out.plt_info.size = e.d_val,
            DT_PLTREL if out.plt_kind.is_none() => out.plt_kind = RelocKind::from_pltrel(e.d_val),
            _ => {}
        }
    }

    if out.rela_info.entry_size == 0 {
        out.rela_info.entry_size = layout.reloc_size(true) as u64;
    }
    if out.rel_info.entry_size == 0 {
        out.rel_info.entry_size = layout.reloc_size(false) as u64;
    }
    out.rela = load_relocations(space, "rela", out.rela_info, RelocKind::Rela, layout);
    out.rel = load_relocations(space, "rel", out.rel_info, RelocKind::Rel, layout);

    // PLTREL fixes the JMPREL record layout; without it the table is unusable.
    match out.plt_kind {
        Some(kind) => {
            out.plt_info.entry_size = layout.reloc_size(kind.has_addend()) as u64;
            out.plt = load_relocations(space, "jmprel", out.plt_info, kind, layout);
        }
        None if out.plt_info.is_present() => {
            debug!("JMPREL present without a usable PLTREL; PLT relocations ignored");
        }
        None => {}
    }

    out
}

/// Typed view of an image's dynamic linking metadata.
#[derive(Debug, Clone)]
pub struct DynamicTable {
    layout: RecordLayout,
    rebase: Rebase,
    address: u64,
    size: u64,
    entries: Vec<DynamicEntry>,
    symtabs: SymbolTables,
    relocs: RelocationTables,
}

impl DynamicTable {
    /// Read and resolve the dynamic array of `size` bytes at `address`.
    pub fn parse(space: &AddressSpace, address: u64, size: u64, layout: RecordLayout) -> Result<Self> {
        let raw = space.read_table(address, size)?;
        let entries = parse_entries(&raw, layout)?;
        trace!(address = format_args!("{:#x}", address), entries = entries.len(), "Parsed dynamic entries");

        let symtabs = resolve_symbol_tables(&entries, space, layout);
        let relocs = resolve_relocation_tables(&entries, space, layout);

        debug!(
            symbols = symtabs.symbol_count,
            has_hash = symtabs.hash.is_some(),
            has_rela = relocs.rela.is_some(),
            has_rel = relocs.rel.is_some(),
            has_jmprel = relocs.plt.is_some(),
            "Resolved dynamic table"
        );

        Ok(Self {
            layout,
            rebase: space.rebase(),
            address,
            size,
            entries,
            symtabs,
            relocs,
        })
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn layout(&self) -> RecordLayout {
        self.layout
    }

    /// Entries before the `DT_NULL` terminator.
    pub fn entries(&self) -> &[DynamicEntry] {
        &self.entries
    }

    /// First entry carrying `tag`.
    pub fn find_entry(&self, tag: i64) -> Option<&DynamicEntry> {
        self.entries.iter().find(|e| e.d_tag == tag)
    }

    pub fn string_table(&self) -> TableInfo {
        self.symtabs.string_table
    }

    pub fn symbol_table(&self) -> TableInfo {
        self.symtabs.symbol_table
    }

    /// Number of dynamic symbols, taken from the hash table's chain count.
    pub fn symbol_count(&self) -> u32 {
        self.symtabs.symbol_count
    }

    pub fn hash_address(&self) -> u64 {
        self.symtabs.hash_address
    }

    pub fn hash_table(&self) -> Option<&HashTable> {
        self.symtabs.hash.as_ref()
    }

    pub fn rela_table(&self) -> TableInfo {
        self.relocs.rela_info
    }

    pub fn rel_table(&self) -> TableInfo {
        self.relocs.rel_info
    }

    pub fn plt_relocation_table(&self) -> TableInfo {
        self.relocs.plt_info
    }

    pub fn plt_relocation_kind(&self) -> Option<RelocKind> {
        self.relocs.plt_kind
    }

    /// `DT_PLTGOT`, or 0 when absent.
    pub fn plt_got(&self) -> u64 {
        self.relocs.plt_got
    }

    pub fn relocations(&self) -> impl Iterator<Item = &RelocationTable> {
        [&self.relocs.rela, &self.relocs.rel, &self.relocs.plt]
            .into_iter()
            .flatten()
    }

    fn strings(&self) -> Result<&Bytes> {
        self.symtabs.strings.as_ref().ok_or(ElfError::NoStringTable)
    }

    /// String at `offset` in the dynamic string table.
    pub fn string_at(&self, offset: u64) -> Result<&str> {
        read_cstring(self.strings()?, offset as usize)
    }

    /// Symbol at `index` of the dynamic symbol table.
    pub fn symbol_at(&self, index: usize) -> Result<SymbolEntry> {
        let symbols = self.symtabs.symbols.as_ref().ok_or(ElfError::NoSymbolTable)?;
        symbol_at(
            symbols,
            self.symtabs.symbol_table.entry_size as usize,
            self.layout,
            index,
        )
        .ok_or_else(|| ElfError::TruncatedTable {
            offset: (index as u64).saturating_mul(self.symtabs.symbol_table.entry_size),
            needed: self.symtabs.symbol_table.entry_size,
        })
    }

    pub fn symbol_name(&self, symbol: &SymbolEntry) -> Result<&str> {
        self.string_at(symbol.st_name as u64)
    }

    fn name_matches(&self, index: u32, name: &[u8]) -> bool {
        let Ok(strings) = self.strings() else {
            return false;
        };
        self.symbol_at(index as usize)
            .ok()
            .and_then(|sym| cstring_bytes(strings, sym.st_name as usize).ok())
            .map(|candidate| candidate == name)
            .unwrap_or(false)
    }

    /// Every dynamic symbol slot, from index 0 to the symbol count.
    pub fn symbols(&self) -> impl Iterator<Item = SymbolEntry> + '_ {
        (0..self.symbol_count() as usize).filter_map(move |i| self.symbol_at(i).ok())
    }

    /// Hash-table lookup, reporting which table was missing on failure.
    pub fn try_find_symbol_by_name(&self, name: &str) -> Result<Option<SymbolEntry>> {
        let hash = self.hash_table().ok_or(ElfError::NoHashTable)?;
        self.strings()?;
        if self.symtabs.symbols.is_none() {
            return Err(ElfError::NoSymbolTable);
        }
        let found = hash.lookup(name.as_bytes(), |i| self.name_matches(i, name.as_bytes()));
        found.map(|i| self.symbol_at(i as usize)).transpose()
    }

    /// Hash-table lookup. There is no fallback when the hash table is absent;
    /// see [`DynamicTable::find_symbol_by_name_linear`].
    pub fn find_symbol_by_name(&self, name: &str) -> Option<SymbolEntry> {
        match self.try_find_symbol_by_name(name) {
            Ok(found) => found,
            Err(e) if e.is_missing_table() => {
                trace!(symbol = name, error = %e, "Dynamic symbol lookup unavailable");
                None
            }
            Err(e) => {
                debug!(symbol = name, error = %e, "Dynamic symbol lookup failed");
                None
            }
        }
    }

    /// Opt-in linear scan over `[0, symbol_count)` that ignores the hash table.
    pub fn find_symbol_by_name_linear(&self, name: &str) -> Option<SymbolEntry> {
        (0..self.symbol_count())
            .find(|&i| self.name_matches(i, name.as_bytes()))
            .and_then(|i| self.symbol_at(i as usize).ok())
    }

    fn scan(&self, table: Option<&RelocationTable>, name: &str) -> Option<u64> {
        table
            .and_then(|t| t.find_slot(|sym| self.name_matches(sym, name.as_bytes())))
            .map(|slot| self.rebase.apply(slot))
    }

    /// GOT slot for `name` from the general relocation tables: RELA first, then REL.
    pub fn find_got_entry(&self, name: &str) -> Option<u64> {
        self.scan(self.relocs.rela.as_ref(), name)
            .or_else(|| self.scan(self.relocs.rel.as_ref(), name))
    }

    /// GOT slot for `name` from the PLT relocations (`DT_JMPREL`).
    pub fn find_got_plt_entry(&self, name: &str) -> Option<u64> {
        self.scan(self.relocs.plt.as_ref(), name)
    }

    fn strings_for(&self, tag: i64) -> impl Iterator<Item = &str> + '_ {
        self.entries
            .iter()
            .filter(move |e| e.d_tag == tag)
            .filter_map(move |e| self.string_at(e.d_val).ok())
    }

    /// `DT_NEEDED` library names
    pub fn needed_libraries(&self) -> Vec<&str> {
        self.strings_for(DT_NEEDED).collect()
    }

    pub fn soname(&self) -> Option<&str> {
        self.strings_for(DT_SONAME).next()
    }

    pub fn rpath(&self) -> Option<&str> {
        self.strings_for(DT_RPATH).next()
    }

    pub fn runpath(&self) -> Option<&str> {
        self.strings_for(DT_RUNPATH).next()
    }

    /// `DT_FLAGS` value
    pub fn flags(&self) -> Option<u64> {
        self.find_entry(DT_FLAGS).map(|e| e.d_val)
    }
}
