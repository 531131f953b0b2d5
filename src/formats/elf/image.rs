//! ELF image loader
//!
//! A [`LoadedImage`] is built from a byte range `[base, high)` and an
//! optional backing file. Program headers must be resident; section headers
//! and the static symbol table may be stripped from the mapping and are then
//! fetched from the backing file.

use crate::config::{InspectConfig, PltLayout};
use crate::error::{ElfError, Result};
use crate::formats::elf::address::{AddressMode, AddressSpace};
use crate::formats::elf::dynamic::DynamicTable;
use crate::formats::elf::headers::parse_header;
use crate::formats::elf::sections::{parse_section_headers, Residency, Section, SectionKind};
use crate::formats::elf::segments::{parse_program_headers, Segment, SegmentKind};
use crate::formats::elf::symbols::{StaticSymbols, SymbolEntry, SymbolRecord, SymbolSource};
use crate::formats::elf::types::*;
use crate::formats::elf::utils::read_cstring;
use crate::io::{fetch_file_range, IoLimits, MappedFile, MemorySource, SliceMemory};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Largest possible file header.
const MAX_HEADER_SIZE: u64 = 64;

/// One ELF object, loaded from memory or from a file.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    name: String,
    path: Option<PathBuf>,
    space: AddressSpace,
    header: ImageHeader,
    segments: Vec<Segment>,
    sections: Vec<Section>,
    dynamic: Option<DynamicTable>,
    static_symbols: Option<StaticSymbols>,
    // Index of the string table linked from SHT_DYNSYM.
    dynsym_strings: Option<usize>,
    plt_base: u64,
    got_base: u64,
    plt_layout: PltLayout,
}

impl LoadedImage {
    /// Load the image occupying `[base, high)` of `source`.
    ///
    /// `path` names the backing file used for sections outside the range.
    pub fn from_memory(
        source: Arc<dyn MemorySource>,
        base: u64,
        high: u64,
        name: impl Into<String>,
        path: Option<PathBuf>,
        config: &InspectConfig,
    ) -> Result<Self> {
        let space = AddressSpace::mapped(source, base, high, config.io.clone());
        Self::load(space, name.into(), path, config)
    }

    /// Load an image from an owned buffer placed at `base`.
    pub fn from_bytes(
        bytes: impl Into<Bytes>,
        base: u64,
        path: Option<PathBuf>,
        config: &InspectConfig,
    ) -> Result<Self> {
        let memory = SliceMemory::new(base, bytes);
        let high = memory.high();
        let name = path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| format!("<memory@{:#x}>", base));
        Self::from_memory(Arc::new(memory), base, high, name, path, config)
    }

    /// Load an ELF file without mapping it as a process would.
    ///
    /// Addresses stay link-time virtual addresses and are translated to file
    /// offsets through the `PT_LOAD` segments.
    pub fn open<P: AsRef<Path>>(path: P, config: &InspectConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = MappedFile::open(path)?;
        let len = file.len();
        let space = AddressSpace::file(Arc::new(file), len, config.io.clone());
        Self::load(
            space,
            path.display().to_string(),
            Some(path.to_path_buf()),
            config,
        )
    }

    fn load(
        mut space: AddressSpace,
        name: String,
        path: Option<PathBuf>,
        config: &InspectConfig,
    ) -> Result<Self> {
        let head = space.read_image(0, MAX_HEADER_SIZE.min(space.len()))?;
        let header = parse_header(&head)?;
        let layout = header.layout();
        debug!(
            image = %name,
            base = format_args!("{:#x}", space.base()),
            high = format_args!("{:#x}", space.high()),
            class = ?header.class(),
            endian = ?header.endian(),
            "Loading ELF image"
        );

        let segments = read_segments(&space, &header)?;
        if space.mode() == AddressMode::File {
            space.set_load_segments(&segments);
        }

        let dynamic = segments
            .iter()
            .find(|s| s.is_dynamic())
            .and_then(|seg| {
                let (address, size) = match space.mode() {
                    AddressMode::Mapped => (space.normalize(seg.vaddr()), seg.mem_size()),
                    AddressMode::File => (seg.vaddr(), seg.file_size()),
                };
                DynamicTable::parse(&space, address, size, layout)
                    .map_err(|e| {
                        warn!(image = %name, error = %e, "Dynamic segment unreadable");
                    })
                    .ok()
            });

        let mut image = Self {
            name,
            path,
            space,
            header,
            segments,
            sections: Vec::new(),
            dynamic,
            static_symbols: None,
            dynsym_strings: None,
            plt_base: 0,
            got_base: 0,
            plt_layout: config.plt,
        };

        image.sections = image.read_sections();
        image.dynsym_strings = image
            .sections
            .iter()
            .find(|s| s.kind() == SectionKind::DynSym)
            .map(|s| s.link() as usize);
        image.static_symbols = image.load_static_symbols();

        image.plt_base = image
            .find_section_by_name(".plt")
            .map(|s| image.space.normalize(s.address()))
            .unwrap_or(0);
        image.got_base = image
            .dynamic
            .as_ref()
            .map(|d| d.plt_got())
            .filter(|&got| got != 0)
            .or_else(|| {
                image
                    .find_section_by_name(".got.plt")
                    .map(|s| image.space.normalize(s.address()))
            })
            .unwrap_or(0);

        debug!(
            image = %image.name,
            segments = image.segments.len(),
            sections = image.sections.len(),
            dynamic = image.dynamic.is_some(),
            plt_base = format_args!("{:#x}", image.plt_base),
            got_base = format_args!("{:#x}", image.got_base),
            "Loaded ELF image"
        );
        Ok(image)
    }

    fn fetch(&self, offset: u64, len: u64) -> Result<Bytes> {
        let path = self.path.as_deref().ok_or_else(|| ElfError::FileReadFailed {
            path: PathBuf::new(),
            offset,
            len,
        })?;
        fetch_file_range(path, offset, len, self.space.limits())
    }

    /// Bytes at a file offset, read in place when resident and fetched otherwise.
    fn read_file_range(&self, offset: u64, len: u64) -> Result<Bytes> {
        if self.space.is_resident(offset, len) {
            self.space.read_image(offset, len)
        } else {
            self.fetch(offset, len)
        }
    }

    fn read_sections(&self) -> Vec<Section> {
        let header = &self.header;
        if header.e_shoff == 0 || header.e_shnum == 0 {
            return Vec::new();
        }
        let table = match self.read_file_range(header.e_shoff, header.section_table_size()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(image = %self.name, error = %e, "Section headers unavailable");
                return Vec::new();
            }
        };
        let headers = match parse_section_headers(
            &table,
            header.e_shentsize as usize,
            header.e_shnum as usize,
            header.layout(),
        ) {
            Ok(h) => h,
            Err(e) => {
                warn!(image = %self.name, error = %e, "Section headers malformed");
                return Vec::new();
            }
        };

        let names = headers
            .get(header.e_shstrndx as usize)
            .filter(|sh| sh.sh_type != SHT_NOBITS && sh.sh_size > 0)
            .and_then(|sh| match self.read_file_range(sh.sh_offset, sh.sh_size) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    debug!(image = %self.name, error = %e, "Section name table unavailable");
                    None
                }
            });

        headers
            .into_iter()
            .enumerate()
            .map(|(index, sh)| {
                let name = names
                    .as_ref()
                    .and_then(|n| read_cstring(n, sh.sh_name as usize).ok())
                    .unwrap_or_default()
                    .to_string();
                let residency = if sh.sh_type == SHT_NOBITS || sh.sh_size == 0 {
                    Residency::Empty
                } else if self.space.is_resident(sh.sh_offset, sh.sh_size) {
                    Residency::Resident
                } else if self.path.is_some() {
                    Residency::FileBacked
                } else {
                    Residency::Empty
                };
                trace!(index, name = %name, ?residency, "Section");
                Section::new(index, sh, name, residency)
            })
            .collect()
    }

    /// Locate `.symtab` and its strings, fetching them once if not resident.
    fn load_static_symbols(&mut self) -> Option<StaticSymbols> {
        let sym_index = self.sections.iter().position(|s| s.kind() == SectionKind::SymTab)?;
        let str_index = self.sections[sym_index].link() as usize;
        if str_index >= self.sections.len() {
            debug!(image = %self.name, link = str_index, "Symbol table links to a missing section");
            return None;
        }

        let symbols = self.materialize(sym_index)?;
        let strings = self.materialize(str_index)?;
        let entry_size = match self.sections[sym_index].entry_size() {
            0 => self.header.layout().sym_size(),
            n => n as usize,
        };
        StaticSymbols::new(symbols, strings, entry_size, self.header.layout())
            .map_err(|e| debug!(image = %self.name, error = %e, "Static symbols unusable"))
            .ok()
    }

    /// Section bytes, keeping a fetched copy on the section itself.
    fn materialize(&mut self, index: usize) -> Option<Bytes> {
        let section = &self.sections[index];
        match self.section_data(section) {
            Ok(bytes) => {
                if section.residency() == Residency::FileBacked {
                    let fetched = self.sections[index].clone().with_fetched(bytes.clone());
                    self.sections[index] = fetched;
                }
                Some(bytes)
            }
            Err(e) => {
                warn!(image = %self.name, section = %section.name(), error = %e, "Section fetch failed");
                let empty = self.sections[index].clone().into_empty();
                self.sections[index] = empty;
                None
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn mode(&self) -> AddressMode {
        self.space.mode()
    }

    pub fn base(&self) -> u64 {
        self.space.base()
    }

    pub fn high(&self) -> u64 {
        self.space.high()
    }

    /// True if `addr` lies in `[base, high)`.
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base() && addr < self.high()
    }

    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn find_segment(&self, kind: SegmentKind) -> Option<&Segment> {
        self.segments.iter().find(|s| s.kind() == kind)
    }

    pub fn segments_of(&self, kind: SegmentKind) -> impl Iterator<Item = &Segment> + '_ {
        self.segments.iter().filter(move |s| s.kind() == kind)
    }

    pub fn find_section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name() == name)
    }

    pub fn sections_of(&self, kind: SectionKind) -> impl Iterator<Item = &Section> + '_ {
        self.sections.iter().filter(move |s| s.kind() == kind)
    }

    /// String table section linked from the dynamic symbol section, if any.
    pub fn dynamic_string_section(&self) -> Option<&Section> {
        self.dynsym_strings.and_then(|i| self.sections.get(i))
    }

    /// Section address in this image's address domain.
    pub fn section_address(&self, section: &Section) -> u64 {
        self.space.normalize(section.address())
    }

    /// Contents of `section`, never more than its declared size.
    ///
    /// Resident sections are read in place; file-backed ones are fetched from
    /// the backing file and fail with [`ElfError::FileReadFailed`] when the
    /// file cannot supply the full range.
    pub fn section_data(&self, section: &Section) -> Result<Bytes> {
        match section.residency() {
            Residency::Empty => Ok(Bytes::new()),
            Residency::Fetched => Ok(section.fetched().cloned().unwrap_or_default()),
            Residency::Resident => self.space.read_image(section.offset(), section.size()),
            Residency::FileBacked => self.fetch(section.offset(), section.size()),
        }
    }

    /// Program interpreter named by `PT_INTERP`.
    pub fn interpreter(&self) -> Option<String> {
        let seg = self.find_segment(SegmentKind::Interp)?;
        let addr = match self.mode() {
            AddressMode::Mapped => self.space.normalize(seg.vaddr()),
            AddressMode::File => seg.vaddr(),
        };
        let bytes = self.space.read_table(addr, seg.file_size()).ok()?;
        read_cstring(&bytes, 0).ok().map(str::to_string)
    }

    pub fn dynamic(&self) -> Option<&DynamicTable> {
        self.dynamic.as_ref()
    }

    pub fn static_symbols(&self) -> Option<&StaticSymbols> {
        self.static_symbols.as_ref()
    }

    /// Address of `.plt`, or 0 if the image has none.
    pub fn plt_base(&self) -> u64 {
        self.plt_base
    }

    /// Address from `DT_PLTGOT` (or `.got.plt`), or 0.
    pub fn got_base(&self) -> u64 {
        self.got_base
    }

    pub fn plt_layout(&self) -> PltLayout {
        self.plt_layout
    }

    pub fn limits(&self) -> &IoLimits {
        self.space.limits()
    }

    /// PLT stub for a GOT slot of this image.
    pub fn plt_stub_address(&self, got_slot: u64) -> Option<u64> {
        if self.plt_base == 0 || self.got_base == 0 {
            return None;
        }
        self.plt_layout
            .stub_address(got_slot, self.got_base, self.plt_base)
    }

    /// GOT slot for `name`: general relocations first, then PLT relocations.
    pub fn got_entry_address(&self, name: &str) -> Option<u64> {
        let dynamic = self.dynamic()?;
        dynamic
            .find_got_entry(name)
            .or_else(|| dynamic.find_got_plt_entry(name))
    }

    /// Effective address of the dynamic symbol `name`.
    pub fn symbol_address(&self, name: &str) -> Option<u64> {
        self.find_dynamic_symbol(name)?.effective_address()
    }

    pub(crate) fn make_record(&self, entry: SymbolEntry, source: SymbolSource) -> SymbolRecord<'_> {
        let name = match source {
            SymbolSource::Dynamic => self.dynamic().and_then(|d| d.symbol_name(&entry).ok()),
            SymbolSource::Static => self.static_symbols().and_then(|s| s.name(&entry).ok()),
        };
        let (got_slot, plt_stub) = match (self.dynamic(), name) {
            (Some(dynamic), Some(name)) if !name.is_empty() => {
                if entry.is_data() {
                    (dynamic.find_got_entry(name), None)
                } else {
                    let slot = dynamic.find_got_plt_entry(name);
                    (slot, slot.and_then(|s| self.plt_stub_address(s)))
                }
            }
            _ => (None, None),
        };
        SymbolRecord::new(self, entry, source, got_slot, plt_stub)
    }

    pub fn dynamic_symbol(&self, index: usize) -> Option<SymbolRecord<'_>> {
        let entry = self.dynamic()?.symbol_at(index).ok()?;
        Some(self.make_record(entry, SymbolSource::Dynamic))
    }

    /// Every dynamic symbol, index 0 included.
    pub fn dynamic_symbols(&self) -> impl Iterator<Item = SymbolRecord<'_>> + '_ {
        self.dynamic
            .iter()
            .flat_map(|d| d.symbols())
            .map(move |e| self.make_record(e, SymbolSource::Dynamic))
    }

    /// Hash lookup in the dynamic symbol table.
    pub fn find_dynamic_symbol(&self, name: &str) -> Option<SymbolRecord<'_>> {
        let entry = self.dynamic()?.find_symbol_by_name(name)?;
        Some(self.make_record(entry, SymbolSource::Dynamic))
    }

    /// Linear scan of the dynamic symbol table, ignoring the hash table.
    pub fn find_dynamic_symbol_linear(&self, name: &str) -> Option<SymbolRecord<'_>> {
        let entry = self.dynamic()?.find_symbol_by_name_linear(name)?;
        Some(self.make_record(entry, SymbolSource::Dynamic))
    }

    pub fn static_symbol_records(&self) -> impl Iterator<Item = SymbolRecord<'_>> + '_ {
        self.static_symbols
            .iter()
            .flat_map(|s| s.entries())
            .map(move |e| self.make_record(e, SymbolSource::Static))
    }

    pub fn find_static_symbol(&self, name: &str) -> Option<SymbolRecord<'_>> {
        let entry = self.static_symbols()?.find_by_name(name)?;
        Some(self.make_record(entry, SymbolSource::Static))
    }
}

fn read_segments(space: &AddressSpace, header: &ImageHeader) -> Result<Vec<Segment>> {
    if header.e_phoff == 0 || header.e_phnum == 0 {
        return Ok(Vec::new());
    }
    let size = header.segment_table_size();
    if !space.is_resident(header.e_phoff, size) {
        debug!(
            phoff = header.e_phoff,
            size,
            "Program headers outside the image; segments skipped"
        );
        return Ok(Vec::new());
    }
    let table = space.read_image(header.e_phoff, size)?;
    parse_program_headers(
        &table,
        header.e_phentsize as usize,
        header.e_phnum as usize,
        header.layout(),
    )
}
