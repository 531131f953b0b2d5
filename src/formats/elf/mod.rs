//! ELF (Executable and Linkable Format) introspection
//!
//! Bounds-checked parsing of the file header, program and section headers,
//! the dynamic section, SysV hash tables and REL/RELA relocations, for both
//! classes and both byte orders. [`LoadedImage`] ties them together for one
//! object; everything else is reachable from it.

pub mod address;
pub mod dynamic;
pub mod hash;
pub mod headers;
pub mod image;
pub mod relocations;
pub mod sections;
pub mod segments;
pub mod symbols;
pub mod types;
pub mod utils;
pub mod view;

pub use address::{AddressMode, AddressSpace, Rebase};
pub use dynamic::{DynamicEntry, DynamicTable, TableInfo};
pub use hash::{elf_hash, HashTable};
pub use headers::{has_elf_magic, parse_header};
pub use image::LoadedImage;
pub use relocations::{RelocKind, Relocation, RelocationTable};
pub use sections::{Residency, Section, SectionFlags, SectionKind};
pub use segments::{Segment, SegmentFlags, SegmentKind};
pub use symbols::{
    StaticSymbols, SymbolBinding, SymbolEntry, SymbolKind, SymbolRecord, SymbolSource,
    SymbolVisibility,
};
pub use types::*;
pub use view::{RecordLayout, RecordTable};
