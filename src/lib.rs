//! elfscope: ELF introspection for files and live processes.
//!
//! Load a single object with [`LoadedImage`], or every ELF object mapped into
//! the calling process with [`ProcessSnapshot`], then query headers,
//! segments, sections, dynamic metadata and symbols. Dynamic symbols are
//! found through the SysV hash table; GOT slots and PLT stubs are resolved
//! from the REL/RELA relocation tables.
//!
//! ```no_run
//! use elfscope::ProcessSnapshot;
//!
//! let snapshot = ProcessSnapshot::from_self()?;
//! for def in snapshot.find_definitions("malloc") {
//!     println!("{} {:?}", def.image().name(), def.effective_address());
//! }
//! # Ok::<(), elfscope::ElfError>(())
//! ```

pub mod config;
pub mod demangle;
pub mod error;
pub mod formats;
pub mod io;
pub mod logging;
pub mod process;

pub use config::{InspectConfig, MapsConfig, PltLayout};
pub use error::{ElfError, Result};
pub use formats::elf::{DynamicTable, LoadedImage, SymbolRecord};
pub use process::ProcessSnapshot;
