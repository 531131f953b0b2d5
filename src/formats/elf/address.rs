//! Address translation for one image.
//!
//! Mapped images (live process memory or a buffer placed at a base) are read
//! at runtime addresses. Addresses taken from the image's own tables that lie
//! below the base are load-relative and get the base added; everything the
//! crate returns is in that rebased domain.
//!
//! File images keep link-time virtual addresses and translate them to file
//! offsets through the `PT_LOAD` segments.

use crate::error::{ElfError, Result};
use crate::formats::elf::segments::Segment;
use crate::formats::elf::utils::check_bounds;
use crate::io::{IoLimits, MemorySource};
use bytes::Bytes;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    Mapped,
    File,
}

/// Normalization of addresses read out of an image's tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rebase {
    base: Option<u64>,
}

impl Rebase {
    /// Addresses are used as stored.
    pub fn identity() -> Self {
        Self { base: None }
    }

    /// Addresses below `base` are load-relative.
    pub fn below(base: u64) -> Self {
        Self { base: Some(base) }
    }

    pub fn apply(&self, addr: u64) -> u64 {
        match self.base {
            Some(base) if addr < base => base.checked_add(addr).unwrap_or(addr),
            _ => addr,
        }
    }
}

/// Bounded view of the memory an image lives in.
#[derive(Debug, Clone)]
pub struct AddressSpace {
    source: Arc<dyn MemorySource>,
    mode: AddressMode,
    base: u64,
    high: u64,
    // PT_LOAD segments, used by file mode only.
    loads: Vec<Segment>,
    limits: IoLimits,
}

impl AddressSpace {
    pub fn mapped(source: Arc<dyn MemorySource>, base: u64, high: u64, limits: IoLimits) -> Self {
        Self {
            source,
            mode: AddressMode::Mapped,
            base,
            high: high.max(base),
            loads: Vec::new(),
            limits,
        }
    }

    pub fn file(source: Arc<dyn MemorySource>, len: u64, limits: IoLimits) -> Self {
        Self {
            source,
            mode: AddressMode::File,
            base: 0,
            high: len,
            loads: Vec::new(),
            limits,
        }
    }

    pub(crate) fn set_load_segments(&mut self, segments: &[Segment]) {
        self.loads = segments.iter().filter(|s| s.is_load()).copied().collect();
    }

    pub fn mode(&self) -> AddressMode {
        self.mode
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn high(&self) -> u64 {
        self.high
    }

    /// Number of bytes in `[base, high)`.
    pub fn len(&self) -> u64 {
        self.high - self.base
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn limits(&self) -> &IoLimits {
        &self.limits
    }

    pub fn rebase(&self) -> Rebase {
        match self.mode {
            AddressMode::Mapped => Rebase::below(self.base),
            AddressMode::File => Rebase::identity(),
        }
    }

    pub fn normalize(&self, addr: u64) -> u64 {
        self.rebase().apply(addr)
    }

    /// True when `[offset, offset + len)` lies inside the image range.
    pub fn is_resident(&self, offset: u64, len: u64) -> bool {
        check_bounds(offset, len, self.len()).is_ok()
    }

    /// Read bytes at a file offset within the image range.
    pub fn read_image(&self, offset: u64, len: u64) -> Result<Bytes> {
        if !self.is_resident(offset, len) {
            return Err(ElfError::TruncatedTable {
                offset,
                needed: len,
            });
        }
        let len = usize::try_from(len).map_err(|_| ElfError::TruncatedTable {
            offset,
            needed: len,
        })?;
        self.source.read_at(self.base + offset, len)
    }

    /// Read a table at an address in this image's domain.
    pub fn read_table(&self, addr: u64, len: u64) -> Result<Bytes> {
        let too_large = || ElfError::TruncatedTable {
            offset: addr,
            needed: len,
        };
        if len > self.limits.max_table_bytes {
            return Err(too_large());
        }
        let len_usize = usize::try_from(len).map_err(|_| too_large())?;
        match self.mode {
            AddressMode::Mapped => self.source.read_at(addr, len_usize),
            AddressMode::File => {
                let offset = self.vaddr_to_offset(addr, len).ok_or_else(too_large)?;
                self.source.read_at(offset, len_usize)
            }
        }
    }

    /// File offset of `[vaddr, vaddr + len)` if one `PT_LOAD` maps all of it from file bytes.
    pub fn vaddr_to_offset(&self, vaddr: u64, len: u64) -> Option<u64> {
        self.loads.iter().find_map(|seg| {
            let start = seg.vaddr_to_offset(vaddr)?;
            let end_delta = vaddr.checked_sub(seg.vaddr())?.checked_add(len)?;
            (end_delta <= seg.file_size()).then_some(start)
        })
    }
}
