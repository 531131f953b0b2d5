//! Whole-process snapshots
//!
//! A [`ProcessSnapshot`] holds one [`LoadedImage`] per ELF object found in a
//! memory map, in map order. Images are addressed by index; neighbours are
//! found by index arithmetic.
//!
//! Reading the calling process is not atomic: other threads may rewrite GOT
//! entries while the snapshot is taken.

use crate::config::InspectConfig;
use crate::error::Result;
use crate::formats::elf::headers::has_elf_magic;
use crate::formats::elf::image::LoadedImage;
use crate::formats::elf::symbols::SymbolRecord;
use crate::formats::elf::types::{ELF_MAGIC, SHN_UNDEF};
use crate::io::MemorySource;
use crate::process::maps::{parse_maps, retain_regions, MapRegion};
#[cfg(unix)]
use crate::{log_error, span_trace};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// The ELF images of one process, in memory-map order.
#[derive(Debug, Clone, Default)]
pub struct ProcessSnapshot {
    images: Vec<LoadedImage>,
}

impl ProcessSnapshot {
    /// Snapshot the calling process with the default configuration.
    #[cfg(unix)]
    pub fn from_self() -> Result<Self> {
        Self::from_self_with(&InspectConfig::default())
    }

    /// Snapshot the calling process through `/proc/self/maps` and `/proc/self/mem`.
    #[cfg(unix)]
    pub fn from_self_with(config: &InspectConfig) -> Result<Self> {
        let span = span_trace!("process_snapshot", pid = std::process::id());
        let _enter = span.enter();

        let maps = crate::process::maps::read_self_maps()
            .map_err(|e| log_error!(e, "reading /proc/self/maps"))?;
        let memory = crate::io::ProcessMemory::open_self()
            .map_err(|e| log_error!(e, "opening /proc/self/mem"))?;
        Ok(Self::from_maps(&maps, Arc::new(memory), config))
    }

    /// Build a snapshot from maps text, reading image bytes from `source`.
    pub fn from_maps(text: &str, source: Arc<dyn MemorySource>, config: &InspectConfig) -> Self {
        let regions = retain_regions(parse_maps(text), &config.maps);
        Self::from_regions(&regions, source, config)
    }

    /// Build a snapshot from already filtered regions.
    ///
    /// Regions that do not start with the ELF magic, or that fail to load,
    /// are skipped.
    pub fn from_regions(
        regions: &[MapRegion],
        source: Arc<dyn MemorySource>,
        config: &InspectConfig,
    ) -> Self {
        let mut images = Vec::new();
        for region in regions {
            let magic = match source.read_at(region.start, ELF_MAGIC.len()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    trace!(region = %region.name, error = %e, "Region unreadable");
                    continue;
                }
            };
            if !has_elf_magic(&magic) {
                trace!(region = %region.name, start = format_args!("{:#x}", region.start), "Not an ELF image");
                continue;
            }

            match LoadedImage::from_memory(
                Arc::clone(&source),
                region.start,
                region.end,
                region.name.clone(),
                region.path().map(|p| p.to_path_buf()),
                config,
            ) {
                Ok(image) => images.push(image),
                Err(e) => {
                    debug!(region = %region.name, error = %e, "Rejected candidate image");
                }
            }
        }
        info!(images = images.len(), "Process snapshot built");
        Self { images }
    }

    /// Assemble a snapshot from images loaded elsewhere.
    pub fn from_images(images: Vec<LoadedImage>) -> Self {
        Self { images }
    }

    pub fn images(&self) -> &[LoadedImage] {
        &self.images
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LoadedImage> {
        self.images.iter()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&LoadedImage> {
        self.images.get(index)
    }

    pub fn next_of(&self, index: usize) -> Option<&LoadedImage> {
        self.images.get(index.checked_add(1)?)
    }

    pub fn prev_of(&self, index: usize) -> Option<&LoadedImage> {
        self.images.get(index.checked_sub(1)?)
    }

    /// First image whose name contains `needle`.
    pub fn find_image_by_name(&self, needle: &str) -> Option<&LoadedImage> {
        self.images.iter().find(|img| img.name().contains(needle))
    }

    /// Image whose range contains `addr`.
    pub fn image_containing(&self, addr: u64) -> Option<&LoadedImage> {
        self.images.iter().find(|img| img.contains(addr))
    }

    fn lookup_all(&self, name: &str) -> Vec<SymbolRecord<'_>> {
        self.images
            .iter()
            .filter_map(|img| img.find_dynamic_symbol(name))
            .collect()
    }

    /// Every image that defines `name` in its dynamic symbol table.
    pub fn find_definitions(&self, name: &str) -> Vec<SymbolRecord<'_>> {
        let mut found = self.lookup_all(name);
        found.retain(|s| s.is_defined());
        debug!(symbol = name, count = found.len(), "Definitions");
        found
    }

    /// Every image that references `name` without defining it.
    pub fn find_uses(&self, name: &str) -> Vec<SymbolRecord<'_>> {
        let mut found = self.lookup_all(name);
        found.retain(|s| s.section_index() == SHN_UNDEF);
        debug!(symbol = name, count = found.len(), "Uses");
        found
    }

    pub fn find_symbol_definitions(&self, name: &str) -> Vec<SymbolRecord<'_>> {
        self.find_definitions(name)
    }

    pub fn find_symbol_uses(&self, name: &str) -> Vec<SymbolRecord<'_>> {
        self.find_uses(name)
    }
}

impl<'a> IntoIterator for &'a ProcessSnapshot {
    type Item = &'a LoadedImage;
    type IntoIter = std::slice::Iter<'a, LoadedImage>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.iter()
    }
}
