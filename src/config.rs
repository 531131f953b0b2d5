//! Configuration for image loading and process snapshots.
//!
//! All structs derive serde with `#[serde(default)]`, so a partial JSON
//! document only needs to name the values it changes.

use crate::error::Result;
use crate::io::IoLimits;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Master configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectConfig {
    /// GOT-to-PLT derivation constants.
    pub plt: PltLayout,
    /// Memory-map scanning policy.
    pub maps: MapsConfig,
    /// Read limits.
    pub io: IoLimits,
}

impl InspectConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a JSON configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Architecture constants used to derive a PLT stub from a GOT slot.
///
/// `slot = (got_slot - got_base) / pointer_width`,
/// `stub = plt_base + slot * stub_stride`.
///
/// The derivation is a heuristic for lazily bound x86-style PLTs; it does not
/// disassemble the PLT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PltLayout {
    /// Size of one PLT stub in bytes.
    pub stub_stride: u64,
    /// Size of one GOT slot in bytes.
    pub pointer_width: u64,
}

impl Default for PltLayout {
    fn default() -> Self {
        Self::x86()
    }
}

impl PltLayout {
    /// 32-bit x86: 16-byte stubs, 4-byte GOT slots.
    pub const fn x86() -> Self {
        Self {
            stub_stride: 16,
            pointer_width: 4,
        }
    }

    /// x86-64: 16-byte stubs, 8-byte GOT slots.
    pub const fn x86_64() -> Self {
        Self {
            stub_stride: 16,
            pointer_width: 8,
        }
    }

    /// PLT stub address for the GOT slot at `got_slot`.
    ///
    /// Returns `None` when the slot lies below `got_base`, the pointer width
    /// is zero, or the arithmetic overflows.
    pub fn stub_address(&self, got_slot: u64, got_base: u64, plt_base: u64) -> Option<u64> {
        let delta = got_slot.checked_sub(got_base)?;
        let index = delta.checked_div(self.pointer_width)?;
        index
            .checked_mul(self.stub_stride)
            .and_then(|off| plt_base.checked_add(off))
    }
}

/// Policy for turning `/proc/<pid>/maps` records into candidate images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapsConfig {
    /// Keep only regions with execute permission.
    ///
    /// Objects whose first mapping is not executable (linkers that split the
    /// ELF header into its own read-only segment) are only found when this is
    /// `false`.
    pub executable_only: bool,
    /// Merge contiguous regions backed by the same name.
    pub coalesce: bool,
}

impl Default for MapsConfig {
    fn default() -> Self {
        Self {
            executable_only: true,
            coalesce: true,
        }
    }
}
