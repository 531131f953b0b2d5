//! Bounded byte sources for image inspection.
//!
//! An ELF image is read through a [`MemorySource`]: an owned buffer placed at
//! a virtual base, a read-only memory map of a file, or the memory of a live
//! process. Every read either returns exactly the requested number of bytes
//! or fails; partial buffers are never handed out.
//!
//! Bytes that are not resident in the image range (section headers and
//! static symbol tables stripped from the runtime mapping) are fetched from
//! the backing file with [`fetch_file_range`].

use crate::error::{ElfError, Result};
use bytes::Bytes;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Resource limits for reads performed while loading an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoLimits {
    /// Largest single fetch from a backing file.
    pub max_fetch_bytes: u64,
    /// Largest table (symbols, strings, relocations) read from image memory.
    pub max_table_bytes: u64,
}

impl Default for IoLimits {
    fn default() -> Self {
        Self {
            max_fetch_bytes: 256 * 1024 * 1024, // 256MB
            max_table_bytes: 64 * 1024 * 1024,  // 64MB
        }
    }
}

/// A readable address range.
pub trait MemorySource: Send + Sync + fmt::Debug {
    /// Read exactly `len` bytes starting at `addr`.
    fn read_at(&self, addr: u64, len: usize) -> Result<Bytes>;
}

fn read_failed(addr: u64, len: usize) -> ElfError {
    ElfError::MemoryReadFailed {
        addr,
        len: len as u64,
    }
}

/// An owned buffer that answers reads as if it were mapped at `base`.
#[derive(Debug, Clone)]
pub struct SliceMemory {
    base: u64,
    bytes: Bytes,
}

impl SliceMemory {
    pub fn new(base: u64, bytes: impl Into<Bytes>) -> Self {
        Self {
            base,
            bytes: bytes.into(),
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// One past the last readable address.
    pub fn high(&self) -> u64 {
        self.base.saturating_add(self.bytes.len() as u64)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl MemorySource for SliceMemory {
    fn read_at(&self, addr: u64, len: usize) -> Result<Bytes> {
        let start = addr
            .checked_sub(self.base)
            .and_then(|off| usize::try_from(off).ok())
            .ok_or_else(|| read_failed(addr, len))?;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| read_failed(addr, len))?;
        Ok(self.bytes.slice(start..end))
    }
}

/// A read-only memory map of a file, addressed by file offset.
#[derive(Debug)]
pub struct MappedFile {
    path: PathBuf,
    // None when the file is empty; memmap cannot map empty files.
    mmap: Option<Mmap>,
}

impl MappedFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        debug!(path = %path.display(), size, "Mapping file");

        let mmap = if size == 0 {
            None
        } else {
            // Safety: read-only map of a regular file; concurrent truncation by
            // another process is outside what this reader defends against.
            Some(unsafe { Mmap::map(&file)? })
        };

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.mmap.as_ref().map_or(0, |m| m.len() as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MemorySource for MappedFile {
    fn read_at(&self, addr: u64, len: usize) -> Result<Bytes> {
        let map = match &self.mmap {
            Some(m) => m,
            None => return Err(read_failed(addr, len)),
        };
        let start = usize::try_from(addr).map_err(|_| read_failed(addr, len))?;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= map.len())
            .ok_or_else(|| read_failed(addr, len))?;
        Ok(Bytes::copy_from_slice(&map[start..end]))
    }
}

/// Memory of a live process, read through `/proc/<pid>/mem`.
///
/// Unmapped addresses produce an error from the kernel rather than a fault,
/// so arbitrary pointers found in dynamic tables can be followed safely.
#[cfg(unix)]
#[derive(Debug)]
pub struct ProcessMemory {
    path: PathBuf,
    file: File,
}

#[cfg(unix)]
impl ProcessMemory {
    /// Open the calling process's own memory.
    pub fn open_self() -> Result<Self> {
        Self::open_path("/proc/self/mem")
    }

    /// Open another process's memory. Requires ptrace access to `pid`.
    pub fn open(pid: u32) -> Result<Self> {
        Self::open_path(format!("/proc/{pid}/mem"))
    }

    fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        debug!(path = %path.display(), "Opened process memory");
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
impl MemorySource for ProcessMemory {
    fn read_at(&self, addr: u64, len: usize) -> Result<Bytes> {
        use std::os::unix::fs::FileExt;

        let mut buf = vec![0u8; len];
        self.file.read_exact_at(&mut buf, addr).map_err(|e| {
            trace!(addr = format_args!("{:#x}", addr), len, error = %e, "Process memory read failed");
            read_failed(addr, len)
        })?;
        Ok(Bytes::from(buf))
    }
}

/// Fetch `len` bytes at `offset` from the file at `path`.
///
/// The file is opened for this one read and closed before returning. Fails
/// with [`ElfError::FileReadFailed`] if the range is not entirely inside the
/// file or exceeds `limits.max_fetch_bytes`.
pub fn fetch_file_range(path: &Path, offset: u64, len: u64, limits: &IoLimits) -> Result<Bytes> {
    let failed = || ElfError::FileReadFailed {
        path: path.to_path_buf(),
        offset,
        len,
    };

    if len > limits.max_fetch_bytes {
        warn!(
            path = %path.display(),
            requested = len,
            limit = limits.max_fetch_bytes,
            "Fetch exceeds limit"
        );
        return Err(failed());
    }
    let buf_len = usize::try_from(len).map_err(|_| failed())?;

    let mut file = File::open(path).map_err(|e| {
        debug!(path = %path.display(), error = %e, "Cannot open backing file");
        failed()
    })?;
    let size = file.metadata().map_err(|_| failed())?.len();
    let end = offset.checked_add(len).ok_or_else(failed)?;
    if end > size {
        debug!(
            path = %path.display(),
            offset,
            len,
            file_size = size,
            "Fetch extends past end of file"
        );
        return Err(failed());
    }

    let mut buf = vec![0u8; buf_len];
    file.seek(SeekFrom::Start(offset)).map_err(|_| failed())?;
    file.read_exact(&mut buf).map_err(|_| failed())?;

    trace!(path = %path.display(), offset, len, "Fetched from backing file");
    Ok(Bytes::from(buf))
}
