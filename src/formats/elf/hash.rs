//! SysV ELF hash table (`DT_HASH`)
//!
//! Layout, all 32-bit words in image byte order:
//! `nbucket, nchain, bucket[nbucket], chain[nchain]`.
//! `nchain` equals the number of dynamic symbols.

use crate::error::{ElfError, Result};
use crate::formats::elf::types::ElfData;
use crate::formats::elf::utils::EndianRead;
use bytes::Bytes;

/// Size of the `nbucket, nchain` prefix.
pub const HASH_HEADER_SIZE: usize = 8;

/// The classic SysV ELF symbol hash.
pub fn elf_hash(name: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &c in name {
        h = (h << 4).wrapping_add(c as u32);
        let g = h & 0xf000_0000;
        if g != 0 {
            h ^= g >> 24;
        }
        h &= !g;
    }
    h
}

/// Read `(nbucket, nchain)` from the first eight bytes of a hash table.
pub fn parse_hash_header(data: &[u8], endian: ElfData) -> Result<(u32, u32)> {
    Ok((data.read_u32(0, endian)?, data.read_u32(4, endian)?))
}

/// Byte size of a table with the given counts.
pub fn hash_table_size(nbucket: u32, nchain: u32) -> u64 {
    (2 + nbucket as u64 + nchain as u64) * 4
}

#[derive(Debug, Clone)]
pub struct HashTable {
    words: Bytes,
    endian: ElfData,
    nbucket: u32,
    nchain: u32,
}

impl HashTable {
    /// Wrap a complete table; fails if `words` is shorter than its header declares.
    pub fn parse(words: Bytes, endian: ElfData) -> Result<Self> {
        let (nbucket, nchain) = parse_hash_header(&words, endian)?;
        let needed = hash_table_size(nbucket, nchain);
        if (words.len() as u64) < needed {
            return Err(ElfError::TruncatedTable { offset: 0, needed });
        }
        Ok(Self {
            words,
            endian,
            nbucket,
            nchain,
        })
    }

    pub fn bucket_count(&self) -> u32 {
        self.nbucket
    }

    /// Number of chain slots, which is also the dynamic symbol count.
    pub fn chain_count(&self) -> u32 {
        self.nchain
    }

    fn word(&self, index: u64) -> Option<u32> {
        let offset = usize::try_from(index.checked_mul(4)?).ok()?;
        self.words.read_u32(offset, self.endian).ok()
    }

    pub fn bucket(&self, index: u32) -> Option<u32> {
        if index >= self.nbucket {
            return None;
        }
        self.word(2 + index as u64)
    }

    pub fn chain(&self, index: u32) -> Option<u32> {
        if index >= self.nchain {
            return None;
        }
        self.word(2 + self.nbucket as u64 + index as u64)
    }

    /// Walk the chain for `name`, asking `matches` whether a symbol index
    /// carries that name.
    ///
    /// The walk ends at the undefined index 0, at an index outside the chain
    /// array, or after `nchain` steps on a cyclic chain.
    pub fn lookup<F>(&self, name: &[u8], mut matches: F) -> Option<u32>
    where
        F: FnMut(u32) -> bool,
    {
        if self.nbucket == 0 {
            return None;
        }
        let mut index = self.bucket(elf_hash(name) % self.nbucket)?;
        for _ in 0..self.nchain {
            if index == 0 || index >= self.nchain {
                return None;
            }
            if matches(index) {
                return Some(index);
            }
            index = self.chain(index)?;
        }
        None
    }
}
