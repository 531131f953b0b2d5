//! Utility functions for ELF parsing

use crate::error::{ElfError, Result};
use crate::formats::elf::types::{ElfClass, ElfData};

/// Trait for reading values with endianness support
pub trait EndianRead {
    fn read_u16(&self, offset: usize, data: ElfData) -> Result<u16>;
    fn read_u32(&self, offset: usize, data: ElfData) -> Result<u32>;
    fn read_u64(&self, offset: usize, data: ElfData) -> Result<u64>;
    fn read_i32(&self, offset: usize, data: ElfData) -> Result<i32>;
    fn read_i64(&self, offset: usize, data: ElfData) -> Result<i64>;
}

fn take<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N]> {
    offset
        .checked_add(N)
        .and_then(|end| bytes.get(offset..end))
        .and_then(|s| s.try_into().ok())
        .ok_or(ElfError::TruncatedTable {
            offset: offset as u64,
            needed: N as u64,
        })
}

impl EndianRead for [u8] {
    fn read_u16(&self, offset: usize, data: ElfData) -> Result<u16> {
        let bytes = take::<2>(self, offset)?;
        Ok(match data {
            ElfData::Little => u16::from_le_bytes(bytes),
            ElfData::Big => u16::from_be_bytes(bytes),
        })
    }

    fn read_u32(&self, offset: usize, data: ElfData) -> Result<u32> {
        let bytes = take::<4>(self, offset)?;
        Ok(match data {
            ElfData::Little => u32::from_le_bytes(bytes),
            ElfData::Big => u32::from_be_bytes(bytes),
        })
    }

    fn read_u64(&self, offset: usize, data: ElfData) -> Result<u64> {
        let bytes = take::<8>(self, offset)?;
        Ok(match data {
            ElfData::Little => u64::from_le_bytes(bytes),
            ElfData::Big => u64::from_be_bytes(bytes),
        })
    }

    fn read_i32(&self, offset: usize, data: ElfData) -> Result<i32> {
        let bytes = take::<4>(self, offset)?;
        Ok(match data {
            ElfData::Little => i32::from_le_bytes(bytes),
            ElfData::Big => i32::from_be_bytes(bytes),
        })
    }

    fn read_i64(&self, offset: usize, data: ElfData) -> Result<i64> {
        let bytes = take::<8>(self, offset)?;
        Ok(match data {
            ElfData::Little => i64::from_le_bytes(bytes),
            ElfData::Big => i64::from_be_bytes(bytes),
        })
    }
}

/// Read an address based on ELF class
pub fn read_addr(data: &[u8], offset: usize, class: ElfClass, endian: ElfData) -> Result<u64> {
    match class {
        ElfClass::Elf32 => data.read_u32(offset, endian).map(|v| v as u64),
        ElfClass::Elf64 => data.read_u64(offset, endian),
    }
}

/// Bytes of the null-terminated string at `offset`, without the terminator.
///
/// A string running to the end of the table without a terminator is
/// returned whole.
pub fn cstring_bytes(data: &[u8], offset: usize) -> Result<&[u8]> {
    let slice = data.get(offset..).ok_or(ElfError::InvalidString {
        offset: offset as u64,
    })?;
    let end = memchr::memchr(0, slice).unwrap_or(slice.len());
    Ok(&slice[..end])
}

/// Read a null-terminated string from data
pub fn read_cstring(data: &[u8], offset: usize) -> Result<&str> {
    let bytes = cstring_bytes(data, offset)?;
    std::str::from_utf8(bytes).map_err(|_| ElfError::InvalidString {
        offset: offset as u64,
    })
}

/// Check if a range is within bounds
pub fn check_bounds(offset: u64, size: u64, data_len: u64) -> Result<()> {
    match offset.checked_add(size) {
        Some(end) if end <= data_len => Ok(()),
        _ => Err(ElfError::TruncatedTable {
            offset,
            needed: size,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endian_read() {
        let data = vec![0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0];

        // Little endian
        assert_eq!(data.read_u16(0, ElfData::Little).unwrap(), 0x3412);
        assert_eq!(data.read_u32(0, ElfData::Little).unwrap(), 0x78563412);
        assert_eq!(
            data.read_u64(0, ElfData::Little).unwrap(),
            0xf0debc9a78563412
        );

        // Big endian
        assert_eq!(data.read_u16(0, ElfData::Big).unwrap(), 0x1234);
        assert_eq!(data.read_u32(0, ElfData::Big).unwrap(), 0x12345678);
        assert_eq!(data.read_u64(0, ElfData::Big).unwrap(), 0x123456789abcdef0);
        assert_eq!(data.read_i32(4, ElfData::Big).unwrap(), 0x9abcdef0u32 as i32);
    }

    #[test]
    fn test_read_past_end() {
        let data = vec![0u8; 6];
        assert!(matches!(
            data.read_u32(4, ElfData::Little),
            Err(ElfError::TruncatedTable { offset: 4, needed: 4 })
        ));
        assert!(data.read_u64(usize::MAX - 2, ElfData::Little).is_err());
    }

    #[test]
    fn test_read_addr() {
        let data = vec![1, 0, 0, 0, 2, 0, 0, 0];
        assert_eq!(read_addr(&data, 0, ElfClass::Elf32, ElfData::Little).unwrap(), 1);
        assert_eq!(
            read_addr(&data, 0, ElfClass::Elf64, ElfData::Little).unwrap(),
            0x0000_0002_0000_0001
        );
    }

    #[test]
    fn test_read_cstring() {
        let data = b"hello\0world\0";
        assert_eq!(read_cstring(data, 0).unwrap(), "hello");
        assert_eq!(read_cstring(data, 6).unwrap(), "world");
        assert_eq!(read_cstring(data, 12).unwrap(), "");
        assert!(matches!(
            read_cstring(data, 13),
            Err(ElfError::InvalidString { offset: 13 })
        ));

        let data = b"no_null_terminator";
        assert_eq!(read_cstring(data, 0).unwrap(), "no_null_terminator");
    }

    #[test]
    fn test_check_bounds() {
        assert!(check_bounds(0, 10, 10).is_ok());
        assert!(check_bounds(1, 10, 10).is_err());
        assert!(check_bounds(u64::MAX, 2, 10).is_err());
    }
}
