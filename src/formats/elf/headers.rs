//! ELF header parsing

use crate::error::{ElfError, Result};
use crate::formats::elf::types::*;
use crate::formats::elf::utils::EndianRead;
use crate::formats::elf::view::RecordLayout;

impl ImageHeader {
    /// Record layout for every table of this image.
    pub fn layout(&self) -> RecordLayout {
        RecordLayout::new(self.ident.class, self.ident.data)
    }
}

/// True when `data` starts with the ELF magic signature.
pub fn has_elf_magic(data: &[u8]) -> bool {
    data.get(..4) == Some(&ELF_MAGIC[..])
}

/// Parse ELF identification bytes
pub fn parse_ident(data: &[u8]) -> Result<ElfIdent> {
    if data.len() >= 4 && !has_elf_magic(data) {
        return Err(ElfError::NotElf);
    }
    if data.len() < 16 {
        return Err(ElfError::TruncatedHeader {
            needed: 16,
            found: data.len(),
        });
    }

    let class = ElfClass::from_u8(data[4])?;
    let data_encoding = ElfData::from_u8(data[5])?;

    Ok(ElfIdent {
        class,
        data: data_encoding,
        version: data[6],
        osabi: data[7],
        abiversion: data[8],
    })
}

/// Parse the ELF header from the start of `data`.
pub fn parse_header(data: &[u8]) -> Result<ImageHeader> {
    let ident = parse_ident(data)?;
    let layout = RecordLayout::new(ident.class, ident.data);

    let header_size = layout.header_size();
    if data.len() < header_size {
        return Err(ElfError::TruncatedHeader {
            needed: header_size,
            found: data.len(),
        });
    }

    let endian = ident.data;
    let e_type = data.read_u16(16, endian)?;
    let e_machine = data.read_u16(18, endian)?;
    let e_version = data.read_u32(20, endian)?;

    // Offsets of the fields following the three address-sized ones.
    let (e_entry, e_phoff, e_shoff, tail) = match ident.class {
        ElfClass::Elf32 => (
            data.read_u32(24, endian)? as u64,
            data.read_u32(28, endian)? as u64,
            data.read_u32(32, endian)? as u64,
            36,
        ),
        ElfClass::Elf64 => (
            data.read_u64(24, endian)?,
            data.read_u64(32, endian)?,
            data.read_u64(40, endian)?,
            48,
        ),
    };

    let header = ImageHeader {
        ident,
        e_type,
        e_machine,
        e_version,
        e_entry,
        e_phoff,
        e_shoff,
        e_flags: data.read_u32(tail, endian)?,
        e_ehsize: data.read_u16(tail + 4, endian)?,
        e_phentsize: data.read_u16(tail + 6, endian)?,
        e_phnum: data.read_u16(tail + 8, endian)?,
        e_shentsize: data.read_u16(tail + 10, endian)?,
        e_shnum: data.read_u16(tail + 12, endian)?,
        e_shstrndx: data.read_u16(tail + 14, endian)?,
    };

    validate(&header, layout)?;
    Ok(header)
}

fn validate(header: &ImageHeader, layout: RecordLayout) -> Result<()> {
    if header.e_ehsize as usize != layout.header_size() {
        return Err(ElfError::MalformedHeader(format!(
            "Invalid e_ehsize: expected {}, got {}",
            layout.header_size(),
            header.e_ehsize
        )));
    }
    if header.e_phnum > 0 && (header.e_phentsize as usize) < layout.program_header_size() {
        return Err(ElfError::MalformedHeader(format!(
            "Invalid e_phentsize: expected at least {}, got {}",
            layout.program_header_size(),
            header.e_phentsize
        )));
    }
    if header.e_shnum > 0 && (header.e_shentsize as usize) < layout.section_header_size() {
        return Err(ElfError::MalformedHeader(format!(
            "Invalid e_shentsize: expected at least {}, got {}",
            layout.section_header_size(),
            header.e_shentsize
        )));
    }
    Ok(())
}
