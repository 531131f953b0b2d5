//! Common test utilities and helpers.
//!
//! [`ElfBuilder`] writes small but complete dynamic ELF images, field by
//! field, for either class and byte order. The layout is fixed:
//!
//! ```text
//! header | phdrs | .interp | .dynstr | .dynsym | .hash | .rel(a).dyn | .rel(a).plt
//!        | .plt | .got.plt | .got | .dynamic          <- end of the loaded range
//!        | .shstrtab | section headers | .symtab | .strtab
//! ```
//!
//! Everything up to `.dynamic` is covered by one `PT_LOAD`; the section
//! name table, section headers and static symbols live past it, as they do
//! in a stripped runtime mapping.

#![allow(dead_code)]

use elfscope::formats::elf::*;
use std::io::Write;
use tempfile::NamedTempFile;

/// A symbol to place in `.dynsym` or `.symtab`.
#[derive(Debug, Clone)]
pub struct Sym {
    pub name: String,
    pub value: u64,
    pub size: u64,
    pub kind: u8,
    pub bind: u8,
    pub shndx: u16,
}

impl Sym {
    pub fn func(name: &str, value: u64, shndx: u16) -> Self {
        Self {
            name: name.to_string(),
            value,
            size: 16,
            kind: STT_FUNC,
            bind: STB_GLOBAL,
            shndx,
        }
    }

    pub fn object(name: &str, value: u64, shndx: u16) -> Self {
        Self {
            kind: STT_OBJECT,
            size: 8,
            ..Self::func(name, value, shndx)
        }
    }

    pub fn undefined_func(name: &str) -> Self {
        Self::func(name, 0, SHN_UNDEF)
    }

    pub fn undefined_object(name: &str) -> Self {
        Self::object(name, 0, SHN_UNDEF)
    }

    pub fn weak(mut self) -> Self {
        self.bind = STB_WEAK;
        self
    }
}

/// Byte-order aware writer.
struct Writer {
    buf: Vec<u8>,
    class: ElfClass,
    endian: ElfData,
}

impl Writer {
    fn pos(&self) -> u64 {
        self.buf.len() as u64
    }

    fn align(&mut self, n: usize) {
        while self.buf.len() % n != 0 {
            self.buf.push(0);
        }
    }

    fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u16(&mut self, v: u16) {
        match self.endian {
            ElfData::Little => self.bytes(&v.to_le_bytes()),
            ElfData::Big => self.bytes(&v.to_be_bytes()),
        }
    }

    fn u32(&mut self, v: u32) {
        match self.endian {
            ElfData::Little => self.bytes(&v.to_le_bytes()),
            ElfData::Big => self.bytes(&v.to_be_bytes()),
        }
    }

    fn u64(&mut self, v: u64) {
        match self.endian {
            ElfData::Little => self.bytes(&v.to_le_bytes()),
            ElfData::Big => self.bytes(&v.to_be_bytes()),
        }
    }

    fn word(&mut self, v: u64) {
        match self.class {
            ElfClass::Elf32 => self.u32(v as u32),
            ElfClass::Elf64 => self.u64(v),
        }
    }

    fn put_u16(&mut self, at: usize, v: u16) {
        let b = match self.endian {
            ElfData::Little => v.to_le_bytes(),
            ElfData::Big => v.to_be_bytes(),
        };
        self.buf[at..at + 2].copy_from_slice(&b);
    }

    fn put_word(&mut self, at: usize, v: u64) {
        match (self.class, self.endian) {
            (ElfClass::Elf32, ElfData::Little) => {
                self.buf[at..at + 4].copy_from_slice(&(v as u32).to_le_bytes())
            }
            (ElfClass::Elf32, ElfData::Big) => {
                self.buf[at..at + 4].copy_from_slice(&(v as u32).to_be_bytes())
            }
            (ElfClass::Elf64, ElfData::Little) => self.buf[at..at + 8].copy_from_slice(&v.to_le_bytes()),
            (ElfClass::Elf64, ElfData::Big) => self.buf[at..at + 8].copy_from_slice(&v.to_be_bytes()),
        }
    }

    fn sym(&mut self, name: u32, s: &Sym) {
        let info = (s.bind << 4) | (s.kind & 0xf);
        match self.class {
            ElfClass::Elf32 => {
                self.u32(name);
                self.u32(s.value as u32);
                self.u32(s.size as u32);
                self.u8(info);
                self.u8(0);
                self.u16(s.shndx);
            }
            ElfClass::Elf64 => {
                self.u32(name);
                self.u8(info);
                self.u8(0);
                self.u16(s.shndx);
                self.u64(s.value);
                self.u64(s.size);
            }
        }
    }

    fn reloc(&mut self, offset: u64, sym: u32, rtype: u32, rela: bool) {
        self.word(offset);
        match self.class {
            ElfClass::Elf32 => self.u32((sym << 8) | (rtype & 0xff)),
            ElfClass::Elf64 => self.u64(((sym as u64) << 32) | rtype as u64),
        }
        if rela {
            self.word(0);
        }
    }

    fn dyn_entry(&mut self, tag: i64, val: u64) {
        self.word(tag as u64);
        self.word(val);
    }

    #[allow(clippy::too_many_arguments)]
    fn shdr(
        &mut self,
        name: u32,
        sh_type: u32,
        flags: u64,
        addr: u64,
        offset: u64,
        size: u64,
        link: u32,
        entsize: u64,
    ) {
        self.u32(name);
        self.u32(sh_type);
        self.word(flags);
        self.word(addr);
        self.word(offset);
        self.word(size);
        self.u32(link);
        self.u32(0);
        self.word(8);
        self.word(entsize);
    }
}

/// String table under construction.
struct Strtab {
    bytes: Vec<u8>,
}

impl Strtab {
    fn new() -> Self {
        Self { bytes: vec![0] }
    }

    fn add(&mut self, s: &str) -> u32 {
        if s.is_empty() {
            return 0;
        }
        let off = self.bytes.len() as u32;
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        off
    }
}

/// Addresses and offsets of a built image. Addresses are link-time
/// (`link_base + file offset`).
#[derive(Debug, Clone)]
pub struct BuiltElf {
    pub bytes: Vec<u8>,
    /// Bytes covered by `PT_LOAD`, which is the runtime mapping.
    pub loaded_len: u64,
    pub link_base: u64,
    pub plt_base: u64,
    pub got_plt_base: u64,
    /// GOT slots patched by `.rel(a).plt`, in relocation order.
    pub plt_slots: Vec<u64>,
    /// GOT slots patched by `.rel(a).dyn`, in relocation order.
    pub got_slots: Vec<u64>,
    pub dynamic_addr: u64,
    pub shoff: u64,
    pub symtab_offset: u64,
    pub strtab_offset: u64,
}

impl BuiltElf {
    /// The runtime view: only the loaded range.
    pub fn loaded(&self) -> Vec<u8> {
        self.bytes[..self.loaded_len as usize].to_vec()
    }
}

#[derive(Debug, Clone)]
pub struct ElfBuilder {
    class: ElfClass,
    endian: ElfData,
    e_type: u16,
    machine: u16,
    link_base: u64,
    dynsyms: Vec<Sym>,
    static_syms: Vec<Sym>,
    nbucket: u32,
    hash: bool,
    rela: bool,
    got_relocs: Vec<String>,
    plt_relocs: Vec<String>,
    needed: Vec<String>,
    soname: Option<String>,
    interp: Option<String>,
    entry_after_null: bool,
}

impl ElfBuilder {
    pub fn new(class: ElfClass, endian: ElfData) -> Self {
        Self {
            class,
            endian,
            e_type: 3, // ET_DYN
            machine: match class {
                ElfClass::Elf32 => 3,  // EM_386
                ElfClass::Elf64 => 62, // EM_X86_64
            },
            link_base: 0,
            dynsyms: Vec::new(),
            static_syms: Vec::new(),
            nbucket: 3,
            hash: true,
            rela: matches!(class, ElfClass::Elf64),
            got_relocs: Vec::new(),
            plt_relocs: Vec::new(),
            needed: Vec::new(),
            soname: None,
            interp: None,
            entry_after_null: false,
        }
    }

    pub fn elf32() -> Self {
        Self::new(ElfClass::Elf32, ElfData::Little)
    }

    pub fn elf64() -> Self {
        Self::new(ElfClass::Elf64, ElfData::Little)
    }

    /// A non-PIE executable linked at `link_base`.
    pub fn executable(mut self, link_base: u64) -> Self {
        self.e_type = 2;
        self.link_base = link_base;
        self
    }

    pub fn dynsym(mut self, sym: Sym) -> Self {
        self.dynsyms.push(sym);
        self
    }

    pub fn static_sym(mut self, sym: Sym) -> Self {
        self.static_syms.push(sym);
        self
    }

    pub fn buckets(mut self, nbucket: u32) -> Self {
        self.nbucket = nbucket;
        self
    }

    pub fn without_hash(mut self) -> Self {
        self.hash = false;
        self
    }

    pub fn rela(mut self, rela: bool) -> Self {
        self.rela = rela;
        self
    }

    /// A `GLOB_DAT`-style relocation in `.rel(a).dyn` for `name`.
    pub fn got_reloc(mut self, name: &str) -> Self {
        self.got_relocs.push(name.to_string());
        self
    }

    /// A `JUMP_SLOT`-style relocation in `.rel(a).plt` for `name`.
    pub fn plt_reloc(mut self, name: &str) -> Self {
        self.plt_relocs.push(name.to_string());
        self
    }

    pub fn needed(mut self, lib: &str) -> Self {
        self.needed.push(lib.to_string());
        self
    }

    pub fn soname(mut self, name: &str) -> Self {
        self.soname = Some(name.to_string());
        self
    }

    pub fn interp(mut self, path: &str) -> Self {
        self.interp = Some(path.to_string());
        self
    }

    /// Emit a `DT_FLAGS` entry after the `DT_NULL` terminator.
    pub fn entry_after_null(mut self) -> Self {
        self.entry_after_null = true;
        self
    }

    fn dynsym_index(&self, name: &str) -> u32 {
        self.dynsyms
            .iter()
            .position(|s| s.name == name)
            .map(|i| i as u32 + 1)
            .unwrap_or_else(|| panic!("relocation names unknown symbol {name}"))
    }

    fn hash_words(&self) -> Vec<u32> {
        let nchain = self.dynsyms.len() as u32 + 1;
        let mut buckets = vec![0u32; self.nbucket as usize];
        let mut chains = vec![0u32; nchain as usize];
        for (i, sym) in self.dynsyms.iter().enumerate() {
            let index = i as u32 + 1;
            let b = (elf_hash(sym.name.as_bytes()) % self.nbucket) as usize;
            if buckets[b] == 0 {
                buckets[b] = index;
            } else {
                let mut tail = buckets[b];
                while chains[tail as usize] != 0 {
                    tail = chains[tail as usize];
                }
                chains[tail as usize] = index;
            }
        }
        let mut words = vec![self.nbucket, nchain];
        words.extend(buckets);
        words.extend(chains);
        words
    }

    pub fn build(&self) -> BuiltElf {
        let is64 = matches!(self.class, ElfClass::Elf64);
        let width: u64 = if is64 { 8 } else { 4 };
        let ehsize = if is64 { 64 } else { 52 };
        let phentsize = if is64 { 56 } else { 32 };
        let shentsize = if is64 { 64 } else { 40 };
        let symsize: u64 = if is64 { 24 } else { 16 };
        let relsize: u64 = match (is64, self.rela) {
            (true, true) => 24,
            (true, false) => 16,
            (false, true) => 12,
            (false, false) => 8,
        };
        let dynsize = 2 * width;
        let phnum: u16 = if self.interp.is_some() { 3 } else { 2 };
        let vaddr = |off: u64| self.link_base + off;

        let mut w = Writer {
            buf: vec![0u8; ehsize],
            class: self.class,
            endian: self.endian,
        };
        let phoff = w.pos();
        w.bytes(&vec![0u8; phentsize * phnum as usize]);

        // .interp
        let interp_off = w.pos();
        if let Some(path) = &self.interp {
            w.bytes(path.as_bytes());
            w.u8(0);
        }
        let interp_size = w.pos() - interp_off;

        // .dynstr
        w.align(8);
        let mut dynstr = Strtab::new();
        let sym_names: Vec<u32> = self.dynsyms.iter().map(|s| dynstr.add(&s.name)).collect();
        let needed: Vec<u32> = self.needed.iter().map(|n| dynstr.add(n)).collect();
        let soname = self.soname.as_ref().map(|s| dynstr.add(s));
        let dynstr_off = w.pos();
        w.bytes(&dynstr.bytes);
        let dynstr_size = dynstr.bytes.len() as u64;

        // .dynsym
        w.align(8);
        let dynsym_off = w.pos();
        w.bytes(&vec![0u8; symsize as usize]);
        for (sym, name) in self.dynsyms.iter().zip(&sym_names) {
            w.sym(*name, sym);
        }
        let dynsym_size = w.pos() - dynsym_off;

        // .hash
        w.align(8);
        let hash_off = w.pos();
        if self.hash {
            for word in self.hash_words() {
                w.u32(word);
            }
        }
        let hash_size = w.pos() - hash_off;

        // Slot addresses are needed before the relocation tables are written.
        let reldyn_size = relsize * self.got_relocs.len() as u64;
        let relplt_size = relsize * self.plt_relocs.len() as u64;
        let align8 = |v: u64| (v + 7) & !7;
        let reldyn_off = align8(w.pos());
        let relplt_off = align8(reldyn_off + reldyn_size);
        let plt_off = align8(relplt_off + relplt_size);
        let plt_size = 16 * (self.plt_relocs.len() as u64 + 1);
        let gotplt_off = align8(plt_off + plt_size);
        let gotplt_size = width * (3 + self.plt_relocs.len() as u64);
        let got_off = align8(gotplt_off + gotplt_size);
        let got_size = width * self.got_relocs.len() as u64;
        let dynamic_off = align8(got_off + got_size);

        let plt_slots: Vec<u64> = (0..self.plt_relocs.len() as u64)
            .map(|i| vaddr(gotplt_off + (3 + i) * width))
            .collect();
        let got_slots: Vec<u64> = (0..self.got_relocs.len() as u64)
            .map(|i| vaddr(got_off + i * width))
            .collect();

        // .rel(a).dyn
        w.align(8);
        assert_eq!(w.pos(), reldyn_off);
        for (name, slot) in self.got_relocs.iter().zip(&got_slots) {
            let sym = self.dynsym_index(name);
            w.reloc(*slot, sym, 6, self.rela);
        }
        // .rel(a).plt
        w.align(8);
        assert_eq!(w.pos(), relplt_off);
        for (name, slot) in self.plt_relocs.iter().zip(&plt_slots) {
            let sym = self.dynsym_index(name);
            w.reloc(*slot, sym, 7, self.rela);
        }
        // .plt
        w.align(8);
        assert_eq!(w.pos(), plt_off);
        w.bytes(&vec![0xcc; plt_size as usize]);
        // .got.plt, .got
        w.align(8);
        assert_eq!(w.pos(), gotplt_off);
        w.word(vaddr(dynamic_off));
        w.bytes(&vec![0u8; (gotplt_size - width) as usize]);
        w.align(8);
        assert_eq!(w.pos(), got_off);
        w.bytes(&vec![0u8; got_size as usize]);

        // .dynamic
        w.align(8);
        assert_eq!(w.pos(), dynamic_off);
        for n in &needed {
            w.dyn_entry(DT_NEEDED, *n as u64);
        }
        if let Some(s) = soname {
            w.dyn_entry(DT_SONAME, s as u64);
        }
        w.dyn_entry(DT_STRTAB, vaddr(dynstr_off));
        w.dyn_entry(DT_STRSZ, dynstr_size);
        w.dyn_entry(DT_SYMTAB, vaddr(dynsym_off));
        w.dyn_entry(DT_SYMENT, symsize);
        if self.hash {
            w.dyn_entry(DT_HASH, vaddr(hash_off));
        }
        if !self.got_relocs.is_empty() {
            let (tag, sz, ent) = if self.rela {
                (DT_RELA, DT_RELASZ, DT_RELAENT)
            } else {
                (DT_REL, DT_RELSZ, DT_RELENT)
            };
            w.dyn_entry(tag, vaddr(reldyn_off));
            w.dyn_entry(sz, reldyn_size);
            w.dyn_entry(ent, relsize);
        }
        if !self.plt_relocs.is_empty() {
            w.dyn_entry(DT_JMPREL, vaddr(relplt_off));
            w.dyn_entry(DT_PLTRELSZ, relplt_size);
            let kind = if self.rela { DT_RELA } else { DT_REL };
            w.dyn_entry(DT_PLTREL, kind as u64);
        }
        w.dyn_entry(DT_PLTGOT, vaddr(gotplt_off));
        w.dyn_entry(DT_NULL, 0);
        if self.entry_after_null {
            w.dyn_entry(DT_FLAGS, 8);
        }
        let dynamic_size = w.pos() - dynamic_off;
        w.align(8);
        let loaded_len = w.pos();

        // .shstrtab
        let mut shstr = Strtab::new();
        let rel_prefix = if self.rela { ".rela" } else { ".rel" };
        let names: Vec<u32> = [
            ".interp".to_string(),
            ".dynstr".to_string(),
            ".dynsym".to_string(),
            ".hash".to_string(),
            format!("{rel_prefix}.dyn"),
            format!("{rel_prefix}.plt"),
            ".plt".to_string(),
            ".got.plt".to_string(),
            ".got".to_string(),
            ".dynamic".to_string(),
            ".shstrtab".to_string(),
            ".symtab".to_string(),
            ".strtab".to_string(),
        ]
        .iter()
        .map(|n| shstr.add(n))
        .collect();
        let shstr_off = w.pos();
        w.bytes(&shstr.bytes);
        let shstr_size = shstr.bytes.len() as u64;

        // static symbols
        let mut strtab = Strtab::new();
        let static_names: Vec<u32> = self.static_syms.iter().map(|s| strtab.add(&s.name)).collect();
        let symtab_size = symsize * (self.static_syms.len() as u64 + 1);

        w.align(8);
        let shoff = w.pos();
        let shnum = 14u16;
        let symtab_off = shoff + shentsize as u64 * shnum as u64;
        let strtab_off = symtab_off + symtab_size;
        let reltype = if self.rela { SHT_RELA } else { SHT_REL };
        let alloc = SHF_ALLOC;

        w.bytes(&vec![0u8; shentsize]);
        w.shdr(names[0], SHT_PROGBITS, alloc, vaddr(interp_off), interp_off, interp_size, 0, 0);
        w.shdr(names[1], SHT_STRTAB, alloc, vaddr(dynstr_off), dynstr_off, dynstr_size, 0, 0);
        w.shdr(names[2], SHT_DYNSYM, alloc, vaddr(dynsym_off), dynsym_off, dynsym_size, 2, symsize);
        w.shdr(names[3], SHT_HASH, alloc, vaddr(hash_off), hash_off, hash_size, 3, 4);
        w.shdr(names[4], reltype, alloc, vaddr(reldyn_off), reldyn_off, reldyn_size, 3, relsize);
        w.shdr(names[5], reltype, alloc, vaddr(relplt_off), relplt_off, relplt_size, 3, relsize);
        w.shdr(names[6], SHT_PROGBITS, alloc | SHF_EXECINSTR, vaddr(plt_off), plt_off, plt_size, 0, 16);
        w.shdr(names[7], SHT_PROGBITS, alloc | SHF_WRITE, vaddr(gotplt_off), gotplt_off, gotplt_size, 0, width);
        w.shdr(names[8], SHT_PROGBITS, alloc | SHF_WRITE, vaddr(got_off), got_off, got_size, 0, width);
        w.shdr(names[9], SHT_DYNAMIC, alloc | SHF_WRITE, vaddr(dynamic_off), dynamic_off, dynamic_size, 2, dynsize);
        w.shdr(names[10], SHT_STRTAB, 0, 0, shstr_off, shstr_size, 0, 0);
        w.shdr(names[11], SHT_SYMTAB, 0, 0, symtab_off, symtab_size, 13, symsize);
        w.shdr(names[12], SHT_STRTAB, 0, 0, strtab_off, strtab.bytes.len() as u64, 0, 0);

        assert_eq!(w.pos(), symtab_off);
        w.bytes(&vec![0u8; symsize as usize]);
        for (sym, name) in self.static_syms.iter().zip(&static_names) {
            w.sym(*name, sym);
        }
        assert_eq!(w.pos(), strtab_off);
        w.bytes(&strtab.bytes);

        // Program headers
        let mut phdrs: Vec<(u32, u32, u64, u64, u64)> = vec![
            (PT_LOAD, PF_R | PF_W | PF_X, 0, loaded_len, loaded_len),
            (PT_DYNAMIC, PF_R | PF_W, dynamic_off, dynamic_size, dynamic_size),
        ];
        if self.interp.is_some() {
            phdrs.push((PT_INTERP, PF_R, interp_off, interp_size, interp_size));
        }
        let mut ph = Writer {
            buf: Vec::new(),
            class: self.class,
            endian: self.endian,
        };
        for (p_type, flags, offset, filesz, memsz) in phdrs {
            ph.u32(p_type);
            if is64 {
                ph.u32(flags);
            }
            ph.word(offset);
            ph.word(vaddr(offset));
            ph.word(vaddr(offset));
            ph.word(filesz);
            ph.word(memsz);
            if !is64 {
                ph.u32(flags);
            }
            ph.word(0x1000);
        }
        let phoff_usize = phoff as usize;
        w.buf[phoff_usize..phoff_usize + ph.buf.len()].copy_from_slice(&ph.buf);

        // File header
        w.buf[0..4].copy_from_slice(ELF_MAGIC);
        w.buf[4] = if is64 { 2 } else { 1 };
        w.buf[5] = match self.endian {
            ElfData::Little => 1,
            ElfData::Big => 2,
        };
        w.buf[6] = 1;
        w.put_u16(16, self.e_type);
        w.put_u16(18, self.machine);
        let version_at = 20;
        w.buf[version_at..version_at + 4].copy_from_slice(&match self.endian {
            ElfData::Little => 1u32.to_le_bytes(),
            ElfData::Big => 1u32.to_be_bytes(),
        });
        let wsz = width as usize;
        w.put_word(24, vaddr(plt_off));
        w.put_word(24 + wsz, phoff);
        w.put_word(24 + 2 * wsz, shoff);
        let tail = 24 + 3 * wsz + 4;
        w.put_u16(tail, ehsize as u16);
        w.put_u16(tail + 2, phentsize as u16);
        w.put_u16(tail + 4, phnum);
        w.put_u16(tail + 6, shentsize as u16);
        w.put_u16(tail + 8, shnum);
        w.put_u16(tail + 10, 11);

        BuiltElf {
            bytes: w.buf,
            loaded_len,
            link_base: self.link_base,
            plt_base: vaddr(plt_off),
            got_plt_base: vaddr(gotplt_off),
            plt_slots,
            got_slots,
            dynamic_addr: vaddr(dynamic_off),
            shoff,
            symtab_offset: symtab_off,
            strtab_offset: strtab_off,
        }
    }
}

/// Write `content` to a fresh temporary file.
pub fn create_temp_file(content: &[u8]) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content).unwrap();
    temp_file.flush().unwrap();
    temp_file
}
