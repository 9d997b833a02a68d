//! Locates and bounds-checks the tables of an ELF32 image
//!
//! Every view handed out by this module has been validated against the length of the
//! raw buffer, so the accessors below can read their fields without further checks.

use std::borrow::Cow;

use goblin::elf::section_header;

use crate::loader::{
    endian::Endian,
    error::LoaderError,
    header::{
        ElfHeader,
        PHDR_SIZE,
        SHDR_SIZE,
    },
    image::VAddr,
};

pub const SYM_SIZE: usize = 16;
pub const REL_SIZE: usize = 8;
pub const RELA_SIZE: usize = 12;
pub const DYN_SIZE: usize = 8;

/// Start offset, element count and stride of a table inside the raw buffer
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TableView {
    pub offset: usize,
    pub count: usize,
    pub entsize: usize,
}

impl TableView {
    pub fn new(offset: usize, count: usize, entsize: usize, len: usize) -> Result<Self, LoaderError> {
        let end = count
            .checked_mul(entsize)
            .and_then(|size| size.checked_add(offset))
            .ok_or_else(|| LoaderError::CorruptFormat(format!("table at {:#x} overflows", offset)))?;

        if end > len {
            return Err(LoaderError::CorruptFormat(format!(
                "table at {:#x} ({} x {} bytes) extends past the end of the file ({:#x})",
                offset, count, entsize, len
            )));
        }

        Ok(Self {
            offset,
            count,
            entsize,
        })
    }

    pub fn entry(&self, index: usize) -> Option<usize> {
        if index < self.count {
            Some(self.offset + index * self.entsize)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub offset: u32,
    pub vaddr: VAddr,
    pub filesz: u32,
    pub memsz: u32,
    pub flags: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: u32,
    pub sh_type: u32,
    pub flags: u32,
    pub addr: VAddr,
    pub offset: u32,
    pub size: u32,
    pub link: u32,
    pub info: u32,
    pub addralign: u32,
    pub entsize: u32,
}

impl SectionHeader {
    pub fn has_file_data(&self) -> bool {
        self.sh_type != section_header::SHT_NOBITS && self.sh_type != section_header::SHT_NULL && self.size > 0
    }

    pub fn is_alloc(&self) -> bool {
        (self.flags & section_header::SHF_ALLOC) != 0
    }

    /// TLS templates for zero-initialized data occupy no memory in the image
    pub fn is_tls_bss(&self) -> bool {
        self.sh_type == section_header::SHT_NOBITS && (self.flags & section_header::SHF_TLS) != 0
    }
}

/// A string table, borrowed from the raw buffer
#[derive(Copy, Clone, Debug)]
pub struct StrTab<'a> {
    data: &'a [u8],
}

impl<'a> StrTab<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
        }
    }

    /// Resolves a string offset. Offsets outside of the table and strings without
    /// a terminator inside of the table yield `None`. Invalid UTF-8 is replaced.
    pub fn get(&self, offset: u32) -> Option<Cow<'a, str>> {
        let data: &'a [u8] = self.data;
        let start = offset as usize;

        if start >= data.len() {
            return None;
        }

        let rest = &data[start..];
        let len = rest.iter().position(|b| *b == 0)?;
        Some(String::from_utf8_lossy(&rest[..len]))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RawSymbol {
    pub name: u32,
    pub value: u32,
    pub size: u32,
    pub info: u8,
    pub shndx: u16,
}

impl RawSymbol {
    pub fn bind(&self) -> u8 {
        goblin::elf::sym::st_bind(self.info)
    }

    pub fn typ(&self) -> u8 {
        goblin::elf::sym::st_type(self.info)
    }

    pub fn is_undefined(&self) -> bool {
        self.shndx as u32 == section_header::SHN_UNDEF
    }
}

/// A symbol table section together with the index of its string table
#[derive(Copy, Clone, Debug)]
pub struct SymTab<'a> {
    data: &'a [u8],
    endian: Endian,
    view: TableView,
    pub section: usize,
    pub strtab: StrTab<'a>,
    pub strtab_section: usize,
}

impl<'a> SymTab<'a> {
    pub fn len(&self) -> usize {
        self.view.count
    }

    pub fn get(&self, index: usize) -> Option<RawSymbol> {
        let off = self.view.entry(index)?;
        let e = self.endian;

        Some(RawSymbol {
            name: e.read32(self.data, off),
            value: e.read32(self.data, off + 4),
            size: e.read32(self.data, off + 8),
            info: self.data[off + 12],
            shndx: e.read16(self.data, off + 14),
        })
    }

    pub fn name(&self, sym: &RawSymbol) -> Option<Cow<'a, str>> {
        self.strtab.get(sym.name)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RawReloc {
    pub offset: u32,
    pub info: u32,
    pub addend: Option<i32>,
}

impl RawReloc {
    pub fn sym(&self) -> u32 {
        self.info >> 8
    }

    pub fn typ(&self) -> u32 {
        self.info & 0xff
    }
}

/// A REL or RELA section
#[derive(Copy, Clone, Debug)]
pub struct RelTab<'a> {
    data: &'a [u8],
    endian: Endian,
    view: TableView,
    pub has_addend: bool,
    /// Index of the symbol table, `sh_link`
    pub symtab: usize,
    /// Index of the section being patched, `sh_info`
    pub target: usize,
}

impl<'a> RelTab<'a> {
    pub fn len(&self) -> usize {
        self.view.count
    }

    pub fn get(&self, index: usize) -> Option<RawReloc> {
        let off = self.view.entry(index)?;
        let e = self.endian;

        Some(RawReloc {
            offset: e.read32(self.data, off),
            info: e.read32(self.data, off + 4),
            addend: if self.has_addend { Some(e.read32(self.data, off + 8) as i32) } else { None },
        })
    }

    /// The symbol index of every entry in table order
    pub fn symbol_indices(&self) -> Vec<u32> {
        (0..self.len()).filter_map(|i| self.get(i)).map(|r| r.sym()).collect()
    }
}

/// Everything reachable from the file header, validated once
pub struct Tables<'a> {
    data: &'a [u8],
    endian: Endian,
    phdrs: Vec<ProgramHeader>,
    shdrs: Vec<SectionHeader>,
    shstrtab: Option<StrTab<'a>>,
}

fn corrupt<S: Into<String>>(msg: S) -> LoaderError {
    LoaderError::CorruptFormat(msg.into())
}

impl<'a> Tables<'a> {
    pub fn locate(data: &'a [u8], hdr: &ElfHeader) -> Result<Self, LoaderError> {
        let e = hdr.endian;

        /* Program headers */
        let phoff = if hdr.phnum == 0 { 0 } else { hdr.phoff as usize };
        let view = TableView::new(phoff, hdr.phnum as usize, (hdr.phentsize as usize).max(PHDR_SIZE), data.len())?;
        let mut phdrs = Vec::with_capacity(view.count);

        for i in 0..view.count {
            let off = view.offset + i * view.entsize;
            phdrs.push(ProgramHeader {
                p_type: e.read32(data, off),
                offset: e.read32(data, off + 4),
                vaddr: e.read32(data, off + 8),
                filesz: e.read32(data, off + 16),
                memsz: e.read32(data, off + 20),
                flags: e.read32(data, off + 24),
            });
        }

        /* Section headers */
        let view = TableView::new(hdr.shoff as usize, hdr.section_count(), (hdr.shentsize as usize).max(SHDR_SIZE), data.len())?;
        let mut shdrs = Vec::with_capacity(view.count);

        for i in 0..view.count {
            let off = view.offset + i * view.entsize;
            let shdr = SectionHeader {
                name: e.read32(data, off),
                sh_type: e.read32(data, off + 4),
                flags: e.read32(data, off + 8),
                addr: e.read32(data, off + 12),
                offset: e.read32(data, off + 16),
                size: e.read32(data, off + 20),
                link: e.read32(data, off + 24),
                info: e.read32(data, off + 28),
                addralign: e.read32(data, off + 32),
                entsize: e.read32(data, off + 36),
            };

            if shdr.has_file_data() {
                TableView::new(shdr.offset as usize, shdr.size as usize, 1, data.len())
                    .map_err(|_| corrupt(format!("section {} at {:#x} extends past the end of the file", i, shdr.offset)))?;
            }

            if shdr.addr.checked_add(shdr.size).is_none() && shdr.is_alloc() {
                return Err(corrupt(format!("section {} address range overflows", i)));
            }

            shdrs.push(shdr);
        }

        let mut tables = Self {
            data,
            endian: e,
            phdrs,
            shdrs,
            shstrtab: None,
        };

        if hdr.shstrndx != 0 && (hdr.shstrndx as usize) < tables.shdrs.len() {
            tables.shstrtab = Some(tables.strtab(hdr.shstrndx as usize)?);
        }

        Ok(tables)
    }

    pub fn program_headers(&self) -> &[ProgramHeader] {
        &self.phdrs
    }

    pub fn section_headers(&self) -> &[SectionHeader] {
        &self.shdrs
    }

    pub fn section(&self, index: usize) -> Option<&SectionHeader> {
        self.shdrs.get(index)
    }

    /// Name of a section, empty if it cannot be resolved
    pub fn section_name(&self, index: usize) -> Cow<'a, str> {
        match (self.shstrtab, self.shdrs.get(index)) {
            (Some(strtab), Some(shdr)) => strtab.get(shdr.name).unwrap_or(Cow::Borrowed("")),
            _ => Cow::Borrowed(""),
        }
    }

    pub fn section_by_name(&self, name: &str) -> Option<usize> {
        (0..self.shdrs.len()).find(|i| self.section_name(*i) == name)
    }

    /// The file bytes of a section, `None` for sections without file data
    pub fn section_data(&self, index: usize) -> Option<&'a [u8]> {
        let shdr = self.shdrs.get(index)?;

        if !shdr.has_file_data() {
            return None;
        }

        let start = shdr.offset as usize;
        Some(&self.data[start..start + shdr.size as usize])
    }

    pub fn strtab(&self, index: usize) -> Result<StrTab<'a>, LoaderError> {
        let shdr = self.shdrs.get(index).ok_or_else(|| corrupt(format!("string table index {} out of range", index)))?;

        if shdr.sh_type != section_header::SHT_STRTAB {
            return Err(corrupt(format!("section {} is not a string table", index)));
        }

        Ok(StrTab::new(self.section_data(index).unwrap_or(&[])))
    }

    fn entry_view(&self, index: usize, min_entsize: usize) -> Result<TableView, LoaderError> {
        let shdr = self.shdrs.get(index).ok_or_else(|| corrupt(format!("section index {} out of range", index)))?;
        let entsize = if shdr.entsize == 0 { min_entsize } else { shdr.entsize as usize };

        if entsize < min_entsize {
            return Err(corrupt(format!("section {} entry size {} is too small", index, entsize)));
        }

        if !shdr.has_file_data() {
            return Ok(TableView {
                offset: 0,
                count: 0,
                entsize,
            });
        }

        TableView::new(shdr.offset as usize, shdr.size as usize / entsize, entsize, self.data.len())
    }

    pub fn symtab(&self, index: usize) -> Result<SymTab<'a>, LoaderError> {
        let shdr = self.shdrs.get(index).ok_or_else(|| corrupt(format!("symbol table index {} out of range", index)))?;

        if shdr.sh_type != section_header::SHT_SYMTAB && shdr.sh_type != section_header::SHT_DYNSYM {
            return Err(corrupt(format!("section {} is not a symbol table", index)));
        }

        let view = self.entry_view(index, SYM_SIZE)?;
        let strtab_section = shdr.link as usize;
        let strtab = self.strtab(strtab_section)?;

        Ok(SymTab {
            data: self.data,
            endian: self.endian,
            view,
            section: index,
            strtab,
            strtab_section,
        })
    }

    pub fn reltab(&self, index: usize) -> Result<RelTab<'a>, LoaderError> {
        let shdr = self.shdrs.get(index).ok_or_else(|| corrupt(format!("relocation table index {} out of range", index)))?;

        let has_addend = match shdr.sh_type {
            section_header::SHT_REL => false,
            section_header::SHT_RELA => true,
            _ => return Err(corrupt(format!("section {} is not a relocation table", index))),
        };

        let view = self.entry_view(index, if has_addend { RELA_SIZE } else { REL_SIZE })?;

        if shdr.link as usize >= self.shdrs.len() {
            return Err(corrupt(format!("relocation table {} links to missing section {}", index, shdr.link)));
        }

        Ok(RelTab {
            data: self.data,
            endian: self.endian,
            view,
            has_addend,
            symtab: shdr.link as usize,
            target: shdr.info as usize,
        })
    }

    /// `(d_tag, d_val)` pairs of a dynamic section up to `DT_NULL`
    pub fn dynamic_entries(&self, index: usize) -> Result<Vec<(u32, u32)>, LoaderError> {
        let view = self.entry_view(index, DYN_SIZE)?;
        Ok(read_dynamic(self.data, self.endian, view))
    }

    pub fn dynamic_entries_at(&self, offset: u32, size: u32) -> Result<Vec<(u32, u32)>, LoaderError> {
        let view = TableView::new(offset as usize, size as usize / DYN_SIZE, DYN_SIZE, self.data.len())?;
        Ok(read_dynamic(self.data, self.endian, view))
    }
}

fn read_dynamic(data: &[u8], endian: Endian, view: TableView) -> Vec<(u32, u32)> {
    let mut ret = Vec::new();

    for i in 0..view.count {
        let off = view.offset + i * view.entsize;
        let tag = endian.read32(data, off);

        if tag as u64 == goblin::elf::dynamic::DT_NULL {
            break;
        }

        ret.push((tag, endian.read32(data, off + 4)));
    }

    ret
}

#[cfg(test)]
#[test]
fn test_strtab() {
    let strtab = StrTab::new(b"\0main\0printf\0broken");

    assert_eq!(strtab.get(0).as_deref(), Some(""));
    assert_eq!(strtab.get(1).as_deref(), Some("main"));
    assert_eq!(strtab.get(3).as_deref(), Some("in"));
    assert_eq!(strtab.get(6).as_deref(), Some("printf"));

    /* No terminator inside of the table */
    assert_eq!(strtab.get(13).as_deref(), None);

    /* Past the end */
    assert_eq!(strtab.get(20).as_deref(), None);
    assert_eq!(strtab.get(u32::MAX).as_deref(), None);

    /* Names that are not UTF-8 are kept */
    let strtab = StrTab::new(b"\0ma\xffin\0");
    assert_eq!(strtab.get(1).as_deref(), Some("ma\u{fffd}in"));
}

#[cfg(test)]
#[test]
fn test_table_view() {
    assert!(TableView::new(0, 4, 16, 64).is_ok());
    assert!(TableView::new(1, 4, 16, 64).is_err());
    assert!(TableView::new(usize::MAX, 1, 16, 64).is_err());
    assert!(TableView::new(0, usize::MAX, 16, 64).is_err());

    let view = TableView::new(8, 2, 12, 64).unwrap();
    assert_eq!(view.entry(0), Some(8));
    assert_eq!(view.entry(1), Some(20));
    assert_eq!(view.entry(2), None);
}

#[cfg(test)]
#[test]
fn test_reloc_info() {
    let rel = RawReloc {
        offset: 0x1000,
        info: (5 << 8) | 7,
        addend: None,
    };

    assert_eq!(rel.sym(), 5);
    assert_eq!(rel.typ(), 7);
}
