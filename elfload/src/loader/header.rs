use std::fmt;

use goblin::elf::header;

use crate::loader::{
    endian::Endian,
    error::LoaderError,
    image::VAddr,
};

/// Size of an ELF32 file header
pub const EHDR_SIZE: usize = 52;

/// Size of an ELF32 program header entry
pub const PHDR_SIZE: usize = 32;

/// Size of an ELF32 section header entry
pub const SHDR_SIZE: usize = 40;

const EM_ST20: u16 = 0xa8;

/// Confidence reported by [`can_load`] for a supported image
pub const CONFIDENCE_ELF32: u32 = 4;

/// The architectures the loader accepts
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Machine {
    Pentium,
    Sparc,
    Ppc,
    Mips,
    M68k,
    St20,
}

impl Machine {
    fn from_e_machine(e_machine: u16) -> Option<Self> {
        match e_machine {
            header::EM_386 => Some(Machine::Pentium),
            header::EM_SPARC | header::EM_SPARC32PLUS => Some(Machine::Sparc),
            header::EM_PPC => Some(Machine::Ppc),
            header::EM_MIPS => Some(Machine::Mips),
            header::EM_68K => Some(Machine::M68k),
            EM_ST20 => Some(Machine::St20),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Machine::Pentium => "pentium",
            Machine::Sparc => "sparc",
            Machine::Ppc => "ppc",
            Machine::Mips => "mips",
            Machine::M68k => "m68k",
            Machine::St20 => "st20",
        }
    }
}

impl fmt::Display for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The decoded ELF32 file header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElfHeader {
    pub endian: Endian,
    pub e_type: u16,
    pub machine: Machine,
    pub entry: VAddr,
    pub phoff: u32,
    pub shoff: u32,
    pub flags: u32,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

fn check_ident(data: &[u8]) -> Result<Endian, LoaderError> {
    if data.len() < header::SIZEOF_IDENT || &data[0..header::SELFMAG] != header::ELFMAG {
        return Err(LoaderError::NotThisFormat("bad magic".to_string()));
    }

    if data[header::EI_CLASS] != header::ELFCLASS32 {
        return Err(LoaderError::NotThisFormat(format!("wrong class {}", data[header::EI_CLASS])));
    }

    match data[header::EI_DATA] {
        header::ELFDATA2LSB => Ok(Endian::Little),
        header::ELFDATA2MSB => Ok(Endian::Big),
        other => Err(LoaderError::NotThisFormat(format!("unknown data encoding {}", other))),
    }
}

/// Cheap format sniff: returns 0 if `data` is not a supported ELF32 image
pub fn can_load(data: &[u8]) -> u32 {
    let Ok(endian) = check_ident(data) else {
        return 0;
    };

    if data.len() < EHDR_SIZE {
        return 0;
    }

    match Machine::from_e_machine(endian.read16(data, 18)) {
        Some(_) => CONFIDENCE_ELF32,
        None => 0,
    }
}

fn check_table(name: &str, offset: u32, count: u16, entsize: u16, min_entsize: usize, len: usize) -> Result<(), LoaderError> {
    if count == 0 {
        return Ok(());
    }

    if (entsize as usize) < min_entsize {
        return Err(LoaderError::CorruptFormat(format!("{} entry size {} is too small", name, entsize)));
    }

    let end = (count as usize)
        .checked_mul(entsize as usize)
        .and_then(|size| size.checked_add(offset as usize))
        .ok_or_else(|| LoaderError::CorruptFormat(format!("{} size overflows", name)))?;

    if end > len {
        return Err(LoaderError::CorruptFormat(format!(
            "{} at {:#x} ({} entries) extends past the end of the file ({:#x})",
            name, offset, count, len
        )));
    }

    Ok(())
}

impl ElfHeader {
    /// Validates the identification bytes, the machine and the header tables' bounds
    pub fn parse(data: &[u8]) -> Result<Self, LoaderError> {
        let endian = check_ident(data)?;

        if data.len() < EHDR_SIZE {
            return Err(LoaderError::CorruptFormat(format!("file header truncated at {} bytes", data.len())));
        }

        let e_machine = endian.read16(data, 18);
        let machine = Machine::from_e_machine(e_machine).ok_or(LoaderError::UnsupportedMachine(e_machine))?;

        let hdr = Self {
            endian,
            e_type: endian.read16(data, 16),
            machine,
            entry: endian.read32(data, 24),
            phoff: endian.read32(data, 28),
            shoff: endian.read32(data, 32),
            flags: endian.read32(data, 36),
            phentsize: endian.read16(data, 42),
            phnum: endian.read16(data, 44),
            shentsize: endian.read16(data, 46),
            shnum: endian.read16(data, 48),
            shstrndx: endian.read16(data, 50),
        };

        if !matches!(hdr.e_type, header::ET_REL | header::ET_EXEC | header::ET_DYN) {
            return Err(LoaderError::CorruptFormat(format!("unsupported object type {}", hdr.e_type)));
        }

        check_table("Program header table", hdr.phoff, hdr.phnum, hdr.phentsize, PHDR_SIZE, data.len())?;

        if hdr.shoff != 0 || hdr.shnum != 0 {
            check_table("Section header table", hdr.shoff, hdr.shnum, hdr.shentsize, SHDR_SIZE, data.len())?;
        }

        if hdr.shstrndx != 0 && hdr.shstrndx >= hdr.shnum {
            return Err(LoaderError::CorruptFormat(format!(
                "section name table index {} out of range ({} sections)",
                hdr.shstrndx, hdr.shnum
            )));
        }

        Ok(hdr)
    }

    pub fn is_relocatable(&self) -> bool {
        self.e_type == header::ET_REL
    }

    pub fn is_library(&self) -> bool {
        self.e_type == header::ET_DYN
    }

    /// Number of usable section headers, zero when the file has no section header table
    pub fn section_count(&self) -> usize {
        if self.shoff == 0 {
            0
        } else {
            self.shnum as usize
        }
    }
}

#[cfg(test)]
fn minimal_header(big: bool, machine: u16) -> Vec<u8> {
    let endian = if big { Endian::Big } else { Endian::Little };
    let mut data = vec![0u8; EHDR_SIZE];
    data[0..4].copy_from_slice(header::ELFMAG);
    data[header::EI_CLASS] = header::ELFCLASS32;
    data[header::EI_DATA] = if big { header::ELFDATA2MSB } else { header::ELFDATA2LSB };
    data[6] = 1;

    let put16 = |data: &mut Vec<u8>, off: usize, v: u16| {
        let bytes = if big { v.to_be_bytes() } else { v.to_le_bytes() };
        data[off..off + 2].copy_from_slice(&bytes);
    };

    put16(&mut data, 16, header::ET_EXEC);
    put16(&mut data, 18, machine);
    put16(&mut data, 40, EHDR_SIZE as u16);
    put16(&mut data, 42, PHDR_SIZE as u16);
    put16(&mut data, 46, SHDR_SIZE as u16);
    let mut entry = [0u8; 4];
    endian.write32(&mut entry, 0, 0x08048000);
    data[24..28].copy_from_slice(&entry);
    data
}

#[cfg(test)]
#[test]
fn test_validate() {
    /* TEST1: Minimal i386 header */
    let data = minimal_header(false, header::EM_386);
    let hdr = ElfHeader::parse(&data).unwrap();
    assert_eq!(hdr.machine, Machine::Pentium);
    assert_eq!(hdr.endian, Endian::Little);
    assert_eq!(hdr.entry, 0x08048000);
    assert_eq!(hdr.section_count(), 0);
    assert_eq!(can_load(&data), CONFIDENCE_ELF32);

    /* TEST2: Big-endian SPARC */
    let data = minimal_header(true, header::EM_SPARC);
    let hdr = ElfHeader::parse(&data).unwrap();
    assert_eq!(hdr.machine, Machine::Sparc);
    assert_eq!(hdr.endian, Endian::Big);
    assert_eq!(hdr.entry, 0x08048000);

    /* TEST3: Wrong magic */
    let mut data = minimal_header(false, header::EM_386);
    data[1] = b'X';
    assert!(ElfHeader::parse(&data).unwrap_err().is_not_this_format());
    assert_eq!(can_load(&data), 0);

    /* TEST4: 64-bit class */
    let mut data = minimal_header(false, header::EM_386);
    data[header::EI_CLASS] = header::ELFCLASS64;
    assert!(ElfHeader::parse(&data).unwrap_err().is_not_this_format());

    /* TEST5: Unknown machine */
    let data = minimal_header(false, header::EM_X86_64);
    assert_eq!(ElfHeader::parse(&data), Err(LoaderError::UnsupportedMachine(header::EM_X86_64)));
    assert_eq!(can_load(&data), 0);
}

#[cfg(test)]
#[test]
fn test_truncated() {
    let data = minimal_header(false, header::EM_386);

    for len in 0..EHDR_SIZE {
        assert!(ElfHeader::parse(&data[..len]).is_err());
        assert_eq!(can_load(&data[..len]), 0);
    }
}

#[cfg(test)]
#[test]
fn test_table_bounds() {
    /* Program headers past the end */
    let mut data = minimal_header(false, header::EM_386);
    data[28] = 0x40;
    data[44] = 1;
    assert!(matches!(ElfHeader::parse(&data), Err(LoaderError::CorruptFormat(_))));

    /* Section headers past the end */
    let mut data = minimal_header(false, header::EM_386);
    data[32] = 0x10;
    data[48] = 2;
    assert!(matches!(ElfHeader::parse(&data), Err(LoaderError::CorruptFormat(_))));
}
