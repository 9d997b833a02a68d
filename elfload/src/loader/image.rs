use std::cell::Cell;

use goblin::elf::program_header;

use crate::loader::{
    endian::Endian,
    error::LoaderError,
    perms::Perms,
    tables::{
        ProgramHeader,
        SectionHeader,
    },
};

/// A native address inside the 32-bit address space of the loaded program
pub type VAddr = u32;

/// Where the sections of relocatable objects are placed
pub const REL_LOAD_BASE: VAddr = 0x10000;

/// Images spanning more than this are rejected
pub const MAX_IMAGE_SIZE: u64 = 0x1000_0000;

const MAX_SECTION_ALIGN: u32 = 0x1000;

/// A contiguous part of the virtual address space backed by the file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    pub vaddr: VAddr,
    pub memsz: u32,
    pub file_offset: u32,
    pub filesz: u32,
    pub perms: Perms,
    host_offset: usize,
}

impl Region {
    pub fn new(vaddr: VAddr, memsz: u32, file_offset: u32, filesz: u32, perms: Perms) -> Self {
        Self {
            vaddr,
            memsz,
            file_offset,
            filesz,
            perms,
            host_offset: 0,
        }
    }

    pub fn end(&self) -> u64 {
        self.vaddr as u64 + self.memsz as u64
    }

    pub fn contains(&self, vaddr: VAddr) -> bool {
        self.vaddr <= vaddr && (vaddr as u64) < self.end()
    }

    pub fn host_offset(&self) -> usize {
        self.host_offset
    }
}

/// Computes the mapped regions of an executable or shared object from its PT_LOAD segments
pub fn layout_segments(phdrs: &[ProgramHeader], file_len: usize) -> Result<Vec<Region>, LoaderError> {
    let mut regions = Vec::new();

    for (i, ph) in phdrs.iter().enumerate() {
        if ph.p_type != program_header::PT_LOAD || ph.memsz == 0 {
            continue;
        }

        if ph.filesz > ph.memsz {
            return Err(LoaderError::CorruptFormat(format!("segment {} has a file size larger than its memory size", i)));
        }

        if ph.offset as u64 + ph.filesz as u64 > file_len as u64 {
            return Err(LoaderError::CorruptFormat(format!("segment {} extends past the end of the file", i)));
        }

        if ph.vaddr.checked_add(ph.memsz).is_none() {
            return Err(LoaderError::CorruptFormat(format!("segment {} address range overflows", i)));
        }

        regions.push(Region::new(ph.vaddr, ph.memsz, ph.offset, ph.filesz, Perms::from_segment_flags(ph.flags)));
    }

    Ok(regions)
}

/// Lays out the allocatable sections of an image that has no program headers.
///
/// Relocatable objects get fresh addresses starting at [`REL_LOAD_BASE`], everything else
/// keeps the addresses from its section headers. Returns the regions and the address of
/// every section (indexed like the section header table).
pub fn layout_sections(shdrs: &[SectionHeader], relocatable: bool) -> Result<(Vec<Region>, Vec<VAddr>), LoaderError> {
    let mut regions = Vec::new();
    let mut addrs: Vec<VAddr> = shdrs.iter().map(|s| s.addr).collect();
    let mut cursor = REL_LOAD_BASE as u64;

    for (i, shdr) in shdrs.iter().enumerate() {
        if !shdr.is_alloc() || shdr.size == 0 || shdr.is_tls_bss() {
            continue;
        }

        let vaddr = if relocatable {
            let align = shdr.addralign.clamp(1, MAX_SECTION_ALIGN);
            let align = if align.is_power_of_two() { align as u64 } else { 1 };
            let vaddr = (cursor + align - 1) & !(align - 1);
            cursor = vaddr + shdr.size as u64;

            if cursor > u32::MAX as u64 {
                return Err(LoaderError::CorruptFormat(format!("section {} does not fit into the address space", i)));
            }

            addrs[i] = vaddr as VAddr;
            vaddr as VAddr
        } else {
            shdr.addr
        };

        let filesz = if shdr.has_file_data() { shdr.size } else { 0 };
        regions.push(Region::new(vaddr, shdr.size, shdr.offset, filesz, Perms::from_section_flags(shdr.flags)));
    }

    Ok((regions, addrs))
}

/// The materialized virtual memory of an image. Relocations are written into it.
#[derive(Debug)]
pub struct LoadedImage {
    base: VAddr,
    bytes: Vec<u8>,
    regions: Vec<Region>,
    endian: Endian,
    last: Cell<usize>,
}

impl LoadedImage {
    /// Copies the file contents of all regions into a buffer spanning the whole image
    pub fn build(data: &[u8], endian: Endian, mut regions: Vec<Region>) -> Result<Self, LoaderError> {
        let base = regions.iter().map(|r| r.vaddr).min().unwrap_or(0);
        let end = regions.iter().map(|r| r.end()).max().unwrap_or(base as u64);
        let size = end - base as u64;

        if size > MAX_IMAGE_SIZE {
            return Err(LoaderError::CorruptFormat(format!("image spans {:#x} bytes", size)));
        }

        let mut bytes = vec![0u8; size as usize];

        for region in &mut regions {
            region.host_offset = (region.vaddr - base) as usize;

            let src = region.file_offset as usize;
            let len = region.filesz as usize;

            if src + len > data.len() {
                return Err(LoaderError::CorruptFormat(format!("region at {:#x} extends past the end of the file", region.vaddr)));
            }

            bytes[region.host_offset..region.host_offset + len].copy_from_slice(&data[src..src + len]);
        }

        Ok(Self {
            base,
            bytes,
            regions,
            endian,
            last: Cell::new(0),
        })
    }

    pub fn base(&self) -> VAddr {
        self.base
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    fn find_region(&self, vaddr: VAddr) -> Option<&Region> {
        /* Disassemblers translate neighbouring addresses in a row */
        if let Some(region) = self.regions.get(self.last.get()) {
            if region.contains(vaddr) {
                return Some(region);
            }
        }

        let idx = self.regions.iter().position(|r| r.contains(vaddr))?;
        self.last.set(idx);
        Some(&self.regions[idx])
    }

    /// Translates a native address into an offset into [`LoadedImage::bytes`]
    pub fn native_to_host(&self, vaddr: VAddr) -> Option<usize> {
        let region = self.find_region(vaddr)?;
        Some(region.host_offset + (vaddr - region.vaddr) as usize)
    }

    /// Like [`LoadedImage::native_to_host`] but `len` bytes starting at `vaddr` must be mapped by the same region
    pub fn native_to_host_range(&self, vaddr: VAddr, len: usize) -> Option<usize> {
        let region = self.find_region(vaddr)?;

        if vaddr as u64 + len as u64 > region.end() {
            return None;
        }

        Some(region.host_offset + (vaddr - region.vaddr) as usize)
    }

    pub fn contains(&self, vaddr: VAddr) -> bool {
        self.find_region(vaddr).is_some()
    }

    pub fn slice(&self, vaddr: VAddr, len: usize) -> Option<&[u8]> {
        let host = self.native_to_host_range(vaddr, len)?;
        Some(&self.bytes[host..host + len])
    }

    pub fn read32(&self, vaddr: VAddr) -> Option<u32> {
        let host = self.native_to_host_range(vaddr, 4)?;
        Some(self.endian.read32(&self.bytes, host))
    }

    pub fn write32(&mut self, vaddr: VAddr, value: u32) -> Option<()> {
        let host = self.native_to_host_range(vaddr, 4)?;
        self.endian.write32(&mut self.bytes, host, value);
        Some(())
    }

    /// Reads a NUL-terminated string that must end before `limit`
    pub fn read_str(&self, vaddr: VAddr, limit: VAddr) -> Option<&str> {
        let host = self.native_to_host(vaddr)?;
        let region = self.find_region(vaddr)?;
        let region_end = region.host_offset + region.memsz as usize;
        let max_len = (limit.saturating_sub(vaddr) as usize).min(region_end - host);
        let rest = &self.bytes[host..host + max_len];
        let len = rest.iter().position(|b| *b == 0)?;
        std::str::from_utf8(&rest[..len]).ok()
    }
}

#[cfg(test)]
fn test_image() -> LoadedImage {
    let mut data = vec![0u8; 0x40];

    for (i, b) in data.iter_mut().enumerate() {
        *b = i as u8;
    }

    let regions = vec![
        Region::new(0x1000, 0x10, 0x00, 0x10, Perms::default()),
        Region::new(0x2000, 0x20, 0x10, 0x08, Perms::default()),
    ];

    LoadedImage::build(&data, Endian::Little, regions).unwrap()
}

#[cfg(test)]
#[test]
fn test_translate() {
    let image = test_image();

    assert_eq!(image.base(), 0x1000);
    assert_eq!(image.size(), 0x1020);

    /* TEST1: Hits in both regions */
    assert_eq!(image.native_to_host(0x1000), Some(0));
    assert_eq!(image.native_to_host(0x100f), Some(0xf));
    assert_eq!(image.native_to_host(0x2004), Some(0x1004));
    assert_eq!(image.native_to_host(0x1004), Some(4));

    /* TEST2: Gaps and ends */
    assert_eq!(image.native_to_host(0x1010), None);
    assert_eq!(image.native_to_host(0xfff), None);
    assert_eq!(image.native_to_host(0x2020), None);

    /* TEST3: Ranges must not cross a region */
    assert_eq!(image.native_to_host_range(0x100c, 4), Some(0xc));
    assert_eq!(image.native_to_host_range(0x100d, 4), None);
}

#[cfg(test)]
#[test]
fn test_contents() {
    let mut image = test_image();

    /* File bytes are copied, the tail of a segment is zeroed */
    assert_eq!(image.slice(0x1000, 4), Some(&[0u8, 1, 2, 3][..]));
    assert_eq!(image.slice(0x2000, 2), Some(&[0x10u8, 0x11][..]));
    assert_eq!(image.read32(0x2008), Some(0));

    image.write32(0x2008, 0xcafebabe).unwrap();
    assert_eq!(image.read32(0x2008), Some(0xcafebabe));
    assert!(image.write32(0x201e, 0).is_none());
}

#[cfg(test)]
#[test]
fn test_layout_relocatable() {
    use goblin::elf::section_header::{
        SHF_ALLOC,
        SHF_EXECINSTR,
        SHF_WRITE,
        SHT_NOBITS,
        SHT_NULL,
        SHT_PROGBITS,
        SHT_SYMTAB,
    };

    let shdr = |sh_type, flags, size, addralign| SectionHeader {
        name: 0,
        sh_type,
        flags,
        addr: 0,
        offset: 0x40,
        size,
        link: 0,
        info: 0,
        addralign,
        entsize: 0,
    };

    let shdrs = vec![
        shdr(SHT_NULL, 0, 0, 0),
        shdr(SHT_PROGBITS, SHF_ALLOC | SHF_EXECINSTR, 0x13, 4),
        shdr(SHT_PROGBITS, SHF_ALLOC | SHF_WRITE, 0x8, 16),
        shdr(SHT_SYMTAB, 0, 0x20, 4),
        shdr(SHT_NOBITS, SHF_ALLOC | SHF_WRITE, 0x100, 8),
    ];

    let (regions, addrs) = layout_sections(&shdrs, true).unwrap();
    assert_eq!(regions.len(), 3);
    assert_eq!(addrs[1], REL_LOAD_BASE);
    assert_eq!(addrs[2], REL_LOAD_BASE + 0x20);
    assert_eq!(addrs[3], 0);
    assert_eq!(addrs[4], REL_LOAD_BASE + 0x28);
    assert_eq!(regions[2].filesz, 0);
}
