use rustc_hash::FxHashMap;

use goblin::elf::section_header;

use crate::loader::{
    error::LoaderError,
    image::{
        LoadedImage,
        VAddr,
    },
    perms::Perms,
    tables::Tables,
};

/// A section of the loaded binary as seen by downstream consumers
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Section {
    index: usize,
    name: String,
    sh_type: u32,
    flags: u32,
    perms: Perms,
    vaddr: VAddr,
    offset: Option<usize>,
    size: usize,
}

impl Section {
    /// Index of this section in the section header table
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The virtual address of this section
    pub fn vaddr(&self) -> VAddr {
        self.vaddr
    }

    /// The size of this section
    pub fn size(&self) -> usize {
        self.size
    }

    /// The last virtual address occupied by this section (size - 1)
    pub fn last_addr(&self) -> VAddr {
        self.vaddr.wrapping_add(self.size as VAddr).wrapping_sub(1)
    }

    /// Check whether this section contains the given virtual address
    pub fn contains_address(&self, vaddr: VAddr) -> bool {
        self.vaddr <= vaddr && (vaddr as u64) < self.vaddr as u64 + self.size as u64
    }

    /// The permissions of this section
    pub fn perms(&self) -> Perms {
        self.perms
    }

    /// Offset of this section inside of the loaded image, if it is loaded
    pub fn host_offset(&self) -> Option<usize> {
        self.offset
    }

    pub fn is_loaded(&self) -> bool {
        self.offset.is_some()
    }

    pub fn sh_type(&self) -> u32 {
        self.sh_type
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn is_code(&self) -> bool {
        (self.flags & section_header::SHF_EXECINSTR) != 0
    }

    pub fn is_data(&self) -> bool {
        (self.flags & section_header::SHF_ALLOC) != 0 && !self.is_code()
    }

    pub fn is_bss(&self) -> bool {
        self.sh_type == section_header::SHT_NOBITS
    }

    pub fn is_read_only(&self) -> bool {
        (self.flags & section_header::SHF_WRITE) == 0
    }
}

/// The store of sections produced by a load
#[derive(Debug, Default)]
pub struct BinaryImage {
    sections: Vec<Section>,
    by_name: FxHashMap<String, usize>,
}

impl BinaryImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn iter_sections(&self) -> std::slice::Iter<'_, Section> {
        self.sections.iter()
    }

    /// The first section with the given name
    pub fn section_by_name<S: AsRef<str>>(&self, name: S) -> Option<&Section> {
        self.by_name.get(name.as_ref()).map(|idx| &self.sections[*idx])
    }

    /// The loaded section containing `vaddr`
    pub fn section_containing(&self, vaddr: VAddr) -> Option<&Section> {
        self.sections.iter().find(|s| s.is_loaded() && s.contains_address(vaddr))
    }

    pub(crate) fn insert(&mut self, section: Section) {
        if !self.by_name.contains_key(&section.name) {
            self.by_name.insert(section.name.clone(), self.sections.len());
        }
        self.sections.push(section);
    }
}

pub(crate) struct SectionParser;

impl SectionParser {
    /// Turns the section header table into [`Section`]s. `addrs` holds the final address
    /// of every section header.
    pub(crate) fn parse(tables: &Tables, addrs: &[VAddr], image: &LoadedImage) -> Result<BinaryImage, LoaderError> {
        let mut result = BinaryImage::new();
        let image_start = image.base() as u64;
        let image_end = image_start + image.size() as u64;

        for (i, shdr) in tables.section_headers().iter().enumerate() {
            if shdr.sh_type == section_header::SHT_NULL || shdr.size == 0 {
                continue;
            }

            let vaddr = addrs[i];
            let mut offset = None;

            if shdr.is_alloc() && !shdr.is_tls_bss() {
                let end = vaddr as u64 + shdr.size as u64;

                if end > u32::MAX as u64 + 1 {
                    return Err(LoaderError::CorruptFormat(format!("section {} address range overflows", i)));
                }

                if (vaddr as u64) < image_start || end > image_end {
                    return Err(LoaderError::CorruptFormat(format!(
                        "section {} at {:#x} (size {:#x}) lies outside of the image",
                        i, vaddr, shdr.size
                    )));
                }

                offset = image.native_to_host(vaddr);
            }

            result.insert(Section {
                index: i,
                name: tables.section_name(i).to_string(),
                sh_type: shdr.sh_type,
                flags: shdr.flags,
                perms: Perms::from_section_flags(shdr.flags),
                vaddr,
                offset,
                size: shdr.size as usize,
            });
        }

        Ok(result)
    }
}

#[cfg(test)]
#[test]
fn test_section_queries() {
    let mut image = BinaryImage::new();

    image.insert(Section {
        index: 1,
        name: ".text".to_string(),
        sh_type: section_header::SHT_PROGBITS,
        flags: section_header::SHF_ALLOC | section_header::SHF_EXECINSTR,
        perms: Perms::from_section_flags(section_header::SHF_EXECINSTR),
        vaddr: 0x1000,
        offset: Some(0),
        size: 0x100,
    });
    image.insert(Section {
        index: 2,
        name: ".bss".to_string(),
        sh_type: section_header::SHT_NOBITS,
        flags: section_header::SHF_ALLOC | section_header::SHF_WRITE,
        perms: Perms::from_section_flags(section_header::SHF_WRITE),
        vaddr: 0x1100,
        offset: Some(0x100),
        size: 0x10,
    });

    let text = image.section_by_name(".text").unwrap();
    assert!(text.is_code());
    assert!(text.is_read_only());
    assert!(!text.is_data());
    assert_eq!(text.last_addr(), 0x10ff);

    let bss = image.section_containing(0x110f).unwrap();
    assert_eq!(bss.name(), ".bss");
    assert!(bss.is_bss());
    assert!(bss.is_data());
    assert!(!bss.is_read_only());

    assert!(image.section_containing(0x1110).is_none());
    assert!(image.section_by_name(".data").is_none());
}
