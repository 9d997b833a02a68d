use std::collections::BTreeMap;

use goblin::elf::{
    reloc,
    section_header,
    sym,
};
use rustc_hash::FxHashMap;

use crate::loader::{
    error::{
        LoadWarning,
        LoaderError,
    },
    header::Machine,
    image::{
        LoadedImage,
        VAddr,
    },
    symbol::strip_version,
    tables::{
        RawSymbol,
        SymTab,
        Tables,
    },
};

/// Patched address -> name of the symbol the relocation referenced
pub type RelocMap = BTreeMap<VAddr, String>;

/* Relocation numbers from the SPARC, PowerPC, m68k and MIPS psABI supplements */
mod consts {
    pub const R_SPARC_NONE: u32 = 0;
    pub const R_SPARC_32: u32 = 3;
    pub const R_SPARC_DISP32: u32 = 6;
    pub const R_SPARC_COPY: u32 = 19;
    pub const R_SPARC_GLOB_DAT: u32 = 20;
    pub const R_SPARC_JMP_SLOT: u32 = 21;
    pub const R_SPARC_RELATIVE: u32 = 22;
    pub const R_SPARC_UA32: u32 = 23;

    pub const R_PPC_NONE: u32 = 0;
    pub const R_PPC_ADDR32: u32 = 1;
    pub const R_PPC_COPY: u32 = 19;
    pub const R_PPC_GLOB_DAT: u32 = 20;
    pub const R_PPC_JMP_SLOT: u32 = 21;
    pub const R_PPC_RELATIVE: u32 = 22;
    pub const R_PPC_UADDR32: u32 = 24;
    pub const R_PPC_REL32: u32 = 26;

    pub const R_68K_NONE: u32 = 0;
    pub const R_68K_32: u32 = 1;
    pub const R_68K_PC32: u32 = 4;
    pub const R_68K_COPY: u32 = 19;
    pub const R_68K_GLOB_DAT: u32 = 20;
    pub const R_68K_JMP_SLOT: u32 = 21;
    pub const R_68K_RELATIVE: u32 = 22;

    pub const R_MIPS_NONE: u32 = 0;
    pub const R_MIPS_32: u32 = 2;
}

use consts::*;

/// How the value of a relocation is computed
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RelocKind {
    /// Nothing to do
    None,
    /// S + A
    Absolute,
    /// S + A - P
    PcRelative,
    /// The stub or extern address of the symbol, no addend
    GotSlot,
    /// Patches code in the PLT at runtime; only the target is recorded
    PltSlot,
    /// B + A with a load bias of 0
    Relative,
    /// The dynamic linker copies the symbol's data; only the target is recorded
    Copy,
}

/// Maps a machine specific relocation type to its computation, `None` if unknown
pub fn reloc_kind(machine: Machine, typ: u32) -> Option<RelocKind> {
    let kind = match machine {
        Machine::Pentium => match typ {
            reloc::R_386_NONE => RelocKind::None,
            reloc::R_386_32 => RelocKind::Absolute,
            reloc::R_386_PC32 => RelocKind::PcRelative,
            reloc::R_386_GLOB_DAT | reloc::R_386_JMP_SLOT => RelocKind::GotSlot,
            reloc::R_386_RELATIVE => RelocKind::Relative,
            reloc::R_386_COPY => RelocKind::Copy,
            _ => return None,
        },
        Machine::Sparc => match typ {
            R_SPARC_NONE => RelocKind::None,
            R_SPARC_32 | R_SPARC_UA32 => RelocKind::Absolute,
            R_SPARC_DISP32 => RelocKind::PcRelative,
            R_SPARC_GLOB_DAT => RelocKind::GotSlot,
            R_SPARC_JMP_SLOT => RelocKind::PltSlot,
            R_SPARC_RELATIVE => RelocKind::Relative,
            R_SPARC_COPY => RelocKind::Copy,
            _ => return None,
        },
        Machine::Ppc => match typ {
            R_PPC_NONE => RelocKind::None,
            R_PPC_ADDR32 | R_PPC_UADDR32 => RelocKind::Absolute,
            R_PPC_REL32 => RelocKind::PcRelative,
            R_PPC_GLOB_DAT => RelocKind::GotSlot,
            R_PPC_JMP_SLOT => RelocKind::PltSlot,
            R_PPC_RELATIVE => RelocKind::Relative,
            R_PPC_COPY => RelocKind::Copy,
            _ => return None,
        },
        Machine::M68k => match typ {
            R_68K_NONE => RelocKind::None,
            R_68K_32 => RelocKind::Absolute,
            R_68K_PC32 => RelocKind::PcRelative,
            R_68K_GLOB_DAT | R_68K_JMP_SLOT => RelocKind::GotSlot,
            R_68K_RELATIVE => RelocKind::Relative,
            R_68K_COPY => RelocKind::Copy,
            _ => return None,
        },
        Machine::Mips => match typ {
            R_MIPS_NONE => RelocKind::None,
            R_MIPS_32 => RelocKind::Absolute,
            _ => return None,
        },
        Machine::St20 => match typ {
            0 => RelocKind::None,
            _ => return None,
        },
    };

    Some(kind)
}

/// Computes the value to be written, `None` if the target is left untouched
pub fn compute(kind: RelocKind, s: VAddr, a: i32, p: VAddr) -> Option<u32> {
    match kind {
        RelocKind::Absolute => Some(s.wrapping_add(a as u32)),
        RelocKind::PcRelative => Some(s.wrapping_add(a as u32).wrapping_sub(p)),
        RelocKind::GotSlot => Some(s),
        RelocKind::Relative => Some(a as u32),
        RelocKind::None | RelocKind::PltSlot | RelocKind::Copy => None,
    }
}

/// Addresses handed out to undefined symbols that have no import stub
#[derive(Debug, Default)]
pub struct ExternSlots {
    next: VAddr,
    slots: FxHashMap<String, VAddr>,
    order: Vec<(String, VAddr)>,
}

/// Distance between two extern slots
pub const EXTERN_SLOT_SIZE: u32 = 4;

impl ExternSlots {
    /// Slots start at the end of the image rounded up to 16 bytes
    pub fn new(image_end: u64) -> Self {
        let first = (image_end + 15) & !15;

        Self {
            next: first.min(u32::MAX as u64 & !15) as VAddr,
            slots: FxHashMap::default(),
            order: Vec::new(),
        }
    }

    pub fn slot(&mut self, name: &str) -> VAddr {
        if let Some(vaddr) = self.slots.get(name) {
            return *vaddr;
        }

        let vaddr = self.next;
        self.next = self.next.wrapping_add(EXTERN_SLOT_SIZE);
        self.slots.insert(name.to_string(), vaddr);
        self.order.push((name.to_string(), vaddr));
        vaddr
    }

    pub fn into_vec(self) -> Vec<(String, VAddr)> {
        self.order
    }
}

pub(crate) struct RelocationEngine<'a> {
    pub(crate) tables: &'a Tables<'a>,
    pub(crate) machine: Machine,
    pub(crate) relocatable: bool,
    pub(crate) section_addrs: &'a [VAddr],
    /// Import stub addresses by symbol name
    pub(crate) imports: &'a FxHashMap<String, VAddr>,
}

impl<'a> RelocationEngine<'a> {
    fn resolve(&self, symtab: &SymTab, raw: &RawSymbol, externs: &mut ExternSlots) -> Option<(VAddr, String)> {
        let shndx = raw.shndx as u32;

        if raw.typ() == sym::STT_SECTION {
            let vaddr = *self.section_addrs.get(shndx as usize)?;
            return Some((vaddr, self.tables.section_name(shndx as usize).to_string()));
        }

        let name = strip_version(&symtab.name(raw)?).to_string();

        if raw.is_undefined() || shndx == section_header::SHN_COMMON {
            if let Some(stub) = self.imports.get(&name) {
                return Some((*stub, name));
            }

            if raw.value != 0 && !self.relocatable && raw.is_undefined() {
                return Some((raw.value, name));
            }

            let slot = externs.slot(&name);
            return Some((slot, name));
        }

        if shndx == section_header::SHN_ABS || !self.relocatable {
            return Some((raw.value, name));
        }

        let base = *self.section_addrs.get(shndx as usize)?;
        Some((base.wrapping_add(raw.value), name))
    }

    /// Applies every REL and RELA section to `image`
    pub(crate) fn apply(
        &self,
        image: &mut LoadedImage,
        externs: &mut ExternSlots,
        warnings: &mut Vec<LoadWarning>,
    ) -> Result<(RelocMap, usize), LoaderError> {
        let mut map = RelocMap::new();
        let mut applied = 0;

        for (i, shdr) in self.tables.section_headers().iter().enumerate() {
            if shdr.sh_type != section_header::SHT_REL && shdr.sh_type != section_header::SHT_RELA {
                continue;
            }

            let reltab = self.tables.reltab(i)?;

            let origin = if self.relocatable {
                /* Relocations for debug info and other unloaded sections */
                match self.tables.section(reltab.target) {
                    Some(target) if target.is_alloc() && target.size > 0 => self.section_addrs[reltab.target],
                    _ => continue,
                }
            } else {
                /* Tables kept by --emit-relocs may patch unloaded sections */
                match self.tables.section(reltab.target) {
                    Some(target) if reltab.target != 0 && !target.is_alloc() => continue,
                    _ => 0,
                }
            };

            let symtab = if reltab.symtab == 0 { None } else { Some(self.tables.symtab(reltab.symtab)?) };

            for j in 0..reltab.len() {
                let Some(rel) = reltab.get(j) else {
                    break;
                };

                let target = origin.wrapping_add(rel.offset);

                let kind = match reloc_kind(self.machine, rel.typ()) {
                    Some(RelocKind::None) => continue,
                    Some(kind) => kind,
                    None => {
                        warnings.push(LoadWarning::UnresolvedRelocationType {
                            machine: self.machine.name(),
                            typ: rel.typ(),
                            vaddr: target,
                        });
                        continue;
                    },
                };

                if image.native_to_host_range(target, 4).is_none() {
                    warnings.push(LoadWarning::RelocationOutOfImage(target));
                    continue;
                }

                let (s, name) = if rel.sym() == 0 {
                    (0, String::new())
                } else {
                    let resolved = symtab.as_ref().and_then(|symtab| {
                        let raw = symtab.get(rel.sym() as usize)?;
                        self.resolve(symtab, &raw, externs)
                    });

                    match resolved {
                        Some(resolved) => resolved,
                        None => {
                            warnings.push(LoadWarning::BadSymbolIndex {
                                section: i,
                                index: rel.sym(),
                            });
                            continue;
                        },
                    }
                };

                let a = match rel.addend {
                    Some(addend) => addend,
                    None => image.read32(target).unwrap_or(0) as i32,
                };

                if let Some(value) = compute(kind, s, a, target) {
                    image.write32(target, value);
                }

                map.insert(target, name);
                applied += 1;
            }
        }

        Ok((map, applied))
    }
}

#[cfg(test)]
#[test]
fn test_compute() {
    /* TEST1: Absolute with negative addend */
    assert_eq!(compute(RelocKind::Absolute, 0x8049000, -4, 0), Some(0x8048ffc));

    /* TEST2: PC-relative call to a lower address */
    assert_eq!(compute(RelocKind::PcRelative, 0x1000, -4, 0x2004), Some(0xffffeff8));

    /* TEST3: GOT slots ignore the addend */
    assert_eq!(compute(RelocKind::GotSlot, 0x8048310, 0x8048316u32 as i32, 0x804a00c), Some(0x8048310));

    /* TEST4: Untouched targets */
    assert_eq!(compute(RelocKind::Copy, 0x1000, 0, 0x2000), None);
    assert_eq!(compute(RelocKind::PltSlot, 0x1000, 0, 0x2000), None);
}

#[cfg(test)]
#[test]
fn test_reloc_kind() {
    assert_eq!(reloc_kind(Machine::Pentium, reloc::R_386_32), Some(RelocKind::Absolute));
    assert_eq!(reloc_kind(Machine::Pentium, reloc::R_386_PC32), Some(RelocKind::PcRelative));
    assert_eq!(reloc_kind(Machine::Pentium, reloc::R_386_JMP_SLOT), Some(RelocKind::GotSlot));
    assert_eq!(reloc_kind(Machine::Pentium, reloc::R_386_GOTPC), None);
    assert_eq!(reloc_kind(Machine::Sparc, R_SPARC_DISP32), Some(RelocKind::PcRelative));
    assert_eq!(reloc_kind(Machine::Sparc, R_SPARC_JMP_SLOT), Some(RelocKind::PltSlot));
    assert_eq!(reloc_kind(Machine::Mips, R_MIPS_32), Some(RelocKind::Absolute));
    assert_eq!(reloc_kind(Machine::St20, 1), None);
}

#[cfg(test)]
#[test]
fn test_extern_slots() {
    let mut externs = ExternSlots::new(0x8049123);

    assert_eq!(externs.slot("printf"), 0x8049130);
    assert_eq!(externs.slot("malloc"), 0x8049134);
    assert_eq!(externs.slot("printf"), 0x8049130);
    assert_eq!(externs.into_vec().len(), 2);
}
