//! Best-effort classification of import stubs
//!
//! Nothing in the ELF format states which addresses are procedure linkage table stubs.
//! The functions in here reconstruct that from the usual layout produced by linkers:
//! a `.plt` section with a few reserved entries followed by one fixed-size stub per
//! `.rel.plt` entry, in the same order. Binaries that do not follow this layout get
//! wrong or no results, which is a known limitation.

use std::ops::Range;

use crate::loader::{
    header::Machine,
    image::VAddr,
    symbol::{
        Symbol,
        SymbolKind,
    },
};

/// Size of a single stub and number of reserved entries at the start of `.plt`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PltLayout {
    pub entry_size: u32,
    pub reserved: u32,
}

impl PltLayout {
    pub fn for_machine(machine: Machine) -> Self {
        match machine {
            Machine::Sparc => Self {
                entry_size: 12,
                reserved: 4,
            },
            _ => Self {
                entry_size: 16,
                reserved: 1,
            },
        }
    }

    /// Address of the stub belonging to relocation slot `slot`
    pub fn stub_address(&self, base: VAddr, slot: usize) -> VAddr {
        base.wrapping_add(self.entry_size.wrapping_mul(slot as u32 + self.reserved))
    }
}

/// Searches the symbol indices of a `.rel.plt` table for `seed`.
///
/// The search starts at position `seed` (clamped to the table) and walks backwards,
/// wrapping around at the start, because the slot of symbol `i` is usually found at or
/// shortly before position `i`. Returns the position of the matching entry.
pub fn find_rel_plt_slot(indices: &[u32], seed: u32) -> Option<usize> {
    if indices.is_empty() {
        return None;
    }

    let first = (seed as usize).min(indices.len() - 1);
    let mut curr = first;

    loop {
        if indices[curr] == seed {
            return Some(curr);
        }

        curr = if curr == 0 { indices.len() - 1 } else { curr - 1 };

        if curr == first {
            return None;
        }
    }
}

/// Stub lookup for undefined dynamic symbols
#[derive(Clone, Debug)]
pub struct PltStubs {
    pub base: VAddr,
    pub layout: PltLayout,
    /// Section index of the symbol table the `.rel.plt` entries refer to
    pub symtab: usize,
    pub indices: Vec<u32>,
}

impl PltStubs {
    pub fn stub_for(&self, symtab: usize, index: u32) -> Option<VAddr> {
        if symtab != self.symtab {
            return None;
        }

        let slot = find_rel_plt_slot(&self.indices, index)?;
        Some(self.layout.stub_address(self.base, slot))
    }
}

/// Marks every symbol inside of `range` as imported function and extends the range
/// while the following symbols continue the stub pattern: one entry after the previous
/// stub and from the same section (`st_shndx`).
///
/// `symbols` must be sorted by address. Returns the final range.
pub fn mark_imports(symbols: &mut [Symbol], range: Range<VAddr>, entry_size: u32) -> Range<VAddr> {
    let min = range.start;
    let mut max = range.end;

    if min >= max {
        return range;
    }

    let mut i = symbols.partition_point(|s| s.vaddr() < min);
    let mut prev: Option<(VAddr, u16)> = None;

    while i < symbols.len() {
        let vaddr = symbols[i].vaddr();
        let section = symbols[i].section_index();

        if vaddr >= max {
            let continues = match prev {
                Some((prev_vaddr, prev_section)) => vaddr == max && vaddr.wrapping_sub(prev_vaddr) == entry_size && section == prev_section,
                None => false,
            };

            if !continues {
                break;
            }

            max = match max.checked_add(entry_size) {
                Some(max) => max,
                None => break,
            };
        }

        symbols[i].set_kind(SymbolKind::ImportedFunction);
        prev = Some((vaddr, section));
        i += 1;
    }

    min..max
}

/// Where to start looking for stubs when the image has no `.plt` section:
/// the lowest canonical stub address of an undefined function
pub fn seed_from_symbols(symbols: &[Symbol], entry_size: u32) -> Option<Range<VAddr>> {
    let start = symbols
        .iter()
        .find(|s| s.kind() == SymbolKind::ImportedFunction && s.section_index() == 0 && s.vaddr() != 0)?
        .vaddr();
    Some(start..start.checked_add(entry_size)?)
}

#[cfg(test)]
#[test]
fn test_find_slot() {
    /* TEST1: Found at the seed position */
    assert_eq!(find_rel_plt_slot(&[1, 2, 3], 2), Some(1));
    assert_eq!(find_rel_plt_slot(&[1, 2, 3, 4], 3), Some(2));

    /* TEST2: Found by walking backwards */
    assert_eq!(find_rel_plt_slot(&[7, 8, 9, 10, 11, 12], 8), Some(1));

    /* TEST3: Found after wrapping around */
    assert_eq!(find_rel_plt_slot(&[3, 0, 1], 0), Some(1));
    assert_eq!(find_rel_plt_slot(&[2, 3, 0, 9], 0), Some(2));
    assert_eq!(find_rel_plt_slot(&[4, 5, 1], 0), None);

    /* TEST4: Seed past the end of the table */
    assert_eq!(find_rel_plt_slot(&[10, 20, 30], 20), Some(1));

    /* TEST5: Missing */
    assert_eq!(find_rel_plt_slot(&[1, 2, 3], 4), None);
    assert_eq!(find_rel_plt_slot(&[], 0), None);
}

#[cfg(test)]
#[test]
fn test_stub_address() {
    let layout = PltLayout::for_machine(Machine::Pentium);
    assert_eq!(layout.stub_address(0x8048300, 0), 0x8048310);
    assert_eq!(layout.stub_address(0x8048300, 2), 0x8048330);

    let layout = PltLayout::for_machine(Machine::Sparc);
    assert_eq!(layout.stub_address(0x20000, 0), 0x20030);
}

#[cfg(test)]
#[test]
fn test_mark_imports() {
    let mut symbols = vec![
        Symbol::new("_init", 0x1000, 4, SymbolKind::Function).with_section(1),
        Symbol::new("puts", 0x1010, 0, SymbolKind::Function),
        Symbol::new("exit", 0x1020, 0, SymbolKind::Function),
        Symbol::new("abort", 0x1030, 0, SymbolKind::Function),
        Symbol::new("free", 0x1040, 0, SymbolKind::Function),
        Symbol::new("main", 0x1058, 0x40, SymbolKind::Function).with_section(1),
    ];

    /* TEST1: Seeded with two stubs, symbols continue the pattern up to 0x1050 */
    let range = mark_imports(&mut symbols, 0x1010..0x1030, 16);

    assert_eq!(range, 0x1010..0x1050);
    assert_eq!(symbols[0].kind(), SymbolKind::Function);
    assert_eq!(symbols[1].kind(), SymbolKind::ImportedFunction);
    assert_eq!(symbols[2].kind(), SymbolKind::ImportedFunction);
    assert_eq!(symbols[3].kind(), SymbolKind::ImportedFunction);
    assert_eq!(symbols[4].kind(), SymbolKind::ImportedFunction);
    assert_eq!(symbols[5].kind(), SymbolKind::Function);

    /* TEST2: A section change stops the extension */
    let mut symbols = vec![
        Symbol::new("puts", 0x1010, 0, SymbolKind::Function),
        Symbol::new("data", 0x1020, 4, SymbolKind::Object).with_section(2),
    ];
    let range = mark_imports(&mut symbols, 0x1010..0x1020, 16);

    assert_eq!(range, 0x1010..0x1020);
    assert_eq!(symbols[1].kind(), SymbolKind::Object);

    /* TEST3: A gap stops the extension */
    let mut symbols = vec![Symbol::new("puts", 0x1010, 0, SymbolKind::Function), Symbol::new("exit", 0x1024, 0, SymbolKind::Function)];
    let range = mark_imports(&mut symbols, 0x1010..0x1020, 16);

    assert_eq!(range, 0x1010..0x1020);
    assert_eq!(symbols[1].kind(), SymbolKind::Function);

    /* TEST4: Empty seed */
    let range = mark_imports(&mut symbols, 0x1010..0x1010, 16);
    assert_eq!(range, 0x1010..0x1010);
}

#[cfg(test)]
#[test]
fn test_seed_from_symbols() {
    let symbols = vec![
        Symbol::new("main", 0x1000, 0x40, SymbolKind::Function).with_section(1),
        Symbol::new("puts", 0x2010, 0, SymbolKind::ImportedFunction),
        Symbol::new("exit", 0x2020, 0, SymbolKind::ImportedFunction),
    ];

    assert_eq!(seed_from_symbols(&symbols, 16), Some(0x2010..0x2020));
    assert_eq!(seed_from_symbols(&symbols[..1], 16), None);
}
