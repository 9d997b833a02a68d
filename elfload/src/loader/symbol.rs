use std::ops::Range;

use goblin::elf::{
    section_header,
    sym,
};
use rustc_hash::{
    FxHashMap,
    FxHashSet,
};

use crate::loader::{
    error::LoadWarning,
    image::VAddr,
    plt::PltStubs,
    tables::{
        SymTab,
        Tables,
    },
};

/// How a symbol was classified after loading
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Function,
    Object,
    ImportedFunction,
    ImportedObject,
    Extern,
    Weak,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Binding {
    Local,
    Global,
    Weak,
    Other(u8),
}

impl Binding {
    fn from_st_bind(bind: u8) -> Self {
        match bind {
            sym::STB_LOCAL => Binding::Local,
            sym::STB_GLOBAL => Binding::Global,
            sym::STB_WEAK => Binding::Weak,
            other => Binding::Other(other),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Symbol {
    name: String,
    vaddr: VAddr,
    size: usize,
    kind: SymbolKind,
    binding: Binding,
    typ: u8,
    section: u16,
}

impl Symbol {
    pub fn new<S: Into<String>>(name: S, vaddr: VAddr, size: usize, kind: SymbolKind) -> Self {
        Self {
            name: name.into(),
            vaddr,
            size,
            kind,
            binding: Binding::Global,
            typ: sym::STT_NOTYPE,
            section: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Native address of this symbol, 0 for extern references
    pub fn vaddr(&self) -> VAddr {
        self.vaddr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn kind(&self) -> SymbolKind {
        self.kind
    }

    pub fn binding(&self) -> Binding {
        self.binding
    }

    /// Raw `STT_*` value from the symbol table
    pub fn typ(&self) -> u8 {
        self.typ
    }

    /// Section header index from the symbol table (`st_shndx`)
    pub fn section_index(&self) -> u16 {
        self.section
    }

    pub fn is_import(&self) -> bool {
        matches!(self.kind, SymbolKind::ImportedFunction | SymbolKind::ImportedObject)
    }

    pub fn is_function(&self) -> bool {
        match self.kind {
            SymbolKind::Function | SymbolKind::ImportedFunction => true,
            SymbolKind::Weak => self.typ == sym::STT_FUNC,
            _ => false,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self.kind, SymbolKind::Function | SymbolKind::Object | SymbolKind::Weak)
    }

    pub fn with_section(mut self, section: u16) -> Self {
        self.section = section;
        self
    }

    pub(crate) fn set_kind(&mut self, kind: SymbolKind) {
        self.kind = kind;
    }
}

/// The store of symbols produced by a load, ordered by address
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_name: FxHashMap<String, Vec<usize>>,
    externs: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `symbols` must be sorted by address
    pub(crate) fn from_sorted(symbols: Vec<Symbol>, externs: Vec<Symbol>) -> Self {
        debug_assert!(symbols.windows(2).all(|w| w[0].vaddr <= w[1].vaddr));

        let mut by_name: FxHashMap<String, Vec<usize>> = FxHashMap::default();

        for (i, symbol) in symbols.iter().enumerate() {
            by_name.entry(symbol.name.clone()).or_default().push(i);
        }

        Self {
            symbols,
            by_name,
            externs,
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// All symbols with an address, in address order
    pub fn iter_symbols(&self) -> std::slice::Iter<'_, Symbol> {
        self.symbols.iter()
    }

    /// References to symbols that are not defined anywhere in this image
    pub fn externs(&self) -> &[Symbol] {
        &self.externs
    }

    /// All symbols located exactly at `vaddr`
    pub fn symbols_at(&self, vaddr: VAddr) -> &[Symbol] {
        let start = self.symbols.partition_point(|s| s.vaddr < vaddr);
        let end = self.symbols.partition_point(|s| s.vaddr <= vaddr);
        &self.symbols[start..end]
    }

    pub fn symbol_at(&self, vaddr: VAddr) -> Option<&Symbol> {
        self.symbols_at(vaddr).first()
    }

    /// All symbols whose address lies within `range`
    pub fn symbols_in(&self, range: Range<VAddr>) -> &[Symbol] {
        let start = self.symbols.partition_point(|s| s.vaddr < range.start);
        let end = self.symbols.partition_point(|s| s.vaddr < range.end);
        &self.symbols[start..end.max(start)]
    }

    /// The lowest-addressed symbol with this name
    pub fn symbol_by_name<S: AsRef<str>>(&self, name: S) -> Option<&Symbol> {
        self.by_name.get(name.as_ref()).and_then(|idx| idx.first()).map(|i| &self.symbols[*i])
    }

    /// Every symbol with this name, duplicates at different addresses included
    pub fn symbols_by_name<S: AsRef<str>>(&self, name: S) -> Vec<&Symbol> {
        match self.by_name.get(name.as_ref()) {
            Some(idx) => idx.iter().map(|i| &self.symbols[*i]).collect(),
            None => Vec::new(),
        }
    }

    pub fn extern_by_name<S: AsRef<str>>(&self, name: S) -> Option<&Symbol> {
        self.externs.iter().find(|s| s.name == name.as_ref())
    }
}

/// Strips symbol versions like `puts@GLIBC_2.0` or `puts@@GLIBC_2.0`
pub(crate) fn strip_version(name: &str) -> &str {
    match name.find('@') {
        Some(0) | None => name,
        Some(pos) => &name[..pos],
    }
}

/// What the symbol parser needs to know about the rest of the image
pub(crate) struct SymbolContext<'a> {
    pub(crate) tables: &'a Tables<'a>,
    pub(crate) section_addrs: &'a [VAddr],
    pub(crate) relocatable: bool,
    pub(crate) stubs: Option<&'a PltStubs>,
}

impl<'a> SymbolContext<'a> {
    fn is_executable_section(&self, shndx: u16) -> bool {
        self.tables
            .section(shndx as usize)
            .map(|s| (s.flags & section_header::SHF_EXECINSTR) != 0)
            .unwrap_or(false)
    }
}

pub(crate) struct SymbolParser {
    symbols: Vec<Symbol>,
    externs: Vec<Symbol>,
    seen: FxHashSet<(String, VAddr)>,
    seen_externs: FxHashSet<String>,
}

impl SymbolParser {
    pub(crate) fn new() -> Self {
        Self {
            symbols: Vec::new(),
            externs: Vec::new(),
            seen: FxHashSet::default(),
            seen_externs: FxHashSet::default(),
        }
    }

    /// Materializes every entry of `symtab` in table order
    pub(crate) fn parse_table(&mut self, symtab: &SymTab, ctx: &SymbolContext, warnings: &mut Vec<LoadWarning>) -> usize {
        let mut count = 0;

        /* Entry 0 is reserved */
        for i in 1..symtab.len() {
            let Some(raw) = symtab.get(i) else {
                break;
            };

            if raw.typ() == sym::STT_SECTION || raw.typ() == sym::STT_FILE {
                continue;
            }

            let Some(name) = symtab.name(&raw) else {
                warnings.push(LoadWarning::BadStringOffset {
                    section: symtab.strtab_section,
                    offset: raw.name,
                });
                continue;
            };

            let name = strip_version(&name);

            if name.is_empty() {
                continue;
            }

            let shndx = raw.shndx as u32;
            let kind;
            let vaddr;

            if raw.is_undefined() || shndx == section_header::SHN_COMMON {
                let stub = match ctx.stubs {
                    Some(stubs) if raw.value == 0 && shndx == section_header::SHN_UNDEF => stubs.stub_for(symtab.section, i as u32),
                    _ => None,
                };

                if let Some(stub) = stub {
                    kind = SymbolKind::ImportedFunction;
                    vaddr = stub;
                } else if raw.value != 0 && !ctx.relocatable && shndx == section_header::SHN_UNDEF {
                    /* Canonical PLT addresses and copy-relocated data */
                    kind = if raw.typ() == sym::STT_OBJECT { SymbolKind::ImportedObject } else { SymbolKind::ImportedFunction };
                    vaddr = raw.value;
                } else {
                    if self.seen_externs.insert(name.to_string()) {
                        let mut symbol = Symbol::new(name, 0, raw.size as usize, SymbolKind::Extern);
                        symbol.binding = Binding::from_st_bind(raw.bind());
                        symbol.typ = raw.typ();
                        symbol.section = raw.shndx;
                        self.externs.push(symbol);
                        count += 1;
                    }
                    continue;
                }
            } else {
                vaddr = if shndx == section_header::SHN_ABS || !ctx.relocatable {
                    raw.value
                } else if let Some(base) = ctx.section_addrs.get(shndx as usize) {
                    base.wrapping_add(raw.value)
                } else {
                    warnings.push(LoadWarning::BadSymbolIndex {
                        section: symtab.section,
                        index: i as u32,
                    });
                    continue;
                };

                kind = if raw.bind() == sym::STB_WEAK {
                    SymbolKind::Weak
                } else {
                    match raw.typ() {
                        sym::STT_FUNC | sym::STT_GNU_IFUNC => SymbolKind::Function,
                        sym::STT_OBJECT | sym::STT_TLS | sym::STT_COMMON => SymbolKind::Object,
                        _ if ctx.is_executable_section(raw.shndx) => SymbolKind::Function,
                        _ => SymbolKind::Object,
                    }
                };
            }

            if !self.seen.insert((name.to_string(), vaddr)) {
                continue;
            }

            let mut symbol = Symbol::new(name, vaddr, raw.size as usize, kind);
            symbol.binding = Binding::from_st_bind(raw.bind());
            symbol.typ = raw.typ();
            symbol.section = raw.shndx;
            self.symbols.push(symbol);
            count += 1;
        }

        count
    }

    /// Returns the symbols ordered by address and the extern references
    pub(crate) fn finish(mut self) -> (Vec<Symbol>, Vec<Symbol>) {
        /* Imports already carry a PLT address */
        let imported: FxHashSet<String> = self.symbols.iter().filter(|s| s.is_import()).map(|s| s.name().to_string()).collect();
        self.externs.retain(|s| !imported.contains(s.name()));

        /* Stable, so symbols at the same address keep their table order */
        self.symbols.sort_by_key(|s| s.vaddr);
        (self.symbols, self.externs)
    }
}

#[cfg(test)]
#[test]
fn test_strip_version() {
    assert_eq!(strip_version("puts@GLIBC_2.0"), "puts");
    assert_eq!(strip_version("puts@@GLIBC_2.0"), "puts");
    assert_eq!(strip_version("puts"), "puts");
    assert_eq!(strip_version("@weird"), "@weird");
}

#[cfg(test)]
#[test]
fn test_symbol_table() {
    let symbols = vec![
        Symbol::new("_start", 0x1000, 0x20, SymbolKind::Function),
        Symbol::new("helper", 0x1020, 0x10, SymbolKind::Function),
        Symbol::new("helper_alias", 0x1020, 0x10, SymbolKind::Function),
        Symbol::new("counter", 0x2000, 4, SymbolKind::Object),
        Symbol::new("helper", 0x3000, 0x10, SymbolKind::Function),
        Symbol::new("_end", u32::MAX, 0, SymbolKind::Object),
    ];
    let externs = vec![Symbol::new("printf", 0, 0, SymbolKind::Extern)];
    let table = SymbolTable::from_sorted(symbols, externs);

    /* TEST1: By address */
    assert_eq!(table.len(), 6);
    assert_eq!(table.symbols_at(0x1020).len(), 2);
    assert_eq!(table.symbol_at(0x1020).unwrap().name(), "helper");
    assert!(table.symbol_at(0x1021).is_none());
    assert_eq!(table.symbols_in(0x1000..0x2001).len(), 4);
    assert_eq!(table.symbols_at(u32::MAX).len(), 1);
    assert_eq!(table.symbol_at(u32::MAX).unwrap().name(), "_end");

    /* TEST2: Duplicate names are kept */
    assert_eq!(table.symbols_by_name("helper").len(), 2);
    assert_eq!(table.symbol_by_name("helper").unwrap().vaddr(), 0x1020);

    /* TEST3: Externs have no address */
    assert!(table.symbol_by_name("printf").is_none());
    assert_eq!(table.extern_by_name("printf").unwrap().kind(), SymbolKind::Extern);
    assert!(table.symbols_at(0).is_empty());
}
