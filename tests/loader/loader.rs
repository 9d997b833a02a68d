mod fixture;

use elfload::loader::{
    BinaryImage,
    ElfLoader,
    LoadFormat,
    LoadWarning,
    LoaderError,
    Machine,
    SymbolKind,
    SymbolTable,
    CONFIDENCE_ELF32,
    REL_LOAD_BASE,
};
use fixture::{
    Fixture,
    FxSegment,
};
use goblin::elf::{
    dynamic,
    header,
    program_header,
    reloc,
    section_header::{
        SHF_ALLOC,
        SHF_EXECINSTR,
        SHF_WRITE,
        SHT_DYNAMIC,
        SHT_DYNSYM,
        SHT_PROGBITS,
        SHT_REL,
        SHT_RELA,
        SHT_STRTAB,
        SHT_SYMTAB,
    },
    sym,
};
use rand::{
    rngs::StdRng,
    Rng,
    SeedableRng,
};

const R_SPARC_32: u32 = 3;
const R_SPARC_DISP32: u32 = 6;

fn load(data: &[u8]) -> Result<(ElfLoader, BinaryImage, SymbolTable), LoaderError> {
    let mut loader = ElfLoader::new();
    let mut image = BinaryImage::new();
    let mut symbols = SymbolTable::new();
    loader.load_from_memory(data, &mut image, &mut symbols)?;
    Ok((loader, image, symbols))
}

fn load_err(data: &[u8]) -> LoaderError {
    match load(data) {
        Ok(_) => panic!("image loaded"),
        Err(err) => err,
    }
}

fn concat(parts: Vec<Vec<u8>>) -> Vec<u8> {
    parts.into_iter().flatten().collect()
}

/// A statically linked i386 executable with .text, .data and .bss
fn static_exec() -> Vec<u8> {
    let mut fx = Fixture::new(header::EM_386, header::ET_EXEC).entry(0x08048100);

    let text: Vec<u8> = (0..0x20u8).collect();
    let text_idx = fx.section(".text", SHT_PROGBITS, SHF_ALLOC | SHF_EXECINSTR, 0x08048100, text);
    let data_idx = fx.section(".data", SHT_PROGBITS, SHF_ALLOC | SHF_WRITE, 0x08048200, vec![0xaa; 0x10]);
    let bss_idx = fx.nobits(".bss", SHF_ALLOC | SHF_WRITE, 0x08048210, 0x20);

    let (strtab, names) = Fixture::strtab(&["_start", "main", "counter", "buffer"]);
    let symtab = concat(vec![
        fx.null_sym(),
        fx.sym(names[0], 0x08048100, 0x10, sym::STB_GLOBAL, sym::STT_FUNC, text_idx as u16),
        fx.sym(names[1], 0x08048110, 0x10, sym::STB_GLOBAL, sym::STT_FUNC, text_idx as u16),
        fx.sym(names[2], 0x08048200, 4, sym::STB_GLOBAL, sym::STT_OBJECT, data_idx as u16),
        fx.sym(names[3], 0x08048210, 0x20, sym::STB_LOCAL, sym::STT_OBJECT, bss_idx as u16),
    ]);

    let symtab_idx = fx.section(".symtab", SHT_SYMTAB, 0, 0, symtab);
    let strtab_idx = fx.section(".strtab", SHT_STRTAB, 0, 0, strtab);
    fx.link(symtab_idx, strtab_idx, 1, 16);

    fx.build()
}

/// A dynamically linked i386 executable calling puts and exit through the PLT
fn dynamic_exec() -> Vec<u8> {
    let mut fx = Fixture::new(header::EM_386, header::ET_EXEC).entry(0x08048300);

    let (dynstr, dnames) = Fixture::strtab(&["puts", "exit", "libc.so.6"]);
    let dynstr_len = dynstr.len() as u32;
    let dynsym = concat(vec![
        fx.null_sym(),
        fx.sym(dnames[0], 0, 0, sym::STB_GLOBAL, sym::STT_FUNC, 0),
        fx.sym(dnames[1], 0, 0, sym::STB_GLOBAL, sym::STT_FUNC, 0),
    ]);

    let dynsym_idx = fx.section(".dynsym", SHT_DYNSYM, SHF_ALLOC, 0x08048100, dynsym);
    let dynstr_idx = fx.section(".dynstr", SHT_STRTAB, SHF_ALLOC, 0x08048140, dynstr);
    fx.link(dynsym_idx, dynstr_idx, 1, 16);

    let rel_plt = concat(vec![
        fx.rel(0x0804840c, 1, reloc::R_386_JMP_SLOT),
        fx.rel(0x08048410, 2, reloc::R_386_JMP_SLOT),
    ]);
    let rel_plt_idx = fx.section(".rel.plt", SHT_REL, SHF_ALLOC, 0x08048160, rel_plt);

    let plt_idx = fx.section(".plt", SHT_PROGBITS, SHF_ALLOC | SHF_EXECINSTR, 0x08048200, vec![0x90; 0x30]);
    fx.link(rel_plt_idx, dynsym_idx, plt_idx, 8);

    let text_idx = fx.section(".text", SHT_PROGBITS, SHF_ALLOC | SHF_EXECINSTR, 0x08048300, vec![0xc3; 0x20]);

    let dynamic = concat(vec![
        fx.dyn_entry(dynamic::DT_NEEDED, dnames[2]),
        fx.dyn_entry(dynamic::DT_STRTAB, 0x08048140),
        fx.dyn_entry(dynamic::DT_STRSZ, dynstr_len),
        fx.dyn_entry(dynamic::DT_NULL, 0),
    ]);
    let dynamic_idx = fx.section(".dynamic", SHT_DYNAMIC, SHF_ALLOC | SHF_WRITE, 0x08048380, dynamic);
    fx.link(dynamic_idx, dynstr_idx, 0, 8);

    let got = concat(vec![
        fx.u32b(0x08048380).to_vec(),
        fx.u32b(0).to_vec(),
        fx.u32b(0).to_vec(),
        fx.u32b(0x08048216).to_vec(),
        fx.u32b(0x08048226).to_vec(),
    ]);
    fx.section(".got.plt", SHT_PROGBITS, SHF_ALLOC | SHF_WRITE, 0x08048400, got);

    let (strtab, names) = Fixture::strtab(&["main", "puts@@GLIBC_2.0"]);
    let symtab = concat(vec![
        fx.null_sym(),
        fx.sym(names[0], 0x08048300, 0x20, sym::STB_GLOBAL, sym::STT_FUNC, text_idx as u16),
        fx.sym(names[1], 0, 0, sym::STB_GLOBAL, sym::STT_FUNC, 0),
    ]);
    let symtab_idx = fx.section(".symtab", SHT_SYMTAB, 0, 0, symtab);
    let strtab_idx = fx.section(".strtab", SHT_STRTAB, 0, 0, strtab);
    fx.link(symtab_idx, strtab_idx, 1, 16);

    fx.build()
}

/// A dynamic image that only declares DT_NEEDED entries
fn needed_exec(needed: &[&str], stripped: bool) -> Vec<u8> {
    let mut fx = Fixture::new(header::EM_386, header::ET_DYN);

    let (dynstr, offsets) = Fixture::strtab(needed);
    let dynstr_len = dynstr.len() as u32;
    let dynstr_idx = fx.section(".dynstr", SHT_STRTAB, SHF_ALLOC, 0x1100, dynstr);

    let mut entries: Vec<Vec<u8>> = offsets.iter().map(|off| fx.dyn_entry(dynamic::DT_NEEDED, *off)).collect();
    entries.push(fx.dyn_entry(dynamic::DT_STRTAB, 0x1100));
    entries.push(fx.dyn_entry(dynamic::DT_STRSZ, dynstr_len));
    entries.push(fx.dyn_entry(dynamic::DT_NULL, 0));
    let dynamic = concat(entries);
    let dynamic_len = dynamic.len() as u32;

    let dynamic_idx = fx.section(".dynamic", SHT_DYNAMIC, SHF_ALLOC | SHF_WRITE, 0x1200, dynamic);
    fx.link(dynamic_idx, dynstr_idx, 0, 8);

    fx.phdr(FxSegment {
        p_type: program_header::PT_DYNAMIC,
        vaddr: 0x1200,
        offset: 0x200,
        filesz: dynamic_len,
        memsz: dynamic_len,
        flags: program_header::PF_R | program_header::PF_W,
    });

    if stripped {
        fx = fx.strip_sections();
    }

    fx.build()
}

#[test]
fn test_can_load() {
    let data = static_exec();
    assert_eq!(ElfLoader::can_load(&data), CONFIDENCE_ELF32);
    assert_eq!(ElfLoader::can_load(b"\x7fEL"), 0);
    assert_eq!(ElfLoader::can_load(b"MZ\x90\x00 this is a PE file, not an ELF image at all"), 0);
}

#[test]
fn test_static_exec() {
    let data = static_exec();
    let (loader, image, symbols) = load(&data).unwrap();

    /* TEST1: Header facts */
    assert_eq!(loader.format(), LoadFormat::Elf);
    assert_eq!(loader.machine(), Some(Machine::Pentium));
    assert!(!loader.is_library());
    assert_eq!(loader.entry_point(), Some(0x08048100));
    assert_eq!(loader.main_entry_point(), Some(0x08048110));

    /* TEST2: Image span covers .bss */
    assert_eq!(loader.image_base(), Some(0x08048000));
    assert_eq!(loader.image_size(), 0x230);

    /* TEST3: Sections */
    assert_eq!(image.len(), 6);
    let text = image.section_by_name(".text").unwrap();
    assert!(text.is_code());
    assert_eq!(text.vaddr(), 0x08048100);
    assert_eq!(text.host_offset(), Some(0x100));
    let bss = image.section_by_name(".bss").unwrap();
    assert!(bss.is_bss());
    assert_eq!(image.section_containing(0x0804822f).unwrap().name(), ".bss");
    assert!(!image.section_by_name(".symtab").unwrap().is_loaded());

    /* TEST4: Contents */
    let loaded = loader.loaded_image().unwrap();
    let host = loader.native_to_host(0x08048104).unwrap();
    assert_eq!(&loaded.bytes()[host..host + 4], &[4, 5, 6, 7]);
    assert_eq!(loaded.read32(0x08048200), Some(0xaaaaaaaa));
    assert_eq!(loaded.read32(0x08048210), Some(0));

    /* TEST5: Symbols */
    assert_eq!(symbols.len(), 4);
    assert_eq!(symbols.symbol_by_name("counter").unwrap().kind(), SymbolKind::Object);
    assert_eq!(symbols.symbol_at(0x08048100).unwrap().name(), "_start");
    assert!(symbols.externs().is_empty());

    /* TEST6: Nothing else */
    assert!(loader.dependencies().is_empty());
    assert!(loader.warnings().is_empty());
    assert!(loader.plt_range().is_none());
    assert!(!loader.is_relocation_at(0x08048200));
}

#[test]
fn test_not_elf() {
    assert!(load_err(b"").is_not_this_format());
    assert!(load_err(b"\x7fEL").is_not_this_format());

    let mut data = static_exec();
    data[header::EI_CLASS] = header::ELFCLASS64;
    assert!(load_err(&data).is_not_this_format());
}

#[test]
fn test_truncated() {
    let data = static_exec();

    /* TEST1: Inside of the file header */
    assert!(matches!(load(&data[..40]), Err(LoaderError::CorruptFormat(_))));

    /* TEST2: Section header table cut off */
    assert!(matches!(load(&data[..data.len() - 1]), Err(LoaderError::CorruptFormat(_))));
}

#[test]
fn test_corrupt_tables() {
    let data = static_exec();
    let shoff = u32::from_le_bytes(data[32..36].try_into().unwrap()) as usize;

    /* TEST1: Section header table past the end */
    let mut bad = data.clone();
    bad[32..36].copy_from_slice(&(data.len() as u32 + 0x100).to_le_bytes());
    assert!(matches!(load(&bad), Err(LoaderError::CorruptFormat(_))));

    bad[32..36].copy_from_slice(&u32::MAX.to_le_bytes());
    assert!(matches!(load(&bad), Err(LoaderError::CorruptFormat(_))));

    /* TEST2: Section data past the end */
    let mut bad = data.clone();
    let off = shoff + 40 + 16;
    bad[off..off + 4].copy_from_slice(&0xffff0000u32.to_le_bytes());
    assert!(matches!(load(&bad), Err(LoaderError::CorruptFormat(_))));

    /* TEST3: Allocated section outside of every segment */
    let mut bad = data.clone();
    let off = shoff + 2 * 40 + 12;
    bad[off..off + 4].copy_from_slice(&0x09000000u32.to_le_bytes());
    assert!(matches!(load(&bad), Err(LoaderError::CorruptFormat(_))));

    /* TEST4: Unsupported machine */
    let mut bad = data;
    bad[18..20].copy_from_slice(&header::EM_X86_64.to_le_bytes());
    assert_eq!(load(&bad).err(), Some(LoaderError::UnsupportedMachine(header::EM_X86_64)));
}

#[test]
fn test_segments() {
    let mut fx = Fixture::new(header::EM_386, header::ET_EXEC);
    fx.section(".text", SHT_PROGBITS, SHF_ALLOC | SHF_EXECINSTR, 0x08048100, vec![0xcc; 0x80]);
    fx.section(".data", SHT_PROGBITS, SHF_ALLOC | SHF_WRITE, 0x08049180, vec![0x11; 0x20]);
    fx.segment(0x08048000, 0, 0x180, 0x180, program_header::PF_R | program_header::PF_X);
    fx.segment(0x08049180, 0x180, 0x20, 0x100, program_header::PF_R | program_header::PF_W);
    let data = fx.build();

    let (loader, _, _) = load(&data).unwrap();
    let image = loader.loaded_image().unwrap();

    /* TEST1: Span from the lowest to the highest segment */
    assert_eq!(image.base(), 0x08048000);
    assert_eq!(image.size(), 0x1280);
    assert_eq!(image.regions().len(), 2);

    /* TEST2: Translation is the inverse of base + offset */
    for vaddr in (0x08048000..0x08048180).chain(0x08049180..0x08049280) {
        let host = image.native_to_host(vaddr).unwrap();
        assert_eq!(image.base() + host as u32, vaddr);
    }

    /* TEST3: Translated bytes match the file */
    for vaddr in 0x08048000..0x08048180u32 {
        let host = image.native_to_host(vaddr).unwrap();
        assert_eq!(image.bytes()[host], data[(vaddr - 0x08048000) as usize]);
    }

    for vaddr in 0x08049180..0x080491a0u32 {
        let host = image.native_to_host(vaddr).unwrap();
        assert_eq!(image.bytes()[host], data[(vaddr - 0x08049180 + 0x180) as usize]);
    }

    /* TEST4: Holes and the end */
    assert_eq!(image.native_to_host(0x08048180), None);
    assert_eq!(image.native_to_host(0x08049000), None);
    assert_eq!(image.native_to_host(0x08049280), None);
    assert_eq!(image.native_to_host(0x08047fff), None);

    /* TEST5: File part and zero-filled tail */
    assert_eq!(image.read32(0x08049180), Some(0x11111111));
    assert_eq!(image.read32(0x080491a0), Some(0));
    assert_eq!(image.read32(0x0804927c), Some(0));
    assert_eq!(image.read32(0x0804927e), None);
}

#[test]
fn test_relocatable() {
    let mut fx = Fixture::new(header::EM_386, header::ET_REL);

    let mut text = vec![0u8; 0x10];
    text[0..4].copy_from_slice(&0xdeadbeefu32.to_le_bytes());
    text[4..8].copy_from_slice(&0x10u32.to_le_bytes());
    text[12..16].copy_from_slice(&(-4i32).to_le_bytes());

    let text_idx = fx.section(".text", SHT_PROGBITS, SHF_ALLOC | SHF_EXECINSTR, 0, text);
    fx.align(text_idx, 16);
    let data_idx = fx.section(".data", SHT_PROGBITS, SHF_ALLOC | SHF_WRITE, 0, vec![0; 0x10]);

    let (strtab, names) = Fixture::strtab(&["target", "printf", "main"]);
    let symtab = concat(vec![
        fx.null_sym(),
        fx.sym(names[0], 8, 4, sym::STB_LOCAL, sym::STT_OBJECT, data_idx as u16),
        fx.sym(names[1], 0, 0, sym::STB_GLOBAL, sym::STT_NOTYPE, 0),
        fx.sym(names[2], 0, 0x10, sym::STB_GLOBAL, sym::STT_FUNC, text_idx as u16),
    ]);
    let symtab_idx = fx.section(".symtab", SHT_SYMTAB, 0, 0, symtab);
    let strtab_idx = fx.section(".strtab", SHT_STRTAB, 0, 0, strtab);
    fx.link(symtab_idx, strtab_idx, 2, 16);

    let rel = concat(vec![
        fx.rel(0, 1, reloc::R_386_GOTPC),
        fx.rel(4, 1, reloc::R_386_32),
        fx.rel(8, 2, reloc::R_386_32),
        fx.rel(12, 1, reloc::R_386_PC32),
    ]);
    let rel_idx = fx.section(".rel.text", SHT_REL, 0, 0, rel);
    fx.link(rel_idx, symtab_idx, text_idx, 8);

    let data = fx.build();
    let (loader, image, symbols) = load(&data).unwrap();

    /* TEST1: Sections are laid out from the relocatable base */
    assert_eq!(loader.image_base(), Some(REL_LOAD_BASE));
    assert_eq!(image.section_by_name(".text").unwrap().vaddr(), 0x10000);
    assert_eq!(image.section_by_name(".data").unwrap().vaddr(), 0x10010);
    assert_eq!(loader.image_size(), 0x20);

    /* TEST2: Symbols are section relative */
    assert_eq!(symbols.symbol_by_name("target").unwrap().vaddr(), 0x10018);
    assert_eq!(loader.main_entry_point(), Some(0x10000));
    assert_eq!(symbols.extern_by_name("printf").unwrap().kind(), SymbolKind::Extern);

    /* TEST3: Patched values */
    let loaded = loader.loaded_image().unwrap();
    assert_eq!(loaded.read32(0x10004), Some(0x10028));
    assert_eq!(loaded.read32(0x10008), Some(0x10020));
    assert_eq!(loaded.read32(0x1000c), Some(0x8));
    assert_eq!(loader.extern_slots(), &[("printf".to_string(), 0x10020u32)]);

    /* TEST4: Unknown types are reported and left alone */
    assert_eq!(loaded.read32(0x10000), Some(0xdeadbeef));
    assert_eq!(
        loader.warnings(),
        &[LoadWarning::UnresolvedRelocationType {
            machine: "pentium",
            typ: reloc::R_386_GOTPC,
            vaddr: 0x10000,
        }]
    );

    /* TEST5: Relocation queries */
    for vaddr in [0x10004, 0x10008, 0x1000c] {
        assert!(loader.is_relocation_at(vaddr));
        assert!(!loader.is_relocation_at(vaddr + 1));
        assert!(!loader.is_relocation_at(vaddr - 1));
    }
    assert!(!loader.is_relocation_at(0x10000));
    assert_eq!(loader.relocation_symbol(0x10008), Some("printf"));
    assert_eq!(loader.relocation_symbol(0x10004), Some("target"));
}

#[test]
fn test_emit_relocs() {
    let mut fx = Fixture::new(header::EM_386, header::ET_DYN);

    let text_idx = fx.section(".text", SHT_PROGBITS, SHF_ALLOC | SHF_EXECINSTR, 0x1100, vec![0x90; 0x10]);
    let debug_idx = fx.section(".debug_info", SHT_PROGBITS, 0, 0, vec![0; 0x10]);

    let (strtab, names) = Fixture::strtab(&["f"]);
    let symtab = concat(vec![
        fx.null_sym(),
        fx.sym(names[0], 0x1100, 0x10, sym::STB_GLOBAL, sym::STT_FUNC, text_idx as u16),
    ]);
    let symtab_idx = fx.section(".symtab", SHT_SYMTAB, 0, 0, symtab);
    let strtab_idx = fx.section(".strtab", SHT_STRTAB, 0, 0, strtab);
    fx.link(symtab_idx, strtab_idx, 1, 16);

    /* Offsets into .debug_info that happen to fall inside of .text */
    let rel_debug = concat(vec![fx.rel(0x1104, 1, reloc::R_386_32)]);
    let rel_debug_idx = fx.section(".rel.debug_info", SHT_REL, 0, 0, rel_debug);
    fx.link(rel_debug_idx, symtab_idx, debug_idx, 8);

    let rel_dyn = concat(vec![fx.rel(0x1108, 1, reloc::R_386_32)]);
    let rel_dyn_idx = fx.section(".rel.dyn", SHT_REL, SHF_ALLOC, 0x1200, rel_dyn);
    fx.link(rel_dyn_idx, symtab_idx, 0, 8);

    let data = fx.build();
    let (loader, _, _) = load(&data).unwrap();
    let image = loader.loaded_image().unwrap();

    /* TEST1: Tables for unloaded sections are skipped */
    assert_eq!(image.read32(0x1104), Some(0x90909090));
    assert!(!loader.is_relocation_at(0x1104));

    /* TEST2: Tables without a target section still apply */
    assert_eq!(image.read32(0x1108), Some(0x9090a190));
    assert!(loader.is_relocation_at(0x1108));
    assert_eq!(loader.relocation_symbol(0x1108), Some("f"));
    assert!(loader.warnings().is_empty());
}

#[test]
fn test_sparc_rela() {
    let mut fx = Fixture::new(header::EM_SPARC, header::ET_EXEC).big_endian();

    let data_idx = fx.section(".data", SHT_PROGBITS, SHF_ALLOC | SHF_WRITE, 0x10200, vec![0x11; 0x10]);

    let (strtab, names) = Fixture::strtab(&["buffer"]);
    let symtab = concat(vec![
        fx.null_sym(),
        fx.sym(names[0], 0x10200, 0x10, sym::STB_LOCAL, sym::STT_OBJECT, data_idx as u16),
    ]);
    let symtab_idx = fx.section(".symtab", SHT_SYMTAB, 0, 0, symtab);
    let strtab_idx = fx.section(".strtab", SHT_STRTAB, 0, 0, strtab);
    fx.link(symtab_idx, strtab_idx, 1, 16);

    let rela = concat(vec![fx.rela(0x10204, 1, R_SPARC_32, 8), fx.rela(0x10208, 1, R_SPARC_DISP32, 0)]);
    let rela_idx = fx.section(".rela.data", SHT_RELA, 0, 0, rela);
    fx.link(rela_idx, symtab_idx, data_idx, 12);

    let data = fx.build();
    let (loader, _, _) = load(&data).unwrap();
    let image = loader.loaded_image().unwrap();

    assert_eq!(loader.machine(), Some(Machine::Sparc));

    /* TEST1: Explicit addends, the stored bytes are ignored */
    assert_eq!(image.read32(0x10204), Some(0x10208));
    assert_eq!(image.read32(0x10208), Some(0xfffffff8));

    /* TEST2: Written in target byte order */
    let host = loader.native_to_host(0x10204).unwrap();
    assert_eq!(&image.bytes()[host..host + 4], &[0x00, 0x01, 0x02, 0x08]);

    /* TEST3: Untouched neighbours */
    assert_eq!(image.read32(0x10200), Some(0x11111111));
    assert!(loader.warnings().is_empty());
}

#[test]
fn test_plt_imports() {
    let data = dynamic_exec();
    let (loader, _, symbols) = load(&data).unwrap();

    /* TEST1: Undefined functions resolve to their stubs */
    let puts = symbols.symbol_by_name("puts").unwrap();
    assert_eq!(puts.vaddr(), 0x08048210);
    assert_eq!(puts.kind(), SymbolKind::ImportedFunction);
    let exit = symbols.symbol_by_name("exit").unwrap();
    assert_eq!(exit.vaddr(), 0x08048220);
    assert!(exit.is_import());
    assert_eq!(symbols.symbol_by_name("main").unwrap().kind(), SymbolKind::Function);
    assert_eq!(loader.main_entry_point(), Some(0x08048300));

    /* TEST2: PLT range */
    assert_eq!(loader.plt_range(), Some(0x08048200..0x08048230));

    /* TEST3: GOT slots point at the stubs */
    let image = loader.loaded_image().unwrap();
    assert_eq!(image.read32(0x0804840c), Some(0x08048210));
    assert_eq!(image.read32(0x08048410), Some(0x08048220));
    assert_eq!(loader.relocation_symbol(0x0804840c), Some("puts"));
    assert_eq!(loader.relocation_symbol(0x08048410), Some("exit"));
    assert!(loader.extern_slots().is_empty());

    /* TEST4: The undefined .symtab copy of an import is not an extern */
    assert_eq!(symbols.symbols_by_name("puts").len(), 1);
    assert!(symbols.extern_by_name("puts").is_none());
    assert!(symbols.extern_by_name("exit").is_none());

    /* TEST5: Dependencies */
    assert_eq!(loader.dependencies(), &["libc.so.6".to_string()]);
    assert!(loader.warnings().is_empty());
}

#[test]
fn test_plt_extension() {
    let mut fx = Fixture::new(header::EM_386, header::ET_EXEC);

    let stubs_idx = fx.section(".stubs", SHT_PROGBITS, SHF_ALLOC | SHF_EXECINSTR, 0x08048200, vec![0x90; 0x50]);

    let (dynstr, dnames) = Fixture::strtab(&["puts", "exit", "abort"]);
    let dynsym = concat(vec![
        fx.null_sym(),
        fx.sym(dnames[0], 0x08048210, 0, sym::STB_GLOBAL, sym::STT_FUNC, 0),
        fx.sym(dnames[1], 0x08048220, 0, sym::STB_GLOBAL, sym::STT_FUNC, 0),
        fx.sym(dnames[2], 0x08048230, 0, sym::STB_GLOBAL, sym::STT_FUNC, 0),
    ]);
    let dynsym_idx = fx.section(".dynsym", SHT_DYNSYM, SHF_ALLOC, 0x08048100, dynsym);
    let dynstr_idx = fx.section(".dynstr", SHT_STRTAB, SHF_ALLOC, 0x08048180, dynstr);
    fx.link(dynsym_idx, dynstr_idx, 1, 16);

    let (strtab, names) = Fixture::strtab(&["helper"]);
    let symtab = concat(vec![
        fx.null_sym(),
        fx.sym(names[0], 0x08048240, 0x10, sym::STB_LOCAL, sym::STT_FUNC, stubs_idx as u16),
    ]);
    let symtab_idx = fx.section(".symtab", SHT_SYMTAB, 0, 0, symtab);
    let strtab_idx = fx.section(".strtab", SHT_STRTAB, 0, 0, strtab);
    fx.link(symtab_idx, strtab_idx, 1, 16);

    let data = fx.build();
    let (loader, _, symbols) = load(&data).unwrap();

    /* The run of stubs ends at the first symbol from another section */
    assert_eq!(loader.plt_range(), Some(0x08048210..0x08048240));

    for name in ["puts", "exit", "abort"] {
        assert_eq!(symbols.symbol_by_name(name).unwrap().kind(), SymbolKind::ImportedFunction);
    }

    assert_eq!(symbols.symbol_by_name("helper").unwrap().kind(), SymbolKind::Function);
}

#[test]
fn test_dependencies() {
    /* TEST1: In file order, duplicates kept */
    let data = needed_exec(&["libc.so", "libm.so", "libc.so"], false);
    let (loader, _, _) = load(&data).unwrap();
    assert!(loader.is_library());
    assert_eq!(loader.dependencies(), &["libc.so", "libm.so", "libc.so"]);

    /* TEST2: Through the dynamic segment without section headers */
    let data = needed_exec(&["libc.so", "libm.so"], true);
    let (loader, image, _) = load(&data).unwrap();
    assert!(image.is_empty());
    assert_eq!(loader.dependencies(), &["libc.so", "libm.so"]);

    /* TEST3: Static images have none */
    let (loader, _, _) = load(&static_exec()).unwrap();
    assert!(loader.dependencies().is_empty());
}

#[test]
fn test_reload() {
    let mut loader = ElfLoader::new();
    let mut image = BinaryImage::new();
    let mut symbols = SymbolTable::new();

    loader.load_from_memory(&dynamic_exec(), &mut image, &mut symbols).unwrap();
    assert!(loader.is_loaded());
    assert!(image.section_by_name(".plt").is_some());

    /* TEST1: A new image replaces everything from the previous one */
    loader.load_from_memory(&static_exec(), &mut image, &mut symbols).unwrap();
    assert!(image.section_by_name(".plt").is_none());
    assert!(symbols.symbol_by_name("puts").is_none());
    assert!(loader.dependencies().is_empty());
    assert!(loader.plt_range().is_none());

    /* TEST2: A failed load leaves the stores alone but drops the image */
    let mut bad = static_exec();
    bad.truncate(100);
    assert!(loader.load_from_memory(&bad, &mut image, &mut symbols).is_err());
    assert!(!loader.is_loaded());
    assert!(image.section_by_name(".text").is_some());
    assert_eq!(symbols.len(), 4);
    assert_eq!(loader.image_size(), 0);

    /* TEST3: Closing twice is fine */
    loader.load_from_memory(&static_exec(), &mut image, &mut symbols).unwrap();
    loader.close();
    loader.close();
    assert!(!loader.is_loaded());
    assert_eq!(loader.entry_point(), None);
}

#[test]
fn test_mutations() {
    let seeds = [static_exec(), dynamic_exec(), needed_exec(&["libc.so"], true)];
    let mut rng = StdRng::seed_from_u64(0x454c46);

    for _ in 0..2000 {
        let mut data = seeds[rng.gen_range(0..seeds.len())].clone();

        for _ in 0..rng.gen_range(1..8) {
            let pos = rng.gen_range(0..data.len());
            data[pos] = rng.gen();
        }

        if rng.gen_bool(0.1) {
            let len = rng.gen_range(0..data.len());
            data.truncate(len);
        }

        /* Must never panic, errors are fine */
        if let Ok((loader, _, _)) = load(&data) {
            assert!(loader.image_size() as u64 <= elfload::loader::MAX_IMAGE_SIZE);
        }
    }
}
