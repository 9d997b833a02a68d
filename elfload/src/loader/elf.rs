use std::ops::Range;

use goblin::elf::section_header;
use rustc_hash::FxHashMap;

use crate::{
    loader::{
        dependency::get_dependencies,
        error::{
            LoadWarning,
            LoaderError,
        },
        header::{
            self,
            ElfHeader,
            Machine,
        },
        image::{
            layout_sections,
            layout_segments,
            LoadedImage,
            VAddr,
        },
        plt::{
            mark_imports,
            seed_from_symbols,
            PltLayout,
            PltStubs,
        },
        reloc::{
            ExternSlots,
            RelocMap,
            RelocationEngine,
        },
        section::{
            BinaryImage,
            SectionParser,
        },
        symbol::{
            SymbolContext,
            SymbolParser,
            SymbolTable,
        },
        tables::Tables,
    },
    logger::Logger,
};

/// The container formats this loader produces
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoadFormat {
    Elf,
}

/// State that belongs to the currently loaded image
#[derive(Debug)]
struct LoadSession {
    header: ElfHeader,
    image: LoadedImage,
    relocs: RelocMap,
    plt: Option<Range<VAddr>>,
    dependencies: Vec<String>,
    externs: Vec<(String, VAddr)>,
    main: Option<VAddr>,
    warnings: Vec<LoadWarning>,
}

/// Loads 32-bit ELF images into a [`BinaryImage`] and a [`SymbolTable`].
///
/// A loader handles one image at a time. Loading a new image discards everything that
/// belongs to the previous one. Independent loaders share no state and can be used
/// from different threads.
pub struct ElfLoader {
    logger: Logger,
    session: Option<LoadSession>,
}

impl Default for ElfLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ElfLoader {
    pub fn new() -> Self {
        Self::with_logger(Logger::quiet())
    }

    pub fn with_logger(logger: Logger) -> Self {
        Self {
            logger,
            session: None,
        }
    }

    /// Cheap check whether `data` looks like something this loader can handle.
    /// Returns 0 if not, a positive confidence otherwise.
    pub fn can_load(data: &[u8]) -> u32 {
        header::can_load(data)
    }

    pub fn format(&self) -> LoadFormat {
        LoadFormat::Elf
    }

    /// Parses `data`, applies its relocations and fills `image` and `symbols`.
    ///
    /// On error `image` and `symbols` are left untouched and the loader holds no image.
    pub fn load_from_memory(&mut self, data: &[u8], image: &mut BinaryImage, symbols: &mut SymbolTable) -> Result<(), LoaderError> {
        self.unload();
        self.logger.set_title("Loading ELF image");

        let result = Self::process(data, &self.logger);
        self.logger.stop();

        match result {
            Ok((session, sections, table)) => {
                for warning in &session.warnings {
                    self.logger.warning(warning.to_string());
                }

                *image = sections;
                *symbols = table;
                self.session = Some(session);
                Ok(())
            },
            Err(err) => {
                self.logger.error(err.to_string());
                Err(err)
            },
        }
    }

    fn process(data: &[u8], logger: &Logger) -> Result<(LoadSession, BinaryImage, SymbolTable), LoaderError> {
        let hdr = ElfHeader::parse(data)?;
        let relocatable = hdr.is_relocatable();

        logger.info(format!(
            "{} {} image, type {}, {} bytes",
            hdr.machine,
            hdr.endian.name(),
            hdr.e_type,
            data.len()
        ));

        let tables = Tables::locate(data, &hdr)?;

        /* Build the virtual memory */
        let (regions, section_addrs) = if relocatable {
            layout_sections(tables.section_headers(), true)?
        } else {
            let regions = layout_segments(tables.program_headers(), data.len())?;
            let addrs: Vec<VAddr> = tables.section_headers().iter().map(|s| s.addr).collect();

            if regions.is_empty() {
                (layout_sections(tables.section_headers(), false)?.0, addrs)
            } else {
                (regions, addrs)
            }
        };

        let mut image = LoadedImage::build(data, hdr.endian, regions)?;
        let sections = SectionParser::parse(&tables, &section_addrs, &image)?;

        logger.debug(format!("Image at {:#x}, {:#x} bytes, {} sections", image.base(), image.size(), sections.len()));

        let mut warnings = Vec::new();

        /* Import stubs */
        let plt = sections
            .section_by_name(".plt")
            .filter(|s| s.is_loaded())
            .map(|s| s.vaddr()..s.vaddr().saturating_add(s.size() as VAddr));
        let layout = PltLayout::for_machine(hdr.machine);
        let mut stubs = None;

        if let (Some(plt), false) = (&plt, relocatable) {
            let rel_plt = tables.section_by_name(".rel.plt").or_else(|| tables.section_by_name(".rela.plt"));

            if let Some(index) = rel_plt {
                let reltab = tables.reltab(index)?;
                stubs = Some(PltStubs {
                    base: plt.start,
                    layout,
                    symtab: reltab.symtab,
                    indices: reltab.symbol_indices(),
                });
            }
        }

        /* Symbols */
        let ctx = SymbolContext {
            tables: &tables,
            section_addrs: &section_addrs,
            relocatable,
            stubs: stubs.as_ref(),
        };
        let mut parser = SymbolParser::new();
        let mut num_symbols = 0;

        for (i, shdr) in tables.section_headers().iter().enumerate() {
            if shdr.sh_type == section_header::SHT_SYMTAB || shdr.sh_type == section_header::SHT_DYNSYM {
                let symtab = tables.symtab(i)?;
                num_symbols += parser.parse_table(&symtab, &ctx, &mut warnings);
            }
        }

        let (mut symbols, externs) = parser.finish();

        let plt = plt
            .or_else(|| seed_from_symbols(&symbols, layout.entry_size))
            .map(|range| mark_imports(&mut symbols, range, layout.entry_size));

        let mut imports = FxHashMap::default();

        for symbol in symbols.iter().filter(|s| s.is_import()) {
            imports.entry(symbol.name().to_string()).or_insert(symbol.vaddr());
        }

        logger.debug(format!("{} symbols, {} imports", num_symbols, imports.len()));

        /* Relocations */
        let engine = RelocationEngine {
            tables: &tables,
            machine: hdr.machine,
            relocatable,
            section_addrs: &section_addrs,
            imports: &imports,
        };
        let mut extern_slots = ExternSlots::new(image.base() as u64 + image.size() as u64);
        let (relocs, applied) = engine.apply(&mut image, &mut extern_slots, &mut warnings)?;

        logger.debug(format!("{} relocations applied", applied));

        let dependencies = get_dependencies(&tables, &image, &mut warnings)?;
        let table = SymbolTable::from_sorted(symbols, externs);

        let main = table
            .symbols_by_name("main")
            .into_iter()
            .find(|s| s.is_defined() && s.is_function())
            .map(|s| s.vaddr());

        logger.info(format!(
            "Loaded {} sections, {} symbols, {} relocations, {} dependencies",
            sections.len(),
            table.len(),
            relocs.len(),
            dependencies.len()
        ));

        let session = LoadSession {
            header: hdr,
            image,
            relocs,
            plt,
            dependencies,
            externs: extern_slots.into_vec(),
            main,
            warnings,
        };

        Ok((session, sections, table))
    }

    /// Drops the current image. Calling this without a loaded image does nothing.
    pub fn unload(&mut self) {
        self.session = None;
    }

    pub fn close(&mut self) {
        self.unload();
    }

    pub fn is_loaded(&self) -> bool {
        self.session.is_some()
    }

    pub fn machine(&self) -> Option<Machine> {
        self.session.as_ref().map(|s| s.header.machine)
    }

    pub fn is_library(&self) -> bool {
        self.session.as_ref().map(|s| s.header.is_library()).unwrap_or(false)
    }

    /// The entry point declared in the file header
    pub fn entry_point(&self) -> Option<VAddr> {
        self.session.as_ref().map(|s| s.header.entry)
    }

    /// The address of `main`, if the image has such a symbol
    pub fn main_entry_point(&self) -> Option<VAddr> {
        self.session.as_ref().and_then(|s| s.main)
    }

    pub fn image_base(&self) -> Option<VAddr> {
        self.session.as_ref().map(|s| s.image.base())
    }

    pub fn image_size(&self) -> usize {
        self.session.as_ref().map(|s| s.image.size()).unwrap_or(0)
    }

    /// Whether `vaddr` was patched by a relocation during the last load
    pub fn is_relocation_at(&self, vaddr: VAddr) -> bool {
        self.session.as_ref().map(|s| s.relocs.contains_key(&vaddr)).unwrap_or(false)
    }

    /// Name of the symbol a relocation at `vaddr` referenced
    pub fn relocation_symbol(&self, vaddr: VAddr) -> Option<&str> {
        self.session.as_ref().and_then(|s| s.relocs.get(&vaddr)).map(|s| s.as_str())
    }

    pub fn dependencies(&self) -> &[String] {
        self.session.as_ref().map(|s| s.dependencies.as_slice()).unwrap_or(&[])
    }

    pub fn warnings(&self) -> &[LoadWarning] {
        self.session.as_ref().map(|s| s.warnings.as_slice()).unwrap_or(&[])
    }

    pub fn plt_range(&self) -> Option<Range<VAddr>> {
        self.session.as_ref().and_then(|s| s.plt.clone())
    }

    /// Addresses given to undefined symbols that relocations referenced
    pub fn extern_slots(&self) -> &[(String, VAddr)] {
        self.session.as_ref().map(|s| s.externs.as_slice()).unwrap_or(&[])
    }

    pub fn loaded_image(&self) -> Option<&LoadedImage> {
        self.session.as_ref().map(|s| &s.image)
    }

    pub fn native_to_host(&self, vaddr: VAddr) -> Option<usize> {
        self.session.as_ref().and_then(|s| s.image.native_to_host(vaddr))
    }
}
