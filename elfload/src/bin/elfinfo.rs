use std::{
    fs::File,
    path::Path,
    process::ExitCode,
};

use clap::Parser;
use elfload::{
    loader::{
        LoaderError,
        SymbolKind,
    },
    BinaryImage,
    ElfLoader,
    Logger,
    SymbolTable,
};
use memmap2::{
    Mmap,
    MmapOptions,
};

#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The ELF file to load
    file: String,

    #[arg(long, default_value_t = false)]
    symbols: bool,

    #[arg(long, default_value_t = false)]
    externs: bool,
}

fn mmap_file(path: &Path) -> std::io::Result<Mmap> {
    let file = File::open(path)?;
    let map = unsafe { MmapOptions::new().map(&file) }?;
    Ok(map)
}

fn kind_str(kind: SymbolKind) -> &'static str {
    match kind {
        SymbolKind::Function => "FUNC",
        SymbolKind::Object => "OBJECT",
        SymbolKind::ImportedFunction => "IMPORT",
        SymbolKind::ImportedObject => "IMPORT_OBJ",
        SymbolKind::Extern => "EXTERN",
        SymbolKind::Weak => "WEAK",
    }
}

fn run(args: &Args) -> Result<(), LoaderError> {
    let path = Path::new(&args.file);
    let file = mmap_file(path).map_err(|_| LoaderError::IOError(format!("Cannot read from {}", path.display())))?;

    if ElfLoader::can_load(&file[..]) == 0 {
        return Err(LoaderError::NotThisFormat(format!("{} is not a supported ELF32 file", path.display())));
    }

    let mut logger = Logger::spinner();
    logger.set_prefix(path.file_name().and_then(|x| x.to_str()).unwrap_or("?"));

    let mut loader = ElfLoader::with_logger(logger);
    let mut image = BinaryImage::new();
    let mut symbols = SymbolTable::new();
    loader.load_from_memory(&file[..], &mut image, &mut symbols)?;

    if let Some(machine) = loader.machine() {
        println!("Machine:      {}", machine);
    }
    if let Some(entry) = loader.entry_point() {
        println!("Entry point:  {:#010x}", entry);
    }
    if let Some(main) = loader.main_entry_point() {
        println!("main:         {:#010x}", main);
    }
    println!("Image base:   {:#010x}", loader.image_base().unwrap_or(0));
    println!("Image size:   {:#x}", loader.image_size());
    if let Some(plt) = loader.plt_range() {
        println!("PLT:          {:#010x}..{:#010x}", plt.start, plt.end);
    }

    println!();
    println!("Sections:");
    for section in image.iter_sections() {
        println!("  {:08x}  {:06x}  {}  {}", section.vaddr(), section.size(), section.perms(), section.name());
    }

    if args.symbols {
        println!();
        println!("Symbols:");
        for symbol in symbols.iter_symbols() {
            println!("  {:08x}  {:6}  {:10}  {}", symbol.vaddr(), symbol.size(), kind_str(symbol.kind()), symbol.name());
        }
        for symbol in symbols.externs() {
            println!("  {:8}  {:6}  {:10}  {}", "", symbol.size(), kind_str(symbol.kind()), symbol.name());
        }
    }

    if args.externs {
        println!();
        println!("Extern slots:");
        for (name, vaddr) in loader.extern_slots() {
            println!("  {:08x}  {}", vaddr, name);
        }
    }

    println!();
    println!("Dependencies:");
    for dep in loader.dependencies() {
        println!("  {}", dep);
    }

    if !loader.warnings().is_empty() {
        println!();
        println!("{} warnings", loader.warnings().len());
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            Logger::spinner().error(err.to_string());
            ExitCode::FAILURE
        },
    }
}
