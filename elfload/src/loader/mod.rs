//! The loader turns the raw bytes of an ELF32 image into sections, symbols, a relocated
//! memory image and a list of dependencies

mod dependency;
mod elf;
mod endian;
mod error;
mod header;
mod image;
mod perms;
mod plt;
mod reloc;
mod section;
mod symbol;
mod tables;

pub use elf::{
    ElfLoader,
    LoadFormat,
};
pub use endian::Endian;
pub use error::{
    LoadWarning,
    LoaderError,
};
pub use header::{
    can_load,
    ElfHeader,
    Machine,
    CONFIDENCE_ELF32,
};
pub use image::{
    LoadedImage,
    Region,
    VAddr,
    MAX_IMAGE_SIZE,
    REL_LOAD_BASE,
};
pub use perms::Perms;
pub use plt::{
    find_rel_plt_slot,
    mark_imports,
    seed_from_symbols,
    PltLayout,
};
pub use reloc::{
    reloc_kind,
    RelocKind,
    RelocMap,
    EXTERN_SLOT_SIZE,
};
pub use section::{
    BinaryImage,
    Section,
};
pub use symbol::{
    Binding,
    Symbol,
    SymbolKind,
    SymbolTable,
};
