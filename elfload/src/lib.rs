//! A loader for 32-bit ELF objects that produces a fully linked virtual address space
//! for a decompiler front end.
//!
//! The loader validates a raw byte buffer, extracts sections, segments, symbols and
//! dependencies, applies relocations into a materialized image and classifies
//! import stubs. Start with [`ElfLoader`].

mod logger;

/* Public interface: */
pub mod loader;

pub use loader::{
    BinaryImage,
    ElfLoader,
    LoaderError,
    Section,
    Symbol,
    SymbolTable,
};
pub use logger::Logger;
