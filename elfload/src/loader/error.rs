use thiserror::Error;

use crate::loader::image::VAddr;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LoaderError {
    #[error("Not a 32-bit ELF image: {0}")]
    NotThisFormat(String),

    #[error("Corrupt ELF image: {0}")]
    CorruptFormat(String),

    #[error("Unsupported machine type {0:#x}")]
    UnsupportedMachine(u16),

    #[error("IO error: {0}")]
    IOError(String),
}

impl LoaderError {
    /// Whether another loader should get a chance with the same buffer
    pub fn is_not_this_format(&self) -> bool {
        matches!(self, LoaderError::NotThisFormat(_))
    }
}

/// Per-record anomalies that were skipped without aborting the load
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadWarning {
    #[error("Relocation type {typ} at {vaddr:#x} is not handled for {machine}")]
    UnresolvedRelocationType {
        machine: &'static str,
        typ: u32,
        vaddr: VAddr,
    },

    #[error("Relocation target {0:#x} is not inside the loaded image")]
    RelocationOutOfImage(VAddr),

    #[error("Symbol index {index} is out of range for section {section}")]
    BadSymbolIndex {
        section: usize,
        index: u32,
    },

    #[error("Name offset {offset:#x} is out of range for string table {section}")]
    BadStringOffset {
        section: usize,
        offset: u32,
    },

    #[error("Dynamic entry references a string at {0:#x} that cannot be read")]
    DanglingDynamicString(u32),
}
