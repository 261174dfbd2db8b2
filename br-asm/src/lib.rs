//! Assembler for ByteRunner programs
//!
//! Translates line-oriented assembly, with `%define`, `%include` and `%entry` directives,
//! into a [`br_vm::Image`] the machine can load directly or from a file.

use std::path::Path;

use br_vm::Image;

pub mod arena;
pub mod assembler;
pub mod error;
pub mod lexer;
pub mod parser;

pub use assembler::{AsmLimits, Assembler};
pub use error::{AsmError, AsmErrorKind, Location};

/// Assemble the file at `path` with the default limits.
pub fn assemble(path: &Path) -> Result<Image, AsmError> {
    let mut assembler = Assembler::new();
    assembler.translate(path)?;
    assembler.image()
}
