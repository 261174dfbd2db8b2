//! ByteRunner virtual machine
//!
//! A small stack machine over untyped 64-bit words. Programs are loaded from the
//! versioned binary [`image`] format (or straight from the assembler) and executed one
//! instruction at a time by [`runtime::machine::VM`].

pub mod image;
pub mod isa;
pub mod runtime;

pub use image::{Image, ImageError};
pub use isa::{Instruction, Opcode, Word};
pub use runtime::machine::{Fault, Native, NativeTableFull, VM};

use tracing_subscriber::{EnvFilter, fmt};

pub const STACK_CAPACITY: usize = 1024;
pub const PROGRAM_CAPACITY: usize = 1024;
pub const NATIVE_CAPACITY: usize = 1024;
pub const MEMORY_CAPACITY: usize = 640 * 1000;

/// Capacities shared by the assembler and the machine.
///
/// An image is only loadable by a machine whose limits are at least as large as the
/// ones the image was built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Operand stack size, in words.
    pub stack_capacity: usize,
    /// Program size, in instructions.
    pub program_capacity: usize,
    /// Addressable memory, in bytes.
    pub memory_capacity: usize,
    /// Number of native callbacks that can be registered.
    pub native_capacity: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            stack_capacity: STACK_CAPACITY,
            program_capacity: PROGRAM_CAPACITY,
            memory_capacity: MEMORY_CAPACITY,
            native_capacity: NATIVE_CAPACITY,
        }
    }
}

/// Install the stderr logger shared by the command line tools.
///
/// `RUST_LOG` overrides the default `warn` filter.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
