//! Binary image format
//!
//! Layout, all integers little-endian and without padding between header fields:
//!
//! ```text
//! magic           u16   0x5242
//! version         u16   1
//! entry           u64   address of the first instruction to execute
//! program_size    u64   number of instruction records that follow
//! memory_size     u64   number of initial memory bytes that follow the program
//! memory_capacity u64   memory the program expects, >= memory_size
//! program         program_size * 16 bytes: opcode u32, 4 zero bytes, operand u64
//! memory          memory_size bytes
//! ```

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::Limits;
use crate::isa::{Instruction, Word};

pub const MAGIC: u16 = 0x5242;
pub const VERSION: u16 = 1;

pub const HEADER_SIZE: usize = 36;
pub const INSTRUCTION_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Program,
    Memory,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Section::Program => f.write_str("program"),
            Section::Memory => f.write_str("memory"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("image header is truncated: read {0} of {size} bytes", size = HEADER_SIZE)]
    TruncatedHeader(usize),

    #[error("not a ByteRunner image: unexpected magic {found:04X}, expected {expected:04X}", expected = MAGIC)]
    BadMagic { found: u16 },

    #[error("unsupported version {found}, expected version {expected}", expected = VERSION)]
    UnsupportedVersion { found: u16 },

    #[error(
        "program section is too large: the image contains {size} instructions but the capacity is {capacity}"
    )]
    ProgramTooLarge { size: u64, capacity: u64 },

    #[error(
        "memory section is too large: the image wants {requested} bytes but the capacity is {capacity} bytes"
    )]
    MemoryCapacityTooLarge { requested: u64, capacity: u64 },

    #[error("memory size {size} is greater than the declared memory capacity {capacity}")]
    MemorySizeExceedsCapacity { size: u64, capacity: u64 },

    #[error("{section} section is truncated: read {actual} of {expected} declared entries")]
    Truncated {
        section: Section,
        expected: u64,
        actual: u64,
    },
}

// --------------------------------------------
// Header

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u16,
    pub version: u16,
    pub entry: u64,
    pub program_size: u64,
    pub memory_size: u64,
    pub memory_capacity: u64,
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..2].copy_from_slice(&self.magic.to_le_bytes());
        out[2..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..12].copy_from_slice(&self.entry.to_le_bytes());
        out[12..20].copy_from_slice(&self.program_size.to_le_bytes());
        out[20..28].copy_from_slice(&self.memory_size.to_le_bytes());
        out[28..36].copy_from_slice(&self.memory_capacity.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let u64_at = |at: usize| {
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(word)
        };

        Self {
            magic: u16_at(0),
            version: u16_at(2),
            entry: u64_at(4),
            program_size: u64_at(12),
            memory_size: u64_at(20),
            memory_capacity: u64_at(28),
        }
    }

    /// Check the header against the machine limits.
    ///
    /// The checks run in a fixed order and the first failing one is reported.
    pub fn validate(&self, limits: &Limits) -> Result<(), ImageError> {
        if self.magic != MAGIC {
            return Err(ImageError::BadMagic { found: self.magic });
        }

        if self.version != VERSION {
            return Err(ImageError::UnsupportedVersion {
                found: self.version,
            });
        }

        if self.program_size > limits.program_capacity as u64 {
            return Err(ImageError::ProgramTooLarge {
                size: self.program_size,
                capacity: limits.program_capacity as u64,
            });
        }

        if self.memory_capacity > limits.memory_capacity as u64 {
            return Err(ImageError::MemoryCapacityTooLarge {
                requested: self.memory_capacity,
                capacity: limits.memory_capacity as u64,
            });
        }

        if self.memory_size > self.memory_capacity {
            return Err(ImageError::MemorySizeExceedsCapacity {
                size: self.memory_size,
                capacity: self.memory_capacity,
            });
        }

        Ok(())
    }
}

fn encode_instruction(inst: &Instruction) -> [u8; INSTRUCTION_SIZE] {
    let mut out = [0u8; INSTRUCTION_SIZE];
    out[0..4].copy_from_slice(&inst.code.to_le_bytes());
    out[8..16].copy_from_slice(&inst.operand.to_le_bytes());
    out
}

fn decode_instruction(bytes: &[u8]) -> Instruction {
    let mut code = [0u8; 4];
    code.copy_from_slice(&bytes[0..4]);
    let mut operand = [0u8; 8];
    operand.copy_from_slice(&bytes[8..16]);

    Instruction {
        code: u32::from_le_bytes(code),
        operand: Word::from_le_bytes(operand),
    }
}

// Like `read_exact`, but reports how far it got instead of failing on a short read.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// --------------------------------------------
// Image

/// A complete program: instructions, initial memory and where to start.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Image {
    pub entry: u64,
    pub program: Vec<Instruction>,
    pub memory: Vec<u8>,
    pub memory_capacity: u64,
}

impl Image {
    pub fn header(&self) -> Header {
        Header {
            magic: MAGIC,
            version: VERSION,
            entry: self.entry,
            program_size: self.program.len() as u64,
            memory_size: self.memory.len() as u64,
            memory_capacity: self.memory_capacity,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            HEADER_SIZE + self.program.len() * INSTRUCTION_SIZE + self.memory.len(),
        );
        out.extend_from_slice(&self.header().encode());
        for inst in &self.program {
            out.extend_from_slice(&encode_instruction(inst));
        }
        out.extend_from_slice(&self.memory);
        out
    }

    /// Serialize into `writer`, returning the number of bytes written.
    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<usize> {
        let bytes = self.encode();
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(bytes.len())
    }

    pub fn save(&self, path: &Path) -> Result<usize, ImageError> {
        let file = File::create(path)?;
        let written = self.write_to(BufWriter::new(file))?;
        debug!(path = %path.display(), written, "image saved");
        Ok(written)
    }

    /// Read and validate an image.
    ///
    /// The header is validated before any section is read, so a hostile header
    /// never causes an allocation beyond `limits`.
    pub fn read_from<R: Read>(mut reader: R, limits: &Limits) -> Result<Image, ImageError> {
        let mut header = [0u8; HEADER_SIZE];
        let n = read_up_to(&mut reader, &mut header)?;
        if n < HEADER_SIZE {
            return Err(ImageError::TruncatedHeader(n));
        }

        let header = Header::decode(&header);
        header.validate(limits)?;

        let mut program_bytes = vec![0u8; header.program_size as usize * INSTRUCTION_SIZE];
        let n = read_up_to(&mut reader, &mut program_bytes)?;
        if n < program_bytes.len() {
            return Err(ImageError::Truncated {
                section: Section::Program,
                expected: header.program_size,
                actual: (n / INSTRUCTION_SIZE) as u64,
            });
        }

        let program = program_bytes
            .chunks_exact(INSTRUCTION_SIZE)
            .map(decode_instruction)
            .collect();

        let mut memory = vec![0u8; header.memory_size as usize];
        let n = read_up_to(&mut reader, &mut memory)?;
        if n < memory.len() {
            return Err(ImageError::Truncated {
                section: Section::Memory,
                expected: header.memory_size,
                actual: n as u64,
            });
        }

        Ok(Image {
            entry: header.entry,
            program,
            memory,
            memory_capacity: header.memory_capacity,
        })
    }

    pub fn decode(bytes: &[u8], limits: &Limits) -> Result<Image, ImageError> {
        Self::read_from(bytes, limits)
    }

    pub fn load(path: &Path, limits: &Limits) -> Result<Image, ImageError> {
        let file = File::open(path)?;
        let image = Self::read_from(BufReader::new(file), limits)?;
        debug!(
            path = %path.display(),
            instructions = image.program.len(),
            memory = image.memory.len(),
            "image loaded"
        );
        Ok(image)
    }
}
