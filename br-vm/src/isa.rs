//! Instruction set of the ByteRunner VM
//!
//! Everything the assembler, the loader and the machine agree on lives here: the
//! untyped [`Word`], the closed [`Opcode`] set and the fixed [`Instruction`] record.

use std::fmt;

/// The 64-bit unit of the stack, of instruction operands and of memory loads/stores.
///
/// A word carries no type. The same 8 bytes are read as an unsigned integer, a signed
/// integer, an IEEE double or a memory address depending solely on which opcode touches
/// them. Nothing checks that a word was produced with the interpretation an opcode
/// expects: `plusf` on two integers, or `read8` on a float, silently computes garbage.
/// Programs (and anyone writing them by hand) are responsible for keeping the
/// interpretations straight.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Word(u64);

impl Word {
    pub const ZERO: Word = Word(0);

    pub const fn from_u64(value: u64) -> Self {
        Word(value)
    }

    pub const fn from_i64(value: i64) -> Self {
        Word(value as u64)
    }

    pub fn from_f64(value: f64) -> Self {
        Word(value.to_bits())
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn as_i64(self) -> i64 {
        self.0 as i64
    }

    pub fn as_f64(self) -> f64 {
        f64::from_bits(self.0)
    }

    /// Address interpretation, an unsigned byte offset into VM memory.
    pub const fn as_addr(self) -> u64 {
        self.0
    }

    pub const fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    pub const fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Word(u64::from_le_bytes(bytes))
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Word({:#018X})", self.0)
    }
}

impl From<u64> for Word {
    fn from(value: u64) -> Self {
        Word(value)
    }
}

// --------------------------------------------
// Opcodes

macro_rules! opcodes {
    ($($variant:ident = $code:literal => $name:literal, $operand:literal;)*) => {
        /// Every instruction kind the VM understands.
        ///
        /// The discriminant is the on-disk encoding, so the order must never change.
        #[repr(u32)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($variant = $code,)*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];

            /// Canonical lowercase mnemonic.
            pub const fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name,)*
                }
            }

            /// Whether the instruction consumes its operand word.
            pub const fn has_operand(self) -> bool {
                match self {
                    $(Opcode::$variant => $operand,)*
                }
            }
        }

        impl TryFrom<u32> for Opcode {
            type Error = u32;

            fn try_from(code: u32) -> Result<Self, Self::Error> {
                match code {
                    $($code => Ok(Opcode::$variant),)*
                    _ => Err(code),
                }
            }
        }
    };
}

#[rustfmt::skip]
opcodes! {
    Nop     = 0  => "nop",     false;
    Dup     = 1  => "dup",     true;
    Swap    = 2  => "swap",    true;
    Push    = 3  => "push",    true;
    Pop     = 4  => "pop",     false;

    PlusI   = 5  => "plusi",   false;
    MinusI  = 6  => "minusi",  false;
    MultI   = 7  => "multi",   false;
    DivI    = 8  => "divi",    false;
    ModI    = 9  => "modi",    false;
    GeI     = 10 => "gei",     false;
    LeI     = 11 => "lei",     false;
    LI      = 12 => "li",      false;
    NeI     = 13 => "nei",     false;
    GI      = 14 => "gi",      false;
    EqI     = 15 => "eqi",     false;

    PlusF   = 16 => "plusf",   false;
    MinusF  = 17 => "minusf",  false;
    MultF   = 18 => "multf",   false;
    DivF    = 19 => "divf",    false;
    GeF     = 20 => "gef",     false;
    GF      = 21 => "gf",      false;
    LeF     = 22 => "lef",     false;
    LF      = 23 => "lf",      false;
    NeF     = 24 => "nef",     false;
    EqF     = 25 => "eqf",     false;

    AndB    = 26 => "andb",    false;
    OrB     = 27 => "orb",     false;
    Xor     = 28 => "xor",     false;
    Shr     = 29 => "shr",     false;
    Shl     = 30 => "shl",     false;
    NotB    = 31 => "notb",    false;

    Call    = 32 => "call",    true;
    Int     = 33 => "int",     true;
    Jmp     = 34 => "jmp",     true;
    JmpIf   = 35 => "jmp_if",  true;
    Ret     = 36 => "ret",     false;

    Read8   = 37 => "read8",   false;
    Read16  = 38 => "read16",  false;
    Read32  = 39 => "read32",  false;
    Read64  = 40 => "read64",  false;

    Write8  = 41 => "write8",  false;
    Write16 = 42 => "write16", false;
    Write32 = 43 => "write32", false;
    Write64 = 44 => "write64", false;

    I2F     = 45 => "i2f",     false;
    I2U     = 46 => "i2u",     false;
    U2F     = 47 => "u2f",     false;
    U2I     = 48 => "u2i",     false;
    F2I     = 49 => "f2i",     false;
    F2U     = 50 => "f2u",     false;

    Not     = 51 => "not",     false;
    Halt    = 52 => "halt",    false;
}

impl Opcode {
    /// Look an opcode up by its exact mnemonic. Matching is case sensitive.
    pub fn from_name(name: &str) -> Option<Opcode> {
        Opcode::ALL.iter().copied().find(|op| op.name() == name)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// --------------------------------------------
// Instructions

/// One program slot: an opcode number and its operand word.
///
/// The opcode is kept as the raw number read from an image, so a corrupt or foreign
/// program loads fine and only faults once the bad slot is actually executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub code: u32,
    pub operand: Word,
}

impl Instruction {
    pub const fn new(opcode: Opcode, operand: Word) -> Self {
        Self {
            code: opcode as u32,
            operand,
        }
    }

    pub const fn bare(opcode: Opcode) -> Self {
        Self::new(opcode, Word::ZERO)
    }

    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::try_from(self.code).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_numbers_are_dense_and_ordered() {
        for (i, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(*op as u32, i as u32);
            assert_eq!(Opcode::try_from(i as u32), Ok(*op));
        }
        assert_eq!(Opcode::try_from(Opcode::ALL.len() as u32), Err(53));
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(Opcode::from_name("plusi"), Some(Opcode::PlusI));
        assert_eq!(Opcode::from_name("jmp_if"), Some(Opcode::JmpIf));
        assert_eq!(Opcode::from_name("PUSH"), None);
        assert_eq!(Opcode::from_name("pushh"), None);
    }

    #[test]
    fn operand_carrying_opcodes() {
        let with_operand: Vec<_> = Opcode::ALL
            .iter()
            .filter(|op| op.has_operand())
            .map(|op| op.name())
            .collect();

        assert_eq!(
            with_operand,
            ["dup", "swap", "push", "call", "int", "jmp", "jmp_if"]
        );
    }

    #[test]
    fn word_interpretations_share_bits() {
        let w = Word::from_i64(-1);
        assert_eq!(w.as_u64(), u64::MAX);

        let f = Word::from_f64(1.5);
        assert_eq!(f.as_u64(), 1.5f64.to_bits());
        assert_eq!(f.as_f64(), 1.5);
        assert_eq!(Word::from_le_bytes(f.to_le_bytes()), f);
    }

    #[test]
    fn unknown_opcode_survives_in_instruction() {
        let inst = Instruction {
            code: 0xDEAD,
            operand: Word::ZERO,
        };
        assert_eq!(inst.opcode(), None);
        assert_eq!(Instruction::bare(Opcode::Halt).opcode(), Some(Opcode::Halt));
    }
}
