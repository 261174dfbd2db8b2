//! Core of the ByteRunner VM
//! Our VM is a stack machine which executes one fixed-size instruction per step

use std::io::{self, Write};
use std::ops::Range;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, trace};

use crate::Limits;
use crate::image::{Image, ImageError};
use crate::isa::{Instruction, Opcode, Word};
use crate::runtime::disasm;
use crate::runtime::natives::Heap;

/// Host callback invoked by `int <index>`.
///
/// A native gets the whole machine and must leave it untouched when it faults.
pub type Native = fn(&mut VM) -> Result<(), Fault>;

/// Why a single step could not execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("illegal instruction")]
    IllegalInstruction,
    #[error("division by zero")]
    DivisionByZero,
    #[error("illegal instruction access")]
    IllegalInstructionAccess,
    #[error("illegal operand")]
    IllegalOperand,
    #[error("illegal memory access")]
    IllegalMemoryAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("native table is full ({capacity} entries)")]
pub struct NativeTableFull {
    pub capacity: usize,
}

// --------------------------------------------
// Operand stack

/// Capacity-checked operand stack. Depth 0 is the top.
#[derive(Debug, Clone)]
pub struct Stack {
    words: Vec<Word>,
    capacity: usize,
}

impl Stack {
    pub fn new(capacity: usize) -> Self {
        Self {
            words: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.words.len() >= self.capacity
    }

    /// Bottom to top.
    pub fn as_slice(&self) -> &[Word] {
        &self.words
    }

    pub fn push(&mut self, word: Word) -> Result<(), Fault> {
        if self.is_full() {
            return Err(Fault::StackOverflow);
        }
        self.words.push(word);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Word, Fault> {
        self.words.pop().ok_or(Fault::StackUnderflow)
    }

    /// Fail unless at least `n` words are on the stack.
    pub fn require(&self, n: usize) -> Result<(), Fault> {
        if self.words.len() < n {
            return Err(Fault::StackUnderflow);
        }
        Ok(())
    }

    fn index(&self, depth: u64) -> Result<usize, Fault> {
        let len = self.words.len() as u64;
        if depth >= len {
            return Err(Fault::StackUnderflow);
        }
        Ok((len - 1 - depth) as usize)
    }

    pub fn peek(&self, depth: u64) -> Result<Word, Fault> {
        let i = self.index(depth)?;
        Ok(self.words[i])
    }

    pub fn peek_mut(&mut self, depth: u64) -> Result<&mut Word, Fault> {
        let i = self.index(depth)?;
        Ok(&mut self.words[i])
    }

    /// Exchange the top word with the one `depth` slots below it.
    pub fn swap(&mut self, depth: u64) -> Result<(), Fault> {
        let below = self.index(depth)?;
        let top = self.index(0)?;
        self.words.swap(top, below);
        Ok(())
    }
}

// --------------------------------------------
// Memory

/// Fixed-size, byte-addressable memory. All multi-byte accesses are little-endian.
#[derive(Debug, Clone)]
pub struct Memory {
    bytes: Box<[u8]>,
}

impl Memory {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Byte range covered by an access of `len` bytes at `addr`, or a fault if any
    /// part of it falls outside memory.
    pub fn range(&self, addr: u64, len: u64) -> Result<Range<usize>, Fault> {
        let end = addr.checked_add(len).ok_or(Fault::IllegalMemoryAccess)?;
        if end > self.bytes.len() as u64 {
            return Err(Fault::IllegalMemoryAccess);
        }
        Ok(addr as usize..end as usize)
    }

    pub fn slice(&self, addr: u64, len: u64) -> Result<&[u8], Fault> {
        let range = self.range(addr, len)?;
        Ok(&self.bytes[range])
    }

    /// Zero-extended load of `width` (1, 2, 4 or 8) bytes.
    pub fn read(&self, addr: u64, width: u64) -> Result<u64, Fault> {
        let range = self.range(addr, width)?;
        let mut word = [0u8; 8];
        word[..range.len()].copy_from_slice(&self.bytes[range]);
        Ok(u64::from_le_bytes(word))
    }

    /// Store the low `width` bytes of `value`.
    pub fn write(&mut self, addr: u64, width: u64, value: u64) -> Result<(), Fault> {
        let range = self.range(addr, width)?;
        let len = range.len();
        self.bytes[range].copy_from_slice(&value.to_le_bytes()[..len]);
        Ok(())
    }
}

// --------------------------------------------
// Machine

#[derive(Debug, Clone)]
pub struct VM {
    pub ip: u64, // instruction pointer
    pub halted: bool,
    /// Instructions executed successfully so far.
    pub steps: u64,

    pub program: Vec<Instruction>,
    pub stack: Stack,
    pub memory: Memory,
    pub heap: Heap,

    natives: Vec<Native>,
    native_capacity: usize,
}

impl VM {
    pub fn new(limits: &Limits) -> Self {
        Self {
            ip: 0,
            halted: false,
            steps: 0,

            program: Vec::new(),
            stack: Stack::new(limits.stack_capacity),
            memory: Memory::new(limits.memory_capacity),
            heap: Heap::new(0, limits.memory_capacity as u64),

            natives: Vec::new(),
            native_capacity: limits.native_capacity,
        }
    }

    /// Build a machine ready to run `image`.
    ///
    /// The image header is validated against `limits` exactly like a freshly decoded
    /// file, so images coming straight from the assembler get the same guarantees.
    /// The native heap starts right after the image's declared memory capacity.
    pub fn from_image(image: &Image, limits: &Limits) -> Result<Self, ImageError> {
        image.header().validate(limits)?;

        let mut vm = VM::new(limits);
        vm.ip = image.entry;
        vm.program = image.program.clone();
        vm.memory.bytes[..image.memory.len()].copy_from_slice(&image.memory);

        let heap_base = image.memory_capacity.next_multiple_of(8);
        vm.heap = Heap::new(heap_base, limits.memory_capacity as u64);

        debug!(
            entry = image.entry,
            instructions = image.program.len(),
            memory = image.memory.len(),
            heap_base,
            "machine loaded"
        );
        Ok(vm)
    }

    pub fn load_file(path: &Path, limits: &Limits) -> Result<Self, ImageError> {
        let image = Image::load(path, limits)?;
        Self::from_image(&image, limits)
    }

    /// Register the next native; the first one registered answers `int 0`.
    pub fn push_native(&mut self, native: Native) -> Result<usize, NativeTableFull> {
        if self.natives.len() >= self.native_capacity {
            return Err(NativeTableFull {
                capacity: self.native_capacity,
            });
        }
        self.natives.push(native);
        Ok(self.natives.len() - 1)
    }

    pub fn natives_len(&self) -> usize {
        self.natives.len()
    }

    fn fetch_decode(&self) -> Result<(Opcode, Word), Fault> {
        let inst = usize::try_from(self.ip)
            .ok()
            .and_then(|ip| self.program.get(ip))
            .ok_or(Fault::IllegalInstructionAccess)?;

        let opcode = inst.opcode().ok_or(Fault::IllegalInstruction)?;
        Ok((opcode, inst.operand))
    }

    // Helpers for the opcode families. All of them check the stack before touching it,
    // so a faulting instruction leaves the machine as it found it.
    // --------------------------------------

    fn advance(&mut self) -> Result<(), Fault> {
        self.ip += 1;
        Ok(())
    }

    fn binary_op(&mut self, f: impl FnOnce(Word, Word) -> Word) -> Result<(), Fault> {
        self.stack.require(2)?;
        let rhs = self.stack.pop()?;
        let lhs = self.stack.peek_mut(0)?;
        *lhs = f(*lhs, rhs);
        self.advance()
    }

    fn unary_op(&mut self, f: impl FnOnce(Word) -> Word) -> Result<(), Fault> {
        let top = self.stack.peek_mut(0)?;
        *top = f(*top);
        self.advance()
    }

    fn int_op(&mut self, f: fn(u64, u64) -> u64) -> Result<(), Fault> {
        self.binary_op(|a, b| Word::from_u64(f(a.as_u64(), b.as_u64())))
    }

    fn int_cmp(&mut self, f: fn(&u64, &u64) -> bool) -> Result<(), Fault> {
        self.binary_op(|a, b| Word::from_u64(f(&a.as_u64(), &b.as_u64()) as u64))
    }

    fn float_op(&mut self, f: fn(f64, f64) -> f64) -> Result<(), Fault> {
        self.binary_op(|a, b| Word::from_f64(f(a.as_f64(), b.as_f64())))
    }

    fn float_cmp(&mut self, f: fn(&f64, &f64) -> bool) -> Result<(), Fault> {
        self.binary_op(|a, b| Word::from_u64(f(&a.as_f64(), &b.as_f64()) as u64))
    }

    fn checked_int_op(&mut self, f: fn(u64, u64) -> u64) -> Result<(), Fault> {
        self.stack.require(2)?;
        if self.stack.peek(0)?.as_u64() == 0 {
            return Err(Fault::DivisionByZero);
        }
        self.int_op(f)
    }

    fn read(&mut self, width: u64) -> Result<(), Fault> {
        let addr = self.stack.peek(0)?.as_addr();
        let value = self.memory.read(addr, width)?;
        *self.stack.peek_mut(0)? = Word::from_u64(value);
        self.advance()
    }

    fn write(&mut self, width: u64) -> Result<(), Fault> {
        self.stack.require(2)?;
        let value = self.stack.peek(0)?.as_u64();
        let addr = self.stack.peek(1)?.as_addr();
        self.memory.write(addr, width, value)?;
        self.stack.pop()?;
        self.stack.pop()?;
        self.advance()
    }

    fn call_native(&mut self, index: u64) -> Result<(), Fault> {
        let native = usize::try_from(index)
            .ok()
            .and_then(|i| self.natives.get(i).copied())
            .ok_or(Fault::IllegalOperand)?;

        native(self)?;
        self.advance()
    }

    // --------------------------------------

    fn execute(&mut self, opcode: Opcode, operand: Word) -> Result<(), Fault> {
        match opcode {
            Opcode::Nop => self.advance(),

            // Stack shape
            Opcode::Push => {
                self.stack.push(operand)?;
                self.advance()
            }
            Opcode::Pop => {
                self.stack.pop()?;
                self.advance()
            }
            Opcode::Dup => {
                if self.stack.is_full() {
                    return Err(Fault::StackOverflow);
                }
                let word = self.stack.peek(operand.as_u64())?;
                self.stack.push(word)?;
                self.advance()
            }
            Opcode::Swap => {
                self.stack.swap(operand.as_u64())?;
                self.advance()
            }

            // Integer arithmetic and comparison
            Opcode::PlusI => self.int_op(u64::wrapping_add),
            Opcode::MinusI => self.int_op(u64::wrapping_sub),
            Opcode::MultI => self.int_op(u64::wrapping_mul),
            Opcode::DivI => self.checked_int_op(|a, b| a / b),
            Opcode::ModI => self.checked_int_op(|a, b| a % b),
            Opcode::GeI => self.int_cmp(u64::ge),
            Opcode::LeI => self.int_cmp(u64::le),
            Opcode::LI => self.int_cmp(u64::lt),
            Opcode::NeI => self.int_cmp(u64::ne),
            Opcode::GI => self.int_cmp(u64::gt),
            Opcode::EqI => self.int_cmp(u64::eq),

            // Floating point
            Opcode::PlusF => self.float_op(|a, b| a + b),
            Opcode::MinusF => self.float_op(|a, b| a - b),
            Opcode::MultF => self.float_op(|a, b| a * b),
            Opcode::DivF => self.float_op(|a, b| a / b),
            Opcode::GeF => self.float_cmp(f64::ge),
            Opcode::GF => self.float_cmp(f64::gt),
            Opcode::LeF => self.float_cmp(f64::le),
            Opcode::LF => self.float_cmp(f64::lt),
            Opcode::NeF => self.float_cmp(f64::ne),
            Opcode::EqF => self.float_cmp(f64::eq),

            // Bitwise
            Opcode::AndB => self.int_op(|a, b| a & b),
            Opcode::OrB => self.int_op(|a, b| a | b),
            Opcode::Xor => self.int_op(|a, b| a ^ b),
            Opcode::Shr => self.int_op(|a, b| if b >= 64 { 0 } else { a >> b }),
            Opcode::Shl => self.int_op(|a, b| if b >= 64 { 0 } else { a << b }),
            Opcode::NotB => self.unary_op(|w| Word::from_u64(!w.as_u64())),
            Opcode::Not => self.unary_op(|w| Word::from_u64((w.as_u64() == 0) as u64)),

            // Control flow
            Opcode::Call => {
                self.stack.push(Word::from_u64(self.ip))?;
                self.ip = operand.as_u64();
                Ok(())
            }
            Opcode::Int => self.call_native(operand.as_u64()),
            Opcode::Jmp => {
                self.ip = operand.as_u64();
                Ok(())
            }
            Opcode::JmpIf => {
                if self.stack.pop()?.as_u64() != 0 {
                    self.ip = operand.as_u64();
                    Ok(())
                } else {
                    self.advance()
                }
            }
            Opcode::Ret => {
                let ret = self.stack.peek(0)?.as_u64();
                let resume = ret.checked_add(1).ok_or(Fault::IllegalInstructionAccess)?;
                self.stack.pop()?;
                self.ip = resume;
                Ok(())
            }
            Opcode::Halt => {
                self.halted = true;
                Ok(())
            }

            // Memory
            Opcode::Read8 => self.read(1),
            Opcode::Read16 => self.read(2),
            Opcode::Read32 => self.read(4),
            Opcode::Read64 => self.read(8),
            Opcode::Write8 => self.write(1),
            Opcode::Write16 => self.write(2),
            Opcode::Write32 => self.write(4),
            Opcode::Write64 => self.write(8),

            // Conversions. u2i truncates to i32 before widening back to 64 bits
            Opcode::I2F => self.unary_op(|w| Word::from_f64(w.as_i64() as f64)),
            Opcode::I2U => self.unary_op(|w| Word::from_u64(w.as_i64() as u64)),
            Opcode::U2F => self.unary_op(|w| Word::from_f64(w.as_u64() as f64)),
            Opcode::U2I => self.unary_op(|w| Word::from_i64(w.as_u64() as i32 as i64)),
            Opcode::F2I => self.unary_op(|w| Word::from_i64(w.as_f64() as i64)),
            Opcode::F2U => self.unary_op(|w| Word::from_u64(w.as_f64() as i64 as u64)),
        }
    }

    /// Execute exactly one instruction. Does nothing once the machine has halted.
    pub fn step(&mut self) -> Result<(), Fault> {
        if self.halted {
            return Ok(());
        }

        let (opcode, operand) = self.fetch_decode()?;
        trace!(
            ip = self.ip,
            %opcode,
            operand = operand.as_u64(),
            depth = self.stack.len(),
            "step"
        );

        self.execute(opcode, operand)?;
        self.steps += 1;
        Ok(())
    }

    /// Step until the machine halts, faults, or `limit` steps have run.
    ///
    /// `None` means no limit.
    pub fn run(&mut self, limit: Option<u64>) -> Result<(), Fault> {
        let mut remaining = limit;
        while remaining != Some(0) && !self.halted {
            self.step()?;

            if let Some(n) = remaining.as_mut() {
                *n -= 1;
            }
        }
        Ok(())
    }

    pub fn dump_ctx(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(
            out,
            "------------------------------------------------------------"
        )?;
        writeln!(
            out,
            "ip: {:08X}\tsp: {}\thalted: {}",
            self.ip,
            self.stack.len(),
            self.halted
        )?;
        writeln!(
            out,
            "------------------------------------------------------------"
        )?;
        disasm::dump_stack(self, out)
    }
}
