//! Default native library
//!
//! The callbacks the `brun` front end registers, in this order:
//!
//! | index | native        | stack effect                          |
//! |-------|---------------|---------------------------------------|
//! | 0     | `alloc`       | `size -> ptr`                         |
//! | 1     | `free`        | `ptr ->`                              |
//! | 2     | `print_f64`   | `x ->`, prints one line               |
//! | 3     | `print_i64`   | `x ->`, prints one line               |
//! | 4     | `print_u64`   | `x ->`, prints one line               |
//! | 5     | `print_ptr`   | `x ->`, prints one line               |
//! | 6     | `dump_memory` | `addr count ->`, hex dump of the range |
//! | 7     | `write`       | `addr count ->`, raw bytes to stdout  |
//!
//! Pointers handed out by `alloc` are addresses inside VM memory, taken from the heap
//! region that starts after the program's static data.

use std::collections::BTreeMap;
use std::io::{self, Write};

use tracing::{trace, warn};

use crate::isa::Word;
use crate::runtime::machine::{Fault, Native, NativeTableFull, VM};

pub const ALLOC: u64 = 0;
pub const FREE: u64 = 1;
pub const PRINT_F64: u64 = 2;
pub const PRINT_I64: u64 = 3;
pub const PRINT_U64: u64 = 4;
pub const PRINT_PTR: u64 = 5;
pub const DUMP_MEMORY: u64 = 6;
pub const WRITE: u64 = 7;

const ALIGN: u64 = 8;

/// Register the default natives on `vm`, in index order.
pub fn install(vm: &mut VM) -> Result<(), NativeTableFull> {
    let natives: [Native; 8] = [
        alloc,
        free,
        print_f64,
        print_i64,
        print_u64,
        print_ptr,
        dump_memory,
        write,
    ];

    for native in natives {
        vm.push_native(native)?;
    }
    Ok(())
}

// --------------------------------------------
// Heap

/// First-fit allocator over a region of VM memory.
///
/// Only bookkeeping lives here; the bytes themselves stay in [`crate::runtime::machine::Memory`].
#[derive(Debug, Clone, Default)]
pub struct Heap {
    free: BTreeMap<u64, u64>, // start -> length
    used: BTreeMap<u64, u64>,
}

impl Heap {
    /// Manage `[base, end)`. An empty or inverted range gives a heap that never allocates.
    pub fn new(base: u64, end: u64) -> Self {
        let mut free = BTreeMap::new();
        if end > base {
            free.insert(base, end - base);
        }
        Self {
            free,
            used: BTreeMap::new(),
        }
    }

    /// Bytes still available, ignoring fragmentation.
    pub fn available(&self) -> u64 {
        self.free.values().sum()
    }

    pub fn allocations(&self) -> usize {
        self.used.len()
    }

    pub fn alloc(&mut self, size: u64) -> Option<u64> {
        let size = size.max(1).checked_next_multiple_of(ALIGN)?;

        let (&start, &len) = self.free.iter().find(|&(_, &len)| len >= size)?;
        self.free.remove(&start);
        if len > size {
            self.free.insert(start + size, len - size);
        }
        self.used.insert(start, size);

        Some(start)
    }

    /// Give a block back. Returns false if `ptr` is not a live allocation.
    pub fn release(&mut self, ptr: u64) -> bool {
        let Some(mut len) = self.used.remove(&ptr) else {
            return false;
        };
        let mut start = ptr;

        // Merge with the following block
        if let Some(next_len) = self.free.remove(&(start + len)) {
            len += next_len;
        }

        // Merge with the preceding block
        if let Some((&prev, &prev_len)) = self.free.range(..start).next_back() {
            if prev + prev_len == start {
                self.free.remove(&prev);
                start = prev;
                len += prev_len;
            }
        }

        self.free.insert(start, len);
        true
    }
}

// --------------------------------------------
// Natives

fn alloc(vm: &mut VM) -> Result<(), Fault> {
    let size = vm.stack.peek(0)?.as_u64();
    let ptr = vm.heap.alloc(size).ok_or(Fault::IllegalMemoryAccess)?;
    trace!(size, ptr, "alloc");

    *vm.stack.peek_mut(0)? = Word::from_u64(ptr);
    Ok(())
}

fn free(vm: &mut VM) -> Result<(), Fault> {
    let ptr = vm.stack.peek(0)?.as_addr();
    if !vm.heap.release(ptr) {
        return Err(Fault::IllegalOperand);
    }
    trace!(ptr, "free");

    vm.stack.pop()?;
    Ok(())
}

pub fn format_f64(word: Word) -> String {
    format!("{:.6}", word.as_f64())
}

pub fn format_i64(word: Word) -> String {
    word.as_i64().to_string()
}

pub fn format_u64(word: Word) -> String {
    word.as_u64().to_string()
}

pub fn format_ptr(word: Word) -> String {
    format!("{:#x}", word.as_addr())
}

/// Hex bytes, each followed by a space.
pub fn format_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X} ", b)).collect()
}

fn print_with(vm: &mut VM, render: fn(Word) -> String) -> Result<(), Fault> {
    let word = vm.stack.pop()?;
    println!("{}", render(word));
    Ok(())
}

fn print_f64(vm: &mut VM) -> Result<(), Fault> {
    print_with(vm, format_f64)
}

fn print_i64(vm: &mut VM) -> Result<(), Fault> {
    print_with(vm, format_i64)
}

fn print_u64(vm: &mut VM) -> Result<(), Fault> {
    print_with(vm, format_u64)
}

fn print_ptr(vm: &mut VM) -> Result<(), Fault> {
    print_with(vm, format_ptr)
}

// Pops `addr count` only after the whole range is known to be in bounds.
fn memory_range(vm: &mut VM) -> Result<&[u8], Fault> {
    vm.stack.require(2)?;
    let count = vm.stack.peek(0)?.as_u64();
    let addr = vm.stack.peek(1)?.as_addr();
    vm.memory.range(addr, count)?;

    vm.stack.pop()?;
    vm.stack.pop()?;
    vm.memory.slice(addr, count)
}

fn dump_memory(vm: &mut VM) -> Result<(), Fault> {
    let bytes = memory_range(vm)?;
    println!("{}", format_bytes(bytes));
    Ok(())
}

fn write(vm: &mut VM) -> Result<(), Fault> {
    let bytes = memory_range(vm)?;

    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout.write_all(bytes).and_then(|_| stdout.flush()) {
        warn!(%err, "native write to stdout failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Limits;
    use crate::image::Image;
    use crate::isa::{Instruction, Opcode};

    fn machine(program: Vec<Instruction>, static_bytes: u64) -> VM {
        let image = Image {
            entry: 0,
            program,
            memory: vec![0; static_bytes as usize],
            memory_capacity: static_bytes,
        };
        let mut vm = VM::from_image(&image, &Limits::default()).unwrap();
        install(&mut vm).unwrap();
        vm
    }

    #[test]
    fn heap_is_first_fit_and_coalesces() {
        let mut heap = Heap::new(64, 128);

        let a = heap.alloc(10).unwrap();
        let b = heap.alloc(8).unwrap();
        let c = heap.alloc(8).unwrap();
        assert_eq!((a, b, c), (64, 80, 88));
        assert_eq!(heap.available(), 128 - 96);

        assert!(heap.release(b));
        assert!(!heap.release(b));
        assert_eq!(heap.alloc(8), Some(80));

        assert!(heap.release(a));
        assert!(heap.release(80));
        assert!(heap.release(c));
        assert_eq!(heap.allocations(), 0);
        assert_eq!(heap.alloc(64), Some(64));
        assert_eq!(heap.alloc(1), None);
    }

    #[test]
    fn empty_heap_never_allocates() {
        let mut heap = Heap::new(100, 100);
        assert_eq!(heap.alloc(1), None);
    }

    #[test]
    fn alloc_and_free_through_int() {
        let mut vm = machine(
            vec![
                Instruction::new(Opcode::Push, Word::from_u64(24)),
                Instruction::new(Opcode::Int, Word::from_u64(ALLOC)),
                Instruction::new(Opcode::Dup, Word::from_u64(0)),
                Instruction::new(Opcode::Int, Word::from_u64(FREE)),
                Instruction::bare(Opcode::Halt),
            ],
            13,
        );

        vm.run(None).unwrap();

        // heap starts at the static data capacity rounded up to 8
        assert_eq!(vm.stack.as_slice(), &[Word::from_u64(16)]);
        assert_eq!(vm.heap.available(), Limits::default().memory_capacity as u64 - 16);
        assert_eq!(vm.heap.allocations(), 0);
    }

    #[test]
    fn freeing_a_stray_pointer_is_an_illegal_operand() {
        let mut vm = machine(
            vec![
                Instruction::new(Opcode::Push, Word::from_u64(3)),
                Instruction::new(Opcode::Int, Word::from_u64(FREE)),
            ],
            0,
        );
        assert_eq!(vm.run(None), Err(Fault::IllegalOperand));
        assert_eq!(vm.stack.len(), 1);
    }

    #[test]
    fn range_natives_check_bounds_before_popping() {
        let cap = Limits::default().memory_capacity as u64;
        let mut vm = machine(
            vec![
                Instruction::new(Opcode::Push, Word::from_u64(cap - 2)),
                Instruction::new(Opcode::Push, Word::from_u64(4)),
                Instruction::new(Opcode::Int, Word::from_u64(WRITE)),
            ],
            0,
        );
        assert_eq!(vm.run(None), Err(Fault::IllegalMemoryAccess));
        assert_eq!(vm.stack.len(), 2);
    }

    #[test]
    fn print_natives_pop_their_argument() {
        let mut vm = machine(
            vec![
                Instruction::new(Opcode::Push, Word::from_i64(-5)),
                Instruction::new(Opcode::Int, Word::from_u64(PRINT_I64)),
                Instruction::bare(Opcode::Halt),
            ],
            0,
        );
        vm.run(None).unwrap();
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn formatting() {
        assert_eq!(format_f64(Word::from_f64(1.5)), "1.500000");
        assert_eq!(format_i64(Word::from_i64(-5)), "-5");
        assert_eq!(format_u64(Word::from_i64(-1)), "18446744073709551615");
        assert_eq!(format_ptr(Word::from_u64(255)), "0xff");
        assert_eq!(format_bytes(&[0x0A, 0xFF]), "0A FF ");
    }
}
