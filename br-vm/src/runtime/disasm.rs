use std::io::{self, Write};

use crate::isa::{Instruction, Word};
use crate::runtime::machine::VM;

/// Render one instruction in assembler syntax.
///
/// Operands are shown as signed integers, and only for opcodes that use them. A code the
/// machine does not know is printed raw so a corrupt slot stays visible.
pub fn disasm_instruction(inst: &Instruction) -> String {
    match inst.opcode() {
        Some(op) if op.has_operand() => format!("{} {}", op, inst.operand.as_i64()),
        Some(op) => op.to_string(),
        None => format!("??? ${:08X} {:#x}", inst.code, inst.operand.as_u64()),
    }
}

/// One instruction per line, in a form `bas` reads back.
pub fn disassemble(program: &[Instruction], out: &mut impl Write) -> io::Result<()> {
    for inst in program {
        writeln!(out, "{}", disasm_instruction(inst))?;
    }
    Ok(())
}

/// Like [`disassemble`], with each line prefixed by its address.
pub fn dump_program(program: &[Instruction], out: &mut impl Write) -> io::Result<()> {
    for (addr, inst) in program.iter().enumerate() {
        writeln!(out, "{:04X}: {}", addr, disasm_instruction(inst))?;
    }
    Ok(())
}

/// Hex dump of `bytes`, sixteen per row, addresses starting at `base`.
pub fn dump_memory(bytes: &[u8], base: u64, out: &mut impl Write) -> io::Result<()> {
    for (row, chunk) in bytes.chunks(16).enumerate() {
        write!(out, "{:08X}: ", base + row as u64 * 16)?;
        for b in chunk {
            write!(out, "{:02X} ", b)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

pub fn dump_stack_val(word: Word) -> String {
    format!(
        "u64: {:<20}|   i64: {:<20}|   f64: {:<25}|   ptr: {:#018x}",
        word.as_u64(),
        word.as_i64(),
        word.as_f64(),
        word.as_addr()
    )
}

/// Stack contents, bottom first.
pub fn dump_stack(vm: &VM, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "Stack:")?;
    if vm.stack.is_empty() {
        return writeln!(out, "  [EMPTY]");
    }
    for word in vm.stack.as_slice() {
        writeln!(out, "  {}", dump_stack_val(*word))?;
    }
    Ok(())
}
