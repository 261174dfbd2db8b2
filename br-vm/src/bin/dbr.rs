use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

use br_vm::runtime::disasm;
use br_vm::{Image, Limits};
use clap::Parser;

#[derive(Parser)]
#[command(name = "dbr")]
#[command(about = "ByteRunner image disassembler")]
struct Args {
    image: PathBuf,

    /// Prefix every instruction with its address
    #[arg(short, long)]
    addresses: bool,

    /// Also hex dump the static memory section
    #[arg(short, long)]
    memory: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    br_vm::init_logging();
    let args = Args::parse();

    let image = Image::load(&args.image, &Limits::default())?;

    let mut out = io::stdout().lock();
    if args.addresses {
        disasm::dump_program(&image.program, &mut out)?;
    } else {
        disasm::disassemble(&image.program, &mut out)?;
    }

    if args.memory && !image.memory.is_empty() {
        writeln!(out)?;
        disasm::dump_memory(&image.memory, 0, &mut out)?;
    }
    out.flush()?;

    Ok(())
}
