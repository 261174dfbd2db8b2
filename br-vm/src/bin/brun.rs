use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use br_vm::runtime::{disasm, natives};
use br_vm::{Fault, Limits, VM};
use clap::Parser;
use tracing::error;

#[derive(Parser)]
#[command(name = "brun")]
#[command(about = "ByteRunner image interpreter")]
struct Args {
    image: PathBuf,

    /// Maximum number of instructions to execute, negative for no limit
    #[arg(short, long, default_value_t = -1, allow_negative_numbers = true)]
    limit: i64,

    /// Show the machine state before every step and wait for Enter
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    br_vm::init_logging();
    let args = Args::parse();

    let limits = Limits::default();
    let mut vm = VM::load_file(&args.image, &limits)?;
    natives::install(&mut vm)?;

    let limit = u64::try_from(args.limit).ok();
    let result = if args.debug {
        run_debug(&mut vm, limit)
    } else {
        vm.run(limit).map_err(Into::into)
    };

    if let Err(err) = result {
        if let Some(fault) = err.downcast_ref::<Fault>() {
            error!(ip = vm.ip, %fault, "execution faulted");
            vm.dump_ctx(&mut io::stderr())?;
            std::process::exit(1);
        }
        return Err(err);
    }

    Ok(())
}

fn run_debug(vm: &mut VM, limit: Option<u64>) -> Result<(), Box<dyn Error>> {
    let mut stdin = io::stdin().lock();
    let mut line = String::new();
    let mut remaining = limit;

    while remaining != Some(0) && !vm.halted {
        {
            let mut out = io::stdout().lock();
            vm.dump_ctx(&mut out)?;
            let next = usize::try_from(vm.ip)
                .ok()
                .and_then(|ip| vm.program.get(ip))
                .map(disasm::disasm_instruction)
                .unwrap_or_else(|| "<outside program>".to_string());
            writeln!(out, "Next: {}", next)?;
            out.flush()?;
        }

        line.clear();
        if stdin.read_line(&mut line)? == 0 {
            // stdin closed, nothing left to wait for
            return Ok(());
        }

        vm.step()?;
        if let Some(n) = remaining.as_mut() {
            *n -= 1;
        }
    }
    Ok(())
}
