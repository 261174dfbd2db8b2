use std::path::PathBuf;

use br_asm::Assembler;
use clap::Parser as CParser;

#[derive(CParser)]
#[command(name = "bas")]
#[command(about = "ByteRunner assembler")]
struct Args {
    input: PathBuf,

    /// Defaults to the input path with a `.br` extension
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    br_vm::init_logging();
    let args = Args::parse();

    let mut assembler = Assembler::new();
    let image = match assembler.translate(&args.input).and_then(|_| assembler.image()) {
        Ok(image) => image,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    let output = args
        .output
        .unwrap_or_else(|| args.input.with_extension("br"));
    let written = image.save(&output)?;

    println!("Assembled image written to {}", output.display());
    println!("Image size: {} bytes", written);
    println!("Entry point: {}", image.entry);
    println!("Arena used: {} bytes", assembler.arena_used());

    Ok(())
}
