//! The `emulator` binary: loads a hex image and executes it.
//!
//! Exit code 0 when the program reaches `halt`, 1 on a file or
//! emulation error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use shelf::hex;
use shelf::Emulator;
use shelf_cli::logger::Logger;

#[derive(clap::Parser)]
#[clap(version)]
struct Args {
    /// Verbose output.
    #[clap(short = 'v', long = "verbose")]
    verbose: bool,

    /// Hex image to execute.
    #[clap(value_name = "FILE")]
    file: PathBuf,
}

const SEPARATOR: &str =
    "-----------------------------------------------------------------";

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = Logger::init(args.verbose) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let mut emulator = Emulator::new();
    let image = fs_err::read(&args.file)
        .map_err(|e| e.to_string())
        .and_then(|data| hex::read_image(&mut &data[..]).map_err(|e| e.to_string()));
    match image {
        Ok(memory) => emulator.load_image(memory),
        Err(e) => {
            eprintln!("error reading file {}: {e}", args.file.display());
            return ExitCode::FAILURE;
        }
    }

    match emulator.run() {
        Ok(()) => {
            println!("\n{SEPARATOR}");
            println!("Emulated processor executed halt instruction");
            println!("Emulated processor state:");
            print!("{}", emulator.register_dump());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("\n{SEPARATOR}");
            println!("Emulated processor encountered a fatal error: {e}");
            println!("Emulated processor state:");
            print!("{}", emulator.register_dump());
            ExitCode::FAILURE
        }
    }
}
