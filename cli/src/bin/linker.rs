//! The `linker` binary.
//!
//! ```text
//! linker {-hex|-relocatable} -o OUTPUT [-place=NAME@ADDR]... INPUT...
//! ```
//!
//! The single-dash long options mirror the historical interface, so the
//! argument loop is hand-rolled; `-place` addresses accept decimal,
//! `0x`-prefixed hex and `0`-prefixed octal.

use std::io::BufWriter;
use std::io::Write;
use std::process::ExitCode;

use fs_err::File;
use shelf::Linker;
use shelf::ShelfReader;
use shelf_cli::logger::Logger;

struct Args {
    hex: bool,
    output: String,
    places: Vec<(String, u32)>,
    inputs: Vec<String>,
    verbose: bool,
}

fn main() -> ExitCode {
    match do_main() {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn do_main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args(std::env::args().skip(1))?;
    Logger::init(args.verbose)?;

    let mut linker = Linker::new();
    for (name, address) in &args.places {
        linker.place_section(name, *address)?;
    }
    for input in &args.inputs {
        let data = fs_err::read(input)?;
        let object =
            ShelfReader::parse(&data).map_err(|e| format!("error reading file {input}: {e}"))?;
        linker.add_object(object);
    }

    let mut output = BufWriter::new(File::create(&args.output)?);
    if args.hex {
        linker.link_executable(&mut output)?;
    } else {
        linker.link_relocatable(&mut output)?;
    }
    output.flush()?;
    Ok(())
}

fn parse_args(raw: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut hex = false;
    let mut relocatable = false;
    let mut output = None;
    let mut places = Vec::new();
    let mut inputs = Vec::new();
    let mut verbose = false;

    let mut raw = raw;
    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "-hex" => {
                if relocatable {
                    return Err("cannot specify both -hex and -relocatable".into());
                }
                hex = true;
            }
            "-relocatable" => {
                if hex {
                    return Err("cannot specify both -hex and -relocatable".into());
                }
                relocatable = true;
            }
            "-o" => {
                output = Some(raw.next().ok_or("-o requires an argument")?);
            }
            "-v" | "--verbose" => verbose = true,
            _ => {
                if let Some(place) = arg.strip_prefix("-place=") {
                    let (name, address) = place
                        .split_once('@')
                        .ok_or("invalid -place format, expected section@address")?;
                    places.push((name.to_string(), parse_address(address)?));
                } else {
                    inputs.push(arg);
                }
            }
        }
    }

    if !hex && !relocatable {
        return Err("must specify either -hex or -relocatable".into());
    }
    let output = output.ok_or("output file not specified")?;
    Ok(Args {
        hex,
        output,
        places,
        inputs,
        verbose,
    })
}

/// Decimal, `0x` hex or `0` octal, like `strtoul` with base 0.
fn parse_address(text: &str) -> Result<u32, String> {
    let parsed = if let Some(digits) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))
    {
        u32::from_str_radix(digits, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        u32::from_str_radix(&text[1..], 8)
    } else {
        text.parse::<u32>()
    };
    parsed.map_err(|_| format!("invalid address: {text}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, String> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn address_bases() {
        assert_eq!(Ok(4096), parse_address("4096"));
        assert_eq!(Ok(4096), parse_address("0x1000"));
        assert_eq!(Ok(8), parse_address("010"));
        assert_eq!(Ok(0), parse_address("0"));
        assert!(parse_address("0xzz").is_err());
    }

    #[test]
    fn modes_are_mutually_exclusive_and_required() {
        assert!(args(&["-hex", "-relocatable", "-o", "out"]).is_err());
        assert!(args(&["-o", "out", "a.o"]).is_err());
        let parsed = args(&["-hex", "-o", "out", "-place=.text@0x1000", "a.o", "b.o"])
            .expect("valid");
        assert!(parsed.hex);
        assert_eq!("out", parsed.output);
        assert_eq!(vec![(".text".to_string(), 0x1000)], parsed.places);
        assert_eq!(vec!["a.o", "b.o"], parsed.inputs);
    }

    #[test]
    fn output_is_required() {
        assert!(args(&["-hex", "a.o"]).is_err());
        assert!(args(&["-hex", "-o"]).is_err());
    }
}
