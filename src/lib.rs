#![doc = include_str!("../README.md")]

mod assembler;
pub(crate) mod constants;
pub mod encoder;
mod error;
mod expr;
pub mod hex;
mod io;
mod linker;
mod macros;
mod reader;
mod section;
mod shelf;
mod string_table;
mod symbols;
mod writer;

pub mod emulator;

pub use self::assembler::*;
pub use self::constants::{SHN_ABS, SHN_UNDEF};
pub use self::emulator::Emulator;
pub use self::error::*;
pub use self::expr::*;
pub use self::io::*;
pub use self::linker::*;
pub(crate) use self::macros::*;
pub use self::reader::*;
pub use self::section::*;
pub use self::shelf::*;
pub use self::string_table::*;
pub use self::symbols::*;
pub use self::writer::*;
