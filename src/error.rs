use thiserror::Error;

/// Errors produced by the assembler, the SHELF codec, the linker and the
/// emulator.
///
/// [`Error::UndefinedSymbol`] has a double life: raised during expression
/// evaluation it is the sentinel that tells the EQU fix-point to keep the
/// expression pending, everywhere else it is fatal.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Syntax error: {0}")]
    Syntax(String),
    #[error("Unknown instruction mnemonic: {0}")]
    UnknownMnemonic(String),
    #[error("Unknown directive: {0}")]
    UnknownDirective(String),
    #[error("Invalid SHELF file: {0}")]
    InvalidObject(String),
    #[error("Undefined symbol: {0}")]
    UndefinedSymbol(String),
    #[error("Multiple definitions of symbol: {0}")]
    Redefined(String),
    #[error("Multiple definitions of global symbol: {0}")]
    DuplicateGlobal(String),
    #[error("Value {0} does not fit a signed 12-bit displacement")]
    OutOfRangeDisp(i32),
    #[error("Displacement requires an absolute value for symbol: {0}")]
    DispRequiresAbsolute(String),
    #[error("Failed to resolve absolute symbols: {0}")]
    UnresolvedEqu(String),
    #[error("Overlapping address range for section: {0}")]
    AddressOverlap(String),
    #[error("No such section: {0}")]
    UnknownSection(String),
    #[error("Relocation at offset {0:#x} is outside its section")]
    RelocationOutOfBounds(u32),
    #[error("4-byte access crosses the memory boundary at {0:#x}")]
    MemoryBoundary(u32),
    #[error("Invalid access to memory-mapped register space at {0:#x}")]
    InvalidMmioAccess(u32),
    #[error("Multiple values for address {0:#x} in hex image")]
    DuplicateAddress(u32),
    #[error("Internal error: {0}")]
    Internal(&'static str),
    #[error("Input/output error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// `true` for the evaluation outcome the EQU resolver reschedules on.
    pub fn is_pending(&self) -> bool {
        matches!(self, Error::UndefinedSymbol(_))
    }
}

impl From<std::io::ErrorKind> for Error {
    fn from(other: std::io::ErrorKind) -> Self {
        Self::Io(other.into())
    }
}
