//! Shared pieces of the `linker` and `emulator` binaries.

pub mod logger;
