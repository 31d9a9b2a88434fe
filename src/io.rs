use crate::Error;

macro_rules! define_read {
    ($func: ident, $uint: ident) => {
        #[doc = concat!("Read a little-endian `", stringify!($uint), "`.")]
        fn $func(&mut self) -> Result<$uint, crate::Error> {
            let mut bytes = [0_u8; ::core::mem::size_of::<$uint>()];
            self.read_bytes(&mut bytes[..])?;
            Ok($uint::from_le_bytes(bytes))
        }
    };
}

/// SHELF-specific read functions.
///
/// All multi-byte reads are little-endian, the container's only byte order.
pub trait ShelfRead {
    /// Read enough bytes to fill the buffer `buf`.
    ///
    /// Similar to [`Read::read_exact`](std::io::Read::read_exact).
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), crate::Error>;

    /// Read one byte as `u8`.
    fn read_u8(&mut self) -> Result<u8, crate::Error> {
        let mut bytes = [0_u8; 1];
        self.read_bytes(&mut bytes[..])?;
        Ok(bytes[0])
    }

    define_read!(read_u16, u16);
    define_read!(read_u32, u32);
    define_read!(read_i32, i32);
}

impl<R: std::io::Read + ?Sized> ShelfRead for R {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), crate::Error> {
        Ok(self.read_exact(buf)?)
    }
}

macro_rules! define_write {
    ($func: ident, $uint: ident) => {
        #[doc = concat!("Write a little-endian `", stringify!($uint), "`.")]
        fn $func(&mut self, value: $uint) -> Result<(), Error> {
            self.write_bytes(&value.to_le_bytes())
        }
    };
}

/// SHELF-specific write functions.
pub trait ShelfWrite {
    /// Write one byte as `u8`.
    fn write_u8(&mut self, value: u8) -> Result<(), Error> {
        self.write_bytes(&[value])
    }

    define_write!(write_u16, u16);
    define_write!(write_u32, u32);
    define_write!(write_i32, i32);

    /// Write all bytes.
    ///
    /// Similar to [`Write::write_all`](std::io::Write::write_all).
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Error>;
}

impl<W: std::io::Write + ?Sized> ShelfWrite for W {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        Ok(self.write_all(bytes)?)
    }
}

/// Read a fixed-size record from a file or write it back.
pub trait EntityIo {
    /// Read the entity from the `reader`.
    fn read<R: ShelfRead>(reader: &mut R) -> Result<Self, Error>
    where
        Self: Sized;

    /// Write the entity to the `writer`.
    fn write<W: ShelfWrite>(&self, writer: &mut W) -> Result<(), Error>;
}
