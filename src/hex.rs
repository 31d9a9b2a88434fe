//! The flat loadable image: a stream of `(u32 address LE, u8 byte)`
//! records in arbitrary order. Absent addresses are implicitly zero to
//! the consumer; duplicate addresses are refused on load.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;

use crate::Error;

/// Write one `(address, bytes)` run per section, ascending within a run.
pub fn write_image<W, B, I>(writer: &mut W, runs: I) -> Result<(), Error>
where
    W: Write,
    B: AsRef<[u8]>,
    I: Iterator<Item = (u32, B)>,
{
    for (base, bytes) in runs {
        for (index, byte) in bytes.as_ref().iter().enumerate() {
            let address = base.wrapping_add(index as u32);
            writer.write_all(&address.to_le_bytes())?;
            writer.write_all(&[*byte])?;
        }
    }
    Ok(())
}

/// Parse an image into a sparse memory map.
pub fn read_image<R: Read>(reader: &mut R) -> Result<BTreeMap<u32, u8>, Error> {
    let mut memory = BTreeMap::new();
    loop {
        let mut address = [0_u8; 4];
        match reader.read_exact(&mut address) {
            Ok(()) => {}
            Err(error) if error.kind() == ErrorKind::UnexpectedEof => break,
            Err(error) => return Err(error.into()),
        }
        let mut value = [0_u8; 1];
        match reader.read_exact(&mut value) {
            Ok(()) => {}
            Err(error) if error.kind() == ErrorKind::UnexpectedEof => break,
            Err(error) => return Err(error.into()),
        }
        let address = u32::from_le_bytes(address);
        if memory.insert(address, value[0]).is_some() {
            return Err(Error::DuplicateAddress(address));
        }
    }
    Ok(memory)
}
