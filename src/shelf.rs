//! On-disk records of the SHELF object container.
//!
//! Layout (all integers little-endian):
//!
//! | record | fields |
//! |---|---|
//! | file header | magic `"SHELF"` (5), shoff (4), shnum (2), shstrndx (2) |
//! | section header | name offset (4), type (4), offset (4), size (4), info (4), address (4) |
//! | symbol | name offset (4), value (4), size (4), type (1), bind (1), shndx (2) |
//! | relocation | offset (4), symbol index (4), type (1), addend (4, signed) |

#![allow(missing_docs)]

use crate::constants::*;
use crate::define_infallible_enum;
use crate::EntityIo;
use crate::Error;
use crate::ShelfRead;
use crate::ShelfWrite;

define_infallible_enum! {
    "Section type.",
    SectionType, u32,
    (Null, 0, "The null section at index 0."),
    (Progbits, 1, "Program contents."),
    (Nobits, 2, "Occupies no file space."),
    (Symtab, 3, "The symbol table."),
    (Strtab, 4, "Section name strings."),
    (Symstrtab, 5, "Symbol name strings."),
    (Reloc, 6, "Relocations; `info` is the index of the patched section."),
}

define_infallible_enum! {
    "Symbol type.",
    SymbolType, u8,
    (NoType, 0),
    (Abs, 1),
    (Section, 2),
    (Func, 3),
    (Object, 4),
}

define_infallible_enum! {
    "Symbol binding.",
    SymbolBind, u8,
    (Local, 0),
    (Global, 1),
}

define_infallible_enum! {
    "Relocation type.",
    RelocType, u8,
    (None, 0),
    (Direct, 1, "32-bit absolute."),
    (PcRel, 2, "32-bit PC-relative."),
}

/// The fixed-size file header.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct FileHeader {
    /// Offset of the section-header table.
    pub shoff: u32,
    /// Number of section headers.
    pub shnum: u16,
    /// Index of the `.shstrtab` section header.
    pub shstrndx: u16,
}

impl EntityIo for FileHeader {
    fn read<R: ShelfRead>(reader: &mut R) -> Result<Self, Error> {
        let mut magic = [0_u8; 5];
        reader.read_bytes(&mut magic)?;
        if magic != MAGIC {
            return Err(Error::InvalidObject("bad magic".into()));
        }
        Ok(Self {
            shoff: reader.read_u32()?,
            shnum: reader.read_u16()?,
            shstrndx: reader.read_u16()?,
        })
    }

    fn write<W: ShelfWrite>(&self, writer: &mut W) -> Result<(), Error> {
        writer.write_bytes(&MAGIC)?;
        writer.write_u32(self.shoff)?;
        writer.write_u16(self.shnum)?;
        writer.write_u16(self.shstrndx)?;
        Ok(())
    }
}

/// One section-header table entry.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct SectionRecord {
    pub name_offset: u32,
    pub kind: SectionType,
    /// File offset of the contents; 0 for empty sections.
    pub offset: u32,
    pub size: u32,
    /// For [`SectionType::Reloc`]: index of the section being relocated.
    pub info: u32,
    /// Unused until the linker assigns final addresses in hex mode.
    pub address: u32,
}

impl EntityIo for SectionRecord {
    fn read<R: ShelfRead>(reader: &mut R) -> Result<Self, Error> {
        Ok(Self {
            name_offset: reader.read_u32()?,
            kind: reader.read_u32()?.into(),
            offset: reader.read_u32()?,
            size: reader.read_u32()?,
            info: reader.read_u32()?,
            address: reader.read_u32()?,
        })
    }

    fn write<W: ShelfWrite>(&self, writer: &mut W) -> Result<(), Error> {
        writer.write_u32(self.name_offset)?;
        writer.write_u32(self.kind.as_number())?;
        writer.write_u32(self.offset)?;
        writer.write_u32(self.size)?;
        writer.write_u32(self.info)?;
        writer.write_u32(self.address)?;
        Ok(())
    }
}

/// One symbol-table entry.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct SymbolRecord {
    pub name_offset: u32,
    pub value: u32,
    pub size: u32,
    pub kind: SymbolType,
    pub bind: SymbolBind,
    /// Section-header index, [`crate::constants::SHN_UNDEF`] or
    /// [`crate::constants::SHN_ABS`].
    pub section_index: u16,
}

impl EntityIo for SymbolRecord {
    fn read<R: ShelfRead>(reader: &mut R) -> Result<Self, Error> {
        Ok(Self {
            name_offset: reader.read_u32()?,
            value: reader.read_u32()?,
            size: reader.read_u32()?,
            kind: reader.read_u8()?.into(),
            bind: reader.read_u8()?.into(),
            section_index: reader.read_u16()?,
        })
    }

    fn write<W: ShelfWrite>(&self, writer: &mut W) -> Result<(), Error> {
        writer.write_u32(self.name_offset)?;
        writer.write_u32(self.value)?;
        writer.write_u32(self.size)?;
        writer.write_u8(self.kind.as_number())?;
        writer.write_u8(self.bind.as_number())?;
        writer.write_u16(self.section_index)?;
        Ok(())
    }
}

/// One relocation-table entry.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct RelocationRecord {
    pub offset: u32,
    pub symbol_index: u32,
    pub kind: RelocType,
    pub addend: i32,
}

impl EntityIo for RelocationRecord {
    fn read<R: ShelfRead>(reader: &mut R) -> Result<Self, Error> {
        Ok(Self {
            offset: reader.read_u32()?,
            symbol_index: reader.read_u32()?,
            kind: reader.read_u8()?.into(),
            addend: reader.read_i32()?,
        })
    }

    fn write<W: ShelfWrite>(&self, writer: &mut W) -> Result<(), Error> {
        writer.write_u32(self.offset)?;
        writer.write_u32(self.symbol_index)?;
        writer.write_u8(self.kind.as_number())?;
        writer.write_i32(self.addend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use arbitrary::Arbitrary;
    use arbitrary::Unstructured;
    use arbtest::arbtest;
    use core::fmt::Debug;

    fn test_entity_io<T>()
    where
        T: EntityIo + for<'a> Arbitrary<'a> + Debug + PartialEq + Eq,
    {
        arbtest(|u| {
            let expected: T = u.arbitrary()?;
            let mut buf = Vec::new();
            expected
                .write(&mut buf)
                .inspect_err(|e| panic!("Failed to write {:#?}: {e}", expected))
                .expect("write");
            let actual = T::read(&mut &buf[..])
                .inspect_err(|e| panic!("Failed to read {:#?}: {e}", expected))
                .expect("read");
            assert_eq!(expected, actual);
            Ok(())
        });
    }

    #[test]
    fn file_header_io() {
        test_entity_io::<FileHeader>();
    }

    #[test]
    fn section_record_io() {
        test_entity_io::<SectionRecord>();
    }

    #[test]
    fn symbol_record_io() {
        test_entity_io::<SymbolRecord>();
    }

    #[test]
    fn relocation_record_io() {
        test_entity_io::<RelocationRecord>();
    }

    #[test]
    fn record_lengths() {
        let mut buf = Vec::new();
        FileHeader {
            shoff: 0,
            shnum: 0,
            shstrndx: 0,
        }
        .write(&mut buf)
        .expect("write");
        assert_eq!(FILE_HEADER_LEN, buf.len());

        let mut buf = Vec::new();
        SectionRecord {
            name_offset: 0,
            kind: SectionType::Null,
            offset: 0,
            size: 0,
            info: 0,
            address: 0,
        }
        .write(&mut buf)
        .expect("write");
        assert_eq!(SECTION_HEADER_LEN, buf.len());

        let mut buf = Vec::new();
        SymbolRecord {
            name_offset: 0,
            value: 0,
            size: 0,
            kind: SymbolType::NoType,
            bind: SymbolBind::Local,
            section_index: 0,
        }
        .write(&mut buf)
        .expect("write");
        assert_eq!(SYMBOL_LEN, buf.len());

        let mut buf = Vec::new();
        RelocationRecord {
            offset: 0,
            symbol_index: 0,
            kind: RelocType::None,
            addend: 0,
        }
        .write(&mut buf)
        .expect("write");
        assert_eq!(RELOCATION_LEN, buf.len());
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = b"SHELX\0\0\0\0\0\0\0\0";
        assert!(matches!(
            FileHeader::read(&mut &bytes[..]),
            Err(Error::InvalidObject(_))
        ));
    }

    impl<'a> Arbitrary<'a> for FileHeader {
        fn arbitrary(u: &mut Unstructured<'a>) -> arbitrary::Result<Self> {
            Ok(Self {
                shoff: u.arbitrary()?,
                shnum: u.arbitrary()?,
                shstrndx: u.arbitrary()?,
            })
        }
    }

    impl<'a> Arbitrary<'a> for SectionRecord {
        fn arbitrary(u: &mut Unstructured<'a>) -> arbitrary::Result<Self> {
            Ok(Self {
                name_offset: u.arbitrary()?,
                kind: u.arbitrary()?,
                offset: u.arbitrary()?,
                size: u.arbitrary()?,
                info: u.arbitrary()?,
                address: u.arbitrary()?,
            })
        }
    }

    impl<'a> Arbitrary<'a> for SymbolRecord {
        fn arbitrary(u: &mut Unstructured<'a>) -> arbitrary::Result<Self> {
            Ok(Self {
                name_offset: u.arbitrary()?,
                value: u.arbitrary()?,
                size: u.arbitrary()?,
                kind: u.arbitrary()?,
                bind: u.arbitrary()?,
                section_index: u.arbitrary()?,
            })
        }
    }

    impl<'a> Arbitrary<'a> for RelocationRecord {
        fn arbitrary(u: &mut Unstructured<'a>) -> arbitrary::Result<Self> {
            Ok(Self {
                offset: u.arbitrary()?,
                symbol_index: u.arbitrary()?,
                kind: u.arbitrary()?,
                addend: u.arbitrary()?,
            })
        }
    }
}
