use std::collections::BTreeMap;

use crate::constants::*;
use crate::EntityIo;
use crate::Error;
use crate::FileHeader;
use crate::RelocationRecord;
use crate::RelocType;
use crate::SectionRecord;
use crate::SectionType;
use crate::SymbolBind;
use crate::SymbolRecord;
use crate::SymbolType;

/// A section header with its name resolved through `.shstrtab`.
#[derive(Clone, Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct ResolvedSectionHeader {
    pub name: String,
    pub kind: SectionType,
    pub offset: u32,
    pub size: u32,
    pub info: u32,
    pub address: u32,
}

/// A symbol with its name resolved through `.symstrtab`.
#[derive(Clone, Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct ResolvedSymbol {
    pub name: String,
    pub value: u32,
    pub size: u32,
    pub kind: SymbolType,
    pub bind: SymbolBind,
    pub section_index: u16,
}

/// A relocation entry grouped under the section it patches.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct ResolvedRelocation {
    pub offset: u32,
    pub kind: RelocType,
    pub addend: i32,
    pub symbol_index: u32,
}

/// Parses a SHELF file into resolved views.
///
/// Every offset, size and string reference is bounds-checked; violations
/// are fatal [`Error::InvalidObject`] values.
#[derive(Debug)]
pub struct ShelfReader {
    pub(crate) section_headers: Vec<ResolvedSectionHeader>,
    pub(crate) section_contents: Vec<Vec<u8>>,
    pub(crate) symbols: Vec<ResolvedSymbol>,
    pub(crate) relocations: BTreeMap<usize, Vec<ResolvedRelocation>>,
}

impl ShelfReader {
    /// Parse an in-memory SHELF image.
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        let header = FileHeader::read(&mut &data[..])?;
        let shnum = header.shnum as usize;

        let table_len = shnum * SECTION_HEADER_LEN;
        let table = slice(data, header.shoff, table_len, "section-header table")?;
        let mut records = Vec::with_capacity(shnum);
        {
            let mut cursor = table;
            for _ in 0..shnum {
                records.push(SectionRecord::read(&mut cursor)?);
            }
        }

        let mut section_contents = Vec::with_capacity(shnum);
        for record in &records {
            if record.size == 0 {
                section_contents.push(Vec::new());
                continue;
            }
            let content = slice(data, record.offset, record.size as usize, "section contents")?;
            section_contents.push(content.to_vec());
        }

        let shstrndx = header.shstrndx as usize;
        if shstrndx >= shnum {
            return Err(Error::InvalidObject("shstrndx out of range".into()));
        }
        let mut section_headers = Vec::with_capacity(shnum);
        for record in &records {
            section_headers.push(ResolvedSectionHeader {
                name: string_at(&section_contents[shstrndx], record.name_offset)?,
                kind: record.kind,
                offset: record.offset,
                size: record.size,
                info: record.info,
                address: record.address,
            });
        }

        let symtab = find_section(&section_headers, SectionType::Symtab)?;
        let symstrtab = find_section(&section_headers, SectionType::Symstrtab)?;
        let strings = &section_contents[symstrtab];
        let table = &section_contents[symtab];
        let count = table.len() / SYMBOL_LEN;
        let mut symbols = Vec::with_capacity(count);
        {
            let mut cursor = &table[..];
            for _ in 0..count {
                let record = SymbolRecord::read(&mut cursor)?;
                symbols.push(ResolvedSymbol {
                    name: string_at(strings, record.name_offset)?,
                    value: record.value,
                    size: record.size,
                    kind: record.kind,
                    bind: record.bind,
                    section_index: record.section_index,
                });
            }
        }

        let mut relocations = BTreeMap::new();
        for (index, section_header) in section_headers.iter().enumerate() {
            if section_header.kind != SectionType::Reloc {
                continue;
            }
            let table = &section_contents[index];
            let count = table.len() / RELOCATION_LEN;
            let mut entries = Vec::with_capacity(count);
            let mut cursor = &table[..];
            for _ in 0..count {
                let record = RelocationRecord::read(&mut cursor)?;
                if record.symbol_index as usize >= symbols.len() {
                    return Err(Error::InvalidObject(format!(
                        "relocation references symbol {} of {}",
                        record.symbol_index,
                        symbols.len()
                    )));
                }
                entries.push(ResolvedRelocation {
                    offset: record.offset,
                    kind: record.kind,
                    addend: record.addend,
                    symbol_index: record.symbol_index,
                });
            }
            let target = section_header.info as usize;
            if target >= shnum {
                return Err(Error::InvalidObject(
                    "relocation section targets a missing section".into(),
                ));
            }
            relocations.insert(target, entries);
        }

        Ok(Self {
            section_headers,
            section_contents,
            symbols,
            relocations,
        })
    }

    /// Read and parse a whole SHELF stream.
    pub fn read<R: std::io::Read>(reader: &mut R) -> Result<Self, Error> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::parse(&data)
    }

    pub fn section_headers(&self) -> &[ResolvedSectionHeader] {
        &self.section_headers
    }

    pub fn section_contents(&self, section_index: usize) -> &[u8] {
        &self.section_contents[section_index]
    }

    pub fn symbols(&self) -> &[ResolvedSymbol] {
        &self.symbols
    }

    /// Relocations patching the section at `section_index`.
    pub fn relocations(&self, section_index: usize) -> &[ResolvedRelocation] {
        self.relocations
            .get(&section_index)
            .map(|entries| &entries[..])
            .unwrap_or(&[])
    }
}

fn slice<'a>(data: &'a [u8], offset: u32, len: usize, what: &str) -> Result<&'a [u8], Error> {
    let start = offset as usize;
    data.get(start..start + len)
        .ok_or_else(|| Error::InvalidObject(format!("{what} is out of bounds")))
}

fn string_at(table: &[u8], offset: u32) -> Result<String, Error> {
    let bytes = table
        .get(offset as usize..)
        .ok_or_else(|| Error::InvalidObject("string offset out of bounds".into()))?;
    let end = bytes
        .iter()
        .position(|byte| *byte == 0)
        .ok_or_else(|| Error::InvalidObject("unterminated string".into()))?;
    let name = std::str::from_utf8(&bytes[..end])
        .map_err(|_| Error::InvalidObject("string is not UTF-8".into()))?;
    Ok(name.to_string())
}

fn find_section(headers: &[ResolvedSectionHeader], kind: SectionType) -> Result<usize, Error> {
    headers
        .iter()
        .position(|header| header.kind == kind)
        .ok_or_else(|| match kind {
            SectionType::Symtab => Error::InvalidObject("missing symbol table".into()),
            _ => Error::InvalidObject("missing symbol string table".into()),
        })
}
