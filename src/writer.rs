use crate::constants::*;
use crate::Binding;
use crate::EntityIo;
use crate::Error;
use crate::FileHeader;
use crate::RelKind;
use crate::RelocationRecord;
use crate::RelocType;
use crate::Section;
use crate::SectionRecord;
use crate::SectionType;
use crate::ShelfWrite;
use crate::StringTable;
use crate::Symbol;
use crate::SymbolBind;
use crate::SymbolKind;
use crate::SymbolRecord;
use crate::SymbolType;

/// Serialises a finalised object model into a SHELF file.
///
/// Section-header order is stable and relied upon by the reader: program
/// sections in model order, each immediately followed by its relocation
/// section when it has one, then `.symtab`, then `.shstrtab` (always the
/// second-to-last header, referenced by `shstrndx`), then `.symstrtab`.
/// Contents are laid out after the file header in the same order; the
/// header table goes last, at `shoff`.
pub struct ShelfWriter<'a> {
    sections: &'a [Section],
    symbols: &'a [Symbol],
}

impl<'a> ShelfWriter<'a> {
    /// `sections` must not contain the absolute pseudo-section (it is a
    /// sentinel id, never arena-backed), and `symbols` must be in output
    /// order with the null symbol first.
    pub fn new(sections: &'a [Section], symbols: &'a [Symbol]) -> Self {
        Self { sections, symbols }
    }

    pub fn write<W: ShelfWrite>(&self, writer: &mut W) -> Result<(), Error> {
        let mut shstrtab = StringTable::new();
        let section_names: Vec<u32> = self
            .sections
            .iter()
            .map(|section| shstrtab.insert(&section.name))
            .collect();
        let symtab_name = shstrtab.insert(".symtab");
        let shstrtab_name = shstrtab.insert(".shstrtab");
        let symstrtab_name = shstrtab.insert(".symstrtab");

        let mut symstrtab = StringTable::new();
        let symbol_names: Vec<u32> = self
            .symbols
            .iter()
            .map(|symbol| symstrtab.insert(&symbol.name))
            .collect();

        let mut headers: Vec<SectionRecord> = Vec::new();
        let mut contents: Vec<Vec<u8>> = Vec::new();
        let mut file_offset = FILE_HEADER_LEN as u32;
        // Header index of every program section; relocation sections
        // interleave, so it differs from the arena index.
        let mut header_index = vec![0_u16; self.sections.len()];

        for (index, section) in self.sections.iter().enumerate() {
            header_index[index] = headers.len() as u16;
            let size = section.contents().len() as u32;
            if size > 0 {
                contents.push(section.contents().to_vec());
            }
            headers.push(SectionRecord {
                name_offset: section_names[index],
                kind: if section.name.is_empty() {
                    SectionType::Null
                } else {
                    SectionType::Progbits
                },
                offset: if size > 0 { file_offset } else { 0 },
                size,
                info: 0,
                address: 0,
            });
            file_offset += size;

            if section.relocations.is_empty() {
                continue;
            }
            let mut table = Vec::with_capacity(section.relocations.len() * RELOCATION_LEN);
            for relocation in &section.relocations {
                RelocationRecord {
                    offset: relocation.offset,
                    symbol_index: relocation.symbol.index() as u32,
                    kind: reloc_type(relocation.kind)?,
                    addend: relocation.addend,
                }
                .write(&mut table)?;
            }
            headers.push(SectionRecord {
                name_offset: shstrtab.insert(&format!(".rela{}", section.name)),
                kind: SectionType::Reloc,
                offset: file_offset,
                size: table.len() as u32,
                info: header_index[index] as u32,
                address: 0,
            });
            file_offset += table.len() as u32;
            contents.push(table);
        }

        let mut symtab = Vec::with_capacity(self.symbols.len() * SYMBOL_LEN);
        for (index, symbol) in self.symbols.iter().enumerate() {
            SymbolRecord {
                name_offset: symbol_names[index],
                value: symbol.value as u32,
                size: symbol.size,
                kind: match symbol.kind {
                    SymbolKind::Section => SymbolType::Section,
                    SymbolKind::NoType => SymbolType::NoType,
                },
                bind: match symbol.binding {
                    Binding::Global => SymbolBind::Global,
                    Binding::Local => SymbolBind::Local,
                },
                section_index: if symbol.section.is_absolute() {
                    SHN_ABS
                } else {
                    header_index[symbol.section.index()]
                },
            }
            .write(&mut symtab)?;
        }
        headers.push(SectionRecord {
            name_offset: symtab_name,
            kind: SectionType::Symtab,
            offset: file_offset,
            size: symtab.len() as u32,
            info: 0,
            address: 0,
        });
        file_offset += symtab.len() as u32;
        contents.push(symtab);

        headers.push(SectionRecord {
            name_offset: shstrtab_name,
            kind: SectionType::Strtab,
            offset: file_offset,
            size: shstrtab.len() as u32,
            info: 0,
            address: 0,
        });
        file_offset += shstrtab.len() as u32;

        headers.push(SectionRecord {
            name_offset: symstrtab_name,
            kind: SectionType::Symstrtab,
            offset: file_offset,
            size: symstrtab.len() as u32,
            info: 0,
            address: 0,
        });
        file_offset += symstrtab.len() as u32;

        contents.push(shstrtab.as_ref().to_vec());
        contents.push(symstrtab.as_ref().to_vec());

        log::trace!(
            "Writing SHELF file: {} headers, section table at {:#x}",
            headers.len(),
            file_offset
        );
        FileHeader {
            shoff: file_offset,
            shnum: headers.len() as u16,
            shstrndx: headers.len() as u16 - 2,
        }
        .write(writer)?;
        for content in &contents {
            writer.write_bytes(content)?;
        }
        for header in &headers {
            header.write(writer)?;
        }
        Ok(())
    }
}

fn reloc_type(kind: RelKind) -> Result<RelocType, Error> {
    match kind {
        RelKind::Direct => Ok(RelocType::Direct),
        RelKind::PcRel => Ok(RelocType::PcRel),
        RelKind::None => Ok(RelocType::None),
        // Displacement sites are an assembly-time construct; finalisation
        // resolves or rejects every one of them.
        RelKind::Disp => Err(Error::Internal("displacement relocation reached the writer")),
    }
}
