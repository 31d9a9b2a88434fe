//! The linker core.
//!
//! Object files are concatenated into one big section-header table,
//! symbol table and relocation map, with per-file index shifting at
//! intake. Two outputs exist: a merged relocatable SHELF object, or a
//! flat hex image with every section placed at a final address and every
//! relocation applied.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::io::Write;

use crate::constants::SHN_ABS;
use crate::hex;
use crate::Binding;
use crate::Error;
use crate::RelKind;
use crate::Relocation;
use crate::ResolvedRelocation;
use crate::ResolvedSectionHeader;
use crate::ResolvedSymbol;
use crate::RelocType;
use crate::Section;
use crate::SectionId;
use crate::SectionType;
use crate::ShelfReader;
use crate::ShelfWrite;
use crate::ShelfWriter;
use crate::SymbolBind;
use crate::SymbolId;
use crate::SymbolKind;
use crate::SymbolTable;
use crate::SymbolType;

/// Merges SHELF objects and emits either a relocatable object or a flat
/// loadable image.
#[derive(Default)]
pub struct Linker {
    /// Concatenation of every input's section-header table.
    section_headers: Vec<ResolvedSectionHeader>,
    section_index_offset: usize,
    /// Concatenation of every input's symbol table.
    symbols: Vec<ResolvedSymbol>,
    symbol_index_offset: usize,
    /// Keyed by the index of the patched section in the big table.
    relocations: BTreeMap<usize, Vec<ResolvedRelocation>>,
    /// Keyed by the index of the owning section in the big table.
    section_contents: BTreeMap<usize, Vec<u8>>,
    /// User-fixed starting addresses, name-ordered for determinism.
    placements: BTreeMap<String, u32>,
}

impl Linker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one parsed object file into the big tables, shifting its
    /// section and symbol indices past everything read so far.
    pub fn add_object(&mut self, object: ShelfReader) {
        let ShelfReader {
            section_headers,
            section_contents,
            symbols,
            relocations,
        } = object;
        let section_base = self.section_index_offset;
        let symbol_base = self.symbol_index_offset;
        let section_count = section_headers.len();
        let symbol_count = symbols.len();

        self.section_headers.extend(section_headers);
        for mut symbol in symbols {
            if symbol.section_index != SHN_ABS {
                symbol.section_index += section_base as u16;
            }
            self.symbols.push(symbol);
        }
        for (index, contents) in section_contents.into_iter().enumerate() {
            if self.section_headers[section_base + index].kind == SectionType::Progbits {
                self.section_contents.insert(section_base + index, contents);
            }
        }
        for (target, mut entries) in relocations {
            for relocation in &mut entries {
                relocation.symbol_index += symbol_base as u32;
            }
            self.relocations.insert(target + section_base, entries);
        }
        for header in &mut self.section_headers[section_base..] {
            if header.kind == SectionType::Reloc {
                header.info += section_base as u32;
            }
        }

        self.section_index_offset += section_count;
        self.symbol_index_offset += symbol_count;
        log::debug!(
            "Read object: {section_count} sections, {symbol_count} symbols"
        );
    }

    /// Record a user-fixed starting address for a merged section
    /// (hex mode only).
    pub fn place_section(&mut self, name: &str, address: u32) -> Result<(), Error> {
        if self.placements.contains_key(name) {
            return Err(Error::Syntax(format!(
                "starting address for section '{name}' already specified"
            )));
        }
        self.placements.insert(name.to_string(), address);
        Ok(())
    }

    /* --- Hex mode --- */

    /// Resolve symbols, place every merged section, apply relocations and
    /// stream the `(address, byte)` image.
    pub fn link_executable<W: Write>(&mut self, writer: &mut W) -> Result<(), Error> {
        self.resolve_undefined_symbols()?;
        let sizes = self.compute_merged_section_sizes();
        let addresses = self.compute_section_addresses(&sizes)?;
        self.assign_final_section_addresses(&addresses)?;
        self.apply_relocations()?;

        let runs = self
            .section_headers
            .iter()
            .enumerate()
            .filter(|(_, header)| header.kind == SectionType::Progbits)
            .map(|(index, header)| {
                let contents = self
                    .section_contents
                    .get(&index)
                    .map(|contents| &contents[..])
                    .unwrap_or(&[]);
                (header.address, contents)
            });
        hex::write_image(writer, runs)
    }

    fn is_defined(&self, symbol: &ResolvedSymbol) -> Result<bool, Error> {
        if symbol.section_index == SHN_ABS {
            return Ok(true);
        }
        let header = self
            .section_headers
            .get(symbol.section_index as usize)
            .ok_or_else(|| Error::InvalidObject("symbol section index out of range".into()))?;
        Ok(header.kind != SectionType::Null)
    }

    /// First pass collects defined globals (rejecting duplicates and
    /// undefined locals); second pass replaces every undefined global by
    /// its defining entry so relocations resolve through it.
    fn resolve_undefined_symbols(&mut self) -> Result<(), Error> {
        let mut defined_globals: HashMap<String, usize> = HashMap::new();
        for (index, symbol) in self.symbols.iter().enumerate() {
            if !self.is_defined(symbol)? {
                if symbol.bind == SymbolBind::Local && !symbol.name.is_empty() {
                    return Err(Error::UndefinedSymbol(symbol.name.clone()));
                }
            } else if symbol.bind == SymbolBind::Global
                && defined_globals
                    .insert(symbol.name.clone(), index)
                    .is_some()
            {
                return Err(Error::DuplicateGlobal(symbol.name.clone()));
            }
        }
        for index in 0..self.symbols.len() {
            let symbol = &self.symbols[index];
            if self.is_defined(symbol)?
                || symbol.bind != SymbolBind::Global
                || symbol.name.is_empty()
            {
                continue;
            }
            let defining = *defined_globals
                .get(&symbol.name)
                .ok_or_else(|| Error::UndefinedSymbol(symbol.name.clone()))?;
            let replacement = self.symbols[defining].clone();
            self.symbols[index] = replacement;
        }
        Ok(())
    }

    /// Per-name running totals; each header's `address` becomes its
    /// offset within the merged section, to be shifted by the merged
    /// base later.
    fn compute_merged_section_sizes(&mut self) -> BTreeMap<String, u32> {
        let mut sizes: BTreeMap<String, u32> = BTreeMap::new();
        for header in &mut self.section_headers {
            if header.kind != SectionType::Progbits {
                continue;
            }
            let total = sizes.entry(header.name.clone()).or_insert(0);
            header.address = *total;
            *total += header.size;
        }
        sizes
    }

    fn compute_section_addresses(
        &self,
        sizes: &BTreeMap<String, u32>,
    ) -> Result<BTreeMap<String, u32>, Error> {
        let mut used: Vec<(u64, u64)> = Vec::new();
        let mut addresses: BTreeMap<String, u32> = BTreeMap::new();

        // Fixed placements first, in name order.
        for (name, address) in &self.placements {
            let size = *sizes
                .get(name)
                .ok_or_else(|| Error::UnknownSection(name.clone()))?;
            let start = *address as u64;
            let end = start + size as u64;
            if used.iter().any(|range| end > range.0 && start < range.1) {
                return Err(Error::AddressOverlap(name.clone()));
            }
            used.push((start, end));
            addresses.insert(name.clone(), *address);
            log::debug!("Placed section {name} at {address:#x} (fixed)");
        }

        // Remaining sections from address 0, sliding past fixed ranges
        // until the position is stable.
        let mut current: u64 = 0;
        for (name, size) in sizes {
            if addresses.contains_key(name) {
                continue;
            }
            let mut start = current;
            let mut end = start + *size as u64;
            loop {
                let mut adjusted = false;
                for range in &used {
                    if end > range.0 && start < range.1 {
                        start = range.1;
                        end = start + *size as u64;
                        adjusted = true;
                    }
                }
                if !adjusted {
                    break;
                }
            }
            if end > u32::MAX as u64 + 1 {
                return Err(Error::AddressOverlap(name.clone()));
            }
            addresses.insert(name.clone(), start as u32);
            used.push((start, end));
            current = end;
            log::debug!("Placed section {name} at {start:#x}");
        }
        Ok(addresses)
    }

    fn assign_final_section_addresses(
        &mut self,
        addresses: &BTreeMap<String, u32>,
    ) -> Result<(), Error> {
        for header in &mut self.section_headers {
            if header.kind != SectionType::Progbits {
                continue;
            }
            let base = addresses
                .get(&header.name)
                .ok_or_else(|| Error::UnknownSection(header.name.clone()))?;
            header.address = header.address.wrapping_add(*base);
        }
        Ok(())
    }

    fn apply_relocations(&mut self) -> Result<(), Error> {
        for (&section_index, entries) in &self.relocations {
            for relocation in entries {
                let symbol = self
                    .symbols
                    .get(relocation.symbol_index as usize)
                    .ok_or_else(|| {
                        Error::InvalidObject("relocation symbol index out of range".into())
                    })?;
                let symbol_value = if symbol.section_index == SHN_ABS {
                    symbol.value
                } else {
                    let header = self
                        .section_headers
                        .get(symbol.section_index as usize)
                        .ok_or_else(|| {
                            Error::InvalidObject("symbol section index out of range".into())
                        })?;
                    symbol.value.wrapping_add(header.address)
                };
                let site = self.section_headers[section_index]
                    .address
                    .wrapping_add(relocation.offset);
                let final_value = match relocation.kind {
                    RelocType::Direct => symbol_value.wrapping_add(relocation.addend as u32),
                    RelocType::PcRel => symbol_value
                        .wrapping_sub(site)
                        .wrapping_add(relocation.addend as u32),
                    _ => {
                        return Err(Error::InvalidObject("unknown relocation type".into()));
                    }
                };
                let contents = self
                    .section_contents
                    .get_mut(&section_index)
                    .ok_or(Error::RelocationOutOfBounds(relocation.offset))?;
                let offset = relocation.offset as usize;
                let field = contents
                    .get_mut(offset..offset + 4)
                    .ok_or(Error::RelocationOutOfBounds(relocation.offset))?;
                field.copy_from_slice(&final_value.to_le_bytes());
            }
        }
        Ok(())
    }

    /* --- Relocatable mode --- */

    /// Merge same-named sections, dedup section symbols, rebase symbol
    /// values and relocations onto the merged layout, and write a new
    /// relocatable object.
    pub fn link_relocatable<W: ShelfWrite>(&self, writer: &mut W) -> Result<(), Error> {
        let mut sections = vec![Section::new(SectionId::UNDEFINED, "")];
        // Per-input-section starting offset inside its merged section.
        let mut slice_offset: BTreeMap<usize, u32> = BTreeMap::new();
        let mut section_map: BTreeMap<usize, SectionId> = BTreeMap::new();
        let mut section_by_name: BTreeMap<String, SectionId> = BTreeMap::new();

        for (index, header) in self.section_headers.iter().enumerate() {
            match header.kind {
                SectionType::Null => {
                    slice_offset.insert(index, 0);
                    section_map.insert(index, SectionId::UNDEFINED);
                }
                SectionType::Progbits => {
                    let contents = self
                        .section_contents
                        .get(&index)
                        .map(|contents| &contents[..])
                        .unwrap_or(&[]);
                    if let Some(&id) = section_by_name.get(&header.name) {
                        let target = &mut sections[id.index()];
                        slice_offset.insert(index, target.location_counter());
                        target.emit_bytes(contents);
                        section_map.insert(index, id);
                    } else {
                        let id = SectionId::new(sections.len());
                        let mut section = Section::new(id, header.name.clone());
                        section.emit_bytes(contents);
                        sections.push(section);
                        slice_offset.insert(index, 0);
                        section_by_name.insert(header.name.clone(), id);
                        section_map.insert(index, id);
                    }
                }
                _ => {}
            }
        }

        self.check_duplicate_globals()?;

        let mut symbols = SymbolTable::new();
        symbols.push("", SectionId::UNDEFINED);
        // Input symbol index -> writer symbol.
        let mut symbol_map: BTreeMap<usize, SymbolId> = BTreeMap::new();
        // One writer symbol per merged section, keyed by section name.
        let mut section_symbol_by_name: BTreeMap<String, SymbolId> = BTreeMap::new();
        // Input index of a section symbol -> slice offset of its
        // originating input section inside the merged section.
        let mut section_symbol_offset: BTreeMap<usize, u32> = BTreeMap::new();

        for (index, symbol) in self.symbols.iter().enumerate() {
            if symbol.name.is_empty() {
                symbol_map.insert(index, SymbolId::NULL);
                continue;
            }
            let offset = slice_offset
                .get(&(symbol.section_index as usize))
                .copied()
                .unwrap_or(0);
            if symbol.kind == SymbolType::Section {
                section_symbol_offset.insert(index, offset);
                if let Some(&existing) = section_symbol_by_name.get(&symbol.name) {
                    symbol_map.insert(index, existing);
                    continue;
                }
                let section = *section_map
                    .get(&(symbol.section_index as usize))
                    .ok_or_else(|| {
                        Error::InvalidObject("section symbol has no home section".into())
                    })?;
                let id = symbols.push(&symbol.name, section);
                let new_symbol = symbols.symbol_mut(id);
                new_symbol.value = symbol.value as i32;
                new_symbol.size = symbol.size;
                new_symbol.kind = SymbolKind::Section;
                new_symbol.binding = binding(symbol.bind);
                new_symbol.defined = true;
                section_symbol_by_name.insert(symbol.name.clone(), id);
                symbol_map.insert(index, id);
            } else {
                let section = if symbol.section_index == SHN_ABS {
                    SectionId::ABSOLUTE
                } else {
                    *section_map
                        .get(&(symbol.section_index as usize))
                        .ok_or_else(|| {
                            Error::InvalidObject("symbol has no home section".into())
                        })?
                };
                let id = symbols.push(&symbol.name, section);
                let new_symbol = symbols.symbol_mut(id);
                // Intra-section labels move to their merged position;
                // absolute symbols are shifted by zero.
                new_symbol.value = (symbol.value as i32).wrapping_add(offset as i32);
                new_symbol.size = symbol.size;
                new_symbol.binding = binding(symbol.bind);
                new_symbol.defined = !section.is_undefined();
                symbol_map.insert(index, id);
            }
        }

        for (&section_index, entries) in &self.relocations {
            let Some(&target) = section_map.get(&section_index) else {
                continue;
            };
            let adjust = slice_offset.get(&section_index).copied().unwrap_or(0);
            for relocation in entries {
                let input_symbol = relocation.symbol_index as usize;
                let mut addend = relocation.addend;
                // The referent inside the originating slice moved with it.
                if let Some(extra) = section_symbol_offset.get(&input_symbol) {
                    addend = addend.wrapping_add(*extra as i32);
                }
                let symbol = symbol_map
                    .get(&input_symbol)
                    .copied()
                    .ok_or_else(|| {
                        Error::InvalidObject("relocation symbol index out of range".into())
                    })?;
                sections[target.index()].relocations.push(Relocation {
                    offset: relocation.offset + adjust,
                    kind: rel_kind(relocation.kind)?,
                    addend,
                    symbol,
                });
            }
        }

        ShelfWriter::new(&sections, symbols.as_slice()).write(writer)
    }

    /// Duplicate defined globals are an error even in relocatable mode;
    /// locals may collide freely.
    fn check_duplicate_globals(&self) -> Result<(), Error> {
        let mut seen: HashSet<&str> = HashSet::new();
        for symbol in &self.symbols {
            if symbol.bind != SymbolBind::Global {
                continue;
            }
            if !self.is_defined(symbol)? {
                continue;
            }
            if !seen.insert(&symbol.name) {
                return Err(Error::DuplicateGlobal(symbol.name.clone()));
            }
        }
        Ok(())
    }
}

fn binding(bind: SymbolBind) -> Binding {
    if bind == SymbolBind::Global {
        Binding::Global
    } else {
        Binding::Local
    }
}

fn rel_kind(kind: RelocType) -> Result<RelKind, Error> {
    match kind {
        RelocType::Direct => Ok(RelKind::Direct),
        RelocType::PcRel => Ok(RelKind::PcRel),
        RelocType::None => Ok(RelKind::None),
        RelocType::Other(_) => Err(Error::InvalidObject("unknown relocation type".into())),
    }
}
