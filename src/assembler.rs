//! The assembler core.
//!
//! Consumes the pre-tokenised stream produced by the source parser
//! (instructions, directives, labels and `.equ` expressions), maintains
//! the object model and finalises it into a writable state. Mnemonics
//! carry addressing-mode suffixes (`lit`/`sym`/`symabs`/`ind`/`indlit`/
//! `indsym`); the `sym` variants emit a zero placeholder and register the
//! patch site with the symbol-usage policy.

use std::mem;

use crate::encoder;
use crate::Binding;
use crate::Error;
use crate::Expr;
use crate::ForwardRef;
use crate::RelKind;
use crate::Relocation;
use crate::Section;
use crate::SectionId;
use crate::ShelfWrite;
use crate::ShelfWriter;
use crate::SymbolId;
use crate::SymbolKind;
use crate::SymbolTable;

struct PendingEqu {
    symbol: SymbolId,
    expression: Expr,
}

/// Assembles one translation unit into an in-memory object model.
pub struct Assembler {
    sections: Vec<Section>,
    symbols: SymbolTable,
    current: Option<SectionId>,
    pending_equs: Vec<PendingEqu>,
    finished: bool,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    /// Create an assembler holding the null section and the null symbol.
    pub fn new() -> Self {
        let mut symbols = SymbolTable::new();
        symbols.push("", SectionId::UNDEFINED);
        Self {
            sections: vec![Section::new(SectionId::UNDEFINED, "")],
            symbols,
            current: None,
            pending_equs: Vec::new(),
            finished: false,
        }
    }

    /// Sections in output order; index 0 is the null section. The
    /// absolute pseudo-section is a sentinel id and never appears here.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|section| section.name == name)
    }

    fn require_current(&self) -> Result<SectionId, Error> {
        self.current
            .ok_or_else(|| Error::Syntax("no section was started before writing content".into()))
    }

    fn section_mut(&mut self, id: SectionId) -> &mut Section {
        &mut self.sections[id.index()]
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let current = self.require_current()?;
        self.section_mut(current).emit_bytes(bytes);
        Ok(())
    }

    /// Create-or-define `name` at the current location counter.
    pub fn define_label(&mut self, name: &str) -> Result<(), Error> {
        let current = self.require_current()?;
        let value = self.sections[current.index()].location_counter() as i32;
        match self.symbols.lookup(name) {
            Some(id) => {
                let symbol = self.symbols.symbol_mut(id);
                if symbol.defined {
                    return Err(Error::Redefined(name.into()));
                }
                symbol.section = current;
                symbol.value = value;
                symbol.defined = true;
            }
            None => {
                let id = self.symbols.push(name, current);
                let symbol = self.symbols.symbol_mut(id);
                symbol.value = value;
                symbol.defined = true;
            }
        }
        Ok(())
    }

    /// Pre-create every symbol referenced from an `.equ` expression so
    /// that evaluation only ever sees known names.
    pub fn symbol_usage_equ_handler(&mut self, name: &str) {
        if self.symbols.lookup(name).is_none() {
            self.symbols.push(name, SectionId::UNDEFINED);
        }
    }

    /// Define `name` as an absolute symbol from `expression`, deferring
    /// to the fix-point resolver when the expression is not yet
    /// evaluable.
    pub fn process_equ(&mut self, name: &str, expression: Expr) -> Result<(), Error> {
        let id = match self.symbols.lookup(name) {
            Some(id) => {
                if self.symbols.symbol(id).defined {
                    return Err(Error::Redefined(name.into()));
                }
                self.symbols.symbol_mut(id).section = SectionId::ABSOLUTE;
                id
            }
            None => self.symbols.push(name, SectionId::ABSOLUTE),
        };
        if !self.try_resolve_absolute(id, &expression)? {
            self.pending_equs.push(PendingEqu {
                symbol: id,
                expression,
            });
        }
        Ok(())
    }

    fn try_resolve_absolute(&mut self, id: SymbolId, expression: &Expr) -> Result<bool, Error> {
        let value = match expression.evaluate(&self.symbols) {
            Ok(value) => value,
            Err(error) if error.is_pending() => return Ok(false),
            Err(error) => return Err(error),
        };
        let contributions = expression.section_contributions(&self.symbols)?;
        if contributions.values().any(|count| *count != 0) {
            return Err(Error::Syntax(format!(
                "equ expression is not absolute for symbol: {}",
                self.symbols.symbol(id).name
            )));
        }
        let symbol = self.symbols.symbol_mut(id);
        symbol.value = value;
        symbol.defined = true;
        symbol.section = SectionId::ABSOLUTE;
        Ok(true)
    }

    /// Record a use of `name` at `offset` in the current section: patch
    /// absolute symbols in place, emit a relocation for defined
    /// section-relative symbols, or park a forward reference on an
    /// undefined symbol.
    fn symbol_usage(&mut self, name: &str, offset: u32, kind: RelKind) -> Result<(), Error> {
        let current = self.require_current()?;
        let reference = ForwardRef {
            offset,
            kind,
            addend: 0,
            section: current,
        };
        let Some(id) = self.symbols.lookup(name) else {
            let id = self.symbols.push(name, SectionId::UNDEFINED);
            self.symbols.symbol_mut(id).forward_refs.push(reference);
            return Ok(());
        };
        let symbol = self.symbols.symbol(id);
        if !symbol.defined {
            self.symbols.symbol_mut(id).forward_refs.push(reference);
            return Ok(());
        }
        if kind == RelKind::Disp && !symbol.section.is_absolute() {
            return Err(Error::DispRequiresAbsolute(name.into()));
        }
        if symbol.section.is_absolute() {
            self.patch_forward_ref(id, &reference)
        } else {
            self.section_mut(current).relocations.push(Relocation {
                offset,
                kind,
                addend: 0,
                symbol: id,
            });
            Ok(())
        }
    }

    /// Patch the site of `reference` with the (absolute) value of `id`.
    fn patch_forward_ref(&mut self, id: SymbolId, reference: &ForwardRef) -> Result<(), Error> {
        let value = self.symbols.symbol(id).value;
        let section = self.section_mut(reference.section);
        match reference.kind {
            RelKind::Direct => section.patch_word(reference.offset, value),
            RelKind::Disp => section.patch_disp(reference.offset, value),
            RelKind::PcRel | RelKind::None => Ok(()),
        }
    }

    /// Process one directive with its raw arguments.
    ///
    /// `.word` arguments come in (`"lit"`|`"sym"`, value) pairs, the form
    /// the source parser delivers them in.
    pub fn process_directive(&mut self, directive: &str, args: &[&str]) -> Result<(), Error> {
        match directive {
            ".global" => {
                for name in args {
                    match self.symbols.lookup(name) {
                        Some(id) => self.symbols.symbol_mut(id).binding = Binding::Global,
                        None => {
                            let id = self.symbols.push(name, SectionId::UNDEFINED);
                            self.symbols.symbol_mut(id).binding = Binding::Global;
                        }
                    }
                }
                Ok(())
            }
            ".extern" => {
                // Externs stay local for now; finalisation promotes the
                // ones that are still undefined, so a later definition in
                // this file keeps the symbol local.
                for name in args {
                    match self.symbols.lookup(name) {
                        Some(id) => self.symbols.symbol_mut(id).external = true,
                        None => {
                            let id = self.symbols.push(name, SectionId::UNDEFINED);
                            self.symbols.symbol_mut(id).external = true;
                        }
                    }
                }
                Ok(())
            }
            ".section" => {
                let name = *args
                    .first()
                    .ok_or_else(|| Error::Syntax(".section requires a name".into()))?;
                self.switch_section(name)
            }
            ".word" => {
                self.require_current()?;
                if args.len() % 2 != 0 {
                    return Err(Error::Syntax(
                        ".word arguments must be (kind, value) pairs".into(),
                    ));
                }
                for pair in args.chunks_exact(2) {
                    match pair[0] {
                        "lit" => {
                            let literal = parse_literal(pair[1])?;
                            self.emit(&encoder::word(literal))?;
                        }
                        "sym" => {
                            let current = self.require_current()?;
                            let offset = self.sections[current.index()].location_counter();
                            self.emit(&encoder::word(0))?;
                            self.symbol_usage(pair[1], offset, RelKind::Direct)?;
                        }
                        other => {
                            return Err(Error::Syntax(format!(
                                ".word argument kind must be 'lit' or 'sym', got '{other}'"
                            )))
                        }
                    }
                }
                Ok(())
            }
            ".skip" => {
                let count = parse_literal(
                    args.first()
                        .ok_or_else(|| Error::Syntax(".skip requires a byte count".into()))?,
                )?;
                if count < 0 {
                    return Err(Error::Syntax(".skip requires a non-negative count".into()));
                }
                self.emit(&vec![0_u8; count as usize])
            }
            ".ascii" => {
                let raw = *args
                    .first()
                    .ok_or_else(|| Error::Syntax(".ascii requires a string argument".into()))?;
                let bytes = unescape(raw)?;
                self.emit(&bytes)
            }
            ".end" => Ok(()),
            other => Err(Error::UnknownDirective(other.into())),
        }
    }

    fn switch_section(&mut self, name: &str) -> Result<(), Error> {
        if let Some(symbol) = self.symbols.get(name) {
            // The section's own symbol doubles as the lookup key; a
            // non-section symbol squatting on the name is a clash.
            if symbol.kind != SymbolKind::Section {
                return Err(Error::Redefined(name.into()));
            }
            self.current = Some(symbol.section);
            return Ok(());
        }
        let id = SectionId::new(self.sections.len());
        self.sections.push(Section::new(id, name));
        let symbol_id = self.symbols.push(name, id);
        let symbol = self.symbols.symbol_mut(symbol_id);
        symbol.kind = SymbolKind::Section;
        symbol.defined = true;
        self.current = Some(id);
        Ok(())
    }

    /// Encode one instruction into the current section, registering a
    /// patch site for the symbolic addressing variants.
    pub fn process_instruction(&mut self, mnemonic: &str, operands: &[&str]) -> Result<(), Error> {
        self.require_current()?;
        match mnemonic {
            "halt" => self.emit(&encoder::halt()?),
            "int" => self.emit(&encoder::int()?),
            "iret" => self.emit(&encoder::iret()?),
            "ret" => self.emit(&encoder::ret()?),
            "calllit" => {
                let literal = parse_literal(operand(operands, 0)?)?;
                self.emit(&encoder::call(literal)?)
            }
            "callsym" => {
                let name = operand(operands, 0)?;
                self.emit_with_symbol(&encoder::call(0)?, encoder::CALL_PATCH_OFFSET, name)
            }
            "jmplit" => {
                let literal = parse_literal(operand(operands, 0)?)?;
                self.emit(&encoder::jmp(literal)?)
            }
            "jmpsym" => {
                let name = operand(operands, 0)?;
                self.emit_with_symbol(&encoder::jmp(0)?, encoder::JMP_PATCH_OFFSET, name)
            }
            "beqlit" | "bnelit" | "bgtlit" => {
                let gpr1 = parse_gpr(operand(operands, 0)?)?;
                let gpr2 = parse_gpr(operand(operands, 1)?)?;
                let literal = parse_literal(operand(operands, 2)?)?;
                let bytes = match mnemonic {
                    "beqlit" => encoder::beq(gpr1, gpr2, literal)?,
                    "bnelit" => encoder::bne(gpr1, gpr2, literal)?,
                    _ => encoder::bgt(gpr1, gpr2, literal)?,
                };
                self.emit(&bytes)
            }
            "beqsym" | "bnesym" | "bgtsym" => {
                let gpr1 = parse_gpr(operand(operands, 0)?)?;
                let gpr2 = parse_gpr(operand(operands, 1)?)?;
                let name = operand(operands, 2)?;
                let bytes = match mnemonic {
                    "beqsym" => encoder::beq(gpr1, gpr2, 0)?,
                    "bnesym" => encoder::bne(gpr1, gpr2, 0)?,
                    _ => encoder::bgt(gpr1, gpr2, 0)?,
                };
                self.emit_with_symbol(&bytes, encoder::CONDJMP_PATCH_OFFSET, name)
            }
            "push" | "pop" | "not" => {
                let gpr = parse_gpr(operand(operands, 0)?)?;
                let bytes = match mnemonic {
                    "push" => encoder::push(gpr)?,
                    "pop" => encoder::pop(gpr)?,
                    _ => encoder::not(gpr)?,
                };
                self.emit(&bytes)
            }
            "xchg" | "add" | "sub" | "mul" | "div" | "and" | "or" | "xor" | "shl" | "shr" => {
                let gpr_s = parse_gpr(operand(operands, 0)?)?;
                let gpr_d = parse_gpr(operand(operands, 1)?)?;
                let bytes = match mnemonic {
                    "xchg" => encoder::xchg(gpr_s, gpr_d)?,
                    "add" => encoder::add(gpr_s, gpr_d)?,
                    "sub" => encoder::sub(gpr_s, gpr_d)?,
                    "mul" => encoder::mul(gpr_s, gpr_d)?,
                    "div" => encoder::div(gpr_s, gpr_d)?,
                    "and" => encoder::and(gpr_s, gpr_d)?,
                    "or" => encoder::or(gpr_s, gpr_d)?,
                    "xor" => encoder::xor(gpr_s, gpr_d)?,
                    "shl" => encoder::shl(gpr_s, gpr_d)?,
                    _ => encoder::shr(gpr_s, gpr_d)?,
                };
                self.emit(&bytes)
            }
            "ldimm" => {
                let literal = parse_literal(operand(operands, 0)?)?;
                let gpr = parse_gpr(operand(operands, 1)?)?;
                self.emit(&encoder::ld_immediate(gpr, literal)?)
            }
            "ldsym" => {
                let name = operand(operands, 0)?;
                let gpr = parse_gpr(operand(operands, 1)?)?;
                self.emit_with_symbol(
                    &encoder::ld_immediate(gpr, 0)?,
                    encoder::LD_IMM_PATCH_OFFSET,
                    name,
                )
            }
            "ldlit" => {
                let literal = parse_literal(operand(operands, 0)?)?;
                let gpr = parse_gpr(operand(operands, 1)?)?;
                self.emit(&encoder::ld_memory(gpr, literal)?)
            }
            "ldsymabs" => {
                let name = operand(operands, 0)?;
                let gpr = parse_gpr(operand(operands, 1)?)?;
                self.emit_with_symbol(
                    &encoder::ld_memory(gpr, 0)?,
                    encoder::LD_MEM_PATCH_OFFSET,
                    name,
                )
            }
            "ldreg" => {
                let reg = parse_gpr(operand(operands, 0)?)?;
                let gpr = parse_gpr(operand(operands, 1)?)?;
                self.emit(&encoder::ld_register(gpr, reg)?)
            }
            "ldind" => {
                let reg = parse_gpr(operand(operands, 0)?)?;
                let gpr = parse_gpr(operand(operands, 1)?)?;
                self.emit(&encoder::ld_register_indirect(gpr, reg)?)
            }
            "ldindlit" => {
                let reg = parse_gpr(operand(operands, 0)?)?;
                let literal = parse_literal(operand(operands, 1)?)?;
                let gpr = parse_gpr(operand(operands, 2)?)?;
                self.emit(&encoder::ld_register_indirect_disp(gpr, reg, literal)?)
            }
            "ldindsym" => {
                let reg = parse_gpr(operand(operands, 0)?)?;
                let name = operand(operands, 1)?;
                let gpr = parse_gpr(operand(operands, 2)?)?;
                let bytes = encoder::ld_register_indirect_disp(gpr, reg, 0)?;
                self.emit_with_disp_symbol(&bytes, encoder::LD_IND_DISP_PATCH_OFFSET, name)
            }
            "stlit" => {
                let gpr = parse_gpr(operand(operands, 0)?)?;
                let literal = parse_literal(operand(operands, 1)?)?;
                self.emit(&encoder::st_direct(gpr, literal)?)
            }
            "stsymabs" => {
                let gpr = parse_gpr(operand(operands, 0)?)?;
                let name = operand(operands, 1)?;
                self.emit_with_symbol(
                    &encoder::st_direct(gpr, 0)?,
                    encoder::ST_DIR_PATCH_OFFSET,
                    name,
                )
            }
            "stind" => {
                let gpr = parse_gpr(operand(operands, 0)?)?;
                let reg = parse_gpr(operand(operands, 1)?)?;
                self.emit(&encoder::st_register_indirect(gpr, reg)?)
            }
            "stindlit" => {
                let gpr = parse_gpr(operand(operands, 0)?)?;
                let reg = parse_gpr(operand(operands, 1)?)?;
                let literal = parse_literal(operand(operands, 2)?)?;
                self.emit(&encoder::st_register_indirect_disp(gpr, reg, literal)?)
            }
            "stindsym" => {
                let gpr = parse_gpr(operand(operands, 0)?)?;
                let reg = parse_gpr(operand(operands, 1)?)?;
                let name = operand(operands, 2)?;
                let bytes = encoder::st_register_indirect_disp(gpr, reg, 0)?;
                self.emit_with_disp_symbol(&bytes, encoder::ST_IND_DISP_PATCH_OFFSET, name)
            }
            "csrrd" => {
                let csr = parse_csr(operand(operands, 0)?)?;
                let gpr = parse_gpr(operand(operands, 1)?)?;
                self.emit(&encoder::csrrd(csr, gpr)?)
            }
            "csrwr" => {
                let gpr = parse_gpr(operand(operands, 0)?)?;
                let csr = parse_csr(operand(operands, 1)?)?;
                self.emit(&encoder::csrwr(gpr, csr)?)
            }
            other => Err(Error::UnknownMnemonic(other.into())),
        }
    }

    fn emit_with_symbol(&mut self, bytes: &[u8], patch_offset: u32, name: &str) -> Result<(), Error> {
        let current = self.require_current()?;
        let offset = self.sections[current.index()].location_counter() + patch_offset;
        self.emit(bytes)?;
        self.symbol_usage(name, offset, RelKind::Direct)
    }

    fn emit_with_disp_symbol(
        &mut self,
        bytes: &[u8],
        patch_offset: u32,
        name: &str,
    ) -> Result<(), Error> {
        let current = self.require_current()?;
        let offset = self.sections[current.index()].location_counter() + patch_offset;
        self.emit(bytes)?;
        self.symbol_usage(name, offset, RelKind::Disp)
    }

    /// Finalise the object model. The phase order is load-bearing:
    /// absolute EQUs must resolve before forward references are patched,
    /// and relocations can only be rewritten onto section symbols once
    /// back-patching has emitted all of them.
    pub fn finish(&mut self) -> Result<(), Error> {
        if self.finished {
            return Ok(());
        }
        log::trace!("Resolving absolute definitions");
        self.resolve_absolutes()?;
        log::trace!("Back-patching forward references");
        self.back_patch()?;
        log::trace!("Rewriting local relocations onto section symbols");
        self.correct_relocations()?;
        self.finished = true;
        Ok(())
    }

    /// Finalise and stream the object file.
    pub fn write_object<W: ShelfWrite>(&mut self, writer: &mut W) -> Result<(), Error> {
        self.finish()?;
        ShelfWriter::new(&self.sections, self.symbols.as_slice()).write(writer)
    }

    fn resolve_absolutes(&mut self) -> Result<(), Error> {
        let mut pending = mem::take(&mut self.pending_equs);
        while !pending.is_empty() {
            let mut progress = false;
            let mut remaining = Vec::new();
            for equ in pending {
                if self.try_resolve_absolute(equ.symbol, &equ.expression)? {
                    progress = true;
                } else {
                    remaining.push(equ);
                }
            }
            pending = remaining;
            if !progress {
                break;
            }
        }
        if pending.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = pending
            .iter()
            .map(|equ| self.symbols.symbol(equ.symbol).name.as_str())
            .collect();
        Err(Error::UnresolvedEqu(names.join(" ")))
    }

    fn back_patch(&mut self) -> Result<(), Error> {
        for index in 0..self.symbols.len() {
            let id = SymbolId::new(index);
            let symbol = self.symbols.symbol(id);
            if !symbol.defined {
                let nameable = symbol.binding == Binding::Global
                    || symbol.external
                    || symbol.name.is_empty();
                if !nameable {
                    return Err(Error::UndefinedSymbol(symbol.name.clone()));
                }
                // An extern that stayed undefined becomes global so the
                // linker can resolve it.
                if symbol.external {
                    self.symbols.symbol_mut(id).binding = Binding::Global;
                }
            }
            let refs = mem::take(&mut self.symbols.symbol_mut(id).forward_refs);
            let (section, value, name) = {
                let symbol = self.symbols.symbol(id);
                (symbol.section, symbol.value, symbol.name.clone())
            };
            for reference in refs {
                if reference.kind == RelKind::Disp && !section.is_absolute() {
                    return Err(Error::DispRequiresAbsolute(name.clone()));
                }
                if section.is_absolute() {
                    self.patch_forward_ref(id, &reference)?;
                    continue;
                }
                if !section.is_undefined() && reference.kind == RelKind::Direct {
                    // The relocation carries the same information, but the
                    // patched bytes keep the object self-describing.
                    self.section_mut(reference.section)
                        .patch_word(reference.offset, value)?;
                }
                self.section_mut(reference.section)
                    .relocations
                    .push(Relocation {
                        offset: reference.offset,
                        kind: reference.kind,
                        addend: 0,
                        symbol: id,
                    });
            }
        }
        Ok(())
    }

    fn correct_relocations(&mut self) -> Result<(), Error> {
        for section_index in 0..self.sections.len() {
            for relocation_index in 0..self.sections[section_index].relocations.len() {
                let symbol_id = self.sections[section_index].relocations[relocation_index].symbol;
                let symbol = self.symbols.symbol(symbol_id);
                if symbol.binding != Binding::Local {
                    continue;
                }
                if symbol.section.is_absolute() || symbol.section.is_undefined() {
                    return Err(Error::Internal(
                        "local relocation target has no home section",
                    ));
                }
                let value = symbol.value;
                let section_name = self.sections[symbol.section.index()].name.clone();
                let section_symbol = self
                    .symbols
                    .lookup(&section_name)
                    .ok_or(Error::Internal("section has no section symbol"))?;
                let relocation = &mut self.sections[section_index].relocations[relocation_index];
                relocation.addend = value;
                relocation.symbol = section_symbol;
            }
        }
        Ok(())
    }
}

fn operand<'a>(operands: &[&'a str], index: usize) -> Result<&'a str, Error> {
    operands
        .get(index)
        .copied()
        .ok_or_else(|| Error::Syntax(format!("missing operand {index}")))
}

fn parse_literal(text: &str) -> Result<i32, Error> {
    if let Ok(value) = text.parse::<i32>() {
        return Ok(value);
    }
    // Accept the full unsigned 32-bit range; values wrap into i32.
    text.parse::<u32>()
        .map(|value| value as i32)
        .map_err(|_| Error::Syntax(format!("invalid literal: {text}")))
}

fn parse_gpr(text: &str) -> Result<u8, Error> {
    match text.parse::<u8>() {
        Ok(index) if index <= 15 => Ok(index),
        _ => Err(Error::Syntax(format!("invalid register index: {text}"))),
    }
}

fn parse_csr(text: &str) -> Result<u8, Error> {
    match text.parse::<u8>() {
        Ok(index) if index <= 2 => Ok(index),
        _ => Err(Error::Syntax(format!(
            "invalid control register index: {text}"
        ))),
    }
}

fn unescape(raw: &str) -> Result<Vec<u8>, Error> {
    let mut bytes = Vec::with_capacity(raw.len());
    let mut chars = raw.bytes();
    while let Some(byte) = chars.next() {
        if byte != b'\\' {
            bytes.push(byte);
            continue;
        }
        let escape = chars
            .next()
            .ok_or_else(|| Error::Syntax("invalid escape sequence at end of string".into()))?;
        bytes.push(match escape {
            b'n' => b'\n',
            b't' => b'\t',
            b'r' => b'\r',
            b'0' => 0,
            // Unrecognised escapes emit the character itself.
            other => other,
        });
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::SectionId;

    #[test]
    fn absolute_equ_patches_word_without_relocation() {
        let mut asm = Assembler::new();
        asm.process_equ("A", Expr::add(Expr::number(3), Expr::number(5)))
            .expect("equ");
        asm.process_directive(".section", &[".text"]).expect("section");
        asm.process_directive(".word", &["sym", "A"]).expect("word");
        asm.finish().expect("finish");

        let text = asm.section_by_name(".text").expect(".text");
        assert_eq!(&[0x08, 0, 0, 0], text.contents());
        assert!(text.relocations.is_empty());
        let a = asm.symbols().get("A").expect("A");
        assert_eq!(8, a.value);
        assert!(a.defined);
        assert!(a.section.is_absolute());
    }

    #[test]
    fn forward_reference_in_same_section() {
        let mut asm = Assembler::new();
        asm.process_directive(".section", &[".text"]).expect("section");
        asm.process_instruction("jmpsym", &["L"]).expect("jmp");
        asm.process_instruction("halt", &[]).expect("halt");
        asm.define_label("L").expect("label");
        asm.process_instruction("halt", &[]).expect("halt");
        asm.finish().expect("finish");

        let text = asm.section_by_name(".text").expect(".text");
        assert_eq!(16, text.contents().len());
        assert_eq!(&[0x0C, 0, 0, 0], &text.contents()[4..8]);
        assert_eq!(1, text.relocations.len());
        let relocation = text.relocations[0];
        assert_eq!(4, relocation.offset);
        assert_eq!(RelKind::Direct, relocation.kind);
        assert_eq!(12, relocation.addend);
        let target = asm.symbols().symbol(relocation.symbol);
        assert_eq!(SymbolKind::Section, target.kind);
        assert_eq!(".text", target.name);
    }

    #[test]
    fn undefined_extern_becomes_global_relocation() {
        let mut asm = Assembler::new();
        asm.process_directive(".extern", &["foo"]).expect("extern");
        asm.process_directive(".section", &[".text"]).expect("section");
        asm.process_instruction("callsym", &["foo"]).expect("call");
        asm.finish().expect("finish");

        let foo = asm.symbols().get("foo").expect("foo");
        assert_eq!(Binding::Global, foo.binding);
        assert!(!foo.defined);
        assert!(foo.section.is_undefined());
        let text = asm.section_by_name(".text").expect(".text");
        assert_eq!(12, text.contents().len());
        let relocation = text.relocations[0];
        assert_eq!(8, relocation.offset);
        assert_eq!(0, relocation.addend);
        assert_eq!(foo.id, relocation.symbol);
    }

    #[test]
    fn extern_defined_in_same_file_stays_local() {
        let mut asm = Assembler::new();
        asm.process_directive(".extern", &["here"]).expect("extern");
        asm.process_directive(".section", &[".text"]).expect("section");
        asm.define_label("here").expect("label");
        asm.finish().expect("finish");
        let here = asm.symbols().get("here").expect("here");
        assert_eq!(Binding::Local, here.binding);
        assert!(here.defined);
    }

    #[test]
    fn undefined_local_fails() {
        let mut asm = Assembler::new();
        asm.process_directive(".section", &[".text"]).expect("section");
        asm.process_instruction("callsym", &["nowhere"]).expect("call");
        assert!(matches!(
            asm.finish(),
            Err(Error::UndefinedSymbol(name)) if name == "nowhere"
        ));
    }

    #[test]
    fn redefinition_fails() {
        let mut asm = Assembler::new();
        asm.process_directive(".section", &[".text"]).expect("section");
        asm.define_label("twice").expect("label");
        assert!(matches!(
            asm.define_label("twice"),
            Err(Error::Redefined(name)) if name == "twice"
        ));
    }

    #[test]
    fn content_outside_any_section_fails() {
        let mut asm = Assembler::new();
        assert!(asm.process_instruction("halt", &[]).is_err());
        assert!(asm.define_label("stray").is_err());
    }

    #[test]
    fn equ_chain_resolves_by_fix_point() {
        let mut asm = Assembler::new();
        // c -> b -> a, delivered in dependency-inverted order.
        asm.symbol_usage_equ_handler("b");
        asm.process_equ("c", Expr::add(Expr::symbol("b"), Expr::number(1)))
            .expect("equ c");
        asm.symbol_usage_equ_handler("a");
        asm.process_equ("b", Expr::add(Expr::symbol("a"), Expr::number(1)))
            .expect("equ b");
        asm.process_equ("a", Expr::number(40)).expect("equ a");
        asm.finish().expect("finish");
        assert_eq!(41, asm.symbols().get("b").expect("b").value);
        assert_eq!(42, asm.symbols().get("c").expect("c").value);
    }

    #[test]
    fn cyclic_equ_names_every_pending_symbol() {
        let mut asm = Assembler::new();
        asm.symbol_usage_equ_handler("y");
        asm.process_equ("x", Expr::symbol("y")).expect("equ x");
        asm.process_equ("y", Expr::symbol("x")).expect("equ y");
        let error = asm.finish().expect_err("cycle");
        match error {
            Error::UnresolvedEqu(names) => {
                assert!(names.contains('x'));
                assert!(names.contains('y'));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn equ_of_section_difference_is_absolute() {
        let mut asm = Assembler::new();
        asm.process_directive(".section", &[".text"]).expect("section");
        asm.define_label("start").expect("start");
        asm.process_instruction("halt", &[]).expect("halt");
        asm.define_label("stop").expect("stop");
        asm.symbol_usage_equ_handler("stop");
        asm.symbol_usage_equ_handler("start");
        asm.process_equ("len", Expr::sub(Expr::symbol("stop"), Expr::symbol("start")))
            .expect("equ");
        asm.finish().expect("finish");
        let len = asm.symbols().get("len").expect("len");
        assert_eq!(4, len.value);
        assert!(len.section.is_absolute());
    }

    #[test]
    fn equ_with_unbalanced_section_reference_fails() {
        let mut asm = Assembler::new();
        asm.process_directive(".section", &[".text"]).expect("section");
        asm.define_label("start").expect("start");
        asm.symbol_usage_equ_handler("start");
        assert!(matches!(
            asm.process_equ("bad", Expr::symbol("start")),
            Err(Error::Syntax(_))
        ));
    }

    #[test]
    fn disp_site_requires_absolute_symbol() {
        let mut asm = Assembler::new();
        asm.process_directive(".section", &[".text"]).expect("section");
        asm.define_label("near").expect("label");
        assert!(matches!(
            asm.process_instruction("ldindsym", &["1", "near", "2"]),
            Err(Error::DispRequiresAbsolute(name)) if name == "near"
        ));
    }

    #[test]
    fn disp_site_patches_absolute_symbol_in_place() {
        let mut asm = Assembler::new();
        asm.process_equ("OFF", Expr::number(-4)).expect("equ");
        asm.process_directive(".section", &[".text"]).expect("section");
        asm.process_instruction("ldindsym", &["2", "OFF", "1"])
            .expect("ld");
        asm.finish().expect("finish");
        let text = asm.section_by_name(".text").expect(".text");
        assert_eq!(&[0x92, 0x12, 0x0F, 0xFC], text.contents());
        assert!(text.relocations.is_empty());
    }

    #[test]
    fn forward_disp_to_out_of_range_absolute_fails() {
        let mut asm = Assembler::new();
        asm.process_directive(".section", &[".text"]).expect("section");
        asm.process_instruction("stindsym", &["1", "2", "FAR"])
            .expect("st");
        asm.process_equ("FAR", Expr::number(4096)).expect("equ");
        assert!(matches!(asm.finish(), Err(Error::OutOfRangeDisp(4096))));
    }

    #[test]
    fn ascii_escapes() {
        let mut asm = Assembler::new();
        asm.process_directive(".section", &[".data"]).expect("section");
        asm.process_directive(".ascii", &["a\\n\\t\\0\\qz"])
            .expect("ascii");
        let data = asm.section_by_name(".data").expect(".data");
        assert_eq!(b"a\n\t\0qz", data.contents());
    }

    #[test]
    fn skip_emits_zeroes() {
        let mut asm = Assembler::new();
        asm.process_directive(".section", &[".bss"]).expect("section");
        asm.process_directive(".skip", &["6"]).expect("skip");
        let bss = asm.section_by_name(".bss").expect(".bss");
        assert_eq!(&[0; 6], bss.contents());
        assert_eq!(6, bss.location_counter());
    }

    #[test]
    fn section_switching_resumes_location_counter() {
        let mut asm = Assembler::new();
        asm.process_directive(".section", &[".text"]).expect("section");
        asm.process_instruction("halt", &[]).expect("halt");
        asm.process_directive(".section", &[".data"]).expect("section");
        asm.process_directive(".word", &["lit", "7"]).expect("word");
        asm.process_directive(".section", &[".text"]).expect("section");
        asm.process_instruction("halt", &[]).expect("halt");
        asm.finish().expect("finish");
        assert_eq!(
            8,
            asm.section_by_name(".text").expect(".text").contents().len()
        );
        assert_eq!(
            4,
            asm.section_by_name(".data").expect(".data").contents().len()
        );
    }

    #[test]
    fn finalised_relocations_reference_globals_or_section_symbols() {
        let mut asm = Assembler::new();
        asm.process_directive(".extern", &["far"]).expect("extern");
        asm.process_directive(".section", &[".text"]).expect("section");
        asm.process_instruction("callsym", &["local_target"])
            .expect("call");
        asm.process_instruction("callsym", &["far"]).expect("call");
        asm.define_label("local_target").expect("label");
        asm.process_directive(".section", &[".data"]).expect("section");
        asm.process_directive(".word", &["sym", "local_target", "sym", "far"])
            .expect("word");
        asm.finish().expect("finish");
        for section in asm.sections() {
            for relocation in &section.relocations {
                let symbol = asm.symbols().symbol(relocation.symbol);
                assert!(
                    symbol.binding == Binding::Global || symbol.kind == SymbolKind::Section,
                    "relocation against local non-section symbol {}",
                    symbol.name
                );
            }
        }
        // The null section never accumulates content.
        assert_eq!(SectionId::UNDEFINED, asm.sections()[0].id);
        assert!(asm.sections()[0].contents().is_empty());
    }
}
