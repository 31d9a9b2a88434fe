use std::collections::BTreeMap;

use crate::Error;
use crate::SectionId;
use crate::SymbolTable;

/// An assembly-time constant expression, as produced by the source parser
/// for `.equ` definitions.
#[derive(Clone, Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum Expr {
    Number(i32),
    Symbol(String),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Evaluate against the symbol table with wrapping 32-bit arithmetic.
    ///
    /// Returns [`Error::UndefinedSymbol`] when a referenced symbol exists
    /// but has no value yet; that outcome is the reschedule sentinel of
    /// the EQU fix-point, not a failure. A name missing from the table
    /// entirely is an internal error, since every symbol referenced in an
    /// expression is pre-created when the expression is accepted.
    pub fn evaluate(&self, symbols: &SymbolTable) -> Result<i32, Error> {
        match self {
            Expr::Number(value) => Ok(*value),
            Expr::Symbol(name) => {
                let symbol = symbols
                    .get(name)
                    .ok_or(Error::Internal("expression references unknown symbol"))?;
                if !symbol.defined {
                    return Err(Error::UndefinedSymbol(name.clone()));
                }
                Ok(symbol.value)
            }
            Expr::Neg(operand) => Ok(operand.evaluate(symbols)?.wrapping_neg()),
            Expr::Add(left, right) => {
                Ok(left.evaluate(symbols)?.wrapping_add(right.evaluate(symbols)?))
            }
            Expr::Sub(left, right) => {
                Ok(left.evaluate(symbols)?.wrapping_sub(right.evaluate(symbols)?))
            }
        }
    }

    /// Tally how often each non-absolute section appears, with sign.
    ///
    /// An expression defines an absolute value exactly when every count in
    /// the result is zero; section-relative terms must cancel out.
    pub fn section_contributions(
        &self,
        symbols: &SymbolTable,
    ) -> Result<BTreeMap<SectionId, i32>, Error> {
        let mut counts = BTreeMap::new();
        self.fold_contributions(symbols, 1, &mut counts)?;
        Ok(counts)
    }

    fn fold_contributions(
        &self,
        symbols: &SymbolTable,
        sign: i32,
        counts: &mut BTreeMap<SectionId, i32>,
    ) -> Result<(), Error> {
        match self {
            Expr::Number(_) => Ok(()),
            Expr::Symbol(name) => {
                let symbol = symbols
                    .get(name)
                    .ok_or(Error::Internal("expression references unknown symbol"))?;
                if !symbol.defined {
                    return Err(Error::UndefinedSymbol(name.clone()));
                }
                if !symbol.section.is_absolute() {
                    *counts.entry(symbol.section).or_insert(0) += sign;
                }
                Ok(())
            }
            Expr::Neg(operand) => operand.fold_contributions(symbols, -sign, counts),
            Expr::Add(left, right) => {
                left.fold_contributions(symbols, sign, counts)?;
                right.fold_contributions(symbols, sign, counts)
            }
            Expr::Sub(left, right) => {
                left.fold_contributions(symbols, sign, counts)?;
                right.fold_contributions(symbols, -sign, counts)
            }
        }
    }

    /// Shorthand used by tests and by callers building expressions by hand.
    pub fn number(value: i32) -> Expr {
        Expr::Number(value)
    }

    pub fn symbol(name: impl Into<String>) -> Expr {
        Expr::Symbol(name.into())
    }

    pub fn neg(operand: Expr) -> Expr {
        Expr::Neg(Box::new(operand))
    }

    pub fn add(left: Expr, right: Expr) -> Expr {
        Expr::Add(Box::new(left), Box::new(right))
    }

    pub fn sub(left: Expr, right: Expr) -> Expr {
        Expr::Sub(Box::new(left), Box::new(right))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SymbolTable {
        let mut symbols = SymbolTable::new();
        symbols.push("", SectionId::UNDEFINED);
        let eight = symbols.push("eight", SectionId::ABSOLUTE);
        let label = symbols.push("label", SectionId::new(1));
        let other = symbols.push("other", SectionId::new(1));
        symbols.push("pending", SectionId::UNDEFINED);
        for (id, value) in [(eight, 8), (label, 4), (other, 16)] {
            let symbol = symbols.symbol_mut(id);
            symbol.value = value;
            symbol.defined = true;
        }
        symbols
    }

    #[test]
    fn evaluates_arithmetic() {
        let symbols = table();
        let expr = Expr::add(Expr::number(3), Expr::number(5));
        assert_eq!(8, expr.evaluate(&symbols).expect("constant"));
        let expr = Expr::sub(Expr::symbol("other"), Expr::neg(Expr::symbol("eight")));
        assert_eq!(24, expr.evaluate(&symbols).expect("defined"));
    }

    #[test]
    fn wraps_on_overflow() {
        let symbols = table();
        let expr = Expr::add(Expr::number(i32::MAX), Expr::number(1));
        assert_eq!(i32::MIN, expr.evaluate(&symbols).expect("wraps"));
    }

    #[test]
    fn undefined_symbol_is_the_pending_sentinel() {
        let symbols = table();
        let expr = Expr::add(Expr::symbol("pending"), Expr::number(1));
        let err = expr.evaluate(&symbols).expect_err("pending");
        assert!(err.is_pending());
    }

    #[test]
    fn contributions_cancel_within_a_section() {
        let symbols = table();
        let expr = Expr::sub(Expr::symbol("other"), Expr::symbol("label"));
        let counts = expr.section_contributions(&symbols).expect("defined");
        assert_eq!(Some(&0), counts.get(&SectionId::new(1)));
    }

    #[test]
    fn absolute_symbols_contribute_nothing() {
        let symbols = table();
        let expr = Expr::add(Expr::symbol("eight"), Expr::number(2));
        let counts = expr.section_contributions(&symbols).expect("defined");
        assert!(counts.is_empty());
    }

    #[test]
    fn unbalanced_reference_is_visible() {
        let symbols = table();
        let expr = Expr::add(Expr::symbol("label"), Expr::symbol("eight"));
        let counts = expr.section_contributions(&symbols).expect("defined");
        assert_eq!(Some(&1), counts.get(&SectionId::new(1)));
    }
}
