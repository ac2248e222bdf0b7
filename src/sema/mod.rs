//! Symbol table and type rules.
//!
//! The language has one program-wide scope. `let` declares a variable and
//! assigns it the next frame slot; every other use of a name must resolve to
//! an earlier declaration.

use hashbrown::HashMap;
use std::fmt;
use thiserror::Error;

use crate::core::error::Span;
use crate::ir::{SlotInfo, Slot};

/// Value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Bool,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Bool => write!(f, "bool"),
        }
    }
}

/// Name resolution and typing failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SemaError {
    #[error("{span}: unresolved identifier `{name}`")]
    UnresolvedIdentifier { name: String, span: Span },

    #[error("{span}: type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: Type,
        found: Type,
        span: Span,
    },

    #[error("{span}: operands of `{op}` have different types ({lhs} and {rhs})")]
    OperandMismatch {
        op: String,
        lhs: Type,
        rhs: Type,
        span: Span,
    },

    #[error("{span}: `{name}` is already declared (first at {first})")]
    Redeclared {
        name: String,
        first: Span,
        span: Span,
    },
}

/// A declared variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    pub slot: Slot,
    pub ty: Type,
    pub declared_at: Span,
}

/// Program-wide variable table.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, Symbol>,
    slots: Vec<SlotInfo>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `name` with type `ty` in the next free slot.
    pub fn declare(&mut self, name: &str, ty: Type, span: Span) -> Result<Symbol, SemaError> {
        if let Some(existing) = self.symbols.get(name) {
            return Err(SemaError::Redeclared {
                name: name.to_string(),
                first: existing.declared_at,
                span,
            });
        }
        let symbol = Symbol {
            slot: self.slots.len() as Slot,
            ty,
            declared_at: span,
        };
        self.symbols.insert(name.to_string(), symbol);
        self.slots.push(SlotInfo {
            name: name.to_string(),
            ty,
        });
        Ok(symbol)
    }

    pub fn lookup(&self, name: &str, span: Span) -> Result<Symbol, SemaError> {
        self.symbols
            .get(name)
            .copied()
            .ok_or_else(|| SemaError::UnresolvedIdentifier {
                name: name.to_string(),
                span,
            })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot table in declaration order.
    pub fn into_slots(self) -> Vec<SlotInfo> {
        self.slots
    }
}

/// Require `found` to be `expected`.
pub fn expect_type(context: &str, expected: Type, found: Type, span: Span) -> Result<(), SemaError> {
    if expected == found {
        Ok(())
    } else {
        Err(SemaError::TypeMismatch {
            context: context.to_string(),
            expected,
            found,
            span,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_assigns_consecutive_slots() {
        let mut table = SymbolTable::new();
        let a = table.declare("a", Type::Int, Span::new(1, 5)).unwrap();
        let b = table.declare("b", Type::Bool, Span::new(2, 5)).unwrap();
        assert_eq!(a.slot, 0);
        assert_eq!(b.slot, 1);
        assert_eq!(table.lookup("b", Span::new(3, 1)).unwrap().ty, Type::Bool);
        let slots = table.into_slots();
        assert_eq!(slots[0].name, "a");
        assert_eq!(slots[1].ty, Type::Bool);
    }

    #[test]
    fn test_redeclaration_reports_both_locations() {
        let mut table = SymbolTable::new();
        table.declare("x", Type::Int, Span::new(1, 5)).unwrap();
        let err = table.declare("x", Type::Bool, Span::new(4, 5)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "4:5: `x` is already declared (first at 1:5)"
        );
    }

    #[test]
    fn test_unresolved_identifier() {
        let table = SymbolTable::new();
        let err = table.lookup("ghost", Span::new(2, 7)).unwrap_err();
        assert_eq!(err.to_string(), "2:7: unresolved identifier `ghost`");
    }

    #[test]
    fn test_expect_type() {
        assert!(expect_type("if condition", Type::Bool, Type::Bool, Span::default()).is_ok());
        let err = expect_type("if condition", Type::Bool, Type::Int, Span::new(3, 4)).unwrap_err();
        assert!(err.to_string().contains("expected bool, found int"));
    }
}
