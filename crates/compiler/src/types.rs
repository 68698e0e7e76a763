//! Type system for Seron
//!
//! Types are a closed sum: the scalar types, pointers, procedure types
//! carrying a signature, and named table references. `Invalid` marks
//! parser/analyzer failure states and must never reach code generation.

use crate::lexer::TokenKind;
use std::fmt;

/// Upper bound on procedure parameters. Exceeding it is a parse error.
pub const MAX_PARAM_COUNT: usize = 64;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Type {
    Invalid,
    #[default]
    Void,
    Char,
    Int,
    Long,
    Pointer(Box<Type>),
    Proc(Box<ProcSignature>),
    /// Reference to a table declaration by name. Compile-time only.
    Table(String),
}

impl Type {
    /// Map a type-keyword token to its type. `None` for non-type tokens.
    pub fn from_token_keyword(kind: TokenKind) -> Option<Type> {
        match kind {
            TokenKind::TypeVoid => Some(Type::Void),
            TokenKind::TypeChar => Some(Type::Char),
            TokenKind::TypeInt => Some(Type::Int),
            TokenKind::TypeLong => Some(Type::Long),
            _ => None,
        }
    }

    /// char, int and long. Conditions and logical operands must satisfy
    /// this; pointers do not.
    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Char | Type::Int | Type::Long)
    }

    /// Natural size in bytes of a value of this type, or `None` for types
    /// that have no runtime representation (void, tables, invalid).
    pub fn size(&self) -> Option<u64> {
        match self {
            Type::Char => Some(1),
            Type::Int => Some(4),
            Type::Long | Type::Pointer(_) | Type::Proc(_) => Some(8),
            Type::Invalid | Type::Void | Type::Table(_) => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Invalid => write!(f, "invalid"),
            Type::Void => write!(f, "void"),
            Type::Char => write!(f, "char"),
            Type::Int => write!(f, "int"),
            Type::Long => write!(f, "long"),
            Type::Pointer(pointee) => write!(f, "*{}", pointee),
            Type::Proc(sig) => {
                write!(f, "proc(")?;
                for (i, param) in sig.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", param.ty)?;
                }
                write!(f, ")")?;
                if sig.returntype != Type::Void {
                    write!(f, " {}", sig.returntype)?;
                }
                Ok(())
            }
            Type::Table(name) => write!(f, "table {}", name),
        }
    }
}

/// One parameter (or table field): identifier plus type.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub ident: String,
    pub ty: Type,
}

/// Parameter list and return type of a procedure type.
#[derive(Debug, Clone, Default)]
pub struct ProcSignature {
    pub params: Vec<Param>,
    pub returntype: Type,
}

// Signature equality is structural: parameter types and return type.
// Parameter names are not part of the type.
impl PartialEq for ProcSignature {
    fn eq(&self, other: &Self) -> bool {
        self.returntype == other.returntype
            && self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(&other.params)
                .all(|(a, b)| a.ty == b.ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(Type::Char.size(), Some(1));
        assert_eq!(Type::Int.size(), Some(4));
        assert_eq!(Type::Long.size(), Some(8));
        assert_eq!(Type::Pointer(Box::new(Type::Char)).size(), Some(8));
        assert_eq!(Type::Proc(Box::new(ProcSignature::default())).size(), Some(8));
        assert_eq!(Type::Void.size(), None);
        assert_eq!(Type::Table("vec".into()).size(), None);
    }

    #[test]
    fn test_structural_equality() {
        let a = Type::Pointer(Box::new(Type::Pointer(Box::new(Type::Int))));
        let b = Type::Pointer(Box::new(Type::Pointer(Box::new(Type::Int))));
        let c = Type::Pointer(Box::new(Type::Int));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_signature_equality_ignores_param_names() {
        let a = ProcSignature {
            params: vec![Param { ident: "a".into(), ty: Type::Int }],
            returntype: Type::Int,
        };
        let b = ProcSignature {
            params: vec![Param { ident: "other".into(), ty: Type::Int }],
            returntype: Type::Int,
        };
        let c = ProcSignature {
            params: vec![Param { ident: "a".into(), ty: Type::Long }],
            returntype: Type::Int,
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_display() {
        assert_eq!(Type::Pointer(Box::new(Type::Char)).to_string(), "*char");
        let sig = ProcSignature {
            params: vec![
                Param { ident: "a".into(), ty: Type::Int },
                Param { ident: "b".into(), ty: Type::Pointer(Box::new(Type::Int)) },
            ],
            returntype: Type::Int,
        };
        assert_eq!(Type::Proc(Box::new(sig)).to_string(), "proc(int, *int) int");
        let void_sig = ProcSignature::default();
        assert_eq!(Type::Proc(Box::new(void_sig)).to_string(), "proc()");
    }
}
