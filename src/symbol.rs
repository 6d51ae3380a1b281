//! Symbol types
//!
//! Every extractor maps declarations into one small, fixed vocabulary:
//! - Callables: `function`, `method`
//! - Types: `class`, `struct`, `interface`, `type`, `enum`

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Declaration kinds understood by the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Struct,
    Interface,
    Type,
    Enum,
}

impl SymbolKind {
    /// Get the string representation of the symbol kind
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::Struct => "struct",
            SymbolKind::Interface => "interface",
            SymbolKind::Type => "type",
            SymbolKind::Enum => "enum",
        }
    }

    /// Get all symbol kinds
    pub fn all() -> &'static [SymbolKind] {
        &[
            SymbolKind::Function,
            SymbolKind::Method,
            SymbolKind::Class,
            SymbolKind::Struct,
            SymbolKind::Interface,
            SymbolKind::Type,
            SymbolKind::Enum,
        ]
    }

    /// Kinds that can be pulled in as "referenced types" of a symbol.
    pub fn type_kinds() -> &'static [SymbolKind] {
        &[
            SymbolKind::Class,
            SymbolKind::Struct,
            SymbolKind::Interface,
            SymbolKind::Type,
            SymbolKind::Enum,
        ]
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, SymbolKind::Function | SymbolKind::Method)
    }

    /// Kinds whose line range may enclose other declarations.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            SymbolKind::Class | SymbolKind::Struct | SymbolKind::Interface
        )
    }
}

impl FromStr for SymbolKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "function" | "fn" | "func" | "def" => Ok(SymbolKind::Function),
            "method" => Ok(SymbolKind::Method),
            "class" => Ok(SymbolKind::Class),
            "struct" => Ok(SymbolKind::Struct),
            "interface" | "trait" | "protocol" => Ok(SymbolKind::Interface),
            "type" | "typedef" => Ok(SymbolKind::Type),
            "enum" => Ok(SymbolKind::Enum),
            _ => Err(Error::Extract(format!("Unknown symbol kind: {}", s))),
        }
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A declaration found by an extractor, before it is persisted.
///
/// Lines are 1-indexed and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedSymbol {
    pub name: String,
    pub kind: SymbolKind,
    pub start_line: usize,
    pub end_line: usize,
    pub signature: Option<String>,
    /// Name of the innermost enclosing container, when known
    pub parent: Option<String>,
}

impl ExtractedSymbol {
    pub fn new(name: impl Into<String>, kind: SymbolKind, start_line: usize, end_line: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            start_line,
            end_line,
            signature: None,
            parent: None,
        }
    }

    /// Set the signature
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Set the enclosing container
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Whether `other` lies within this symbol's range (and is not the same range).
    pub fn encloses(&self, other: &ExtractedSymbol) -> bool {
        self.start_line <= other.start_line
            && other.end_line <= self.end_line
            && (self.start_line, self.end_line) != (other.start_line, other.end_line)
    }
}

/// A symbol row as stored in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub id: i64,
    pub file_id: i64,
    pub name: String,
    pub kind: SymbolKind,
    pub start_line: usize,
    pub end_line: usize,
    pub signature: Option<String>,
    pub token_count: usize,
    pub parent: Option<String>,
}

impl Symbol {
    /// Get a short description for display
    pub fn short_description(&self) -> String {
        match &self.signature {
            Some(sig) => format!("{} {} ({})", self.kind, self.name, sig),
            None => format!("{} {}", self.kind, self.name),
        }
    }
}
