//! Error types for the MSL VM crate.
//!
//! Execution failures are accumulated in the [`ErrorFlags`] word and never
//! unwind across frames; structured errors ([`LoaderError`], [`VmError`]) are
//! reserved for the loader and for embedding APIs that return `Result`.

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// The VM error word. Every semantic failure sets one or more bits; the
    /// interpreter halts at the next opcode boundary once the word is nonzero.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ErrorFlags: u32 {
        const CALLSTACK_EMPTY           = 1;
        const INVALID_CALL_ARGUMENT     = 1 << 1;
        const TERMINATE_ON_LAUNCH       = 1 << 2;
        const INVALID_OPCODE            = 1 << 3;
        const INVALID_STACKFRAME_OFFSET = 1 << 4;
        const OBJECTSTACK_CORRUPTION    = 1 << 5;
        const INVALID_METHOD_SIGNATURE  = 1 << 6;
        const OBJECTSTACK_EMPTY         = 1 << 7;
        const INVALID_HASH_VALUE        = 1 << 8;
        const OBJECT_NOT_FOUND          = 1 << 9;
        const MEMBER_NOT_FOUND          = 1 << 10;
        const INVALID_STACKOBJECT       = 1 << 11;
        const STACKOVERFLOW             = 1 << 12;
        const PRIVATE_MEMBER_ACCESS     = 1 << 13;
        const CALLSTACK_CORRUPTION      = 1 << 14;
        const CONST_MEMBER_MODIFICATION = 1 << 15;
        const ABSTRACT_MEMBER_CALL      = 1 << 16;
        const INVALID_METHOD_CALL       = 1 << 17;
        const OUT_OF_MEMORY             = 1 << 18;
        const DLL_NOT_FOUND             = 1 << 19;
    }
}

impl ErrorFlags {
    /// Returns the names of every bit set in the word, for diagnostics.
    pub fn names(self) -> Vec<&'static str> {
        let mut out = Vec::new();
        for (name, flag) in Self::all().iter_names() {
            if self.contains(flag) {
                out.push(name);
            }
        }
        out
    }
}

/// Errors raised while deserializing a bytecode assembly. Any of these
/// discards the partially read assembly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    /// The stream did not match the grammar at the current position.
    #[error("invalid opcode: expected {expected}, found {found}")]
    InvalidOpcode { expected: String, found: String },

    /// A namespace, class, attribute or mangled method name was declared twice.
    #[error("declaration duplicate: {kind} `{name}`")]
    DeclarationDuplicate { kind: &'static str, name: String },

    /// A label offset does not point inside its method body.
    #[error("invalid method label #{label}: offset {offset} out of body of {body_len} bytes")]
    InvalidMethodLabel {
        label: usize,
        offset: usize,
        body_len: usize,
    },

    /// A second method carried the EntryPoint modifier.
    #[error("duplicate entry point: {name}")]
    EntryPointDuplicate { name: String },

    /// No method carried the EntryPoint modifier and merging is disabled.
    #[error("assembly declares no entry point")]
    MissingEntryPoint,

    /// The stream ended in the middle of a record.
    #[error("unexpected end of bytecode stream while reading {context}")]
    UnexpectedEof { context: &'static str },

    /// A declared pool size or value was out of any plausible range.
    #[error("invalid declaration: {reason}")]
    InvalidDeclaration { reason: String },

    /// Loading into a populated assembly with merging disabled.
    #[error("assembly merge is disabled by configuration")]
    MergeDisabled,

    /// Underlying stream failure.
    #[error("bytecode stream error: {0}")]
    Io(String),
}

impl LoaderError {
    pub(crate) fn expected(expected: impl std::fmt::Display, found: impl std::fmt::Display) -> Self {
        Self::InvalidOpcode {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    pub(crate) fn duplicate(kind: &'static str, name: impl Into<String>) -> Self {
        Self::DeclarationDuplicate {
            kind,
            name: name.into(),
        }
    }
}

impl From<std::io::Error> for LoaderError {
    fn from(error: std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::UnexpectedEof {
            LoaderError::UnexpectedEof { context: "stream" }
        } else {
            LoaderError::Io(error.to_string())
        }
    }
}

/// Errors surfaced by embedding APIs (driver-facing), wrapping either a load
/// failure or a nonzero error word after execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// Assembly deserialization failed.
    #[error(transparent)]
    Loader(#[from] LoaderError),

    /// Execution finished with a nonzero error word.
    #[error("execution failed with error word {word:?}")]
    Execution { word: ErrorFlags },
}

/// Result type for loader and embedding operations.
pub type VmResult<T> = std::result::Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_word_bits_match_wire_values() {
        assert_eq!(ErrorFlags::CALLSTACK_EMPTY.bits(), 1);
        assert_eq!(ErrorFlags::INVALID_HASH_VALUE.bits(), 1 << 8);
        assert_eq!(ErrorFlags::CONST_MEMBER_MODIFICATION.bits(), 1 << 15);
        assert_eq!(ErrorFlags::DLL_NOT_FOUND.bits(), 1 << 19);
    }

    #[test]
    fn error_word_names() {
        let word = ErrorFlags::STACKOVERFLOW | ErrorFlags::OBJECT_NOT_FOUND;
        let names = word.names();
        assert!(names.contains(&"STACKOVERFLOW"));
        assert!(names.contains(&"OBJECT_NOT_FOUND"));
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn loader_error_messages() {
        let error = LoaderError::expected("STRING_DECL", "MODIFIERS_DECL");
        assert_eq!(
            error.to_string(),
            "invalid opcode: expected STRING_DECL, found MODIFIERS_DECL"
        );

        let error = LoaderError::duplicate("class", "Vector");
        assert_eq!(error.to_string(), "declaration duplicate: class `Vector`");
    }
}
