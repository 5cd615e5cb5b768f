//! Error types for code evaluation, tank placement and persistence.

use crate::brain::MarkId;
use thiserror::Error;

/// Failure while evaluating a single expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("`{0}` is not a valid special value")]
    UnknownSymbol(String),
    #[error("`{0}` is not a valid operator")]
    UnknownOperator(String),
    #[error("operator `{op}` expects {expected} operand(s), found {found}")]
    Arity {
        op: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Code whose branch structure is broken.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("branch target @{0} has no matching mark")]
    UnresolvedMark(MarkId),
    #[error("mark @{0} appears more than once")]
    DuplicateMark(MarkId),
}

/// A persisted register file of the wrong size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("memory holds {found} registers, expected {expected}")]
pub struct MemorySizeError {
    pub expected: usize,
    pub found: usize,
}

/// An entity was placed into a cell that is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("location ({x}, {y}) already occupied")]
pub struct CapacityError {
    pub x: u16,
    pub y: u16,
}

/// Why a germ's turn was aborted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FaultCause {
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Structural(#[from] StructuralError),
}

/// A fault raised from germ code, tagged with where it happened.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("fault raised from germ code (line {index}): {cause}")]
pub struct BrainFault {
    pub index: usize,
    /// Numbered listing of the code that faulted.
    pub listing: String,
    #[source]
    pub cause: FaultCause,
}

impl BrainFault {
    pub fn is_structural(&self) -> bool {
        matches!(self.cause, FaultCause::Structural(_))
    }
}

/// Failure reading a code listing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unexpected end of input in instruction {0}")]
    UnexpectedEnd(usize),
    #[error("unexpected token `{token}` in instruction {line}")]
    UnexpectedToken { line: usize, token: String },
    #[error("`{token}` is not a valid command (instruction {line})")]
    UnknownCommand { line: usize, token: String },
    #[error("bad mark `{token}` in instruction {line}")]
    BadMark { line: usize, token: String },
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Structural(#[from] StructuralError),
}

/// Invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("starting code: {0}")]
    StartingCode(#[from] ParseError),
}

/// Errors that can occur during checkpoint operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("record {index}: {source}")]
    Capacity {
        index: usize,
        #[source]
        source: CapacityError,
    },
}
