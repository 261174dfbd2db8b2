use std::fmt;

use thiserror::Error;

use crate::arena::ArenaExhausted;

/// Source position of a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub file: String,
    /// 1-based.
    pub line: usize,
}

impl Location {
    pub fn new(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmErrorKind {
    #[error("could not read `{path}`: {reason}")]
    UnreadableSource { path: String, reason: String },

    #[error("unknown directive `%{0}`")]
    UnknownDirective(String),

    #[error("%define needs a name")]
    MissingDefineName,

    #[error("`{0}` is not a literal")]
    MalformedLiteral(String),

    #[error("%include needs a path")]
    MissingIncludePath,

    #[error("%include path `{0}` must be surrounded with quotation marks")]
    UnquotedIncludePath(String),

    #[error("includes nested deeper than {max} levels")]
    IncludeDepthExceeded { max: usize },

    #[error("%entry needs an address or a label")]
    MissingEntryValue,

    #[error("label `{0}` is already defined")]
    DuplicateLabel(String),

    #[error("label name is empty")]
    EmptyLabel,

    #[error("unknown instruction `{0}`")]
    UnknownOpcode(String),

    #[error("instruction `{0}` requires an operand")]
    MissingOperand(String),

    #[error("unknown label `{0}`")]
    UndefinedLabel(String),

    #[error("program does not fit in {capacity} instructions")]
    ProgramTooLarge { capacity: usize },

    #[error("static data does not fit in {capacity} bytes of memory")]
    MemoryExhausted { capacity: usize },

    #[error(transparent)]
    ArenaExhausted(#[from] ArenaExhausted),

    #[error("no entry point declared, add `%entry <address or label>`")]
    MissingEntry,
}

/// An assembly failure. Assembly stops at the first one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmError {
    pub location: Option<Location>,
    pub kind: AsmErrorKind,
}

impl AsmError {
    pub fn at(location: Location, kind: AsmErrorKind) -> Self {
        Self {
            location: Some(location),
            kind,
        }
    }

    pub fn bare(kind: AsmErrorKind) -> Self {
        Self {
            location: None,
            kind,
        }
    }
}

impl From<AsmErrorKind> for AsmError {
    fn from(kind: AsmErrorKind) -> Self {
        Self::bare(kind)
    }
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}: error: {}", location, self.kind),
            None => write!(f, "error: {}", self.kind),
        }
    }
}

impl std::error::Error for AsmError {}
