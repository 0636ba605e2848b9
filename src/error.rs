//! Crate-wide error type.
//!
//! Bounds errors and graph wiring errors are contract violations: they are
//! returned (or, for plain indexing, raised as panics carrying the same
//! message) and never retried internally. Recoverable clamping goes through
//! [`crate::rope::safe::SafeErrors`] instead.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("range [{start}, {end}) out of bounds for length {len}")]
    RangeOutOfBounds { start: usize, end: usize, len: usize },

    #[error("alias data set over an existing alias")]
    DoubleAlias,

    #[error("data set over existing non-alias data")]
    ValueOverValue,

    #[error("circular dependency through key `{0}`")]
    CircularDependency(String),

    #[error("dependency levels could not be resolved for keys: {0}")]
    UnresolvedLevel(String),

    #[error("recursive compute of `{0}`")]
    RecursiveCompute(String),

    #[error("alignment for column {column} is already defined")]
    AlignmentRedefined { column: usize },

    #[error("unknown data key `{0}`")]
    UnknownKey(String),

    #[error("scope `{0}` is not a top scope")]
    NotTopScope(String),

    #[error("scope set mixes ancestors with descendants or contains indices")]
    InvalidScopes,

    #[error("data is not settable")]
    NotSettable,

    #[error("column span must be at least 1, got {0}")]
    InvalidSpan(usize),

    #[error("latest-of data needs at least one dependency")]
    NoDependencies,

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
