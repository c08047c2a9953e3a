use thiserror::Error;

use super::value::Value;

pub type RtResult<T> = Result<T, Unwind>;

/// Conditions that terminate the program
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("out of memory: {requested} bytes requested with {live} bytes live (limit {limit})")]
    OutOfMemory {
        requested: usize,
        live: usize,
        limit: usize,
    },
    #[error("root stack overflow ({capacity} slots)")]
    RootStackOverflow { capacity: usize },
    #[error("root stack underflow: popping {count} of {depth} roots")]
    RootStackUnderflow { count: usize, depth: usize },
    #[error("uncaught exception at {site}: {message}")]
    Uncaught { site: String, message: String },
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for RuntimeError {
    fn from(error: std::io::Error) -> Self {
        RuntimeError::Io(error.to_string())
    }
}

/// What travels up the Rust stack while the program unwinds
#[derive(Debug, Clone, PartialEq)]
pub enum Unwind {
    /// A language exception looking for the nearest checkpoint
    Raise(Value),
    Fatal(RuntimeError),
}

impl From<RuntimeError> for Unwind {
    fn from(error: RuntimeError) -> Self {
        Unwind::Fatal(error)
    }
}
