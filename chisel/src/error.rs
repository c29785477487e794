//! Module containing the chisel universal error type
use thiserror::Error;

/// Universal error type for chisel
///
/// Degenerate primitives and unscoreable candidates are *not* errors: the
/// former are `None` at the constructor level, the latter rank at negative
/// infinity.  This enum only covers the fatal kinds that the pipeline driver
/// surfaces as a non-zero exit code.
#[derive(Error, Debug)]
pub enum Error {
    #[error("could not parse CSG tree: {0}")]
    InputInvalid(String),

    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("unknown primitive kind '{0}'")]
    UnknownPrimitiveKind(String),

    #[error("optimizer with name '{0}' does not exist")]
    OptimizerUnknown(String),

    #[error("result tree is a no-op")]
    NoopResult,

    #[error("malformed value for '{0}' in section [{1}]")]
    BadConfigValue(String, String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
}
