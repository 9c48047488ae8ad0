//! Parse errors for the shared primitive types.

use thiserror::Error;

/// Result type alias using ParseError.
pub type ParseResult<T> = Result<T, ParseError>;

/// Errors raised while parsing CRS codes and seasons.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),

    #[error("Invalid season '{0}'; expected one of winter, spring, summer, autumn, annual, static")]
    InvalidSeason(String),
}
