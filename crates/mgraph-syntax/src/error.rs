//! Parser error types.

use mgraph_core::SourceInformation;
use thiserror::Error;

/// A syntax error with the position of the offending token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Parser error at ({location}): {message}")]
pub struct ParseError {
    pub message: String,
    pub location: SourceInformation,
}

impl ParseError {
    pub fn new(message: impl Into<String>, location: SourceInformation) -> Self {
        ParseError {
            message: message.into(),
            location,
        }
    }

    pub fn unexpected_token(location: SourceInformation, expected: &str, found: &str) -> Self {
        Self::new(format!("expected {}, found {}", expected, found), location)
    }

    pub fn line(&self) -> u32 {
        self.location.start_line
    }

    pub fn column(&self) -> u32 {
        self.location.start_column
    }
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;
