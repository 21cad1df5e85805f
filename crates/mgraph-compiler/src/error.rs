//! Compilation failure taxonomy.
//!
//! [`CompilationError`] is the only thing callers observe when a compile
//! fails: a kind, a message and, when known, the exact source range. It is
//! serializable so that editors and test harnesses can consume it as JSON.

use mgraph_core::{CoreError, SourceInformation};
use mgraph_syntax::ParseError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a compile-time failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Surface syntax invalid (reported by the parser collaborator).
    Parse,
    /// Unresolvable, ambiguous or duplicate reference.
    Resolution,
    /// Subtype/assignability failure.
    Type,
    /// Arity mismatch on an assignment, property or association end.
    Multiplicity,
}

/// A structured compile failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("Compilation error at {}: {message}", render_location(.location))]
pub struct CompilationError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<SourceInformation>,
    /// Secondary failures raised while handling this one, such as an
    /// incomplete rollback.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

fn render_location(location: &Option<SourceInformation>) -> String {
    match location {
        Some(source) => format!("({})", source),
        None => "(unknown location)".to_string(),
    }
}

impl CompilationError {
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        location: Option<SourceInformation>,
    ) -> Self {
        CompilationError {
            kind,
            message: message.into(),
            location,
            notes: Vec::new(),
        }
    }

    pub fn resolution(message: impl Into<String>, location: Option<SourceInformation>) -> Self {
        Self::new(ErrorKind::Resolution, message, location)
    }

    pub fn type_error(message: impl Into<String>, location: Option<SourceInformation>) -> Self {
        Self::new(ErrorKind::Type, message, location)
    }

    pub fn multiplicity(message: impl Into<String>, location: Option<SourceInformation>) -> Self {
        Self::new(ErrorKind::Multiplicity, message, location)
    }

    /// Attaches a location if none is set yet.
    pub fn at(mut self, location: Option<&SourceInformation>) -> Self {
        if self.location.is_none() {
            self.location = location.cloned();
        }
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn source_path(&self) -> Option<&str> {
        self.location.as_ref().map(|s| s.source_id.as_str())
    }

    pub fn start_line(&self) -> Option<u32> {
        self.location.as_ref().map(|s| s.start_line)
    }

    pub fn start_column(&self) -> Option<u32> {
        self.location.as_ref().map(|s| s.start_column)
    }

    pub fn end_line(&self) -> Option<u32> {
        self.location.as_ref().map(|s| s.end_line)
    }

    pub fn end_column(&self) -> Option<u32> {
        self.location.as_ref().map(|s| s.end_column)
    }
}

impl From<ParseError> for CompilationError {
    fn from(err: ParseError) -> Self {
        CompilationError::new(ErrorKind::Parse, err.message, Some(err.location))
    }
}

/// Graph errors raised while building: duplicate paths are user errors,
/// everything else is reported as a resolution failure without a position.
impl From<CoreError> for CompilationError {
    fn from(err: CoreError) -> Self {
        CompilationError::resolution(err.to_string(), None)
    }
}

/// Errors from staging operations on the source registry. These never touch
/// the graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("source '{path}' already exists")]
    SourceExists { path: String },

    #[error("source '{path}' is unknown")]
    UnknownSource { path: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_expose_the_range() {
        let err = CompilationError::type_error(
            "Type Error: 'String' not a subtype of 'Integer'",
            Some(SourceInformation::new("model.pure", 3, 5, 3, 9)),
        );
        assert_eq!(err.source_path(), Some("model.pure"));
        assert_eq!(err.start_line(), Some(3));
        assert_eq!(err.start_column(), Some(5));
        assert_eq!(err.end_line(), Some(3));
        assert_eq!(err.end_column(), Some(9));
    }

    #[test]
    fn display_includes_location() {
        let err = CompilationError::resolution(
            "Car has not been defined!",
            Some(SourceInformation::point("model.pure", 2, 7)),
        );
        insta::assert_snapshot!(
            err.to_string(),
            @"Compilation error at (resource:model.pure line:2 column:7): Car has not been defined!"
        );
        let unlocated = CompilationError::resolution("boom", None);
        assert_eq!(unlocated.to_string(), "Compilation error at (unknown location): boom");
    }

    #[test]
    fn parse_errors_keep_their_position() {
        let parse = ParseError::new("expected ';'", SourceInformation::point("a.pure", 4, 1));
        let err = CompilationError::from(parse);
        assert_eq!(err.kind, ErrorKind::Parse);
        assert_eq!(err.start_line(), Some(4));
    }

    #[test]
    fn serializes_as_json() {
        let err = CompilationError::multiplicity("bad", Some(SourceInformation::point("a.pure", 1, 2)));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "Multiplicity");
        assert_eq!(json["location"]["start_line"], 1);
        assert!(json.get("notes").is_none());

        let noted = err.with_note("rollback did not complete cleanly");
        let json = serde_json::to_value(&noted).unwrap();
        assert_eq!(json["notes"][0], "rollback did not complete cleanly");
        let back: CompilationError = serde_json::from_value(json).unwrap();
        assert_eq!(back, noted);
    }
}
