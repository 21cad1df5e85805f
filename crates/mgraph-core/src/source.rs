//! Source positions attached to graph nodes and diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a node (or a failure) originates: source path plus a 1-based
/// line/column range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceInformation {
    pub source_id: String,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl SourceInformation {
    pub fn new(
        source_id: impl Into<String>,
        start_line: u32,
        start_column: u32,
        end_line: u32,
        end_column: u32,
    ) -> Self {
        SourceInformation {
            source_id: source_id.into(),
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    /// A zero-width position at a single point.
    pub fn point(source_id: impl Into<String>, line: u32, column: u32) -> Self {
        Self::new(source_id, line, column, line, column)
    }

    /// Smallest range covering both `self` and `other`.
    ///
    /// Assumes both positions come from the same source.
    pub fn span_to(&self, other: &SourceInformation) -> SourceInformation {
        let (start_line, start_column) = (self.start_line, self.start_column)
            .min((other.start_line, other.start_column));
        let (end_line, end_column) =
            (self.end_line, self.end_column).max((other.end_line, other.end_column));
        SourceInformation {
            source_id: self.source_id.clone(),
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }
}

impl fmt::Display for SourceInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "resource:{} line:{} column:{}",
            self.source_id, self.start_line, self.start_column
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_start_position() {
        let info = SourceInformation::new("model/car.pure", 3, 5, 4, 1);
        assert_eq!(info.to_string(), "resource:model/car.pure line:3 column:5");
    }

    #[test]
    fn span_covers_both_ranges() {
        let a = SourceInformation::new("a.pure", 2, 4, 2, 9);
        let b = SourceInformation::new("a.pure", 1, 7, 2, 2);
        let span = a.span_to(&b);
        assert_eq!((span.start_line, span.start_column), (1, 7));
        assert_eq!((span.end_line, span.end_column), (2, 9));
    }
}
