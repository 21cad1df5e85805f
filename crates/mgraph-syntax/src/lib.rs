//! The parser collaborator of the compiler.
//!
//! The compiler consumes sources through the [`Parser`] trait and never
//! looks at surface syntax itself. [`TextParser`] is the reference
//! implementation for a compact textual syntax; hosts with their own
//! grammar plug in by implementing the trait.

pub mod ast;
pub mod error;
pub mod lexer;
mod parser;

pub use ast::*;
pub use error::{ParseError, ParseResult};

/// Turns source text into a declaration tree.
pub trait Parser: Send + Sync {
    fn parse(&self, source_id: &str, text: &str) -> ParseResult<ParsedSource>;
}

/// Parser for the reference surface syntax (see the `parser` module docs).
#[derive(Debug, Clone, Copy, Default)]
pub struct TextParser;

impl Parser for TextParser {
    fn parse(&self, source_id: &str, text: &str) -> ParseResult<ParsedSource> {
        parser::SourceParser::new(source_id, text)?.parse_source()
    }
}

/// Parses a single expression, e.g. for runtime queries against a compiled
/// graph.
pub fn parse_expression(source_id: &str, text: &str) -> ParseResult<Expr> {
    let mut parser = parser::SourceParser::new(source_id, text)?;
    let expr = parser.expression()?;
    parser.expect_end()?;
    Ok(expr)
}
