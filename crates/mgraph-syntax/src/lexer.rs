//! Lexer (tokenizer) for model source text.
//!
//! Keywords are lexed as identifiers and recognized by the parser, so that
//! they stay usable as property and enum value names.

use mgraph_core::SourceInformation;

use crate::error::{ParseError, ParseResult};

/// Token types.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Ident(String),
    Int(i64),
    Float(f64),
    String(String),

    // Symbols
    LParen,     // (
    RParen,     // )
    LBrace,     // {
    RBrace,     // }
    LBracket,   // [
    RBracket,   // ]
    Comma,      // ,
    Colon,      // :
    PathSep,    // ::
    Semicolon,  // ;
    Dot,        // .
    Range,      // ..
    Assign,     // =
    EqEq,       // ==
    NotEq,      // !=
    Lt,         // <
    LtEq,       // <=
    Gt,         // >
    GtEq,       // >=
    Plus,       // +
    Minus,      // -
    Star,       // *
    AndAnd,     // &&
    OrOr,       // ||
    Pipe,       // |
    Bang,       // !
    Caret,      // ^
    Dollar,     // $
    Tilde,      // ~
    Arrow,      // ->

    Eof,
}

impl TokenKind {
    pub fn name(&self) -> &'static str {
        match self {
            TokenKind::Ident(_) => "identifier",
            TokenKind::Int(_) => "integer",
            TokenKind::Float(_) => "float",
            TokenKind::String(_) => "string",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::Comma => "','",
            TokenKind::Colon => "':'",
            TokenKind::PathSep => "'::'",
            TokenKind::Semicolon => "';'",
            TokenKind::Dot => "'.'",
            TokenKind::Range => "'..'",
            TokenKind::Assign => "'='",
            TokenKind::EqEq => "'=='",
            TokenKind::NotEq => "'!='",
            TokenKind::Lt => "'<'",
            TokenKind::LtEq => "'<='",
            TokenKind::Gt => "'>'",
            TokenKind::GtEq => "'>='",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::AndAnd => "'&&'",
            TokenKind::OrOr => "'||'",
            TokenKind::Pipe => "'|'",
            TokenKind::Bang => "'!'",
            TokenKind::Caret => "'^'",
            TokenKind::Dollar => "'$'",
            TokenKind::Tilde => "'~'",
            TokenKind::Arrow => "'->'",
            TokenKind::Eof => "end of input",
        }
    }
}

/// Line/column range of a token, 1-based and inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl Span {
    pub fn to(self, end: Span) -> Span {
        Span {
            line: self.line,
            column: self.column,
            end_line: end.end_line,
            end_column: end.end_column,
        }
    }

    pub fn located(self, source_id: &str) -> SourceInformation {
        SourceInformation::new(
            source_id,
            self.line,
            self.column,
            self.end_line,
            self.end_column,
        )
    }
}

/// A token with its span.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Lexer state.
pub struct Lexer<'a> {
    source_id: &'a str,
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    column: u32,
    /// Position of the last consumed character.
    last: (u32, u32),
}

impl<'a> Lexer<'a> {
    pub fn new(source_id: &'a str, input: &'a str) -> Self {
        Self {
            source_id,
            chars: input.chars().peekable(),
            line: 1,
            column: 1,
            last: (1, 1),
        }
    }

    /// Tokenize all input into a vector of tokens ending with `Eof`.
    pub fn tokenize(mut self) -> ParseResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let is_eof = matches!(token.kind, TokenKind::Eof);
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn peek_second(&self) -> Option<char> {
        let mut ahead = self.chars.clone();
        ahead.next();
        ahead.next()
    }

    fn next_char(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.last = (self.line, self.column);
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek_char() == Some(expected) {
            self.next_char();
            true
        } else {
            false
        }
    }

    fn error_at(&self, line: u32, column: u32, message: impl Into<String>) -> ParseError {
        ParseError::new(
            message,
            SourceInformation::new(self.source_id, line, column, self.last.0, self.last.1),
        )
    }

    fn skip_trivia(&mut self) -> ParseResult<()> {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.next_char();
                }
                Some('/') if self.peek_second() == Some('/') => {
                    while let Some(c) = self.next_char() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some('/') if self.peek_second() == Some('*') => {
                    let (line, column) = (self.line, self.column);
                    self.next_char();
                    self.next_char();
                    let mut closed = false;
                    while let Some(c) = self.next_char() {
                        if c == '*' && self.eat('/') {
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        return Err(self.error_at(line, column, "unterminated comment"));
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> ParseResult<Token> {
        self.skip_trivia()?;

        let line = self.line;
        let column = self.column;

        let Some(c) = self.next_char() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                span: Span {
                    line,
                    column,
                    end_line: line,
                    end_column: column,
                },
            });
        };

        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '+' => TokenKind::Plus,
            '*' => TokenKind::Star,
            '^' => TokenKind::Caret,
            '$' => TokenKind::Dollar,
            '~' => TokenKind::Tilde,
            ':' => {
                if self.eat(':') {
                    TokenKind::PathSep
                } else {
                    TokenKind::Colon
                }
            }
            '.' => {
                if self.eat('.') {
                    TokenKind::Range
                } else {
                    TokenKind::Dot
                }
            }
            '=' => {
                if self.eat('=') {
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if self.eat('=') {
                    TokenKind::NotEq
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                if self.eat('=') {
                    TokenKind::LtEq
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    TokenKind::GtEq
                } else {
                    TokenKind::Gt
                }
            }
            '-' => {
                if self.eat('>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            '&' => {
                if self.eat('&') {
                    TokenKind::AndAnd
                } else {
                    return Err(self.error_at(line, column, "unexpected character '&'"));
                }
            }
            '|' => {
                if self.eat('|') {
                    TokenKind::OrOr
                } else {
                    TokenKind::Pipe
                }
            }
            '\'' => self.lex_string(line, column)?,
            c if c.is_ascii_digit() => self.lex_number(c, line, column)?,
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::from(c);
                while let Some(c) = self.peek_char() {
                    if c.is_alphanumeric() || c == '_' {
                        ident.push(c);
                        self.next_char();
                    } else {
                        break;
                    }
                }
                TokenKind::Ident(ident)
            }
            other => {
                return Err(self.error_at(
                    line,
                    column,
                    format!("unexpected character '{}'", other),
                ))
            }
        };

        Ok(Token {
            kind,
            span: Span {
                line,
                column,
                end_line: self.last.0,
                end_column: self.last.1,
            },
        })
    }

    fn lex_string(&mut self, line: u32, column: u32) -> ParseResult<TokenKind> {
        let mut value = String::new();
        loop {
            match self.next_char() {
                Some('\'') => return Ok(TokenKind::String(value)),
                Some('\\') => match self.next_char() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(c) => value.push(c),
                    None => break,
                },
                Some(c) => value.push(c),
                None => break,
            }
        }
        Err(self.error_at(line, column, "unterminated string"))
    }

    fn lex_number(&mut self, first: char, line: u32, column: u32) -> ParseResult<TokenKind> {
        let mut text = String::from(first);
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                text.push(c);
                self.next_char();
            } else {
                break;
            }
        }
        // `1..3` is a range, not a float.
        let is_float = self.peek_char() == Some('.')
            && self.peek_second().is_some_and(|c| c.is_ascii_digit());
        if is_float {
            text.push('.');
            self.next_char();
            while let Some(c) = self.peek_char() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.next_char();
                } else {
                    break;
                }
            }
            return text
                .parse()
                .map(TokenKind::Float)
                .map_err(|_| self.error_at(line, column, format!("invalid float '{}'", text)));
        }
        text.parse()
            .map(TokenKind::Int)
            .map_err(|_| self.error_at(line, column, format!("invalid integer '{}'", text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new("t.pure", input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn multiplicity_ranges_are_not_floats() {
        assert_eq!(
            kinds("[0..1] [1..*] 2.5"),
            vec![
                TokenKind::LBracket,
                TokenKind::Int(0),
                TokenKind::Range,
                TokenKind::Int(1),
                TokenKind::RBracket,
                TokenKind::LBracket,
                TokenKind::Int(1),
                TokenKind::Range,
                TokenKind::Star,
                TokenKind::RBracket,
                TokenKind::Float(2.5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn paths_and_operators() {
        assert_eq!(
            kinds("a::B $x->size() != 3"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::PathSep,
                TokenKind::Ident("B".into()),
                TokenKind::Dollar,
                TokenKind::Ident("x".into()),
                TokenKind::Arrow,
                TokenKind::Ident("size".into()),
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::NotEq,
                TokenKind::Int(3),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("// line\n/* block\n comment */ 'it\\'s'"),
            vec![TokenKind::String("it's".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn spans_track_lines_and_columns() {
        let tokens = Lexer::new("t.pure", "Class\n  Car").tokenize().unwrap();
        assert_eq!(
            tokens[1].span,
            Span {
                line: 2,
                column: 3,
                end_line: 2,
                end_column: 5
            }
        );
    }

    #[test]
    fn unterminated_string_reports_position() {
        let err = Lexer::new("t.pure", "\n  'abc").tokenize().unwrap_err();
        assert_eq!(err.message, "unterminated string");
        assert_eq!((err.line(), err.column()), (2, 3));
    }
}
