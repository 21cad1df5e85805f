//! Recursive-descent parser for the reference surface syntax.
//!
//! ```text
//! import model::*;
//!
//! Class model::Car extends Vehicle
//! [
//!   nameNotEmpty: $this.name->isNotEmpty(),
//!   c2(~owner: Finance ~externalId: 'ID-1' ~function: $this.wheels > 2
//!      ~enforcementLevel: Warn ~message: 'too few wheels')
//! ]
//! {
//!   name: String[1] = 'car';
//!   wheels: Integer[0..*];
//!   parts: Pair<Wheel, Engine|1, *>[0..1];
//! }
//!
//! Association model::Car_Owner { owner: Owner[1]; car: Car[0..1]; }
//! Enum model::Color { RED, GREEN }
//! function model::isBig(c: Car[1]): Boolean[1] { $c.wheels->size() > 4; }
//! ```

use mgraph_core::{EnforcementLevel, Literal, Multiplicity, Operator};

use crate::ast::*;
use crate::error::{ParseError, ParseResult};
use crate::lexer::{Lexer, Span, Token, TokenKind};

// ==================== PARSER STATE ====================

pub(crate) struct SourceParser<'a> {
    source_id: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> SourceParser<'a> {
    pub(crate) fn new(source_id: &'a str, input: &'a str) -> ParseResult<Self> {
        let tokens = Lexer::new(source_id, input).tokenize()?;
        Ok(Self {
            source_id,
            tokens,
            pos: 0,
        })
    }
}

// ==================== TOKEN HELPERS ====================

impl SourceParser<'_> {
    fn peek(&self) -> &Token {
        // The token stream always ends with Eof, which is never consumed.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !matches!(token.kind, TokenKind::Eof) {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn check_keyword(&self, name: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(s) if s == name)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_here(&self, expected: &str) -> ParseError {
        let token = self.peek();
        let found = match &token.kind {
            TokenKind::Ident(name) => format!("'{}'", name),
            other => other.name().to_string(),
        };
        ParseError::unexpected_token(token.span.located(self.source_id), expected, &found)
    }

    fn expect(&mut self, kind: &TokenKind) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(kind.name()))
        }
    }

    fn expect_keyword(&mut self, name: &str) -> ParseResult<Token> {
        if self.check_keyword(name) {
            Ok(self.advance())
        } else {
            Err(self.error_here(&format!("'{}'", name)))
        }
    }

    fn expect_ident(&mut self) -> ParseResult<(String, Span)> {
        match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                let token = self.advance();
                Ok((name, token.span))
            }
            _ => Err(self.error_here("identifier")),
        }
    }

    /// Span of the most recently consumed token.
    fn last_span(&self) -> Span {
        if self.pos == 0 {
            self.peek().span
        } else {
            self.tokens[self.pos - 1].span
        }
    }

    fn locate(&self, start: Span) -> mgraph_core::SourceInformation {
        start.to(self.last_span()).located(self.source_id)
    }

    pub(crate) fn expect_end(&mut self) -> ParseResult<()> {
        if self.check(&TokenKind::Eof) {
            Ok(())
        } else {
            Err(self.error_here("end of input"))
        }
    }

    /// `a::b::C`
    fn qualified_name(&mut self) -> ParseResult<(String, Span)> {
        let (mut path, start) = self.expect_ident()?;
        while self.check(&TokenKind::PathSep) && matches!(self.peek_at(1), TokenKind::Ident(_)) {
            self.advance();
            let (segment, _) = self.expect_ident()?;
            path.push_str("::");
            path.push_str(&segment);
        }
        Ok((path, start))
    }

    fn type_ref(&mut self) -> ParseResult<TypeRef> {
        let (path, start) = self.qualified_name()?;
        Ok(TypeRef::new(path, self.locate(start)))
    }

    /// A declared type: `Type`, `Type<A, B>`, `Type<A|*>` or `Type<|0..1>`.
    fn declared_type(&mut self) -> ParseResult<TypeRef> {
        let start = self.peek().span;
        let mut ty = self.type_ref()?;
        if !self.eat(&TokenKind::Lt) {
            return Ok(ty);
        }
        if !self.check(&TokenKind::Pipe) && !self.check(&TokenKind::Gt) {
            loop {
                ty.type_arguments.push(self.declared_type()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        if self.eat(&TokenKind::Pipe) {
            loop {
                let at = self.peek().span;
                ty.multiplicity_arguments.push(self.multiplicity_range(at)?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::Gt)?;
        if !ty.has_arguments() {
            return Err(ParseError::new(
                format!("type '{}' has an empty argument list", ty.path),
                self.locate(start),
            ));
        }
        ty.source = self.locate(start);
        Ok(ty)
    }

    /// `[1]`, `[*]`, `[0..1]`, `[1..*]`
    fn multiplicity(&mut self) -> ParseResult<Multiplicity> {
        let open = self.expect(&TokenKind::LBracket)?;
        let multiplicity = self.multiplicity_range(open.span)?;
        self.expect(&TokenKind::RBracket)?;
        Ok(multiplicity)
    }

    /// The bounds of a multiplicity without brackets: `1`, `*`, `0..1`.
    fn multiplicity_range(&mut self, start: Span) -> ParseResult<Multiplicity> {
        if self.eat(&TokenKind::Star) {
            return Ok(Multiplicity::ZERO_MANY);
        }
        let lower = self.bound()?;
        if !self.eat(&TokenKind::Range) {
            return Ok(Multiplicity::exactly(lower));
        }
        let upper = if self.eat(&TokenKind::Star) {
            None
        } else {
            Some(self.bound()?)
        };
        Multiplicity::new(lower, upper).map_err(|e| ParseError::new(e.to_string(), self.locate(start)))
    }

    fn bound(&mut self) -> ParseResult<u32> {
        match self.peek().kind {
            TokenKind::Int(n) if n >= 0 && n <= u32::MAX as i64 => {
                self.advance();
                Ok(n as u32)
            }
            _ => Err(self.error_here("multiplicity bound")),
        }
    }
}

// ==================== DECLARATIONS ====================

impl SourceParser<'_> {
    pub(crate) fn parse_source(&mut self) -> ParseResult<ParsedSource> {
        let mut imports = Vec::new();
        while self.check_keyword("import") {
            imports.push(self.import()?);
        }

        let mut declarations = Vec::new();
        while !self.check(&TokenKind::Eof) {
            let declaration = if self.check_keyword("Class") {
                Declaration::Class(self.class()?)
            } else if self.check_keyword("Association") {
                Declaration::Association(self.association()?)
            } else if self.check_keyword("Enum") {
                Declaration::Enumeration(self.enumeration()?)
            } else if self.check_keyword("function") {
                Declaration::Function(self.function()?)
            } else {
                return Err(self.error_here("'Class', 'Association', 'Enum' or 'function'"));
            };
            declarations.push(declaration);
        }

        Ok(ParsedSource {
            source_id: self.source_id.to_string(),
            imports,
            declarations,
        })
    }

    /// `import a::b::*;`
    fn import(&mut self) -> ParseResult<Import> {
        let start = self.expect_keyword("import")?.span;
        let (package, _) = self.qualified_name()?;
        self.expect(&TokenKind::PathSep)?;
        self.expect(&TokenKind::Star)?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(Import {
            package,
            source: self.locate(start),
        })
    }

    fn class(&mut self) -> ParseResult<ClassDecl> {
        let start = self.expect_keyword("Class")?.span;
        let (path, _) = self.qualified_name()?;

        let mut generalizations = Vec::new();
        if self.check_keyword("extends") {
            self.advance();
            generalizations.push(self.type_ref()?);
            while self.eat(&TokenKind::Comma) {
                generalizations.push(self.type_ref()?);
            }
        }

        let mut constraints = Vec::new();
        if self.eat(&TokenKind::LBracket) {
            if !self.check(&TokenKind::RBracket) {
                loop {
                    let index = constraints.len();
                    constraints.push(self.constraint(index)?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RBracket)?;
        }

        self.expect(&TokenKind::LBrace)?;
        let mut properties = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            properties.push(self.property()?);
        }
        self.expect(&TokenKind::RBrace)?;

        Ok(ClassDecl {
            path,
            generalizations,
            constraints,
            properties,
            source: self.locate(start),
        })
    }

    /// `name: expr`, `name(~function: expr ...)` or a bare expression named
    /// by its position.
    fn constraint(&mut self, index: usize) -> ParseResult<ConstraintDecl> {
        let start = self.peek().span;
        let named = matches!(self.peek().kind, TokenKind::Ident(_))
            && matches!(self.peek_at(1), TokenKind::Colon);
        let extended = matches!(self.peek().kind, TokenKind::Ident(_))
            && matches!(self.peek_at(1), TokenKind::LParen)
            && matches!(self.peek_at(2), TokenKind::Tilde);

        if extended {
            return self.extended_constraint(start);
        }

        let name = if named {
            let (name, _) = self.expect_ident()?;
            self.expect(&TokenKind::Colon)?;
            name
        } else {
            index.to_string()
        };
        let function = self.expression()?;
        Ok(ConstraintDecl {
            name,
            owner: None,
            external_id: None,
            enforcement_level: EnforcementLevel::Error,
            function,
            message: None,
            source: self.locate(start),
        })
    }

    fn extended_constraint(&mut self, start: Span) -> ParseResult<ConstraintDecl> {
        let (name, _) = self.expect_ident()?;
        self.expect(&TokenKind::LParen)?;

        let mut owner = None;
        let mut external_id = None;
        let mut enforcement_level = EnforcementLevel::Error;
        let mut function = None;
        let mut message = None;

        while self.eat(&TokenKind::Tilde) {
            let (field, field_span) = self.expect_ident()?;
            self.expect(&TokenKind::Colon)?;
            match field.as_str() {
                "owner" => owner = Some(self.expect_ident()?.0),
                "externalId" => external_id = Some(self.string()?),
                "function" => function = Some(self.expression()?),
                "message" => message = Some(self.expression()?),
                "enforcementLevel" => {
                    let (level, span) = self.expect_ident()?;
                    enforcement_level = match level.as_str() {
                        "Error" => EnforcementLevel::Error,
                        "Warn" => EnforcementLevel::Warn,
                        other => {
                            return Err(ParseError::new(
                                format!("unknown enforcement level '{}'", other),
                                span.located(self.source_id),
                            ))
                        }
                    };
                }
                other => {
                    return Err(ParseError::new(
                        format!("unknown constraint field '~{}'", other),
                        field_span.located(self.source_id),
                    ))
                }
            }
        }
        self.expect(&TokenKind::RParen)?;

        let function = function.ok_or_else(|| {
            ParseError::new(
                format!("constraint '{}' has no ~function", name),
                self.locate(start),
            )
        })?;
        Ok(ConstraintDecl {
            name,
            owner,
            external_id,
            enforcement_level,
            function,
            message,
            source: self.locate(start),
        })
    }

    /// `name: Type[m] (= default)?;`
    fn property(&mut self) -> ParseResult<PropertyDecl> {
        let (name, start) = self.expect_ident()?;
        self.expect(&TokenKind::Colon)?;
        let ty = self.declared_type()?;
        let multiplicity = self.multiplicity()?;
        let default = if self.eat(&TokenKind::Assign) {
            Some(self.expression()?)
        } else {
            None
        };
        self.expect(&TokenKind::Semicolon)?;
        Ok(PropertyDecl {
            name,
            ty,
            multiplicity,
            default,
            source: self.locate(start),
        })
    }

    fn association(&mut self) -> ParseResult<AssociationDecl> {
        let start = self.expect_keyword("Association")?.span;
        let (path, _) = self.qualified_name()?;
        self.expect(&TokenKind::LBrace)?;
        let mut ends = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            ends.push(self.property()?);
        }
        self.expect(&TokenKind::RBrace)?;
        if ends.len() != 2 {
            return Err(ParseError::new(
                format!(
                    "association '{}' must declare exactly two ends, found {}",
                    path,
                    ends.len()
                ),
                self.locate(start),
            ));
        }
        Ok(AssociationDecl {
            path,
            ends,
            source: self.locate(start),
        })
    }

    fn enumeration(&mut self) -> ParseResult<EnumerationDecl> {
        let start = self.expect_keyword("Enum")?.span;
        let (path, _) = self.qualified_name()?;
        self.expect(&TokenKind::LBrace)?;
        let mut values = Vec::new();
        if !self.check(&TokenKind::RBrace) {
            loop {
                let (name, span) = self.expect_ident()?;
                values.push(EnumValueDecl {
                    name,
                    source: span.located(self.source_id),
                });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(EnumerationDecl {
            path,
            values,
            source: self.locate(start),
        })
    }

    fn function(&mut self) -> ParseResult<FunctionDecl> {
        let start = self.expect_keyword("function")?.span;
        let (path, _) = self.qualified_name()?;
        self.expect(&TokenKind::LParen)?;
        let mut parameters = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let (name, param_start) = self.expect_ident()?;
                self.expect(&TokenKind::Colon)?;
                let ty = self.declared_type()?;
                let multiplicity = self.multiplicity()?;
                parameters.push(ParameterDecl {
                    name,
                    ty,
                    multiplicity,
                    source: self.locate(param_start),
                });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        self.expect(&TokenKind::Colon)?;
        let return_type = self.declared_type()?;
        let return_multiplicity = self.multiplicity()?;

        self.expect(&TokenKind::LBrace)?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            body.push(self.expression()?);
            self.expect(&TokenKind::Semicolon)?;
        }
        self.expect(&TokenKind::RBrace)?;
        if body.is_empty() {
            return Err(ParseError::new(
                format!("function '{}' has an empty body", path),
                self.locate(start),
            ));
        }

        Ok(FunctionDecl {
            path,
            parameters,
            return_type,
            return_multiplicity,
            body,
            source: self.locate(start),
        })
    }
}

// ==================== EXPRESSIONS ====================

impl SourceParser<'_> {
    pub(crate) fn expression(&mut self) -> ParseResult<Expr> {
        self.or_expr()
    }

    fn operator(&self, op: Operator, operands: Vec<Expr>, start: Span) -> Expr {
        Expr {
            kind: ExprKind::Operator { op, operands },
            source: self.locate(start),
        }
    }

    fn or_expr(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;
        let mut left = self.and_expr()?;
        while self.eat(&TokenKind::OrOr) {
            let right = self.and_expr()?;
            left = self.operator(Operator::Or, vec![left, right], start);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;
        let mut left = self.comparison()?;
        while self.eat(&TokenKind::AndAnd) {
            let right = self.comparison()?;
            left = self.operator(Operator::And, vec![left, right], start);
        }
        Ok(left)
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;
        let left = self.additive()?;
        let op = match self.peek().kind {
            TokenKind::EqEq => Operator::Eq,
            TokenKind::NotEq => Operator::NotEq,
            TokenKind::Lt => Operator::Lt,
            TokenKind::LtEq => Operator::LtEq,
            TokenKind::Gt => Operator::Gt,
            TokenKind::GtEq => Operator::GtEq,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.additive()?;
        Ok(self.operator(op, vec![left, right], start))
    }

    fn additive(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => Operator::Add,
                TokenKind::Minus => Operator::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = self.operator(op, vec![left, right], start);
        }
    }

    fn multiplicative(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;
        let mut left = self.unary()?;
        while self.eat(&TokenKind::Star) {
            let right = self.unary()?;
            left = self.operator(Operator::Mul, vec![left, right], start);
        }
        Ok(left)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;
        if self.eat(&TokenKind::Bang) {
            let operand = self.unary()?;
            return Ok(self.operator(Operator::Not, vec![operand], start));
        }
        if self.check(&TokenKind::Minus) {
            match self.peek_at(1).clone() {
                TokenKind::Int(n) => {
                    self.advance();
                    self.advance();
                    return Ok(Expr {
                        kind: ExprKind::Literal(Literal::Integer(-n)),
                        source: self.locate(start),
                    });
                }
                TokenKind::Float(x) => {
                    self.advance();
                    self.advance();
                    return Ok(Expr {
                        kind: ExprKind::Literal(Literal::Float(-x)),
                        source: self.locate(start),
                    });
                }
                _ => return Err(self.error_here("expression")),
            }
        }
        self.postfix()
    }

    /// `.property` and `->builtin()` chains.
    fn postfix(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;
        let mut expr = self.primary()?;
        loop {
            if self.eat(&TokenKind::Dot) {
                let (property, _) = self.expect_ident()?;
                expr = Expr {
                    kind: ExprKind::PropertyAccess {
                        receiver: Box::new(expr),
                        property,
                    },
                    source: self.locate(start),
                };
            } else if self.check(&TokenKind::Arrow) {
                self.advance();
                let (name, span) = self.expect_ident()?;
                let op = match name.as_str() {
                    "size" => Operator::Size,
                    "isEmpty" => Operator::IsEmpty,
                    "isNotEmpty" => Operator::IsNotEmpty,
                    other => {
                        return Err(ParseError::new(
                            format!("unknown collection function '{}'", other),
                            span.located(self.source_id),
                        ))
                    }
                };
                self.expect(&TokenKind::LParen)?;
                self.expect(&TokenKind::RParen)?;
                expr = self.operator(op, vec![expr], start);
            } else {
                return Ok(expr);
            }
        }
    }

    fn string(&mut self) -> ParseResult<String> {
        match self.peek().kind.clone() {
            TokenKind::String(s) => {
                self.advance();
                Ok(s)
            }
            _ => Err(self.error_here("string")),
        }
    }

    fn key_values(&mut self) -> ParseResult<Vec<KeyValue>> {
        self.expect(&TokenKind::LParen)?;
        let mut key_values = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let (key, start) = self.expect_ident()?;
                self.expect(&TokenKind::Assign)?;
                let value = self.expression()?;
                key_values.push(KeyValue {
                    key,
                    value,
                    source: self.locate(start),
                });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(key_values)
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;
        let kind = match self.peek().kind.clone() {
            TokenKind::String(s) => {
                self.advance();
                ExprKind::Literal(Literal::String(s))
            }
            TokenKind::Int(n) => {
                self.advance();
                ExprKind::Literal(Literal::Integer(n))
            }
            TokenKind::Float(x) => {
                self.advance();
                ExprKind::Literal(Literal::Float(x))
            }
            TokenKind::Ident(word) if word == "true" || word == "false" => {
                self.advance();
                ExprKind::Literal(Literal::Boolean(word == "true"))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(&TokenKind::RParen)?;
                return Ok(inner);
            }
            TokenKind::LBracket => {
                self.advance();
                let mut values = Vec::new();
                if !self.check(&TokenKind::RBracket) {
                    loop {
                        values.push(self.expression()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBracket)?;
                ExprKind::Collection(values)
            }
            TokenKind::Dollar => {
                self.advance();
                let (name, _) = self.expect_ident()?;
                ExprKind::Variable(name)
            }
            TokenKind::Caret => {
                self.advance();
                if self.check(&TokenKind::Dollar) {
                    let source_start = self.advance().span;
                    let (name, _) = self.expect_ident()?;
                    let source = Expr {
                        kind: ExprKind::Variable(name),
                        source: self.locate(source_start),
                    };
                    let key_values = self.key_values()?;
                    ExprKind::Copy {
                        source: Box::new(source),
                        key_values,
                    }
                } else {
                    let class = self.type_ref()?;
                    let key_values = self.key_values()?;
                    ExprKind::New { class, key_values }
                }
            }
            TokenKind::Ident(_) => {
                let target = self.type_ref()?;
                if self.check(&TokenKind::LParen) {
                    self.advance();
                    let mut arguments = Vec::new();
                    if !self.check(&TokenKind::RParen) {
                        loop {
                            arguments.push(self.expression()?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(&TokenKind::RParen)?;
                    ExprKind::Call {
                        function: target,
                        arguments,
                    }
                } else if self.eat(&TokenKind::Dot) {
                    let (value, _) = self.expect_ident()?;
                    ExprKind::EnumValue {
                        enumeration: target,
                        value,
                    }
                } else {
                    return Err(self.error_here("'(' or '.'"));
                }
            }
            _ => return Err(self.error_here("expression")),
        };
        Ok(Expr {
            kind,
            source: self.locate(start),
        })
    }
}
