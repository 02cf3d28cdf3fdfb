//! Parser for the supported JavaScript subset.
//!
//! A recursive-descent statement parser with Pratt-style expression
//! parsing. Produces the [`Program`] consumed by the compiler.

use crate::ast::{
    BinaryOp, DeclKind, Expr, ExprKind, LogicalOp, Program, Stmt, StmtKind, UnaryOp,
};
use crate::error::HostError;
use crate::lexer::{Lexer, Span, Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(source: &str) -> Result<Self, HostError> {
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Parser { tokens, pos: 0 })
    }

    pub fn parse_program(&mut self) -> Result<Program, HostError> {
        let mut body = Vec::new();
        while !self.check(&TokenKind::Eof) {
            body.push(self.parse_stmt()?);
        }
        Ok(Program { body })
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_stmt(&mut self) -> Result<Stmt, HostError> {
        let span = self.peek_span();
        let kind = match self.peek_kind() {
            TokenKind::Var => self.parse_var_decl(DeclKind::Var)?,
            TokenKind::Let => self.parse_var_decl(DeclKind::Let)?,
            TokenKind::Const => self.parse_var_decl(DeclKind::Const)?,
            TokenKind::Function => self.parse_function_decl()?,
            TokenKind::Return => {
                self.advance();
                let value = if self.check(&TokenKind::Semicolon)
                    || self.check(&TokenKind::RightBrace)
                    || self.check(&TokenKind::Eof)
                {
                    None
                } else {
                    Some(self.parse_expr(0)?)
                };
                self.eat_semicolon();
                StmtKind::Return(value)
            }
            TokenKind::If => self.parse_if()?,
            TokenKind::While => {
                self.advance();
                self.expect(TokenKind::LeftParen)?;
                let condition = self.parse_expr(0)?;
                self.expect(TokenKind::RightParen)?;
                let body = self.parse_block_or_single()?;
                StmtKind::While { condition, body }
            }
            TokenKind::Break => {
                self.advance();
                self.eat_semicolon();
                StmtKind::Break
            }
            TokenKind::Continue => {
                self.advance();
                self.eat_semicolon();
                StmtKind::Continue
            }
            TokenKind::Throw => {
                self.advance();
                let value = self.parse_expr(0)?;
                self.eat_semicolon();
                StmtKind::Throw(value)
            }
            TokenKind::Try => self.parse_try()?,
            TokenKind::LeftBrace => StmtKind::Block(self.parse_block()?),
            TokenKind::Semicolon => {
                self.advance();
                return self.parse_stmt();
            }
            _ => {
                let expr = self.parse_expr(0)?;
                self.eat_semicolon();
                StmtKind::Expression(expr)
            }
        };
        Ok(Stmt { kind, span })
    }

    fn parse_var_decl(&mut self, kind: DeclKind) -> Result<StmtKind, HostError> {
        self.advance();
        let name = self.expect_identifier()?;
        let init = if self.check(&TokenKind::Assign) {
            self.advance();
            Some(self.parse_expr(1)?)
        } else if kind == DeclKind::Const {
            let span = self.peek_span();
            return Err(HostError::compile(
                "missing initializer in const declaration",
                span.line,
                span.column,
            ));
        } else {
            None
        };
        self.eat_semicolon();
        Ok(StmtKind::VarDecl { kind, name, init })
    }

    fn parse_function_decl(&mut self) -> Result<StmtKind, HostError> {
        self.advance();
        let name = self.expect_identifier()?;
        self.expect(TokenKind::LeftParen)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                params.push(self.expect_identifier()?);
                if !self.check(&TokenKind::Comma) {
                    break;
                }
                self.advance();
            }
        }
        self.expect(TokenKind::RightParen)?;
        let body = self.parse_block()?;
        Ok(StmtKind::FunctionDecl { name, params, body })
    }

    fn parse_if(&mut self) -> Result<StmtKind, HostError> {
        self.advance();
        self.expect(TokenKind::LeftParen)?;
        let condition = self.parse_expr(0)?;
        self.expect(TokenKind::RightParen)?;
        let then_branch = self.parse_block_or_single()?;
        let else_branch = if self.check(&TokenKind::Else) {
            self.advance();
            if self.check(&TokenKind::If) {
                let span = self.peek_span();
                let nested = self.parse_if()?;
                Some(vec![Stmt { kind: nested, span }])
            } else {
                Some(self.parse_block_or_single()?)
            }
        } else {
            None
        };
        Ok(StmtKind::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn parse_try(&mut self) -> Result<StmtKind, HostError> {
        let try_span = self.peek_span();
        self.advance();
        let block = self.parse_block()?;
        if !self.check(&TokenKind::Catch) {
            return Err(HostError::compile(
                "try without catch",
                try_span.line,
                try_span.column,
            ));
        }
        self.advance();
        let param = if self.check(&TokenKind::LeftParen) {
            self.advance();
            let name = self.expect_identifier()?;
            self.expect(TokenKind::RightParen)?;
            Some(name)
        } else {
            None
        };
        let handler = self.parse_block()?;
        Ok(StmtKind::Try {
            block,
            param,
            handler,
        })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, HostError> {
        self.expect(TokenKind::LeftBrace)?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::RightBrace) {
            if self.check(&TokenKind::Eof) {
                let span = self.peek_span();
                return Err(HostError::compile(
                    "unexpected end of input, expected '}'",
                    span.line,
                    span.column,
                ));
            }
            body.push(self.parse_stmt()?);
        }
        self.advance();
        Ok(body)
    }

    fn parse_block_or_single(&mut self) -> Result<Vec<Stmt>, HostError> {
        if self.check(&TokenKind::LeftBrace) {
            self.parse_block()
        } else {
            Ok(vec![self.parse_stmt()?])
        }
    }

    // ------------------------------------------------------------------
    // Expressions (Pratt)
    // ------------------------------------------------------------------

    fn parse_expr(&mut self, min_bp: u8) -> Result<Expr, HostError> {
        let mut left = self.parse_unary()?;

        loop {
            let (op_bp, kind) = match self.peek_kind() {
                TokenKind::Assign => (1, None),
                TokenKind::PipePipe => (2, Some(InfixKind::Logical(LogicalOp::Or))),
                TokenKind::AmpAmp => (3, Some(InfixKind::Logical(LogicalOp::And))),
                TokenKind::Eq => (4, Some(InfixKind::Binary(BinaryOp::Eq))),
                TokenKind::NotEq => (4, Some(InfixKind::Binary(BinaryOp::NotEq))),
                TokenKind::StrictEq => (4, Some(InfixKind::Binary(BinaryOp::StrictEq))),
                TokenKind::StrictNotEq => (4, Some(InfixKind::Binary(BinaryOp::StrictNotEq))),
                TokenKind::Lt => (5, Some(InfixKind::Binary(BinaryOp::Lt))),
                TokenKind::LtEq => (5, Some(InfixKind::Binary(BinaryOp::LtEq))),
                TokenKind::Gt => (5, Some(InfixKind::Binary(BinaryOp::Gt))),
                TokenKind::GtEq => (5, Some(InfixKind::Binary(BinaryOp::GtEq))),
                TokenKind::Plus => (6, Some(InfixKind::Binary(BinaryOp::Add))),
                TokenKind::Minus => (6, Some(InfixKind::Binary(BinaryOp::Sub))),
                TokenKind::Star => (7, Some(InfixKind::Binary(BinaryOp::Mul))),
                TokenKind::Slash => (7, Some(InfixKind::Binary(BinaryOp::Div))),
                TokenKind::Percent => (7, Some(InfixKind::Binary(BinaryOp::Mod))),
                _ => break,
            };

            if op_bp < min_bp {
                break;
            }

            let span = left.span;
            match kind {
                None => {
                    // Assignment is right-associative; validate the target.
                    if !matches!(
                        left.kind,
                        ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::Index { .. }
                    ) {
                        return Err(HostError::compile(
                            "invalid assignment target",
                            span.line,
                            span.column,
                        ));
                    }
                    self.advance();
                    let value = self.parse_expr(op_bp)?;
                    left = Expr {
                        kind: ExprKind::Assign {
                            target: Box::new(left),
                            value: Box::new(value),
                        },
                        span,
                    };
                }
                Some(InfixKind::Logical(op)) => {
                    self.advance();
                    let right = self.parse_expr(op_bp + 1)?;
                    left = Expr {
                        kind: ExprKind::Logical {
                            op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        span,
                    };
                }
                Some(InfixKind::Binary(op)) => {
                    self.advance();
                    let right = self.parse_expr(op_bp + 1)?;
                    left = Expr {
                        kind: ExprKind::Binary {
                            op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        span,
                    };
                }
            }
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, HostError> {
        let span = self.peek_span();
        let op = match self.peek_kind() {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Typeof => Some(UnaryOp::Typeof),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                span,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, HostError> {
        let mut expr = self.parse_primary()?;
        loop {
            let span = expr.span;
            match self.peek_kind() {
                TokenKind::LeftParen => {
                    let args = self.parse_args()?;
                    expr = Expr {
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    };
                }
                TokenKind::Dot => {
                    self.advance();
                    let property = self.expect_identifier()?;
                    expr = Expr {
                        kind: ExprKind::Member {
                            object: Box::new(expr),
                            property,
                        },
                        span,
                    };
                }
                TokenKind::LeftBracket => {
                    self.advance();
                    let index = self.parse_expr(0)?;
                    self.expect(TokenKind::RightBracket)?;
                    expr = Expr {
                        kind: ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, HostError> {
        let span = self.peek_span();
        let kind = match self.peek_kind().clone() {
            TokenKind::Number(n) => {
                self.advance();
                ExprKind::Number(n)
            }
            TokenKind::String(s) => {
                self.advance();
                ExprKind::String(s)
            }
            TokenKind::True => {
                self.advance();
                ExprKind::Boolean(true)
            }
            TokenKind::False => {
                self.advance();
                ExprKind::Boolean(false)
            }
            TokenKind::Null => {
                self.advance();
                ExprKind::Null
            }
            TokenKind::Identifier(name) => {
                self.advance();
                ExprKind::Ident(name)
            }
            TokenKind::New => {
                self.advance();
                let callee = self.parse_postfix_no_call()?;
                let args = if self.check(&TokenKind::LeftParen) {
                    self.parse_args()?
                } else {
                    Vec::new()
                };
                ExprKind::New {
                    callee: Box::new(callee),
                    args,
                }
            }
            TokenKind::LeftParen => {
                self.advance();
                let expr = self.parse_expr(0)?;
                self.expect(TokenKind::RightParen)?;
                return Ok(expr);
            }
            TokenKind::LeftBracket => {
                self.advance();
                let mut elements = Vec::new();
                while !self.check(&TokenKind::RightBracket) {
                    elements.push(self.parse_expr(1)?);
                    if self.check(&TokenKind::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.expect(TokenKind::RightBracket)?;
                ExprKind::Array(elements)
            }
            TokenKind::LeftBrace => {
                self.advance();
                let mut entries = Vec::new();
                while !self.check(&TokenKind::RightBrace) {
                    let key = self.expect_property_key()?;
                    self.expect(TokenKind::Colon)?;
                    let value = self.parse_expr(1)?;
                    entries.push((key, value));
                    if self.check(&TokenKind::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.expect(TokenKind::RightBrace)?;
                ExprKind::Object(entries)
            }
            other => {
                return Err(HostError::compile(
                    format!("unexpected token {:?}", other),
                    span.line,
                    span.column,
                ));
            }
        };
        Ok(Expr { kind, span })
    }

    /// Member chain without calls, for `new X.Y(...)` callees.
    fn parse_postfix_no_call(&mut self) -> Result<Expr, HostError> {
        let mut expr = self.parse_primary()?;
        while self.check(&TokenKind::Dot) {
            let span = expr.span;
            self.advance();
            let property = self.expect_identifier()?;
            expr = Expr {
                kind: ExprKind::Member {
                    object: Box::new(expr),
                    property,
                },
                span,
            };
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, HostError> {
        self.expect(TokenKind::LeftParen)?;
        let mut args = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                args.push(self.parse_expr(1)?);
                if !self.check(&TokenKind::Comma) {
                    break;
                }
                self.advance();
            }
        }
        self.expect(TokenKind::RightParen)?;
        Ok(args)
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        // tokenize() always ends with Eof and advance() never passes it
        static EOF: Token = Token {
            kind: TokenKind::Eof,
            span: Span {
                start: 0,
                end: 0,
                line: 0,
                column: 0,
            },
        };
        self.tokens.get(self.pos).unwrap_or(&EOF)
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_span(&self) -> Span {
        self.peek().span
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len().saturating_sub(1) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), HostError> {
        if self.check(&kind) {
            self.advance();
            Ok(())
        } else {
            let span = self.peek_span();
            Err(HostError::compile(
                format!("expected {:?}, found {:?}", kind, self.peek_kind()),
                span.line,
                span.column,
            ))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, HostError> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            other => {
                let span = self.peek_span();
                Err(HostError::compile(
                    format!("expected identifier, found {:?}", other),
                    span.line,
                    span.column,
                ))
            }
        }
    }

    fn expect_property_key(&mut self) -> Result<String, HostError> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(s)
            }
            TokenKind::Number(n) => {
                self.advance();
                Ok(crate::value::number_to_string(n))
            }
            other => {
                let span = self.peek_span();
                Err(HostError::compile(
                    format!("expected property key, found {:?}", other),
                    span.line,
                    span.column,
                ))
            }
        }
    }

    fn eat_semicolon(&mut self) {
        if self.check(&TokenKind::Semicolon) {
            self.advance();
        }
    }
}

enum InfixKind {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Program {
        Parser::new(source).unwrap().parse_program().unwrap()
    }

    #[test]
    fn precedence_mul_over_add() {
        let program = parse("1 + 2 * 3");
        let StmtKind::Expression(expr) = &program.body[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Binary { op, right, .. } = &expr.kind else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn assignment_is_right_associative() {
        let program = parse("a = b = 1");
        let StmtKind::Expression(expr) = &program.body[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Assign { value, .. } = &expr.kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, ExprKind::Assign { .. }));
    }

    #[test]
    fn assignment_to_literal_rejected() {
        let err = Parser::new("1 = 2").unwrap().parse_program().unwrap_err();
        assert!(matches!(err, HostError::Compile { .. }));
    }

    #[test]
    fn new_expression_with_args() {
        let program = parse("new Error('x')");
        let StmtKind::Expression(expr) = &program.body[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::New { callee, args } = &expr.kind else {
            panic!("expected new expression");
        };
        assert!(matches!(callee.kind, ExprKind::Ident(ref n) if n == "Error"));
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn function_declaration() {
        let program = parse("function add(a, b) { return a + b; }");
        let StmtKind::FunctionDecl { name, params, body } = &program.body[0].kind else {
            panic!("expected function declaration");
        };
        assert_eq!(name, "add");
        assert_eq!(params, &["a".to_string(), "b".to_string()]);
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn try_catch_with_binding() {
        let program = parse("try { f(); } catch (e) { g(e); }");
        let StmtKind::Try { param, .. } = &program.body[0].kind else {
            panic!("expected try statement");
        };
        assert_eq!(param.as_deref(), Some("e"));
    }

    #[test]
    fn const_requires_initializer() {
        let err = Parser::new("const x;").unwrap().parse_program().unwrap_err();
        assert!(matches!(err, HostError::Compile { .. }));
    }

    #[test]
    fn member_and_index_chains() {
        let program = parse("a.b[0].c");
        let StmtKind::Expression(expr) = &program.body[0].kind else {
            panic!("expected expression statement");
        };
        assert!(matches!(expr.kind, ExprKind::Member { .. }));
    }
}
