//! Lexer for the supported JavaScript subset.
//!
//! Converts source text into a stream of tokens with line/column spans.

use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::HostError;

/// Source span information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

impl Default for Span {
    fn default() -> Self {
        Span {
            start: 0,
            end: 0,
            line: 1,
            column: 1,
        }
    }
}

/// Token types.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Number(f64),
    String(String),
    True,
    False,
    Null,

    Identifier(String),

    // Keywords
    Var,
    Let,
    Const,
    Function,
    Return,
    If,
    Else,
    While,
    Break,
    Continue,
    Throw,
    Try,
    Catch,
    New,
    Typeof,

    // Punctuation and operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    Eq,
    StrictEq,
    NotEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AmpAmp,
    PipePipe,
    Bang,
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
        }
    }

    /// Tokenize the whole input. The final token is always `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, HostError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token, HostError> {
        self.skip_whitespace_and_comments()?;

        let (start, line, column) = (self.offset(), self.line, self.column);
        let ch = match self.advance() {
            Some(c) => c,
            None => {
                return Ok(Token {
                    kind: TokenKind::Eof,
                    span: Span {
                        start,
                        end: start,
                        line,
                        column,
                    },
                })
            }
        };

        let kind = match ch {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            '{' => TokenKind::LeftBrace,
            '}' => TokenKind::RightBrace,
            '[' => TokenKind::LeftBracket,
            ']' => TokenKind::RightBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            '.' => TokenKind::Dot,
            '=' => {
                if self.eat('=') {
                    if self.eat('=') {
                        TokenKind::StrictEq
                    } else {
                        TokenKind::Eq
                    }
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if self.eat('=') {
                    if self.eat('=') {
                        TokenKind::StrictNotEq
                    } else {
                        TokenKind::NotEq
                    }
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
            '&' => {
                if self.eat('&') {
                    TokenKind::AmpAmp
                } else {
                    return Err(HostError::compile("unexpected character '&'", line, column));
                }
            }
            '|' => {
                if self.eat('|') {
                    TokenKind::PipePipe
                } else {
                    return Err(HostError::compile("unexpected character '|'", line, column));
                }
            }
            '\'' | '"' => self.string(ch, line, column)?,
            c if c.is_ascii_digit() => self.number(start, line, column)?,
            c if is_ident_start(c) => self.identifier(start),
            c => {
                return Err(HostError::compile(
                    format!("unexpected character '{}'", c),
                    line,
                    column,
                ))
            }
        };

        Ok(Token {
            kind,
            span: Span {
                start,
                end: self.offset(),
                line,
                column,
            },
        })
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), HostError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') => {
                    let mut lookahead = self.chars.clone();
                    lookahead.next();
                    match lookahead.peek().map(|(_, c)| *c) {
                        Some('/') => {
                            while let Some(c) = self.peek() {
                                if c == '\n' {
                                    break;
                                }
                                self.advance();
                            }
                        }
                        Some('*') => {
                            let (line, column) = (self.line, self.column);
                            self.advance(); // '/'
                            self.advance(); // '*'
                            let mut closed = false;
                            while let Some(c) = self.advance() {
                                if c == '*' && self.eat('/') {
                                    closed = true;
                                    break;
                                }
                            }
                            if !closed {
                                return Err(HostError::compile(
                                    "unterminated block comment",
                                    line,
                                    column,
                                ));
                            }
                        }
                        _ => return Ok(()),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn string(&mut self, quote: char, line: u32, column: u32) -> Result<TokenKind, HostError> {
        let mut value = String::new();
        loop {
            match self.advance() {
                Some(c) if c == quote => break,
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('0') => value.push('\0'),
                    Some('\\') => value.push('\\'),
                    Some('\'') => value.push('\''),
                    Some('"') => value.push('"'),
                    Some('\n') => {} // line continuation
                    Some(c) => value.push(c),
                    None => {
                        return Err(HostError::compile("unterminated string", line, column));
                    }
                },
                Some('\n') | None => {
                    return Err(HostError::compile("unterminated string", line, column));
                }
                Some(c) => value.push(c),
            }
        }
        Ok(TokenKind::String(value))
    }

    fn number(&mut self, start: usize, line: u32, column: u32) -> Result<TokenKind, HostError> {
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some('.') {
            let mut lookahead = self.chars.clone();
            lookahead.next();
            if matches!(lookahead.peek(), Some((_, c)) if c.is_ascii_digit()) {
                self.advance(); // '.'
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let mut lookahead = self.chars.clone();
            lookahead.next();
            let next = lookahead.peek().map(|(_, c)| *c);
            if matches!(next, Some(c) if c.is_ascii_digit() || c == '+' || c == '-') {
                self.advance(); // 'e'
                if matches!(self.peek(), Some('+' | '-')) {
                    self.advance();
                }
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }

        let text = self.source.get(start..self.offset()).unwrap_or("");
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| HostError::compile(format!("invalid number '{}'", text), line, column))
    }

    fn identifier(&mut self, start: usize) -> TokenKind {
        while matches!(self.peek(), Some(c) if is_ident_continue(c)) {
            self.advance();
        }
        let text = self.source.get(start..self.offset()).unwrap_or("");
        match text {
            "var" => TokenKind::Var,
            "let" => TokenKind::Let,
            "const" => TokenKind::Const,
            "function" => TokenKind::Function,
            "return" => TokenKind::Return,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "throw" => TokenKind::Throw,
            "try" => TokenKind::Try,
            "catch" => TokenKind::Catch,
            "new" => TokenKind::New,
            "typeof" => TokenKind::Typeof,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            _ => TokenKind::Identifier(text.to_string()),
        }
    }

    fn offset(&mut self) -> usize {
        self.chars
            .peek()
            .map(|(i, _)| *i)
            .unwrap_or(self.source.len())
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn advance(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn arithmetic_tokens() {
        assert_eq!(
            kinds("1 + 2 * 3"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::Plus,
                TokenKind::Number(2.0),
                TokenKind::Star,
                TokenKind::Number(3.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strict_equality_is_three_chars() {
        assert_eq!(
            kinds("a === b !== c"),
            vec![
                TokenKind::Identifier("a".to_string()),
                TokenKind::StrictEq,
                TokenKind::Identifier("b".to_string()),
                TokenKind::StrictNotEq,
                TokenKind::Identifier("c".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#"'a\nb' "c\'d""#),
            vec![
                TokenKind::String("a\nb".to_string()),
                TokenKind::String("c'd".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("1 // one\n/* two\nthree */ 2"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::Number(2.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn spans_track_lines() {
        let tokens = Lexer::new("1\n  2").tokenize().unwrap();
        assert_eq!(tokens[0].span.line, 1);
        assert_eq!(tokens[1].span.line, 2);
        assert_eq!(tokens[1].span.column, 3);
    }

    #[test]
    fn unterminated_string_is_compile_error() {
        let err = Lexer::new("'abc").tokenize().unwrap_err();
        assert!(matches!(err, HostError::Compile { .. }));
    }

    #[test]
    fn scientific_notation() {
        assert_eq!(
            kinds("1.5e3"),
            vec![TokenKind::Number(1500.0), TokenKind::Eof]
        );
    }
}
