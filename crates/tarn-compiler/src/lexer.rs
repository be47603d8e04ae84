//! Pull lexer over source bytes.

use crate::token::{keyword, Token, TokenKind};
use crate::CompileError;

pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            source: source.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    /// Scan and return the next token.
    pub fn next_token(&mut self) -> Result<Token, CompileError> {
        self.skip_whitespace();
        let Some(c) = self.advance() else {
            return Ok(Token::eof(self.line));
        };

        match c {
            b'(' => Ok(self.simple(TokenKind::LParen)),
            b')' => Ok(self.simple(TokenKind::RParen)),
            b'{' => Ok(self.simple(TokenKind::LBrace)),
            b'}' => Ok(self.simple(TokenKind::RBrace)),
            b'[' => Ok(self.simple(TokenKind::LBracket)),
            b']' => Ok(self.simple(TokenKind::RBracket)),
            b',' => Ok(self.simple(TokenKind::Comma)),
            b':' => Ok(self.simple(TokenKind::Colon)),
            b';' => Ok(self.simple(TokenKind::Semicolon)),
            b'&' => Ok(self.simple(TokenKind::Amp)),
            b'|' => Ok(self.simple(TokenKind::Pipe)),

            b'.' => {
                if self.matches(b'.') {
                    Ok(self.simple(TokenKind::DotDot))
                } else {
                    Ok(self.simple(TokenKind::Dot))
                }
            }
            b'+' => {
                if self.matches(b'=') {
                    Ok(self.simple(TokenKind::PlusEq))
                } else {
                    Ok(self.simple(TokenKind::Plus))
                }
            }
            b'-' => {
                if self.matches(b'=') {
                    Ok(self.simple(TokenKind::MinusEq))
                } else {
                    Ok(self.simple(TokenKind::Minus))
                }
            }
            b'*' => {
                if self.matches(b'=') {
                    Ok(self.simple(TokenKind::StarEq))
                } else {
                    Ok(self.simple(TokenKind::Star))
                }
            }
            b'%' => {
                if self.matches(b'=') {
                    Ok(self.simple(TokenKind::PercentEq))
                } else {
                    Ok(self.simple(TokenKind::Percent))
                }
            }
            b'/' => {
                if self.matches(b'=') {
                    Ok(self.simple(TokenKind::SlashEq))
                } else {
                    Ok(self.simple(TokenKind::Slash))
                }
            }
            b'=' => {
                if self.matches(b'=') {
                    Ok(self.simple(TokenKind::EqEq))
                } else {
                    Ok(self.simple(TokenKind::Eq))
                }
            }
            b'!' => {
                if self.matches(b'=') {
                    Ok(self.simple(TokenKind::BangEq))
                } else {
                    Ok(self.simple(TokenKind::Bang))
                }
            }
            b'>' => {
                if self.matches(b'=') {
                    Ok(self.simple(TokenKind::GtEq))
                } else if self.matches(b'>') {
                    Ok(self.simple(TokenKind::GtGt))
                } else {
                    Ok(self.simple(TokenKind::Gt))
                }
            }
            b'<' => {
                if self.matches(b'=') {
                    Ok(self.simple(TokenKind::LtEq))
                } else if self.matches(b'<') {
                    Ok(self.simple(TokenKind::LtLt))
                } else {
                    Ok(self.simple(TokenKind::Lt))
                }
            }

            b'"' => self.string(),
            c if c.is_ascii_digit() => Ok(self.number(c)),
            c if c == b'_' || c.is_ascii_alphabetic() => Ok(self.identifier(c)),

            c => Err(CompileError::new(
                format!("Unexpected character '{}'.", c as char),
                self.line,
            )),
        }
    }

    // ---- Helpers ----

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn simple(&self, kind: TokenKind) -> Token {
        Token {
            kind,
            text: String::new(),
            line: self.line,
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.advance();
                }
                // Line comments run to end of line.
                Some(b'/') if self.peek_next() == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn string(&mut self) -> Result<Token, CompileError> {
        let line = self.line;
        let mut bytes = Vec::new();
        loop {
            match self.advance() {
                None => return Err(CompileError::new("Unterminated string.", line)),
                Some(b'"') => break,
                Some(b'\\') => match self.advance() {
                    Some(b'n') => bytes.push(b'\n'),
                    Some(b't') => bytes.push(b'\t'),
                    Some(b'\\') => bytes.push(b'\\'),
                    Some(b'"') => bytes.push(b'"'),
                    Some(b'0') => bytes.push(b'\0'),
                    Some(c) => {
                        return Err(CompileError::new(
                            format!("Unknown escape sequence '\\{}'.", c as char),
                            self.line,
                        ))
                    }
                    None => return Err(CompileError::new("Unterminated string.", line)),
                },
                // Raw bytes of the source span; any multi-byte UTF-8
                // sequence passes through intact.
                Some(c) => bytes.push(c),
            }
        }
        let text = String::from_utf8(bytes)
            .map_err(|_| CompileError::new("Invalid UTF-8 in string literal.", line))?;
        Ok(Token {
            kind: TokenKind::Str,
            text,
            line,
        })
    }

    fn number(&mut self, first: u8) -> Token {
        let line = self.line;
        let mut text = String::new();
        text.push(first as char);
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c as char);
                self.advance();
            } else {
                break;
            }
        }
        // Fractional part; a lone '.' is the field-access operator.
        if self.peek() == Some(b'.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c as char);
                    self.advance();
                } else {
                    break;
                }
            }
        }
        Token {
            kind: TokenKind::Num,
            text,
            line,
        }
    }

    fn identifier(&mut self, first: u8) -> Token {
        let line = self.line;
        let mut text = String::new();
        text.push(first as char);
        while let Some(c) = self.peek() {
            if c == b'_' || c.is_ascii_alphanumeric() {
                text.push(c as char);
                self.advance();
            } else {
                break;
            }
        }
        let kind = keyword(&text).unwrap_or(TokenKind::Ident);
        Token { kind, text, line }
    }
}
