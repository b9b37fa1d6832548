// wisp scanner
// Changelog:
//      Initial version: lazy one-token-at-a-time scanner over a source
//      slice. No escapes in string literals, no exponents in numbers,
//      matching the original grammar this interpreter targets.

use crate::common::token::{Token, TokenType};

pub struct Scanner<'src> {
    source: &'src str,
    bytes: &'src [u8],
    start: usize,
    current: usize,
    line: u32,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Self {
        Self { source, bytes: source.as_bytes(), start: 0, current: 0, line: 1 }
    }

    pub fn next_token(&mut self) -> Token<'src> {
        self.skip_whitespace();
        self.start = self.current;

        if self.is_at_end() {
            return self.make_token(TokenType::Eof);
        }

        let c = self.advance();

        if c.is_ascii_digit() {
            return self.number();
        }
        if is_alpha(c) {
            return self.identifier();
        }

        match c {
            b'(' => self.make_token(TokenType::LeftParen),
            b')' => self.make_token(TokenType::RightParen),
            b'{' => self.make_token(TokenType::LeftBrace),
            b'}' => self.make_token(TokenType::RightBrace),
            b',' => self.make_token(TokenType::Comma),
            b'.' => self.make_token(TokenType::Dot),
            b';' => self.make_token(TokenType::Semicolon),
            b'-' => self.make_token(TokenType::Minus),
            b'+' => self.make_token(TokenType::Plus),
            b'/' => self.make_token(TokenType::Slash),
            b'*' => self.make_token(TokenType::Star),
            b'!' => {
                let kind = if self.matches(b'=') { TokenType::BangEqual } else { TokenType::Bang };
                self.make_token(kind)
            }
            b'=' => {
                let kind = if self.matches(b'=') { TokenType::EqualEqual } else { TokenType::Equal };
                self.make_token(kind)
            }
            b'<' => {
                let kind = if self.matches(b'=') { TokenType::LessEqual } else { TokenType::Less };
                self.make_token(kind)
            }
            b'>' => {
                let kind =
                    if self.matches(b'=') { TokenType::GreaterEqual } else { TokenType::Greater };
                self.make_token(kind)
            }
            b'"' => self.string(),
            _ => self.error_token("Unexpected character."),
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.bytes.len()
    }

    fn advance(&mut self) -> u8 {
        let c = self.bytes[self.current];
        self.current += 1;
        c
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() { 0 } else { self.bytes[self.current] }
    }

    fn peek_next(&self) -> u8 {
        if self.current + 1 >= self.bytes.len() { 0 } else { self.bytes[self.current + 1] }
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.bytes[self.current] != expected {
            return false;
        }
        self.current += 1;
        true
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\r' | b'\t' => {
                    self.advance();
                }
                b'\n' => {
                    self.line += 1;
                    self.advance();
                }
                b'/' if self.peek_next() == b'/' => {
                    while self.peek() != b'\n' && !self.is_at_end() {
                        self.advance();
                    }
                }
                _ => return,
            }
        }
    }

    fn string(&mut self) -> Token<'src> {
        while self.peek() != b'"' && !self.is_at_end() {
            if self.peek() == b'\n' {
                self.line += 1;
            }
            self.advance();
        }

        if self.is_at_end() {
            return self.error_token("Unterminated string.");
        }

        self.advance();
        self.make_token(TokenType::String)
    }

    fn number(&mut self) -> Token<'src> {
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        if self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        self.make_token(TokenType::Number)
    }

    fn identifier(&mut self) -> Token<'src> {
        while is_alpha(self.peek()) || self.peek().is_ascii_digit() {
            self.advance();
        }
        self.make_token(self.identifier_type())
    }

    /// Hand-rolled trie over the keyword set, matched on first byte then
    /// the tail via `check_keyword`.
    fn identifier_type(&self) -> TokenType {
        let text = &self.source[self.start..self.current];
        let bytes = text.as_bytes();
        match bytes.first() {
            Some(b'a') => self.check_keyword(1, "nd", TokenType::And),
            Some(b'c') => self.check_keyword(1, "lass", TokenType::Class),
            Some(b'e') => self.check_keyword(1, "lse", TokenType::Else),
            Some(b'f') if bytes.len() > 1 => match bytes[1] {
                b'a' => self.check_keyword(2, "lse", TokenType::False),
                b'o' => self.check_keyword(2, "r", TokenType::For),
                b'u' => self.check_keyword(2, "n", TokenType::Fun),
                _ => TokenType::Identifier,
            },
            Some(b'i') => self.check_keyword(1, "f", TokenType::If),
            Some(b'n') => self.check_keyword(1, "il", TokenType::Nil),
            Some(b'o') => self.check_keyword(1, "r", TokenType::Or),
            Some(b'p') => self.check_keyword(1, "rint", TokenType::Print),
            Some(b'r') => self.check_keyword(1, "eturn", TokenType::Return),
            Some(b's') => self.check_keyword(1, "uper", TokenType::Super),
            Some(b't') if bytes.len() > 1 => match bytes[1] {
                b'h' => self.check_keyword(2, "is", TokenType::This),
                b'r' => self.check_keyword(2, "ue", TokenType::True),
                _ => TokenType::Identifier,
            },
            Some(b'v') => self.check_keyword(1, "ar", TokenType::Var),
            Some(b'w') => self.check_keyword(1, "hile", TokenType::While),
            _ => TokenType::Identifier,
        }
    }

    fn check_keyword(&self, offset: usize, rest: &str, kind: TokenType) -> TokenType {
        let text = &self.source[self.start..self.current];
        if &text[offset..] == rest { kind } else { TokenType::Identifier }
    }

    fn make_token(&self, kind: TokenType) -> Token<'src> {
        Token { kind, text: &self.source[self.start..self.current], line: self.line }
    }

    fn error_token(&self, message: &'static str) -> Token<'src> {
        Token { kind: TokenType::Error, text: message, line: self.line }
    }
}

fn is_alpha(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenType> {
        let mut scanner = Scanner::new(src);
        let mut out = Vec::new();
        loop {
            let tok = scanner.next_token();
            let done = tok.kind == TokenType::Eof;
            out.push(tok.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn scans_keywords_and_identifiers() {
        assert_eq!(
            kinds("var foo = nil;"),
            vec![
                TokenType::Var,
                TokenType::Identifier,
                TokenType::Equal,
                TokenType::Nil,
                TokenType::Semicolon,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn distinguishes_keyword_prefixes_from_identifiers() {
        assert_eq!(kinds("forge")[0], TokenType::Identifier);
        assert_eq!(kinds("for")[0], TokenType::For);
        assert_eq!(kinds("this")[0], TokenType::This);
        assert_eq!(kinds("thisx")[0], TokenType::Identifier);
    }

    #[test]
    fn skips_line_comments_and_tracks_lines() {
        let mut scanner = Scanner::new("// comment\nvar");
        let tok = scanner.next_token();
        assert_eq!(tok.kind, TokenType::Var);
        assert_eq!(tok.line, 2);
    }

    #[test]
    fn unterminated_string_is_an_error_token() {
        let mut scanner = Scanner::new("\"abc");
        let tok = scanner.next_token();
        assert_eq!(tok.kind, TokenType::Error);
        assert_eq!(tok.text, "Unterminated string.");
    }

    #[test]
    fn two_char_operators_are_greedy() {
        assert_eq!(kinds("<=")[0], TokenType::LessEqual);
        assert_eq!(kinds("<")[0], TokenType::Less);
    }
}
