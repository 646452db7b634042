//! UTF-8 source text to tokens.
//!
//! Grounded on `original_source/src/emerald/lexer.c`'s `em_lexer_make_tokens`
//! character-class dispatch loop: whitespace/comment skip, digit →
//! `make_number`, ident-start → `make_identifier` (then keyword retype),
//! string delimiter → `make_string`, then the single/double-char operator
//! ladder (`=`/`<`/`>`/`!` look one character ahead).

use std::rc::Rc;

use crate::diagnostics::RaisedError;
use crate::position::Position;
use crate::token::{Keyword, Token, TokenKind};

fn is_digit(c: char) -> bool {
    c.is_ascii_digit()
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_cont(c: char) -> bool {
    is_ident_start(c) || is_digit(c)
}

fn escape_char(c: char) -> char {
    match c {
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        'e' => '\x1b',
        other => other,
    }
}

pub struct Lexer {
    pos: Position,
}

impl Lexer {
    #[must_use]
    pub fn new(path: impl Into<Rc<str>>, text: impl Into<Rc<str>>) -> Self {
        let mut pos = Position::new(path, text);
        pos.advance();
        Self { pos }
    }

    /// Run `make_tokens` to completion, returning the full token stream
    /// (always ending in `Eof`) or the first `SyntaxError` encountered.
    pub fn tokenize(mut self) -> Result<Vec<Token>, RaisedError> {
        let mut tokens = Vec::new();
        loop {
            let c = self.pos.current_char;
            if c == '\0' && self.pos.is_eof() {
                break;
            }
            if c == '\0' {
                break;
            }

            if c == ' ' || c == '\t' || c == '\n' || c == '\r' {
                self.pos.advance();
            } else if c == '#' {
                while self.pos.current_char != '\n' && !(self.pos.current_char == '\0' && self.pos.is_eof()) {
                    self.pos.advance();
                }
            } else if is_digit(c) {
                tokens.push(self.make_number());
            } else if is_ident_start(c) {
                tokens.push(self.make_identifier());
            } else if c == '\'' || c == '"' {
                tokens.push(self.make_string()?);
            } else if let Some(tok) = self.make_operator()? {
                tokens.push(tok);
            }
        }
        let eof_pos = self.pos.clone();
        tokens.push(Token::new(TokenKind::Eof, eof_pos));
        Ok(tokens)
    }

    fn make_number(&mut self) -> Token {
        let start = self.pos.clone();
        let mut text = String::new();
        let mut is_float = false;
        while is_digit(self.pos.current_char) || self.pos.current_char == '.' {
            if self.pos.current_char == '.' {
                if is_float {
                    break;
                }
                is_float = true;
            }
            text.push(self.pos.current_char);
            self.pos.advance();
        }
        let kind = if is_float {
            TokenKind::Float(text.parse().unwrap_or(0.0))
        } else {
            TokenKind::Int(text.parse().unwrap_or(0))
        };
        Token::new(kind, start)
    }

    fn make_identifier(&mut self) -> Token {
        let start = self.pos.clone();
        let mut text = String::new();
        while is_ident_cont(self.pos.current_char) {
            text.push(self.pos.current_char);
            self.pos.advance();
        }
        let kind = match Keyword::from_str(&text) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Ident(Rc::from(text.as_str())),
        };
        Token::new(kind, start)
    }

    fn make_string(&mut self) -> Result<Token, RaisedError> {
        let start = self.pos.clone();
        let delim = self.pos.current_char;
        self.pos.advance();

        let mut chars = Vec::new();
        loop {
            let c = self.pos.current_char;
            if c == '\0' && self.pos.is_eof() {
                return Err(RaisedError::syntax("Unexpected end of file", &self.pos));
            }
            if c == delim {
                break;
            }
            if c == '\\' {
                self.pos.advance();
                chars.push(escape_char(self.pos.current_char));
            } else {
                chars.push(c);
            }
            self.pos.advance();
        }
        self.pos.advance(); // consume closing delimiter
        Ok(Token::new(TokenKind::String(Rc::from(chars)), start))
    }

    /// Single-char operators and the `=`/`<`/`>`/`!` two-char lookaheads.
    fn make_operator(&mut self) -> Result<Option<Token>, RaisedError> {
        let start = self.pos.clone();
        let c = self.pos.current_char;

        macro_rules! single {
            ($kind:expr) => {{
                self.pos.advance();
                Ok(Some(Token::new($kind, start)))
            }};
        }

        match c {
            '+' => single!(TokenKind::Plus),
            '-' => single!(TokenKind::Minus),
            '*' => single!(TokenKind::Star),
            '/' => single!(TokenKind::Slash),
            '%' => single!(TokenKind::Percent),
            '(' => single!(TokenKind::LParen),
            ')' => single!(TokenKind::RParen),
            '[' => single!(TokenKind::LBracket),
            ']' => single!(TokenKind::RBracket),
            '{' => single!(TokenKind::LBrace),
            '}' => single!(TokenKind::RBrace),
            ',' => single!(TokenKind::Comma),
            ':' => single!(TokenKind::Colon),
            '.' => single!(TokenKind::Dot),
            '&' => single!(TokenKind::Amp),
            '|' => single!(TokenKind::Pipe),
            '~' => single!(TokenKind::Tilde),
            '=' => {
                self.pos.advance();
                if self.pos.current_char == '=' {
                    self.pos.advance();
                    Ok(Some(Token::new(TokenKind::EqEq, start)))
                } else {
                    Ok(Some(Token::new(TokenKind::Eq, start)))
                }
            }
            '<' => {
                self.pos.advance();
                if self.pos.current_char == '=' {
                    self.pos.advance();
                    Ok(Some(Token::new(TokenKind::LtEq, start)))
                } else if self.pos.current_char == '<' {
                    self.pos.advance();
                    Ok(Some(Token::new(TokenKind::Shl, start)))
                } else {
                    Ok(Some(Token::new(TokenKind::Lt, start)))
                }
            }
            '>' => {
                self.pos.advance();
                if self.pos.current_char == '=' {
                    self.pos.advance();
                    Ok(Some(Token::new(TokenKind::GtEq, start)))
                } else if self.pos.current_char == '>' {
                    self.pos.advance();
                    Ok(Some(Token::new(TokenKind::Shr, start)))
                } else {
                    Ok(Some(Token::new(TokenKind::Gt, start)))
                }
            }
            '!' => {
                self.pos.advance();
                if self.pos.current_char != '=' {
                    return Err(RaisedError::syntax("Expected '='", &self.pos));
                }
                self.pos.advance();
                Ok(Some(Token::new(TokenKind::NotEq, start)))
            }
            other => Err(RaisedError::syntax(format!("Unrecognized character '{other}'"), &start)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new("t", src).tokenize().unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokenizes_arithmetic_expression() {
        let k = kinds("1 + 2 * 3");
        assert_eq!(
            k,
            vec![
                TokenKind::Int(1),
                TokenKind::Plus,
                TokenKind::Int(2),
                TokenKind::Star,
                TokenKind::Int(3),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn retypes_keyword_identifiers() {
        let k = kinds("if end");
        assert_eq!(
            k,
            vec![
                TokenKind::Keyword(Keyword::If),
                TokenKind::Keyword(Keyword::End),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn skips_comments_to_end_of_line() {
        let k = kinds("1 # comment\n2");
        assert_eq!(k, vec![TokenKind::Int(1), TokenKind::Int(2), TokenKind::Eof]);
    }

    #[test]
    fn two_char_operators() {
        let k = kinds("== != <= >= << >>");
        assert_eq!(
            k,
            vec![
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::LtEq,
                TokenKind::GtEq,
                TokenKind::Shl,
                TokenKind::Shr,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes() {
        let k = kinds(r#""a\nb\"c""#);
        match &k[0] {
            TokenKind::String(chars) => {
                let s: String = chars.iter().collect();
                assert_eq!(s, "a\nb\"c");
            }
            other => panic!("expected string token, got {other:?}"),
        }
    }

    #[test]
    fn unterminated_string_is_syntax_error() {
        let result = Lexer::new("t", "\"abc").tokenize();
        assert!(result.is_err());
    }

    #[test]
    fn unrecognized_character_is_syntax_error() {
        let result = Lexer::new("t", "1 ^ 2").tokenize();
        assert!(result.is_err());
    }
}
