// Line-tracked tokenizer over a byte stream with a single lookahead
// character. Comments and whitespace are consumed here; the parser only ever
// sees proper symbols.

use crate::{CompileError, TOOL_NAME};
use std::fmt;
use std::fs;
use std::path::Path;

pub const MAX_IDENTIFIER_LENGTH: usize = 64;
pub const MAX_INTEGER_LENGTH: usize = 20;
pub const MAX_STRING_LENGTH: usize = 128;

pub const CHAR_BACKSPACE: u8 = 8;
pub const CHAR_TAB: u8 = 9;
pub const CHAR_LF: u8 = 10;
pub const CHAR_CR: u8 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Eof,
    Identifier,
    Integer,
    Character,
    Str,
    Void,
    Uint32,
    If,
    Else,
    While,
    Return,
    Semicolon,
    Plus,
    Minus,
    Asterisk,
    Div,
    Mod,
    Assign,
    Equality,
    NotEq,
    Lt,
    Leq,
    Gt,
    Geq,
    LParenthesis,
    RParenthesis,
    LBrace,
    RBrace,
    Comma,
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Symbol::Eof => "end of file",
            Symbol::Identifier => "identifier",
            Symbol::Integer => "integer",
            Symbol::Character => "character",
            Symbol::Str => "string",
            Symbol::Void => "void",
            Symbol::Uint32 => "uint32_t",
            Symbol::If => "if",
            Symbol::Else => "else",
            Symbol::While => "while",
            Symbol::Return => "return",
            Symbol::Semicolon => ";",
            Symbol::Plus => "+",
            Symbol::Minus => "-",
            Symbol::Asterisk => "*",
            Symbol::Div => "/",
            Symbol::Mod => "%",
            Symbol::Assign => "=",
            Symbol::Equality => "==",
            Symbol::NotEq => "!=",
            Symbol::Lt => "<",
            Symbol::Leq => "<=",
            Symbol::Gt => ">",
            Symbol::Geq => ">=",
            Symbol::LParenthesis => "(",
            Symbol::RParenthesis => ")",
            Symbol::LBrace => "{",
            Symbol::RBrace => "}",
            Symbol::Comma => ",",
        };

        write!(f, "{}", text)
    }
}

// the character a diagnostic shows, with unprintables spelled out
pub fn printable_character(ch: Option<u8>) -> String {
    match ch {
        None => String::from("'end of file'"),
        Some(CHAR_TAB) => String::from("'tabulator'"),
        Some(CHAR_LF) => String::from("'line feed'"),
        Some(CHAR_CR) => String::from("'carriage return'"),
        Some(c) => format!("'{}'", c as char),
    }
}

pub struct Scanner {
    pub file: String,
    source: Vec<u8>,
    pos: usize,

    pub ch: Option<u8>,
    pub line: u32,

    pub sym: Symbol,

    // payload of the most recently scanned symbol
    pub identifier: String,
    pub integer: String,
    pub string: String,
    pub literal: u32,

    // enforce the INT32_MIN limit if the parser just consumed a '-'
    pub integer_is_signed: bool,

    pub read_characters: u32,
    pub ignored_characters: u32,
    pub comments: u32,
    pub scanned_symbols: u32,
}

impl Scanner {
    pub fn from_file(path: &Path) -> Result<Scanner, CompileError> {
        let source = fs::read(path).map_err(|source| CompileError::Io {
            path: path.display().to_string(),
            source,
        })?;

        Ok(Scanner::from_bytes(path.display().to_string(), source))
    }

    pub fn from_bytes(file: String, source: Vec<u8>) -> Scanner {
        let mut scanner = Scanner {
            file,
            source,
            pos: 0,
            ch: None,
            line: 1,
            sym: Symbol::Eof,
            identifier: String::new(),
            integer: String::new(),
            string: String::new(),
            literal: 0,
            integer_is_signed: false,
            read_characters: 0,
            ignored_characters: 0,
            comments: 0,
            scanned_symbols: 0,
        };

        scanner.get_character();

        scanner
    }

    pub fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::Scanner {
            file: self.file.clone(),
            line: self.line,
            message: message.into(),
        }
    }

    fn diagnostic(&self, message: &str) {
        eprintln!(
            "{}: syntax error in {} in line {}: {}",
            TOOL_NAME, self.file, self.line, message
        );
    }

    pub fn get_character(&mut self) {
        self.ch = self.source.get(self.pos).copied();

        if self.ch.is_some() {
            self.pos += 1;
            self.read_characters += 1;
        }
    }

    fn is_character_new_line(&self) -> bool {
        self.ch == Some(CHAR_LF) || self.ch == Some(CHAR_CR)
    }

    fn is_character_whitespace(&self) -> bool {
        self.ch == Some(b' ') || self.ch == Some(CHAR_TAB) || self.is_character_new_line()
    }

    fn is_character_letter(&self) -> bool {
        matches!(self.ch, Some(c) if c.is_ascii_alphabetic())
    }

    fn is_character_digit(&self) -> bool {
        matches!(self.ch, Some(c) if c.is_ascii_digit())
    }

    fn is_character_letter_or_digit_or_underscore(&self) -> bool {
        self.is_character_letter() || self.is_character_digit() || self.ch == Some(b'_')
    }

    fn is_character_not_double_quote_or_new_line_or_eof(&self) -> bool {
        if self.ch == Some(b'"') {
            false
        } else if self.is_character_new_line() {
            false
        } else {
            self.ch.is_some()
        }
    }

    // discard whitespace and comments until a character is found that is not
    // whitespace and does not occur in a comment, or the file ends; a lone
    // '/' is recognized here as the division operator
    fn find_next_character(&mut self) -> Result<(), CompileError> {
        let mut in_single_line_comment = false;
        let mut in_multi_line_comment = false;

        loop {
            if in_single_line_comment {
                self.get_character();

                if self.is_character_new_line() {
                    // single-line comments end with new line
                    in_single_line_comment = false;
                } else if self.ch.is_none() {
                    // or end of file
                    return Ok(());
                } else {
                    // count the characters in comments as ignored characters
                    self.ignored_characters += 1;
                }
            } else if in_multi_line_comment {
                self.get_character();

                if self.ch == Some(b'*') {
                    // look for '*/' and count '*' as ignored character
                    self.ignored_characters += 1;

                    self.get_character();

                    if self.ch == Some(b'/') {
                        // multi-line comments end with "*/"
                        in_multi_line_comment = false;

                        self.get_character();
                    }
                }

                if in_multi_line_comment {
                    if self.ch == Some(CHAR_LF) {
                        // only line feeds count, not carriage returns
                        self.line += 1;
                    } else if self.ch.is_none() {
                        return Err(self.error("runaway multi-line comment"));
                    }
                }

                // the characters in comments are ignored, including the '/' in "*/"
                self.ignored_characters += 1;
            } else if self.is_character_whitespace() {
                if self.ch == Some(CHAR_LF) {
                    self.line += 1;
                }

                // line feed and carriage return are ignored characters too
                self.ignored_characters += 1;

                self.get_character();
            } else if self.ch == Some(b'/') {
                self.get_character();

                if self.ch == Some(b'/') {
                    // "//" begins a comment
                    in_single_line_comment = true;

                    self.ignored_characters += 2;
                    self.comments += 1;
                } else if self.ch == Some(b'*') {
                    // "/*" begins a multi-line comment
                    in_multi_line_comment = true;

                    self.ignored_characters += 2;
                    self.comments += 1;
                } else {
                    // while looking for "//" and "/*" we actually found '/'
                    self.sym = Symbol::Div;

                    return Ok(());
                }
            } else {
                // character found that is neither whitespace nor in a comment
                return Ok(());
            }
        }
    }

    fn identifier_or_keyword(&self) -> Symbol {
        match self.identifier.as_str() {
            "while" => Symbol::While,
            "if" => Symbol::If,
            "uint32_t" => Symbol::Uint32,
            "else" => Symbol::Else,
            "return" => Symbol::Return,
            "void" => Symbol::Void,
            _ => Symbol::Identifier,
        }
    }

    fn handle_escape_sequence(&mut self) -> Result<(), CompileError> {
        // the backslash is not stored
        self.ignored_characters += 1;

        self.get_character();

        self.ch = match self.ch {
            Some(b'n') => Some(CHAR_LF),
            Some(b't') => Some(CHAR_TAB),
            Some(b'b') => Some(CHAR_BACKSPACE),
            Some(b'\'') => Some(b'\''),
            Some(b'"') => Some(b'"'),
            Some(b'%') => Some(b'%'),
            Some(b'\\') => Some(b'\\'),
            _ => return Err(self.error("unknown escape sequence found")),
        };

        Ok(())
    }

    pub fn next_symbol(&mut self) -> Result<(), CompileError> {
        self.sym = Symbol::Eof;

        self.find_next_character()?;

        if self.ch.is_none() {
            return Ok(());
        }

        if self.sym != Symbol::Div {
            // '/' may already have been recognized while looking for "//"
            if self.is_character_letter() {
                self.identifier = String::new();

                while self.is_character_letter_or_digit_or_underscore() {
                    if self.identifier.len() >= MAX_IDENTIFIER_LENGTH {
                        return Err(self.error("identifier too long"));
                    }

                    self.identifier.push(self.ch.unwrap() as char);

                    self.get_character();
                }

                self.sym = self.identifier_or_keyword();
            } else if self.is_character_digit() {
                self.integer = String::new();

                while self.is_character_digit() {
                    if self.integer.len() >= MAX_INTEGER_LENGTH {
                        if self.integer_is_signed {
                            return Err(self.error("signed integer out of bound"));
                        } else {
                            return Err(self.error("integer out of bound"));
                        }
                    }

                    self.integer.push(self.ch.unwrap() as char);

                    self.get_character();
                }

                self.literal = match self.integer.parse::<u32>() {
                    Ok(n) => n,
                    Err(_) => {
                        if self.integer_is_signed {
                            return Err(self.error("signed integer out of bound"));
                        } else {
                            return Err(self.error("integer out of bound"));
                        }
                    }
                };

                if self.integer_is_signed && self.literal > 1 << 31 {
                    // -2^31 is the only admissible borderline value
                    return Err(self.error("signed integer out of bound"));
                }

                self.sym = Symbol::Integer;
            } else if self.ch == Some(b'\'') {
                self.get_character();

                if self.ch.is_none() {
                    return Err(self.error("reached end of file looking for a character literal"));
                }

                if self.ch == Some(b'\\') {
                    self.handle_escape_sequence()?;
                }

                self.literal = self.ch.unwrap() as u32;

                self.get_character();

                if self.ch == Some(b'\'') {
                    self.get_character();
                } else if self.ch.is_none() {
                    return Err(self.error("''' expected but 'end of file' found"));
                } else {
                    self.diagnostic(&format!(
                        "''' expected but {} found",
                        printable_character(self.ch)
                    ));
                }

                self.sym = Symbol::Character;
            } else if self.ch == Some(b'"') {
                self.get_character();

                self.string = String::new();

                while self.is_character_not_double_quote_or_new_line_or_eof() {
                    if self.string.len() >= MAX_STRING_LENGTH {
                        return Err(self.error("string too long"));
                    }

                    if self.ch == Some(b'\\') {
                        self.handle_escape_sequence()?;
                    }

                    self.string.push(self.ch.unwrap() as char);

                    self.get_character();
                }

                if self.ch == Some(b'"') {
                    self.get_character();
                } else {
                    return Err(self.error(format!(
                        "'\"' expected but {} found",
                        printable_character(self.ch)
                    )));
                }

                self.sym = Symbol::Str;
            } else {
                self.sym = match self.ch {
                    Some(b';') => {
                        self.get_character();
                        Symbol::Semicolon
                    }
                    Some(b'+') => {
                        self.get_character();
                        Symbol::Plus
                    }
                    Some(b'-') => {
                        self.get_character();
                        Symbol::Minus
                    }
                    Some(b'*') => {
                        self.get_character();
                        Symbol::Asterisk
                    }
                    Some(b'=') => {
                        self.get_character();

                        if self.ch == Some(b'=') {
                            self.get_character();
                            Symbol::Equality
                        } else {
                            Symbol::Assign
                        }
                    }
                    Some(b'(') => {
                        self.get_character();
                        Symbol::LParenthesis
                    }
                    Some(b')') => {
                        self.get_character();
                        Symbol::RParenthesis
                    }
                    Some(b'{') => {
                        self.get_character();
                        Symbol::LBrace
                    }
                    Some(b'}') => {
                        self.get_character();
                        Symbol::RBrace
                    }
                    Some(b',') => {
                        self.get_character();
                        Symbol::Comma
                    }
                    Some(b'<') => {
                        self.get_character();

                        if self.ch == Some(b'=') {
                            self.get_character();
                            Symbol::Leq
                        } else {
                            Symbol::Lt
                        }
                    }
                    Some(b'>') => {
                        self.get_character();

                        if self.ch == Some(b'=') {
                            self.get_character();
                            Symbol::Geq
                        } else {
                            Symbol::Gt
                        }
                    }
                    Some(b'!') => {
                        self.get_character();

                        if self.ch == Some(b'=') {
                            self.get_character();
                        } else {
                            self.diagnostic(&format!(
                                "'=' expected but {} found",
                                printable_character(self.ch)
                            ));
                        }

                        Symbol::NotEq
                    }
                    Some(b'%') => {
                        self.get_character();
                        Symbol::Mod
                    }
                    _ => {
                        return Err(self.error(format!(
                            "found unknown character {}",
                            printable_character(self.ch)
                        )));
                    }
                };
            }
        }

        self.scanned_symbols += 1;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_all(source: &str) -> Vec<Symbol> {
        let mut scanner = Scanner::from_bytes("test.c".to_string(), source.as_bytes().to_vec());
        let mut symbols = Vec::new();

        loop {
            scanner.next_symbol().unwrap();

            if scanner.sym == Symbol::Eof {
                return symbols;
            }

            symbols.push(scanner.sym);
        }
    }

    #[test]
    fn keywords_and_operators() {
        assert_eq!(
            scan_all("uint32_t x = 7; while (x >= 0) x = x - 1;"),
            vec![
                Symbol::Uint32,
                Symbol::Identifier,
                Symbol::Assign,
                Symbol::Integer,
                Symbol::Semicolon,
                Symbol::While,
                Symbol::LParenthesis,
                Symbol::Identifier,
                Symbol::Geq,
                Symbol::Integer,
                Symbol::RParenthesis,
                Symbol::Identifier,
                Symbol::Assign,
                Symbol::Identifier,
                Symbol::Minus,
                Symbol::Integer,
                Symbol::Semicolon
            ]
        );
    }

    #[test]
    fn comments_are_skipped_and_lines_counted() {
        let mut scanner = Scanner::from_bytes(
            "test.c".to_string(),
            b"// comment\n/* multi\nline */ x".to_vec(),
        );

        scanner.next_symbol().unwrap();

        assert_eq!(scanner.sym, Symbol::Identifier);
        assert_eq!(scanner.identifier, "x");
        assert_eq!(scanner.line, 3);
    }

    #[test]
    fn runaway_comment_is_fatal() {
        let mut scanner = Scanner::from_bytes("test.c".to_string(), b"/* no end".to_vec());

        assert!(scanner.next_symbol().is_err());
    }

    #[test]
    fn string_and_character_literals() {
        let mut scanner =
            Scanner::from_bytes("test.c".to_string(), b"\"a\\nb\" 'x' '\\n'".to_vec());

        scanner.next_symbol().unwrap();
        assert_eq!(scanner.sym, Symbol::Str);
        assert_eq!(scanner.string, "a\nb");

        scanner.next_symbol().unwrap();
        assert_eq!(scanner.sym, Symbol::Character);
        assert_eq!(scanner.literal, 'x' as u32);

        scanner.next_symbol().unwrap();
        assert_eq!(scanner.sym, Symbol::Character);
        assert_eq!(scanner.literal, 10);
    }

    #[test]
    fn integer_bounds() {
        let mut scanner = Scanner::from_bytes("test.c".to_string(), b"4294967295".to_vec());
        scanner.next_symbol().unwrap();
        assert_eq!(scanner.literal, u32::MAX);

        let mut scanner = Scanner::from_bytes("test.c".to_string(), b"4294967296".to_vec());
        assert!(scanner.next_symbol().is_err());

        // 2^31 is admissible after a unary minus only
        let mut scanner = Scanner::from_bytes("test.c".to_string(), b"2147483648".to_vec());
        scanner.integer_is_signed = true;
        scanner.next_symbol().unwrap();
        assert_eq!(scanner.literal, 0x80000000);

        let mut scanner = Scanner::from_bytes("test.c".to_string(), b"2147483649".to_vec());
        scanner.integer_is_signed = true;
        assert!(scanner.next_symbol().is_err());
    }
}
