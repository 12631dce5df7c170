//! Lexer module: splits filter expression text into tokens.
//!
//! Keywords are case-insensitive. Comments (`-- ...` and `/* ... */`) and
//! whitespace are skipped. Any character that cannot start a token is a
//! lexical error.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::{FilterExpressionError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    And,
    Asc,
    Binary,
    By,
    Desc,
    False,
    Filter,
    In,
    Is,
    Like,
    Not,
    Null,
    Or,
    Order,
    Top,
    True,
    Where,
    Xor,
}

impl Keyword {
    fn from_word(word: &str) -> Option<Keyword> {
        let keyword = match word.to_ascii_uppercase().as_str() {
            "AND" => Keyword::And,
            "ASC" => Keyword::Asc,
            "BINARY" => Keyword::Binary,
            "BY" => Keyword::By,
            "DESC" => Keyword::Desc,
            "FALSE" => Keyword::False,
            "FILTER" => Keyword::Filter,
            "IN" => Keyword::In,
            "IS" => Keyword::Is,
            "LIKE" => Keyword::Like,
            "NOT" => Keyword::Not,
            "NULL" => Keyword::Null,
            "OR" => Keyword::Or,
            "ORDER" => Keyword::Order,
            "TOP" => Keyword::Top,
            "TRUE" => Keyword::True,
            "WHERE" => Keyword::Where,
            "XOR" => Keyword::Xor,
            _ => return None,
        };
        Some(keyword)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    Semicolon,
    Comma,
    Minus,
    Plus,
    LeftParen,
    RightParen,
    Bang,
    Tilde,
    TripleEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    DoubleEqual,
    NotEqual,
    NotDoubleEqual,
    LessGreater,
    AmpAmp,
    PipePipe,
    ShiftLeft,
    ShiftRight,
    Amp,
    Pipe,
    Caret,
    Star,
    Slash,
    Percent,
}

// Longest spellings first so that prefixes never shadow a longer operator.
const SYMBOLS: &[(&str, Symbol)] = &[
    ("===", Symbol::TripleEqual),
    ("!==", Symbol::NotDoubleEqual),
    ("<=", Symbol::LessEqual),
    (">=", Symbol::GreaterEqual),
    ("<>", Symbol::LessGreater),
    ("<<", Symbol::ShiftLeft),
    (">>", Symbol::ShiftRight),
    ("==", Symbol::DoubleEqual),
    ("!=", Symbol::NotEqual),
    ("&&", Symbol::AmpAmp),
    ("||", Symbol::PipePipe),
    (";", Symbol::Semicolon),
    (",", Symbol::Comma),
    ("-", Symbol::Minus),
    ("+", Symbol::Plus),
    ("(", Symbol::LeftParen),
    (")", Symbol::RightParen),
    ("!", Symbol::Bang),
    ("~", Symbol::Tilde),
    ("<", Symbol::Less),
    (">", Symbol::Greater),
    ("=", Symbol::Equal),
    ("&", Symbol::Amp),
    ("|", Symbol::Pipe),
    ("^", Symbol::Caret),
    ("*", Symbol::Star),
    ("/", Symbol::Slash),
    ("%", Symbol::Percent),
];

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Keyword(Keyword),
    Symbol(Symbol),
    Identifier(String),
    IntegerLiteral(String),
    NumericLiteral(String),
    /// Content with `''` escapes resolved.
    StringLiteral(String),
    GuidLiteral(String),
    /// Content between the `#` delimiters.
    DateTimeLiteral(String),
    MeasurementKeyLiteral(String),
    /// Content between the double quotes.
    PointTagLiteral(String),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Source text of the token as written.
    pub text: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        self.kind == TokenKind::Keyword(keyword)
    }

    pub fn is_symbol(&self, symbol: Symbol) -> bool {
        self.kind == TokenKind::Symbol(symbol)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Eof => f.write_str("<EOF>"),
            _ => write!(f, "'{}'", self.text),
        }
    }
}

fn guid_regex() -> Option<&'static Regex> {
    static GUID: OnceLock<Option<Regex>> = OnceLock::new();
    GUID.get_or_init(|| {
        let hex = r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}";
        Regex::new(&format!(r"^(?:\{{{hex}\}}|{hex})")).ok()
    })
    .as_ref()
}

fn measurement_key_regex() -> Option<&'static Regex> {
    static KEY: OnceLock<Option<Regex>> = OnceLock::new();
    KEY.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*:[0-9]+").ok())
        .as_ref()
}

fn number_regex() -> Option<&'static Regex> {
    static NUMBER: OnceLock<Option<Regex>> = OnceLock::new();
    NUMBER
        .get_or_init(|| {
            Regex::new(r"^(?:0[xX][0-9a-fA-F]+|(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:[eE][+-]?[0-9]+)?)").ok()
        })
        .as_ref()
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenizes the whole input. The returned list always ends with an
    /// `Eof` token.
    pub fn tokenize(input: &str) -> Result<Vec<Token>> {
        let mut lexer = Lexer::new(input);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_trivia()?;
        let (line, column, start) = (self.line, self.column, self.pos);
        let c = match self.peek() {
            Some(c) => c,
            None => {
                return Ok(Token {
                    kind: TokenKind::Eof,
                    text: String::new(),
                    line,
                    column,
                })
            }
        };

        let kind = if let Some(len) = self.match_guid() {
            self.advance(len);
            TokenKind::GuidLiteral(self.input[start..self.pos].to_string())
        } else if let Some(m) = measurement_key_regex().and_then(|re| re.find(self.rest())) {
            self.advance(m.end());
            TokenKind::MeasurementKeyLiteral(self.input[start..self.pos].to_string())
        } else if c.is_ascii_digit() || (c == '.' && self.peek_nth(1).is_some_and(|n| n.is_ascii_digit())) {
            self.read_number()?
        } else if c.is_ascii_alphabetic() || c == '_' {
            self.read_word()
        } else {
            match c {
                '\'' => TokenKind::StringLiteral(self.read_delimited('\'', '\'', "string literal")?),
                '"' => TokenKind::PointTagLiteral(self.read_delimited('"', '"', "point tag literal")?),
                '#' => TokenKind::DateTimeLiteral(self.read_delimited('#', '#', "date/time literal")?),
                '[' => TokenKind::Identifier(self.read_delimited('[', ']', "bracketed identifier")?),
                _ => self.read_symbol()?,
            }
        };

        Ok(Token {
            kind,
            text: self.input[start..self.pos].to_string(),
            line,
            column,
        })
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn match_guid(&self) -> Option<usize> {
        let m = guid_regex()?.find(self.rest())?;
        // A GUID must not run straight into more identifier characters.
        match self.rest()[m.end()..].chars().next() {
            Some(next) if is_identifier_char(next) => None,
            _ => Some(m.end()),
        }
    }

    fn read_number(&mut self) -> Result<TokenKind> {
        let start = self.pos;
        let len = number_regex()
            .and_then(|re| re.find(self.rest()))
            .map(|m| m.end())
            .unwrap_or(0);
        self.advance(len);
        if len == 0 || self.peek().is_some_and(is_identifier_char) {
            return Err(self.unexpected(start));
        }
        let text = &self.input[start..self.pos];
        let is_hex = text.starts_with("0x") || text.starts_with("0X");
        if !is_hex && text.contains(['.', 'e', 'E']) {
            Ok(TokenKind::NumericLiteral(text.to_string()))
        } else {
            Ok(TokenKind::IntegerLiteral(text.to_string()))
        }
    }

    fn read_word(&mut self) -> TokenKind {
        let start = self.pos;
        while self.peek().is_some_and(is_identifier_char) {
            self.consume_char();
        }
        let word = &self.input[start..self.pos];
        match Keyword::from_word(word) {
            Some(keyword) => TokenKind::Keyword(keyword),
            None => TokenKind::Identifier(word.to_string()),
        }
    }

    /// Reads text between `open` and `close`. A doubled closing delimiter
    /// inside quoted literals stands for one literal delimiter.
    fn read_delimited(&mut self, open: char, close: char, what: &str) -> Result<String> {
        let (line, column) = (self.line, self.column);
        self.consume_char(); // opening delimiter
        let mut content = String::new();
        loop {
            match self.consume_char() {
                Some(c) if c == close => {
                    if open == close && self.peek() == Some(close) {
                        self.consume_char();
                        content.push(close);
                    } else {
                        return Ok(content);
                    }
                }
                Some(c) => content.push(c),
                None => {
                    return Err(FilterExpressionError::Syntax {
                        message: format!("unterminated {}", what),
                        line,
                        column,
                    })
                }
            }
        }
    }

    fn read_symbol(&mut self) -> Result<TokenKind> {
        for (spelling, symbol) in SYMBOLS {
            if self.rest().starts_with(spelling) {
                self.advance(spelling.len());
                return Ok(TokenKind::Symbol(*symbol));
            }
        }
        Err(self.unexpected(self.pos))
    }

    fn unexpected(&self, start: usize) -> FilterExpressionError {
        let end = self.input[start..]
            .char_indices()
            .nth(1)
            .map(|(i, _)| start + i)
            .unwrap_or(self.input.len())
            .max(self.pos);
        FilterExpressionError::Lexical {
            text: self.input[start..end].to_string(),
            line: self.line,
            column: self.column,
        }
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            self.skip_whitespace();
            if self.rest().starts_with("--") {
                while let Some(c) = self.consume_char() {
                    if c == '\n' {
                        break;
                    }
                }
            } else if self.rest().starts_with("/*") {
                let (line, column) = (self.line, self.column);
                self.advance(2);
                match self.rest().find("*/") {
                    Some(end) => self.advance(end + 2),
                    None => {
                        return Err(FilterExpressionError::Syntax {
                            message: "unterminated comment".to_string(),
                            line,
                            column,
                        })
                    }
                }
            } else {
                return Ok(());
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.consume_char();
        }
    }

    fn advance(&mut self, len: usize) {
        let end = self.pos + len;
        while self.pos < end {
            if self.consume_char().is_none() {
                break;
            }
        }
    }

    fn consume_char(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_keywords_ignore_case() {
        assert_eq!(
            kinds("filter Top WHERE"),
            vec![
                TokenKind::Keyword(Keyword::Filter),
                TokenKind::Keyword(Keyword::Top),
                TokenKind::Keyword(Keyword::Where),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_operators_longest_match() {
        assert_eq!(
            kinds("=== !== != <> <= << ! ="),
            vec![
                TokenKind::Symbol(Symbol::TripleEqual),
                TokenKind::Symbol(Symbol::NotDoubleEqual),
                TokenKind::Symbol(Symbol::NotEqual),
                TokenKind::Symbol(Symbol::LessGreater),
                TokenKind::Symbol(Symbol::LessEqual),
                TokenKind::Symbol(Symbol::ShiftLeft),
                TokenKind::Symbol(Symbol::Bang),
                TokenKind::Symbol(Symbol::Equal),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_literal_shapes() {
        assert_eq!(
            kinds("42 0x1F 1.5 2e3 'it''s' #2019-01-01# PPA:12 \"DEV:FREQ\" [Point Tag]"),
            vec![
                TokenKind::IntegerLiteral("42".into()),
                TokenKind::IntegerLiteral("0x1F".into()),
                TokenKind::NumericLiteral("1.5".into()),
                TokenKind::NumericLiteral("2e3".into()),
                TokenKind::StringLiteral("it's".into()),
                TokenKind::DateTimeLiteral("2019-01-01".into()),
                TokenKind::MeasurementKeyLiteral("PPA:12".into()),
                TokenKind::PointTagLiteral("DEV:FREQ".into()),
                TokenKind::Identifier("Point Tag".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_guid_literals() {
        let guid = "9448a8f5-f5f1-4f46-9d9a-6c6e7bb0b6d1";
        assert_eq!(kinds(guid)[0], TokenKind::GuidLiteral(guid.into()));
        let braced = format!("{{{}}}", guid);
        assert_eq!(kinds(&braced)[0], TokenKind::GuidLiteral(braced.clone()));
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("1 -- trailing\n/* block\n comment */ 2"),
            vec![
                TokenKind::IntegerLiteral("1".into()),
                TokenKind::IntegerLiteral("2".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = Lexer::tokenize("a\n  b").unwrap();
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
    }

    #[test]
    fn test_unexpected_character() {
        match Lexer::tokenize("SignalType = $") {
            Err(FilterExpressionError::Lexical { text, line, column }) => {
                assert_eq!(text, "$");
                assert_eq!((line, column), (1, 14));
            }
            other => panic!("Expected lexical error, got {:?}", other),
        }
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(
            Lexer::tokenize("'abc"),
            Err(FilterExpressionError::Syntax { .. })
        ));
    }
}
