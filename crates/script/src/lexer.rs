//! Tokenizer for the scripting dialect.
//!
//! Words that are reserved but unsupported (`import`, `export`, ...)
//! are still lexed as keywords so that they can be used as property names;
//! the parser rejects them everywhere else.

use crate::diag::{Diagnostic, Position, Span};

pub const KEYWORDS: &[&str] = &[
    "let",
    "const",
    "var",
    "function",
    "return",
    "if",
    "else",
    "while",
    "do",
    "for",
    "in",
    "instanceof",
    "break",
    "continue",
    "true",
    "false",
    "null",
    "undefined",
    "new",
    "throw",
    "try",
    "catch",
    "finally",
    "typeof",
    "await",
    "switch",
    "case",
    "default",
    "delete",
    "class",
    "this",
    "super",
    // Reserved, rejected by the parser.
    "import",
    "export",
    "yield",
    "with",
    "enum",
];

const UNSUPPORTED: &[&str] = &["import", "export", "yield", "with", "enum"];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

pub fn is_unsupported(word: &str) -> bool {
    UNSUPPORTED.contains(&word)
}

// `>` is never merged here: the parser joins adjacent ones into shifts so
// that nested generic arguments can close one bracket at a time.
const PUNCT3: &[&str] = &["...", "===", "!==", "??=", "<<=", "**=", "&&=", "||="];
const PUNCT2: &[&str] = &[
    "?.", "??", "=>", "==", "!=", "<=", ">=", "&&", "||", "++", "--", "+=", "-=", "*=", "/=",
    "%=", "**", "<<", "&=", "|=", "^=",
];
const PUNCT1: &[&str] = &[
    "{", "}", "(", ")", "[", "]", ";", ",", ".", "?", ":", "=", "<", ">", "+", "-", "*", "/", "%",
    "!", "|", "&", "^", "~",
];

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Template(Vec<TemplatePart>),
    Ident(String),
    Keyword(&'static str),
    Punct(&'static str),
    Eof,
}

/// A chunk of a template literal.  Substitutions are kept as source ranges
/// and tokenized again by the parser with [`tokenize_range`].
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    Expr { start: Position, end: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// A line terminator appeared between the previous token and this one.
    pub newline_before: bool,
}

impl Token {
    pub fn is_punct(&self, p: &str) -> bool {
        matches!(self.kind, TokenKind::Punct(q) if q == p)
    }

    pub fn is_keyword(&self, k: &str) -> bool {
        matches!(self.kind, TokenKind::Keyword(q) if q == k)
    }

    pub fn is_word(&self, w: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(name) if name == w)
    }

    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Number(n) => crate::emit::format_number(*n),
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::Template(_) => "template literal".to_string(),
            TokenKind::Ident(name) => name.clone(),
            TokenKind::Keyword(k) => (*k).to_string(),
            TokenKind::Punct(p) => (*p).to_string(),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}

/// Tokenize a whole source text.  The returned vector always ends with an
/// [`TokenKind::Eof`] token.
pub fn tokenize(src: &str) -> Result<Vec<Token>, Diagnostic> {
    tokenize_range(src, Position::start(), src.len())
}

/// Tokenize `src[start.offset..end]`, reporting positions relative to the
/// whole of `src`.
pub fn tokenize_range(src: &str, start: Position, end: usize) -> Result<Vec<Token>, Diagnostic> {
    let mut lexer = Lexer {
        src,
        pos: start.offset,
        end: end.min(src.len()),
        line: start.line,
        column: start.column,
    };
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

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    end: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    fn position(&self) -> Position {
        Position {
            offset: self.pos,
            line: self.line,
            column: self.column,
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..self.end]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, start: Position, message: impl Into<String>) -> Diagnostic {
        Diagnostic::error(Span::new(start, self.pos), message).with_code("parse")
    }

    /// Skip whitespace and comments; returns whether a newline was crossed.
    fn skip_trivia(&mut self) -> Result<bool, Diagnostic> {
        let mut newline = false;
        loop {
            match self.peek() {
                Some('\n') => {
                    newline = true;
                    self.bump();
                }
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    let start = self.position();
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            None => return Err(self.error(start, "'*/' expected.")),
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some('\n') => newline = true,
                            Some(_) => {}
                        }
                    }
                }
                _ => return Ok(newline),
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, Diagnostic> {
        let newline_before = self.skip_trivia()?;
        let start = self.position();
        let Some(c) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                span: Span::new(start, self.pos),
                newline_before,
            });
        };

        let kind = if c.is_ascii_digit()
            || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()))
        {
            TokenKind::Number(self.lex_number(start)?)
        } else if c == '"' || c == '\'' {
            TokenKind::Str(self.lex_string(c, start)?)
        } else if c == '`' {
            TokenKind::Template(self.lex_template(start)?)
        } else if is_ident_start(c) {
            let word_start = self.pos;
            while self.peek().is_some_and(is_ident_part) {
                self.bump();
            }
            let word = &self.src[word_start..self.pos];
            match KEYWORDS.iter().find(|k| **k == word) {
                Some(k) => TokenKind::Keyword(k),
                None => TokenKind::Ident(word.to_string()),
            }
        } else {
            TokenKind::Punct(self.lex_punct(start)?)
        };

        Ok(Token {
            kind,
            span: Span::new(start, self.pos),
            newline_before,
        })
    }

    fn lex_punct(&mut self, start: Position) -> Result<&'static str, Diagnostic> {
        let rest = self.rest();
        let found = PUNCT3
            .iter()
            .chain(PUNCT2)
            .chain(PUNCT1)
            .find(|p| rest.starts_with(**p))
            .copied();
        let Some(p) = found else {
            self.bump();
            return Err(self.error(start, "Invalid character."));
        };
        // `a?.5:b` is a conditional, not optional chaining.
        let p = if p == "?." && rest[2..].starts_with(|c: char| c.is_ascii_digit()) {
            "?"
        } else {
            p
        };
        for _ in 0..p.len() {
            self.bump();
        }
        Ok(p)
    }

    fn lex_number(&mut self, start: Position) -> Result<f64, Diagnostic> {
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X')) {
            self.bump();
            self.bump();
            let mut value = 0f64;
            let mut digits = 0;
            while let Some(c) = self.peek() {
                if c == '_' {
                    self.bump();
                    continue;
                }
                let Some(d) = c.to_digit(16) else { break };
                value = value * 16.0 + f64::from(d);
                digits += 1;
                self.bump();
            }
            if digits == 0 {
                return Err(self.error(start, "Hexadecimal digit expected."));
            }
            return Ok(value);
        }

        let mut text = String::new();
        self.take_digits(&mut text);
        if self.peek() == Some('.') && self.peek_at(1).is_none_or(|c| c.is_ascii_digit()) {
            text.push('.');
            self.bump();
            self.take_digits(&mut text);
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let signed = matches!(self.peek_at(1), Some('+' | '-'));
            let digit_at = if signed { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                text.push('e');
                self.bump();
                if signed {
                    if let Some(sign) = self.bump() {
                        text.push(sign);
                    }
                }
                self.take_digits(&mut text);
            }
        }
        if self.peek().is_some_and(is_ident_start) {
            return Err(self.error(
                start,
                "An identifier or keyword cannot immediately follow a numeric literal.",
            ));
        }
        text.parse::<f64>()
            .map_err(|_| self.error(start, "Invalid numeric literal."))
    }

    fn take_digits(&mut self, out: &mut String) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                out.push(c);
            } else if c != '_' {
                break;
            }
            self.bump();
        }
    }

    fn lex_string(&mut self, quote: char, start: Position) -> Result<String, Diagnostic> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(self.error(start, "Unterminated string literal.")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => {
                    if let Some(c) = self.read_escape(start)? {
                        out.push(c);
                    }
                }
                Some(c) => out.push(c),
            }
        }
    }

    /// Read the character after a backslash.  A escaped line break is a
    /// continuation and yields nothing.
    fn read_escape(&mut self, start: Position) -> Result<Option<char>, Diagnostic> {
        let Some(c) = self.bump() else {
            return Err(self.error(start, "Unterminated string literal."));
        };
        let decoded = match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'b' => '\u{8}',
            'f' => '\u{c}',
            'v' => '\u{b}',
            '0' => '\0',
            '\n' => return Ok(None),
            'x' => {
                let code = self.read_hex(2, start)?;
                self.char_from(code, start)?
            }
            'u' => {
                let code = if self.peek() == Some('{') {
                    self.bump();
                    let mut code = 0u32;
                    let mut digits = 0;
                    loop {
                        match self.bump() {
                            Some('}') if digits > 0 => break,
                            Some(h) if h.is_ascii_hexdigit() && digits < 6 => {
                                code = code * 16 + h.to_digit(16).unwrap_or(0);
                                digits += 1;
                            }
                            _ => return Err(self.error(start, "Invalid Unicode escape sequence.")),
                        }
                    }
                    code
                } else {
                    self.read_hex(4, start)?
                };
                self.char_from(code, start)?
            }
            other => other,
        };
        Ok(Some(decoded))
    }

    fn read_hex(&mut self, digits: usize, start: Position) -> Result<u32, Diagnostic> {
        let mut code = 0u32;
        for _ in 0..digits {
            match self.bump().and_then(|c| c.to_digit(16)) {
                Some(d) => code = code * 16 + d,
                None => return Err(self.error(start, "Hexadecimal digit expected.")),
            }
        }
        Ok(code)
    }

    fn char_from(&self, code: u32, start: Position) -> Result<char, Diagnostic> {
        char::from_u32(code).ok_or_else(|| self.error(start, "Invalid Unicode escape sequence."))
    }

    fn lex_template(&mut self, start: Position) -> Result<Vec<TemplatePart>, Diagnostic> {
        self.bump();
        let mut parts = Vec::new();
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error(start, "Unterminated template literal.")),
                Some('`') => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    if let Some(c) = self.read_escape(start)? {
                        text.push(c);
                    }
                }
                Some('$') if self.peek_at(1) == Some('{') => {
                    self.bump();
                    self.bump();
                    if !text.is_empty() {
                        parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                    }
                    let expr_start = self.position();
                    let mut depth = 0usize;
                    loop {
                        let token = self.next_token()?;
                        match token.kind {
                            TokenKind::Eof => {
                                return Err(self.error(start, "Unterminated template literal."));
                            }
                            TokenKind::Punct("{") => depth += 1,
                            TokenKind::Punct("}") if depth == 0 => {
                                parts.push(TemplatePart::Expr {
                                    start: expr_start,
                                    end: token.span.start,
                                });
                                break;
                            }
                            TokenKind::Punct("}") => depth -= 1,
                            _ => {}
                        }
                    }
                }
                Some(_) => {
                    if let Some(c) = self.bump() {
                        text.push(c);
                    }
                }
            }
        }
        if !text.is_empty() {
            parts.push(TemplatePart::Text(text));
        }
        Ok(parts)
    }
}

pub fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

pub fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Whether `name` can be written as a bare identifier.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(is_ident_start) && chars.all(is_ident_part)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_basic_statement() {
        assert_eq!(
            kinds("let x = 1.5 + y;"),
            vec![
                TokenKind::Keyword("let"),
                TokenKind::Ident("x".into()),
                TokenKind::Punct("="),
                TokenKind::Number(1.5),
                TokenKind::Punct("+"),
                TokenKind::Ident("y".into()),
                TokenKind::Punct(";"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn longest_punctuation_wins() {
        assert_eq!(
            kinds("a ?? b === c ?. d"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Punct("??"),
                TokenKind::Ident("b".into()),
                TokenKind::Punct("==="),
                TokenKind::Ident("c".into()),
                TokenKind::Punct("?."),
                TokenKind::Ident("d".into()),
                TokenKind::Eof,
            ]
        );
        // Nested generics must close one bracket at a time.
        assert_eq!(
            kinds(">>")[..2],
            [TokenKind::Punct(">"), TokenKind::Punct(">")]
        );
        assert_eq!(
            kinds("a <<= b ** c ^ ~d")[..7],
            [
                TokenKind::Ident("a".into()),
                TokenKind::Punct("<<="),
                TokenKind::Ident("b".into()),
                TokenKind::Punct("**"),
                TokenKind::Ident("c".into()),
                TokenKind::Punct("^"),
                TokenKind::Punct("~"),
            ]
        );
    }

    #[test]
    fn optional_chain_before_digit_is_conditional() {
        assert_eq!(kinds("a?.5:1")[1], TokenKind::Punct("?"));
        assert_eq!(kinds("a?.5:1")[2], TokenKind::Number(0.5));
    }

    #[test]
    fn numbers_in_all_forms() {
        assert_eq!(kinds("0xff")[0], TokenKind::Number(255.0));
        assert_eq!(kinds("1_000")[0], TokenKind::Number(1000.0));
        assert_eq!(kinds("2e3")[0], TokenKind::Number(2000.0));
        assert_eq!(kinds(".25")[0], TokenKind::Number(0.25));
        assert!(tokenize("3abc").is_err());
    }

    #[test]
    fn string_escapes_are_decoded() {
        assert_eq!(
            kinds(r#""a\n\t\"bA\u{1F600}\x41""#)[0],
            TokenKind::Str("a\n\t\"bA\u{1F600}A".into())
        );
        assert_eq!(kinds("'it\\'s'")[0], TokenKind::Str("it's".into()));
    }

    #[test]
    fn unterminated_string_reports_start() {
        let err = tokenize("let a = 1;\nlet s = \"oops").unwrap_err();
        assert_eq!((err.line, err.column), (2, 9));
        assert_eq!(err.code.as_deref(), Some("parse"));
    }

    #[test]
    fn comments_and_newlines_are_tracked() {
        let tokens = tokenize("a // one\n/* two\n */ b").unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Ident("b".into()));
        assert!(tokens[1].newline_before);
        assert_eq!(tokens[1].span.line, 3);
        assert!(tokenize("/* open").is_err());
    }

    #[test]
    fn template_substitutions_keep_source_ranges() {
        let src = "`Hi ${ {a: 1}.a } and ${`x${y}`}!`";
        let tokens = tokenize(src).unwrap();
        let TokenKind::Template(parts) = &tokens[0].kind else {
            panic!("expected template");
        };
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0], TemplatePart::Text("Hi ".into()));
        let TemplatePart::Expr { start, end } = &parts[1] else {
            panic!("expected substitution");
        };
        assert_eq!(src[start.offset..*end].trim(), "{a: 1}.a");
        assert_eq!(parts[4], TemplatePart::Text("!".into()));
    }

    #[test]
    fn reserved_words_are_keywords() {
        assert_eq!(kinds("this")[0], TokenKind::Keyword("this"));
        assert!(is_unsupported("import"));
        assert!(!is_unsupported("class"));
        assert!(!is_unsupported("let"));
        assert_eq!(kinds("async")[0], TokenKind::Ident("async".into()));
    }

    #[test]
    fn columns_count_characters() {
        let tokens = tokenize("\"é\" x").unwrap();
        assert_eq!(tokens[1].span.column, 5);
    }

    #[test]
    fn identifier_check() {
        assert!(is_identifier("formatMessage"));
        assert!(is_identifier("_x$1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier(""));
    }
}
