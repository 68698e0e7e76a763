//! Lexer for Seron source
//!
//! Produces tokens on demand from a source string. The lexer keeps a byte
//! cursor plus line/column counters; `next()` returns the next token and an
//! idempotent EOF sentinel once the input is exhausted.
//!
//! Comments: `#` starts a line comment, `##` opens a block comment closed
//! by the next `##`. Lexer errors (unknown character, unterminated string
//! or block comment) are fatal: the token stream is undefined past the
//! point of failure.

use crate::diagnostics::Diagnostic;

/// Width tag attached to number literals. `Any` is the default for a plain
/// digit sequence; a trailing `c`/`i`/`l` suffix pins the width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberWidth {
    Any,
    Char,
    Int,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Used only for error checking and as a sentinel value
    Invalid,

    Identifier,
    Number,
    String,

    Plus,
    Minus,
    Asterisk,
    Slash,
    Bang,
    Ampersand,
    Pipe,

    Semicolon,
    Comma,
    Colon,
    Tick,
    Assign,
    Eq,
    Neq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    LogOr,
    LogAnd,

    Lparen,
    Rparen,
    Lbrace,
    Rbrace,
    Lbracket,
    Rbracket,

    KwProc,
    KwLet,
    KwIf,
    KwElse,
    KwElsif,
    KwWhile,
    KwFor,
    KwReturn,
    KwTable,
    BuiltinAsm,

    TypeVoid,
    TypeChar,
    TypeInt,
    TypeLong,

    Eof,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Invalid => "invalid",
            TokenKind::Identifier => "identifier",
            TokenKind::Number => "number",
            TokenKind::String => "string",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Asterisk => "*",
            TokenKind::Slash => "/",
            TokenKind::Bang => "!",
            TokenKind::Ampersand => "&",
            TokenKind::Pipe => "|",
            TokenKind::Semicolon => ";",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Tick => "'",
            TokenKind::Assign => "=",
            TokenKind::Eq => "==",
            TokenKind::Neq => "!=",
            TokenKind::Lt => "<",
            TokenKind::LtEq => "<=",
            TokenKind::Gt => ">",
            TokenKind::GtEq => ">=",
            TokenKind::LogOr => "||",
            TokenKind::LogAnd => "&&",
            TokenKind::Lparen => "(",
            TokenKind::Rparen => ")",
            TokenKind::Lbrace => "{",
            TokenKind::Rbrace => "}",
            TokenKind::Lbracket => "[",
            TokenKind::Rbracket => "]",
            TokenKind::KwProc => "proc",
            TokenKind::KwLet => "let",
            TokenKind::KwIf => "if",
            TokenKind::KwElse => "else",
            TokenKind::KwElsif => "elsif",
            TokenKind::KwWhile => "while",
            TokenKind::KwFor => "for",
            TokenKind::KwReturn => "return",
            TokenKind::KwTable => "table",
            TokenKind::BuiltinAsm => "asm",
            TokenKind::TypeVoid => "void",
            TokenKind::TypeChar => "char",
            TokenKind::TypeInt => "int",
            TokenKind::TypeLong => "long",
            TokenKind::Eof => "eof",
        }
    }
}

/// A lexed token with source location.
///
/// `value` holds the identifier text or string contents for literals and is
/// empty otherwise. `number`/`width` are only meaningful for number tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub number: i64,
    pub width: NumberWidth,
    /// Absolute byte offset of the first byte of the token.
    pub pos: usize,
    /// Byte length of the token in the source.
    pub len: usize,
    /// 1-indexed line of the first byte.
    pub line: usize,
    /// 1-indexed column of the first byte.
    pub column: usize,
}

fn keyword_kind(text: &str) -> Option<TokenKind> {
    let kind = match text {
        "proc" => TokenKind::KwProc,
        "let" => TokenKind::KwLet,
        "if" => TokenKind::KwIf,
        "else" => TokenKind::KwElse,
        "elsif" => TokenKind::KwElsif,
        "while" => TokenKind::KwWhile,
        "for" => TokenKind::KwFor,
        "return" => TokenKind::KwReturn,
        "table" => TokenKind::KwTable,
        "asm" => TokenKind::BuiltinAsm,
        "void" => TokenKind::TypeVoid,
        "char" => TokenKind::TypeChar,
        "int" => TokenKind::TypeInt,
        "long" => TokenKind::TypeLong,
        _ => return None,
    };
    Some(kind)
}

pub struct Lexer<'a> {
    src: &'a str,
    cursor: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            src,
            cursor: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.cursor).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.src.as_bytes().get(self.cursor + ahead).copied()
    }

    /// Advance one byte, keeping line/column counters in sync.
    fn bump(&mut self) {
        if let Some(b) = self.peek() {
            self.cursor += 1;
            if b == b'\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    fn skip_trivia(&mut self) -> Result<(), Diagnostic> {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => self.bump(),

                Some(b'#') if self.peek_at(1) == Some(b'#') => {
                    let open = self.make_token(TokenKind::Invalid, self.cursor, 2);
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            Some(b'#') if self.peek_at(1) == Some(b'#') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            Some(_) => self.bump(),
                            None => {
                                return Err(Diagnostic::error_at(
                                    &open,
                                    "Unterminated block comment",
                                ));
                            }
                        }
                    }
                }

                Some(b'#') => {
                    while let Some(b) = self.peek() {
                        self.bump();
                        if b == b'\n' {
                            break;
                        }
                    }
                }

                _ => return Ok(()),
            }
        }
    }

    fn make_token(&self, kind: TokenKind, pos: usize, len: usize) -> Token {
        Token {
            kind,
            value: String::new(),
            number: 0,
            width: NumberWidth::Any,
            pos,
            len,
            line: self.line,
            column: self.column,
        }
    }

    /// Produce the next token. Returns the EOF sentinel once the input is
    /// exhausted; calling again keeps returning it.
    pub fn next(&mut self) -> Result<Token, Diagnostic> {
        self.skip_trivia()?;

        let Some(b) = self.peek() else {
            return Ok(self.make_token(TokenKind::Eof, self.src.len(), 0));
        };

        let start = self.cursor;

        // Single-character punctuators, plus the two-character lookahead
        // forms == != <= >= && ||.
        let simple = |kind| Some((kind, 1));
        let punct = match b {
            b'+' => simple(TokenKind::Plus),
            b'-' => simple(TokenKind::Minus),
            b'*' => simple(TokenKind::Asterisk),
            b'/' => simple(TokenKind::Slash),
            b';' => simple(TokenKind::Semicolon),
            b',' => simple(TokenKind::Comma),
            b':' => simple(TokenKind::Colon),
            b'\'' => simple(TokenKind::Tick),
            b'(' => simple(TokenKind::Lparen),
            b')' => simple(TokenKind::Rparen),
            b'{' => simple(TokenKind::Lbrace),
            b'}' => simple(TokenKind::Rbrace),
            b'[' => simple(TokenKind::Lbracket),
            b']' => simple(TokenKind::Rbracket),
            b'=' => match self.peek_at(1) {
                Some(b'=') => Some((TokenKind::Eq, 2)),
                _ => simple(TokenKind::Assign),
            },
            b'!' => match self.peek_at(1) {
                Some(b'=') => Some((TokenKind::Neq, 2)),
                _ => simple(TokenKind::Bang),
            },
            b'<' => match self.peek_at(1) {
                Some(b'=') => Some((TokenKind::LtEq, 2)),
                _ => simple(TokenKind::Lt),
            },
            b'>' => match self.peek_at(1) {
                Some(b'=') => Some((TokenKind::GtEq, 2)),
                _ => simple(TokenKind::Gt),
            },
            b'&' => match self.peek_at(1) {
                Some(b'&') => Some((TokenKind::LogAnd, 2)),
                _ => simple(TokenKind::Ampersand),
            },
            b'|' => match self.peek_at(1) {
                Some(b'|') => Some((TokenKind::LogOr, 2)),
                _ => simple(TokenKind::Pipe),
            },
            _ => None,
        };

        if let Some((kind, len)) = punct {
            let tok = self.make_token(kind, start, len);
            for _ in 0..len {
                self.bump();
            }
            return Ok(tok);
        }

        if b == b'"' {
            return self.lex_string();
        }

        if b.is_ascii_digit() {
            return self.lex_number();
        }

        if b.is_ascii_alphabetic() || b == b'_' {
            return self.lex_word();
        }

        let bad = self.make_token(TokenKind::Invalid, start, 1);
        Err(Diagnostic::error_at(
            &bad,
            format!("unknown token `{}`", &self.src[start..start + 1]),
        ))
    }

    fn lex_string(&mut self) -> Result<Token, Diagnostic> {
        let start = self.cursor;
        let mut tok = self.make_token(TokenKind::String, start, 0);
        self.bump(); // opening quote

        loop {
            match self.peek() {
                Some(b'"') => {
                    self.bump();
                    break;
                }
                Some(_) => self.bump(),
                None => {
                    tok.kind = TokenKind::Invalid;
                    tok.len = self.cursor - start;
                    return Err(Diagnostic::error_at(
                        &tok,
                        format!(
                            "unterminated string literal: `{}`",
                            &self.src[start + 1..self.cursor]
                        ),
                    ));
                }
            }
        }

        tok.len = self.cursor - start;
        tok.value = self.src[start + 1..self.cursor - 1].to_string();
        Ok(tok)
    }

    fn lex_number(&mut self) -> Result<Token, Diagnostic> {
        let start = self.cursor;
        let mut tok = self.make_token(TokenKind::Number, start, 0);

        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.bump();
        }
        let digits = &self.src[start..self.cursor];

        // Optional width suffix, only when it does not run into an
        // identifier: `5c` is a char-width 5, `5cm` is number then ident.
        tok.width = match self.peek() {
            Some(suffix @ (b'c' | b'i' | b'l'))
                if !self
                    .peek_at(1)
                    .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_') =>
            {
                self.bump();
                match suffix {
                    b'c' => NumberWidth::Char,
                    b'i' => NumberWidth::Int,
                    _ => NumberWidth::Long,
                }
            }
            _ => NumberWidth::Any,
        };

        tok.len = self.cursor - start;
        tok.number = digits.parse::<i64>().map_err(|_| {
            let mut bad = tok.clone();
            bad.kind = TokenKind::Invalid;
            Diagnostic::error_at(&bad, format!("number literal `{}` is too large", digits))
        })?;

        Ok(tok)
    }

    fn lex_word(&mut self) -> Result<Token, Diagnostic> {
        let start = self.cursor;
        let mut tok = self.make_token(TokenKind::Identifier, start, 0);

        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            self.bump();
        }

        let text = &self.src[start..self.cursor];
        tok.len = text.len();
        match keyword_kind(text) {
            Some(kind) => tok.kind = kind,
            None => tok.value = text.to_string(),
        }

        Ok(tok)
    }
}

/// Lex the whole source up front. Used by the token dump and by tests; the
/// parser pulls tokens lazily instead.
pub fn collect_tokens(src: &str) -> Result<Vec<Token>, Diagnostic> {
    let mut lexer = Lexer::new(src);
    let mut tokens = Vec::new();

    loop {
        let tok = lexer.next()?;
        let done = tok.kind == TokenKind::Eof;
        tokens.push(tok);
        if done {
            return Ok(tokens);
        }
    }
}

/// Render every token as `line:column kind(value)`, one per line, to
/// stderr. Backs `--dump-tokens`.
pub fn dump_tokens(tokens: &[Token]) {
    for tok in tokens {
        let mut line = format!("{}:{} {}", tok.line, tok.column, tok.kind.as_str());
        match tok.kind {
            TokenKind::Number => line.push_str(&format!("({})", tok.number)),
            _ if !tok.value.is_empty() => line.push_str(&format!("({})", tok.value)),
            _ => {}
        }
        eprintln!("{}", line);
    }
}
