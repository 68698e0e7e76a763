//! Compiler diagnostics
//!
//! Three severities: info, warning, error. Only errors terminate
//! compilation. A diagnostic optionally carries a source span; when one is
//! present the renderer shows the offending line with the span underlined.

use crate::lexer::Token;
use std::io::IsTerminal;
use std::path::Path;

/// ANSI color palette for diagnostic output.
///
/// Only standard 16-color codes, so output stays readable on both light
/// and dark terminals.
#[derive(Clone, Copy, Debug)]
pub struct Colors {
    pub red: &'static str,
    pub yellow: &'static str,
    pub blue: &'static str,
    pub bold: &'static str,
    pub dim: &'static str,
    pub reset: &'static str,
}

impl Colors {
    /// Colors enabled (ANSI escape codes).
    pub const ON: Self = Self {
        red: "\x1b[31m",
        yellow: "\x1b[33m",
        blue: "\x1b[34m",
        bold: "\x1b[1m",
        dim: "\x1b[2m",
        reset: "\x1b[0m",
    };

    /// Colors disabled (empty strings).
    pub const OFF: Self = Self {
        red: "",
        yellow: "",
        blue: "",
        bold: "",
        dim: "",
        reset: "",
    };

    pub fn new(enabled: bool) -> Self {
        if enabled { Self::ON } else { Self::OFF }
    }

    /// Pick colors for stderr: on when it is a terminal.
    pub fn stderr() -> Self {
        Self::new(std::io::stderr().is_terminal())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    fn label(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }

    fn color(self, colors: &Colors) -> &'static str {
        match self {
            Severity::Info => colors.blue,
            Severity::Warning => colors.yellow,
            Severity::Error => colors.red,
        }
    }
}

/// A half-open byte span into the source, with the precomputed line and
/// column of its first byte (both 1-indexed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub pos: usize,
    pub len: usize,
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn of_token(tok: &Token) -> Self {
        Span {
            pos: tok.pos,
            len: tok.len,
            line: tok.line,
            column: tok.column,
        }
    }
}

/// A single compiler message, optionally anchored to a source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            span: None,
        }
    }

    pub fn error_at(tok: &Token, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            span: Some(Span::of_token(tok)),
        }
    }

    pub fn warning_at(tok: &Token, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
            span: Some(Span::of_token(tok)),
        }
    }

    /// Render the diagnostic against the source it was produced from.
    ///
    /// With a span:
    /// ```text
    /// error: Symbol `x` does not exist
    ///  --> main.sn:3:18
    ///     let y: int = x;
    ///                  ^
    /// ```
    pub fn render(&self, source: &str, path: &Path, colors: &Colors) -> String {
        let mut out = format!(
            "{}{}{}{}: {}",
            colors.bold,
            self.severity.color(colors),
            self.severity.label(),
            colors.reset,
            self.message
        );

        let Some(span) = self.span else {
            return out;
        };

        out.push_str(&format!(
            "\n {}-->{} {}:{}:{}",
            colors.dim,
            colors.reset,
            path.display(),
            span.line,
            span.column
        ));

        // The line containing the first byte of the span.
        let line_start = source[..span.pos.min(source.len())]
            .rfind('\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        let line_end = source[line_start..]
            .find('\n')
            .map(|i| line_start + i)
            .unwrap_or(source.len());
        let line = &source[line_start..line_end];

        out.push('\n');
        out.push_str(line);
        out.push('\n');

        // Caret underline covering the span, clamped to the line.
        let caret_start = span.pos.saturating_sub(line_start);
        let caret_len = span.len.max(1).min(line.len().saturating_sub(caret_start).max(1));
        for _ in 0..caret_start {
            out.push(' ');
        }
        out.push_str(self.severity.color(colors));
        for _ in 0..caret_len {
            out.push('^');
        }
        out.push_str(colors.reset);

        out
    }
}

/// Print an info-level stage banner to stderr. Gated on verbosity by the
/// caller.
pub fn info(message: &str) {
    let colors = Colors::stderr();
    eprintln!(
        "{}{}info{}: {}",
        colors.bold, colors.blue, colors.reset, message
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::{NumberWidth, Token, TokenKind};
    use std::path::PathBuf;

    fn ident_token(pos: usize, len: usize, line: usize, column: usize) -> Token {
        Token {
            kind: TokenKind::Identifier,
            value: "x".to_string(),
            number: 0,
            width: NumberWidth::Any,
            pos,
            len,
            line,
            column,
        }
    }

    #[test]
    fn test_render_without_span() {
        let diag = Diagnostic::error("something went wrong");
        let rendered = diag.render("", &PathBuf::from("a.sn"), &Colors::OFF);
        assert_eq!(rendered, "error: something went wrong");
    }

    #[test]
    fn test_render_underlines_span() {
        let source = "let y: int = x;\n";
        let tok = ident_token(13, 1, 1, 14);
        let diag = Diagnostic::error_at(&tok, "Symbol `x` does not exist");
        let rendered = diag.render(source, &PathBuf::from("main.sn"), &Colors::OFF);

        assert!(rendered.contains("error: Symbol `x` does not exist"));
        assert!(rendered.contains("--> main.sn:1:14"));
        assert!(rendered.contains("let y: int = x;"));
        // Caret sits under the `x`.
        let caret_line = rendered.lines().last().unwrap();
        assert_eq!(caret_line.find('^'), Some(13));
    }

    #[test]
    fn test_render_second_line() {
        let source = "proc main() int {\nret urn;\n}\n";
        let tok = ident_token(18, 3, 2, 1);
        let diag = Diagnostic::error_at(&tok, "unexpected token");
        let rendered = diag.render(source, &PathBuf::from("main.sn"), &Colors::OFF);

        assert!(rendered.contains("ret urn;"));
        assert!(!rendered.contains("proc main"));
        let caret_line = rendered.lines().last().unwrap();
        assert_eq!(caret_line, "^^^");
    }
}
