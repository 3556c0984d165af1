//! Diagnostics
//!
//! The diagnostic envelope shared by every pass, the consumer trait the
//! parser reports into, and a buffering adapter for speculative parsing:
//! swap the buffer in before trying a production, replay it on commit,
//! drop it on backtrack.

use crate::source::SourceMap;
use crate::span::Span;
use std::fmt;

/// Severity of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Error => write!(f, "error"),
            Level::Warning => write!(f, "warning"),
            Level::Note => write!(f, "note"),
        }
    }
}

/// A single diagnostic message anchored to a source range
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
    pub anchor: Span,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, anchor: Span) -> Self {
        Self {
            level: Level::Error,
            message: message.into(),
            anchor,
        }
    }

    pub fn warning(message: impl Into<String>, anchor: Span) -> Self {
        Self {
            level: Level::Warning,
            message: message.into(),
            anchor,
        }
    }

    pub fn note(message: impl Into<String>, anchor: Span) -> Self {
        Self {
            level: Level::Note,
            message: message.into(),
            anchor,
        }
    }
}

/// Anything that accepts diagnostics as they are produced
pub trait DiagnosticConsumer {
    fn report(&mut self, diag: Diagnostic);
}

/// Collects diagnostics in the order they were reported
#[derive(Debug, Default)]
pub struct DiagnosticLog {
    pub diags: Vec<Diagnostic>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_errors(&self) -> bool {
        self.diags.iter().any(|d| d.level == Level::Error)
    }

    /// Number of diagnostics reported so far. The parser records this
    /// before speculative work and truncates back to it on backtrack.
    pub fn checkpoint(&self) -> usize {
        self.diags.len()
    }

    pub fn truncate(&mut self, checkpoint: usize) {
        self.diags.truncate(checkpoint);
    }
}

impl DiagnosticConsumer for DiagnosticLog {
    fn report(&mut self, diag: Diagnostic) {
        self.diags.push(diag);
    }
}

/// Holds diagnostics back until the caller decides their fate
#[derive(Debug, Default)]
pub struct BufferingConsumer {
    buffered: Vec<Diagnostic>,
}

impl BufferingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward everything buffered so far to `sink`, in order
    pub fn replay(self, sink: &mut dyn DiagnosticConsumer) {
        for diag in self.buffered {
            sink.report(diag);
        }
    }

    /// Drop everything buffered so far
    pub fn discard(self) {}
}

impl DiagnosticConsumer for BufferingConsumer {
    fn report(&mut self, diag: Diagnostic) {
        self.buffered.push(diag);
    }
}

/// Renders a diagnostic with a source excerpt and caret:
///
/// ```text
/// error: expected parameter list
///  --> demo.vl:3:7
///   |
/// 3 | fun f( -> Int { ret 1 }
///   |       ^
/// ```
pub fn render(sources: &SourceMap, diag: &Diagnostic) -> String {
    let file = sources.get(diag.anchor.source);
    let pos = file.position(diag.anchor.start);
    let line_text = file.line_text(diag.anchor.start);

    let mut out = format!("{}: {}\n", diag.level, diag.message);
    let line_num = pos.line.to_string();
    let gutter = " ".repeat(line_num.len());
    let pointer = format!("{}^", " ".repeat((pos.column as usize).saturating_sub(1)));

    out.push_str(&format!(" --> {}:{}:{}\n", file.url, pos.line, pos.column));
    out.push_str(&format!("{}  |\n", gutter));
    out.push_str(&format!("{} | {}\n", line_num, line_text));
    out.push_str(&format!("{}  | {}\n", gutter, pointer));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SourceId;

    #[test]
    fn test_buffering_replay() {
        let mut buffer = BufferingConsumer::new();
        buffer.report(Diagnostic::error("first", Span::new(SourceId(0), 0, 1)));
        buffer.report(Diagnostic::warning("second", Span::new(SourceId(0), 1, 2)));

        let mut log = DiagnosticLog::new();
        buffer.replay(&mut log);
        assert_eq!(log.diags.len(), 2);
        assert_eq!(log.diags[0].message, "first");
        assert_eq!(log.diags[1].message, "second");
    }

    #[test]
    fn test_buffering_discard() {
        let mut buffer = BufferingConsumer::new();
        buffer.report(Diagnostic::error("gone", Span::new(SourceId(0), 0, 1)));
        buffer.discard();

        let log = DiagnosticLog::new();
        assert!(!log.has_errors());
    }

    #[test]
    fn test_render_points_at_column() {
        let mut sources = SourceMap::new();
        let id = sources.load_synthesized("demo.vl", "val x = @\n");
        let diag = Diagnostic::error("unknown character", Span::new(id, 8, 9));
        let text = render(&sources, &diag);
        assert!(text.contains("error: unknown character"));
        assert!(text.contains(":1:9"));
        assert!(text.lines().last().unwrap().trim_end().ends_with('^'));
    }
}
