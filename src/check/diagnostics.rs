//! Diagnostic collection and rendering.
//!
//! Every checker reports into one [`Reporter`]; nothing stops at the first
//! problem. The final list is deduplicated and sorted by position so two
//! runs over the same tree print the same output.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::parser::Position;

/// A positioned message about the analyzed source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    pub position: Position,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.position, self.message)
    }
}

/// Accumulates diagnostics for one run.
#[derive(Debug, Default)]
pub struct Reporter {
    diagnostics: Vec<Diagnostic>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, position: Position, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(%position, %message, "diagnostic");
        self.diagnostics.push(Diagnostic { position, message });
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Sorted, deduplicated diagnostics.
    pub fn finish(self) -> Vec<Diagnostic> {
        let mut diagnostics = self.diagnostics;
        diagnostics.sort();
        diagnostics.dedup();
        diagnostics
    }
}

/// Output format for a diagnostic list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Format {
    #[default]
    Text,
    Json,
}

/// Render diagnostics one per line as `file:line:col: message`.
pub fn render_text(diagnostics: &[Diagnostic]) -> String {
    let mut out = String::new();
    for diagnostic in diagnostics {
        out.push_str(&diagnostic.to_string());
        out.push('\n');
    }
    out
}

/// Render diagnostics as a pretty-printed JSON array.
pub fn render_json(diagnostics: &[Diagnostic]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(diagnostics)
}

pub fn render(diagnostics: &[Diagnostic], format: Format) -> serde_json::Result<String> {
    match format {
        Format::Text => Ok(render_text(diagnostics)),
        Format::Json => render_json(diagnostics),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn pos(file: &str, line: usize, column: usize) -> Position {
        Position {
            file: PathBuf::from(file),
            line,
            column,
        }
    }

    #[test]
    fn test_finish_sorts_and_dedups() {
        let mut reporter = Reporter::new();
        reporter.report(pos("b.go", 1, 1), "second file");
        reporter.report(pos("a.go", 9, 2), "late");
        reporter.report(pos("a.go", 3, 5), "early");
        reporter.report(pos("a.go", 3, 5), "early");
        assert_eq!(reporter.len(), 4);

        let out = reporter.finish();
        let messages: Vec<&str> = out.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["early", "late", "second file"]);
    }

    #[test]
    fn test_render_text() {
        let diagnostics = vec![Diagnostic {
            position: pos("api/client.go", 10, 4),
            message: "Client missing method for GET /foo".into(),
        }];
        assert_eq!(
            render_text(&diagnostics),
            "api/client.go:10:4: Client missing method for GET /foo\n"
        );
    }

    #[test]
    fn test_render_json() {
        let diagnostics = vec![Diagnostic {
            position: pos("api/server.go", 2, 1),
            message: "Could not locate handler definition".into(),
        }];
        let json = render(&diagnostics, Format::Json).unwrap();
        let parsed: Vec<Diagnostic> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, diagnostics);
        assert!(json.contains("\"line\": 2"));
    }
}
