use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// How serious a finding is, as reported by the analysis tool.
///
/// Levels are matched case-insensitively, and the `info` and `error` names
/// used by reviewdog are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum Severity {
    Notice,
    Warning,
    Failure,
    /// Anything we don't know how to map to an annotation level. These are
    /// kept so that they can be counted, and dropped later on.
    Unknown,
}

impl From<String> for Severity {
    fn from(level: String) -> Self {
        match level.to_ascii_lowercase().as_str() {
            "notice" | "info" => Severity::Notice,
            "warning" => Severity::Warning,
            "failure" | "error" => Severity::Failure,
            _ => Severity::Unknown,
        }
    }
}

/// One finding from a static-analysis tool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawDiagnostic")]
pub struct Diagnostic {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub severity: Severity,
    pub message: String,
    pub rule: Option<String>,
}

/// Wire format of a diagnostic, before validation.
#[derive(Deserialize)]
struct RawDiagnostic {
    path: String,
    line: usize,
    #[serde(default)]
    end_line: Option<usize>,
    severity: Severity,
    message: String,
    #[serde(default)]
    rule: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum InvalidDiagnostic {
    EmptyPath,
    LineZero,
    EndBeforeStart { start: usize, end: usize },
}

impl std::error::Error for InvalidDiagnostic {}

impl Display for InvalidDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidDiagnostic::EmptyPath => write!(f, "diagnostic path must not be empty"),
            InvalidDiagnostic::LineZero => write!(f, "diagnostic lines start at 1"),
            InvalidDiagnostic::EndBeforeStart { start, end } => {
                write!(f, "end_line {end} is before line {start}")
            }
        }
    }
}

impl TryFrom<RawDiagnostic> for Diagnostic {
    type Error = InvalidDiagnostic;

    fn try_from(raw: RawDiagnostic) -> Result<Self, Self::Error> {
        if raw.path.is_empty() {
            return Err(InvalidDiagnostic::EmptyPath);
        }
        if raw.line == 0 {
            return Err(InvalidDiagnostic::LineZero);
        }

        let end_line = raw.end_line.unwrap_or(raw.line);
        if end_line < raw.line {
            return Err(InvalidDiagnostic::EndBeforeStart {
                start: raw.line,
                end: end_line,
            });
        }

        Ok(Diagnostic {
            path: raw.path,
            start_line: raw.line,
            end_line,
            severity: raw.severity,
            message: raw.message,
            rule: raw.rule.filter(|r| !r.is_empty()),
        })
    }
}

#[cfg(test)]
impl Diagnostic {
    pub fn new(path: &str, line: usize, severity: Severity) -> Self {
        Diagnostic {
            path: path.to_owned(),
            start_line: line,
            end_line: line,
            severity,
            message: format!("finding in {path}"),
            rule: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> serde_json::Result<Diagnostic> {
        serde_json::from_str(json)
    }

    #[test]
    fn end_line_defaults_to_start() {
        let diag =
            parse(r#"{"path":"src/lib.rs","line":4,"severity":"warning","message":"m"}"#).unwrap();
        assert_eq!(diag.start_line, 4);
        assert_eq!(diag.end_line, 4);
        assert_eq!(diag.severity, Severity::Warning);
        assert_eq!(diag.rule, None);
    }

    #[test]
    fn reviewdog_levels_are_accepted() {
        let diag = parse(r#"{"path":"a","line":1,"severity":"error","message":"m"}"#).unwrap();
        assert_eq!(diag.severity, Severity::Failure);
        let diag = parse(r#"{"path":"a","line":1,"severity":"info","message":"m"}"#).unwrap();
        assert_eq!(diag.severity, Severity::Notice);
    }

    #[test]
    fn levels_ignore_case() {
        let diag = parse(r#"{"path":"a","line":1,"severity":"ERROR","message":"m"}"#).unwrap();
        assert_eq!(diag.severity, Severity::Failure);
        let diag = parse(r#"{"path":"a","line":1,"severity":"Warning","message":"m"}"#).unwrap();
        assert_eq!(diag.severity, Severity::Warning);
        let diag = parse(r#"{"path":"a","line":1,"severity":"INFO","message":"m"}"#).unwrap();
        assert_eq!(diag.severity, Severity::Notice);
    }

    #[test]
    fn unknown_severity_is_kept() {
        let diag = parse(r#"{"path":"a","line":1,"severity":"fatal","message":"m"}"#).unwrap();
        assert_eq!(diag.severity, Severity::Unknown);
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        let err = parse(r#"{"path":"a","line":0,"severity":"notice","message":"m"}"#).unwrap_err();
        assert!(err.to_string().contains("lines start at 1"));

        let err = parse(r#"{"path":"a","line":5,"end_line":3,"severity":"notice","message":"m"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("end_line 3 is before line 5"));
    }

    #[test]
    fn missing_fields_are_rejected() {
        assert!(parse(r#"{"path":"a","line":2,"severity":"notice"}"#).is_err());
        assert!(parse(r#"{"path":"","line":2,"severity":"notice","message":"m"}"#).is_err());
    }
}
