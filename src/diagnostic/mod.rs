pub mod ansi;
pub mod json;

use crate::ast::Span;
use crate::compiler::CompileError;
use crate::lexer::LexError;
use crate::parser::ParseError;
use crate::session::SessionError;
use crate::vm::VmError;

/// A source range the diagnostic points at, with a short caption.
#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

/// One reported error. Every stage of the pipeline fails with errors only.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<&'static str>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into() });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Diagnostics for a failed unit. Parse failures may carry several errors;
/// every other stage stops at the first.
pub fn from_session_error(e: &SessionError) -> Vec<Diagnostic> {
    match e {
        SessionError::Lex(e) => vec![Diagnostic::from(e)],
        SessionError::Parse(errors) => errors.iter().map(Diagnostic::from).collect(),
        SessionError::Compile(e) => vec![Diagnostic::from(e)],
        SessionError::Runtime(e) => vec![Diagnostic::from(e)],
    }
}

// ---- From impls for each stage's error type ----

impl From<&LexError> for Diagnostic {
    fn from(e: &LexError) -> Self {
        let span = Span {
            start: e.position,
            end: e.position + e.snippet.len().max(1),
        };
        let mut d = Diagnostic::error(format!("unexpected input '{}'", e.snippet))
            .with_code("L001")
            .with_span(span, "here");
        if !e.suggestion.is_empty() {
            d = d.with_suggestion(e.suggestion.clone());
        }
        d
    }
}

impl From<&ParseError> for Diagnostic {
    fn from(e: &ParseError) -> Self {
        Diagnostic::error(&e.message).with_code(e.code).with_span(e.span, "here")
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        match e {
            CompileError::UndefinedVariable { name, span } => Diagnostic::error(e.to_string())
                .with_code("C001")
                .with_span(*span, "not found in this scope")
                .with_suggestion(format!("bind it first with `let {} = ...;`", name)),
            CompileError::ReturnOutsideFunction => Diagnostic::error(e.to_string())
                .with_code("C002")
                .with_note("`return` is only valid inside a function body"),
            CompileError::TooManyGlobals { .. } => Diagnostic::error(e.to_string()).with_code("C003"),
            CompileError::TooManyConstants { .. } => Diagnostic::error(e.to_string()).with_code("C004"),
            CompileError::Operand(_) => Diagnostic::error(e.to_string())
                .with_code("C005")
                .with_note("functions take at most 255 parameters and capture at most 255 values"),
        }
    }
}

impl From<&VmError> for Diagnostic {
    fn from(e: &VmError) -> Self {
        let code = match e {
            VmError::TypeMismatch { .. } | VmError::UnsupportedOperand { .. } => "R001",
            VmError::IndexNotSupported { .. } => "R002",
            VmError::UnhashableKey(_) => "R003",
            VmError::NotCallable(_) => "R004",
            VmError::Arity { .. } => "R005",
            VmError::DivisionByZero => "R006",
            _ => "R100",
        };
        let d = Diagnostic::error(e.to_string()).with_code(code);
        match e {
            VmError::UnhashableKey(_) => d.with_note("only INTEGER, BOOLEAN and STRING values can be hash keys"),
            VmError::FrameOverflow { .. } => d.with_suggestion("check for recursion without a base case"),
            _ if e.is_fatal() && code == "R100" => d.with_note("internal error: the compiled program is malformed"),
            _ => d,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectType;

    #[test]
    fn diagnostic_error_builder() {
        let d = Diagnostic::error("something went wrong");
        assert_eq!(d.message, "something went wrong");
        assert!(d.code.is_none());
        assert!(d.labels.is_empty());
        assert!(d.notes.is_empty());
        assert!(d.suggestion.is_none());
    }

    #[test]
    fn diagnostic_with_span() {
        let d = Diagnostic::error("bad token").with_span(Span { start: 5, end: 8 }, "here");
        assert_eq!(d.labels.len(), 1);
        assert_eq!(d.labels[0].span, Span { start: 5, end: 8 });
        assert_eq!(d.labels[0].message, "here");
    }

    #[test]
    fn from_lex_error() {
        let e = LexError {
            position: 10,
            snippet: "@".to_string(),
            suggestion: String::new(),
        };
        let d = Diagnostic::from(&e);
        assert_eq!(d.code, Some("L001"));
        assert!(d.message.contains('@'));
        assert_eq!(d.labels[0].span, Span { start: 10, end: 11 });
        assert!(d.suggestion.is_none());
    }

    #[test]
    fn from_parse_error() {
        let e = ParseError {
            code: "P003",
            position: 1,
            span: Span { start: 4, end: 5 },
            message: "expected identifier, got '='".to_string(),
        };
        let d = Diagnostic::from(&e);
        assert_eq!(d.code, Some("P003"));
        assert!(d.message.contains("expected identifier"));
        assert_eq!(d.labels[0].span, Span { start: 4, end: 5 });
    }

    #[test]
    fn undefined_variable_points_at_name() {
        let e = CompileError::UndefinedVariable { name: "foo".to_string(), span: Span { start: 3, end: 6 } };
        let d = Diagnostic::from(&e);
        assert_eq!(d.code, Some("C001"));
        assert_eq!(d.labels[0].span, Span { start: 3, end: 6 });
        assert!(d.suggestion.as_deref().is_some_and(|s| s.contains("let foo")));
    }

    #[test]
    fn runtime_errors_have_no_span() {
        let e = VmError::TypeMismatch { operator: "+", left: ObjectType::Integer, right: ObjectType::String };
        let d = Diagnostic::from(&e);
        assert_eq!(d.code, Some("R001"));
        assert_eq!(d.message, "unsupported types for +: INTEGER STRING");
        assert!(d.labels.is_empty());
    }

    #[test]
    fn fatal_runtime_errors_are_flagged_internal() {
        let d = Diagnostic::from(&VmError::StackUnderflow);
        assert_eq!(d.code, Some("R100"));
        assert!(d.notes.iter().any(|n| n.contains("internal error")));

        let d = Diagnostic::from(&VmError::FrameOverflow { limit: 1024 });
        assert!(d.suggestion.is_some());
        assert!(d.notes.is_empty());
    }

    #[test]
    fn session_parse_errors_expand_to_one_diagnostic_each() {
        let err = crate::session::parse("let = 1; let = 2;").unwrap_err();
        let diagnostics = from_session_error(&err);
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics.iter().all(|d| d.code == Some("P003")));
    }
}
