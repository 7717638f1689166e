//! Engine error types

use miette::{Diagnostic, NamedSource, SourceSpan};
use patchgate_core::CoreError;
use thiserror::Error;

use crate::lookup::LookupError;
use crate::suggestions::{
    AVAILABLE_FILTERS, extract_quoted_name, suggest_undefined_variable, suggest_unknown_filter,
    suggest_unknown_function,
};

/// Main engine error type
///
/// Parse and evaluation failures are separate variants so the admission layer can
/// report them as distinct failures.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("patch directive does not parse: {0}")]
    Parse(#[source] TemplateError),

    #[error("patch directive failed to evaluate: {0}")]
    Eval(#[source] TemplateError),

    #[error("rendered patch is not valid YAML or JSON: {message}")]
    Normalization { message: String },

    #[error(transparent)]
    PatchType(CoreError),

    #[error("admitted object is not a map")]
    InvalidObject,

    #[error("cannot prepare lookups: {0}")]
    Lookup(#[from] LookupError),
}

/// Error kind for categorizing template errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateErrorKind {
    UndefinedVariable,
    UnknownFilter,
    UnknownFunction,
    SyntaxError,
    TypeError,
    InvalidOperation,
    Other,
}

impl TemplateErrorKind {
    /// Convert to a code string for diagnostics
    pub fn to_code_string(&self) -> &'static str {
        match self {
            Self::UndefinedVariable => "undefined_variable",
            Self::UnknownFilter => "unknown_filter",
            Self::UnknownFunction => "unknown_function",
            Self::SyntaxError => "syntax",
            Self::TypeError => "type",
            Self::InvalidOperation => "invalid_operation",
            Self::Other => "render",
        }
    }
}

/// Template-specific error with source information
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{message}")]
#[diagnostic(code(patchgate::template::render))]
pub struct TemplateError {
    pub message: String,

    pub kind: TemplateErrorKind,

    /// Directive source
    #[source_code]
    pub src: NamedSource<String>,

    #[label("error occurred here")]
    pub span: Option<SourceSpan>,

    #[help]
    pub suggestion: Option<String>,
}

impl TemplateError {
    /// Build from a MiniJinja error, using the render context for suggestions
    pub fn from_minijinja(
        err: minijinja::Error,
        template_name: &str,
        template_source: &str,
        context: Option<&serde_json::Value>,
    ) -> Self {
        let (kind, message) = categorize_minijinja_error(&err);
        let span = err
            .line()
            .and_then(|line_num| calculate_span(template_source, line_num));
        let suggestion = generate_suggestion(&err, kind, context);

        Self {
            message,
            kind,
            src: NamedSource::new(template_name, template_source.to_string()),
            span,
            suggestion,
        }
    }

    /// Create a simple error without source mapping
    pub fn simple(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: TemplateErrorKind::Other,
            src: NamedSource::new("<unknown>", String::new()),
            span: None,
            suggestion: None,
        }
    }

    pub fn kind(&self) -> TemplateErrorKind {
        self.kind
    }
}

/// Categorize a MiniJinja error into our error kinds
fn categorize_minijinja_error(err: &minijinja::Error) -> (TemplateErrorKind, String) {
    let msg = err.to_string();
    let msg_lower = msg.to_lowercase();
    let detailed = format!("{:#}", err);

    let kind = match err.kind() {
        minijinja::ErrorKind::UndefinedError => TemplateErrorKind::UndefinedVariable,
        minijinja::ErrorKind::UnknownFilter => TemplateErrorKind::UnknownFilter,
        minijinja::ErrorKind::UnknownFunction => TemplateErrorKind::UnknownFunction,
        minijinja::ErrorKind::SyntaxError => TemplateErrorKind::SyntaxError,
        minijinja::ErrorKind::InvalidOperation => TemplateErrorKind::InvalidOperation,
        minijinja::ErrorKind::NonPrimitive | minijinja::ErrorKind::NonKey => {
            TemplateErrorKind::TypeError
        }
        _ => {
            if msg_lower.contains("undefined") {
                TemplateErrorKind::UndefinedVariable
            } else if msg_lower.contains("not iterable") || msg_lower.contains("cannot") {
                TemplateErrorKind::TypeError
            } else {
                TemplateErrorKind::Other
            }
        }
    };

    // MiniJinja's detailed display marks the failing line with `>`:
    //    2 >   team: {{ metadata.lables.team }}
    //      i          ^^^^^^^^^^^^^^^^^^^^ undefined value
    let enhanced_msg = match kind {
        TemplateErrorKind::UndefinedVariable => match extract_expression_from_display(&detailed) {
            Some(expr) => format!("undefined variable `{}`", expr),
            None => msg.replace("undefined value", "undefined variable"),
        },
        TemplateErrorKind::UnknownFilter => match extract_filter_from_display(&detailed) {
            Some(filter) => format!("unknown filter `{}`", filter),
            None => msg,
        },
        _ => msg
            .replace("invalid operation: ", "")
            .replace("syntax error: ", "")
            .replace("undefined value", "undefined variable"),
    };

    (kind, enhanced_msg)
}

/// Contents of the `{{ ... }}` on the marked error line
fn marked_expression(display: &str) -> Option<&str> {
    let lines: Vec<&str> = display.lines().collect();

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        let candidate = if trimmed.contains(" > ") || trimmed.starts_with("> ") {
            Some(*line)
        } else if line.contains("^^^") && i > 0 {
            Some(lines[i - 1])
        } else {
            None
        };

        if let Some(line) = candidate
            && let Some(start) = line.find("{{")
            && let Some(end) = line[start..].find("}}")
        {
            return Some(&line[start + 2..start + end]);
        }
    }
    None
}

/// Extract the problematic expression (before any filter)
fn extract_expression_from_display(display: &str) -> Option<String> {
    let expr = marked_expression(display)?;
    let head = expr.split('|').next().unwrap_or(expr).trim();
    (!head.is_empty()).then(|| head.to_string())
}

/// Extract the last filter name of the marked expression
fn extract_filter_from_display(display: &str) -> Option<String> {
    let expr = marked_expression(display)?;
    let (_, filter) = expr.rsplit_once('|')?;
    filter
        .split(|c: char| c.is_whitespace() || c == '(')
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Calculate the source span for a given line number
fn calculate_span(source: &str, line_num: usize) -> Option<SourceSpan> {
    let mut offset = 0;

    for (index, line) in source.lines().enumerate() {
        if index + 1 == line_num {
            return Some(SourceSpan::new(offset.into(), line.len()));
        }
        offset += line.len() + 1;
    }

    None
}

/// Generate context-aware suggestions based on error kind
fn generate_suggestion(
    err: &minijinja::Error,
    kind: TemplateErrorKind,
    context: Option<&serde_json::Value>,
) -> Option<String> {
    let msg = err.to_string();
    let detailed = format!("{:#}", err);

    match kind {
        TemplateErrorKind::UndefinedVariable => {
            let path = extract_expression_from_display(&detailed)?;
            match context {
                Some(ctx) => suggest_undefined_variable(&path, ctx),
                None => Some(format!(
                    "`{}` is not defined. Use the `default` filter for optional fields.",
                    path
                )),
            }
        }
        TemplateErrorKind::UnknownFilter => {
            match extract_filter_from_display(&detailed).or_else(|| extract_quoted_name(&msg)) {
                Some(name) => suggest_unknown_filter(&name),
                None => Some(format!("Available filters: {}", AVAILABLE_FILTERS.join(", "))),
            }
        }
        TemplateErrorKind::UnknownFunction => {
            extract_quoted_name(&msg).and_then(|name| suggest_unknown_function(&name))
        }
        TemplateErrorKind::SyntaxError => Some(
            "Check bracket matching: `{{ }}` for expressions, `{% %}` for statements, `{# #}` for comments"
                .to_string(),
        ),
        TemplateErrorKind::TypeError if msg.to_lowercase().contains("not iterable") => Some(
            "Maps require `| dictsort` to iterate: `{% for key, value in obj | dictsort %}`"
                .to_string(),
        ),
        _ => None,
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
