use thiserror::Error;

pub type PreviewResult<T> = Result<T, PreviewError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreviewError {
    #[error("Parse error at line {line}, column {column}: {detail}")]
    ParseError {
        line: usize,
        column: usize,
        detail: String,
    },

    #[error("Runtime error: {message}")]
    RuntimeError { message: String },

    #[error("Render error caught by boundary: {message}")]
    RenderBoundaryError { message: String },

    #[error("Preview did not finish loading within {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Rejected message from untrusted source: {reason}")]
    UntrustedMessage { reason: String },

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("{what} exceeds limit of {limit}")]
    LimitExceeded { what: String, limit: usize },

    #[error("Preview host was torn down")]
    HostTornDown,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl PreviewError {
    /// Builds a parse error positioned at byte `offset` of `source`.
    pub fn parse_at(source: &str, offset: usize, detail: impl Into<String>) -> Self {
        let (line, column) = line_column(source, offset);
        PreviewError::ParseError {
            line,
            column,
            detail: detail.into(),
        }
    }

    /// Text shown to the user when a session ends in this error.
    pub fn display_message(&self) -> String {
        match self {
            PreviewError::RuntimeError { message } if !message.trim().is_empty() => {
                message.clone()
            }
            PreviewError::RuntimeError { .. } => "Unknown runtime error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_parse_error(&self) -> bool {
        matches!(self, PreviewError::ParseError { .. })
    }
}

impl From<mlua::Error> for PreviewError {
    fn from(err: mlua::Error) -> Self {
        PreviewError::RuntimeError {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for PreviewError {
    fn from(err: std::io::Error) -> Self {
        PreviewError::Io(err.to_string())
    }
}

impl From<serde_yaml::Error> for PreviewError {
    fn from(err: serde_yaml::Error) -> Self {
        PreviewError::Config(err.to_string())
    }
}

/// 1-based line and column for a byte offset (clamped to the source length).
pub(crate) fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let mut end = offset.min(source.len());
    while !source.is_char_boundary(end) {
        end -= 1;
    }
    let before = &source[..end];
    let line = before.matches('\n').count() + 1;
    let column = match before.rfind('\n') {
        Some(nl) => before[nl + 1..].chars().count() + 1,
        None => before.chars().count() + 1,
    };
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_column_first_line() {
        assert_eq!(line_column("<div>{", 5), (1, 6));
    }

    #[test]
    fn test_line_column_after_newline() {
        assert_eq!(line_column("<div>\n  <p>", 8), (2, 3));
    }

    #[test]
    fn test_line_column_clamps_offset() {
        assert_eq!(line_column("abc", 99), (1, 4));
    }

    #[test]
    fn test_empty_runtime_message_is_replaced() {
        let err = PreviewError::RuntimeError {
            message: "  ".to_string(),
        };
        assert_eq!(err.display_message(), "Unknown runtime error");
    }

    #[test]
    fn test_parse_error_display() {
        let err = PreviewError::parse_at("<div>{", 5, "unterminated expression");
        assert_eq!(
            err.to_string(),
            "Parse error at line 1, column 6: unterminated expression"
        );
        assert!(err.is_parse_error());
    }
}
