//! Template error types.

/// Errors raised while parsing or resolving a template.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateError {
    /// The template grammar is invalid.
    #[error("template syntax error at {pos}: {message}")]
    Syntax { pos: usize, message: String },

    /// Execution failed, e.g. a reference into an unknown section.
    #[error("template execution failed: {0}")]
    Exec(String),
}

impl TemplateError {
    pub(crate) fn syntax(pos: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            pos,
            message: message.into(),
        }
    }
}
