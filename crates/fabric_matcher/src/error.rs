use thiserror::Error;

/// Errors raised while compiling a rule.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    #[error("rule syntax error at {pos}: {message}")]
    Syntax { pos: usize, message: String },

    #[error("unsupported function {0:?}")]
    UnknownFunction(String),

    #[error("{function} expects {expected} argument(s), got {got}")]
    Arity {
        function: String,
        expected: &'static str,
        got: usize,
    },

    #[error("invalid pattern {pattern:?}: {message}")]
    Pattern { pattern: String, message: String },
}

impl RuleError {
    pub(crate) fn syntax(pos: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            pos,
            message: message.into(),
        }
    }

    pub(crate) fn pattern(pattern: &str, message: impl Into<String>) -> Self {
        Self::Pattern {
            pattern: pattern.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("rule {0} has not been resolved")]
    UnresolvedRule(usize),

    #[error("rule {id}: {source}")]
    Rule {
        id: usize,
        #[source]
        source: RuleError,
    },
}
