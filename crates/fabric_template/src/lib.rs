//! Environment templates for route rules.
//!
//! Rules are declared with `{{ .Vars.name }}`, `{{ .Env.name }}` and
//! `{{ .Secrets.name }}` placeholders. [`EnvTemplate`] parses a rule once,
//! reports the names it requires ([`EnvSchema`]) and resolves it against
//! [`EnvData`].

pub mod error;
pub mod lexer;
pub mod parser;
pub mod template;

pub use error::TemplateError;
pub use template::{EnvData, EnvSchema, EnvTemplate, Problem};
