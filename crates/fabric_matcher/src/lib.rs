//! Route rule compiler and event matcher.
//!
//! Rules are boolean expressions over predicate calls, for example
//! ``Host(`{sub}.example.com`) && PathPrefix(`/api`) && !Method(`DELETE`)``.
//! [`Route`] resolves a rule template and computes its priority;
//! [`EventMatcher`] compiles resolved routes and selects the best match for an
//! event, writing captured path/host parameters onto it.

pub mod error;
pub mod lexer;
pub mod matcher;
pub mod parser;
pub mod predicate;
pub mod route;

pub use error::{MatcherError, RuleError};
pub use matcher::EventMatcher;
pub use predicate::Predicate;
pub use route::Route;
