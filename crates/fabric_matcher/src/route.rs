//! Declared routes and their priority.

use std::sync::LazyLock;

use fabric_core::RouteSpec;
use fabric_template::{EnvData, EnvSchema, EnvTemplate, TemplateError};
use regex::{Captures, Regex};

/// A `{…}` parameter token, or an escaped `\{` that starts none.
static PARAM_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\\{|\{[^}]*\}").expect("creating param token regex"));

/// A component's declared binding between a rule and a handler slot.
#[derive(Debug, Clone)]
pub struct Route {
    id: usize,
    template: EnvTemplate,
    resolved_rule: Option<String>,
    priority: usize,
}

impl Route {
    /// Parse `rule` as a template. The route is unusable until resolved.
    pub fn new(id: usize, rule: &str) -> Result<Self, TemplateError> {
        Ok(Self {
            id,
            template: EnvTemplate::parse(rule)?,
            resolved_rule: None,
            priority: 0,
        })
    }

    /// Build a route whose rule is already concrete.
    pub fn from_spec(spec: &RouteSpec) -> Result<Self, TemplateError> {
        let mut route = Self::new(spec.id, &spec.rule)?;
        route.resolve(&EnvData::default())?;
        Ok(route)
    }

    /// Expand the rule against `data` (secrets omitted) and compute its
    /// priority: the character count of the resolved rule with every
    /// parameter token removed, so literal text outranks parameters.
    pub fn resolve(&mut self, data: &EnvData) -> Result<(), TemplateError> {
        let resolved = self.template.resolve_public(data)?;
        self.priority = PARAM_TOKEN
            .replace_all(&resolved, |caps: &Captures<'_>| {
                let token = &caps[0];
                if token.starts_with('\\') {
                    token.to_string()
                } else {
                    String::new()
                }
            })
            .chars()
            .count();
        self.resolved_rule = Some(resolved);
        Ok(())
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// The rule as declared.
    pub fn rule(&self) -> &str {
        self.template.template()
    }

    pub fn resolved_rule(&self) -> Option<&str> {
        self.resolved_rule.as_deref()
    }

    pub fn priority(&self) -> usize {
        self.priority
    }

    pub fn env_schema(&self) -> &EnvSchema {
        self.template.env_schema()
    }

    /// Wire form carrying the resolved rule, if resolved.
    pub fn spec(&self) -> Option<RouteSpec> {
        self.resolved_rule
            .as_ref()
            .map(|rule| RouteSpec::new(self.id, rule.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ignores_params() {
        let mut literal = Route::new(0, "Path(`/a/b`)").unwrap();
        let mut param = Route::new(1, "Path(`/a/{x}`)").unwrap();
        literal.resolve(&EnvData::default()).unwrap();
        param.resolve(&EnvData::default()).unwrap();
        assert_eq!(literal.priority(), "Path(`/a/b`)".len());
        assert_eq!(param.priority(), "Path(`/a/`)".len());
        assert!(literal.priority() > param.priority());
    }

    #[test]
    fn test_escaped_brace_counts() {
        let mut route = Route::new(0, r"Path(`/a/\{b}`)").unwrap();
        route.resolve(&EnvData::default()).unwrap();
        assert_eq!(route.priority(), r"Path(`/a/\{b}`)".len());
    }

    #[test]
    fn test_empty_and_adjacent_params_removed() {
        let mut empty = Route::new(0, "Query(`q`, `{}`)").unwrap();
        empty.resolve(&EnvData::default()).unwrap();
        assert_eq!(empty.priority(), "Query(`q`, ``)".len());

        let mut adjacent = Route::new(1, "Path(`/{a}{b}`)").unwrap();
        adjacent.resolve(&EnvData::default()).unwrap();
        assert_eq!(adjacent.priority(), "Path(`/`)".len());

        let mut leading = Route::new(2, "Header(`x`, `{v}`)").unwrap();
        leading.resolve(&EnvData::default()).unwrap();
        assert_eq!(leading.priority(), "Header(`x`, ``)".len());
    }

    #[test]
    fn test_hello_priority() {
        let mut route = Route::new(3, "Path(`/hello/{who}`)").unwrap();
        route.resolve(&EnvData::default()).unwrap();
        assert_eq!(route.priority(), "Path(`/hello/`)".len());
        assert_eq!(
            route.spec(),
            Some(RouteSpec::new(3, "Path(`/hello/{who}`)"))
        );
    }

    #[test]
    fn test_resolve_with_vars() {
        let data = EnvData::new().with_var("sub", "api");
        let mut route = Route::new(0, "Path(`/{{.Vars.sub}}/{id}`)").unwrap();
        assert!(route.spec().is_none());
        route.resolve(&data).unwrap();
        assert_eq!(route.resolved_rule(), Some("Path(`/api/{id}`)"));
        assert_eq!(route.rule(), "Path(`/{{.Vars.sub}}/{id}`)");
        assert!(route.env_schema().vars.contains("sub"));
    }
}
