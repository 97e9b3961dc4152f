//! Parsed environment templates and the data they resolve against.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use fabric_core::Val;
use serde::{Deserialize, Serialize};

use crate::error::TemplateError;
use crate::parser::{Node, Operand, Parser};

const SECTION_VARS: &str = "Vars";
const SECTION_ENV: &str = "Env";
const SECTION_SECRETS: &str = "Secrets";

/// Environment data a template resolves against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvData {
    pub vars: BTreeMap<String, Val>,
    pub secrets: BTreeMap<String, Val>,
}

impl EnvData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, name: impl Into<String>, val: impl Into<Val>) -> Self {
        self.vars.insert(name.into(), val.into());
        self
    }

    pub fn with_secret(mut self, name: impl Into<String>, val: impl Into<Val>) -> Self {
        self.secrets.insert(name.into(), val.into());
        self
    }
}

/// Names a template requires, split by section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSchema {
    pub vars: BTreeSet<String>,
    pub secrets: BTreeSet<String>,
}

impl EnvSchema {
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty() && self.secrets.is_empty()
    }

    pub fn merge(&mut self, other: &EnvSchema) {
        self.vars.extend(other.vars.iter().cloned());
        self.secrets.extend(other.secrets.iter().cloned());
    }

    /// Report every required name missing from `data`.
    pub fn validate(&self, data: &EnvData) -> Vec<Problem> {
        let vars = self
            .vars
            .iter()
            .filter(|name| !data.vars.contains_key(*name))
            .map(|name| Problem::MissingVar(name.clone()));
        let secrets = self
            .secrets
            .iter()
            .filter(|name| !data.secrets.contains_key(*name))
            .map(|name| Problem::MissingSecret(name.clone()));
        vars.chain(secrets).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    MissingVar(String),
    MissingSecret(String),
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Problem::MissingVar(name) => write!(f, "var {name:?} not found but is required"),
            Problem::MissingSecret(name) => {
                write!(f, "secret {name:?} not found but is required")
            }
        }
    }
}

/// A template parsed once and resolvable many times.
#[derive(Debug, Clone)]
pub struct EnvTemplate {
    template: String,
    nodes: Vec<Node>,
    schema: EnvSchema,
}

impl EnvTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let collapsed = template.split_whitespace().collect::<Vec<_>>().join(" ");
        let nodes = Parser::parse(&collapsed)?;

        let mut schema = EnvSchema::default();
        for node in &nodes {
            if let Node::Action {
                operand: Operand::Field(parts),
                ..
            } = node
                && let [section, name] = parts.as_slice()
            {
                match section.as_str() {
                    SECTION_VARS | SECTION_ENV => {
                        schema.vars.insert(name.clone());
                    }
                    SECTION_SECRETS => {
                        schema.secrets.insert(name.clone());
                    }
                    _ => {}
                }
            }
        }

        Ok(Self {
            template: template.to_string(),
            nodes,
            schema,
        })
    }

    /// The template as written, before whitespace collapsing.
    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn env_schema(&self) -> &EnvSchema {
        &self.schema
    }

    /// Resolve with vars and secrets.
    pub fn resolve(&self, data: &EnvData) -> Result<String, TemplateError> {
        self.execute(data, true)
    }

    /// Resolve with secrets rendered empty. Used for rules that leave the
    /// component.
    pub fn resolve_public(&self, data: &EnvData) -> Result<String, TemplateError> {
        self.execute(data, false)
    }

    fn execute(&self, data: &EnvData, with_secrets: bool) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.template.len());
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action { operand, pos } => match operand {
                    Operand::Str(s) => out.push_str(s),
                    Operand::Number(n) => out.push_str(&Val::Number(*n).as_string()),
                    Operand::Bool(b) => out.push_str(&b.to_string()),
                    Operand::Dot => {
                        return Err(TemplateError::Exec(format!(
                            "cannot render environment root at {pos}"
                        )));
                    }
                    Operand::Field(parts) => {
                        if let Some(val) = lookup(parts, data, with_secrets, *pos)? {
                            out.push_str(&render(val));
                        }
                    }
                },
            }
        }
        Ok(out)
    }
}

fn lookup<'a>(
    parts: &[String],
    data: &'a EnvData,
    with_secrets: bool,
    pos: usize,
) -> Result<Option<&'a Val>, TemplateError> {
    let [section, name] = parts else {
        return Err(TemplateError::Exec(format!(
            "field .{} at {pos} must have the form .Section.Name",
            parts.join(".")
        )));
    };
    match section.as_str() {
        SECTION_VARS | SECTION_ENV => Ok(data.vars.get(name)),
        SECTION_SECRETS if with_secrets => Ok(data.secrets.get(name)),
        SECTION_SECRETS => Ok(None),
        other => Err(TemplateError::Exec(format!(
            "unknown section {other:?} at {pos}"
        ))),
    }
}

/// Arrays become an anchored regex alternation so one placeholder can match
/// any declared value.
fn render(val: &Val) -> String {
    if !matches!(val, Val::ArrayNumber(_) | Val::ArrayString(_)) {
        return val.as_string();
    }
    let alternatives = val
        .as_array_string()
        .iter()
        .map(|s| format!("^{}$", regex::escape(s)))
        .collect::<Vec<_>>()
        .join("|");
    format!("{{{alternatives}}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> EnvData {
        EnvData::new()
            .with_var("a", "x")
            .with_var("b", vec![1.1, 2.0])
            .with_var("c", vec!["u.v", "w"])
            .with_secret("s", "hunter2")
    }

    #[test]
    fn test_resolve_route() {
        let tpl = EnvTemplate::parse(
            "Host(`{{.Env.a}}.example.com`) && Path(`/a/{{.Vars.b}}/{id}`)",
        )
        .unwrap();
        assert_eq!(
            tpl.resolve(&data()).unwrap(),
            r"Host(`x.example.com`) && Path(`/a/{^1\.1$|^2$}/{id}`)"
        );
    }

    #[test]
    fn test_string_array() {
        let tpl = EnvTemplate::parse("Path(`/{{.Vars.c}}`)").unwrap();
        assert_eq!(tpl.resolve(&data()).unwrap(), r"Path(`/{^u\.v$|^w$}`)");
    }

    #[test]
    fn test_deterministic() {
        let tpl = EnvTemplate::parse("Path(`/{{.Vars.b}}/{{.Vars.a}}`)").unwrap();
        let first = tpl.resolve(&data()).unwrap();
        let second = tpl.resolve(&data()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_key_renders_empty() {
        let tpl = EnvTemplate::parse("Path(`/{{.Vars.nope}}/x`)").unwrap();
        assert_eq!(tpl.resolve(&EnvData::new()).unwrap(), "Path(`//x`)");
    }

    #[test]
    fn test_whitespace_collapsed() {
        let tpl = EnvTemplate::parse("Path(`/a`)\n   &&\tMethod(`GET`)").unwrap();
        assert_eq!(
            tpl.resolve(&EnvData::new()).unwrap(),
            "Path(`/a`) && Method(`GET`)"
        );
        assert_eq!(tpl.template(), "Path(`/a`)\n   &&\tMethod(`GET`)");
    }

    #[test]
    fn test_secrets_public() {
        let tpl = EnvTemplate::parse("Header(`X-Key`, `{{.Secrets.s}}`)").unwrap();
        assert_eq!(
            tpl.resolve(&data()).unwrap(),
            "Header(`X-Key`, `hunter2`)"
        );
        assert_eq!(
            tpl.resolve_public(&data()).unwrap(),
            "Header(`X-Key`, ``)"
        );
    }

    #[test]
    fn test_literals() {
        let tpl = EnvTemplate::parse(r#"{{"a"}}-{{3}}-{{true}}"#).unwrap();
        assert_eq!(tpl.resolve(&EnvData::new()).unwrap(), "a-3-true");
    }

    #[test]
    fn test_schema() {
        let tpl =
            EnvTemplate::parse("{{.Vars.a}}{{.Env.b}}{{.Secrets.c}}{{.Other.d}}{{.Vars}}")
                .unwrap();
        let schema = tpl.env_schema();
        assert_eq!(
            schema.vars.iter().collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(schema.secrets.iter().collect::<Vec<_>>(), vec!["c"]);
    }

    #[test]
    fn test_validate() {
        let tpl = EnvTemplate::parse("{{.Vars.a}}{{.Vars.z}}{{.Secrets.s}}{{.Secrets.t}}")
            .unwrap();
        let problems = tpl.env_schema().validate(&data());
        assert_eq!(
            problems,
            vec![
                Problem::MissingVar("z".to_string()),
                Problem::MissingSecret("t".to_string()),
            ]
        );
    }

    #[test]
    fn test_exec_errors() {
        let unknown = EnvTemplate::parse("{{.Other.a}}").unwrap();
        assert!(matches!(
            unknown.resolve(&data()),
            Err(TemplateError::Exec(_))
        ));
        let deep = EnvTemplate::parse("{{.Vars.a.b}}").unwrap();
        assert!(deep.resolve(&data()).is_err());
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(
            EnvTemplate::parse("Path(`/{{.Vars.a`)"),
            Err(TemplateError::Syntax { .. })
        ));
    }

    #[test]
    fn test_env_data_from_json() {
        let data: EnvData =
            serde_json::from_str(r#"{"vars": {"a": "x", "n": [1, 2]}}"#).unwrap();
        assert_eq!(data.vars["a"], Val::from("x"));
        assert_eq!(data.vars["n"], Val::from(vec![1.0, 2.0]));
        assert!(data.secrets.is_empty());
    }
}
