//! Compiled rule predicates.
//!
//! A parsed [`Expr`] is compiled into a [`Predicate`] tree once. Evaluation
//! collects path/host captures into a scratch list; the caller copies them to
//! the event only when the whole rule matched.

use fabric_core::Event;
use fabric_core::canonical_header_key;
use fabric_core::consts::val_key;
use regex::Regex;

use crate::error::RuleError;
use crate::parser::{Expr, Parser};

/// A named capture produced while evaluating a rule.
pub type Capture = (String, String);

#[derive(Debug, Clone)]
pub enum Predicate {
    All,
    Method(Vec<String>),
    Type(String),
    Parts(PartsMatcher),
    Map(MapMatcher),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Parse and compile a resolved rule.
    pub fn compile(rule: &str) -> Result<Self, RuleError> {
        let expr = Parser::parse(rule)?;
        Self::from_expr(&expr)
    }

    fn from_expr(expr: &Expr) -> Result<Self, RuleError> {
        match expr {
            Expr::And(a, b) => Ok(Predicate::And(
                Box::new(Self::from_expr(a)?),
                Box::new(Self::from_expr(b)?),
            )),
            Expr::Or(a, b) => Ok(Predicate::Or(
                Box::new(Self::from_expr(a)?),
                Box::new(Self::from_expr(b)?),
            )),
            Expr::Not(a) => Ok(Predicate::Not(Box::new(Self::from_expr(a)?))),
            Expr::Call { name, args, .. } => Self::call(name, args),
        }
    }

    fn call(name: &str, args: &[String]) -> Result<Self, RuleError> {
        let arity = |expected: &'static str, ok: bool| {
            if ok {
                Ok(())
            } else {
                Err(RuleError::Arity {
                    function: name.to_string(),
                    expected,
                    got: args.len(),
                })
            }
        };

        match name {
            "All" => {
                arity("0", args.is_empty())?;
                Ok(Predicate::All)
            }
            "Method" => {
                arity("at least 1", !args.is_empty())?;
                Ok(Predicate::Method(args.to_vec()))
            }
            "Type" => {
                arity("1", args.len() == 1)?;
                Ok(Predicate::Type(args[0].clone()))
            }
            "Host" => {
                arity("1", args.len() == 1)?;
                PartsMatcher::new(val_key::HOST, '.', &args[0], false).map(Predicate::Parts)
            }
            "Path" => {
                arity("1", args.len() == 1)?;
                PartsMatcher::new(val_key::PATH, '/', &args[0], false).map(Predicate::Parts)
            }
            "PathPrefix" => {
                arity("1", args.len() == 1)?;
                PartsMatcher::new(val_key::PATH, '/', &args[0], true).map(Predicate::Parts)
            }
            "Query" => {
                arity("2", args.len() == 2)?;
                MapMatcher::new(val_key::QUERY, args[0].clone(), &args[1]).map(Predicate::Map)
            }
            "Header" => {
                arity("2", args.len() == 2)?;
                let key = canonical_header_key(&args[0]);
                MapMatcher::new(val_key::HEADER, key, &args[1]).map(Predicate::Map)
            }
            other => Err(RuleError::UnknownFunction(other.to_string())),
        }
    }

    /// Evaluate against `event`. Captures of sub-expressions that did not
    /// contribute to a true result are discarded from `captures`.
    pub fn eval(&self, event: &Event, captures: &mut Vec<Capture>) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Method(methods) => {
                let method = event.method();
                methods.iter().any(|m| m.eq_ignore_ascii_case(&method))
            }
            Predicate::Type(suffix) => {
                event.event_type == *suffix
                    || event
                        .event_type
                        .to_lowercase()
                        .ends_with(&suffix.to_lowercase())
            }
            Predicate::Parts(m) => m.matches(event, captures),
            Predicate::Map(m) => m.matches(event),
            Predicate::And(a, b) => {
                let mark = captures.len();
                let ok = a.eval(event, captures) && b.eval(event, captures);
                if !ok {
                    captures.truncate(mark);
                }
                ok
            }
            Predicate::Or(a, b) => {
                let mark = captures.len();
                if a.eval(event, captures) {
                    return true;
                }
                captures.truncate(mark);
                b.eval(event, captures)
            }
            Predicate::Not(a) => {
                let mark = captures.len();
                let ok = !a.eval(event, captures);
                captures.truncate(mark);
                ok
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Host / Path
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Segment {
    Literal(String),
    Param { name: String, regex: Regex },
}

#[derive(Debug, Clone)]
pub struct PartsMatcher {
    value_key: &'static str,
    sep: char,
    segments: Vec<Segment>,
    prefix: bool,
}

impl PartsMatcher {
    pub fn new(
        value_key: &'static str,
        sep: char,
        pattern: &str,
        prefix: bool,
    ) -> Result<Self, RuleError> {
        Ok(Self {
            value_key,
            sep,
            segments: split(pattern, sep)?,
            prefix,
        })
    }

    fn matches(&self, event: &Event, captures: &mut Vec<Capture>) -> bool {
        let value = event.value(self.value_key);
        let trimmed = value.trim_matches(self.sep);
        let parts: Vec<&str> = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split(self.sep).collect()
        };

        if self.segments.len() > parts.len() {
            return false;
        }
        if !self.prefix && self.segments.len() != parts.len() {
            return false;
        }

        let mut found = Vec::new();
        for (segment, part) in self.segments.iter().zip(&parts) {
            match segment {
                Segment::Literal(lit) if lit != part => return false,
                Segment::Literal(_) => {}
                Segment::Param { name, regex } => {
                    if !regex.is_match(part) {
                        return false;
                    }
                    if !name.is_empty() {
                        found.push((name.clone(), (*part).to_string()));
                    }
                }
            }
        }
        captures.extend(found);
        true
    }
}

/// Split a host or path pattern into literal and parameter segments.
///
/// `{name}` binds a segment matching `[^sep]+`, `{name:regex}` one matching
/// `regex`. A literal `{` is written `\{`.
pub fn split(pattern: &str, sep: char) -> Result<Vec<Segment>, RuleError> {
    let chars: Vec<(usize, char)> = pattern.char_indices().collect();
    let mut segments = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (start, c) = chars[i];
        if c == sep {
            i += 1;
            continue;
        }

        if c == '{' {
            let mut end = None;
            let mut prev = '{';
            i += 1;
            while i < chars.len() {
                let (pos, c) = chars[i];
                i += 1;
                if c == '}' && prev != '\\' {
                    end = Some(pos);
                    break;
                }
                prev = c;
            }
            let Some(end) = end else {
                return Err(RuleError::pattern(
                    pattern,
                    format!("unclosed bracket started at index {start}"),
                ));
            };

            let body = &pattern[start + 1..end];
            let (name, expr) = body.split_once(':').unwrap_or((body, ""));
            let default = format!("[^{}]+", regex::escape(&sep.to_string()));
            let expr = if expr.is_empty() { default.as_str() } else { expr };
            let regex = anchored(expr).map_err(|e| {
                RuleError::pattern(pattern, format!("invalid regex at index {start}: {e}"))
            })?;
            segments.push(Segment::Param {
                name: name.to_string(),
                regex,
            });
            continue;
        }

        let mut literal = String::new();
        while i < chars.len() {
            let (pos, c) = chars[i];
            if c == sep {
                break;
            }
            let escaped = i > 0 && chars[i - 1].1 == '\\';
            if c == '{' && !escaped {
                return Err(RuleError::pattern(
                    pattern,
                    format!("found mix of literal and regex in same part at index {pos}"),
                ));
            }
            let escapes_brace = c == '\\' && chars.get(i + 1).is_some_and(|&(_, n)| n == '{');
            if !escapes_brace {
                literal.push(c);
            }
            i += 1;
        }
        segments.push(Segment::Literal(literal));
    }

    Ok(segments)
}

// ---------------------------------------------------------------------------
// Query / Header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ValueMatch {
    Exact(String),
    Regex(Regex),
}

#[derive(Debug, Clone)]
pub struct MapMatcher {
    value_key: &'static str,
    key: String,
    value: ValueMatch,
}

impl MapMatcher {
    pub fn new(value_key: &'static str, key: String, pattern: &str) -> Result<Self, RuleError> {
        if key.is_empty() {
            return Err(RuleError::pattern(pattern, format!("{value_key} key must be provided")));
        }
        Ok(Self {
            value_key,
            key,
            value: extract_regex(pattern)?,
        })
    }

    fn matches(&self, event: &Event) -> bool {
        event
            .value_map_key_all(self.value_key, &self.key)
            .iter()
            .any(|v| match &self.value {
                ValueMatch::Exact(s) => v == s,
                ValueMatch::Regex(re) => re.is_match(v),
            })
    }
}

/// `{regex}` becomes an anchored regex (`{}` matches any value); anything
/// else is an exact value.
pub fn extract_regex(pattern: &str) -> Result<ValueMatch, RuleError> {
    let Some(body) = pattern
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
    else {
        return Ok(ValueMatch::Exact(pattern.to_string()));
    };
    let body = if body.is_empty() { ".*" } else { body };
    anchored(body)
        .map(ValueMatch::Regex)
        .map_err(|e| RuleError::pattern(pattern, format!("invalid regex: {e}")))
}

fn anchored(regex: &str) -> Result<Regex, regex::Error> {
    let inner = regex.strip_prefix('^').unwrap_or(regex);
    let inner = inner.strip_suffix('$').unwrap_or(inner);
    Regex::new(&format!("^{inner}$"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(method: &str, host: &str, path: &str) -> Event {
        let mut e = Event::new();
        e.set_method(method);
        e.set_host(host);
        e.set_path(path);
        e
    }

    fn eval(rule: &str, e: &Event) -> (bool, Vec<Capture>) {
        let p = Predicate::compile(rule).unwrap();
        let mut captures = Vec::new();
        let ok = p.eval(e, &mut captures);
        (ok, captures)
    }

    #[test]
    fn test_split_segments() {
        let segs = split("/a/{id}/{n:[0-9]+}", '/').unwrap();
        assert_eq!(segs.len(), 4);
        assert!(matches!(&segs[0], Segment::Literal(s) if s == "a"));
        assert!(matches!(&segs[2], Segment::Param { name, regex } if name == "id" && regex.as_str() == "^[^/]+$"));
        assert!(matches!(&segs[3], Segment::Param { name, regex } if name == "n" && regex.as_str() == "^[0-9]+$"));
    }

    #[test]
    fn test_split_errors() {
        assert!(split("/a/b{id}", '/').is_err());
        assert!(split("/a/{id", '/').is_err());
        assert!(split("/a/{id:(}", '/').is_err());
    }

    #[test]
    fn test_split_escaped_brace() {
        let segs = split(r"/a/\{b}", '/').unwrap();
        assert!(matches!(&segs[1], Segment::Literal(s) if s == "{b}"));
    }

    #[test]
    fn test_method() {
        let e = event("get", "a.com", "/");
        assert!(eval("Method(`PUT`, `GET`)", &e).0);
        assert!(!eval("Method(`POST`)", &e).0);
    }

    #[test]
    fn test_type() {
        let mut e = Event::new();
        e.event_type = "io.fabric.http".to_string();
        assert!(eval("Type(`io.fabric.http`)", &e).0);
        assert!(eval("Type(`HTTP`)", &e).0);
        assert!(!eval("Type(`grpc`)", &e).0);
    }

    #[test]
    fn test_host_params() {
        let e = event("GET", "api.example.com", "/");
        let (ok, caps) = eval("Host(`{sub}.example.com`)", &e);
        assert!(ok);
        assert_eq!(caps, vec![("sub".to_string(), "api".to_string())]);
        assert!(!eval("Host(`example.com`)", &e).0);
    }

    #[test]
    fn test_path_prefix_vs_exact() {
        let e = event("GET", "a.com", "/a/b/c");
        assert!(eval("PathPrefix(`/a`)", &e).0);
        assert!(!eval("Path(`/a`)", &e).0);
        assert!(eval("Path(`/a/b/c`)", &e).0);
    }

    #[test]
    fn test_root_path() {
        let e = event("GET", "a.com", "/");
        assert!(eval("Path(`/`)", &e).0);
        assert!(eval("PathPrefix(`/`)", &e).0);
        assert!(!eval("Path(`/a`)", &e).0);
    }

    #[test]
    fn test_header_and_query() {
        let mut e = event("GET", "a.com", "/");
        e.set_header("x-mode", "fast");
        e.set_query("q", "42");
        assert!(eval("Header(`X-Mode`, `fast`)", &e).0);
        assert!(eval("Header(`x-mode`, `{f.*}`)", &e).0);
        assert!(eval("Header(`x-mode`, `{}`)", &e).0);
        assert!(!eval("Header(`x-mode`, `{slow}`)", &e).0);
        assert!(eval("Query(`q`, `{^[0-9]+$}`)", &e).0);
        assert!(!eval("Query(`other`, `{}`)", &e).0);
        assert!(Predicate::compile("Query(``, `x`)").is_err());
    }

    #[test]
    fn test_captures_discarded_on_failure() {
        let e = event("GET", "a.com", "/items/42");
        let (ok, caps) = eval("Path(`/items/{id}`) && Method(`POST`)", &e);
        assert!(!ok);
        assert!(caps.is_empty());

        let (ok, caps) = eval("!Path(`/items/{id}`) || Method(`GET`)", &e);
        assert!(ok);
        assert!(caps.is_empty());

        let (ok, caps) = eval("(Path(`/items/{id}`) && Method(`PUT`)) || Path(`/items/{n}`)", &e);
        assert!(ok);
        assert_eq!(caps, vec![("n".to_string(), "42".to_string())]);
    }

    #[test]
    fn test_compile_errors() {
        assert!(matches!(
            Predicate::compile("Nope(`x`)"),
            Err(RuleError::UnknownFunction(_))
        ));
        assert!(matches!(
            Predicate::compile("Path(`a`, `b`)"),
            Err(RuleError::Arity { .. })
        ));
        assert!(matches!(
            Predicate::compile("All(`x`)"),
            Err(RuleError::Arity { .. })
        ));
        assert!(Predicate::compile("Method()").is_err());
    }
}
