/// Recursive-descent parser for route rules.
///
/// Precedence, loosest first: `||`, `&&`, prefix `!`. Expression trees
/// deeper than [`MAX_DEPTH`] are rejected.
use crate::error::RuleError;
use crate::lexer::{Lexer, SpannedToken, Token};

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Call {
        name: String,
        args: Vec<String>,
        pos: usize,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Deepest expression tree a rule may produce.
pub const MAX_DEPTH: usize = 256;

pub struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    depth: usize,
}

impl Parser {
    pub fn parse(input: &str) -> Result<Expr, RuleError> {
        let tokens = Lexer::new(input).tokenize()?;
        let mut parser = Self {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.parse_or()?;
        match parser.peek() {
            Token::Eof => Ok(expr),
            other => Err(RuleError::syntax(
                parser.current_pos(),
                format!("unexpected {other:?} after expression"),
            )),
        }
    }

    // -- Helpers --

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn current_pos(&self) -> usize {
        self.tokens[self.pos].pos
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos].token;
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), RuleError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(RuleError::syntax(
                self.current_pos(),
                format!("expected {expected:?}, found {:?}", self.peek()),
            ))
        }
    }

    fn enter(&mut self, pos: usize) -> Result<(), RuleError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(RuleError::syntax(pos, "expression nested too deeply"));
        }
        Ok(())
    }

    // -- Grammar --

    // Each operator in a chain deepens the left-leaning tree by one.
    fn parse_or(&mut self) -> Result<Expr, RuleError> {
        let base = self.depth;
        let mut lhs = self.parse_and()?;
        loop {
            let pos = self.current_pos();
            if !self.eat(&Token::Or) {
                break;
            }
            self.enter(pos)?;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, RuleError> {
        let base = self.depth;
        let mut lhs = self.parse_unary()?;
        loop {
            let pos = self.current_pos();
            if !self.eat(&Token::And) {
                break;
            }
            self.enter(pos)?;
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, RuleError> {
        let pos = self.current_pos();
        if self.eat(&Token::Not) {
            self.enter(pos)?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, RuleError> {
        let pos = self.current_pos();
        match self.advance().clone() {
            Token::LParen => {
                self.enter(pos)?;
                let expr = self.parse_or()?;
                self.expect(&Token::RParen)?;
                self.depth -= 1;
                Ok(expr)
            }
            Token::Ident(name) => {
                self.expect(&Token::LParen)?;
                let args = self.parse_args()?;
                Ok(Expr::Call { name, args, pos })
            }
            other => Err(RuleError::syntax(
                pos,
                format!("expected function call, found {other:?}"),
            )),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<String>, RuleError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            let pos = self.current_pos();
            match self.advance().clone() {
                Token::Str(s) => args.push(s),
                other => {
                    return Err(RuleError::syntax(
                        pos,
                        format!("arguments must be strings, found {other:?}"),
                    ));
                }
            }
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            self.expect(&Token::Comma)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[&str], pos: usize) -> Expr {
        Expr::Call {
            name: name.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            pos,
        }
    }

    #[test]
    fn test_precedence() {
        // A || B && !C  ==  A || (B && (!C))
        let expr = Parser::parse("A() || B() && !C()").unwrap();
        assert_eq!(
            expr,
            Expr::Or(
                Box::new(call("A", &[], 0)),
                Box::new(Expr::And(
                    Box::new(call("B", &[], 7)),
                    Box::new(Expr::Not(Box::new(call("C", &[], 15)))),
                )),
            )
        );
    }

    #[test]
    fn test_parens() {
        let expr = Parser::parse("(A() || B()) && C()").unwrap();
        assert!(matches!(&expr, Expr::And(lhs, _) if matches!(**lhs, Expr::Or(..))));
    }

    #[test]
    fn test_args() {
        let expr = Parser::parse("Method(`GET`, \"POST\")").unwrap();
        assert_eq!(expr, call("Method", &["GET", "POST"], 0));
    }

    #[test]
    fn test_errors() {
        assert!(Parser::parse("").is_err());
        assert!(Parser::parse("Path(`/a`").is_err());
        assert!(Parser::parse("Path(1)").is_err());
        assert!(Parser::parse("Path(`/a`) &&").is_err());
        assert!(Parser::parse("Path(`/a`) Host(`b`)").is_err());
        assert!(Parser::parse("Path").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let nots = format!("{}Path(`/`)", "!".repeat(10_000));
        assert!(matches!(
            Parser::parse(&nots),
            Err(RuleError::Syntax { pos: 256, .. })
        ));

        let parens = format!("{}Path(`/`){}", "(".repeat(10_000), ")".repeat(10_000));
        assert!(Parser::parse(&parens).is_err());

        let chain = vec!["Path(`/`)"; 10_000].join(" || ");
        assert!(Parser::parse(&chain).is_err());

        let ok = format!("{}Path(`/`){}", "(".repeat(100), ")".repeat(100));
        assert_eq!(Parser::parse(&ok).unwrap(), call("Path", &["/"], 100));

        let sibling = vec!["!(Path(`/`))"; 200].join(" && ");
        assert!(Parser::parse(&sibling).is_ok());
    }
}
