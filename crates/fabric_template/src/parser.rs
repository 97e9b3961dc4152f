//! Parser for environment templates.
//!
//! Produces a flat list of [`Node`]s. Trim markers are applied while
//! parsing, so the resulting text nodes are already trimmed.

use crate::error::TemplateError;
use crate::lexer::{Lexer, SpannedToken, Token};

/// A value inside an action.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A field chain, e.g. `["Vars", "name"]`.
    Field(Vec<String>),
    /// The data root `.`.
    Dot,
    Str(String),
    Number(f64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Action { operand: Operand, pos: usize },
}

pub struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    nodes: Vec<Node>,
    trim_next: bool,
}

impl Parser {
    /// Parse a template into nodes.
    pub fn parse(input: &str) -> Result<Vec<Node>, TemplateError> {
        let tokens = Lexer::new(input).tokenize()?;
        let mut parser = Self {
            tokens,
            pos: 0,
            nodes: Vec::new(),
            trim_next: false,
        };
        parser.parse_nodes()?;
        Ok(parser.nodes)
    }

    fn next(&mut self) -> SpannedToken {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn parse_nodes(&mut self) -> Result<(), TemplateError> {
        loop {
            let tok = self.next();
            match tok.token {
                Token::Eof => return Ok(()),
                Token::Text(text) => self.push_text(text),
                Token::Comment {
                    left_trim,
                    right_trim,
                } => {
                    if left_trim {
                        self.trim_last_text();
                    }
                    self.trim_next = right_trim;
                }
                Token::Open { trim } => {
                    if trim {
                        self.trim_last_text();
                    }
                    self.parse_action(tok.pos)?;
                }
                other => {
                    return Err(TemplateError::syntax(
                        tok.pos,
                        format!("unexpected {other} outside action"),
                    ));
                }
            }
        }
    }

    fn parse_action(&mut self, open_pos: usize) -> Result<(), TemplateError> {
        let tok = self.next();
        let operand = match tok.token {
            Token::Field(parts) => Operand::Field(parts),
            Token::Dot => Operand::Dot,
            Token::Str(s) => Operand::Str(s),
            Token::Number(n) => Operand::Number(n),
            Token::Bool(b) => Operand::Bool(b),
            Token::Ident(name) => {
                return Err(TemplateError::syntax(
                    tok.pos,
                    format!("function {name:?} not defined"),
                ));
            }
            Token::Close { .. } => {
                return Err(TemplateError::syntax(open_pos, "missing value for action"));
            }
            other => {
                return Err(TemplateError::syntax(
                    tok.pos,
                    format!("unexpected {other} in action"),
                ));
            }
        };

        let close = self.next();
        match close.token {
            Token::Close { trim } => {
                self.nodes.push(Node::Action {
                    operand,
                    pos: open_pos,
                });
                self.trim_next = trim;
                Ok(())
            }
            other => Err(TemplateError::syntax(
                close.pos,
                format!("unexpected {other} in operand"),
            )),
        }
    }

    fn push_text(&mut self, text: String) {
        let text = if std::mem::take(&mut self.trim_next) {
            text.trim_start().to_string()
        } else {
            text
        };
        if !text.is_empty() {
            self.nodes.push(Node::Text(text));
        }
    }

    fn trim_last_text(&mut self) {
        if let Some(Node::Text(text)) = self.nodes.last_mut() {
            let trimmed = text.trim_end().len();
            text.truncate(trimmed);
            if text.is_empty() {
                self.nodes.pop();
            }
        }
    }
}
