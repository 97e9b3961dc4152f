//! Lexer for environment templates.
//!
//! A template is literal text interleaved with `{{ … }}` actions. Outside an
//! action everything is text; inside, the lexer produces field references,
//! literals and identifiers. `{{-` and `-}}` (with a space on the inner side)
//! trim adjacent whitespace, and `{{/* … */}}` is a comment.

use std::fmt;

use crate::error::TemplateError;

pub const LEFT_DELIM: &str = "{{";
pub const RIGHT_DELIM: &str = "}}";

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Literal text outside any action.
    Text(String),
    /// `{{`, optionally with a trim marker.
    Open { trim: bool },
    /// `}}`, optionally with a trim marker.
    Close { trim: bool },
    /// A whole `{{/* … */}}` comment with its trim markers.
    Comment { left_trim: bool, right_trim: bool },
    /// A field chain such as `.Vars.name`.
    Field(Vec<String>),
    /// The bare cursor `.`.
    Dot,
    Ident(String),
    Str(String),
    Number(f64),
    Bool(bool),
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Text(s) => write!(f, "text {s:?}"),
            Token::Open { .. } => write!(f, "{LEFT_DELIM}"),
            Token::Close { .. } => write!(f, "{RIGHT_DELIM}"),
            Token::Comment { .. } => write!(f, "comment"),
            Token::Field(parts) => write!(f, ".{}", parts.join(".")),
            Token::Dot => write!(f, "."),
            Token::Ident(s) => write!(f, "{s}"),
            Token::Str(s) => write!(f, "{s:?}"),
            Token::Number(n) => write!(f, "{n}"),
            Token::Bool(b) => write!(f, "{b}"),
            Token::Eof => write!(f, "EOF"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    /// Byte offset into the (whitespace-collapsed) template.
    pub pos: usize,
}

pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    pub fn tokenize(&mut self) -> Result<Vec<SpannedToken>, TemplateError> {
        let mut tokens = Vec::new();
        while self.pos < self.input.len() {
            self.lex_text(&mut tokens);
            if self.pos < self.input.len() {
                self.lex_action(&mut tokens)?;
            }
        }
        tokens.push(SpannedToken {
            token: Token::Eof,
            pos: self.pos,
        });
        Ok(tokens)
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn lex_text(&mut self, tokens: &mut Vec<SpannedToken>) {
        let start = self.pos;
        let end = self
            .rest()
            .find(LEFT_DELIM)
            .map_or(self.input.len(), |i| start + i);
        if end > start {
            tokens.push(SpannedToken {
                token: Token::Text(self.input[start..end].to_string()),
                pos: start,
            });
        }
        self.pos = end;
    }

    fn lex_action(&mut self, tokens: &mut Vec<SpannedToken>) -> Result<(), TemplateError> {
        let open_pos = self.pos;
        self.pos += LEFT_DELIM.len();
        let trim = self.rest().starts_with("- ");
        if trim {
            self.pos += 1;
        }

        let after_space = self.rest().trim_start_matches(' ');
        if after_space.starts_with("/*") {
            return self.lex_comment(tokens, open_pos, trim);
        }

        tokens.push(SpannedToken {
            token: Token::Open { trim },
            pos: open_pos,
        });

        loop {
            self.skip_spaces();
            let pos = self.pos;

            if self.rest().starts_with("-}}") && self.input[..self.pos].ends_with(' ') {
                self.pos += 1 + RIGHT_DELIM.len();
                tokens.push(SpannedToken {
                    token: Token::Close { trim: true },
                    pos,
                });
                return Ok(());
            }
            if self.rest().starts_with(RIGHT_DELIM) {
                self.pos += RIGHT_DELIM.len();
                tokens.push(SpannedToken {
                    token: Token::Close { trim: false },
                    pos,
                });
                return Ok(());
            }

            let Some(c) = self.peek() else {
                return Err(TemplateError::syntax(open_pos, "unclosed action"));
            };

            let token = match c {
                '.' => self.lex_field(),
                '"' => self.lex_quoted()?,
                '`' => self.lex_raw()?,
                c if c.is_ascii_digit() || c == '-' => self.lex_number()?,
                c if is_ident_char(c) => {
                    let word = self.take_while(is_ident_char);
                    match word {
                        "true" => Token::Bool(true),
                        "false" => Token::Bool(false),
                        other => Token::Ident(other.to_string()),
                    }
                }
                other => {
                    return Err(TemplateError::syntax(
                        pos,
                        format!("unexpected {other:?} in action"),
                    ));
                }
            };
            tokens.push(SpannedToken { token, pos });
        }
    }

    fn lex_comment(
        &mut self,
        tokens: &mut Vec<SpannedToken>,
        open_pos: usize,
        left_trim: bool,
    ) -> Result<(), TemplateError> {
        let Some(end) = self.rest().find("*/") else {
            return Err(TemplateError::syntax(open_pos, "unclosed comment"));
        };
        self.pos += end + 2;
        self.skip_spaces();

        let right_trim = self.rest().starts_with("-}}");
        if right_trim {
            self.pos += 1;
        }
        if !self.rest().starts_with(RIGHT_DELIM) {
            return Err(TemplateError::syntax(self.pos, "comment ends before closing delimiter"));
        }
        self.pos += RIGHT_DELIM.len();

        tokens.push(SpannedToken {
            token: Token::Comment {
                left_trim,
                right_trim,
            },
            pos: open_pos,
        });
        Ok(())
    }

    fn skip_spaces(&mut self) {
        self.take_while(|c| c == ' ');
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        let len = self
            .rest()
            .char_indices()
            .find(|&(_, c)| !pred(c))
            .map_or(self.rest().len(), |(i, _)| i);
        self.pos += len;
        &self.input[start..self.pos]
    }

    fn lex_field(&mut self) -> Token {
        let mut parts = Vec::new();
        while self.peek() == Some('.') {
            self.pos += 1;
            let ident = self.take_while(is_ident_char);
            if ident.is_empty() {
                break;
            }
            parts.push(ident.to_string());
        }
        if parts.is_empty() {
            Token::Dot
        } else {
            Token::Field(parts)
        }
    }

    fn lex_quoted(&mut self) -> Result<Token, TemplateError> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(TemplateError::syntax(start, "unterminated quoted string"));
            };
            self.pos += c.len_utf8();
            match c {
                '"' => return Ok(Token::Str(out)),
                '\\' => {
                    let Some(esc) = self.peek() else {
                        return Err(TemplateError::syntax(start, "unterminated quoted string"));
                    };
                    self.pos += esc.len_utf8();
                    out.push(match esc {
                        'n' => '\n',
                        't' => '\t',
                        '\\' => '\\',
                        '"' => '"',
                        other => {
                            return Err(TemplateError::syntax(
                                self.pos,
                                format!("unknown escape sequence \\{other}"),
                            ));
                        }
                    });
                }
                c => out.push(c),
            }
        }
    }

    fn lex_raw(&mut self) -> Result<Token, TemplateError> {
        let start = self.pos;
        self.pos += 1;
        let Some(end) = self.rest().find('`') else {
            return Err(TemplateError::syntax(start, "unterminated raw string"));
        };
        let s = self.rest()[..end].to_string();
        self.pos += end + 1;
        Ok(Token::Str(s))
    }

    fn lex_number(&mut self) -> Result<Token, TemplateError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        let digits = self.take_while(|c| c.is_ascii_digit() || c == '.');
        if digits.is_empty() {
            return Err(TemplateError::syntax(start, "unexpected \"-\" in action"));
        }
        let literal = &self.input[start..self.pos];
        literal
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| TemplateError::syntax(start, format!("bad number syntax: {literal:?}")))
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
