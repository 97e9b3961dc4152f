/// Lexer for the rule language, e.g. ``Host(`a.com`) && !Path("/x")``.
use crate::error::RuleError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Str(String),
    /// A bare numeric literal. Accepted by the lexer so the parser can
    /// report it as a non-string argument.
    Number(String),
    And,
    Or,
    Not,
    LParen,
    RParen,
    Comma,
    Eof,
}

#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub pos: usize,
}

pub struct Lexer<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<SpannedToken>, RuleError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let Some(&(pos, c)) = self.chars.peek() else {
                tokens.push(SpannedToken {
                    token: Token::Eof,
                    pos: self.input.len(),
                });
                return Ok(tokens);
            };

            let token = match c {
                '(' => self.single(Token::LParen),
                ')' => self.single(Token::RParen),
                ',' => self.single(Token::Comma),
                '!' => self.single(Token::Not),
                '&' => self.double('&', Token::And, pos)?,
                '|' => self.double('|', Token::Or, pos)?,
                '`' => self.raw_string(pos)?,
                '"' => self.quoted_string(pos)?,
                c if c.is_ascii_digit() => {
                    Token::Number(self.take_while(pos, |c| c.is_ascii_digit() || c == '.'))
                }
                c if c.is_alphabetic() || c == '_' => {
                    Token::Ident(self.take_while(pos, |c| c.is_alphanumeric() || c == '_'))
                }
                other => {
                    return Err(RuleError::syntax(pos, format!("unexpected character {other:?}")));
                }
            };
            tokens.push(SpannedToken { token, pos });
        }
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    fn single(&mut self, token: Token) -> Token {
        self.chars.next();
        token
    }

    fn double(&mut self, expected: char, token: Token, pos: usize) -> Result<Token, RuleError> {
        self.chars.next();
        match self.chars.next() {
            Some((_, c)) if c == expected => Ok(token),
            _ => Err(RuleError::syntax(
                pos,
                format!("expected \"{expected}{expected}\""),
            )),
        }
    }

    fn take_while(&mut self, start: usize, pred: impl Fn(char) -> bool) -> String {
        let mut end = start;
        while let Some((i, c)) = self.chars.next_if(|&(_, c)| pred(c)) {
            end = i + c.len_utf8();
        }
        self.input[start..end].to_string()
    }

    fn raw_string(&mut self, pos: usize) -> Result<Token, RuleError> {
        self.chars.next();
        let start = pos + 1;
        for (i, c) in self.chars.by_ref() {
            if c == '`' {
                return Ok(Token::Str(self.input[start..i].to_string()));
            }
        }
        Err(RuleError::syntax(pos, "unterminated raw string"))
    }

    fn quoted_string(&mut self, pos: usize) -> Result<Token, RuleError> {
        self.chars.next();
        let mut out = String::new();
        while let Some((i, c)) = self.chars.next() {
            match c {
                '"' => return Ok(Token::Str(out)),
                '\\' => {
                    let Some((_, esc)) = self.chars.next() else {
                        break;
                    };
                    out.push(match esc {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '\\' => '\\',
                        '"' => '"',
                        other => {
                            return Err(RuleError::syntax(
                                i,
                                format!("unknown escape sequence \\{other}"),
                            ));
                        }
                    });
                }
                c => out.push(c),
            }
        }
        Err(RuleError::syntax(pos, "unterminated string"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            tokens("!A() && B() || C()"),
            vec![
                Token::Not,
                Token::Ident("A".to_string()),
                Token::LParen,
                Token::RParen,
                Token::And,
                Token::Ident("B".to_string()),
                Token::LParen,
                Token::RParen,
                Token::Or,
                Token::Ident("C".to_string()),
                Token::LParen,
                Token::RParen,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            tokens(r#"Path(`/a/\{b}`, "x\"y")"#),
            vec![
                Token::Ident("Path".to_string()),
                Token::LParen,
                Token::Str(r"/a/\{b}".to_string()),
                Token::Comma,
                Token::Str("x\"y".to_string()),
                Token::RParen,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_single_ampersand_rejected() {
        assert!(Lexer::new("A() & B()").tokenize().is_err());
    }

    #[test]
    fn test_unterminated() {
        assert!(Lexer::new("Path(`/a").tokenize().is_err());
        assert!(Lexer::new("Path(\"/a").tokenize().is_err());
    }
}
