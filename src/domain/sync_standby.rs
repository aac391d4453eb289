//! Parser and formatter for the synchronous standby quorum setting.
//!
//! Accepted grammar (case-insensitive keywords):
//!
//! ```text
//! spec   := ""                            -- synchronous replication off
//!         | [FIRST | ANY] count "(" list ")"
//!         | list                          -- same as FIRST 1 (list)
//! list   := "*" | name ("," name)*
//! name   := identifier | "double ""quoted"" name"
//! ```
//!
//! A bare `*` list matches every standby. A `*` mixed with names is
//! rejected.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::HaError;

/// How the engine picks synchronous standbys from the member list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMethod {
    /// `FIRST n (...)`: the first `n` connected names in priority order.
    #[default]
    Priority,
    /// `ANY n (...)`: any `n` of the listed names.
    Quorum,
}

/// Parsed synchronous standby specification.
///
/// When `has_wildcard` is set, `members` is empty and ignored for matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStandbySpec {
    /// Selection method.
    pub method: SyncMethod,
    /// Number of standbys that must acknowledge; `0` when disabled.
    pub num_sync: u32,
    /// Named standbys.
    pub members: BTreeSet<String>,
    /// `true` when the list is exactly `*`.
    pub has_wildcard: bool,
}

impl SyncStandbySpec {
    /// Parses a raw setting value.
    ///
    /// # Errors
    ///
    /// Returns [`HaError::MalformedSyncSpec`] on unparsable input.
    pub fn parse(raw: &str) -> Result<Self, HaError> {
        let fail = |reason: &str| HaError::MalformedSyncSpec {
            raw: raw.to_string(),
            reason: reason.to_string(),
        };
        let tokens = tokenize(raw).map_err(|reason| fail(&reason))?;
        Parser { tokens: &tokens, pos: 0 }
            .spec()
            .map_err(|reason| fail(&reason))
    }

    /// `true` when synchronous replication is not requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.has_wildcard && self.members.is_empty()
    }

    /// `true` if `name` is covered by the wildcard or the member list.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.has_wildcard || self.members.contains(name)
    }
}

impl FromStr for SyncStandbySpec {
    type Err = HaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SyncStandbySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        let list = if self.has_wildcard {
            "*".to_string()
        } else {
            self.members
                .iter()
                .map(|m| quote_name(m))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self.method {
            SyncMethod::Priority if self.num_sync == 1 => f.write_str(&list),
            SyncMethod::Priority => write!(f, "FIRST {} ({list})", self.num_sync),
            SyncMethod::Quorum => write!(f, "ANY {} ({list})", self.num_sync),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Quoted(String),
    Number(u32),
    Star,
    Comma,
    Open,
    Close,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '$' | '-' | '.')
}

fn quote_name(name: &str) -> String {
    let plain = !name.is_empty()
        && name.chars().all(is_ident_char)
        && !name.chars().all(|c| c.is_ascii_digit());
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

fn tokenize(raw: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            ',' => tokens.push(Token::Comma),
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            '*' => tokens.push(Token::Star),
            '"' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('"') if chars.peek() == Some(&'"') => {
                            chars.next();
                            name.push('"');
                        }
                        Some('"') => break,
                        Some(other) => name.push(other),
                        None => return Err("unterminated quoted name".to_string()),
                    }
                }
                tokens.push(Token::Quoted(name));
            }
            c if is_ident_char(c) => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if !is_ident_char(next) {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                if word.chars().all(|d| d.is_ascii_digit()) {
                    let n = word
                        .parse::<u32>()
                        .map_err(|_| format!("count {word} out of range"))?;
                    tokens.push(Token::Number(n));
                } else {
                    tokens.push(Token::Ident(word));
                }
            }
            other => return Err(format!("unexpected character {other:?}")),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn spec(mut self) -> Result<SyncStandbySpec, String> {
        if self.tokens.is_empty() {
            return Ok(SyncStandbySpec::default());
        }

        let method = match (self.peek(), self.peek_at(1)) {
            (Some(Token::Ident(word)), Some(Token::Number(_))) if word.eq_ignore_ascii_case("first") => {
                Some(SyncMethod::Priority)
            }
            (Some(Token::Ident(word)), Some(Token::Number(_))) if word.eq_ignore_ascii_case("any") => {
                Some(SyncMethod::Quorum)
            }
            _ => None,
        };
        if method.is_some() {
            self.pos += 1;
        }

        let mut spec = SyncStandbySpec {
            method: method.unwrap_or_default(),
            num_sync: 1,
            ..SyncStandbySpec::default()
        };

        if let Some(&Token::Number(n)) = self.peek() {
            self.pos += 1;
            if n == 0 {
                return Err("synchronous standby count must be positive".to_string());
            }
            spec.num_sync = n;
            if self.advance() != Some(&Token::Open) {
                return Err("expected '(' after standby count".to_string());
            }
            self.list(&mut spec)?;
            if self.advance() != Some(&Token::Close) {
                return Err("expected ')' to close the standby list".to_string());
            }
        } else if method.is_some() {
            return Err("expected standby count".to_string());
        } else {
            self.list(&mut spec)?;
        }

        match self.peek() {
            None => Ok(spec),
            Some(token) => Err(format!("unexpected trailing token {token:?}")),
        }
    }

    fn list(&mut self, spec: &mut SyncStandbySpec) -> Result<(), String> {
        if self.peek() == Some(&Token::Star) {
            self.pos += 1;
            spec.has_wildcard = true;
            return match self.peek() {
                None | Some(Token::Close) => Ok(()),
                Some(_) => Err("'*' cannot be combined with standby names".to_string()),
            };
        }
        loop {
            match self.advance() {
                Some(Token::Ident(name) | Token::Quoted(name)) => {
                    spec.members.insert(name.clone());
                }
                Some(Token::Star) => {
                    return Err("'*' cannot be combined with standby names".to_string());
                }
                Some(token) => return Err(format!("expected standby name, found {token:?}")),
                None => return Err("expected standby name".to_string()),
            }
            if self.peek() == Some(&Token::Comma) {
                self.pos += 1;
            } else {
                return Ok(());
            }
        }
    }
}
