//! libpq `key=value` connection strings.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::HaError;

/// Ordered set of connection parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnInfo {
    params: BTreeMap<String, String>,
}

impl ConnInfo {
    /// Empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Parses `key=value` pairs separated by whitespace. Values may be
    /// single-quoted with `\'` and `\\` escapes.
    ///
    /// # Errors
    ///
    /// Returns [`HaError::Config`] for a key without `=` or an unterminated
    /// quote.
    pub fn parse(raw: &str) -> Result<Self, HaError> {
        let mut params = BTreeMap::new();
        let mut chars = raw.chars().peekable();

        loop {
            while chars.next_if(|c| c.is_whitespace()).is_some() {}
            if chars.peek().is_none() {
                break;
            }

            let mut key = String::new();
            while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
                key.push(c);
            }
            while chars.next_if(|c| c.is_whitespace()).is_some() {}
            if chars.next() != Some('=') {
                return Err(HaError::Config(format!("conninfo: missing '=' after {key:?}")));
            }
            while chars.next_if(|c| c.is_whitespace()).is_some() {}

            let mut value = String::new();
            if chars.next_if_eq(&'\'').is_some() {
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => value.push(escaped),
                            None => {
                                return Err(HaError::Config("conninfo: dangling escape".to_string()));
                            }
                        },
                        Some(c) => value.push(c),
                        None => {
                            return Err(HaError::Config(format!(
                                "conninfo: unterminated quote for {key:?}"
                            )));
                        }
                    }
                }
            } else {
                while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                    value.push(c);
                }
            }
            params.insert(key, value);
        }

        Ok(Self { params })
    }
}

fn needs_quoting(value: &str) -> bool {
    value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '\'' || c == '\\')
}

impl fmt::Display for ConnInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            if needs_quoting(value) {
                let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
                write!(f, "{key}='{escaped}'")?;
            } else {
                write!(f, "{key}={value}")?;
            }
        }
        Ok(())
    }
}
