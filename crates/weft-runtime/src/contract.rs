//! Output contracts
//!
//! A task may carry a validator deciding whether an LLM output is
//! acceptable; rejections count as failed attempts for retry purposes.

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("invalid contract regex: {0}")]
    InvalidRegex(#[from] regex::Error),
}

/// Pluggable output predicate.
pub trait Validate: Send + Sync + std::fmt::Debug {
    fn validate(&self, text: &str) -> bool;
}

/// Output contract composing two optional checks; both must pass:
///
/// - a regex the whole output must match (anchored), and
/// - a set of top-level keys the output, parsed as a JSON object, must
///   contain.
///
/// A contract with neither configured accepts everything.
#[derive(Debug, Clone)]
pub struct Contract {
    name: String,
    regex: Option<Regex>,
    required: Vec<String>,
}

impl Contract {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            regex: None,
            required: Vec::new(),
        }
    }

    /// Compile `pattern` as an anchored full-match check.
    pub fn regex(name: impl Into<String>, pattern: &str) -> Result<Self, ContractError> {
        Ok(Self::new(name).with_regex(Regex::new(pattern)?))
    }

    /// Require the whole output to match `re`. The pattern is re-anchored so
    /// a partial match never passes.
    pub fn with_regex(mut self, re: Regex) -> Self {
        let anchored = Regex::new(&format!(r"\A(?:{})\z", re.as_str())).unwrap_or(re);
        self.regex = Some(anchored);
        self
    }

    /// Require the output to parse as a JSON object containing each key.
    pub fn with_required<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Validate for Contract {
    fn validate(&self, text: &str) -> bool {
        if let Some(re) = &self.regex {
            if !re.is_match(text) {
                return false;
            }
        }
        if !self.required.is_empty() {
            let Ok(serde_json::Value::Object(obj)) =
                serde_json::from_str::<serde_json::Value>(text)
            else {
                return false;
            };
            for key in &self.required {
                if !obj.contains_key(key) {
                    return false;
                }
            }
        }
        true
    }
}
