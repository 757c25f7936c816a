//! Handler text patterns
//!
//! A pattern is an optional prefix, body and suffix regex, combined into a
//! single expression and matched against a message's text.

use regex::Regex;

use crate::error::BotError;

#[derive(Debug, Clone)]
pub enum Pattern {
    /// Matches any message, capturing nothing
    Any,
    Regex(Regex),
}

impl Pattern {
    /// Build a pattern from optional prefix/body/suffix parts
    pub fn new(
        prefix: Option<&str>,
        body: Option<&str>,
        suffix: Option<&str>,
    ) -> Result<Self, BotError> {
        if prefix.is_none() && body.is_none() && suffix.is_none() {
            return Ok(Pattern::Any);
        }
        let source: String = [prefix, body, suffix]
            .iter()
            .flatten()
            .map(|part| format!("(?:{})", part))
            .collect();
        Ok(Pattern::Regex(Regex::new(&source)?))
    }

    /// Match the whole text literally
    pub fn literal(text: &str) -> Self {
        let source = format!("^{}$", regex::escape(text));
        // An escaped literal always compiles
        match Regex::new(&source) {
            Ok(regex) => Pattern::Regex(regex),
            Err(_) => Pattern::Any,
        }
    }

    /// Match a regex anywhere in the text
    pub fn regex(source: &str) -> Result<Self, BotError> {
        Self::new(None, Some(source), None)
    }

    /// Match against `text`, returning the capture groups on success.
    ///
    /// Groups that did not participate are `None`.
    pub fn captures(&self, text: &str) -> Option<Vec<Option<String>>> {
        match self {
            Pattern::Any => Some(Vec::new()),
            Pattern::Regex(regex) => regex.captures(text).map(|caps| {
                caps.iter()
                    .skip(1)
                    .map(|group| group.map(|m| m.as_str().to_string()))
                    .collect()
            }),
        }
    }
}

impl Default for Pattern {
    fn default() -> Self {
        Pattern::Any
    }
}
