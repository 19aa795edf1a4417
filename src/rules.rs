//! Ordered first-match-wins rule cascades over free text.

use regex::{Regex, RegexBuilder};

use crate::error::Result;

/// Case-insensitive regex.
pub fn ci_regex(pattern: &str) -> Result<Regex> {
    Ok(RegexBuilder::new(pattern).case_insensitive(true).build()?)
}

#[derive(Debug, Clone)]
pub struct Rule<L> {
    pub label: L,
    pattern: Regex,
    not_preceded_by: Option<String>,
}

impl<L> Rule<L> {
    pub fn new(label: L, pattern: &str) -> Result<Self> {
        Ok(Rule { label, pattern: ci_regex(pattern)?, not_preceded_by: None })
    }

    /// Reject matches directly preceded by `prefix` (case-insensitive).
    ///
    /// Stands in for a negative lookbehind, which the `regex` crate lacks.
    pub fn not_preceded_by(mut self, prefix: &str) -> Self {
        self.not_preceded_by = Some(prefix.to_lowercase());
        self
    }

    pub fn matches(&self, text: &str) -> bool {
        match &self.not_preceded_by {
            None => self.pattern.is_match(text),
            Some(prefix) => self
                .pattern
                .find_iter(text)
                .any(|m| !text[..m.start()].to_lowercase().ends_with(prefix.as_str())),
        }
    }
}

/// Rules evaluated in order; the first matching rule's label wins.
#[derive(Debug, Clone)]
pub struct RuleSet<L> {
    rules: Vec<Rule<L>>,
    default: L,
}

impl<L: Clone> RuleSet<L> {
    pub fn new(rules: Vec<Rule<L>>, default: L) -> Self {
        RuleSet { rules, default }
    }

    pub fn classify(&self, text: &str) -> L {
        self.rules
            .iter()
            .find(|r| r.matches(text))
            .map(|r| r.label.clone())
            .unwrap_or_else(|| self.default.clone())
    }
}
