use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::domain::Change;
use crate::error::ConfigError;

/// One exclusion rule as written in the repository configuration.
///
/// Fields holding rules deserialize through
/// `serde_yaml::with::singleton_map_recursive`, so a rule reads as a
/// single-key map (`exclude_author: bot`) or a bare tag (`exclude_merges`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterRule {
    /// Drop changes by this author (case-insensitive).
    ExcludeAuthor(String),
    /// Drop changes whose message matches this regex.
    ExcludeMessage(String),
    /// Drop merge commits.
    ExcludeMerges,
}

#[derive(Debug, Clone)]
enum CompiledRule {
    Author(String),
    Message(Regex),
    Merges,
}

impl CompiledRule {
    fn excludes(&self, change: &Change) -> bool {
        match self {
            CompiledRule::Author(author) => change.author.eq_ignore_ascii_case(author),
            CompiledRule::Message(pattern) => pattern.is_match(&change.message),
            CompiledRule::Merges => change.message.starts_with("Merge "),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            CompiledRule::Author(_) => "exclude_author",
            CompiledRule::Message(_) => "exclude_message",
            CompiledRule::Merges => "exclude_merges",
        }
    }
}

/// Ordered exclusion rules. An empty chain lets every change through.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    rules: Vec<CompiledRule>,
}

impl FilterChain {
    pub fn new(rules: &[FilterRule]) -> Result<Self, ConfigError> {
        let rules = rules
            .iter()
            .map(|rule| match rule {
                FilterRule::ExcludeAuthor(author) => Ok(CompiledRule::Author(author.clone())),
                FilterRule::ExcludeMessage(pattern) => Regex::new(pattern)
                    .map(CompiledRule::Message)
                    .map_err(|source| ConfigError::InvalidFilter {
                        pattern: pattern.clone(),
                        source,
                    }),
                FilterRule::ExcludeMerges => Ok(CompiledRule::Merges),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns the change untouched, or `None` as soon as one rule excludes it.
    pub fn apply(&self, change: Change) -> Option<Change> {
        match self.rules.iter().find(|rule| rule.excludes(&change)) {
            Some(rule) => {
                trace!(rule = rule.name(), id = %change.id, "change filtered out");
                None
            }
            None => Some(change),
        }
    }
}
