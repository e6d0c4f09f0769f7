use std::collections::HashMap;

use crate::error::SyncError;

const SEPARATOR: &str = "===";

/// Author rename rules, one `original === replacement` pair per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameRules {
    rules: HashMap<String, String>,
}

impl NameRules {
    /// Parses the rules text, failing on the first malformed line.
    pub fn parse(text: &str) -> Result<Self, SyncError> {
        Self::parse_with(text, true)
    }

    /// With `strict` unset, malformed lines are logged and skipped instead.
    pub fn parse_with(text: &str, strict: bool) -> Result<Self, SyncError> {
        let mut rules = HashMap::new();

        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            match split_rule(line) {
                Some((original, replacement)) => {
                    rules.insert(original.to_string(), replacement.to_string());
                }
                None if strict => {
                    return Err(SyncError::ConfigFormat(format!(
                        "name rule on line {} must look like 'original {} replacement': {:?}",
                        idx + 1,
                        SEPARATOR,
                        line.trim()
                    )));
                }
                None => {
                    tracing::warn!(line = idx + 1, rule = line.trim(), "skipping malformed name rule");
                }
            }
        }

        Ok(Self { rules })
    }

    pub fn apply<'a>(&'a self, author: &'a str) -> &'a str {
        self.rules.get(author).map(String::as_str).unwrap_or(author)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn split_rule(line: &str) -> Option<(&str, &str)> {
    let mut parts = line.split(SEPARATOR);
    let original = parts.next()?.trim();
    let replacement = parts.next()?.trim();
    if parts.next().is_some() || original.is_empty() {
        return None;
    }
    Some((original, replacement))
}
