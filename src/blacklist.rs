use std::fs;
use std::path::Path;

use crate::config::ConfigError;

/// Hostname substrings that are never redirected to the audit tool.
///
/// Matching is exact-string: an entry matches when it occurs anywhere inside
/// the hostname, with no case folding and no trailing-dot handling.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    entries: Vec<String>,
}

impl Blacklist {
    /// Create an empty blacklist (nothing is excluded)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a blacklist from raw lines.
    ///
    /// Lines are trimmed. Blank lines and `#` comments are skipped, since an
    /// empty entry would be a substring of every hostname.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = lines
            .into_iter()
            .map(|line| line.as_ref().trim().to_string())
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect();
        Self { entries }
    }

    /// Load a blacklist file: UTF-8 text, one hostname substring per line
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Blacklist {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_lines(content.lines()))
    }

    /// Check whether any entry is a substring of `hostname`
    pub fn matches(&self, hostname: &str) -> bool {
        self.entries.iter().any(|entry| hostname.contains(entry.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
