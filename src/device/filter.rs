//! Duplicate suppression for tag reports within one scan session.

use std::collections::HashSet;
use std::fmt;

/// Normalized tag identifier.
///
/// The only way to build one is [`TagId::normalize`], so the value the
/// filter compares against is always the value reported downstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagId(String);

impl TagId {
    /// Upper-cases the raw identifier; empty identifiers yield `None`
    pub fn normalize(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        Some(Self(raw.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
pub struct TagFilter {
    unique_only: bool,
    seen: HashSet<TagId>,
}

impl TagFilter {
    pub fn new(unique_only: bool) -> Self {
        Self { unique_only, seen: HashSet::new() }
    }

    /// Returns whether a report for `id` should be forwarded.
    pub fn admit(&mut self, id: &TagId) -> bool {
        if !self.unique_only {
            return true;
        }
        self.seen.insert(id.clone())
    }

    /// Starts a new scan session with the given policy
    pub fn reset(&mut self, unique_only: bool) {
        self.seen.clear();
        self.unique_only = unique_only;
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }

    pub fn unique_only(&self) -> bool {
        self.unique_only
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}
