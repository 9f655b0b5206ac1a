//! Table alias allocation.
//!
//! One `AliasTracker` lives for exactly one query-construction session and
//! hands out unique table aliases: the first request for a table gets the
//! bare name (no `AS` clause needed), later requests get a counter suffix.
//! Aliases never exceed the dialect's identifier length limit; truncation
//! happens before the suffix is appended and the truncated form is itself
//! tracked, so truncation collisions disambiguate too.

use std::collections::HashMap;

use crate::expr::Dialect;
use crate::join::Join;

/// Allocates unique table aliases within one query-construction session.
#[derive(Debug, Clone)]
pub struct AliasTracker {
    dialect: Dialect,
    /// Base name -> times requested.
    counts: HashMap<String, usize>,
}

impl AliasTracker {
    /// Create a tracker with no prior joins.
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            counts: HashMap::new(),
        }
    }

    /// Create a tracker seeded from joins the caller already built, so
    /// fresh aliases never collide with them.
    #[must_use]
    pub fn with_joins(dialect: Dialect, joins: &[Join]) -> Self {
        let mut tracker = Self::new(dialect);
        for join in joins {
            tracker.bump(&join.table);
            if let Some(alias) = &join.alias {
                tracker.bump(alias);
            }
        }
        tracker
    }

    /// Allocate an alias for a table.
    ///
    /// The first request returns the bare table name. Later requests return
    /// `preferred` (or the table name when no preference is given) suffixed
    /// with the running count: `name_2`, `name_3`, …
    pub fn aliased_name(&mut self, table_name: &str, preferred: Option<&str>) -> String {
        let count = self.bump(table_name);
        if count == 1 {
            return table_name.to_string();
        }

        let base = preferred.unwrap_or(table_name);
        let mut candidate = self.truncated(base, count);
        loop {
            let seen = self.bump(&candidate);
            if seen == 1 {
                return candidate;
            }
            candidate = self.truncated(&candidate, seen);
        }
    }

    /// How many times a name has been requested so far.
    #[must_use]
    pub fn count(&self, table_name: &str) -> usize {
        self.counts.get(table_name).copied().unwrap_or(0)
    }

    fn bump(&mut self, name: &str) -> usize {
        let entry = self.counts.entry(name.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Append the counter suffix, truncating the base first when the result
    /// would exceed the dialect's identifier limit.
    fn truncated(&self, base: &str, count: usize) -> String {
        let suffix = format!("_{count}");
        let max = self.dialect.max_identifier_length();
        let keep = max.saturating_sub(suffix.len());
        if base.chars().count() <= keep {
            format!("{base}{suffix}")
        } else {
            let head: String = base.chars().take(keep).collect();
            format!("{head}{suffix}")
        }
    }
}
