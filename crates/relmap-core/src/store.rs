//! Store trait and explicit query context.
//!
//! The store is the only suspension point in the system: every other
//! operation (alias allocation, graph walking, merging) is synchronous.
//! All calls take a `Cx` context and return an `Outcome` so cancellation
//! propagates through asupersync's structured concurrency.

use std::future::Future;

use asupersync::{Cx, Outcome};

use crate::error::Error;
use crate::row::Row;
use crate::value::Value;

/// A backing data store capable of executing parameterized SQL.
///
/// Implementations must be `Send + Sync` for use across async boundaries.
pub trait Store: Send + Sync {
    /// Execute a query and return all rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Execute a query and return the first row, if any.
    fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send;

    /// Execute a statement (UPDATE, DELETE) and return rows affected.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Execute an INSERT and return the last inserted key.
    fn insert(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send;
}

/// Caller-scoped query options, captured as an immutable snapshot.
///
/// This replaces ambient scoping state: whatever conditions or limits are
/// in effect travel in this value, passed explicitly into scope and query
/// construction. The core never mutates a context nor retains one past the
/// call that consumed it.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    conditions: Option<String>,
    order_by: Option<String>,
    limit: Option<u64>,
}

impl QueryContext {
    /// An empty context: no extra conditions, ordering, or limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// AND an extra raw predicate into queries built under this context.
    #[must_use]
    pub fn conditions(mut self, sql: impl Into<String>) -> Self {
        self.conditions = Some(sql.into());
        self
    }

    /// Apply an ordering to queries built under this context.
    #[must_use]
    pub fn order_by(mut self, ordering: impl Into<String>) -> Self {
        self.order_by = Some(ordering.into());
        self
    }

    /// Cap the number of rows fetched.
    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// The extra predicate, if any.
    #[must_use]
    pub fn conditions_sql(&self) -> Option<&str> {
        self.conditions.as_deref()
    }

    /// The ordering, if any.
    #[must_use]
    pub fn order_sql(&self) -> Option<&str> {
        self.order_by.as_deref()
    }

    /// The row cap, if any.
    #[must_use]
    pub fn row_limit(&self) -> Option<u64> {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_builder_accumulates_options() {
        let ctx = QueryContext::new()
            .conditions("published = true")
            .order_by("created_at DESC")
            .limit(10);
        assert_eq!(ctx.conditions_sql(), Some("published = true"));
        assert_eq!(ctx.order_sql(), Some("created_at DESC"));
        assert_eq!(ctx.row_limit(), Some(10));
    }

    #[test]
    fn default_context_is_empty() {
        let ctx = QueryContext::new();
        assert!(ctx.conditions_sql().is_none());
        assert!(ctx.order_sql().is_none());
        assert!(ctx.row_limit().is_none());
    }
}
