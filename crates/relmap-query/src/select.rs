//! SELECT query builder.
//!
//! A dynamic builder: join targets are only known at graph-build time, so
//! the table name is a value rather than a type parameter.

use relmap_core::Value;

use crate::clause::{Limit, OrderBy, Where};
use crate::expr::{Dialect, Expr};
use crate::join::Join;

/// A SELECT query under construction.
#[derive(Debug, Clone)]
pub struct Select {
    /// Base table
    table: String,
    /// Alias for the base table, when it differs from the bare name
    table_alias: Option<String>,
    /// Columns to select (empty = all)
    columns: Vec<String>,
    /// JOIN clauses
    joins: Vec<Join>,
    /// WHERE clause conditions
    where_clause: Option<Where>,
    /// ORDER BY clauses
    order_by: Vec<OrderBy>,
    /// LIMIT clause
    limit: Option<Limit>,
    /// DISTINCT flag
    distinct: bool,
}

impl Select {
    /// Create a new SELECT query for a table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            table_alias: None,
            columns: Vec::new(),
            joins: Vec::new(),
            where_clause: None,
            order_by: Vec::new(),
            limit: None,
            distinct: false,
        }
    }

    /// Alias the base table.
    pub fn table_alias(mut self, alias: impl Into<String>) -> Self {
        self.table_alias = Some(alias.into());
        self
    }

    /// Select specific columns.
    pub fn columns(mut self, cols: Vec<String>) -> Self {
        self.columns = cols;
        self
    }

    /// Append one column expression.
    pub fn column(mut self, col: impl Into<String>) -> Self {
        self.columns.push(col.into());
        self
    }

    /// Add a WHERE condition (ANDed onto any existing one).
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(existing) => existing.and(expr),
            None => Where::new(expr),
        });
        self
    }

    /// Add a JOIN clause.
    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// Add ORDER BY clause.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set LIMIT.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(Limit(n));
        self
    }

    /// Make this a DISTINCT query.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// The name other clauses refer to the base table by.
    pub fn table_reference(&self) -> &str {
        self.table_alias.as_deref().unwrap_or(&self.table)
    }

    /// Build the SQL query and parameters (default PostgreSQL dialect).
    pub fn build(&self) -> (String, Vec<Value>) {
        self.build_with_dialect(Dialect::Postgres)
    }

    /// Build the SQL query and parameters with a specific dialect.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut params = Vec::new();

        sql.push_str("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }

        if self.columns.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&self.columns.join(", "));
        }

        sql.push_str(" FROM ");
        sql.push_str(&self.table);
        if let Some(alias) = &self.table_alias {
            sql.push_str(" AS ");
            sql.push_str(alias);
        }

        for join in &self.joins {
            sql.push_str(&join.build_with_dialect(dialect, &mut params, 0));
        }

        if let Some(where_clause) = &self.where_clause {
            let (where_sql, where_params) =
                where_clause.build_with_dialect(dialect, params.len());
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
            params.extend(where_params);
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            let order_strs: Vec<_> = self.order_by.iter().map(OrderBy::to_sql).collect();
            sql.push_str(&order_strs.join(", "));
        }

        if let Some(Limit(n)) = self.limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }

        (sql, params)
    }
}
