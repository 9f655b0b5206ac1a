//! SQL clause types (WHERE, ORDER BY, LIMIT).

use relmap_core::Value;

use crate::expr::{Dialect, Expr};

/// WHERE clause.
#[derive(Debug, Clone)]
pub struct Where {
    expr: Expr,
}

impl Where {
    /// Create a new WHERE clause with the given expression.
    pub fn new(expr: Expr) -> Self {
        Self { expr }
    }

    /// Add an AND condition.
    pub fn and(self, expr: Expr) -> Self {
        Self {
            expr: self.expr.and(expr),
        }
    }

    /// Add an OR condition.
    pub fn or(self, expr: Expr) -> Self {
        Self {
            expr: self.expr.or(expr),
        }
    }

    /// Build the WHERE clause with a dialect and parameter offset.
    pub fn build_with_dialect(&self, dialect: Dialect, offset: usize) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = self.expr.build_with_dialect(dialect, &mut params, offset);
        (sql, params)
    }
}

/// ORDER BY clause.
#[derive(Debug, Clone)]
pub enum OrderBy {
    /// Directional ordering on a column.
    Column {
        column: String,
        direction: OrderDirection,
    },
    /// Raw ordering fragment (reflection-declared `order_by` strings).
    Raw(String),
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderBy {
    /// Create an ascending order by clause.
    pub fn asc(column: impl Into<String>) -> Self {
        OrderBy::Column {
            column: column.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Create a descending order by clause.
    pub fn desc(column: impl Into<String>) -> Self {
        OrderBy::Column {
            column: column.into(),
            direction: OrderDirection::Desc,
        }
    }

    /// Create a raw ordering fragment.
    pub fn raw(fragment: impl Into<String>) -> Self {
        OrderBy::Raw(fragment.into())
    }

    /// Generate SQL for this ORDER BY clause.
    pub fn to_sql(&self) -> String {
        match self {
            OrderBy::Column { column, direction } => {
                let dir = match direction {
                    OrderDirection::Asc => " ASC",
                    OrderDirection::Desc => " DESC",
                };
                format!("{column}{dir}")
            }
            OrderBy::Raw(fragment) => fragment.clone(),
        }
    }
}

/// LIMIT clause.
#[derive(Debug, Clone, Copy)]
pub struct Limit(pub u64);
