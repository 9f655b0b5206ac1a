//! JOIN clause types and the shared hop-predicate builder.

use relmap_core::{Error, MacroKind, Reflection, Result, Value};

use crate::expr::{Dialect, Expr};

/// Types of SQL joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    /// Get the SQL keyword for this join type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

/// A JOIN clause.
#[derive(Debug, Clone)]
pub struct Join {
    /// Type of join
    pub join_type: JoinType,
    /// Table to join
    pub table: String,
    /// Optional table alias
    pub alias: Option<String>,
    /// ON condition
    pub on: Expr,
}

impl Join {
    /// Create an INNER JOIN.
    pub fn inner(table: impl Into<String>, on: Expr) -> Self {
        Self {
            join_type: JoinType::Inner,
            table: table.into(),
            alias: None,
            on,
        }
    }

    /// Create a LEFT JOIN.
    pub fn left(table: impl Into<String>, on: Expr) -> Self {
        Self {
            join_type: JoinType::Left,
            table: table.into(),
            alias: None,
            on,
        }
    }

    /// Set an alias for the joined table.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Set the alias only when it differs from the table name (the bare
    /// first use of a table needs no `AS` clause).
    pub fn alias_unless_bare(mut self, alias: &str) -> Self {
        if alias != self.table {
            self.alias = Some(alias.to_string());
        }
        self
    }

    /// The name other clauses refer to this join's table by.
    pub fn table_reference(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    /// Generate SQL and collect parameters with a specific dialect.
    pub fn build_with_dialect(
        &self,
        dialect: Dialect,
        params: &mut Vec<Value>,
        offset: usize,
    ) -> String {
        let mut sql = format!(" {} {}", self.join_type.as_str(), self.table);
        if let Some(alias) = &self.alias {
            sql.push_str(" AS ");
            sql.push_str(alias);
        }
        let on_sql = self.on.build_with_dialect(dialect, params, offset);
        sql.push_str(" ON ");
        sql.push_str(&on_sql);
        sql
    }
}

/// The ON predicates linking one association hop.
///
/// `parent_side` links the parent table to the hop's first joined table
/// (the join table for many-to-many, the target otherwise); `child_side`
/// links the join table to the target and is present only for
/// many-to-many hops.
#[derive(Debug, Clone)]
pub struct HopPredicates {
    pub parent_side: Expr,
    pub child_side: Option<Expr>,
}

/// Build the ON predicates for one reflection hop.
///
/// This is the single place join columns are chosen from a macro kind;
/// both the eager-join builder and the through-chain resolver call it so
/// the two paths can never disagree. The predicates are plain equalities,
/// usable in either join direction.
///
/// Polymorphic `HasOne`/`HasMany` hops add a discriminator equality bound
/// to the reflection's owner type name. A polymorphic `BelongsTo` has no
/// static target table and must be rejected by the caller before this
/// point; a many-to-many reflection missing its join-table metadata fails
/// here with a configuration error.
#[allow(clippy::result_large_err)]
pub fn hop_predicates(
    reflection: &Reflection,
    parent_alias: &str,
    child_alias: &str,
    link_alias: Option<&str>,
) -> Result<HopPredicates> {
    match reflection.macro_kind {
        MacroKind::BelongsTo => Ok(HopPredicates {
            parent_side: Expr::qualified(child_alias, reflection.target_primary_key)
                .eq(Expr::qualified(parent_alias, reflection.foreign_key)),
            child_side: None,
        }),
        MacroKind::HasOne | MacroKind::HasMany => {
            let mut on = Expr::qualified(child_alias, reflection.foreign_key)
                .eq(Expr::qualified(parent_alias, reflection.primary_key));
            if let Some(discriminator) = reflection.discriminator_column() {
                on = on.and(
                    Expr::qualified(child_alias, discriminator)
                        .eq(Expr::lit(reflection.owner_type)),
                );
            }
            Ok(HopPredicates {
                parent_side: on,
                child_side: None,
            })
        }
        MacroKind::HasAndBelongsToMany => {
            let join_table = reflection.join_table.ok_or_else(|| {
                Error::configuration(format!(
                    "association '{}' on '{}' is many-to-many but declares no join table",
                    reflection.name, reflection.owner_table
                ))
            })?;
            let link = link_alias.unwrap_or(join_table.table_name);
            Ok(HopPredicates {
                parent_side: Expr::qualified(link, join_table.owner_column)
                    .eq(Expr::qualified(parent_alias, reflection.primary_key)),
                child_side: Some(
                    Expr::qualified(child_alias, reflection.target_primary_key)
                        .eq(Expr::qualified(link, join_table.target_column)),
                ),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_core::JoinTable;

    #[test]
    fn left_join_renders_with_alias() {
        let join = Join::left("comments", Expr::raw("comments.post_id = posts.id"))
            .alias("comments_2");
        let mut params = Vec::new();
        let sql = join.build_with_dialect(Dialect::Postgres, &mut params, 0);
        assert_eq!(
            sql,
            " LEFT JOIN comments AS comments_2 ON comments.post_id = posts.id"
        );
    }

    #[test]
    fn bare_alias_is_elided() {
        let join = Join::left("comments", Expr::raw("TRUE")).alias_unless_bare("comments");
        assert!(join.alias.is_none());
        assert_eq!(join.table_reference(), "comments");
    }

    #[test]
    fn belongs_to_joins_owner_fk_to_target_pk() {
        let refl = Reflection::new("author", MacroKind::BelongsTo, "posts", "users", "author_id");
        let preds = hop_predicates(&refl, "posts", "users", None).unwrap();
        let mut params = Vec::new();
        let sql = preds.parent_side.build(&mut params, 0);
        assert_eq!(sql, "\"users\".\"id\" = \"posts\".\"author_id\"");
        assert!(preds.child_side.is_none());
    }

    #[test]
    fn has_many_joins_target_fk_to_owner_pk() {
        let refl = Reflection::new("comments", MacroKind::HasMany, "posts", "comments", "post_id");
        let preds = hop_predicates(&refl, "posts", "comments", None).unwrap();
        let mut params = Vec::new();
        let sql = preds.parent_side.build(&mut params, 0);
        assert_eq!(sql, "\"comments\".\"post_id\" = \"posts\".\"id\"");
    }

    #[test]
    fn polymorphic_has_many_adds_discriminator_equality() {
        let refl = Reflection::new("notes", MacroKind::HasMany, "posts", "notes", "notable_id")
            .polymorphic("notable")
            .owner_type("Post");
        let preds = hop_predicates(&refl, "posts", "notes", None).unwrap();
        let mut params = Vec::new();
        let sql = preds.parent_side.build(&mut params, 0);
        assert_eq!(
            sql,
            "\"notes\".\"notable_id\" = \"posts\".\"id\" AND \"notes\".\"notable_type\" = $1"
        );
        assert_eq!(params, vec![Value::Text("Post".to_string())]);
    }

    #[test]
    fn many_to_many_produces_both_sides() {
        let refl = Reflection::new("tags", MacroKind::HasAndBelongsToMany, "posts", "tags", "")
            .join_table(JoinTable::new("posts_tags", "post_id", "tag_id"));
        let preds = hop_predicates(&refl, "posts", "tags", Some("posts_tags")).unwrap();
        let mut params = Vec::new();
        assert_eq!(
            preds.parent_side.build(&mut params, 0),
            "\"posts_tags\".\"post_id\" = \"posts\".\"id\""
        );
        assert_eq!(
            preds.child_side.unwrap().build(&mut params, 0),
            "\"tags\".\"id\" = \"posts_tags\".\"tag_id\""
        );
    }
}
