//! Association scope resolution.
//!
//! Given one reflection (direct, or indirected across a through-chain),
//! `AssociationScope` produces the `Select` that fetches the association's
//! rows from the owning record(s): the joins needed to reach the final
//! target table, a terminal filter binding the owner key(s), and the
//! reflection's own conditions, ordering, and distinct flag. The explicit
//! [`QueryContext`] contributes caller-scoped options.

use relmap_core::{resolve_chain, Error, MacroKind, QueryContext, RecordData, Reflection,
    Result, ThroughError, ThroughErrorKind, Value};

use crate::alias::AliasTracker;
use crate::expr::{Dialect, Expr};
use crate::join::{hop_predicates, Join};
use crate::clause::OrderBy;
use crate::select::Select;

/// Alias of the injected owner-key projection, used when the partition
/// key lives on a join table or an intermediate chain table rather than
/// the target itself.
pub const OWNER_KEY_ALIAS: &str = "_relmap_owner_key";

/// A resolved association query plus the column result rows carry the
/// owner-binding key under (the preloader partitions rows by it).
#[derive(Debug, Clone)]
pub struct ResolvedScope {
    pub select: Select,
    /// Name of the result column holding the owner-binding key.
    pub partition_column: String,
    /// Alias the final target table is known by inside the query.
    pub target_alias: String,
}

/// Builder of association fetch queries.
#[derive(Debug, Clone, Copy)]
pub struct AssociationScope {
    dialect: Dialect,
}

impl AssociationScope {
    /// Create a scope builder for a dialect.
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Resolve the fetch query for one owner record.
    #[allow(clippy::result_large_err)]
    pub fn for_owner(
        &self,
        reflection: &'static Reflection,
        owner: &RecordData,
        ctx: &QueryContext,
    ) -> Result<ResolvedScope> {
        let key = owner_binding_key(reflection, owner).ok_or_else(|| {
            Error::configuration(format!(
                "owner '{}' carries no key for association '{}'",
                owner.table(),
                reflection.name
            ))
        })?;
        self.for_owner_keys(reflection, &[key], ctx)
    }

    /// Resolve the fetch query for a batch of owner-binding keys.
    ///
    /// Through-chains resolve iteratively: the final target is the FROM
    /// table and each predecessor hop joins in front of it, so the
    /// terminal filter lands on the chain's first table. Every hop's table
    /// gets its own alias, so a chain touching one table twice (including
    /// the target table itself) never collides.
    #[tracing::instrument(level = "trace", skip(self, owner_keys, ctx))]
    pub fn for_owner_keys(
        &self,
        reflection: &'static Reflection,
        owner_keys: &[Value],
        ctx: &QueryContext,
    ) -> Result<ResolvedScope> {
        if reflection.polymorphic_belongs_to() {
            return Err(Error::configuration(format!(
                "association '{}' on '{}' is a polymorphic belongs_to; resolve its target through a TargetRegistry",
                reflection.name, reflection.owner_table
            )));
        }

        let chain = resolve_chain(reflection)?;
        for hop in &chain {
            if hop.polymorphic_belongs_to() {
                return Err(Error::Through(ThroughError {
                    kind: ThroughErrorKind::AmbiguousSource,
                    association: reflection.name.to_string(),
                    message: format!(
                        "hop '{}' is a polymorphic belongs_to and cannot be resolved to one concrete join",
                        hop.name
                    ),
                }));
            }
        }

        let mut tracker = AliasTracker::new(self.dialect);
        let final_hop = chain[chain.len() - 1];
        let target_alias = tracker.aliased_name(final_hop.target_table, None);

        let mut select = Select::new(final_hop.target_table)
            .column(format!("{target_alias}.*"));
        if target_alias != final_hop.target_table {
            select = select.table_alias(target_alias.clone());
        }

        // Join predecessors back-to-front; after this loop `hop_aliases[i]`
        // names the table chain[i] reaches (chain[i].target_table).
        let mut hop_aliases = vec![String::new(); chain.len()];
        hop_aliases[chain.len() - 1] = target_alias.clone();
        for i in (1..chain.len()).rev() {
            let hop = chain[i];
            let parent_table = chain[i - 1].target_table;
            let parent_alias = tracker.aliased_name(parent_table, None);
            let link_alias = hop
                .join_table
                .filter(|_| hop.macro_kind == MacroKind::HasAndBelongsToMany)
                .map(|jt| tracker.aliased_name(jt.table_name, None));
            let predicates =
                hop_predicates(hop, &parent_alias, &hop_aliases[i], link_alias.as_deref())?;

            if let (Some(link), Some(child_side)) = (&link_alias, predicates.child_side.clone()) {
                let join_table = hop.join_table.map(|jt| jt.table_name).unwrap_or("");
                select = select.join(Join::inner(join_table, child_side).alias_unless_bare(link));
            }
            select = select.join(
                Join::inner(parent_table, predicates.parent_side)
                    .alias_unless_bare(&parent_alias),
            );
            if let Some(conditions) = hop.conditions {
                select = select.filter(Expr::raw(conditions).paren());
            }
            hop_aliases[i - 1] = parent_alias;
        }

        // Terminal filter: bind the chain's first table to the owner keys.
        let first_hop = chain[0];
        let first_alias = hop_aliases[0].clone();
        let (binding_alias, binding_column) = match first_hop.macro_kind {
            MacroKind::BelongsTo => (first_alias.clone(), first_hop.target_primary_key),
            MacroKind::HasOne | MacroKind::HasMany => {
                (first_alias.clone(), first_hop.foreign_key)
            }
            MacroKind::HasAndBelongsToMany => {
                let join_table = first_hop.join_table.ok_or_else(|| {
                    Error::configuration(format!(
                        "association '{}' on '{}' is many-to-many but declares no join table",
                        first_hop.name, first_hop.owner_table
                    ))
                })?;
                let link_alias = tracker.aliased_name(join_table.table_name, None);
                let predicates = hop_predicates(
                    first_hop,
                    "",
                    &first_alias,
                    Some(&link_alias),
                )?;
                if let Some(child_side) = predicates.child_side {
                    select = select.join(
                        Join::inner(join_table.table_name, child_side)
                            .alias_unless_bare(&link_alias),
                    );
                }
                (link_alias, join_table.owner_column)
            }
        };

        let binding = Expr::qualified(&binding_alias, binding_column);
        select = if owner_keys.len() == 1 {
            select.filter(binding.eq(Expr::lit(owner_keys[0].clone())))
        } else {
            select.filter(binding.in_list(owner_keys.to_vec()))
        };

        // Polymorphic has_one/has_many bind their discriminator in the
        // terminal filter (the first table is not reached via a join).
        if first_hop.macro_kind != MacroKind::BelongsTo {
            if let Some(discriminator) = first_hop.discriminator_column() {
                select = select.filter(
                    Expr::qualified(&first_alias, discriminator)
                        .eq(Expr::lit(first_hop.owner_type)),
                );
            }
        }

        // The partition key is on the target table only for direct
        // non-many-to-many associations; otherwise project it explicitly.
        let partition_column = if binding_alias == target_alias {
            binding_column.to_string()
        } else {
            select = select.column(format!(
                "{binding_alias}.{binding_column} AS {OWNER_KEY_ALIAS}"
            ));
            OWNER_KEY_ALIAS.to_string()
        };

        if let Some(conditions) = reflection.conditions {
            select = select.filter(Expr::raw(conditions).paren());
        }
        if let Some(conditions) = ctx.conditions_sql() {
            select = select.filter(Expr::raw(conditions.to_string()).paren());
        }
        if let Some(order) = reflection.order_by {
            select = select.order_by(OrderBy::raw(order));
        }
        if let Some(order) = ctx.order_sql() {
            select = select.order_by(OrderBy::raw(order.to_string()));
        }
        if let Some(limit) = ctx.row_limit() {
            select = select.limit(limit);
        }
        if reflection.distinct {
            select = select.distinct();
        }

        Ok(ResolvedScope {
            select,
            partition_column,
            target_alias,
        })
    }

    /// May this association be mutated (create/delete through its scope)?
    ///
    /// Direct associations always may. A through association may only when
    /// the chain is a single indirection whose source hop is a direct
    /// `belongs_to`; anything longer or sideways leaves no single
    /// unambiguous foreign key to write. Reads stay permitted either way.
    #[allow(clippy::result_large_err)]
    pub fn mutation_permitted(reflection: &'static Reflection) -> Result<()> {
        if !reflection.is_through() {
            return Ok(());
        }
        let chain = resolve_chain(reflection)?;
        if chain.len() > 2 {
            return Err(Error::Through(ThroughError {
                kind: ThroughErrorKind::ReadOnly,
                association: reflection.name.to_string(),
                message: "chain passes through more than one indirection".to_string(),
            }));
        }
        let source = chain[chain.len() - 1];
        if source.polymorphic_belongs_to() {
            return Err(Error::Through(ThroughError {
                kind: ThroughErrorKind::AmbiguousSource,
                association: reflection.name.to_string(),
                message: format!("source hop '{}' is polymorphic", source.name),
            }));
        }
        if source.macro_kind != MacroKind::BelongsTo {
            return Err(Error::Through(ThroughError {
                kind: ThroughErrorKind::ReadOnly,
                association: reflection.name.to_string(),
                message: format!(
                    "source hop '{}' is not a direct belongs_to",
                    source.name
                ),
            }));
        }
        Ok(())
    }
}

/// The owner-side key value an association query binds: the owner's
/// foreign key for `belongs_to`, its primary key otherwise. `None` when
/// the owner does not carry the column (or it is null), in which case the
/// association resolves to an empty target without a query.
#[must_use]
pub fn owner_binding_key(reflection: &'static Reflection, owner: &RecordData) -> Option<Value> {
    let chain = resolve_chain(reflection).ok()?;
    let first_hop = chain.first()?;
    let column = match first_hop.macro_kind {
        MacroKind::BelongsTo => first_hop.foreign_key,
        _ => first_hop.primary_key,
    };
    owner.get(column).filter(|v| !v.is_null()).cloned()
}
