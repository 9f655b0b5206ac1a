//! Association metadata.
//!
//! A [`Reflection`] is the static, immutable description of one declared
//! association: its macro kind, the owning and target tables, the key
//! columns linking them, an optional through-chain, and an optional
//! polymorphic discriminator. Reflections are defined as `const` data on
//! each [`Record`](crate::record::Record) type and consumed read-only by
//! the join builder, the scope resolver, and the preloader.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::record::Record;

/// The macro kind of an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroKind {
    /// The owner holds the foreign key pointing at one target record.
    BelongsTo,
    /// One target record holds a foreign key pointing back at the owner.
    HasOne,
    /// Many target records hold foreign keys pointing back at the owner.
    HasMany,
    /// Owner and target link through a join table.
    HasAndBelongsToMany,
}

impl MacroKind {
    /// Does this macro produce a collection target?
    #[must_use]
    pub const fn is_collection(self) -> bool {
        matches!(self, MacroKind::HasMany | MacroKind::HasAndBelongsToMany)
    }

    /// Does this macro produce a single-record target?
    #[must_use]
    pub const fn is_singular(self) -> bool {
        !self.is_collection()
    }
}

/// Deletion policy consulted when records leave a collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dependent {
    /// Detach in memory only; the foreign key is nulled out.
    #[default]
    Detach,
    /// Null out the foreign key explicitly.
    Nullify,
    /// Delete the target rows directly.
    Delete,
    /// Destroy the target records (callback dispatch is an external
    /// collaborator; the statement issued here matches `Delete`).
    Destroy,
}

/// Join-table metadata for `HasAndBelongsToMany` associations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinTable {
    /// The join table name (e.g. `"posts_tags"`).
    pub table_name: &'static str,
    /// Column in the join table pointing at the owner (e.g. `"post_id"`).
    pub owner_column: &'static str,
    /// Column in the join table pointing at the target (e.g. `"tag_id"`).
    pub target_column: &'static str,
}

impl JoinTable {
    /// Create a new join-table definition.
    #[must_use]
    pub const fn new(
        table_name: &'static str,
        owner_column: &'static str,
        target_column: &'static str,
    ) -> Self {
        Self {
            table_name,
            owner_column,
            target_column,
        }
    }
}

/// Static metadata about one declared association.
///
/// Key column semantics by macro kind:
/// - `BelongsTo`: `foreign_key` lives on the owner table and matches the
///   target's `target_primary_key`.
/// - `HasOne`/`HasMany`: `foreign_key` lives on the target table and
///   matches the owner's `primary_key`.
/// - `HasAndBelongsToMany`: `join_table.owner_column` matches the owner's
///   `primary_key`, `join_table.target_column` matches the target's
///   `target_primary_key`; `foreign_key` is unused.
#[derive(Debug, Clone, Copy)]
pub struct Reflection {
    /// Name of the association.
    pub name: &'static str,

    /// Macro kind.
    pub macro_kind: MacroKind,

    /// Table the association is declared on.
    pub owner_table: &'static str,

    /// The owning type's name. A polymorphic `HasOne`/`HasMany` binds its
    /// discriminator predicate to this value; empty otherwise.
    pub owner_type: &'static str,

    /// The target table. Empty for a polymorphic `BelongsTo`, whose target
    /// varies per row and resolves through a [`TargetRegistry`].
    pub target_table: &'static str,

    /// The target's type name (the value a polymorphic discriminator
    /// column stores). Empty for a polymorphic `BelongsTo`.
    pub target_type: &'static str,

    /// Foreign key column; see the struct docs for which side it lives on.
    pub foreign_key: &'static str,

    /// Key column on the owner table.
    pub primary_key: &'static str,

    /// Key column on the target table.
    pub target_primary_key: &'static str,

    /// Join table for `HasAndBelongsToMany`.
    pub join_table: Option<JoinTable>,

    /// Ordered chain of reflections this association is indirected across.
    /// Empty for a direct association. Hops may themselves be through
    /// reflections; [`resolve_chain`] flattens them one level at a time.
    pub through_chain: &'static [&'static Reflection],

    /// Polymorphic discriminator column basename (`"owner"` means columns
    /// `owner_id` and `owner_type`).
    pub polymorphic: Option<&'static str>,

    /// Raw predicate ANDed into the association's query.
    pub conditions: Option<&'static str>,

    /// Ordering applied when the association is fetched as its own
    /// collection. Ignored by the eager-join path.
    pub order_by: Option<&'static str>,

    /// Deletion policy for records leaving the collection.
    pub dependent: Dependent,

    /// Post-fetch deduplication for paths that can structurally produce
    /// duplicate rows.
    pub distinct: bool,

    /// Function pointer returning the target model's column names.
    ///
    /// Keeps reflection metadata zero-cost (static, no allocation) while
    /// letting the join builder project related columns without runtime
    /// reflection.
    pub target_columns: fn() -> &'static [&'static str],

    /// Function pointer returning the target model's own reflections, for
    /// resolving nested association names.
    pub target_reflections: fn() -> &'static [Reflection],
}

impl PartialEq for Reflection {
    fn eq(&self, other: &Self) -> bool {
        // Function pointers are excluded: their equality is not stable
        // across codegen units and they are not part of a reflection's
        // semantic identity.
        self.name == other.name
            && self.macro_kind == other.macro_kind
            && self.owner_table == other.owner_table
            && self.target_table == other.target_table
            && self.foreign_key == other.foreign_key
            && self.primary_key == other.primary_key
            && self.target_primary_key == other.target_primary_key
            && self.join_table == other.join_table
            && self.polymorphic == other.polymorphic
    }
}

impl Eq for Reflection {}

impl Reflection {
    fn empty_columns() -> &'static [&'static str] {
        &[]
    }

    fn empty_reflections() -> &'static [Reflection] {
        &[]
    }

    /// Create a new direct reflection.
    #[must_use]
    pub const fn new(
        name: &'static str,
        macro_kind: MacroKind,
        owner_table: &'static str,
        target_table: &'static str,
        foreign_key: &'static str,
    ) -> Self {
        Self {
            name,
            macro_kind,
            owner_table,
            owner_type: "",
            target_table,
            target_type: "",
            foreign_key,
            primary_key: "id",
            target_primary_key: "id",
            join_table: None,
            through_chain: &[],
            polymorphic: None,
            conditions: None,
            order_by: None,
            dependent: Dependent::Detach,
            distinct: false,
            target_columns: Self::empty_columns,
            target_reflections: Self::empty_reflections,
        }
    }

    /// Set the target type name (polymorphic discriminator value).
    #[must_use]
    pub const fn target_type(mut self, type_name: &'static str) -> Self {
        self.target_type = type_name;
        self
    }

    /// Set the owning type's name (required for polymorphic `HasOne`/
    /// `HasMany`, whose discriminator predicate binds it).
    #[must_use]
    pub const fn owner_type(mut self, type_name: &'static str) -> Self {
        self.owner_type = type_name;
        self
    }

    /// Override the owner-side key column.
    #[must_use]
    pub const fn primary_key(mut self, column: &'static str) -> Self {
        self.primary_key = column;
        self
    }

    /// Override the target-side key column.
    #[must_use]
    pub const fn target_primary_key(mut self, column: &'static str) -> Self {
        self.target_primary_key = column;
        self
    }

    /// Set the join table (`HasAndBelongsToMany`).
    #[must_use]
    pub const fn join_table(mut self, info: JoinTable) -> Self {
        self.join_table = Some(info);
        self
    }

    /// Set the through-chain.
    #[must_use]
    pub const fn through(mut self, chain: &'static [&'static Reflection]) -> Self {
        self.through_chain = chain;
        self
    }

    /// Set the polymorphic discriminator column basename.
    #[must_use]
    pub const fn polymorphic(mut self, basename: &'static str) -> Self {
        self.polymorphic = Some(basename);
        self
    }

    /// Set an extra predicate ANDed into the association's query.
    #[must_use]
    pub const fn conditions(mut self, sql: &'static str) -> Self {
        self.conditions = Some(sql);
        self
    }

    /// Set the default ordering.
    #[must_use]
    pub const fn order_by(mut self, ordering: &'static str) -> Self {
        self.order_by = Some(ordering);
        self
    }

    /// Set the deletion policy.
    #[must_use]
    pub const fn dependent(mut self, policy: Dependent) -> Self {
        self.dependent = policy;
        self
    }

    /// Enable post-fetch deduplication.
    #[must_use]
    pub const fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Provide the target model's column list.
    #[must_use]
    pub const fn columns(mut self, f: fn() -> &'static [&'static str]) -> Self {
        self.target_columns = f;
        self
    }

    /// Provide the target model's reflections, for nested resolution.
    #[must_use]
    pub const fn reflections(mut self, f: fn() -> &'static [Reflection]) -> Self {
        self.target_reflections = f;
        self
    }

    /// Is this association indirected through other associations?
    #[must_use]
    pub const fn is_through(&self) -> bool {
        !self.through_chain.is_empty()
    }

    /// Does this association produce a collection target?
    #[must_use]
    pub const fn is_collection(&self) -> bool {
        self.macro_kind.is_collection()
    }

    /// Is this a polymorphic `BelongsTo` (target varies per row)?
    #[must_use]
    pub const fn polymorphic_belongs_to(&self) -> bool {
        self.polymorphic.is_some() && matches!(self.macro_kind, MacroKind::BelongsTo)
    }

    /// The discriminator column name (`"owner"` → `"owner_type"`).
    #[must_use]
    pub fn discriminator_column(&self) -> Option<String> {
        self.polymorphic.map(|basename| format!("{basename}_type"))
    }
}

/// Flatten a reflection's through-chain into direct hops.
///
/// Nested indirection (a chain hop that is itself a through reflection) is
/// expanded iteratively one level at a time. Returns the ordered list of
/// direct hops from the owner to the final target; a direct reflection
/// resolves to a single-element chain. Malformed chains fail here, at
/// graph-build time, never during query execution.
#[allow(clippy::result_large_err)]
pub fn resolve_chain(reflection: &'static Reflection) -> Result<Vec<&'static Reflection>> {
    if !reflection.is_through() {
        return Ok(vec![reflection]);
    }

    let mut hops: Vec<&'static Reflection> = reflection.through_chain.to_vec();
    // Expansion is bounded: each pass replaces at least one through hop
    // with its own (shorter by construction) chain, and a depth guard
    // catches accidental cycles in hand-written metadata.
    let mut passes = 0;
    while hops.iter().any(|hop| hop.is_through()) {
        passes += 1;
        if passes > 16 {
            return Err(Error::configuration(format!(
                "through chain for '{}' on '{}' does not terminate",
                reflection.name, reflection.owner_table
            )));
        }
        let mut expanded = Vec::with_capacity(hops.len());
        for hop in hops {
            if hop.is_through() {
                expanded.extend_from_slice(hop.through_chain);
            } else {
                expanded.push(hop);
            }
        }
        hops = expanded;
    }

    if hops.len() < 2 {
        return Err(Error::configuration(format!(
            "through chain for '{}' on '{}' must name at least two hops",
            reflection.name, reflection.owner_table
        )));
    }

    Ok(hops)
}

/// Find a reflection by association name.
#[must_use]
pub fn find_reflection<'a>(
    reflections: &'a [Reflection],
    name: &str,
) -> Option<&'a Reflection> {
    reflections.iter().find(|r| r.name == name)
}

/// Find a reflection by name, failing with a closest-name suggestion.
#[allow(clippy::result_large_err)]
pub fn reflection_or_error<'a>(
    reflections: &'a [Reflection],
    owner_table: &str,
    name: &str,
) -> Result<&'a Reflection> {
    find_reflection(reflections, name).ok_or_else(|| {
        Error::unknown_association(owner_table, name, closest_name(name, reflections))
    })
}

/// Pick the known association name closest to a misspelled one.
///
/// Distance threshold of one third of the name length (minimum 2) keeps
/// the hint from suggesting unrelated names.
#[must_use]
pub fn closest_name<'a>(name: &str, reflections: &'a [Reflection]) -> Option<&'a str> {
    let threshold = (name.len() / 3).max(2);
    reflections
        .iter()
        .map(|r| (edit_distance(name, r.name), r.name))
        .filter(|(distance, _)| *distance <= threshold)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| candidate)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Table metadata for one concrete polymorphic target type.
#[derive(Debug, Clone, Copy)]
pub struct TargetMeta {
    /// The target table name.
    pub table: &'static str,
    /// The target's primary key column.
    pub primary_key: &'static str,
    /// The target's column names.
    pub columns: &'static [&'static str],
    /// The target's own reflections.
    pub reflections: &'static [Reflection],
}

/// Maps polymorphic type names to target table metadata.
///
/// A polymorphic `BelongsTo` stores the concrete target's type name in its
/// discriminator column; resolving that name to a table happens through
/// this registry, supplied explicitly at the call boundary.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    map: HashMap<&'static str, TargetMeta>,
}

impl TargetRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Register a record type under its `TYPE_NAME`.
    #[must_use]
    pub fn register<T: Record>(mut self) -> Self {
        self.map.insert(
            T::TYPE_NAME,
            TargetMeta {
                table: T::TABLE_NAME,
                primary_key: T::PRIMARY_KEY,
                columns: T::columns(),
                reflections: T::REFLECTIONS,
            },
        );
        self
    }

    /// Look up the metadata for a type name.
    #[must_use]
    pub fn lookup(&self, type_name: &str) -> Option<&TargetMeta> {
        self.map.get(type_name)
    }

    /// Look up a type name, failing with a configuration error when the
    /// type was never registered.
    #[allow(clippy::result_large_err)]
    pub fn lookup_or_error(&self, type_name: &str) -> Result<&TargetMeta> {
        self.lookup(type_name).ok_or_else(|| {
            Error::configuration(format!(
                "polymorphic type '{type_name}' is not registered"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static TAGGINGS: Reflection = Reflection::new(
        "taggings",
        MacroKind::HasMany,
        "posts",
        "taggings",
        "post_id",
    );
    static TAGGING_TAG: Reflection =
        Reflection::new("tag", MacroKind::BelongsTo, "taggings", "tags", "tag_id");
    static TAGS_CHAIN: [&Reflection; 2] = [&TAGGINGS, &TAGGING_TAG];
    static TAGS: Reflection =
        Reflection::new("tags", MacroKind::HasMany, "posts", "tags", "")
            .through(&TAGS_CHAIN);

    #[test]
    fn direct_reflection_resolves_to_itself() {
        let chain = resolve_chain(&TAGGINGS).unwrap();
        assert_eq!(chain.len(), 1);
        assert!(std::ptr::eq(chain[0], &TAGGINGS));
    }

    #[test]
    fn through_chain_flattens_in_order() {
        let chain = resolve_chain(&TAGS).unwrap();
        assert_eq!(chain.len(), 2);
        assert!(std::ptr::eq(chain[0], &TAGGINGS));
        assert!(std::ptr::eq(chain[1], &TAGGING_TAG));
    }

    #[test]
    fn nested_through_chain_flattens_one_level_at_a_time() {
        static COMMENTS: Reflection = Reflection::new(
            "comments",
            MacroKind::HasMany,
            "tags",
            "comments",
            "tag_id",
        );
        static TAG_COMMENTS_CHAIN: [&Reflection; 2] = [&TAGS, &COMMENTS];
        static TAG_COMMENTS: Reflection =
            Reflection::new("tag_comments", MacroKind::HasMany, "posts", "comments", "")
                .through(&TAG_COMMENTS_CHAIN);

        let chain = resolve_chain(&TAG_COMMENTS).unwrap();
        assert_eq!(chain.len(), 3);
        assert!(std::ptr::eq(chain[0], &TAGGINGS));
        assert!(std::ptr::eq(chain[1], &TAGGING_TAG));
        assert!(std::ptr::eq(chain[2], &COMMENTS));
    }

    #[test]
    fn single_hop_chain_is_malformed() {
        static BROKEN_CHAIN: [&Reflection; 1] = [&TAGGINGS];
        static BROKEN: Reflection =
            Reflection::new("broken", MacroKind::HasMany, "posts", "tags", "")
                .through(&BROKEN_CHAIN);
        // Flattens to one hop, which cannot link two tables.
        // The chain slice has one element and that element is direct.
        let err = resolve_chain(&BROKEN).unwrap_err();
        assert!(err.to_string().contains("at least two hops"));
    }

    #[test]
    fn closest_name_suggests_within_threshold() {
        let reflections = [
            Reflection::new("comments", MacroKind::HasMany, "posts", "comments", "post_id"),
            Reflection::new("author", MacroKind::BelongsTo, "posts", "users", "author_id"),
        ];
        assert_eq!(closest_name("commments", &reflections), Some("comments"));
        assert_eq!(closest_name("auther", &reflections), Some("author"));
        assert_eq!(closest_name("zzzzzz", &reflections), None);
    }

    #[test]
    fn reflection_or_error_carries_suggestion() {
        let reflections = [Reflection::new(
            "comments",
            MacroKind::HasMany,
            "posts",
            "comments",
            "post_id",
        )];
        let err = reflection_or_error(&reflections, "posts", "coments").unwrap_err();
        assert!(err.to_string().contains("did you mean 'comments'"));
    }

    #[test]
    fn discriminator_column_derives_from_basename() {
        let refl = Reflection::new(
            "commentable",
            MacroKind::BelongsTo,
            "comments",
            "",
            "commentable_id",
        )
        .polymorphic("commentable");
        assert_eq!(refl.discriminator_column().as_deref(), Some("commentable_type"));
        assert!(refl.polymorphic_belongs_to());
    }
}
