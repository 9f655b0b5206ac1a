//! Join-graph construction and row reconstruction.
//!
//! `JoinDependency` turns a nested specification of association names into
//! an ordered tree of aliased joins, then folds the flat rows an eager
//! query returns back into a graph of owner/child records, deduplicating
//! parents and children correctly.

use std::collections::{BTreeMap, HashMap};

use relmap_core::reflection::reflection_or_error;
use relmap_core::{resolve_chain, Error, MacroKind, Record, RecordData, Reflection, Result, Row,
    ThroughError, ThroughErrorKind, Value};

use crate::alias::AliasTracker;
use crate::expr::Dialect;
use crate::join::{hop_predicates, Join};
use crate::select::Select;

/// A path of association names to resolve, possibly nested.
#[derive(Debug, Clone)]
pub struct IncludePath {
    /// Association name on the parent.
    pub name: &'static str,
    /// Nested associations to resolve on the target.
    pub nested: Vec<IncludePath>,
}

impl IncludePath {
    /// Create a new include path for a single association.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            nested: Vec::new(),
        }
    }

    /// Add a nested association.
    #[must_use]
    pub fn nest(mut self, path: IncludePath) -> Self {
        self.nested.push(path);
        self
    }

    /// Parse a dotted path (`"author.address"`) into nested include paths.
    ///
    /// Empty segments are dropped; an all-empty path yields `None`.
    #[must_use]
    pub fn parse(path: &'static str) -> Option<Self> {
        let parts: Vec<&'static str> =
            path.split('.').filter(|p| !p.trim().is_empty()).collect();
        let mut iter = parts.into_iter().rev();
        let mut current = IncludePath::new(iter.next()?);
        for name in iter {
            current = IncludePath::new(name).nest(current);
        }
        Some(current)
    }

    /// Build a flat list of single-name paths.
    #[must_use]
    pub fn list(names: &[&'static str]) -> Vec<Self> {
        names.iter().map(|&n| IncludePath::new(n)).collect()
    }
}

/// One aliased table in the join tree.
#[derive(Debug, Clone)]
pub struct JoinNode {
    /// The association this node realizes.
    pub reflection: &'static Reflection,
    /// Parent node index; `None` means the root table.
    pub parent: Option<usize>,
    /// The target table joined by this node.
    pub table: &'static str,
    /// Alias the target table is joined under.
    pub table_alias: String,
    /// Alias of the synthesized join-table hop (many-to-many only).
    pub link_alias: Option<String>,
}

/// A reconstructed record with its eagerly populated associations.
///
/// Presence of an association name in `associations` means the eager join
/// resolved it: an empty collection or `One(None)` is a *loaded* empty
/// target, distinct from an association that was never requested.
#[derive(Debug)]
pub struct RecordGraph {
    pub record: RecordData,
    pub associations: BTreeMap<&'static str, GraphTarget>,
}

/// The resolved target of one association in a [`RecordGraph`].
#[derive(Debug)]
pub enum GraphTarget {
    One(Option<Box<RecordGraph>>),
    Many(Vec<RecordGraph>),
}

/// The join tree for one eager query.
#[derive(Debug)]
pub struct JoinDependency {
    dialect: Dialect,
    root_table: &'static str,
    root_alias: String,
    root_primary_key: &'static str,
    root_columns: &'static [&'static str],
    nodes: Vec<JoinNode>,
    joins: Vec<Join>,
    /// Child node indexes per node, parallel to `nodes`.
    node_children: Vec<Vec<usize>>,
    /// Node indexes hanging directly off the root.
    root_children: Vec<usize>,
}

impl JoinDependency {
    /// Build the join tree for a root record type and its include paths.
    #[tracing::instrument(level = "trace", skip(paths))]
    pub fn build<R: Record>(paths: &[IncludePath], dialect: Dialect) -> Result<Self> {
        Self::with_joins::<R>(paths, &[], dialect)
    }

    /// Build the join tree, seeding the alias allocator from joins the
    /// caller already constructed so no alias collides with them.
    pub fn with_joins<R: Record>(
        paths: &[IncludePath],
        existing: &[Join],
        dialect: Dialect,
    ) -> Result<Self> {
        let mut tracker = AliasTracker::with_joins(dialect, existing);
        let root_alias = tracker.aliased_name(R::TABLE_NAME, None);

        let mut dependency = Self {
            dialect,
            root_table: R::TABLE_NAME,
            root_alias,
            root_primary_key: R::PRIMARY_KEY,
            root_columns: R::columns(),
            nodes: Vec::new(),
            joins: Vec::new(),
            node_children: Vec::new(),
            root_children: Vec::new(),
        };
        dependency.add_paths(None, R::REFLECTIONS, R::TABLE_NAME, paths, &mut tracker)?;
        Ok(dependency)
    }

    /// The ordered join nodes, in traversal order.
    #[must_use]
    pub fn nodes(&self) -> &[JoinNode] {
        &self.nodes
    }

    /// The ordered join clauses.
    #[must_use]
    pub fn join_plan(&self) -> &[Join] {
        &self.joins
    }

    /// The root table's alias in the generated query.
    #[must_use]
    pub fn root_alias(&self) -> &str {
        &self.root_alias
    }

    /// Projected column list: every table's columns under the
    /// `alias__column` naming scheme reconstruction reads back.
    #[must_use]
    pub fn select_columns(&self) -> Vec<String> {
        let mut columns = Vec::new();
        for col in self.root_columns {
            columns.push(format!(
                "{0}.{1} AS {0}__{1}",
                self.root_alias, col
            ));
        }
        for node in &self.nodes {
            for col in (node.reflection.target_columns)() {
                columns.push(format!("{0}.{1} AS {0}__{1}", node.table_alias, col));
            }
        }
        columns
    }

    /// Assemble the full eager query.
    #[must_use]
    pub fn select(&self) -> Select {
        let mut select = Select::new(self.root_table).columns(self.select_columns());
        if self.root_alias != self.root_table {
            select = select.table_alias(self.root_alias.clone());
        }
        for join in &self.joins {
            select = select.join(join.clone());
        }
        select
    }

    fn add_paths(
        &mut self,
        parent: Option<usize>,
        reflections: &'static [Reflection],
        owner_table: &'static str,
        paths: &[IncludePath],
        tracker: &mut AliasTracker,
    ) -> Result<()> {
        for path in paths {
            let reflection = reflection_or_error(reflections, owner_table, path.name)?;
            if reflection.polymorphic_belongs_to() {
                return Err(Error::configuration(format!(
                    "cannot eagerly join polymorphic association '{}' on '{}'; use the preloader",
                    reflection.name, owner_table
                )));
            }
            if (reflection.target_columns)().is_empty() {
                return Err(Error::configuration(format!(
                    "association '{}' on '{}' declares no target columns; eager joins need them",
                    reflection.name, owner_table
                )));
            }

            // Same reflection under the same parent is the same join.
            let existing = self.nodes.iter().position(|node| {
                node.parent == parent && std::ptr::eq(node.reflection, reflection)
            });
            let node_index = match existing {
                Some(index) => index,
                None => self.append_node(parent, reflection, owner_table, tracker)?,
            };

            if !path.nested.is_empty() {
                let nested_reflections = (reflection.target_reflections)();
                let nested_owner = self.nodes[node_index].table;
                self.add_paths(
                    Some(node_index),
                    nested_reflections,
                    nested_owner,
                    &path.nested,
                    tracker,
                )?;
            }
        }
        Ok(())
    }

    /// Append the joins and node for one reflection under `parent`.
    fn append_node(
        &mut self,
        parent: Option<usize>,
        reflection: &'static Reflection,
        owner_table: &'static str,
        tracker: &mut AliasTracker,
    ) -> Result<usize> {
        let parent_alias = match parent {
            None => self.root_alias.clone(),
            Some(p) => self.nodes[p].table_alias.clone(),
        };

        let chain = resolve_chain(reflection)?;
        let mut hop_parent = parent_alias;

        // Intermediate hops join their tables without becoming nodes; only
        // the final hop's table carries reconstructed records.
        for hop in &chain[..chain.len() - 1] {
            if hop.polymorphic_belongs_to() {
                return Err(Error::Through(ThroughError {
                    kind: ThroughErrorKind::AmbiguousSource,
                    association: reflection.name.to_string(),
                    message: format!(
                        "hop '{}' is a polymorphic belongs_to and cannot be joined",
                        hop.name
                    ),
                }));
            }
            let alias = self.join_hop(hop, &hop_parent, tracker)?;
            hop_parent = alias;
        }

        let final_hop = chain[chain.len() - 1];
        if final_hop.polymorphic_belongs_to() {
            return Err(Error::Through(ThroughError {
                kind: ThroughErrorKind::AmbiguousSource,
                association: reflection.name.to_string(),
                message: format!(
                    "source hop '{}' is a polymorphic belongs_to and cannot be joined",
                    final_hop.name
                ),
            }));
        }
        let link_alias = self.link_alias_for(final_hop, tracker);
        let preferred = format!("{}_{}", reflection.name, owner_table);
        let table_alias =
            tracker.aliased_name(final_hop.target_table, Some(&preferred));
        let predicates = hop_predicates(
            final_hop,
            &hop_parent,
            &table_alias,
            link_alias.as_deref(),
        )?;

        if let Some(link) = &link_alias {
            let join_table = final_hop.join_table.map(|jt| jt.table_name).unwrap_or("");
            self.joins
                .push(Join::left(join_table, predicates.parent_side.clone()).alias_unless_bare(link));
            if let Some(child_side) = predicates.child_side {
                self.joins.push(
                    Join::left(final_hop.target_table, child_side)
                        .alias_unless_bare(&table_alias),
                );
            }
        } else {
            self.joins.push(
                Join::left(final_hop.target_table, predicates.parent_side)
                    .alias_unless_bare(&table_alias),
            );
        }

        let index = self.nodes.len();
        self.nodes.push(JoinNode {
            reflection,
            parent,
            table: final_hop.target_table,
            table_alias,
            link_alias,
        });
        self.node_children.push(Vec::new());
        match parent {
            None => self.root_children.push(index),
            Some(p) => self.node_children[p].push(index),
        }
        Ok(index)
    }

    /// Join one intermediate chain hop, returning the alias reconstruction
    /// never reads (intermediate hops are not projected).
    fn join_hop(
        &mut self,
        hop: &'static Reflection,
        parent_alias: &str,
        tracker: &mut AliasTracker,
    ) -> Result<String> {
        let link_alias = self.link_alias_for(hop, tracker);
        let alias = tracker.aliased_name(hop.target_table, None);
        let predicates = hop_predicates(hop, parent_alias, &alias, link_alias.as_deref())?;

        if let Some(link) = &link_alias {
            let join_table = hop.join_table.map(|jt| jt.table_name).unwrap_or("");
            self.joins
                .push(Join::left(join_table, predicates.parent_side).alias_unless_bare(link));
            if let Some(child_side) = predicates.child_side {
                self.joins
                    .push(Join::left(hop.target_table, child_side).alias_unless_bare(&alias));
            }
        } else {
            self.joins
                .push(Join::left(hop.target_table, predicates.parent_side).alias_unless_bare(&alias));
        }
        Ok(alias)
    }

    fn link_alias_for(
        &self,
        reflection: &Reflection,
        tracker: &mut AliasTracker,
    ) -> Option<String> {
        match (reflection.macro_kind, reflection.join_table) {
            (MacroKind::HasAndBelongsToMany, Some(join_table)) => {
                Some(tracker.aliased_name(join_table.table_name, None))
            }
            _ => None,
        }
    }

    /// Fold flat result rows back into a graph of records.
    ///
    /// The root is deduplicated by primary key (first occurrence wins;
    /// later rows contribute only to nested collections). Children
    /// deduplicate per parent by their primary key, and attach only when
    /// the row's own key columns actually link them to that parent, which
    /// guards against the cross-product rows a multi-association eager
    /// join produces.
    pub fn instantiate(&self, rows: &[Row]) -> Result<Vec<RecordGraph>> {
        let mut arena: Vec<Built> = Vec::new();
        let mut roots: Vec<usize> = Vec::new();
        let mut root_seen: HashMap<Value, usize> = HashMap::new();
        let mut node_seen: Vec<HashMap<(usize, Value), usize>> =
            (0..self.nodes.len()).map(|_| HashMap::new()).collect();

        for row in rows {
            let Some(root_sub) = row.sub_row(&self.root_alias) else {
                return Err(Error::query(
                    String::new(),
                    format!(
                        "result row is missing '{}__*' columns; was the query built by this join dependency?",
                        self.root_alias
                    ),
                ));
            };
            let Some(root_key) = non_null(root_sub.get_by_name(self.root_primary_key)) else {
                continue;
            };

            let root_index = match root_seen.get(&root_key) {
                Some(&index) => index,
                None => {
                    let record =
                        RecordData::from_row(self.root_table, self.root_primary_key, &root_sub);
                    let index = arena.len();
                    arena.push(self.built_with_slots(record, &self.root_children));
                    root_seen.insert(root_key, index);
                    roots.push(index);
                    index
                }
            };

            // Which arena entry each node resolved to in this row.
            let mut row_slots: Vec<Option<usize>> = vec![None; self.nodes.len()];
            let mut row_subs: Vec<Option<Row>> = vec![None; self.nodes.len()];

            for (node_index, node) in self.nodes.iter().enumerate() {
                let parent_index = match node.parent {
                    None => root_index,
                    Some(p) => match row_slots[p] {
                        Some(index) => index,
                        None => continue,
                    },
                };
                let Some(sub) = row.sub_row(&node.table_alias) else {
                    continue;
                };
                let target_pk = node.reflection.target_primary_key;
                let Some(child_key) = non_null(sub.get_by_name(target_pk)) else {
                    continue;
                };

                let parent_sub = match node.parent {
                    None => Some(&root_sub),
                    Some(p) => row_subs[p].as_ref(),
                };
                if let Some(parent_sub) = parent_sub {
                    if !row_link_matches(node.reflection, parent_sub, &sub) {
                        continue;
                    }
                }

                let seen_key = (parent_index, child_key);
                let child_index = match node_seen[node_index].get(&seen_key) {
                    Some(&index) => index,
                    None => {
                        let record = RecordData::from_row(node.table, target_pk, &sub);
                        let index = arena.len();
                        arena.push(self.built_with_slots(record, &self.node_children[node_index]));
                        node_seen[node_index].insert(seen_key, index);
                        attach(&mut arena, parent_index, node.reflection, index);
                        index
                    }
                };
                row_slots[node_index] = Some(child_index);
                row_subs[node_index] = Some(sub);
            }
        }

        Ok(assemble(arena, &roots))
    }

    /// A fresh arena entry with loaded-empty slots for every child node.
    fn built_with_slots(&self, record: RecordData, children: &[usize]) -> Built {
        let mut slots = BTreeMap::new();
        for &child in children {
            let reflection = self.nodes[child].reflection;
            let slot = if reflection.is_collection() {
                Slot::Many(Vec::new())
            } else {
                Slot::One(None)
            };
            slots.insert(reflection.name, slot);
        }
        Built {
            record,
            children: slots,
        }
    }
}

struct Built {
    record: RecordData,
    children: BTreeMap<&'static str, Slot>,
}

enum Slot {
    One(Option<usize>),
    Many(Vec<usize>),
}

fn non_null(value: Option<&Value>) -> Option<Value> {
    value.filter(|v| !v.is_null()).cloned()
}

/// Does this row actually link the child to the parent? Through and
/// many-to-many nodes link via tables the projection does not carry, so
/// the SQL join is the only check available for them.
fn row_link_matches(reflection: &Reflection, parent_sub: &Row, child_sub: &Row) -> bool {
    if reflection.is_through() {
        return true;
    }
    match reflection.macro_kind {
        MacroKind::BelongsTo => {
            match (
                non_null(parent_sub.get_by_name(reflection.foreign_key)),
                non_null(child_sub.get_by_name(reflection.target_primary_key)),
            ) {
                (Some(fk), Some(pk)) => fk == pk,
                _ => false,
            }
        }
        MacroKind::HasOne | MacroKind::HasMany => {
            match (
                non_null(child_sub.get_by_name(reflection.foreign_key)),
                non_null(parent_sub.get_by_name(reflection.primary_key)),
            ) {
                (Some(fk), Some(pk)) => fk == pk,
                _ => false,
            }
        }
        MacroKind::HasAndBelongsToMany => true,
    }
}

fn attach(arena: &mut [Built], parent: usize, reflection: &Reflection, child: usize) {
    if let Some(slot) = arena[parent].children.get_mut(reflection.name) {
        match slot {
            Slot::One(existing) => {
                // Singular associations set once; later rows cannot steal.
                if existing.is_none() {
                    *existing = Some(child);
                }
            }
            Slot::Many(children) => children.push(child),
        }
    }
}

/// Convert the arena into owned graphs. Children always carry higher
/// indexes than their parents, so a reverse walk resolves every subtree
/// before its owner.
fn assemble(arena: Vec<Built>, roots: &[usize]) -> Vec<RecordGraph> {
    let mut slots: Vec<Option<Built>> = arena.into_iter().map(Some).collect();
    let mut graphs: Vec<Option<RecordGraph>> = (0..slots.len()).map(|_| None).collect();

    for index in (0..slots.len()).rev() {
        if let Some(built) = slots[index].take() {
            let mut associations = BTreeMap::new();
            for (name, slot) in built.children {
                let target = match slot {
                    Slot::One(child) => GraphTarget::One(
                        child
                            .and_then(|c| graphs[c].take())
                            .map(Box::new),
                    ),
                    Slot::Many(children) => GraphTarget::Many(
                        children
                            .into_iter()
                            .filter_map(|c| graphs[c].take())
                            .collect(),
                    ),
                };
                associations.insert(name, target);
            }
            graphs[index] = Some(RecordGraph {
                record: built.record,
                associations,
            });
        }
    }

    roots
        .iter()
        .filter_map(|&index| graphs[index].take())
        .collect()
}
