//! Per-owner association state machines.
//!
//! Each owner record carries one state entry per accessed association
//! name. An entry starts unloaded, flips to loaded once a fetch
//! (successful or empty) completes, and only an explicit reload or reset
//! returns it to unloaded. A loaded-empty target is a valid state,
//! distinct from "not yet attempted".

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use asupersync::{Cx, Outcome};
use relmap_core::reflection::reflection_or_error;
use relmap_core::{Error, MacroKind, QueryContext, Record, RecordData, Reflection, Result, Row,
    Store, TargetRegistry, Value};
use relmap_query::{owner_binding_key, AssociationScope, Dialect, Expr, GraphTarget,
    RecordGraph, Select, OWNER_KEY_ALIAS};

use crate::collection::merge_target_lists;
use crate::{try_outcome, try_result};

/// Everything a lazy load needs besides the owner: the store, the
/// dialect, the caller's scoping snapshot, the polymorphic registry, and
/// the lazy-load counter.
#[derive(Debug)]
pub struct StoreSession<'a, S: Store> {
    store: &'a S,
    dialect: Dialect,
    context: QueryContext,
    registry: Option<&'a TargetRegistry>,
    counter: LoadCounter,
}

impl<'a, S: Store> StoreSession<'a, S> {
    /// Create a session over a store with default options.
    #[must_use]
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            dialect: Dialect::default(),
            context: QueryContext::new(),
            registry: None,
            counter: LoadCounter::new(),
        }
    }

    /// Set the SQL dialect.
    #[must_use]
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Set the caller's scoping snapshot.
    #[must_use]
    pub fn with_context(mut self, context: QueryContext) -> Self {
        self.context = context;
        self
    }

    /// Provide the polymorphic target registry.
    #[must_use]
    pub fn with_registry(mut self, registry: &'a TargetRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the lazy-load counter.
    #[must_use]
    pub fn with_counter(mut self, counter: LoadCounter) -> Self {
        self.counter = counter;
        self
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &S {
        self.store
    }

    /// The SQL dialect.
    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// The caller's scoping snapshot.
    #[must_use]
    pub fn context(&self) -> &QueryContext {
        &self.context
    }

    /// The polymorphic registry, if provided.
    #[must_use]
    pub fn registry(&self) -> Option<&TargetRegistry> {
        self.registry
    }

    /// The lazy-load counter.
    #[must_use]
    pub fn counter(&self) -> &LoadCounter {
        &self.counter
    }
}

/// Counts lazy loads per (owner table, association name) and warns when a
/// loop is fetching one association record-by-record instead of
/// preloading it.
#[derive(Debug)]
pub struct LoadCounter {
    counts: Mutex<HashMap<(String, String), usize>>,
    threshold: usize,
}

impl LoadCounter {
    /// Create a counter with the default threshold (3).
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
            threshold: 3,
        }
    }

    /// Set the warning threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Record one lazy load and return the running count.
    pub fn record_load(&self, owner_table: &str, association: &str) -> usize {
        let key = (owner_table.to_string(), association.to_string());
        let count = match self.counts.lock() {
            Ok(mut counts) => {
                let entry = counts.entry(key).or_insert(0);
                *entry += 1;
                *entry
            }
            Err(poisoned) => {
                // Recover the map; a poisoned counter must not take the
                // load path down with it.
                let mut counts = poisoned.into_inner();
                let entry = counts.entry(key).or_insert(0);
                *entry += 1;
                *entry
            }
        };
        if count == self.threshold {
            tracing::warn!(
                owner_table,
                association,
                count,
                "association loaded record-by-record; preload it to avoid N+1 queries"
            );
        }
        count
    }

    /// The running count for one (owner table, association) pair.
    #[must_use]
    pub fn count(&self, owner_table: &str, association: &str) -> usize {
        let key = (owner_table.to_string(), association.to_string());
        match self.counts.lock() {
            Ok(counts) => counts.get(&key).copied().unwrap_or(0),
            Err(poisoned) => poisoned.into_inner().get(&key).copied().unwrap_or(0),
        }
    }
}

impl Default for LoadCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a singular association (`belongs_to`, `has_one`).
#[derive(Debug, Clone, Default)]
pub struct SingularState {
    pub loaded: bool,
    pub target: Option<Box<RecordObject>>,
}

/// State of a collection association (`has_many`,
/// `has_and_belongs_to_many`).
#[derive(Debug, Clone, Default)]
pub struct CollectionState {
    pub loaded: bool,
    pub target: Vec<RecordObject>,
}

/// One association's runtime state.
#[derive(Debug, Clone)]
pub enum AssociationEntry {
    Singular(SingularState),
    Collection(CollectionState),
}

impl AssociationEntry {
    fn for_reflection(reflection: &Reflection) -> Self {
        if reflection.is_collection() {
            AssociationEntry::Collection(CollectionState::default())
        } else {
            AssociationEntry::Singular(SingularState::default())
        }
    }

    /// Has this association completed a fetch (or attachment)?
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        match self {
            AssociationEntry::Singular(state) => state.loaded,
            AssociationEntry::Collection(state) => state.loaded,
        }
    }

    /// Return to the unloaded state, clearing the target.
    pub fn reset(&mut self) {
        match self {
            AssociationEntry::Singular(state) => {
                state.loaded = false;
                state.target = None;
            }
            AssociationEntry::Collection(state) => {
                state.loaded = false;
                state.target.clear();
            }
        }
    }
}

/// A record plus its per-name association state.
#[derive(Debug, Clone)]
pub struct RecordObject {
    data: RecordData,
    reflections: &'static [Reflection],
    associations: BTreeMap<&'static str, AssociationEntry>,
}

impl RecordObject {
    /// Wrap a typed record.
    #[must_use]
    pub fn from_record<T: Record>(record: &T) -> Self {
        Self {
            data: RecordData::from_record(record),
            reflections: T::REFLECTIONS,
            associations: BTreeMap::new(),
        }
    }

    /// Wrap dynamic record data with its reflections.
    #[must_use]
    pub fn from_data(data: RecordData, reflections: &'static [Reflection]) -> Self {
        Self {
            data,
            reflections,
            associations: BTreeMap::new(),
        }
    }

    /// Adopt a reconstructed graph: every association the eager join
    /// resolved becomes a loaded entry (including loaded-empty ones), so a
    /// later lazy read issues no redundant query.
    #[must_use]
    pub fn from_graph(graph: RecordGraph, reflections: &'static [Reflection]) -> Self {
        let mut object = Self::from_data(graph.record, reflections);
        for (name, target) in graph.associations {
            let Some(reflection) = reflections.iter().find(|r| r.name == name) else {
                continue;
            };
            let nested = (reflection.target_reflections)();
            let entry = match target {
                GraphTarget::One(child) => AssociationEntry::Singular(SingularState {
                    loaded: true,
                    target: child.map(|c| Box::new(Self::from_graph(*c, nested))),
                }),
                GraphTarget::Many(children) => AssociationEntry::Collection(CollectionState {
                    loaded: true,
                    target: children
                        .into_iter()
                        .map(|c| Self::from_graph(c, nested))
                        .collect(),
                }),
            };
            object.associations.insert(reflection.name, entry);
        }
        object
    }

    /// The record's attributes.
    #[must_use]
    pub fn data(&self) -> &RecordData {
        &self.data
    }

    /// Mutable access to the record's attributes.
    pub fn data_mut(&mut self) -> &mut RecordData {
        &mut self.data
    }

    /// The record's reflections.
    #[must_use]
    pub fn reflections(&self) -> &'static [Reflection] {
        self.reflections
    }

    /// Resolve an association name, with a closest-name suggestion on
    /// failure.
    #[allow(clippy::result_large_err)]
    pub fn reflection(&self, name: &str) -> Result<&'static Reflection> {
        let reflections: &'static [Reflection] = self.reflections;
        reflection_or_error(reflections, self.data.table(), name)
    }

    /// The association entry for a name, created unloaded on first access.
    #[allow(clippy::result_large_err)]
    pub fn association(&mut self, name: &str) -> Result<&mut AssociationEntry> {
        let reflection = self.reflection(name)?;
        Ok(self
            .associations
            .entry(reflection.name)
            .or_insert_with(|| AssociationEntry::for_reflection(reflection)))
    }

    /// Has the named association completed a fetch? False when never
    /// accessed.
    #[must_use]
    pub fn association_loaded(&self, name: &str) -> bool {
        self.associations
            .get(name)
            .is_some_and(AssociationEntry::is_loaded)
    }

    /// The loaded collection target, if this association is a loaded
    /// collection.
    #[must_use]
    pub fn collection_target(&self, name: &str) -> Option<&[RecordObject]> {
        match self.associations.get(name) {
            Some(AssociationEntry::Collection(state)) if state.loaded => {
                Some(state.target.as_slice())
            }
            _ => None,
        }
    }

    /// The loaded singular target, if this association is loaded.
    /// `Some(None)` is a loaded-null target.
    #[must_use]
    pub fn singular_target(&self, name: &str) -> Option<Option<&RecordObject>> {
        match self.associations.get(name) {
            Some(AssociationEntry::Singular(state)) if state.loaded => {
                Some(state.target.as_deref())
            }
            _ => None,
        }
    }

    /// Reset one association to unloaded, clearing its target.
    #[allow(clippy::result_large_err)]
    pub fn reset_association(&mut self, name: &str) -> Result<()> {
        self.association(name)?.reset();
        Ok(())
    }

    /// Attach a fetched singular target, marking the association loaded.
    pub fn attach_one(&mut self, reflection: &'static Reflection, target: Option<RecordObject>) {
        let entry = self
            .associations
            .entry(reflection.name)
            .or_insert_with(|| AssociationEntry::for_reflection(reflection));
        if let AssociationEntry::Singular(state) = entry {
            state.target = target.map(Box::new);
            state.loaded = true;
        }
    }

    /// Attach fetched collection rows, merging them with any in-memory
    /// records already held, and mark the association loaded.
    pub fn attach_many(&mut self, reflection: &'static Reflection, fetched: Vec<RecordObject>) {
        let entry = self
            .associations
            .entry(reflection.name)
            .or_insert_with(|| AssociationEntry::for_reflection(reflection));
        if let AssociationEntry::Collection(state) = entry {
            let memory = std::mem::take(&mut state.target);
            state.target = merge_target_lists(memory, fetched);
            state.loaded = true;
        }
    }

    /// Read a singular association, fetching on first access.
    ///
    /// A null foreign key resolves to a loaded-null target without a
    /// query. An owner whose own key is gone (deleted underneath, or
    /// never persisted) resets the association to unloaded instead of
    /// raising.
    pub async fn read_one<S: Store>(
        &mut self,
        cx: &Cx,
        session: &StoreSession<'_, S>,
        name: &str,
    ) -> Outcome<Option<&RecordObject>, Error> {
        let reflection = try_result!(self.reflection(name));
        if reflection.is_collection() {
            return Outcome::Err(Error::configuration(format!(
                "association '{}' on '{}' is a collection; read it with read_many",
                name,
                self.data.table()
            )));
        }

        if !self.association_loaded(name) {
            session
                .counter()
                .record_load(self.data.table(), reflection.name);
            let fetched = try_outcome!(self.fetch_one(cx, session, reflection).await);
            match fetched {
                FetchedOne::Target(target) => self.attach_one(reflection, target),
                FetchedOne::OwnerGone => {
                    try_result!(self.reset_association(name));
                    return Outcome::Ok(None);
                }
            }
        }

        Outcome::Ok(self.singular_target(name).flatten())
    }

    /// Read a collection association, fetching on first access. Fetched
    /// rows merge with in-memory records per the target-list merge law.
    pub async fn read_many<S: Store>(
        &mut self,
        cx: &Cx,
        session: &StoreSession<'_, S>,
        name: &str,
    ) -> Outcome<&[RecordObject], Error> {
        let reflection = try_result!(self.reflection(name));
        if !reflection.is_collection() {
            return Outcome::Err(Error::configuration(format!(
                "association '{}' on '{}' is singular; read it with read_one",
                name,
                self.data.table()
            )));
        }

        if !self.association_loaded(name) {
            session
                .counter()
                .record_load(self.data.table(), reflection.name);
            match owner_binding_key(reflection, &self.data) {
                None => {
                    // Owner identity gone: stay unloaded, read as empty.
                    try_result!(self.reset_association(name));
                    return Outcome::Ok(&[]);
                }
                Some(key) => {
                    let scope = AssociationScope::new(session.dialect());
                    let resolved = try_result!(scope.for_owner_keys(
                        reflection,
                        &[key],
                        session.context()
                    ));
                    let (sql, params) = resolved.select.build_with_dialect(session.dialect());
                    tracing::debug!(association = reflection.name, %sql, "lazy collection load");
                    let rows = try_outcome!(session.store().query(cx, &sql, &params).await);
                    let targets = try_result!(collection_targets(reflection, rows));
                    self.attach_many(reflection, targets);
                }
            }
        }

        match self.collection_target(name) {
            Some(target) => Outcome::Ok(target),
            None => Outcome::Ok(&[]),
        }
    }

    /// Force a refetch: reset, then read.
    pub async fn reload_many<S: Store>(
        &mut self,
        cx: &Cx,
        session: &StoreSession<'_, S>,
        name: &str,
    ) -> Outcome<&[RecordObject], Error> {
        try_result!(self.reset_association(name));
        self.read_many(cx, session, name).await
    }

    /// Force a refetch of a singular association.
    pub async fn reload_one<S: Store>(
        &mut self,
        cx: &Cx,
        session: &StoreSession<'_, S>,
        name: &str,
    ) -> Outcome<Option<&RecordObject>, Error> {
        try_result!(self.reset_association(name));
        self.read_one(cx, session, name).await
    }

    async fn fetch_one<S: Store>(
        &self,
        cx: &Cx,
        session: &StoreSession<'_, S>,
        reflection: &'static Reflection,
    ) -> Outcome<FetchedOne, Error> {
        if reflection.polymorphic_belongs_to() {
            return self.fetch_polymorphic_one(cx, session, reflection).await;
        }

        let Some(key) = owner_binding_key(reflection, &self.data) else {
            return match reflection.macro_kind {
                // A null foreign key is a loaded-null target.
                MacroKind::BelongsTo => Outcome::Ok(FetchedOne::Target(None)),
                // A has_one whose owner key is gone cannot be fetched.
                _ => Outcome::Ok(FetchedOne::OwnerGone),
            };
        };

        let scope = AssociationScope::new(session.dialect());
        let resolved =
            try_result!(scope.for_owner_keys(reflection, &[key], session.context()));
        let (sql, params) = resolved.select.build_with_dialect(session.dialect());
        tracing::debug!(association = reflection.name, %sql, "lazy singular load");
        let row = try_outcome!(session.store().query_one(cx, &sql, &params).await);

        let chain = try_result!(relmap_core::resolve_chain(reflection));
        let final_hop = chain[chain.len() - 1];
        Outcome::Ok(FetchedOne::Target(row.map(|row| {
            RecordObject::from_data(
                target_data(final_hop.target_table, final_hop.target_primary_key, &row),
                (reflection.target_reflections)(),
            )
        })))
    }

    async fn fetch_polymorphic_one<S: Store>(
        &self,
        cx: &Cx,
        session: &StoreSession<'_, S>,
        reflection: &'static Reflection,
    ) -> Outcome<FetchedOne, Error> {
        let discriminator = reflection.discriminator_column().unwrap_or_default();
        let type_name = self
            .data
            .get(&discriminator)
            .and_then(Value::as_str)
            .map(str::to_string);
        let fk = self
            .data
            .get(reflection.foreign_key)
            .filter(|v| !v.is_null())
            .cloned();

        let (Some(type_name), Some(fk)) = (type_name, fk) else {
            return Outcome::Ok(FetchedOne::Target(None));
        };

        let registry = try_result!(session.registry().ok_or_else(|| {
            Error::configuration(format!(
                "association '{}' on '{}' is polymorphic; a TargetRegistry is required",
                reflection.name,
                self.data.table()
            ))
        }));
        let meta = try_result!(registry.lookup_or_error(&type_name));

        let (sql, params) = Select::new(meta.table)
            .column(format!("{}.*", meta.table))
            .filter(Expr::qualified(meta.table, meta.primary_key).eq(Expr::lit(fk)))
            .build_with_dialect(session.dialect());
        tracing::debug!(association = reflection.name, %sql, "lazy polymorphic load");
        let row = try_outcome!(session.store().query_one(cx, &sql, &params).await);

        Outcome::Ok(FetchedOne::Target(row.map(|row| {
            RecordObject::from_data(
                RecordData::from_row(meta.table, meta.primary_key, &row),
                meta.reflections,
            )
        })))
    }
}

enum FetchedOne {
    Target(Option<RecordObject>),
    OwnerGone,
}

/// Convert fetched rows into target objects for a collection reflection.
#[allow(clippy::result_large_err)]
pub(crate) fn collection_targets(
    reflection: &'static Reflection,
    rows: Vec<Row>,
) -> Result<Vec<RecordObject>> {
    let chain = relmap_core::resolve_chain(reflection)?;
    let final_hop = chain[chain.len() - 1];
    Ok(rows
        .into_iter()
        .map(|row| {
            RecordObject::from_data(
                target_data(final_hop.target_table, final_hop.target_primary_key, &row),
                (reflection.target_reflections)(),
            )
        })
        .collect())
}

/// Build a target's record data from a fetched row, dropping the injected
/// owner-key projection so it never masquerades as an attribute.
pub(crate) fn target_data(table: &str, primary_key: &str, row: &Row) -> RecordData {
    if !row.contains_column(OWNER_KEY_ALIAS) {
        return RecordData::from_row(table, primary_key, row);
    }
    let pairs: Vec<(&str, Value)> = row
        .iter()
        .filter(|(name, _)| *name != OWNER_KEY_ALIAS)
        .map(|(name, value)| (name, value.clone()))
        .collect();
    RecordData::from_row(table, primary_key, &Row::from_pairs(pairs))
}
