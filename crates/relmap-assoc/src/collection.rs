//! Collection mutation and the target-list merge.
//!
//! `merge_target_lists` reconciles a collection's in-memory records
//! (possibly edited, possibly unsaved) with a freshly fetched persisted
//! list. `add`/`remove`/`replace` mutate the collection through the store,
//! honoring the reflection's dependent policy and the through-chain
//! mutation rules.

use asupersync::{Cx, Outcome};
use relmap_core::{resolve_chain, Dependent, Error, MacroKind, NotPersistedError, Reflection,
    ReplaceError, Result, Store, TypeMismatchError, Value};
use relmap_query::{AssociationScope, Dialect};

use crate::runtime::{AssociationEntry, RecordObject, StoreSession};
use crate::{try_outcome, try_result};

/// Merge a collection's in-memory records with a freshly fetched
/// persisted list.
///
/// The result contains no duplicate logical records and preserves the
/// persisted list's relative order. A record present in both lists keeps
/// the in-memory copy's touched attributes and fills every untouched
/// attribute from the persisted copy. In-memory-only records (unsaved
/// additions) append after the persisted-ordered prefix.
#[must_use]
pub fn merge_target_lists(
    mut memory: Vec<RecordObject>,
    persisted: Vec<RecordObject>,
) -> Vec<RecordObject> {
    let mut merged = Vec::with_capacity(persisted.len() + memory.len());
    for fresh in persisted {
        let held = memory
            .iter()
            .position(|m| m.data().same_record(fresh.data()));
        match held {
            Some(index) => {
                let mut kept = memory.remove(index);
                kept.data_mut().merge_persisted(fresh.data());
                merged.push(kept);
            }
            None => merged.push(fresh),
        }
    }
    merged.append(&mut memory);
    merged
}

/// How a collection mutation reaches the database.
#[derive(Debug, Clone)]
enum MutationLink {
    /// The target table holds the foreign key.
    Direct {
        target_table: &'static str,
        target_pk: &'static str,
        foreign_key: &'static str,
        discriminator: Option<(String, &'static str)>,
    },
    /// Owner and target link through a join table.
    JoinTable {
        table: &'static str,
        owner_column: &'static str,
        target_column: &'static str,
        target_table: &'static str,
        target_pk: &'static str,
    },
    /// Single-indirection through association: rows are written to the
    /// intermediate table.
    Through {
        table: &'static str,
        owner_fk: &'static str,
        source_fk: &'static str,
        discriminator: Option<(String, &'static str)>,
        target_table: &'static str,
        target_pk: &'static str,
    },
}

impl MutationLink {
    #[allow(clippy::result_large_err)]
    fn resolve(reflection: &'static Reflection) -> Result<Self> {
        AssociationScope::mutation_permitted(reflection)?;

        if reflection.is_through() {
            let chain = resolve_chain(reflection)?;
            let through_hop = chain[0];
            let source = chain[1];
            return Ok(MutationLink::Through {
                table: through_hop.target_table,
                owner_fk: through_hop.foreign_key,
                source_fk: source.foreign_key,
                discriminator: through_hop
                    .discriminator_column()
                    .map(|column| (column, through_hop.owner_type)),
                target_table: source.target_table,
                target_pk: source.target_primary_key,
            });
        }

        match reflection.macro_kind {
            MacroKind::HasAndBelongsToMany => {
                let join_table = reflection.join_table.ok_or_else(|| {
                    Error::configuration(format!(
                        "association '{}' on '{}' is many-to-many but declares no join table",
                        reflection.name, reflection.owner_table
                    ))
                })?;
                Ok(MutationLink::JoinTable {
                    table: join_table.table_name,
                    owner_column: join_table.owner_column,
                    target_column: join_table.target_column,
                    target_table: reflection.target_table,
                    target_pk: reflection.target_primary_key,
                })
            }
            _ => Ok(MutationLink::Direct {
                target_table: reflection.target_table,
                target_pk: reflection.target_primary_key,
                foreign_key: reflection.foreign_key,
                discriminator: reflection
                    .discriminator_column()
                    .map(|column| (column, reflection.owner_type)),
            }),
        }
    }

    fn target_table(&self) -> &'static str {
        match self {
            MutationLink::Direct { target_table, .. }
            | MutationLink::JoinTable { target_table, .. }
            | MutationLink::Through { target_table, .. } => target_table,
        }
    }
}

impl RecordObject {
    /// Add records to a collection association.
    ///
    /// Forces a load first so the merge has both sides, persists each
    /// record's membership (insert or foreign-key update), and appends to
    /// the in-memory target if absent.
    pub async fn add_records<S: Store>(
        &mut self,
        cx: &Cx,
        session: &StoreSession<'_, S>,
        name: &str,
        records: Vec<RecordObject>,
    ) -> Outcome<(), Error> {
        let (reflection, link, owner_key) =
            try_result!(self.prepare_mutation(name));
        try_outcome!(self.read_many(cx, session, name).await);

        for record in records {
            try_result!(check_type(reflection, &link, &record));
            let record =
                try_outcome!(persist_addition(cx, session, &link, &owner_key, record).await);
            let entry = try_result!(self.association(name));
            if let AssociationEntry::Collection(state) = entry {
                let present = state
                    .target
                    .iter()
                    .any(|held| held.data().same_record(record.data()));
                if !present {
                    state.target.push(record);
                }
            }
        }
        Outcome::Ok(())
    }

    /// Remove records from a collection association, applying the
    /// reflection's dependent policy to persisted members.
    pub async fn remove_records<S: Store>(
        &mut self,
        cx: &Cx,
        session: &StoreSession<'_, S>,
        name: &str,
        records: &[RecordObject],
    ) -> Outcome<(), Error> {
        let (reflection, link, owner_key) =
            try_result!(self.prepare_mutation(name));
        try_outcome!(self.read_many(cx, session, name).await);

        for record in records {
            let Some(record_key) = record.data().key().cloned() else {
                continue;
            };
            try_outcome!(
                persist_removal(
                    cx,
                    session,
                    &link,
                    reflection.dependent,
                    &owner_key,
                    &record_key
                )
                .await
            );
            let entry = try_result!(self.association(name));
            if let AssociationEntry::Collection(state) = entry {
                state
                    .target
                    .retain(|held| !held.data().same_record(record.data()));
            }
        }
        Outcome::Ok(())
    }

    /// Replace the collection with a new set: a three-way diff against the
    /// loaded target. Records only in the current target are removed per
    /// the dependent policy, records only in the new set are added. If any
    /// addition fails to persist, the in-memory target rolls back to its
    /// pre-replace snapshot and one aggregate error names the failures.
    pub async fn replace_records<S: Store>(
        &mut self,
        cx: &Cx,
        session: &StoreSession<'_, S>,
        name: &str,
        new_set: Vec<RecordObject>,
    ) -> Outcome<(), Error> {
        let (reflection, link, owner_key) =
            try_result!(self.prepare_mutation(name));
        try_outcome!(self.read_many(cx, session, name).await);

        let current: Vec<RecordObject> = match try_result!(self.association(name)) {
            AssociationEntry::Collection(state) => state.target.clone(),
            AssociationEntry::Singular(_) => Vec::new(),
        };

        // Departures first: current members with no counterpart in the new
        // set leave per the dependent policy.
        for held in &current {
            let stays = new_set
                .iter()
                .any(|incoming| incoming.data().same_record(held.data()));
            if stays {
                continue;
            }
            if let Some(record_key) = held.data().key().cloned() {
                try_outcome!(
                    persist_removal(
                        cx,
                        session,
                        &link,
                        reflection.dependent,
                        &owner_key,
                        &record_key
                    )
                    .await
                );
            }
        }

        let mut replacement = Vec::with_capacity(new_set.len());
        let mut failed: Vec<Value> = Vec::new();
        for incoming in new_set {
            let existing = current
                .iter()
                .find(|held| held.data().same_record(incoming.data()));
            if let Some(held) = existing {
                replacement.push(held.clone());
                continue;
            }
            try_result!(check_type(reflection, &link, &incoming));
            let incoming_key = incoming
                .data()
                .key()
                .cloned()
                .unwrap_or(Value::Null);
            match persist_addition(cx, session, &link, &owner_key, incoming).await {
                Outcome::Ok(record) => replacement.push(record),
                Outcome::Err(error) => {
                    tracing::debug!(association = name, %error, "replace addition failed");
                    failed.push(incoming_key);
                }
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        let entry = try_result!(self.association(name));
        if let AssociationEntry::Collection(state) = entry {
            if failed.is_empty() {
                state.target = replacement;
                state.loaded = true;
            } else {
                // The pre-replace target stays in place.
                state.target = current;
                state.loaded = true;
                return Outcome::Err(Error::Replace(ReplaceError {
                    association: name.to_string(),
                    failed,
                }));
            }
        }
        Outcome::Ok(())
    }

    /// Shared mutation preamble: resolve the reflection, check it is a
    /// mutable collection, and demand a persisted owner.
    #[allow(clippy::result_large_err)]
    fn prepare_mutation(
        &self,
        name: &str,
    ) -> Result<(&'static Reflection, MutationLink, Value)> {
        let reflection = self.reflection(name)?;
        if !reflection.is_collection() {
            return Err(Error::configuration(format!(
                "association '{}' on '{}' is singular and cannot be mutated as a collection",
                name,
                self.data().table()
            )));
        }
        let link = MutationLink::resolve(reflection)?;
        let owner_key = self.data().key().cloned().ok_or_else(|| {
            Error::NotPersisted(NotPersistedError {
                owner_table: self.data().table().to_string(),
                association: name.to_string(),
            })
        })?;
        Ok((reflection, link, owner_key))
    }
}

#[allow(clippy::result_large_err)]
fn check_type(
    reflection: &Reflection,
    link: &MutationLink,
    record: &RecordObject,
) -> Result<()> {
    let expected = link.target_table();
    if record.data().table() != expected {
        return Err(Error::TypeMismatch(TypeMismatchError {
            expected_table: expected.to_string(),
            actual_table: record.data().table().to_string(),
            association: reflection.name.to_string(),
        }));
    }
    Ok(())
}

/// Persist one record's membership in the collection. Returns the record
/// with its key assigned when an insert produced one.
async fn persist_addition<S: Store>(
    cx: &Cx,
    session: &StoreSession<'_, S>,
    link: &MutationLink,
    owner_key: &Value,
    mut record: RecordObject,
) -> Outcome<RecordObject, Error> {
    let dialect = session.dialect();
    match link {
        MutationLink::Direct {
            target_table,
            target_pk,
            foreign_key,
            discriminator,
        } => {
            record.data_mut().set(*foreign_key, owner_key.clone());
            if let Some((column, owner_type)) = discriminator {
                record
                    .data_mut()
                    .set(column.clone(), Value::Text((*owner_type).to_string()));
            }
            if record.data().is_new() {
                let id = try_outcome!(
                    insert_record(cx, session, target_table, target_pk, &record).await
                );
                record.data_mut().assign_key(id);
            } else {
                let mut sets = vec![((*foreign_key).to_string(), owner_key.clone())];
                if let Some((column, owner_type)) = discriminator {
                    sets.push((column.clone(), Value::Text((*owner_type).to_string())));
                }
                let record_key = record.data().key().cloned().unwrap_or(Value::Null);
                let (sql, params) =
                    update_sql(dialect, target_table, &sets, target_pk, &record_key);
                try_outcome!(session.store().execute(cx, &sql, &params).await);
            }
            record.data_mut().clear_touched();
            Outcome::Ok(record)
        }
        MutationLink::JoinTable {
            table,
            owner_column,
            target_column,
            target_table,
            target_pk,
        } => {
            if record.data().is_new() {
                let id = try_outcome!(
                    insert_record(cx, session, target_table, target_pk, &record).await
                );
                record.data_mut().assign_key(id);
            }
            let record_key = record.data().key().cloned().unwrap_or(Value::Null);
            let (sql, params) = insert_sql(
                dialect,
                table,
                &[
                    ((*owner_column).to_string(), owner_key.clone()),
                    ((*target_column).to_string(), record_key),
                ],
            );
            try_outcome!(session.store().execute(cx, &sql, &params).await);
            Outcome::Ok(record)
        }
        MutationLink::Through {
            table,
            owner_fk,
            source_fk,
            discriminator,
            ..
        } => {
            // Writing the intermediate row needs the target's key; an
            // unsaved target has none to write.
            let Some(record_key) = record.data().key().cloned() else {
                return Outcome::Err(Error::NotPersisted(NotPersistedError {
                    owner_table: record.data().table().to_string(),
                    association: table.to_string(),
                }));
            };
            let mut pairs = vec![
                ((*owner_fk).to_string(), owner_key.clone()),
                ((*source_fk).to_string(), record_key),
            ];
            if let Some((column, owner_type)) = discriminator {
                pairs.push((column.clone(), Value::Text((*owner_type).to_string())));
            }
            let (sql, params) = insert_sql(dialect, table, &pairs);
            try_outcome!(session.store().execute(cx, &sql, &params).await);
            Outcome::Ok(record)
        }
    }
}

/// Persist one record's departure from the collection.
async fn persist_removal<S: Store>(
    cx: &Cx,
    session: &StoreSession<'_, S>,
    link: &MutationLink,
    dependent: Dependent,
    owner_key: &Value,
    record_key: &Value,
) -> Outcome<(), Error> {
    let dialect = session.dialect();
    let (sql, params) = match link {
        MutationLink::JoinTable {
            table,
            owner_column,
            target_column,
            ..
        } => delete_sql(
            dialect,
            table,
            &[
                ((*owner_column).to_string(), owner_key.clone()),
                ((*target_column).to_string(), record_key.clone()),
            ],
        ),
        MutationLink::Through {
            table,
            owner_fk,
            source_fk,
            ..
        } => delete_sql(
            dialect,
            table,
            &[
                ((*owner_fk).to_string(), owner_key.clone()),
                ((*source_fk).to_string(), record_key.clone()),
            ],
        ),
        MutationLink::Direct {
            target_table,
            target_pk,
            foreign_key,
            discriminator,
        } => match dependent {
            Dependent::Delete | Dependent::Destroy => delete_sql(
                dialect,
                target_table,
                &[((*target_pk).to_string(), record_key.clone())],
            ),
            Dependent::Nullify | Dependent::Detach => {
                let mut sets = vec![((*foreign_key).to_string(), Value::Null)];
                if let Some((column, _)) = discriminator {
                    sets.push((column.clone(), Value::Null));
                }
                update_sql(dialect, target_table, &sets, target_pk, record_key)
            }
        },
    };
    try_outcome!(session.store().execute(cx, &sql, &params).await);
    Outcome::Ok(())
}

/// INSERT a record's attributes, skipping an unassigned primary key.
async fn insert_record<S: Store>(
    cx: &Cx,
    session: &StoreSession<'_, S>,
    table: &str,
    primary_key: &str,
    record: &RecordObject,
) -> Outcome<i64, Error> {
    let row = record.data().to_row();
    let pairs: Vec<(String, Value)> = row
        .iter()
        .filter(|(name, value)| !(*name == primary_key && value.is_null()))
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect();
    let (sql, params) = insert_sql(session.dialect(), table, &pairs);
    tracing::debug!(table, %sql, "insert collection member");
    session.store().insert(cx, &sql, &params).await
}

fn insert_sql(dialect: Dialect, table: &str, pairs: &[(String, Value)]) -> (String, Vec<Value>) {
    let columns: Vec<&str> = pairs.iter().map(|(name, _)| name.as_str()).collect();
    let placeholders: Vec<String> = (1..=pairs.len())
        .map(|index| dialect.placeholder(index))
        .collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    );
    let params = pairs.iter().map(|(_, value)| value.clone()).collect();
    (sql, params)
}

fn update_sql(
    dialect: Dialect,
    table: &str,
    sets: &[(String, Value)],
    key_column: &str,
    key: &Value,
) -> (String, Vec<Value>) {
    let mut params: Vec<Value> = Vec::with_capacity(sets.len() + 1);
    let assignments: Vec<String> = sets
        .iter()
        .enumerate()
        .map(|(index, (name, value))| {
            params.push(value.clone());
            format!("{} = {}", name, dialect.placeholder(index + 1))
        })
        .collect();
    params.push(key.clone());
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = {}",
        table,
        assignments.join(", "),
        key_column,
        dialect.placeholder(params.len())
    );
    (sql, params)
}

fn delete_sql(dialect: Dialect, table: &str, conditions: &[(String, Value)]) -> (String, Vec<Value>) {
    let mut params: Vec<Value> = Vec::with_capacity(conditions.len());
    let predicates: Vec<String> = conditions
        .iter()
        .enumerate()
        .map(|(index, (name, value))| {
            params.push(value.clone());
            format!("{} = {}", name, dialect.placeholder(index + 1))
        })
        .collect();
    let sql = format!(
        "DELETE FROM {} WHERE {}",
        table,
        predicates.join(" AND ")
    );
    (sql, params)
}
