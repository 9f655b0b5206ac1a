//! Batch association preloading: the N+1 defense.
//!
//! Given a set of already-loaded owners and a (possibly nested) set of
//! association names, the preloader issues one query per distinct
//! (reflection, concrete target) group and attaches results onto each
//! owner's association state. Polymorphic owners split into one group per
//! concrete target type, resolved through the session's `TargetRegistry`.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

use asupersync::{Cx, Outcome};
use relmap_core::{resolve_chain, Error, RecordData, Reflection, Store, Value};
use relmap_query::{owner_binding_key, AssociationScope, Expr, IncludePath, Select};

use crate::runtime::{target_data, AssociationEntry, RecordObject, StoreSession};
use crate::{try_outcome, try_result};

/// What one preload call did: group and query counts, for tests and
/// tracing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreloadReport {
    /// Distinct (reflection, concrete target) groups encountered.
    pub groups: usize,
    /// Queries actually issued (loaded groups and keyless owners skip).
    pub queries: usize,
}

/// Batch loader over one store session.
#[derive(Debug)]
pub struct Preloader<'a, S: Store> {
    session: &'a StoreSession<'a, S>,
}

/// How one preload group finds its target rows.
enum GroupTarget {
    /// The reflection names a static target table.
    Static,
    /// Polymorphic belongs_to: the discriminator value names the target
    /// type (empty when the owner's discriminator is null).
    Polymorphic(String),
}

struct PreloadGroup {
    reflection: &'static Reflection,
    target: GroupTarget,
    owner_indexes: Vec<usize>,
}

impl<'a, S: Store> Preloader<'a, S> {
    /// Create a preloader over a session.
    #[must_use]
    pub fn new(session: &'a StoreSession<'a, S>) -> Self {
        Self { session }
    }

    /// Preload the given association paths for every owner.
    ///
    /// Issues at most one query per distinct (reflection, target) group
    /// per path level, regardless of the owner count. Owners already
    /// loaded for a name are left untouched; a group in which every owner
    /// is loaded issues no query at all. Nested paths recurse over the
    /// freshly attached targets.
    pub async fn preload(
        &self,
        cx: &Cx,
        owners: &mut [RecordObject],
        paths: &[IncludePath],
    ) -> Outcome<PreloadReport, Error> {
        let mut report = PreloadReport::default();
        if owners.is_empty() {
            return Outcome::Ok(report);
        }
        let owner_refs: Vec<&mut RecordObject> = owners.iter_mut().collect();
        try_outcome!(self.preload_level(cx, owner_refs, paths, &mut report).await);
        Outcome::Ok(report)
    }

    fn preload_level<'o>(
        &'o self,
        cx: &'o Cx,
        owners: Vec<&'o mut RecordObject>,
        paths: &'o [IncludePath],
        report: &'o mut PreloadReport,
    ) -> Pin<Box<dyn Future<Output = Outcome<(), Error>> + Send + 'o>> {
        Box::pin(async move {
            let mut owners = owners;
            for path in paths {
                let groups = try_result!(build_groups(&owners, path.name));
                report.groups += groups.len();

                for group in &groups {
                    try_outcome!(self.load_group(cx, &mut owners, path.name, group, report).await);
                }

                if !path.nested.is_empty() {
                    let mut children: Vec<&mut RecordObject> = Vec::new();
                    for owner in owners.iter_mut() {
                        if let Ok(entry) = owner.association(path.name) {
                            match entry {
                                AssociationEntry::Collection(state) => {
                                    children.extend(state.target.iter_mut());
                                }
                                AssociationEntry::Singular(state) => {
                                    if let Some(target) = state.target.as_deref_mut() {
                                        children.push(target);
                                    }
                                }
                            }
                        }
                    }
                    if !children.is_empty() {
                        try_outcome!(
                            self.preload_level(cx, children, &path.nested, report).await
                        );
                    }
                }
            }
            Outcome::Ok(())
        })
    }

    /// Issue (at most) one query for a group and attach its rows.
    async fn load_group(
        &self,
        cx: &Cx,
        owners: &mut Vec<&mut RecordObject>,
        name: &str,
        group: &PreloadGroup,
        report: &mut PreloadReport,
    ) -> Outcome<(), Error> {
        let reflection = group.reflection;

        // Idempotent preload: a fully loaded group issues nothing.
        if group
            .owner_indexes
            .iter()
            .all(|&i| owners[i].association_loaded(name))
        {
            return Outcome::Ok(());
        }

        let mut keys: Vec<Value> = Vec::new();
        let mut seen: HashSet<Value> = HashSet::new();
        for &i in &group.owner_indexes {
            if owners[i].association_loaded(name) {
                continue;
            }
            if let Some(key) = group_binding_key(reflection, owners[i].data(), &group.target) {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }

        let plan = match &group.target {
            GroupTarget::Polymorphic(type_name) if type_name.is_empty() => None,
            GroupTarget::Polymorphic(type_name) => {
                let registry = try_result!(self.session.registry().ok_or_else(|| {
                    Error::configuration(format!(
                        "association '{}' is polymorphic; a TargetRegistry is required to preload it",
                        reflection.name
                    ))
                }));
                let meta = try_result!(registry.lookup_or_error(type_name));
                let select = Select::new(meta.table)
                    .column(format!("{}.*", meta.table))
                    .filter(in_keys(
                        Expr::qualified(meta.table, meta.primary_key),
                        &keys,
                    ));
                Some((select, meta.primary_key.to_string(), meta.table, meta.primary_key, meta.reflections))
            }
            GroupTarget::Static => {
                let scope = AssociationScope::new(self.session.dialect());
                let resolved = try_result!(scope.for_owner_keys(
                    reflection,
                    &keys,
                    self.session.context()
                ));
                let chain = try_result!(resolve_chain(reflection));
                let final_hop = chain[chain.len() - 1];
                Some((
                    resolved.select,
                    resolved.partition_column,
                    final_hop.target_table,
                    final_hop.target_primary_key,
                    (reflection.target_reflections)(),
                ))
            }
        };

        let mut buckets: HashMap<Value, Vec<RecordObject>> = HashMap::new();
        if let Some((select, partition_column, target_table, target_pk, reflections)) = plan {
            if !keys.is_empty() {
                let (sql, params) = select.build_with_dialect(self.session.dialect());
                tracing::debug!(
                    association = reflection.name,
                    owners = group.owner_indexes.len(),
                    keys = keys.len(),
                    %sql,
                    "preload group"
                );
                report.queries += 1;
                let rows = try_outcome!(self.session.store().query(cx, &sql, &params).await);
                for row in rows {
                    let Some(partition_key) = row
                        .get_by_name(&partition_column)
                        .filter(|v| !v.is_null())
                        .cloned()
                    else {
                        continue;
                    };
                    let target = RecordObject::from_data(
                        target_data(target_table, target_pk, &row),
                        reflections,
                    );
                    buckets.entry(partition_key).or_default().push(target);
                }
            }
        }

        for &i in &group.owner_indexes {
            if owners[i].association_loaded(name) {
                continue;
            }
            let key = group_binding_key(reflection, owners[i].data(), &group.target);
            let fetched = key
                .and_then(|k| buckets.get(&k))
                .cloned()
                .unwrap_or_default();
            if reflection.is_collection() {
                owners[i].attach_many(reflection, fetched);
            } else {
                owners[i].attach_one(reflection, fetched.into_iter().next());
            }
        }
        Outcome::Ok(())
    }
}

/// Group owners by (reflection, concrete target): polymorphic variation
/// in the target type never merges two groups that would need different
/// queries.
#[allow(clippy::result_large_err)]
fn build_groups(
    owners: &[&mut RecordObject],
    name: &str,
) -> Result<Vec<PreloadGroup>, Error> {
    let mut groups: Vec<PreloadGroup> = Vec::new();
    let mut index: HashMap<(usize, String), usize> = HashMap::new();

    for (i, owner) in owners.iter().enumerate() {
        let reflection = owner.reflection(name)?;
        let (target, discriminant) = if reflection.polymorphic_belongs_to() {
            let type_name = reflection
                .discriminator_column()
                .and_then(|column| {
                    owner
                        .data()
                        .get(&column)
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_default();
            (GroupTarget::Polymorphic(type_name.clone()), type_name)
        } else {
            (GroupTarget::Static, String::new())
        };

        let key = (reflection as *const Reflection as usize, discriminant);
        match index.get(&key) {
            Some(&g) => groups[g].owner_indexes.push(i),
            None => {
                index.insert(key, groups.len());
                groups.push(PreloadGroup {
                    reflection,
                    target,
                    owner_indexes: vec![i],
                });
            }
        }
    }
    Ok(groups)
}

/// The owner-side key a group's query binds for one owner.
fn group_binding_key(
    reflection: &'static Reflection,
    owner: &RecordData,
    target: &GroupTarget,
) -> Option<Value> {
    match target {
        GroupTarget::Polymorphic(_) => owner
            .get(reflection.foreign_key)
            .filter(|v| !v.is_null())
            .cloned(),
        GroupTarget::Static => owner_binding_key(reflection, owner),
    }
}

fn in_keys(column: Expr, keys: &[Value]) -> Expr {
    if keys.len() == 1 {
        column.eq(Expr::lit(keys[0].clone()))
    } else {
        column.in_list(keys.to_vec())
    }
}
