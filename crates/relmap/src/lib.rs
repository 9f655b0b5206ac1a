//! relmap - declared object relationships mapped onto relational joins
//! and batched queries.
//!
//! relmap takes static association metadata ("has many", "belongs to",
//! "through" chains, polymorphic references) and resolves it two ways:
//!
//! - **Eager join path**: `JoinDependency` folds an association spec into
//!   one aliased multi-join query and reconstructs the returned rows into
//!   a deduplicated object graph.
//! - **Preload path**: `Preloader` issues one batched query per distinct
//!   (reflection, concrete target) group and attaches results onto each
//!   owner, the N+1 defense.
//!
//! Records not resolved eagerly load lazily through per-owner association
//! state machines, which also carry the collection mutation operations
//! (`add`/`remove`/`replace`) and the in-memory/persisted merge.
//!
//! # Quick Start
//!
//! ```ignore
//! use relmap::prelude::*;
//!
//! async fn example(cx: &Cx, store: &impl Store) -> Result<()> {
//!     let session = StoreSession::new(store);
//!
//!     // Preload comments for a set of posts: one query, no N+1.
//!     let mut posts: Vec<RecordObject> = load_posts();
//!     Preloader::new(&session)
//!         .preload(cx, &mut posts, &[IncludePath::new("comments")])
//!         .await?;
//!
//!     // Or eager-join and reconstruct the graph in one query.
//!     let dependency = JoinDependency::build::<Post>(
//!         &[IncludePath::parse("comments.author").unwrap()],
//!         Dialect::Postgres,
//!     )?;
//!     let (sql, params) = dependency.select().build();
//!     let rows = store.query(cx, &sql, &params).await?;
//!     let graph = dependency.instantiate(&rows)?;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - **Zero-cost metadata**: associations are `const` reflections, no
//!   runtime registry walks
//! - **Structured concurrency**: built on asupersync for cancel-correct
//!   store calls
//! - **Deterministic aliasing**: repeated table references in one query
//!   disambiguate through the alias tracker

// Re-export all public types from sub-crates
pub use relmap_core::{
    // asupersync re-exports
    Cx,
    // Core types
    ColumnInfo,
    ConfigurationError,
    Dependent,
    Error,
    FromValue,
    JoinTable,
    MacroKind,
    NotPersistedError,
    Outcome,
    QueryContext,
    Record,
    RecordData,
    Reflection,
    ReplaceError,
    Result,
    Row,
    Store,
    TargetMeta,
    TargetRegistry,
    ThroughError,
    ThroughErrorKind,
    TypeMismatchError,
    Value,
    closest_name,
    find_reflection,
    resolve_chain,
};

pub use relmap_query::{
    AliasTracker, AssociationScope, BinaryOp, Dialect, Expr, GraphTarget, IncludePath, Join,
    JoinDependency, JoinNode, JoinType, Limit, OrderBy, RecordGraph, ResolvedScope, Select,
    Where, hop_predicates, owner_binding_key,
};

pub use relmap_assoc::{
    AssociationEntry, CollectionState, LoadCounter, PreloadReport, Preloader, RecordObject,
    SingularState, StoreSession, merge_target_lists,
};

/// Commonly used types, importable in one line.
pub mod prelude {
    pub use crate::{
        Cx, Dialect, Error, Expr, IncludePath, JoinDependency, MacroKind, Outcome, Preloader,
        QueryContext, Record, RecordData, RecordObject, Reflection, Result, Row, Store,
        StoreSession, TargetRegistry, Value,
    };
}
