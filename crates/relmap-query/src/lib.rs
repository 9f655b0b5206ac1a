//! Join-graph construction and SQL building for relmap.
//!
//! This crate turns association metadata into SQL:
//!
//! - `AliasTracker` allocates collision-free table aliases
//! - `JoinDependency` builds the eager-join tree and reconstructs record
//!   graphs from result rows
//! - `AssociationScope` resolves one association (direct or through-chain)
//!   into its fetch query
//! - `Expr`/`Select`/`Join` are the SQL building blocks underneath

pub mod alias;
pub mod clause;
pub mod expr;
pub mod join;
pub mod join_dependency;
pub mod scope;
pub mod select;

pub use alias::AliasTracker;
pub use clause::{Limit, OrderBy, OrderDirection, Where};
pub use expr::{BinaryOp, Dialect, Expr};
pub use join::{hop_predicates, HopPredicates, Join, JoinType};
pub use join_dependency::{GraphTarget, IncludePath, JoinDependency, JoinNode, RecordGraph};
pub use scope::{owner_binding_key, AssociationScope, ResolvedScope, OWNER_KEY_ALIAS};
pub use select::Select;
