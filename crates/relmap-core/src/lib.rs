//! Core types and traits for relmap.
//!
//! This crate provides the foundational abstractions for association
//! mapping:
//!
//! - `Record` trait for table-mapped structs and `RecordData` for the
//!   dynamic attribute representation the runtime works on
//! - `Reflection` static association metadata
//! - `Store` trait for the backing data store
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod error;
pub mod record;
pub mod reflection;
pub mod row;
pub mod store;
pub mod value;

pub use error::{
    ConfigurationError, Error, NotPersistedError, QueryError, ReplaceError, Result,
    ThroughError, ThroughErrorKind, TypeError, TypeMismatchError,
};
pub use record::{Record, RecordData};
pub use reflection::{
    closest_name, find_reflection, reflection_or_error, resolve_chain, Dependent, JoinTable,
    MacroKind, Reflection, TargetMeta, TargetRegistry,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use store::{QueryContext, Store};
pub use value::Value;
