//! Lazy association runtime and batch preloading for relmap.
//!
//! - `RecordObject` wraps a record's attributes with per-name association
//!   state machines (unloaded → loaded, reload/reset, add/remove/replace)
//! - `merge_target_lists` reconciles in-memory edits with freshly fetched
//!   persisted records
//! - `Preloader` resolves associations for whole owner sets in one query
//!   per (reflection, concrete target) group, the N+1 defense

/// Unwrap an `Outcome`, propagating every non-`Ok` arm to the caller.
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            asupersync::Outcome::Ok(value) => value,
            asupersync::Outcome::Err(e) => return asupersync::Outcome::Err(e),
            asupersync::Outcome::Cancelled(r) => return asupersync::Outcome::Cancelled(r),
            asupersync::Outcome::Panicked(p) => return asupersync::Outcome::Panicked(p),
        }
    };
}

/// Unwrap a `Result` inside a function returning an `Outcome`.
macro_rules! try_result {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(e) => return asupersync::Outcome::Err(e),
        }
    };
}

pub(crate) use {try_outcome, try_result};

pub mod collection;
pub mod preloader;
pub mod runtime;

pub use collection::merge_target_lists;
pub use preloader::{PreloadReport, Preloader};
pub use runtime::{
    AssociationEntry, CollectionState, LoadCounter, RecordObject, SingularState, StoreSession,
};
