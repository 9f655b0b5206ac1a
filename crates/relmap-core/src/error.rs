//! Error types for relmap operations.

use std::fmt;

use crate::value::Value;

/// The primary error type for all relmap operations.
#[derive(Debug)]
pub enum Error {
    /// An association name or option does not resolve (misspelling, missing
    /// registry entry). Detected at graph-build time, never at query time.
    Configuration(ConfigurationError),
    /// A record handed to a mutation is not compatible with the
    /// association's target table.
    TypeMismatch(TypeMismatchError),
    /// A through-chain cannot be resolved or mutated.
    Through(ThroughError),
    /// A mutation was attempted on a collection whose owner has no
    /// persisted primary key.
    NotPersisted(NotPersistedError),
    /// Aggregate failure from `replace` after the in-memory rollback.
    Replace(ReplaceError),
    /// Row-to-value conversion errors.
    Type(TypeError),
    /// Storage-layer query failure.
    Query(QueryError),
    /// Custom error with message.
    Custom(String),
}

#[derive(Debug)]
pub struct ConfigurationError {
    pub message: String,
    /// The association name that failed to resolve, if any.
    pub name: Option<String>,
    /// Closest known association name, for the "did you mean" hint.
    pub suggestion: Option<String>,
}

#[derive(Debug)]
pub struct TypeMismatchError {
    /// Table the association targets.
    pub expected_table: String,
    /// Table of the record that was handed in.
    pub actual_table: String,
    /// Association name the mutation went through.
    pub association: String,
}

#[derive(Debug)]
pub struct ThroughError {
    pub kind: ThroughErrorKind,
    /// Name of the through association.
    pub association: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThroughErrorKind {
    /// The chain's source hop is polymorphic or otherwise cannot be
    /// resolved to one concrete join without an explicit hint.
    AmbiguousSource,
    /// Mutation refused: the source hop is not a direct belongs-to, or the
    /// chain passes through more than one indirection, so no single
    /// unambiguous foreign key exists.
    ReadOnly,
}

#[derive(Debug)]
pub struct NotPersistedError {
    pub owner_table: String,
    pub association: String,
}

#[derive(Debug)]
pub struct ReplaceError {
    pub association: String,
    /// Primary keys (or Null for new records) of the records that could not
    /// be persisted.
    pub failed: Vec<Value>,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct QueryError {
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Build a configuration error from a bare message.
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration(ConfigurationError {
            message: message.into(),
            name: None,
            suggestion: None,
        })
    }

    /// Build a configuration error for an unresolvable association name.
    pub fn unknown_association(
        owner_table: &str,
        name: &str,
        suggestion: Option<&str>,
    ) -> Self {
        let message = match suggestion {
            Some(s) => format!(
                "unknown association '{name}' on '{owner_table}' (did you mean '{s}'?)"
            ),
            None => format!("unknown association '{name}' on '{owner_table}'"),
        };
        Error::Configuration(ConfigurationError {
            message,
            name: Some(name.to_string()),
            suggestion: suggestion.map(str::to_string),
        })
    }

    /// Build a storage-layer error with the offending SQL attached.
    pub fn query(sql: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            sql: Some(sql.into()),
            message: message.into(),
            source: None,
        })
    }

    /// Is this a structural error (programming mistake) rather than a
    /// runtime storage condition?
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_)
                | Error::TypeMismatch(_)
                | Error::Through(_)
                | Error::NotPersisted(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration(e) => write!(f, "Configuration error: {}", e.message),
            Error::TypeMismatch(e) => write!(
                f,
                "Type mismatch on association '{}': expected a '{}' record, got '{}'",
                e.association, e.expected_table, e.actual_table
            ),
            Error::Through(e) => match e.kind {
                ThroughErrorKind::AmbiguousSource => {
                    write!(f, "Ambiguous through source on '{}': {}", e.association, e.message)
                }
                ThroughErrorKind::ReadOnly => {
                    write!(f, "Read-only through association '{}': {}", e.association, e.message)
                }
            },
            Error::NotPersisted(e) => write!(
                f,
                "Cannot mutate '{}' on an unpersisted '{}' record",
                e.association, e.owner_table
            ),
            Error::Replace(e) => write!(
                f,
                "Replace on '{}' failed for {} record(s); in-memory target rolled back",
                e.association,
                e.failed.len()
            ),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<ConfigurationError> for Error {
    fn from(err: ConfigurationError) -> Self {
        Error::Configuration(err)
    }
}

impl From<TypeMismatchError> for Error {
    fn from(err: TypeMismatchError) -> Self {
        Error::TypeMismatch(err)
    }
}

impl From<ThroughError> for Error {
    fn from(err: ThroughError) -> Self {
        Error::Through(err)
    }
}

impl From<NotPersistedError> for Error {
    fn from(err: NotPersistedError) -> Self {
        Error::NotPersisted(err)
    }
}

impl From<ReplaceError> for Error {
    fn from(err: ReplaceError) -> Self {
        Error::Replace(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

/// Result type alias for relmap operations.
pub type Result<T> = std::result::Result<T, Error>;
