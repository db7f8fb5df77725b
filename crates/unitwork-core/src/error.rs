//! Error types for the persistence engine.
//!
//! All fallible operations return [`Result<T>`](Result) with the [`Error`]
//! enum. Each variant carries a structured payload with a kind, a message,
//! and (where it exists) the underlying source error:
//!
//! - [`StatementError`] - failures surfaced by the statement executor,
//!   including constraint violations
//! - [`StaleError`] - optimistic-lock conflicts (version column mismatch)
//! - [`IdentityError`] - identity-map violations (duplicate key, missing key)
//! - [`SessionError`] - unit-of-work state violations (failed, inactive)
//! - [`FlushError`] - ordering and cascade failures (dependency cycles,
//!   unsaved transient references)
//! - [`CacheError`] - cache-region failures (swallowed by the bridge, but
//!   available to region implementations)
//! - [`TypeError`] - value/column type mismatches during hydration

use std::fmt;

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// The top-level error type for all engine operations.
#[derive(Debug)]
pub enum Error {
    /// Statement execution failed.
    Statement(StatementError),

    /// Optimistic lock failure: a versioned update or delete matched zero rows.
    Stale(StaleError),

    /// Identity map violation.
    Identity(IdentityError),

    /// Unit-of-work state violation.
    Session(SessionError),

    /// Flush ordering or cascade failure.
    Flush(FlushError),

    /// Cache region failure.
    Cache(CacheError),

    /// Value/column type mismatch.
    Type(TypeError),

    /// Serialization or deserialization failure.
    Serde(String),

    /// Custom error for extensions.
    Custom(String),
}

// ============================================================================
// Statement errors
// ============================================================================

/// The kind of statement execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementErrorKind {
    /// A constraint was violated (unique, foreign key, not-null, check).
    ConstraintViolation,
    /// The SQL text was malformed.
    Syntax,
    /// The connection to storage failed.
    Connection,
    /// The statement was chosen as a deadlock victim.
    Deadlock,
    /// A serialization failure under high isolation.
    Serialization,
    /// The statement timed out.
    Timeout,
    /// Any other database-reported failure.
    Database,
}

/// An error surfaced by the statement executor.
#[derive(Debug)]
pub struct StatementError {
    /// What kind of failure this is.
    pub kind: StatementErrorKind,
    /// Human-readable description.
    pub message: String,
    /// SQLSTATE code reported by the database, if any.
    pub sqlstate: Option<String>,
    /// The SQL text that failed, if known.
    pub sql: Option<String>,
    /// Underlying driver error.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StatementError {
    /// Create a new statement error.
    pub fn new(kind: StatementErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            sqlstate: None,
            sql: None,
            source: None,
        }
    }

    /// Attach a SQLSTATE code.
    #[must_use]
    pub fn with_sqlstate(mut self, sqlstate: impl Into<String>) -> Self {
        self.sqlstate = Some(sqlstate.into());
        self
    }

    /// Attach the failing SQL text.
    #[must_use]
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Attach an underlying source error.
    #[must_use]
    pub fn with_source(mut self, source: Box<dyn std::error::Error + Send + Sync>) -> Self {
        self.source = Some(source);
        self
    }

    /// Check if this is a unique constraint violation (SQLSTATE 23505).
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23505")
    }

    /// Check if this is a foreign key violation (SQLSTATE 23503).
    #[must_use]
    pub fn is_foreign_key_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23503")
    }
}

// ============================================================================
// Stale state
// ============================================================================

/// An optimistic-lock conflict.
///
/// Raised when an update or delete carrying a version predicate affects zero
/// rows: the row was modified or removed by another unit of work since it was
/// loaded here. Never retried automatically.
#[derive(Debug, Clone)]
pub struct StaleError {
    /// Table of the conflicting row.
    pub table: &'static str,
    /// Rendered primary key of the conflicting row.
    pub key: String,
    /// The version this unit of work expected to find.
    pub expected_version: Option<i64>,
}

// ============================================================================
// Identity map errors
// ============================================================================

/// The kind of identity-map violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityErrorKind {
    /// A different instance is already registered under this key.
    DuplicateKey,
    /// The instance has no usable primary key (all-null or empty).
    MissingKey,
    /// The operation requires a managed instance but got a detached one.
    Detached,
    /// The operation requires a managed instance but got a transient one.
    Transient,
}

/// An identity-map violation.
#[derive(Debug, Clone)]
pub struct IdentityError {
    /// What kind of violation this is.
    pub kind: IdentityErrorKind,
    /// Entity type involved.
    pub type_name: &'static str,
    /// Human-readable description.
    pub message: String,
}

impl IdentityError {
    /// Create a new identity error.
    pub fn new(
        kind: IdentityErrorKind,
        type_name: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            type_name,
            message: message.into(),
        }
    }
}

// ============================================================================
// Session state errors
// ============================================================================

/// The kind of unit-of-work state violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    /// The unit of work failed a previous flush and must be cleared first.
    Failed,
    /// The unit of work was already completed or discarded.
    Inactive,
    /// The target instance is not managed by this unit of work.
    NotManaged,
}

/// A unit-of-work state violation.
#[derive(Debug, Clone)]
pub struct SessionError {
    /// What kind of violation this is.
    pub kind: SessionErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl SessionError {
    /// Create a new session error.
    pub fn new(kind: SessionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

// ============================================================================
// Flush errors
// ============================================================================

/// The kind of flush failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushErrorKind {
    /// The table dependency graph contains a cycle.
    DependencyCycle,
    /// Cascade traversal exceeded the configured depth guard.
    CascadeDepthExceeded,
    /// A flushed entity references a transient instance over an edge that
    /// does not cascade persist.
    TransientReference,
}

/// A flush ordering or cascade failure.
#[derive(Debug, Clone)]
pub struct FlushError {
    /// What kind of failure this is.
    pub kind: FlushErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Tables involved (cycle participants, in walk order).
    pub tables: Vec<&'static str>,
}

impl FlushError {
    /// Create a new flush error.
    pub fn new(kind: FlushErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            tables: Vec::new(),
        }
    }

    /// Attach the tables involved.
    #[must_use]
    pub fn with_tables(mut self, tables: Vec<&'static str>) -> Self {
        self.tables = tables;
        self
    }
}

// ============================================================================
// Cache errors
// ============================================================================

/// The kind of cache-region failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheErrorKind {
    /// The region's backing store rejected the operation.
    Region,
    /// A soft lock token did not match.
    LockMismatch,
    /// The cached payload could not be decoded.
    Payload,
}

/// A cache-region failure.
///
/// The cache bridge logs these and degrades to a miss; they never surface
/// from unit-of-work operations. Region implementations construct them.
#[derive(Debug, Clone)]
pub struct CacheError {
    /// What kind of failure this is.
    pub kind: CacheErrorKind,
    /// Region name.
    pub region: String,
    /// Human-readable description.
    pub message: String,
}

impl CacheError {
    /// Create a new cache error.
    pub fn new(kind: CacheErrorKind, region: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            region: region.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Type errors
// ============================================================================

/// A value/column type mismatch during hydration or conversion.
#[derive(Debug, Clone)]
pub struct TypeError {
    /// What was expected.
    pub expected: &'static str,
    /// What was actually found.
    pub actual: String,
    /// The column involved, if known.
    pub column: Option<String>,
}

// ============================================================================
// Display / Error impls
// ============================================================================

impl fmt::Display for StatementErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatementErrorKind::ConstraintViolation => "constraint violation",
            StatementErrorKind::Syntax => "syntax error",
            StatementErrorKind::Connection => "connection failure",
            StatementErrorKind::Deadlock => "deadlock",
            StatementErrorKind::Serialization => "serialization failure",
            StatementErrorKind::Timeout => "timeout",
            StatementErrorKind::Database => "database error",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Statement(e) => {
                write!(f, "statement failed: {}: {}", e.kind, e.message)?;
                if let Some(state) = &e.sqlstate {
                    write!(f, " (SQLSTATE {state})")?;
                }
                Ok(())
            }
            Error::Stale(e) => {
                write!(f, "stale state: {} row {} was concurrently modified", e.table, e.key)?;
                if let Some(v) = e.expected_version {
                    write!(f, " (expected version {v})")?;
                }
                Ok(())
            }
            Error::Identity(e) => {
                let kind = match e.kind {
                    IdentityErrorKind::DuplicateKey => "duplicate identity",
                    IdentityErrorKind::MissingKey => "missing key",
                    IdentityErrorKind::Detached => "detached instance",
                    IdentityErrorKind::Transient => "transient instance",
                };
                write!(f, "{} for {}: {}", kind, e.type_name, e.message)
            }
            Error::Session(e) => {
                let kind = match e.kind {
                    SessionErrorKind::Failed => "unit of work failed",
                    SessionErrorKind::Inactive => "unit of work inactive",
                    SessionErrorKind::NotManaged => "instance not managed",
                };
                write!(f, "{}: {}", kind, e.message)
            }
            Error::Flush(e) => {
                let kind = match e.kind {
                    FlushErrorKind::DependencyCycle => "dependency cycle",
                    FlushErrorKind::CascadeDepthExceeded => "cascade depth exceeded",
                    FlushErrorKind::TransientReference => "unsaved transient reference",
                };
                write!(f, "flush failed: {}: {}", kind, e.message)?;
                if !e.tables.is_empty() {
                    write!(f, " [{}]", e.tables.join(" -> "))?;
                }
                Ok(())
            }
            Error::Cache(e) => {
                let kind = match e.kind {
                    CacheErrorKind::Region => "region failure",
                    CacheErrorKind::LockMismatch => "lock token mismatch",
                    CacheErrorKind::Payload => "payload decode failure",
                };
                write!(f, "cache region '{}': {}: {}", e.region, kind, e.message)
            }
            Error::Type(e) => {
                write!(f, "type mismatch: expected {}, got {}", e.expected, e.actual)?;
                if let Some(col) = &e.column {
                    write!(f, " (column '{col}')")?;
                }
                Ok(())
            }
            Error::Serde(msg) => write!(f, "serialization error: {msg}"),
            Error::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Statement(e) => e
                .source
                .as_ref()
                .map(|s| s.as_ref() as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl Error {
    /// Create a statement error with the given kind and message.
    pub fn statement(kind: StatementErrorKind, message: impl Into<String>) -> Self {
        Error::Statement(StatementError::new(kind, message))
    }

    /// Create a constraint-violation statement error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Error::Statement(StatementError::new(
            StatementErrorKind::ConstraintViolation,
            message,
        ))
    }

    /// Create a session-state error.
    pub fn session(kind: SessionErrorKind, message: impl Into<String>) -> Self {
        Error::Session(SessionError::new(kind, message))
    }

    /// Create a custom error.
    pub fn custom(message: impl Into<String>) -> Self {
        Error::Custom(message.into())
    }

    /// Check if this is a constraint violation.
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Error::Statement(StatementError {
                kind: StatementErrorKind::ConstraintViolation,
                ..
            })
        )
    }

    /// Check if this is a stale-state conflict.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self, Error::Stale(_))
    }

    /// Check if retrying the whole unit of work might succeed.
    ///
    /// Deadlocks and serialization failures are transient; constraint
    /// violations and stale state are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Statement(StatementError {
                kind: StatementErrorKind::Deadlock
                    | StatementErrorKind::Serialization
                    | StatementErrorKind::Timeout
                    | StatementErrorKind::Connection,
                ..
            })
        )
    }

    /// Get the SQLSTATE code, if this error carries one.
    #[must_use]
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Statement(e) => e.sqlstate.as_deref(),
            _ => None,
        }
    }
}

impl From<StatementError> for Error {
    fn from(e: StatementError) -> Self {
        Error::Statement(e)
    }
}

impl From<StaleError> for Error {
    fn from(e: StaleError) -> Self {
        Error::Stale(e)
    }
}

impl From<IdentityError> for Error {
    fn from(e: IdentityError) -> Self {
        Error::Identity(e)
    }
}

impl From<SessionError> for Error {
    fn from(e: SessionError) -> Self {
        Error::Session(e)
    }
}

impl From<FlushError> for Error {
    fn from(e: FlushError) -> Self {
        Error::Flush(e)
    }
}

impl From<CacheError> for Error {
    fn from(e: CacheError) -> Self {
        Error::Cache(e)
    }
}

impl From<TypeError> for Error {
    fn from(e: TypeError) -> Self {
        Error::Type(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serde(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_violation_detection() {
        let err = Error::constraint("duplicate key on users_pkey");
        assert!(err.is_constraint_violation());
        assert!(!err.is_stale());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_sqlstate_helpers() {
        let e = StatementError::new(StatementErrorKind::ConstraintViolation, "dup")
            .with_sqlstate("23505");
        assert!(e.is_unique_violation());
        assert!(!e.is_foreign_key_violation());

        let e = StatementError::new(StatementErrorKind::ConstraintViolation, "fk")
            .with_sqlstate("23503");
        assert!(e.is_foreign_key_violation());

        let err: Error = e.into();
        assert_eq!(err.sqlstate(), Some("23503"));
    }

    #[test]
    fn test_stale_display() {
        let err: Error = StaleError {
            table: "orders",
            key: "42".to_string(),
            expected_version: Some(3),
        }
        .into();
        assert!(err.is_stale());
        let msg = err.to_string();
        assert!(msg.contains("orders"));
        assert!(msg.contains("version 3"));
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::statement(StatementErrorKind::Deadlock, "victim").is_retryable());
        assert!(Error::statement(StatementErrorKind::Serialization, "retry").is_retryable());
        assert!(!Error::constraint("nope").is_retryable());
        assert!(!Error::Stale(StaleError {
            table: "t",
            key: "1".to_string(),
            expected_version: None,
        })
        .is_retryable());
    }

    #[test]
    fn test_cycle_error_lists_tables() {
        let err: Error = FlushError::new(FlushErrorKind::DependencyCycle, "tables form a cycle")
            .with_tables(vec!["a", "b", "a"])
            .into();
        assert!(err.to_string().contains("a -> b -> a"));
    }
}
