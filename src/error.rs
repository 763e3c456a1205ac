use std::sync::Arc;
use thiserror::Error;

/// Status a query executor or class inspector attaches to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    ResultSetTooLarge,
    Timeout,
    Canceled,
    /// Any other implementation-specific status code
    Other(i32),
}

/// Failure reported by the query executor or the class hierarchy inspector
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("query failed with status {status:?}: {message}")]
pub struct QueryError {
    pub status: QueryStatus,
    pub message: String,
}

impl QueryError {
    pub fn new(status: QueryStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(QueryStatus::Timeout, message)
    }

    pub fn too_large(message: impl Into<String>) -> Self {
        Self::new(QueryStatus::ResultSetTooLarge, message)
    }

    pub fn canceled() -> Self {
        Self::new(QueryStatus::Canceled, "query canceled")
    }
}

/// Errors of the hierarchy pipeline. Cloneable so a shared execution can hand the
/// same failure to every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum HierarchyError {
    /// The hierarchy-level definition failed; carries its error unchanged
    #[error("hierarchy level definition failed: {0}")]
    Definition(Arc<anyhow::Error>),

    #[error("result set too large (limit: {limit:?})")]
    ResultSetTooLarge { limit: Option<usize> },

    #[error("backend timeout: {0}")]
    BackendTimeout(String),

    #[error("request canceled")]
    Canceled,

    #[error("{0}")]
    Unknown(String),

    /// Two nodes of different grouping identity were merged. Indicates a bug in
    /// the grouping engine and is never converted into a placeholder.
    #[error("cannot merge nodes of different identity: {left} and {right}")]
    MergeIdentityMismatch { left: String, right: String },
}

impl HierarchyError {
    pub fn definition(error: anyhow::Error) -> Self {
        HierarchyError::Definition(Arc::new(error))
    }

    /// Errors the provider turns into a placeholder or an empty level
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            HierarchyError::ResultSetTooLarge { .. }
                | HierarchyError::BackendTimeout(_)
                | HierarchyError::Canceled
        )
    }
}

impl From<QueryError> for HierarchyError {
    fn from(error: QueryError) -> Self {
        match error.status {
            QueryStatus::ResultSetTooLarge => HierarchyError::ResultSetTooLarge { limit: None },
            QueryStatus::Timeout => HierarchyError::BackendTimeout(error.message),
            QueryStatus::Canceled => HierarchyError::Canceled,
            QueryStatus::Other(_) => HierarchyError::Unknown(error.to_string()),
        }
    }
}

pub type HierarchyResult<T> = Result<T, HierarchyError>;
