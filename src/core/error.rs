use thiserror::Error;

/// Failure classes surfaced to protocol callers. Every fallible hub
/// operation bottoms out in one of these.
#[derive(Debug, Error)]
pub enum HubError {
    /// Caller-supplied input was rejected before any write happened.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// A dependency call failed: the database, the embedding endpoint,
    /// or a downstream tool server.
    #[error("{0}")]
    Upstream(String),

    /// The framed channel itself broke: spawn failure, closed pipe,
    /// or a request that timed out waiting for its frame.
    #[error("{0}")]
    Transport(String),

    /// The durable write landed but the secondary write did not. The
    /// message names the record and the leg that failed so the caller
    /// can reconcile instead of silently serving stale search results.
    #[error("{0}")]
    PartialFailure(String),
}

pub type HubResult<T> = Result<T, HubError>;

impl From<rusqlite::Error> for HubError {
    fn from(e: rusqlite::Error) -> Self {
        HubError::Upstream(format!("sqlite: {}", e))
    }
}

impl From<serde_json::Error> for HubError {
    fn from(e: serde_json::Error) -> Self {
        HubError::Upstream(format!("json: {}", e))
    }
}
