use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("invalid LSN: {0}")]
    LsnParse(String),

    #[error("no primary databases available")]
    NoPrimaryAvailable,

    #[error("no replica has caught up to the required LSN")]
    NoReplicaCaughtUp,

    #[error("LSN query timed out")]
    ProbeTimeout,

    #[error("LSN query failed: {0}")]
    ProbeFailed(#[source] sqlx::Error),

    #[error("backend connection error: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("backend error: {0}")]
    Backend(#[source] sqlx::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RouterError>;

/// Distinguishes pool- and transport-level failures from SQL errors.
///
/// Reads that fail at this level are retried once against a primary; SQL
/// errors are surfaced unchanged.
pub fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Protocol(_)
            | sqlx::Error::Tls(_)
    )
}

impl RouterError {
    /// Classifies a driver error from a user query into the router taxonomy.
    pub(crate) fn from_query_error(err: sqlx::Error) -> Self {
        if is_connection_error(&err) {
            RouterError::Connection(err)
        } else {
            RouterError::Backend(err)
        }
    }

    /// True for failures the router treats as "replica not caught up".
    pub fn is_transient(&self) -> bool {
        matches!(self, RouterError::ProbeTimeout | RouterError::ProbeFailed(_))
    }
}
