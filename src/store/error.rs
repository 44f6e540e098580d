//! Write-queue error taxonomy: `Transient` re-enqueues with backoff,
//! `Fatal` propagates out of the writer loop to the process exit path.

#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// Deadlock, serialization failure, or a pool checkout that timed
    /// out — worth retrying the same batch.
    #[error("transient write failure: {0}")]
    Transient(String),

    /// Schema mismatch or a pool exhausted past the retry budget —
    /// nothing the writer can do about it on its own.
    #[error("fatal write failure: {0}")]
    Fatal(String),
}

impl WriteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, WriteError::Transient(_))
    }
}

impl From<sqlx::Error> for WriteError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                // Postgres 40001 = serialization_failure, 40P01 = deadlock_detected.
                match db_err.code().as_deref() {
                    Some("40001") | Some("40P01") => WriteError::Transient(err.to_string()),
                    _ => WriteError::Fatal(err.to_string()),
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => WriteError::Transient(err.to_string()),
            _ => WriteError::Fatal(err.to_string()),
        }
    }
}
