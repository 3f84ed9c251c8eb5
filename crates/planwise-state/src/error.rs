//! State backend error types.

/// Errors produced by [`StateBackend`](crate::StateBackend) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// `SQLite` failure annotated with the operation that triggered it.
    #[error("{context}: {source}")]
    Backend {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be decoded into a model type.
    #[error("corrupt state row: {0}")]
    Corrupt(String),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("state backend lock poisoned")]
    LockPoisoned,
}

impl StateError {
    /// Wrap a `SQLite` error with the name of the failing operation.
    #[must_use]
    pub fn backend_context(context: &'static str, source: rusqlite::Error) -> Self {
        Self::Backend { context, source }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_error_displays_context() {
        let inner = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(1),
            Some("table not found".into()),
        );
        let err = StateError::Sqlite(inner);
        let msg = err.to_string();
        assert!(msg.contains("sqlite"), "got: {msg}");
    }

    #[test]
    fn backend_context_prefixes_operation() {
        let err = StateError::backend_context(
            "upsert_checkpoint",
            rusqlite::Error::QueryReturnedNoRows,
        );
        assert!(err.to_string().starts_with("upsert_checkpoint:"));
    }

    #[test]
    fn lock_poisoned_displays() {
        let err = StateError::LockPoisoned;
        assert_eq!(err.to_string(), "state backend lock poisoned");
    }
}
