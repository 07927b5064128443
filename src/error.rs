use crate::models::{ApplicationStatus, Id};

/// Errors raised by the shared store and its backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The persistence backend could not be reached (locked, offline, I/O).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The value could not be turned into JSON.
    #[error("cannot serialize value for `{key}`: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The stored JSON does not have the shape the caller asked for.
    #[error("value under `{key}` does not match the expected shape: {source}")]
    SchemaMismatch {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("writing `{key}` needs {needed} bytes but the quota is {limit}")]
    QuotaExceeded {
        key: String,
        needed: usize,
        limit: usize,
    },
}

impl StoreError {
    /// Whether an immediate re-attempt has any chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Errors raised by the dashboard workflows.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{what} #{id} not found")]
    NotFound { what: &'static str, id: Id },

    #[error("cannot move application from {from} to {to}")]
    InvalidTransition {
        from: ApplicationStatus,
        to: ApplicationStatus,
    },

    #[error("internship #{posting} is not open to students of {college}")]
    NotVisible { posting: Id, college: String },

    #[error("{student} has already applied to internship #{posting}")]
    AlreadyApplied { student: String, posting: Id },

    #[error("internship #{id} is not awaiting approval")]
    NotPending { id: Id },

    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),

    #[error("a college-specific internship needs at least one target college")]
    NoTargetColleges,

    #[error("{0} must not be blank")]
    Blank(&'static str),

    #[error("{what} '{name}' already exists")]
    Duplicate { what: &'static str, name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_transient() {
        assert!(StoreError::Unavailable("locked".into()).is_transient());
        let quota = StoreError::QuotaExceeded {
            key: "applications".into(),
            needed: 10,
            limit: 5,
        };
        assert!(!quota.is_transient());
    }

    #[test]
    fn rusqlite_errors_map_to_unavailable() {
        let err = StoreError::from(rusqlite::Error::InvalidQuery);
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[test]
    fn action_error_wraps_store_error_transparently() {
        let err = ActionError::from(StoreError::Unavailable("offline".into()));
        assert_eq!(err.to_string(), "store unavailable: offline");
    }

    #[test]
    fn transition_error_uses_status_names() {
        let err = ActionError::InvalidTransition {
            from: ApplicationStatus::Hired,
            to: ApplicationStatus::Applied,
        };
        assert_eq!(err.to_string(), "cannot move application from hired to applied");
    }

    #[test]
    fn errors_cross_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StoreError>();
        assert_send_sync::<ActionError>();
    }
}
