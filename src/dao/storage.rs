use std::error::Error;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

/// What a backend reports, independent of the database behind it.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not serve the call; retrying later may succeed.
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A uniqueness rule kept the first writer's record.
    #[error("{entity} `{key}` already exists")]
    Conflict { entity: &'static str, key: String },
}

impl StorageError {
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        Self::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    pub fn conflict(entity: &'static str, key: impl ToString) -> Self {
        Self::Conflict {
            entity,
            key: key.to_string(),
        }
    }

    /// Lost an insert race; callers treat this as "already done".
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
