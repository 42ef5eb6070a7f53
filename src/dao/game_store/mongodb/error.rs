use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use thiserror::Error;
use uuid::Uuid;

/// Convenient result alias returning [`MongoDaoError`] failures.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Server error code for unique index violations.
const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("{entity} `{key}` already exists")]
    Duplicate {
        entity: &'static str,
        key: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to save game `{id}`")]
    SaveGame {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load game `{id}`")]
    LoadGame {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to list active games")]
    ListGames {
        #[source]
        source: MongoError,
    },
    #[error("failed to write round `{id}`")]
    SaveRound {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load rounds of game `{game_id}`")]
    LoadRounds {
        game_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to write {entity} for round `{round_id}`")]
    SaveChoice {
        entity: &'static str,
        round_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load {entity} for round `{round_id}`")]
    LoadChoices {
        entity: &'static str,
        round_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to access final guess of game `{game_id}`")]
    FinalGuess {
        game_id: Uuid,
        #[source]
        source: MongoError,
    },
}

/// Whether the server rejected a write because of a unique index.
pub fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY_CODE
    )
}
