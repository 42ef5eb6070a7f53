//! Persistence: entity models, the store trait and its backends.

pub mod game_store;
pub mod models;
/// Backend-neutral storage errors.
pub mod storage;
