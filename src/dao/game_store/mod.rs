pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use crate::dao::models::{
    FinalGuessEntity, GameEntity, MissionActionEntity, RoundEntity, VoteEntity,
};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

/// Abstraction over the persistence layer for games, rounds and player choices.
pub trait GameStore: Send + Sync {
    fn save_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>>;
    /// Games in the `active` state.
    fn list_active_games(&self) -> BoxFuture<'static, StorageResult<Vec<GameEntity>>>;

    /// Create a round; fails with a conflict when `(game_id, round_number)` exists.
    fn insert_round(&self, round: RoundEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Replace the stored round iff its version still equals `expected_version`.
    ///
    /// Returns `false` when another writer got there first.
    fn compare_and_swap_round(
        &self,
        round: RoundEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Highest-numbered round of the game whose phase is not terminal.
    fn current_round(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>>;
    /// Highest-numbered round of the game regardless of phase.
    fn latest_round(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>>;
    /// Every round of the game ordered by round number.
    fn list_rounds(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>>;

    /// Insert or overwrite the vote keyed by `(round_id, player_id)`.
    fn upsert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn list_votes(&self, round_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>>;
    fn clear_votes(&self, round_id: Uuid) -> BoxFuture<'static, StorageResult<()>>;

    /// Insert or overwrite the action keyed by `(round_id, player_id)`.
    fn upsert_mission_action(
        &self,
        action: MissionActionEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn list_mission_actions(
        &self,
        round_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<MissionActionEntity>>>;

    /// Insert the game's final guess iff none exists; a second insert yields
    /// [`StorageError::Conflict`](crate::dao::storage::StorageError::Conflict).
    fn insert_final_guess(&self, guess: FinalGuessEntity)
    -> BoxFuture<'static, StorageResult<()>>;
    fn find_final_guess(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<FinalGuessEntity>>>;

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
