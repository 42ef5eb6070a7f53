//! Process-local store backed by concurrent maps.
//!
//! Used when no database is configured and by the test suite. Every trait
//! method resolves immediately; atomicity comes from the per-shard locks of
//! [`DashMap`]'s entry API.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::{BoxFuture, ready};
use uuid::Uuid;

use crate::dao::{
    game_store::GameStore,
    models::{
        FinalGuessEntity, GameEntity, GameState, MissionActionEntity, PlayerId, RoundEntity,
        VoteEntity,
    },
    storage::{StorageError, StorageResult},
};

#[derive(Clone, Default)]
pub struct MemoryGameStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    games: DashMap<Uuid, GameEntity>,
    rounds: DashMap<Uuid, RoundEntity>,
    round_numbers: DashMap<(Uuid, u8), Uuid>,
    votes: DashMap<(Uuid, PlayerId), VoteEntity>,
    actions: DashMap<(Uuid, PlayerId), MissionActionEntity>,
    final_guesses: DashMap<Uuid, FinalGuessEntity>,
}

impl MemoryGameStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rounds_of(&self, game_id: Uuid) -> Vec<RoundEntity> {
        let mut rounds: Vec<RoundEntity> = self
            .inner
            .rounds
            .iter()
            .filter(|entry| entry.game_id == game_id)
            .map(|entry| entry.value().clone())
            .collect();
        rounds.sort_by_key(|round| round.round_number);
        rounds
    }

    fn insert_round_sync(&self, round: RoundEntity) -> StorageResult<()> {
        match self
            .inner
            .round_numbers
            .entry((round.game_id, round.round_number))
        {
            Entry::Occupied(_) => Err(StorageError::conflict(
                "round",
                format!("{}#{}", round.game_id, round.round_number),
            )),
            Entry::Vacant(slot) => {
                slot.insert(round.id);
                self.inner.rounds.insert(round.id, round);
                Ok(())
            }
        }
    }

    fn compare_and_swap_round_sync(&self, round: RoundEntity, expected_version: u64) -> bool {
        match self.inner.rounds.get_mut(&round.id) {
            Some(mut stored) if stored.version == expected_version => {
                *stored = round;
                true
            }
            _ => false,
        }
    }

    fn insert_final_guess_sync(&self, guess: FinalGuessEntity) -> StorageResult<()> {
        match self.inner.final_guesses.entry(guess.game_id) {
            Entry::Occupied(_) => Err(StorageError::conflict("final guess", guess.game_id)),
            Entry::Vacant(slot) => {
                slot.insert(guess);
                Ok(())
            }
        }
    }
}

impl GameStore for MemoryGameStore {
    fn save_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.games.insert(game.id, game);
        Box::pin(ready(Ok(())))
    }

    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let game = self.inner.games.get(&id).map(|entry| entry.value().clone());
        Box::pin(ready(Ok(game)))
    }

    fn list_active_games(&self) -> BoxFuture<'static, StorageResult<Vec<GameEntity>>> {
        let games = self
            .inner
            .games
            .iter()
            .filter(|entry| entry.state == GameState::Active)
            .map(|entry| entry.value().clone())
            .collect();
        Box::pin(ready(Ok(games)))
    }

    fn insert_round(&self, round: RoundEntity) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(self.insert_round_sync(round)))
    }

    fn compare_and_swap_round(
        &self,
        round: RoundEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        Box::pin(ready(Ok(
            self.compare_and_swap_round_sync(round, expected_version)
        )))
    }

    fn current_round(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>> {
        let round = self
            .rounds_of(game_id)
            .into_iter()
            .last()
            .filter(|round| !round.phase.is_terminal());
        Box::pin(ready(Ok(round)))
    }

    fn latest_round(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>> {
        Box::pin(ready(Ok(self.rounds_of(game_id).into_iter().last())))
    }

    fn list_rounds(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>> {
        Box::pin(ready(Ok(self.rounds_of(game_id))))
    }

    fn upsert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.inner
            .votes
            .insert((vote.round_id, vote.player_id), vote);
        Box::pin(ready(Ok(())))
    }

    fn list_votes(&self, round_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>> {
        let mut votes: Vec<VoteEntity> = self
            .inner
            .votes
            .iter()
            .filter(|entry| entry.round_id == round_id)
            .map(|entry| entry.value().clone())
            .collect();
        votes.sort_by_key(|vote| vote.cast_at);
        Box::pin(ready(Ok(votes)))
    }

    fn clear_votes(&self, round_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.votes.retain(|(round, _), _| *round != round_id);
        Box::pin(ready(Ok(())))
    }

    fn upsert_mission_action(
        &self,
        action: MissionActionEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.inner
            .actions
            .insert((action.round_id, action.player_id), action);
        Box::pin(ready(Ok(())))
    }

    fn list_mission_actions(
        &self,
        round_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<MissionActionEntity>>> {
        let actions = self
            .inner
            .actions
            .iter()
            .filter(|entry| entry.round_id == round_id)
            .map(|entry| entry.value().clone())
            .collect();
        Box::pin(ready(Ok(actions)))
    }

    fn insert_final_guess(
        &self,
        guess: FinalGuessEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(self.insert_final_guess_sync(guess)))
    }

    fn find_final_guess(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<FinalGuessEntity>>> {
        let guess = self
            .inner
            .final_guesses
            .get(&game_id)
            .map(|entry| entry.value().clone());
        Box::pin(ready(Ok(guess)))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(Ok(())))
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(Ok(())))
    }
}
