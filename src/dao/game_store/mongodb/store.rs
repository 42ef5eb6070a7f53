use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel, bson::doc, options::IndexOptions,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::{PingRetry, open_database},
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{
        MongoActionDocument, MongoFinalGuessDocument, MongoGameDocument, MongoRoundDocument,
        MongoVoteDocument, doc_id, to_bson_uuid,
    },
};
use crate::dao::{
    game_store::GameStore,
    models::{FinalGuessEntity, GameEntity, MissionActionEntity, RoundEntity, VoteEntity},
    storage::StorageResult,
};

const GAME_COLLECTION_NAME: &str = "games";
const ROUND_COLLECTION_NAME: &str = "rounds";
const VOTE_COLLECTION_NAME: &str = "votes";
const ACTION_COLLECTION_NAME: &str = "mission_actions";
const FINAL_GUESS_COLLECTION_NAME: &str = "final_guesses";

#[derive(Clone)]
pub struct MongoGameStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            open_database(&self.config.options, &self.config.database_name, PingRetry::default()).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoGameStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            open_database(&config.options, &config.database_name, PingRetry::default()).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        self.ensure_unique_index(
            ROUND_COLLECTION_NAME,
            "game_id,round_number",
            doc! {"game_id": 1, "round_number": 1},
        )
        .await?;
        self.ensure_unique_index(
            VOTE_COLLECTION_NAME,
            "round_id,player_id",
            doc! {"round_id": 1, "player_id": 1},
        )
        .await?;
        self.ensure_unique_index(
            ACTION_COLLECTION_NAME,
            "round_id,player_id",
            doc! {"round_id": 1, "player_id": 1},
        )
        .await?;

        let database = self.database().await;
        let games = database.collection::<mongodb::bson::Document>(GAME_COLLECTION_NAME);
        let state_index = IndexModel::builder()
            .keys(doc! {"state": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("game_state_idx".to_owned()))
                    .build(),
            )
            .build();
        games
            .create_index(state_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: GAME_COLLECTION_NAME,
                index: "state",
                source,
            })?;

        Ok(())
    }

    async fn ensure_unique_index(
        &self,
        collection: &'static str,
        index: &'static str,
        keys: mongodb::bson::Document,
    ) -> MongoResult<()> {
        let database = self.database().await;
        let model = IndexModel::builder()
            .keys(keys)
            .options(IndexOptions::builder().unique(Some(true)).build())
            .build();

        database
            .collection::<mongodb::bson::Document>(collection)
            .create_index(model)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection,
                index,
                source,
            })?;
        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn games(&self) -> Collection<MongoGameDocument> {
        self.database().await.collection(GAME_COLLECTION_NAME)
    }

    async fn rounds(&self) -> Collection<MongoRoundDocument> {
        self.database().await.collection(ROUND_COLLECTION_NAME)
    }

    async fn votes(&self) -> Collection<MongoVoteDocument> {
        self.database().await.collection(VOTE_COLLECTION_NAME)
    }

    async fn actions(&self) -> Collection<MongoActionDocument> {
        self.database().await.collection(ACTION_COLLECTION_NAME)
    }

    async fn final_guesses(&self) -> Collection<MongoFinalGuessDocument> {
        self.database().await.collection(FINAL_GUESS_COLLECTION_NAME)
    }

    async fn save_game(&self, game: GameEntity) -> MongoResult<()> {
        let id = game.id;
        let document: MongoGameDocument = game.into();
        self.games()
            .await
            .replace_one(doc_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveGame { id, source })?;
        Ok(())
    }

    async fn find_game(&self, id: Uuid) -> MongoResult<Option<GameEntity>> {
        let document = self
            .games()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadGame { id, source })?;
        Ok(document.map(Into::into))
    }

    async fn list_active_games(&self) -> MongoResult<Vec<GameEntity>> {
        let documents: Vec<MongoGameDocument> = self
            .games()
            .await
            .find(doc! {"state": "active"})
            .await
            .map_err(|source| MongoDaoError::ListGames { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListGames { source })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn insert_round(&self, round: RoundEntity) -> MongoResult<()> {
        let id = round.id;
        let key = format!("{}#{}", round.game_id, round.round_number);
        let document: MongoRoundDocument = round.into();
        match self.rounds().await.insert_one(&document).await {
            Ok(_) => Ok(()),
            Err(source) if is_duplicate_key(&source) => Err(MongoDaoError::Duplicate {
                entity: "round",
                key,
                source,
            }),
            Err(source) => Err(MongoDaoError::SaveRound { id, source }),
        }
    }

    async fn compare_and_swap_round(
        &self,
        round: RoundEntity,
        expected_version: u64,
    ) -> MongoResult<bool> {
        let id = round.id;
        let expected = i64::try_from(expected_version).unwrap_or(i64::MAX);
        let document: MongoRoundDocument = round.into();
        let result = self
            .rounds()
            .await
            .replace_one(
                doc! {"_id": to_bson_uuid(id), "version": expected},
                &document,
            )
            .await
            .map_err(|source| MongoDaoError::SaveRound { id, source })?;
        Ok(result.matched_count == 1)
    }

    async fn latest_round(&self, game_id: Uuid) -> MongoResult<Option<RoundEntity>> {
        let document = self
            .rounds()
            .await
            .find_one(doc! {"game_id": to_bson_uuid(game_id)})
            .sort(doc! {"round_number": -1})
            .await
            .map_err(|source| MongoDaoError::LoadRounds { game_id, source })?;
        Ok(document.map(Into::into))
    }

    async fn list_rounds(&self, game_id: Uuid) -> MongoResult<Vec<RoundEntity>> {
        let documents: Vec<MongoRoundDocument> = self
            .rounds()
            .await
            .find(doc! {"game_id": to_bson_uuid(game_id)})
            .sort(doc! {"round_number": 1})
            .await
            .map_err(|source| MongoDaoError::LoadRounds { game_id, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadRounds { game_id, source })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn upsert_vote(&self, vote: VoteEntity) -> MongoResult<()> {
        let round_id = vote.round_id;
        let filter = doc! {"round_id": to_bson_uuid(round_id), "player_id": vote.player_id};
        let document: MongoVoteDocument = vote.into();
        self.votes()
            .await
            .replace_one(filter, &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveChoice {
                entity: "vote",
                round_id,
                source,
            })?;
        Ok(())
    }

    async fn list_votes(&self, round_id: Uuid) -> MongoResult<Vec<VoteEntity>> {
        let documents: Vec<MongoVoteDocument> = self
            .votes()
            .await
            .find(doc! {"round_id": to_bson_uuid(round_id)})
            .sort(doc! {"cast_at": 1})
            .await
            .map_err(|source| MongoDaoError::LoadChoices {
                entity: "votes",
                round_id,
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadChoices {
                entity: "votes",
                round_id,
                source,
            })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn clear_votes(&self, round_id: Uuid) -> MongoResult<()> {
        self.votes()
            .await
            .delete_many(doc! {"round_id": to_bson_uuid(round_id)})
            .await
            .map_err(|source| MongoDaoError::SaveChoice {
                entity: "votes",
                round_id,
                source,
            })?;
        Ok(())
    }

    async fn upsert_mission_action(&self, action: MissionActionEntity) -> MongoResult<()> {
        let round_id = action.round_id;
        let filter = doc! {"round_id": to_bson_uuid(round_id), "player_id": action.player_id};
        let document: MongoActionDocument = action.into();
        self.actions()
            .await
            .replace_one(filter, &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveChoice {
                entity: "mission action",
                round_id,
                source,
            })?;
        Ok(())
    }

    async fn list_mission_actions(&self, round_id: Uuid) -> MongoResult<Vec<MissionActionEntity>> {
        let documents: Vec<MongoActionDocument> = self
            .actions()
            .await
            .find(doc! {"round_id": to_bson_uuid(round_id)})
            .await
            .map_err(|source| MongoDaoError::LoadChoices {
                entity: "mission actions",
                round_id,
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadChoices {
                entity: "mission actions",
                round_id,
                source,
            })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn insert_final_guess(&self, guess: FinalGuessEntity) -> MongoResult<()> {
        let game_id = guess.game_id;
        let document: MongoFinalGuessDocument = guess.into();
        match self.final_guesses().await.insert_one(&document).await {
            Ok(_) => Ok(()),
            Err(source) if is_duplicate_key(&source) => Err(MongoDaoError::Duplicate {
                entity: "final guess",
                key: game_id.to_string(),
                source,
            }),
            Err(source) => Err(MongoDaoError::FinalGuess { game_id, source }),
        }
    }

    async fn find_final_guess(&self, game_id: Uuid) -> MongoResult<Option<FinalGuessEntity>> {
        let document = self
            .final_guesses()
            .await
            .find_one(doc_id(game_id))
            .await
            .map_err(|source| MongoDaoError::FinalGuess { game_id, source })?;
        Ok(document.map(Into::into))
    }
}

impl GameStore for MongoGameStore {
    fn save_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_game(game).await.map_err(Into::into) })
    }

    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_game(id).await.map_err(Into::into) })
    }

    fn list_active_games(&self) -> BoxFuture<'static, StorageResult<Vec<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_active_games().await.map_err(Into::into) })
    }

    fn insert_round(&self, round: RoundEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_round(round).await.map_err(Into::into) })
    }

    fn compare_and_swap_round(
        &self,
        round: RoundEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .compare_and_swap_round(round, expected_version)
                .await
                .map_err(Into::into)
        })
    }

    fn current_round(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let latest = store.latest_round(game_id).await?;
            Ok(latest.filter(|round| !round.phase.is_terminal()))
        })
    }

    fn latest_round(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.latest_round(game_id).await.map_err(Into::into) })
    }

    fn list_rounds(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_rounds(game_id).await.map_err(Into::into) })
    }

    fn upsert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.upsert_vote(vote).await.map_err(Into::into) })
    }

    fn list_votes(&self, round_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_votes(round_id).await.map_err(Into::into) })
    }

    fn clear_votes(&self, round_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.clear_votes(round_id).await.map_err(Into::into) })
    }

    fn upsert_mission_action(
        &self,
        action: MissionActionEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.upsert_mission_action(action).await.map_err(Into::into) })
    }

    fn list_mission_actions(
        &self,
        round_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<MissionActionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_mission_actions(round_id).await.map_err(Into::into) })
    }

    fn insert_final_guess(
        &self,
        guess: FinalGuessEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_final_guess(guess).await.map_err(Into::into) })
    }

    fn find_final_guess(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<FinalGuessEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_final_guess(game_id).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
