//! Game fixtures wired to the in-memory store and the recording transport.

use std::{sync::Arc, time::Duration};

use time::{OffsetDateTime, macros::datetime};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        game_store::{GameStore, memory::MemoryGameStore},
        models::{
            ChatId, EndgameEntity, GameEntity, GameState, PlayerEntity, PlayerId, RoundEntity,
            RoundMessages, Side,
        },
    },
    delivery::{DeliveryQueue, testing::RecordingTransport},
    narrative::NarrativeService,
    services::rules::golare_count,
    state::{AppState, SharedState, TokioClock, state_machine::RoundPhase},
};

pub const GROUP_CHAT: ChatId = -100;

/// A Wednesday morning between the mission post and the nomination opening.
pub const WEDNESDAY_MORNING: OffsetDateTime = datetime!(2025-01-15 09:30 +01:00);

pub struct TestGame {
    pub state: SharedState,
    pub store: MemoryGameStore,
    pub transport: Arc<RecordingTransport>,
}

impl TestGame {
    pub async fn new() -> Self {
        Self::at(WEDNESDAY_MORNING).await
    }

    pub async fn at(origin: OffsetDateTime) -> Self {
        let config = AppConfig::default();
        let transport = Arc::new(RecordingTransport::default());
        let delivery = DeliveryQueue::new(transport.clone(), config.delivery.min_interval);
        let state = AppState::with_clock(
            config,
            delivery,
            NarrativeService::disabled(),
            Arc::new(TokioClock::starting_at(origin)),
        );
        let store = MemoryGameStore::new();
        state.set_game_store(Arc::new(store.clone())).await;
        Self {
            state,
            store,
            transport,
        }
    }

    /// Seat players `1..=count`; the last seats are golare and the last
    /// seat is their key player, player 1 is the tipsare.
    pub async fn seed_game(&self, count: usize, state: GameState) -> Uuid {
        let golare = golare_count(count).unwrap_or(1);
        let players = (1..=count)
            .map(|seat| {
                let id = seat as PlayerId;
                let side = if seat > count - golare { Side::Golare } else { Side::Akta };
                PlayerEntity {
                    id,
                    name: format!("p{id}"),
                    side: (state != GameState::Lobby).then_some(side),
                    key_player: state != GameState::Lobby && (seat == 1 || seat == count),
                }
            })
            .collect();
        let now = self.state.now();
        let game = GameEntity {
            id: Uuid::new_v4(),
            group_chat: GROUP_CHAT,
            admin_id: 1,
            state,
            round_counter: 0,
            akta_score: 0,
            golare_score: 0,
            team_size: None,
            players,
            endgame: None,
            winner: None,
            created_at: now,
            updated_at: now,
        };
        let id = game.id;
        self.store.save_game(game).await.unwrap();
        id
    }

    pub async fn seed_round(
        &self,
        game_id: Uuid,
        round_number: u8,
        phase: RoundPhase,
        capo_id: PlayerId,
        team: &[PlayerId],
        deadline_in: Option<Duration>,
    ) -> RoundEntity {
        let now = self.state.now();
        let round = RoundEntity {
            id: Uuid::new_v4(),
            game_id,
            round_number,
            phase,
            capo_id,
            team: team.to_vec(),
            failed_votes: 0,
            result: None,
            deadline_at: deadline_in.map(|delay| now + delay),
            messages: RoundMessages::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_round(round.clone()).await.unwrap();
        let mut game = self.game(game_id).await;
        game.round_counter = round_number;
        self.store.save_game(game).await.unwrap();
        round
    }

    /// Overwrite a seeded round in place.
    pub async fn update_round(&self, round: RoundEntity) {
        let version = round.version;
        let mut next = round;
        next.version = version + 1;
        assert!(self.store.compare_and_swap_round(next, version).await.unwrap());
    }

    /// Put the game into its final-guess window.
    pub async fn seed_endgame(&self, game_id: Uuid, leading: Side, deadline_in: Duration) {
        let now = self.state.now();
        let mut game = self.game(game_id).await;
        game.endgame = Some(EndgameEntity {
            started_at: now,
            deadline_at: now + deadline_in,
            leading_side: leading,
            guessing_side: leading.opponent(),
        });
        match leading {
            Side::Akta => game.akta_score = 3,
            Side::Golare => game.golare_score = 3,
        }
        self.store.save_game(game).await.unwrap();
    }

    pub async fn game(&self, game_id: Uuid) -> GameEntity {
        self.store.find_game(game_id).await.unwrap().unwrap()
    }

    pub async fn latest_round(&self, game_id: Uuid) -> RoundEntity {
        self.store.latest_round(game_id).await.unwrap().unwrap()
    }

    pub fn group_texts(&self) -> Vec<String> {
        self.transport
            .sent_to(GROUP_CHAT)
            .into_iter()
            .map(|message| message.text)
            .collect()
    }

    /// Let background deliveries drain.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
}
