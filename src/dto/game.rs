//! Lobby creation payloads and the game summary returned to the adapter.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{ChatId, GameEntity, GameState, PlayerId, Side},
    dto::{format_time, round::PlayerSummary, validation::validate_roster},
};

/// Payload opening a lobby for a group chat.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[validate(schema(function = "validate_roster", skip_on_field_errors = false))]
pub struct CreateGameRequest {
    pub group_chat: ChatId,
    /// Player allowed to start the game; must be on the roster.
    #[validate(range(min = 1))]
    pub admin_id: PlayerId,
    /// Overrides the player-count table when set.
    #[serde(default)]
    #[validate(range(min = 1, max = 5))]
    pub team_size: Option<u8>,
    #[validate(length(min = 4, max = 10), nested)]
    pub players: Vec<PlayerInput>,
}

/// One registered player in seat order.
#[derive(Debug, Serialize, Deserialize, ToSchema, Validate)]
pub struct PlayerInput {
    #[validate(range(min = 1))]
    pub id: PlayerId,
    #[validate(length(min = 1, max = 64))]
    pub name: String,
}

/// Summary returned once a game has been created or loaded.
#[derive(Debug, Serialize, ToSchema)]
pub struct GameSummary {
    pub id: Uuid,
    pub group_chat: ChatId,
    pub admin_id: PlayerId,
    pub state: GameState,
    pub players: Vec<PlayerSummary>,
    pub team_size: Option<u8>,
    pub round_counter: u8,
    pub akta_score: u8,
    pub golare_score: u8,
    pub winner: Option<Side>,
    pub created_at: String,
}

impl From<&GameEntity> for GameSummary {
    fn from(game: &GameEntity) -> Self {
        Self {
            id: game.id,
            group_chat: game.group_chat,
            admin_id: game.admin_id,
            state: game.state,
            players: game
                .players
                .iter()
                .map(|player| PlayerSummary {
                    id: player.id,
                    name: player.name.clone(),
                })
                .collect(),
            team_size: game.team_size,
            round_counter: game.round_counter,
            akta_score: game.akta_score,
            golare_score: game.golare_score,
            winner: game.winner,
            created_at: format_time(game.created_at),
        }
    }
}
