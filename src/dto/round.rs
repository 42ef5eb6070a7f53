//! Read-only projections of a round for the chat adapter.

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{GameEntity, GameState, MissionResult, PlayerId, RoundEntity},
    dto::format_time,
    services::rules,
    state::state_machine::RoundPhase,
};

/// A player as shown to other players; sides stay hidden.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlayerSummary {
    pub id: PlayerId,
    pub name: String,
}

impl PlayerSummary {
    fn of(game: &GameEntity, id: PlayerId) -> Self {
        Self {
            id,
            name: game.player_name(id),
        }
    }
}

/// Public state of the latest round of a game.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoundSnapshot {
    pub game_id: Uuid,
    pub game_state: GameState,
    pub round_id: Uuid,
    pub round_number: u8,
    pub phase: RoundPhase,
    pub capo: PlayerSummary,
    pub team: Vec<PlayerSummary>,
    /// Required team size for this game.
    pub team_size: Option<usize>,
    pub failed_votes: u8,
    /// Votes cast so far while voting is open.
    pub votes_cast: usize,
    pub result: Option<MissionResult>,
    /// RFC 3339 instant when the current phase times out.
    pub deadline_at: Option<String>,
    pub akta_score: u8,
    pub golare_score: u8,
}

impl RoundSnapshot {
    pub fn new(game: &GameEntity, round: &RoundEntity, votes_cast: usize) -> Self {
        Self {
            game_id: game.id,
            game_state: game.state,
            round_id: round.id,
            round_number: round.round_number,
            phase: round.phase,
            capo: PlayerSummary::of(game, round.capo_id),
            team: round
                .team
                .iter()
                .map(|id| PlayerSummary::of(game, *id))
                .collect(),
            team_size: rules::team_size(game.players.len(), game.team_size),
            failed_votes: round.failed_votes,
            votes_cast,
            result: round.result,
            deadline_at: round.deadline_at.map(format_time),
            akta_score: game.akta_score,
            golare_score: game.golare_score,
        }
    }
}
