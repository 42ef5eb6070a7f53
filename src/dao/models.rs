use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::state_machine::RoundPhase;

/// Chat-platform user identifier; doubles as the player's private chat destination.
pub type PlayerId = i64;
/// Chat-platform destination identifier (group or private chat).
pub type ChatId = i64;
/// Chat-platform message identifier, scoped to its destination.
pub type MessageId = i64;

/// Lifecycle state of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    /// Players are still registering.
    Lobby,
    /// Rounds are being played.
    Active,
    /// The game reached a winner.
    Finished,
    /// The game was aborted by its admin.
    Cancelled,
}

impl GameState {
    /// Finished and cancelled games never change again.
    pub fn is_over(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }
}

/// The two hidden factions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Loyal crew; scores on successful missions.
    Akta,
    /// Informers; score on failed missions.
    Golare,
}

impl Side {
    /// The other side.
    pub fn opponent(self) -> Side {
        match self {
            Side::Akta => Side::Golare,
            Side::Golare => Side::Akta,
        }
    }
}

/// Ja/nej choice on a proposed team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Ja,
    Nej,
}

/// Secret choice of a team member during execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActionChoice {
    /// Secure the mission (non-sabotage).
    Sakra,
    /// Sabotage the mission.
    Gola,
}

/// Outcome of a round's mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MissionResult {
    Success,
    Fail,
    /// Automatic failure after three consecutive rejected proposals.
    KaosFail,
}

impl MissionResult {
    /// Side credited with the round's points.
    pub fn credited_side(self) -> Side {
        match self {
            MissionResult::Success => Side::Akta,
            MissionResult::Fail | MissionResult::KaosFail => Side::Golare,
        }
    }
}

/// Registered player, in seat order once the game has started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    pub id: PlayerId,
    pub name: String,
    /// Assigned when the game starts.
    pub side: Option<Side>,
    /// Key player of their side; the target of the final guess.
    #[serde(default)]
    pub key_player: bool,
}

/// Pending final-guess window opened when a side reached the score cap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndgameEntity {
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub deadline_at: OffsetDateTime,
    /// Side that reached the cap and wins unless the guess is correct.
    pub leading_side: Side,
    /// Side allowed to guess.
    pub guessing_side: Side,
}

/// Aggregate game entity persisted by the storage layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameEntity {
    pub id: Uuid,
    /// Group chat where public notifications go.
    pub group_chat: ChatId,
    pub admin_id: PlayerId,
    pub state: GameState,
    /// Highest round number posted so far.
    pub round_counter: u8,
    pub akta_score: u8,
    pub golare_score: u8,
    /// Fixed team size overriding the player-count table.
    pub team_size: Option<u8>,
    pub players: Vec<PlayerEntity>,
    pub endgame: Option<EndgameEntity>,
    pub winner: Option<Side>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl GameEntity {
    /// Look up a registered player.
    pub fn player(&self, id: PlayerId) -> Option<&PlayerEntity> {
        self.players.iter().find(|player| player.id == id)
    }

    /// Whether `id` belongs to a registered player.
    pub fn is_player(&self, id: PlayerId) -> bool {
        self.player(id).is_some()
    }

    /// Display name for `id`, falling back to the raw identifier.
    pub fn player_name(&self, id: PlayerId) -> String {
        self.player(id)
            .map(|player| player.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Players assigned to `side`, in seat order.
    pub fn members_of(&self, side: Side) -> impl Iterator<Item = &PlayerEntity> {
        self.players
            .iter()
            .filter(move |player| player.side == Some(side))
    }

    /// Current score of `side`.
    pub fn score_of(&self, side: Side) -> u8 {
        match side {
            Side::Akta => self.akta_score,
            Side::Golare => self.golare_score,
        }
    }
}

/// Message ids kept on a round so later notifications can edit or unpin them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundMessages {
    pub mission: Option<MessageId>,
    pub nomination: Option<MessageId>,
    pub vote: Option<MessageId>,
    /// Set once the daily wrap-up for this round went out.
    #[serde(default)]
    pub summary_sent: bool,
}

/// A single round of a game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundEntity {
    pub id: Uuid,
    pub game_id: Uuid,
    /// 1..=5
    pub round_number: u8,
    pub phase: RoundPhase,
    pub capo_id: PlayerId,
    /// Nominated players in pick order.
    pub team: Vec<PlayerId>,
    /// Consecutive failed proposals in this round (0..=3).
    pub failed_votes: u8,
    pub result: Option<MissionResult>,
    /// When the current phase times out.
    pub deadline_at: Option<OffsetDateTime>,
    pub messages: RoundMessages,
    /// Bumped on every write; round updates are compare-and-swap on it.
    pub version: u64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// A ja/nej vote, unique per `(round_id, player_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteEntity {
    pub round_id: Uuid,
    pub player_id: PlayerId,
    pub choice: VoteChoice,
    pub cast_at: OffsetDateTime,
}

/// A säkra/gola action, unique per `(round_id, player_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionActionEntity {
    pub round_id: Uuid,
    pub player_id: PlayerId,
    pub choice: ActionChoice,
    pub cast_at: OffsetDateTime,
}

/// The single Sista Chansen record of a game.
///
/// A record without target is written when the guess window timed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalGuessEntity {
    pub game_id: Uuid,
    pub guessing_side: Side,
    pub target_id: Option<PlayerId>,
    pub guesser_id: Option<PlayerId>,
    pub correct: bool,
    pub created_at: OffsetDateTime,
}
