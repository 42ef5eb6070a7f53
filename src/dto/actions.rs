//! Player interactions forwarded by the chat adapter.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::dao::models::{ActionChoice, PlayerId, VoteChoice};

/// Admin request to deal roles and post the first mission.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct StartGameRequest {
    #[validate(range(min = 1))]
    pub admin_id: PlayerId,
}

/// Capo toggling one player in or out of the proposed team.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct NominationRequest {
    /// Round the pressed keyboard belongs to.
    #[validate(range(min = 1, max = 5))]
    pub round_number: u8,
    #[validate(range(min = 1))]
    pub actor_id: PlayerId,
    #[validate(range(min = 1))]
    pub target_id: PlayerId,
    /// `true` adds the player, `false` removes them.
    pub include: bool,
}

/// Capo locking in the proposed team.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ConfirmTeamRequest {
    #[validate(range(min = 1, max = 5))]
    pub round_number: u8,
    #[validate(range(min = 1))]
    pub actor_id: PlayerId,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct VoteRequest {
    #[validate(range(min = 1, max = 5))]
    pub round_number: u8,
    #[validate(range(min = 1))]
    pub player_id: PlayerId,
    pub choice: VoteChoice,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct MissionActionRequest {
    #[validate(range(min = 1, max = 5))]
    pub round_number: u8,
    #[validate(range(min = 1))]
    pub player_id: PlayerId,
    pub choice: ActionChoice,
}

/// Whether a vote or action closed its phase.
#[derive(Debug, Serialize, ToSchema)]
pub struct CastResponse {
    pub recorded: bool,
    /// The phase resolved as a consequence of this submission.
    pub resolved: bool,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct FinalGuessRequest {
    #[validate(range(min = 1))]
    pub guesser_id: PlayerId,
    #[validate(range(min = 1))]
    pub target_id: PlayerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FinalGuessStatus {
    Accepted,
    AlreadyResolved,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FinalGuessResponse {
    pub status: FinalGuessStatus,
    /// Set for the accepted guess only.
    pub correct: Option<bool>,
}
