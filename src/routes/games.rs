//! Webhook routes the chat adapter calls for lobby management and player input.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::{
        actions::{
            CastResponse, ConfirmTeamRequest, FinalGuessRequest, FinalGuessResponse,
            FinalGuessStatus, MissionActionRequest, NominationRequest, StartGameRequest,
            VoteRequest,
        },
        game::{CreateGameRequest, GameSummary},
        round::RoundSnapshot,
    },
    error::AppError,
    services::{
        final_guess_service::{self, GuessOutcome},
        game_service, round_service,
    },
    state::SharedState,
};

/// Routes handling games and their rounds.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/games", post(create_game))
        .route("/games/{id}", get(get_game))
        .route("/games/{id}/start", post(start_game))
        .route("/games/{id}/round", get(current_round))
        .route("/games/{id}/nomination", post(nominate))
        .route("/games/{id}/nomination/confirm", post(confirm_team))
        .route("/games/{id}/votes", post(cast_vote))
        .route("/games/{id}/actions", post(cast_action))
        .route("/games/{id}/final-guess", post(final_guess))
}

/// Open a lobby for a group chat.
#[utoipa::path(
    post,
    path = "/games",
    tag = "game",
    request_body = CreateGameRequest,
    responses(
        (status = 200, description = "Lobby created", body = GameSummary),
        (status = 400, description = "Invalid roster")
    )
)]
pub async fn create_game(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateGameRequest>>,
) -> Result<Json<GameSummary>, AppError> {
    Ok(Json(game_service::create_game(&state, payload).await?))
}

/// Fetch a game summary.
#[utoipa::path(
    get,
    path = "/games/{id}",
    tag = "game",
    params(("id" = Uuid, Path, description = "Game identifier")),
    responses(
        (status = 200, description = "Game found", body = GameSummary),
        (status = 404, description = "Unknown game")
    )
)]
pub async fn get_game(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GameSummary>, AppError> {
    Ok(Json(game_service::game_summary(&state, id).await?))
}

/// Deal roles and post the first mission. Admin only.
#[utoipa::path(
    post,
    path = "/games/{id}/start",
    tag = "game",
    params(("id" = Uuid, Path, description = "Game identifier")),
    request_body = StartGameRequest,
    responses(
        (status = 200, description = "Game started", body = RoundSnapshot),
        (status = 403, description = "Not the game admin"),
        (status = 409, description = "Game already started or roster out of range")
    )
)]
pub async fn start_game(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<StartGameRequest>>,
) -> Result<Json<RoundSnapshot>, AppError> {
    Ok(Json(
        round_service::start_game(&state, id, payload.admin_id).await?,
    ))
}

/// Snapshot of the latest round.
#[utoipa::path(
    get,
    path = "/games/{id}/round",
    tag = "round",
    params(("id" = Uuid, Path, description = "Game identifier")),
    responses(
        (status = 200, description = "Latest round", body = RoundSnapshot),
        (status = 404, description = "Unknown game or no round yet")
    )
)]
pub async fn current_round(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RoundSnapshot>, AppError> {
    Ok(Json(round_service::round_snapshot(&state, id).await?))
}

/// Add or remove one player from the proposed team. Capo only.
#[utoipa::path(
    post,
    path = "/games/{id}/nomination",
    tag = "round",
    params(("id" = Uuid, Path, description = "Game identifier")),
    request_body = NominationRequest,
    responses(
        (status = 200, description = "Team updated", body = RoundSnapshot),
        (status = 403, description = "Not the capo"),
        (status = 409, description = "Nomination closed, team full or the round has moved on")
    )
)]
pub async fn nominate(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<NominationRequest>>,
) -> Result<Json<RoundSnapshot>, AppError> {
    let snapshot = round_service::set_nominee(
        &state,
        id,
        payload.round_number,
        payload.actor_id,
        payload.target_id,
        payload.include,
    )
    .await?;
    Ok(Json(snapshot))
}

/// Lock in the team and open the vote. Capo only.
#[utoipa::path(
    post,
    path = "/games/{id}/nomination/confirm",
    tag = "round",
    params(("id" = Uuid, Path, description = "Game identifier")),
    request_body = ConfirmTeamRequest,
    responses(
        (status = 200, description = "Voting opened", body = RoundSnapshot),
        (status = 400, description = "Team size does not match"),
        (status = 403, description = "Not the capo")
    )
)]
pub async fn confirm_team(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<ConfirmTeamRequest>>,
) -> Result<Json<RoundSnapshot>, AppError> {
    Ok(Json(
        round_service::confirm_team(&state, id, payload.round_number, payload.actor_id).await?,
    ))
}

/// Cast or change a ja/nej vote.
#[utoipa::path(
    post,
    path = "/games/{id}/votes",
    tag = "round",
    params(("id" = Uuid, Path, description = "Game identifier")),
    request_body = VoteRequest,
    responses(
        (status = 200, description = "Vote recorded", body = CastResponse),
        (status = 409, description = "Voting is not open or the round has moved on")
    )
)]
pub async fn cast_vote(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<VoteRequest>>,
) -> Result<Json<CastResponse>, AppError> {
    let resolved = round_service::cast_vote(
        &state,
        id,
        payload.round_number,
        payload.player_id,
        payload.choice,
    )
    .await?;
    Ok(Json(CastResponse {
        recorded: true,
        resolved,
    }))
}

/// Cast or change a säkra/gola action. Team members only.
#[utoipa::path(
    post,
    path = "/games/{id}/actions",
    tag = "round",
    params(("id" = Uuid, Path, description = "Game identifier")),
    request_body = MissionActionRequest,
    responses(
        (status = 200, description = "Action recorded", body = CastResponse),
        (status = 403, description = "Not on the team"),
        (status = 409, description = "The mission is not running or the round has moved on")
    )
)]
pub async fn cast_action(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<MissionActionRequest>>,
) -> Result<Json<CastResponse>, AppError> {
    let resolved = round_service::cast_action(
        &state,
        id,
        payload.round_number,
        payload.player_id,
        payload.choice,
    )
    .await?;
    Ok(Json(CastResponse {
        recorded: true,
        resolved,
    }))
}

/// Submit the Sista Chansen guess.
#[utoipa::path(
    post,
    path = "/games/{id}/final-guess",
    tag = "endgame",
    params(("id" = Uuid, Path, description = "Game identifier")),
    request_body = FinalGuessRequest,
    responses(
        (status = 200, description = "Guess accepted or already resolved", body = FinalGuessResponse),
        (status = 403, description = "Not on the guessing side"),
        (status = 409, description = "No guess window is open")
    )
)]
pub async fn final_guess(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<FinalGuessRequest>>,
) -> Result<Json<FinalGuessResponse>, AppError> {
    let outcome =
        final_guess_service::submit_guess(&state, id, payload.guesser_id, payload.target_id)
            .await?;
    let response = match outcome {
        GuessOutcome::Accepted { correct } => FinalGuessResponse {
            status: FinalGuessStatus::Accepted,
            correct: Some(correct),
        },
        GuessOutcome::AlreadyResolved => FinalGuessResponse {
            status: FinalGuessStatus::AlreadyResolved,
            correct: None,
        },
    };
    Ok(Json(response))
}
