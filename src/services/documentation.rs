use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the Golare backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::games::create_game,
        crate::routes::games::get_game,
        crate::routes::games::start_game,
        crate::routes::games::current_round,
        crate::routes::games::nominate,
        crate::routes::games::confirm_team,
        crate::routes::games::cast_vote,
        crate::routes::games::cast_action,
        crate::routes::games::final_guess,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::game::CreateGameRequest,
            crate::dto::game::PlayerInput,
            crate::dto::game::GameSummary,
            crate::dto::round::RoundSnapshot,
            crate::dto::round::PlayerSummary,
            crate::dto::actions::StartGameRequest,
            crate::dto::actions::NominationRequest,
            crate::dto::actions::ConfirmTeamRequest,
            crate::dto::actions::VoteRequest,
            crate::dto::actions::MissionActionRequest,
            crate::dto::actions::CastResponse,
            crate::dto::actions::FinalGuessRequest,
            crate::dto::actions::FinalGuessResponse,
            crate::dto::actions::FinalGuessStatus,
            crate::dao::models::GameState,
            crate::dao::models::Side,
            crate::dao::models::VoteChoice,
            crate::dao::models::ActionChoice,
            crate::dao::models::MissionResult,
            crate::state::state_machine::RoundPhase,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "game", description = "Lobby creation and game start"),
        (name = "round", description = "Nomination, votes and mission actions"),
        (name = "endgame", description = "Sista Chansen"),
    )
)]
pub struct ApiDoc;
