use tracing::info;
use uuid::Uuid;

use crate::{
    dao::models::{GameEntity, GameState, PlayerEntity},
    dto::game::{CreateGameRequest, GameSummary, PlayerInput},
    error::ServiceError,
    services::rules::{MAX_PLAYERS, MIN_PLAYERS},
    state::SharedState,
};

/// Open a lobby for a group chat with the given roster.
pub async fn create_game(
    state: &SharedState,
    request: CreateGameRequest,
) -> Result<GameSummary, ServiceError> {
    let store = state.require_game_store().await?;
    let game = build_game(request, state.now())?;
    store.save_game(game.clone()).await?;
    info!(
        game_id = %game.id,
        group_chat = game.group_chat,
        players = game.players.len(),
        "lobby created"
    );
    Ok(GameSummary::from(&game))
}

/// Look up a game by id.
pub async fn game_summary(state: &SharedState, id: Uuid) -> Result<GameSummary, ServiceError> {
    let store = state.require_game_store().await?;
    let Some(game) = store.find_game(id).await? else {
        return Err(ServiceError::NotFound(format!("game `{id}` not found")));
    };
    Ok(GameSummary::from(&game))
}

fn build_game(request: CreateGameRequest, now: time::OffsetDateTime) -> Result<GameEntity, ServiceError> {
    let CreateGameRequest {
        group_chat,
        admin_id,
        team_size,
        players,
    } = request;

    if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&players.len()) {
        return Err(ServiceError::InvalidInput(format!(
            "a game takes {MIN_PLAYERS} to {MAX_PLAYERS} players"
        )));
    }

    let players = players
        .into_iter()
        .map(|PlayerInput { id, name }| {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(ServiceError::InvalidInput(
                    "player name must not be empty".into(),
                ));
            }
            Ok(PlayerEntity {
                id,
                name,
                side: None,
                key_player: false,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(GameEntity {
        id: Uuid::new_v4(),
        group_chat,
        admin_id,
        state: GameState::Lobby,
        round_counter: 0,
        akta_score: 0,
        golare_score: 0,
        team_size,
        players,
        endgame: None,
        winner: None,
        created_at: now,
        updated_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::TestGame;

    #[tokio::test]
    async fn lobby_is_persisted_with_trimmed_names() {
        let harness = TestGame::new().await;
        let request = CreateGameRequest {
            group_chat: -42,
            admin_id: 1,
            team_size: None,
            players: (1..=4)
                .map(|id| PlayerInput {
                    id,
                    name: format!("  spelare {id} "),
                })
                .collect(),
        };

        let summary = create_game(&harness.state, request).await.unwrap();
        assert_eq!(summary.state, GameState::Lobby);
        assert_eq!(summary.players[0].name, "spelare 1");

        let loaded = game_summary(&harness.state, summary.id).await.unwrap();
        assert_eq!(loaded.players.len(), 4);
    }

    #[tokio::test]
    async fn blank_names_are_rejected() {
        let harness = TestGame::new().await;
        let request = CreateGameRequest {
            group_chat: -42,
            admin_id: 1,
            team_size: None,
            players: (1..=4)
                .map(|id| PlayerInput {
                    id,
                    name: if id == 3 { "   ".into() } else { format!("p{id}") },
                })
                .collect(),
        };
        let err = create_game(&harness.state, request).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(message) if message.contains("name")));
    }

    #[tokio::test]
    async fn short_rosters_are_rejected() {
        let harness = TestGame::new().await;
        let request = CreateGameRequest {
            group_chat: -42,
            admin_id: 1,
            team_size: None,
            players: (1..=3)
                .map(|id| PlayerInput {
                    id,
                    name: format!("p{id}"),
                })
                .collect(),
        };
        let err = create_game(&harness.state, request).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(message) if message.contains("4 to 10")));
    }
}
