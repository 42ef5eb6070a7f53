//! Startup recovery: re-arm what a restart lost and catch up on missed triggers.
//!
//! Only the handler for the phase expected right now is fired. Every handler
//! re-derives its work from stored state, so one call covers any number of
//! missed earlier triggers.

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::ScheduledAction,
    dao::models::GameEntity,
    error::ServiceError,
    services::{
        final_guess_service::{self, EndgameResume},
        round_service, scheduler,
    },
    state::{SharedState, state_machine::RoundPhase},
};

/// Why catch-up was skipped for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySkip {
    NotGameDay,
    BeforeFirstTrigger,
}

/// What recovery did for one game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRecovery {
    pub game_id: Uuid,
    pub endgame: EndgameResume,
    pub timer_rearmed: bool,
    /// Catch-up handler fired for the game, if it lagged behind.
    pub handler: Option<ScheduledAction>,
    pub failed: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub skipped: Option<RecoverySkip>,
    pub games: Vec<GameRecovery>,
}

impl RecoveryReport {
    pub fn game(&self, game_id: Uuid) -> Option<&GameRecovery> {
        self.games.iter().find(|game| game.game_id == game_id)
    }
}

/// Handler that brings a round up to `expected`.
fn catch_up_handler(expected: RoundPhase) -> ScheduledAction {
    match expected {
        RoundPhase::MissionPosted => ScheduledAction::MissionPost,
        RoundPhase::Nomination => ScheduledAction::NominationOpen,
        RoundPhase::Voting => ScheduledAction::NominationDeadline,
        RoundPhase::Execution => ScheduledAction::VotingDeadline,
        RoundPhase::Reveal => ScheduledAction::ExecutionDeadline,
    }
}

/// Run once after the transport is confirmed reachable.
pub async fn recover_on_startup(state: &SharedState) -> RecoveryReport {
    let store = match state.require_game_store().await {
        Ok(store) => store,
        Err(err) => {
            warn!(error = %err, "skipping recovery without storage");
            return RecoveryReport::default();
        }
    };
    let games = match store.list_active_games().await {
        Ok(games) => games,
        Err(err) => {
            warn!(error = %err, "failed to list active games for recovery");
            return RecoveryReport::default();
        }
    };

    let now = state.now();
    let config = state.config();
    let skipped = if !config.is_game_day(now) {
        Some(RecoverySkip::NotGameDay)
    } else if config.first_trigger_today(now).is_none_or(|first| now < first) {
        Some(RecoverySkip::BeforeFirstTrigger)
    } else {
        None
    };

    let mut report = RecoveryReport {
        skipped,
        games: Vec::with_capacity(games.len()),
    };
    for game in &games {
        let outcome = match recover_game(state, game, skipped.is_none()).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(game_id = %game.id, error = %err, "recovery failed for game");
                GameRecovery {
                    game_id: game.id,
                    endgame: EndgameResume::NotPending,
                    timer_rearmed: false,
                    handler: None,
                    failed: true,
                }
            }
        };
        report.games.push(outcome);
    }

    info!(
        games = report.games.len(),
        skipped = ?report.skipped,
        caught_up = report.games.iter().filter(|game| game.handler.is_some()).count(),
        "startup recovery done"
    );
    report
}

async fn recover_game(
    state: &SharedState,
    game: &GameEntity,
    catch_up: bool,
) -> Result<GameRecovery, ServiceError> {
    let mut outcome = GameRecovery {
        game_id: game.id,
        endgame: final_guess_service::resume_endgame(state, game.id).await?,
        timer_rearmed: false,
        handler: None,
        failed: false,
    };
    if outcome.endgame != EndgameResume::NotPending {
        return Ok(outcome);
    }

    let store = state.require_game_store().await?;
    let latest = store.latest_round(game.id).await?;
    if let Some(round) = &latest {
        outcome.timer_rearmed = round_service::rearm_phase_timer(state, round).await?;
    }
    if !catch_up {
        return Ok(outcome);
    }

    let now = state.now();
    let config = state.config();
    let Some(trigger) = config.latest_trigger(now) else {
        return Ok(outcome);
    };
    let expected = trigger.expected_phase();

    let handler = match latest {
        None => Some(ScheduledAction::MissionPost),
        Some(round) if round.phase.is_terminal() => config
            .first_trigger_today(now)
            .filter(|first| round.created_at < *first)
            .map(|_| ScheduledAction::MissionPost),
        Some(round) if round.phase.rank() < expected.rank() => Some(catch_up_handler(expected)),
        Some(_) => None,
    };
    if let Some(handler) = handler {
        info!(
            game_id = %game.id,
            trigger = trigger.key(),
            handler = handler.key(),
            "game lags behind the timetable; catching up"
        );
        scheduler::fire(state, handler, game.id).await?;
        outcome.handler = Some(handler);
    }
    Ok(outcome)
}
