//! Weekday timetable driver: sleeps until the next trigger and runs its
//! coordinator entry point for every active game.

use std::time::Duration;

use futures::future::join_all;
use time::OffsetDateTime;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::{AppConfig, ScheduledAction},
    error::ServiceError,
    services::round_service,
    state::SharedState,
};

/// Days scanned ahead for the next trigger; covers any weekend.
const LOOKAHEAD_DAYS: i64 = 7;
const IDLE_RETRY: Duration = Duration::from_secs(60 * 60);

/// Outcome of one trigger across all active games.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Games where the entry point changed something.
    pub acted: usize,
    /// Games where the entry point had nothing to do.
    pub idle: usize,
    pub failed: usize,
}

/// Next trigger strictly after `now` on a game day.
pub fn next_trigger(config: &AppConfig, now: OffsetDateTime) -> Option<(ScheduledAction, OffsetDateTime)> {
    let today = config.local(now).date();
    for offset in 0..=LOOKAHEAD_DAYS {
        let Some(date) = today.checked_add(time::Duration::days(offset)) else {
            break;
        };
        let midday = date.with_time(time::macros::time!(12:00)).assume_offset(config.timezone);
        if !config.is_game_day(midday) {
            continue;
        }
        let upcoming = config
            .timetable
            .entries()
            .iter()
            .map(|(action, at)| (*action, date.with_time(*at).assume_offset(config.timezone)))
            .find(|(_, instant)| *instant > now);
        if upcoming.is_some() {
            return upcoming;
        }
    }
    None
}

/// Drive the timetable forever.
pub async fn run(state: SharedState) {
    loop {
        let now = state.now();
        let Some((action, at)) = next_trigger(state.config(), now) else {
            warn!("timetable has no upcoming trigger; retrying later");
            sleep(IDLE_RETRY).await;
            continue;
        };
        let delay = Duration::try_from(at - now).unwrap_or(Duration::ZERO);
        info!(trigger = action.key(), at = %at, "next scheduled trigger");
        sleep(delay).await;

        let report = run_trigger(&state, action).await;
        info!(
            trigger = action.key(),
            acted = report.acted,
            idle = report.idle,
            failed = report.failed,
            "scheduled trigger done"
        );
    }
}

/// Run `action` for every active game; one game's failure never stops another.
pub async fn run_trigger(state: &SharedState, action: ScheduledAction) -> TickReport {
    let store = match state.require_game_store().await {
        Ok(store) => store,
        Err(err) => {
            warn!(trigger = action.key(), error = %err, "skipping trigger without storage");
            return TickReport::default();
        }
    };
    let games = match store.list_active_games().await {
        Ok(games) => games,
        Err(err) => {
            warn!(trigger = action.key(), error = %err, "failed to list active games");
            return TickReport::default();
        }
    };

    let outcomes = join_all(games.iter().map(|game| fire(state, action, game.id))).await;

    let mut report = TickReport::default();
    for (game, outcome) in games.iter().zip(outcomes) {
        match outcome {
            Ok(true) => report.acted += 1,
            Ok(false) => {
                debug!(game_id = %game.id, trigger = action.key(), "nothing to do");
                report.idle += 1;
            }
            Err(err) => {
                warn!(game_id = %game.id, trigger = action.key(), error = %err, "scheduled trigger failed");
                report.failed += 1;
            }
        }
    }
    report
}

/// Coordinator entry point bound to `action`. Returns whether it acted.
pub async fn fire(state: &SharedState, action: ScheduledAction, game_id: Uuid) -> Result<bool, ServiceError> {
    match action {
        ScheduledAction::MissionPost => Ok(round_service::post_mission(state, game_id).await?.is_some()),
        ScheduledAction::NominationReminder => round_service::remind_capo(state, game_id).await,
        ScheduledAction::ExecutionReminder => round_service::remind_team(state, game_id).await,
        ScheduledAction::WrapUp => round_service::wrap_up(state, game_id).await,
        ScheduledAction::NominationOpen
        | ScheduledAction::NominationDeadline
        | ScheduledAction::VotingDeadline
        | ScheduledAction::ExecutionDeadline => {
            let closed = round_service::catch_up(state, game_id, action.expected_phase()).await?;
            Ok(closed.is_some())
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::dao::game_store::GameStore;
    use crate::{
        dao::models::GameState,
        services::testing::TestGame,
        state::state_machine::RoundPhase,
    };

    #[test]
    fn next_trigger_is_later_today() {
        let config = AppConfig::default();
        assert_eq!(
            next_trigger(&config, datetime!(2025-01-15 09:30 +01:00)),
            Some((ScheduledAction::NominationOpen, datetime!(2025-01-15 10:00 +01:00)))
        );
        assert_eq!(
            next_trigger(&config, datetime!(2025-01-15 10:00 +01:00)),
            Some((ScheduledAction::NominationReminder, datetime!(2025-01-15 12:00 +01:00)))
        );
    }

    #[test]
    fn next_trigger_skips_the_weekend() {
        let config = AppConfig::default();
        // Friday evening after the wrap-up.
        assert_eq!(
            next_trigger(&config, datetime!(2025-01-17 20:30 +01:00)),
            Some((ScheduledAction::MissionPost, datetime!(2025-01-20 09:00 +01:00)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn one_broken_game_does_not_block_the_others() {
        let harness = TestGame::new().await;
        let healthy = harness.seed_game(5, GameState::Active).await;
        // Too few players for any team size.
        let broken = harness.seed_game(3, GameState::Active).await;

        let report = run_trigger(&harness.state, ScheduledAction::MissionPost).await;
        assert_eq!(report, TickReport { acted: 1, idle: 0, failed: 1 });
        assert_eq!(harness.latest_round(healthy).await.phase, RoundPhase::MissionPosted);
        assert!(harness.store.latest_round(broken).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_trigger_waits_for_a_later_relative_deadline() {
        let harness = TestGame::new().await;
        let game_id = harness.seed_game(5, GameState::Active).await;
        harness
            .seed_round(game_id, 1, RoundPhase::Nomination, 1, &[], Some(Duration::from_secs(3_600)))
            .await;

        assert!(!fire(&harness.state, ScheduledAction::NominationDeadline, game_id).await.unwrap());
        assert!(fire(&harness.state, ScheduledAction::NominationReminder, game_id).await.unwrap());
        assert_eq!(harness.latest_round(game_id).await.phase, RoundPhase::Nomination);
    }
}
