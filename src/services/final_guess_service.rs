//! Sista Chansen: the single guess that can flip a decided game, and the
//! reveal that closes it.
//!
//! The first record written through the store's insert-if-absent wins,
//! whether it is a player's guess or the timeout's empty record.

use futures::future::BoxFuture;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{EndgameEntity, FinalGuessEntity, GameEntity, GameState, PlayerId, Side},
    delivery::SendOptions,
    error::ServiceError,
    narrative::NarrativeRequest,
    services::{
        notifications,
        round_service::{DEADLINE_GRACE, RoundContext},
    },
    state::{SharedState, session::TimerPurpose},
};

/// What happened to a submitted guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessOutcome {
    /// This guess is the canonical one.
    Accepted { correct: bool },
    /// Another guess or the timeout got there first.
    AlreadyResolved,
}

/// What recovery did with a game's endgame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndgameResume {
    NotPending,
    Rearmed,
    Finished,
}

/// Open the guess window once `leading` is decided.
pub(crate) async fn open_endgame(
    ctx: &RoundContext<'_>,
    game: &mut GameEntity,
    leading: Side,
) -> Result<(), ServiceError> {
    if game.endgame.is_some() {
        return Ok(());
    }
    let guessing = leading.opponent();
    let endgame = EndgameEntity {
        started_at: ctx.now,
        deadline_at: ctx.now + ctx.config().deadlines.final_guess,
        leading_side: leading,
        guessing_side: guessing,
    };
    game.endgame = Some(endgame.clone());
    ctx.save_game(game).await?;
    info!(game_id = %game.id, ?leading, deadline = %endgame.deadline_at, "endgame opened");

    ctx.dispatch(
        game.group_chat,
        notifications::endgame_announcement(leading, guessing),
        SendOptions::default(),
    );
    for member in game.members_of(guessing) {
        let (text, options) = notifications::final_guess_prompt(game, member.id);
        ctx.dispatch(member.id, text, options);
    }
    arm_timeout(ctx, game.id, &endgame);
    Ok(())
}

fn arm_timeout(ctx: &RoundContext<'_>, game_id: Uuid, endgame: &EndgameEntity) {
    let state = ctx.state.clone();
    ctx.state.sessions().arm_at(
        game_id,
        TimerPurpose::FinalGuess,
        endgame.deadline_at,
        ctx.now,
        move || timeout_task(state, game_id),
    );
}

fn timeout_task(state: SharedState, game_id: Uuid) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        match resolve_timeout(&state, game_id).await {
            Ok(true) => info!(game_id = %game_id, "final guess window closed without a guess"),
            Ok(false) => debug!(game_id = %game_id, "final guess timeout had nothing to do"),
            Err(err) => warn!(game_id = %game_id, error = %err, "final guess timeout failed"),
        }
    })
}

/// Submit the guessing side's pick for the opposing key player.
pub async fn submit_guess(
    state: &SharedState,
    game_id: Uuid,
    guesser: PlayerId,
    target: PlayerId,
) -> Result<GuessOutcome, ServiceError> {
    let ctx = RoundContext::open(state).await?;
    let (_gate, game) = ctx.lock_game(game_id).await?;
    if game.state == GameState::Finished && ctx.store.find_final_guess(game_id).await?.is_some() {
        return Ok(GuessOutcome::AlreadyResolved);
    }
    let endgame = match (&game.state, &game.endgame) {
        (GameState::Active, Some(endgame)) => endgame.clone(),
        _ => return Err(ServiceError::InvalidState("no final guess is open".into())),
    };
    let on_guessing_side = game
        .player(guesser)
        .is_some_and(|player| player.side == Some(endgame.guessing_side));
    if !on_guessing_side {
        return Err(ServiceError::Forbidden(
            "only the guessing side may make the final guess".into(),
        ));
    }
    if target == guesser || !game.is_player(target) {
        return Err(ServiceError::InvalidInput(format!(
            "player `{target}` cannot be guessed"
        )));
    }
    if ctx.now > endgame.deadline_at {
        return Err(ServiceError::InvalidState(
            "the final guess window has closed".into(),
        ));
    }

    let correct = game
        .player(target)
        .is_some_and(|player| player.side == Some(endgame.leading_side) && player.key_player);
    let record = FinalGuessEntity {
        game_id,
        guessing_side: endgame.guessing_side,
        target_id: Some(target),
        guesser_id: Some(guesser),
        correct,
        created_at: ctx.now,
    };
    match ctx.store.insert_final_guess(record.clone()).await {
        Err(err) if err.is_conflict() => {
            info!(game_id = %game_id, guesser, "final guess already recorded");
            if let Some(existing) = ctx.store.find_final_guess(game_id).await? {
                finish_game(&ctx, game, existing).await?;
            }
            return Ok(GuessOutcome::AlreadyResolved);
        }
        other => other?,
    }
    state.sessions().cancel(game_id, TimerPurpose::FinalGuess);
    info!(game_id = %game_id, guesser, target, correct, "final guess recorded");

    finish_game(&ctx, game, record).await?;
    Ok(GuessOutcome::Accepted { correct })
}

/// Close an expired guess window with an empty record.
///
/// Returns whether this call decided the game.
pub async fn resolve_timeout(state: &SharedState, game_id: Uuid) -> Result<bool, ServiceError> {
    let ctx = RoundContext::open(state).await?;
    let (_gate, game) = ctx.lock_game(game_id).await?;
    let Some(endgame) = game.endgame.clone().filter(|_| game.state == GameState::Active) else {
        return Ok(false);
    };
    if ctx.now + DEADLINE_GRACE < endgame.deadline_at {
        return Ok(false);
    }
    let (record, inserted) = record_timeout(&ctx, &endgame, game_id).await?;
    finish_game(&ctx, game, record).await?;
    Ok(inserted)
}

/// Pick up a pending endgame after a restart.
pub async fn resume_endgame(state: &SharedState, game_id: Uuid) -> Result<EndgameResume, ServiceError> {
    let ctx = RoundContext::open(state).await?;
    let (_gate, game) = ctx.lock_game(game_id).await?;
    let Some(endgame) = game.endgame.clone().filter(|_| game.state == GameState::Active) else {
        return Ok(EndgameResume::NotPending);
    };

    if let Some(record) = ctx.store.find_final_guess(game_id).await? {
        finish_game(&ctx, game, record).await?;
        return Ok(EndgameResume::Finished);
    }
    if ctx.now + DEADLINE_GRACE >= endgame.deadline_at {
        let (record, _) = record_timeout(&ctx, &endgame, game_id).await?;
        finish_game(&ctx, game, record).await?;
        return Ok(EndgameResume::Finished);
    }
    arm_timeout(&ctx, game_id, &endgame);
    Ok(EndgameResume::Rearmed)
}

/// Write the "no guess" record, or load whichever record beat it.
async fn record_timeout(
    ctx: &RoundContext<'_>,
    endgame: &EndgameEntity,
    game_id: Uuid,
) -> Result<(FinalGuessEntity, bool), ServiceError> {
    let record = FinalGuessEntity {
        game_id,
        guessing_side: endgame.guessing_side,
        target_id: None,
        guesser_id: None,
        correct: false,
        created_at: ctx.now,
    };
    match ctx.store.insert_final_guess(record.clone()).await {
        Ok(()) => Ok((record, true)),
        Err(err) if err.is_conflict() => {
            debug!(game_id = %game_id, "final guess recorded before the timeout");
            let existing = ctx
                .store
                .find_final_guess(game_id)
                .await?
                .ok_or_else(|| ServiceError::InvalidState("final guess record vanished".into()))?;
            Ok((existing, false))
        }
        Err(err) => Err(err.into()),
    }
}

/// Store the winner, then hand the reveal to a detached task.
async fn finish_game(
    ctx: &RoundContext<'_>,
    mut game: GameEntity,
    record: FinalGuessEntity,
) -> Result<(), ServiceError> {
    let Some(endgame) = game.endgame.clone().filter(|_| game.state == GameState::Active) else {
        return Ok(());
    };
    let winner = if record.correct {
        endgame.guessing_side
    } else {
        endgame.leading_side
    };
    game.winner = Some(winner);
    game.state = GameState::Finished;
    ctx.save_game(&mut game).await?;
    ctx.state.sessions().cancel(game.id, TimerPurpose::FinalGuess);
    info!(game_id = %game.id, ?winner, correct = record.correct, "game finished");

    tokio::spawn(reveal_sequence(ctx.state.clone(), game, record, winner));
    Ok(())
}

async fn reveal_sequence(state: SharedState, game: GameEntity, record: FinalGuessEntity, winner: Side) {
    let intro = state
        .narrative()
        .compose(&NarrativeRequest::FinalReveal {
            winner,
            guess_correct: record.target_id.map(|_| record.correct),
        })
        .await;

    let mut messages = vec![
        intro,
        notifications::guess_outcome(&game, record.target_id, record.correct),
    ];
    messages.extend(game.members_of(Side::Golare).map(notifications::golare_reveal));
    messages.push(notifications::winner(winner));

    let pacing = state.config().reveal_pacing;
    for (index, text) in messages.into_iter().enumerate() {
        if index > 0 {
            sleep(pacing).await;
        }
        if let Err(err) = state
            .delivery()
            .send(game.group_chat, text, SendOptions::default())
            .await
        {
            warn!(game_id = %game.id, error = %err, "failed to deliver reveal message");
        }
    }

    state.sessions().teardown(game.id);
    info!(game_id = %game.id, "reveal finished; session closed");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;
    use crate::dao::game_store::GameStore;
    use crate::services::testing::TestGame;

    const HOUR: Duration = Duration::from_secs(60 * 60);
    const TEN_MINUTES: Duration = Duration::from_secs(10 * 60);

    /// Five players: 1..=3 äkta with 1 as tipsare, 4 and 5 golare with 5 as key player.
    async fn endgame(deadline_in: Duration) -> (TestGame, Uuid) {
        let harness = TestGame::new().await;
        let game_id = harness.seed_game(5, GameState::Active).await;
        harness.seed_endgame(game_id, Side::Golare, deadline_in).await;
        (harness, game_id)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_guesses_leave_one_record() {
        let (harness, game_id) = endgame(HOUR).await;

        let (first, second) = tokio::join!(
            submit_guess(&harness.state, game_id, 1, 5),
            submit_guess(&harness.state, game_id, 2, 4),
        );
        let outcomes = [first.unwrap(), second.unwrap()];
        assert_eq!(
            outcomes
                .iter()
                .filter(|outcome| **outcome == GuessOutcome::AlreadyResolved)
                .count(),
            1
        );

        let record = harness.store.find_final_guess(game_id).await.unwrap().unwrap();
        let game = harness.game(game_id).await;
        assert_eq!(game.state, GameState::Finished);
        let expected_winner = if record.correct { Side::Akta } else { Side::Golare };
        assert_eq!(game.winner, Some(expected_winner));
        assert_eq!(record.correct, record.target_id == Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn correct_guess_flips_the_winner_and_reveals() {
        let (harness, game_id) = endgame(HOUR).await;

        let outcome = submit_guess(&harness.state, game_id, 2, 5).await.unwrap();
        assert_eq!(outcome, GuessOutcome::Accepted { correct: true });
        assert_eq!(harness.game(game_id).await.winner, Some(Side::Akta));
        assert_eq!(
            submit_guess(&harness.state, game_id, 3, 4).await.unwrap(),
            GuessOutcome::AlreadyResolved
        );

        harness.settle().await;
        let texts = harness.group_texts();
        assert_eq!(texts.iter().filter(|text| text.contains("</b> var golare")).count(), 2);
        assert!(texts.last().unwrap().contains("Äkta"));
        let gaps: Vec<Duration> = harness
            .transport
            .sent()
            .windows(2)
            .map(|pair| pair[1].at - pair[0].at)
            .collect();
        assert!(gaps.iter().all(|gap| *gap >= harness.state.config().reveal_pacing));
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_guessing_side_may_guess() {
        let (harness, game_id) = endgame(HOUR).await;

        let err = submit_guess(&harness.state, game_id, 4, 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
        let err = submit_guess(&harness.state, game_id, 1, 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        let err = submit_guess(&harness.state, game_id, 1, 42).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        assert!(harness.store.find_final_guess(game_id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_finishes_without_a_guess() {
        let (harness, game_id) = endgame(TEN_MINUTES).await;

        assert_eq!(
            resume_endgame(&harness.state, game_id).await.unwrap(),
            EndgameResume::Rearmed
        );
        sleep(TEN_MINUTES + Duration::from_secs(1)).await;

        let record = harness.store.find_final_guess(game_id).await.unwrap().unwrap();
        assert_eq!(record.target_id, None);
        let game = harness.game(game_id).await;
        assert_eq!(game.state, GameState::Finished);
        assert_eq!(game.winner, Some(Side::Golare));

        let late = submit_guess(&harness.state, game_id, 1, 5).await.unwrap();
        assert_eq!(late, GuessOutcome::AlreadyResolved);

        harness.settle().await;
        assert!(harness.group_texts().iter().any(|text| text.contains("Ingen gissning")));
        assert!(!harness.state.sessions().is_armed(game_id, TimerPurpose::FinalGuess));
    }

    #[tokio::test(start_paused = true)]
    async fn resume_after_the_window_resolves_immediately() {
        let (harness, game_id) = endgame(TEN_MINUTES).await;
        sleep(TEN_MINUTES + Duration::from_secs(5)).await;

        let err = submit_guess(&harness.state, game_id, 1, 5).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        assert_eq!(
            resume_endgame(&harness.state, game_id).await.unwrap(),
            EndgameResume::Finished
        );
        assert_eq!(harness.game(game_id).await.winner, Some(Side::Golare));
        assert_eq!(
            resume_endgame(&harness.state, game_id).await.unwrap(),
            EndgameResume::NotPending
        );
    }

    #[tokio::test(start_paused = true)]
    async fn guess_after_a_record_already_exists_is_not_an_error() {
        let (harness, game_id) = endgame(HOUR).await;
        let existing = FinalGuessEntity {
            game_id,
            guessing_side: Side::Akta,
            target_id: Some(4),
            guesser_id: Some(3),
            correct: false,
            created_at: harness.state.now(),
        };
        harness.store.insert_final_guess(existing).await.unwrap();
        assert_eq!(harness.game(game_id).await.state, GameState::Active);

        let outcome = submit_guess(&harness.state, game_id, 1, 5).await.unwrap();
        assert_eq!(outcome, GuessOutcome::AlreadyResolved);

        let record = harness.store.find_final_guess(game_id).await.unwrap().unwrap();
        assert_eq!(record.guesser_id, Some(3));
        assert_eq!(record.target_id, Some(4));
        let game = harness.game(game_id).await;
        assert_eq!(game.state, GameState::Finished);
        assert_eq!(game.winner, Some(Side::Golare));
    }
}
