//! Round coordinator: every state change of a round goes through here.
//!
//! Player actions and deadline handlers for one game are serialized by the
//! game's session gate, and each round write is a compare-and-swap on the
//! round version. A handler that finds its phase already left, or its
//! deadline not yet reached, does nothing, so a scheduled trigger, a timer
//! and recovery may all fire the same handler.
//!
//! Nothing waits on the delivery queue while holding the gate. Messages whose
//! ids the round keeps are sent from a spawned task that stores the id
//! afterwards under the gate. Narration is awaited in place; it is bounded by
//! the narrative timeout and keeps result posts ahead of what follows them.

use std::{future::Future, sync::Arc, time::Duration};

use futures::future::{BoxFuture, ready};
use time::OffsetDateTime;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        game_store::GameStore,
        models::{
            ActionChoice, ChatId, GameEntity, GameState, MessageId, MissionActionEntity,
            MissionResult, PlayerId, RoundEntity, RoundMessages, VoteChoice, VoteEntity,
        },
    },
    delivery::{MessageHandle, SendOptions},
    dto::round::RoundSnapshot,
    error::ServiceError,
    narrative::NarrativeRequest,
    services::{
        final_guess_service,
        notifications,
        rules::{self, KAOS_THRESHOLD, LAST_ROUND, MAX_PLAYERS, MIN_PLAYERS, MissionTally, Scores, VoteTally},
    },
    state::{
        SharedState,
        session::TimerPurpose,
        state_machine::{self, RoundEvent, RoundPhase},
    },
};

/// Slack for timers and triggers firing a hair before the stored deadline.
pub(crate) const DEADLINE_GRACE: Duration = Duration::from_secs(1);

/// Everything one coordinator operation needs, captured once.
pub(crate) struct RoundContext<'a> {
    pub(crate) state: &'a SharedState,
    pub(crate) store: Arc<dyn GameStore>,
    pub(crate) now: OffsetDateTime,
}

impl<'a> RoundContext<'a> {
    pub(crate) async fn open(state: &'a SharedState) -> Result<Self, ServiceError> {
        Ok(Self {
            store: state.require_game_store().await?,
            now: state.now(),
            state,
        })
    }

    pub(crate) fn config(&self) -> &AppConfig {
        self.state.config()
    }

    pub(crate) async fn game(&self, game_id: Uuid) -> Result<GameEntity, ServiceError> {
        self.store
            .find_game(game_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("game `{game_id}` not found")))
    }

    async fn active_game(&self, game_id: Uuid) -> Result<GameEntity, ServiceError> {
        let game = self.game(game_id).await?;
        require_active(&game)?;
        Ok(game)
    }

    /// Take the game's session gate and load the game under it.
    ///
    /// Unknown ids fail before a session exists. Finished and cancelled games
    /// come back without a gate; nothing writes to them anymore.
    pub(crate) async fn lock_game(
        &self,
        game_id: Uuid,
    ) -> Result<(Option<OwnedMutexGuard<()>>, GameEntity), ServiceError> {
        let game = self.game(game_id).await?;
        if game.state.is_over() {
            return Ok((None, game));
        }
        let gate = self.state.sessions().open(game_id).lock().await;
        let game = self.game(game_id).await?;
        Ok((Some(gate), game))
    }

    async fn current_round(&self, game_id: Uuid) -> Result<RoundEntity, ServiceError> {
        self.store
            .current_round(game_id)
            .await?
            .ok_or_else(|| ServiceError::InvalidState("no round is in progress".into()))
    }

    pub(crate) async fn save_game(&self, game: &mut GameEntity) -> Result<(), ServiceError> {
        game.updated_at = self.now;
        self.store.save_game(game.clone()).await?;
        Ok(())
    }

    /// Write `round` if nobody else did since it was read. False means a
    /// concurrent writer won and the caller must not act on its changes.
    async fn commit(&self, round: &mut RoundEntity) -> Result<bool, ServiceError> {
        let expected = round.version;
        round.version = expected + 1;
        round.updated_at = self.now;
        let swapped = self
            .store
            .compare_and_swap_round(round.clone(), expected)
            .await?;
        if !swapped {
            debug!(round_id = %round.id, version = expected, "round changed concurrently; dropping write");
        }
        Ok(swapped)
    }

    /// Apply `event` and stamp the deadline of the phase it leads to.
    fn transition(&self, round: &mut RoundEntity, event: RoundEvent) -> bool {
        if !state_machine::accepts(round.phase, event) {
            return false;
        }
        round.phase = state_machine::next(round.phase, event);
        round.deadline_at = self.config().phase_deadline(round.phase, self.now);
        true
    }

    fn deadline_reached(&self, round: &RoundEntity) -> bool {
        round
            .deadline_at
            .is_none_or(|deadline| self.now + DEADLINE_GRACE >= deadline)
    }

    fn team_size(&self, game: &GameEntity) -> Result<usize, ServiceError> {
        rules::team_size(game.players.len(), game.team_size).ok_or_else(|| {
            ServiceError::InvalidState(format!(
                "no team size for {} players",
                game.players.len()
            ))
        })
    }

    fn arm_phase_timer(&self, round: &RoundEntity) {
        let Some(deadline) = round.deadline_at else {
            return;
        };
        let state = self.state.clone();
        let game_id = round.game_id;
        self.state.sessions().arm_at(
            game_id,
            TimerPurpose::PhaseDeadline,
            deadline,
            self.now,
            move || phase_deadline_task(state, game_id),
        );
    }

    pub(crate) fn dispatch(&self, chat_id: ChatId, text: String, options: SendOptions) {
        self.state.delivery().dispatch(chat_id, text, options);
    }

    async fn narrate(&self, request: NarrativeRequest) -> String {
        self.state.narrative().compose(&request).await
    }
}

fn require_active(game: &GameEntity) -> Result<(), ServiceError> {
    if game.state != GameState::Active {
        return Err(ServiceError::InvalidState(format!(
            "game `{}` is not active",
            game.id
        )));
    }
    Ok(())
}

/// Player keyboards carry their round number; presses from an older round
/// must not land on the current one.
fn require_round(round: &RoundEntity, round_number: u8) -> Result<(), ServiceError> {
    if round.round_number != round_number {
        return Err(ServiceError::InvalidState(format!(
            "that keyboard belongs to round {round_number}, round {} is in play",
            round.round_number
        )));
    }
    Ok(())
}

/// Round messages whose ids are kept for later edits and unpins.
#[derive(Debug, Clone, Copy)]
enum TrackedMessage {
    Mission,
    Nomination,
    Vote,
}

impl TrackedMessage {
    fn store(self, messages: &mut RoundMessages, message_id: MessageId) {
        let slot = match self {
            Self::Mission => &mut messages.mission,
            Self::Nomination => &mut messages.nomination,
            Self::Vote => &mut messages.vote,
        };
        *slot = Some(message_id);
    }
}

const TRACKED_WRITE_ATTEMPTS: usize = 3;

/// Send `compose`'s message outside the gate, optionally pin it, then
/// remember its id on the round it was sent for.
fn deliver_tracked<F>(
    state: &SharedState,
    round: &RoundEntity,
    chat_id: ChatId,
    slot: TrackedMessage,
    pin: bool,
    compose: F,
) where
    F: Future<Output = (String, SendOptions)> + Send + 'static,
{
    let state = state.clone();
    let (game_id, round_id) = (round.game_id, round.id);
    tokio::spawn(async move {
        let (text, options) = compose.await;
        let handle = match state.delivery().send(chat_id, text, options).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(game_id = %game_id, chat_id, ?slot, error = %err, "failed to deliver round message");
                return;
            }
        };
        if pin {
            state.delivery().pin(handle).await;
        }
        match remember_message(&state, game_id, round_id, slot, handle).await {
            Ok(true) => debug!(game_id = %game_id, ?slot, message_id = handle.message_id, "round message stored"),
            Ok(false) => debug!(game_id = %game_id, ?slot, "round moved on before its message id was stored"),
            Err(err) => warn!(game_id = %game_id, ?slot, error = %err, "failed to store round message id"),
        }
    });
}

async fn remember_message(
    state: &SharedState,
    game_id: Uuid,
    round_id: Uuid,
    slot: TrackedMessage,
    handle: MessageHandle,
) -> Result<bool, ServiceError> {
    let ctx = RoundContext::open(state).await?;
    let (_gate, _game) = ctx.lock_game(game_id).await?;
    for _ in 0..TRACKED_WRITE_ATTEMPTS {
        let latest = ctx.store.latest_round(game_id).await?;
        let Some(mut round) = latest.filter(|round| round.id == round_id) else {
            return Ok(false);
        };
        // A prompt for a capo who has since been rotated out stays untracked.
        if matches!(slot, TrackedMessage::Nomination) && round.capo_id != handle.chat_id {
            return Ok(false);
        }
        slot.store(&mut round.messages, handle.message_id);
        if ctx.commit(&mut round).await? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn phase_deadline_task(state: SharedState, game_id: Uuid) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        match catch_up(&state, game_id, RoundPhase::Reveal).await {
            Ok(Some(phase)) => info!(game_id = %game_id, ?phase, "phase deadline handled"),
            Ok(None) => debug!(game_id = %game_id, "phase deadline had nothing to do"),
            Err(err) => warn!(game_id = %game_id, error = %err, "phase deadline handler failed"),
        }
    })
}

/// Activate a lobby game: deal roles and post the first mission right away.
pub async fn start_game(state: &SharedState, game_id: Uuid, actor: PlayerId) -> Result<RoundSnapshot, ServiceError> {
    let ctx = RoundContext::open(state).await?;
    let (_gate, mut game) = ctx.lock_game(game_id).await?;
    if game.admin_id != actor {
        return Err(ServiceError::Forbidden(
            "only the game admin can start the game".into(),
        ));
    }
    if game.state != GameState::Lobby {
        return Err(ServiceError::InvalidState("game has already started".into()));
    }
    if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&game.players.len()) {
        return Err(ServiceError::InvalidState(format!(
            "a game needs {MIN_PLAYERS} to {MAX_PLAYERS} players, this one has {}",
            game.players.len()
        )));
    }
    if rules::team_size(game.players.len(), game.team_size).is_none() {
        return Err(ServiceError::InvalidInput(
            "fixed team size does not fit the player count".into(),
        ));
    }

    rules::deal_roles(&mut game.players, &mut rand::rng())
        .ok_or_else(|| ServiceError::InvalidState("cannot deal roles".into()))?;
    game.state = GameState::Active;
    ctx.save_game(&mut game).await?;
    info!(game_id = %game_id, players = game.players.len(), "game started");

    for player in &game.players {
        ctx.dispatch(
            player.id,
            notifications::role_message(&game, player),
            SendOptions::default(),
        );
    }

    let round = post_mission_locked(&ctx, &mut game)
        .await?
        .ok_or_else(|| ServiceError::InvalidState("first round already posted".into()))?;
    Ok(RoundSnapshot::new(&game, &round, 0))
}

/// Morning entry point: create the next round once the previous one is over.
pub async fn post_mission(state: &SharedState, game_id: Uuid) -> Result<Option<RoundEntity>, ServiceError> {
    let ctx = RoundContext::open(state).await?;
    let (_gate, mut game) = ctx.lock_game(game_id).await?;
    if game.state != GameState::Active || game.endgame.is_some() {
        return Ok(None);
    }
    post_mission_locked(&ctx, &mut game).await
}

async fn post_mission_locked(
    ctx: &RoundContext<'_>,
    game: &mut GameEntity,
) -> Result<Option<RoundEntity>, ServiceError> {
    let (round_number, phase) = match ctx.store.latest_round(game.id).await? {
        None => (1, RoundPhase::MissionPosted),
        Some(previous) if !previous.phase.is_terminal() => return Ok(None),
        Some(previous) => (
            previous.round_number + 1,
            state_machine::next(previous.phase, RoundEvent::RoundComplete),
        ),
    };
    if round_number > LAST_ROUND {
        return Ok(None);
    }

    let team_size = ctx.team_size(game)?;
    let capo_id = game
        .players
        .get(rules::capo_index(round_number, 0, game.players.len()))
        .map(|player| player.id)
        .ok_or_else(|| ServiceError::InvalidState("game has no players".into()))?;

    let round = RoundEntity {
        id: Uuid::new_v4(),
        game_id: game.id,
        round_number,
        phase,
        capo_id,
        team: Vec::new(),
        failed_votes: 0,
        result: None,
        deadline_at: ctx.config().phase_deadline(phase, ctx.now),
        messages: RoundMessages::default(),
        version: 0,
        created_at: ctx.now,
        updated_at: ctx.now,
    };
    match ctx.store.insert_round(round.clone()).await {
        Err(err) if err.is_conflict() => {
            debug!(game_id = %game.id, round_number, "round already posted");
            return Ok(None);
        }
        other => other?,
    }

    game.round_counter = round_number;
    ctx.save_game(game).await?;
    ctx.arm_phase_timer(&round);
    info!(game_id = %game.id, round_number, capo_id, "mission posted");

    let compose = {
        let state = ctx.state.clone();
        let (game, round) = (game.clone(), round.clone());
        async move {
            let narrative = state
                .narrative()
                .compose(&NarrativeRequest::MissionIntro {
                    round_number,
                    team_size,
                })
                .await;
            let text = notifications::mission_post(&game, &round, team_size, &narrative);
            (text, SendOptions::default())
        }
    };
    deliver_tracked(ctx.state, &round, game.group_chat, TrackedMessage::Mission, true, compose);
    Ok(Some(round))
}

/// DM the capo the nomination keyboard and remember the message for later edits.
fn prompt_capo(ctx: &RoundContext<'_>, game: &GameEntity, round: &RoundEntity) -> Result<(), ServiceError> {
    let team_size = ctx.team_size(game)?;
    let prompt = notifications::nomination_prompt(game, round, team_size);
    deliver_tracked(ctx.state, round, round.capo_id, TrackedMessage::Nomination, false, ready(prompt));
    Ok(())
}

async fn open_nomination(
    ctx: &RoundContext<'_>,
    game: &GameEntity,
    mut round: RoundEntity,
) -> Result<(), ServiceError> {
    if !ctx.transition(&mut round, RoundEvent::AdvanceToNomination) {
        return Ok(());
    }
    round.team.clear();
    if !ctx.commit(&mut round).await? {
        return Ok(());
    }
    ctx.arm_phase_timer(&round);
    info!(game_id = %game.id, round_number = round.round_number, "nomination open");

    ctx.dispatch(
        game.group_chat,
        notifications::nomination_opened(game, &round),
        SendOptions::default(),
    );
    prompt_capo(ctx, game, &round)
}

/// Add or remove one player from the proposed team. Capo only.
pub async fn set_nominee(
    state: &SharedState,
    game_id: Uuid,
    round_number: u8,
    actor: PlayerId,
    target: PlayerId,
    include: bool,
) -> Result<RoundSnapshot, ServiceError> {
    let ctx = RoundContext::open(state).await?;
    let (_gate, game) = ctx.lock_game(game_id).await?;
    require_active(&game)?;
    let mut round = ctx.current_round(game_id).await?;
    require_round(&round, round_number)?;
    if round.phase != RoundPhase::Nomination {
        return Err(ServiceError::InvalidState("nomination is not open".into()));
    }
    if actor != round.capo_id {
        return Err(ServiceError::Forbidden(
            "only the capo can pick the team".into(),
        ));
    }
    if !game.is_player(target) {
        return Err(ServiceError::InvalidInput(format!(
            "player `{target}` is not in this game"
        )));
    }

    let team_size = ctx.team_size(&game)?;
    match (include, round.team.contains(&target)) {
        (true, true) | (false, false) => return Ok(RoundSnapshot::new(&game, &round, 0)),
        (true, false) if round.team.len() >= team_size => {
            return Err(ServiceError::InvalidState(format!(
                "the team already has {team_size} players"
            )));
        }
        (true, false) => round.team.push(target),
        (false, true) => round.team.retain(|member| *member != target),
    }
    if !ctx.commit(&mut round).await? {
        return Err(ServiceError::InvalidState(
            "the round changed; try again".into(),
        ));
    }

    if let Some(message_id) = round.messages.nomination {
        let (text, options) = notifications::nomination_prompt(&game, &round, team_size);
        let handle = MessageHandle {
            chat_id: round.capo_id,
            message_id,
        };
        state.delivery().dispatch_edit(handle, text, options);
    }
    Ok(RoundSnapshot::new(&game, &round, 0))
}

/// Lock in the proposed team and open the vote. Capo only.
pub async fn confirm_team(
    state: &SharedState,
    game_id: Uuid,
    round_number: u8,
    actor: PlayerId,
) -> Result<RoundSnapshot, ServiceError> {
    let ctx = RoundContext::open(state).await?;
    let (_gate, game) = ctx.lock_game(game_id).await?;
    require_active(&game)?;
    let mut round = ctx.current_round(game_id).await?;
    require_round(&round, round_number)?;
    if round.phase != RoundPhase::Nomination {
        return Err(ServiceError::InvalidState("nomination is not open".into()));
    }
    if actor != round.capo_id {
        return Err(ServiceError::Forbidden(
            "only the capo can confirm the team".into(),
        ));
    }
    let team_size = ctx.team_size(&game)?;
    if round.team.len() != team_size {
        return Err(ServiceError::InvalidInput(format!(
            "the team needs exactly {team_size} players, it has {}",
            round.team.len()
        )));
    }

    ctx.transition(&mut round, RoundEvent::TeamConfirmed);
    ctx.store.clear_votes(round.id).await?;
    if !ctx.commit(&mut round).await? {
        return Err(ServiceError::InvalidState(
            "the round changed; try again".into(),
        ));
    }
    ctx.arm_phase_timer(&round);
    info!(game_id = %game_id, round_number = round.round_number, team = ?round.team, "team confirmed");

    let prompt = notifications::vote_prompt(&game, &round, &[]);
    deliver_tracked(state, &round, game.group_chat, TrackedMessage::Vote, false, ready(prompt));
    Ok(RoundSnapshot::new(&game, &round, 0))
}

/// Record a ja/nej vote; the vote resolves as soon as every player voted.
///
/// Returns whether this vote resolved the round's voting.
pub async fn cast_vote(
    state: &SharedState,
    game_id: Uuid,
    round_number: u8,
    player_id: PlayerId,
    choice: VoteChoice,
) -> Result<bool, ServiceError> {
    let ctx = RoundContext::open(state).await?;
    let (_gate, mut game) = ctx.lock_game(game_id).await?;
    require_active(&game)?;
    if !game.is_player(player_id) {
        return Err(ServiceError::Forbidden(
            "only players of this game can vote".into(),
        ));
    }
    let round = ctx.current_round(game_id).await?;
    require_round(&round, round_number)?;
    if round.phase != RoundPhase::Voting {
        return Err(ServiceError::InvalidState("voting is not open".into()));
    }

    ctx.store
        .upsert_vote(VoteEntity {
            round_id: round.id,
            player_id,
            choice,
            cast_at: ctx.now,
        })
        .await?;
    let votes = ctx.store.list_votes(round.id).await?;
    let tally = VoteTally::new(&game.players, &votes);

    if tally.is_complete() {
        resolve_vote(&ctx, &mut game, round, tally).await?;
        return Ok(true);
    }

    if let Some(message_id) = round.messages.vote {
        let voted: Vec<PlayerId> = game
            .players
            .iter()
            .map(|player| player.id)
            .filter(|id| !tally.abstained.contains(id))
            .collect();
        let (text, options) = notifications::vote_prompt(&game, &round, &voted);
        let handle = MessageHandle {
            chat_id: game.group_chat,
            message_id,
        };
        state.delivery().dispatch_edit(handle, text, options);
    }
    Ok(false)
}

async fn resolve_vote(
    ctx: &RoundContext<'_>,
    game: &mut GameEntity,
    mut round: RoundEntity,
    tally: VoteTally,
) -> Result<(), ServiceError> {
    let approved = tally.approved();
    let result_text = notifications::vote_result(game, &tally, approved);

    if approved {
        ctx.transition(&mut round, RoundEvent::VoteApproved);
        if !ctx.commit(&mut round).await? {
            return Ok(());
        }
        ctx.arm_phase_timer(&round);
        info!(game_id = %game.id, round_number = round.round_number, "team approved");

        ctx.dispatch(game.group_chat, result_text, SendOptions::default());
        for member in &round.team {
            let (text, options) = notifications::execution_prompt(&round);
            ctx.dispatch(*member, text, options);
        }
        return Ok(());
    }

    round.failed_votes += 1;
    ctx.dispatch(game.group_chat, result_text, SendOptions::default());
    if round.failed_votes >= KAOS_THRESHOLD {
        return kaos(ctx, game, round).await;
    }

    ctx.transition(&mut round, RoundEvent::VoteRejected);
    rotate_capo(game, &mut round);
    if !ctx.commit(&mut round).await? {
        return Ok(());
    }
    ctx.store.clear_votes(round.id).await?;
    ctx.arm_phase_timer(&round);
    info!(
        game_id = %game.id,
        round_number = round.round_number,
        failed_votes = round.failed_votes,
        capo_id = round.capo_id,
        "team rejected"
    );

    ctx.dispatch(
        game.group_chat,
        notifications::new_capo(game, &round),
        SendOptions::default(),
    );
    prompt_capo(ctx, game, &round)
}

fn rotate_capo(game: &GameEntity, round: &mut RoundEntity) {
    let index = rules::capo_index(round.round_number, round.failed_votes, game.players.len());
    if let Some(player) = game.players.get(index) {
        round.capo_id = player.id;
    }
    round.team.clear();
    round.messages.nomination = None;
}

async fn nomination_timeout(
    ctx: &RoundContext<'_>,
    game: &mut GameEntity,
    mut round: RoundEntity,
) -> Result<(), ServiceError> {
    round.failed_votes += 1;
    if round.failed_votes >= KAOS_THRESHOLD {
        return kaos(ctx, game, round).await;
    }

    ctx.transition(&mut round, RoundEvent::NominationTimeout);
    rotate_capo(game, &mut round);
    if !ctx.commit(&mut round).await? {
        return Ok(());
    }
    ctx.arm_phase_timer(&round);
    info!(
        game_id = %game.id,
        round_number = round.round_number,
        failed_votes = round.failed_votes,
        capo_id = round.capo_id,
        "nomination timed out"
    );

    ctx.dispatch(
        game.group_chat,
        notifications::nomination_timed_out(game, &round),
        SendOptions::default(),
    );
    prompt_capo(ctx, game, &round)
}

async fn kaos(ctx: &RoundContext<'_>, game: &mut GameEntity, mut round: RoundEntity) -> Result<(), ServiceError> {
    if !ctx.transition(&mut round, RoundEvent::KaosTriggered) {
        return Ok(());
    }
    round.result = Some(MissionResult::KaosFail);
    if !ctx.commit(&mut round).await? {
        return Ok(());
    }
    ctx.store.clear_votes(round.id).await?;
    let scores = settle_scores(ctx, game).await?;
    info!(game_id = %game.id, round_number = round.round_number, "kaos");

    let narrative = ctx
        .narrate(NarrativeRequest::Kaos {
            round_number: round.round_number,
        })
        .await;
    ctx.dispatch(
        game.group_chat,
        notifications::kaos(&narrative, scores),
        SendOptions::default(),
    );
    after_resolution(ctx, game, &round, scores).await
}

/// Record a säkra/gola action; the mission resolves once every member acted.
///
/// Returns whether this action resolved the mission.
pub async fn cast_action(
    state: &SharedState,
    game_id: Uuid,
    round_number: u8,
    player_id: PlayerId,
    choice: ActionChoice,
) -> Result<bool, ServiceError> {
    let ctx = RoundContext::open(state).await?;
    let (_gate, mut game) = ctx.lock_game(game_id).await?;
    require_active(&game)?;
    let round = ctx.current_round(game_id).await?;
    require_round(&round, round_number)?;
    if round.phase != RoundPhase::Execution {
        return Err(ServiceError::InvalidState("the mission is not running".into()));
    }
    if !round.team.contains(&player_id) {
        return Err(ServiceError::Forbidden(
            "only team members act on the mission".into(),
        ));
    }

    ctx.store
        .upsert_mission_action(MissionActionEntity {
            round_id: round.id,
            player_id,
            choice,
            cast_at: ctx.now,
        })
        .await?;
    let actions = ctx.store.list_mission_actions(round.id).await?;
    if MissionTally::new(&round.team, &actions).defaulted.is_empty() {
        resolve_mission(&ctx, &mut game, round).await?;
        return Ok(true);
    }
    Ok(false)
}

async fn resolve_mission(
    ctx: &RoundContext<'_>,
    game: &mut GameEntity,
    mut round: RoundEntity,
) -> Result<(), ServiceError> {
    let actions = ctx.store.list_mission_actions(round.id).await?;
    let tally = MissionTally::new(&round.team, &actions);
    let result = tally.result();

    if !ctx.transition(&mut round, RoundEvent::AdvanceToReveal) {
        return Ok(());
    }
    round.result = Some(result);
    if !ctx.commit(&mut round).await? {
        return Ok(());
    }
    let scores = settle_scores(ctx, game).await?;
    info!(
        game_id = %game.id,
        round_number = round.round_number,
        ?result,
        gola = tally.gola,
        defaulted = tally.defaulted.len(),
        "mission resolved"
    );

    let narrative = ctx
        .narrate(NarrativeRequest::MissionOutcome {
            round_number: round.round_number,
            result,
            gola_count: tally.gola,
        })
        .await;
    ctx.dispatch(
        game.group_chat,
        notifications::mission_result(&narrative, result, &tally, scores),
        SendOptions::default(),
    );
    after_resolution(ctx, game, &round, scores).await
}

/// Recompute both scores from every resolved round and persist them.
async fn settle_scores(ctx: &RoundContext<'_>, game: &mut GameEntity) -> Result<Scores, ServiceError> {
    let rounds = ctx.store.list_rounds(game.id).await?;
    let scores = Scores::from_rounds(&rounds);
    game.akta_score = scores.akta;
    game.golare_score = scores.golare;
    ctx.save_game(game).await?;
    Ok(scores)
}

async fn after_resolution(
    ctx: &RoundContext<'_>,
    game: &mut GameEntity,
    round: &RoundEntity,
    scores: Scores,
) -> Result<(), ServiceError> {
    ctx.state
        .sessions()
        .cancel(game.id, TimerPurpose::PhaseDeadline);
    if let Some(leading) = scores.decided(round.round_number) {
        final_guess_service::open_endgame(ctx, game, leading).await?;
    }
    Ok(())
}

/// Close the current phase if its deadline passed and it lags behind `up_to`.
///
/// One step at most: the next phase gets a fresh deadline. Returns the phase
/// that was closed.
pub async fn catch_up(
    state: &SharedState,
    game_id: Uuid,
    up_to: RoundPhase,
) -> Result<Option<RoundPhase>, ServiceError> {
    let ctx = RoundContext::open(state).await?;
    let (_gate, mut game) = ctx.lock_game(game_id).await?;
    if game.state != GameState::Active || game.endgame.is_some() {
        return Ok(None);
    }
    let Some(round) = ctx.store.current_round(game_id).await? else {
        return Ok(None);
    };
    if round.phase.rank() >= up_to.rank() || !ctx.deadline_reached(&round) {
        return Ok(None);
    }

    let closed = round.phase;
    match closed {
        RoundPhase::MissionPosted => open_nomination(&ctx, &game, round).await?,
        RoundPhase::Nomination => nomination_timeout(&ctx, &mut game, round).await?,
        RoundPhase::Voting => {
            let votes = ctx.store.list_votes(round.id).await?;
            let tally = VoteTally::new(&game.players, &votes);
            resolve_vote(&ctx, &mut game, round, tally).await?;
        }
        RoundPhase::Execution => resolve_mission(&ctx, &mut game, round).await?,
        RoundPhase::Reveal => return Ok(None),
    }
    Ok(Some(closed))
}

/// Re-arm the phase timer of a round whose deadline is still ahead.
pub async fn rearm_phase_timer(state: &SharedState, round: &RoundEntity) -> Result<bool, ServiceError> {
    let ctx = RoundContext::open(state).await?;
    if round.phase.is_terminal() || ctx.deadline_reached(round) {
        return Ok(false);
    }
    ctx.arm_phase_timer(round);
    Ok(true)
}

/// Nudge the capo while nomination is open.
pub async fn remind_capo(state: &SharedState, game_id: Uuid) -> Result<bool, ServiceError> {
    let ctx = RoundContext::open(state).await?;
    let game = ctx.active_game(game_id).await?;
    let Some(round) = ctx.store.current_round(game_id).await? else {
        return Ok(false);
    };
    if round.phase != RoundPhase::Nomination {
        return Ok(false);
    }
    let team_size = ctx.team_size(&game)?;
    ctx.dispatch(
        round.capo_id,
        notifications::nomination_reminder(&round, team_size),
        SendOptions::default(),
    );
    Ok(true)
}

/// Nudge team members who have not acted yet.
pub async fn remind_team(state: &SharedState, game_id: Uuid) -> Result<bool, ServiceError> {
    let ctx = RoundContext::open(state).await?;
    ctx.active_game(game_id).await?;
    let Some(round) = ctx.store.current_round(game_id).await? else {
        return Ok(false);
    };
    if round.phase != RoundPhase::Execution {
        return Ok(false);
    }
    let actions = ctx.store.list_mission_actions(round.id).await?;
    let tally = MissionTally::new(&round.team, &actions);
    for member in &tally.defaulted {
        ctx.dispatch(
            *member,
            notifications::execution_reminder(&round),
            SendOptions::default(),
        );
    }
    Ok(!tally.defaulted.is_empty())
}

/// Evening summary of a finished round; unpins its mission post.
pub async fn wrap_up(state: &SharedState, game_id: Uuid) -> Result<bool, ServiceError> {
    let ctx = RoundContext::open(state).await?;
    let (_gate, game) = ctx.lock_game(game_id).await?;
    require_active(&game)?;
    let Some(mut round) = ctx.store.latest_round(game_id).await? else {
        return Ok(false);
    };
    if !round.phase.is_terminal() || round.messages.summary_sent {
        return Ok(false);
    }

    round.messages.summary_sent = true;
    if !ctx.commit(&mut round).await? {
        return Ok(false);
    }
    let scores = Scores {
        akta: game.akta_score,
        golare: game.golare_score,
    };
    ctx.dispatch(
        game.group_chat,
        notifications::wrap_up(&round, scores),
        SendOptions::default(),
    );
    if let Some(message_id) = round.messages.mission {
        state.delivery().dispatch_unpin(MessageHandle {
            chat_id: game.group_chat,
            message_id,
        });
    }
    Ok(true)
}

/// Current round of a game as seen by players.
pub async fn round_snapshot(state: &SharedState, game_id: Uuid) -> Result<RoundSnapshot, ServiceError> {
    let ctx = RoundContext::open(state).await?;
    let game = ctx.game(game_id).await?;
    let round = ctx
        .store
        .latest_round(game_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("game `{game_id}` has no rounds")))?;
    let votes = if round.phase == RoundPhase::Voting {
        ctx.store.list_votes(round.id).await?.len()
    } else {
        0
    };
    Ok(RoundSnapshot::new(&game, &round, votes))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::{Instant, sleep};

    use super::*;
    use crate::{
        dao::models::Side,
        services::testing::{GROUP_CHAT, TestGame},
    };

    const HOUR: Duration = Duration::from_secs(60 * 60);
    const FIVE_MINUTES: Duration = Duration::from_secs(5 * 60);
    const PAST_FIVE_MINUTES: Duration = Duration::from_secs(6 * 60);

    #[tokio::test(start_paused = true)]
    async fn start_game_deals_roles_and_posts_round_one() {
        let harness = TestGame::new().await;
        let game_id = harness.seed_game(5, GameState::Lobby).await;

        let err = start_game(&harness.state, game_id, 2).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        let snapshot = start_game(&harness.state, game_id, 1).await.unwrap();
        assert_eq!(snapshot.round_number, 1);
        assert_eq!(snapshot.phase, RoundPhase::MissionPosted);

        let game = harness.game(game_id).await;
        assert_eq!(game.state, GameState::Active);
        assert_eq!(snapshot.capo.id, game.players[0].id);
        assert_eq!(game.members_of(Side::Golare).count(), 2);

        harness.settle().await;
        for player in 1..=5 {
            assert_eq!(harness.transport.sent_to(player).len(), 1, "role message for {player}");
        }
        assert_eq!(harness.transport.pinned().len(), 1);
        assert_eq!(harness.latest_round(game_id).await.messages.mission, Some(harness.transport.pinned()[0].message_id));

        let err = start_game(&harness.state, game_id, 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn mission_timer_opens_nomination() {
        let harness = TestGame::new().await;
        let game_id = harness.seed_game(5, GameState::Active).await;
        let round = harness
            .seed_round(game_id, 1, RoundPhase::MissionPosted, 1, &[], Some(FIVE_MINUTES))
            .await;

        assert!(rearm_phase_timer(&harness.state, &round).await.unwrap());
        sleep(PAST_FIVE_MINUTES).await;

        let round = harness.latest_round(game_id).await;
        assert_eq!(round.phase, RoundPhase::Nomination);
        assert!(round.messages.nomination.is_some());
        assert_eq!(harness.transport.sent_to(1).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_capo_picks_and_confirms() {
        let harness = TestGame::new().await;
        let game_id = harness.seed_game(5, GameState::Active).await;
        harness
            .seed_round(game_id, 1, RoundPhase::Nomination, 1, &[1], Some(HOUR))
            .await;

        let err = set_nominee(&harness.state, game_id, 1, 2, 3, true).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
        let err = confirm_team(&harness.state, game_id, 1, 2).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        let err = confirm_team(&harness.state, game_id, 1, 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let snapshot = set_nominee(&harness.state, game_id, 1, 1, 3, true).await.unwrap();
        assert_eq!(snapshot.team.len(), 2);
        let snapshot = set_nominee(&harness.state, game_id, 1, 1, 3, true).await.unwrap();
        assert_eq!(snapshot.team.len(), 2);
        let err = set_nominee(&harness.state, game_id, 1, 1, 4, true).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        let snapshot = confirm_team(&harness.state, game_id, 1, 1).await.unwrap();
        assert_eq!(snapshot.phase, RoundPhase::Voting);
        assert!(snapshot.deadline_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn three_ja_two_nej_resolves_early() {
        let harness = TestGame::new().await;
        let game_id = harness.seed_game(5, GameState::Active).await;
        harness
            .seed_round(game_id, 1, RoundPhase::Voting, 1, &[1, 2], Some(HOUR))
            .await;

        let choices = [VoteChoice::Ja, VoteChoice::Nej, VoteChoice::Ja, VoteChoice::Nej, VoteChoice::Ja];
        for (player, choice) in (1..=5).zip(choices) {
            let resolved = cast_vote(&harness.state, game_id, 1, player, choice).await.unwrap();
            assert_eq!(resolved, player == 5);
        }

        let round = harness.latest_round(game_id).await;
        assert_eq!(round.phase, RoundPhase::Execution);
        assert_eq!(round.failed_votes, 0);

        harness.settle().await;
        assert!(harness.group_texts().iter().any(|text| text.contains("gick igenom")));
        assert_eq!(harness.transport.sent_to(1).len(), 1);
        assert_eq!(harness.transport.sent_to(2).len(), 1);
        assert!(harness.transport.sent_to(3).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn revote_replaces_the_previous_choice() {
        let harness = TestGame::new().await;
        let game_id = harness.seed_game(5, GameState::Active).await;
        let round = harness
            .seed_round(game_id, 1, RoundPhase::Voting, 1, &[1, 2], Some(HOUR))
            .await;

        cast_vote(&harness.state, game_id, 1, 3, VoteChoice::Ja).await.unwrap();
        cast_vote(&harness.state, game_id, 1, 3, VoteChoice::Nej).await.unwrap();

        let votes = harness.store.list_votes(round.id).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].choice, VoteChoice::Nej);
    }

    #[tokio::test(start_paused = true)]
    async fn tie_with_abstention_is_rejected_at_the_deadline() {
        let harness = TestGame::new().await;
        let game_id = harness.seed_game(5, GameState::Active).await;
        harness
            .seed_round(game_id, 1, RoundPhase::Voting, 1, &[1, 2], Some(FIVE_MINUTES))
            .await;

        for (player, choice) in [(1, VoteChoice::Ja), (2, VoteChoice::Ja), (3, VoteChoice::Nej), (4, VoteChoice::Nej)] {
            assert!(!cast_vote(&harness.state, game_id, 1, player, choice).await.unwrap());
        }
        assert_eq!(
            catch_up(&harness.state, game_id, RoundPhase::Reveal).await.unwrap(),
            None
        );

        sleep(PAST_FIVE_MINUTES).await;
        assert_eq!(
            catch_up(&harness.state, game_id, RoundPhase::Reveal).await.unwrap(),
            Some(RoundPhase::Voting)
        );

        let round = harness.latest_round(game_id).await;
        assert_eq!(round.phase, RoundPhase::Nomination);
        assert_eq!(round.failed_votes, 1);
        assert_eq!(round.capo_id, 2);
        assert!(round.team.is_empty());
        assert!(harness.store.list_votes(round.id).await.unwrap().is_empty());

        harness.settle().await;
        let result = harness
            .group_texts()
            .into_iter()
            .find(|text| text.contains("föll"))
            .unwrap();
        assert!(result.contains("Röstade inte: p5"));
    }

    #[tokio::test(start_paused = true)]
    async fn third_rejection_ends_in_kaos_without_rotating() {
        let harness = TestGame::new().await;
        let game_id = harness.seed_game(5, GameState::Active).await;
        let mut round = harness
            .seed_round(game_id, 1, RoundPhase::Voting, 3, &[3, 4], Some(HOUR))
            .await;
        round.failed_votes = 2;
        harness.update_round(round).await;

        for player in 1..=5 {
            cast_vote(&harness.state, game_id, 1, player, VoteChoice::Nej).await.unwrap();
        }

        let round = harness.latest_round(game_id).await;
        assert_eq!(round.phase, RoundPhase::Reveal);
        assert_eq!(round.result, Some(MissionResult::KaosFail));
        assert_eq!(round.failed_votes, 3);
        assert_eq!(round.capo_id, 3);

        let game = harness.game(game_id).await;
        assert_eq!((game.akta_score, game.golare_score), (0, 1));
        assert!(game.endgame.is_none());

        harness.settle().await;
        assert!(harness.group_texts().iter().any(|text| text.contains("KAOS")));
    }

    #[tokio::test(start_paused = true)]
    async fn third_nomination_timeout_ends_in_kaos() {
        let harness = TestGame::new().await;
        let game_id = harness.seed_game(5, GameState::Active).await;
        let mut round = harness
            .seed_round(game_id, 2, RoundPhase::Nomination, 4, &[], Some(FIVE_MINUTES))
            .await;
        round.failed_votes = 2;
        harness.update_round(round).await;

        sleep(PAST_FIVE_MINUTES).await;
        assert_eq!(
            catch_up(&harness.state, game_id, RoundPhase::Voting).await.unwrap(),
            Some(RoundPhase::Nomination)
        );

        let round = harness.latest_round(game_id).await;
        assert_eq!(round.phase, RoundPhase::Reveal);
        assert_eq!(round.result, Some(MissionResult::KaosFail));
        assert_eq!(harness.game(game_id).await.golare_score, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn early_and_deadline_resolution_apply_once() {
        let harness = TestGame::new().await;
        let game_id = harness.seed_game(5, GameState::Active).await;
        let round = harness
            .seed_round(game_id, 1, RoundPhase::Execution, 1, &[4, 5], Some(FIVE_MINUTES))
            .await;
        assert!(rearm_phase_timer(&harness.state, &round).await.unwrap());

        let err = cast_action(&harness.state, game_id, 1, 1, ActionChoice::Gola).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        assert!(!cast_action(&harness.state, game_id, 1, 4, ActionChoice::Sakra).await.unwrap());
        assert!(cast_action(&harness.state, game_id, 1, 5, ActionChoice::Gola).await.unwrap());
        assert!(!harness.state.sessions().is_armed(game_id, TimerPurpose::PhaseDeadline));

        sleep(PAST_FIVE_MINUTES).await;
        assert_eq!(
            catch_up(&harness.state, game_id, RoundPhase::Reveal).await.unwrap(),
            None
        );
        let err = cast_action(&harness.state, game_id, 1, 4, ActionChoice::Gola).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        let round = harness.latest_round(game_id).await;
        assert_eq!(round.result, Some(MissionResult::Fail));
        assert_eq!(harness.game(game_id).await.golare_score, 1);

        harness.settle().await;
        let results = harness
            .group_texts()
            .into_iter()
            .filter(|text| text.contains("Stöten misslyckades"))
            .count();
        assert_eq!(results, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_actions_count_as_sakra_at_the_deadline() {
        let harness = TestGame::new().await;
        let game_id = harness.seed_game(5, GameState::Active).await;
        harness
            .seed_round(game_id, 1, RoundPhase::Execution, 1, &[1, 2], Some(FIVE_MINUTES))
            .await;

        cast_action(&harness.state, game_id, 1, 1, ActionChoice::Sakra).await.unwrap();
        sleep(PAST_FIVE_MINUTES).await;
        catch_up(&harness.state, game_id, RoundPhase::Reveal).await.unwrap();

        let round = harness.latest_round(game_id).await;
        assert_eq!(round.result, Some(MissionResult::Success));
        assert_eq!(harness.game(game_id).await.akta_score, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reaching_the_cap_opens_the_endgame() {
        let harness = TestGame::new().await;
        let game_id = harness.seed_game(5, GameState::Active).await;
        for number in 1..=2 {
            let mut round = harness
                .seed_round(game_id, number, RoundPhase::Reveal, 1, &[4, 5], None)
                .await;
            round.result = Some(MissionResult::Fail);
            harness.update_round(round).await;
        }
        harness
            .seed_round(game_id, 3, RoundPhase::Execution, 3, &[4, 5], Some(HOUR))
            .await;

        cast_action(&harness.state, game_id, 3, 4, ActionChoice::Gola).await.unwrap();
        cast_action(&harness.state, game_id, 3, 5, ActionChoice::Sakra).await.unwrap();

        let game = harness.game(game_id).await;
        assert_eq!(game.golare_score, 3);
        let endgame = game.endgame.unwrap();
        assert_eq!(endgame.leading_side, Side::Golare);
        assert_eq!(endgame.guessing_side, Side::Akta);
        assert!(harness.state.sessions().is_armed(game_id, TimerPurpose::FinalGuess));
        assert_eq!(post_mission(&harness.state, game_id).await.unwrap(), None);

        harness.settle().await;
        for akta in 1..=3 {
            assert_eq!(harness.transport.sent_to(akta).len(), 1);
        }
        assert!(harness.transport.sent_to(4).is_empty());
        assert!(harness.transport.sent_to(GROUP_CHAT).len() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn next_mission_is_posted_once() {
        let harness = TestGame::new().await;
        let game_id = harness.seed_game(5, GameState::Active).await;
        let mut round = harness
            .seed_round(game_id, 1, RoundPhase::Reveal, 1, &[1, 2], None)
            .await;
        round.result = Some(MissionResult::Success);
        harness.update_round(round).await;

        let posted = post_mission(&harness.state, game_id).await.unwrap().unwrap();
        assert_eq!(posted.round_number, 2);
        assert_eq!(posted.capo_id, 2);
        assert_eq!(posted.phase, RoundPhase::MissionPosted);
        assert_eq!(post_mission(&harness.state, game_id).await.unwrap(), None);
        assert_eq!(harness.game(game_id).await.round_counter, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wrap_up_summarises_once_and_unpins() {
        let harness = TestGame::new().await;
        let game_id = harness.seed_game(5, GameState::Active).await;
        let mut round = harness
            .seed_round(game_id, 1, RoundPhase::Reveal, 1, &[1, 2], None)
            .await;
        round.result = Some(MissionResult::Success);
        round.messages.mission = Some(7);
        harness.update_round(round).await;

        assert!(wrap_up(&harness.state, game_id).await.unwrap());
        assert!(!wrap_up(&harness.state, game_id).await.unwrap());

        harness.settle().await;
        let summaries = harness
            .group_texts()
            .into_iter()
            .filter(|text| text.contains("Dagens sammanfattning"))
            .count();
        assert_eq!(summaries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_delivery_does_not_hold_the_game() {
        let harness = TestGame::new().await;
        let game_id = harness.seed_game(5, GameState::Active).await;
        harness
            .seed_round(game_id, 1, RoundPhase::Nomination, 1, &[1, 2], Some(HOUR))
            .await;
        harness.transport.rate_limit_next(1, Duration::from_secs(30));

        let started = Instant::now();
        let snapshot = confirm_team(&harness.state, game_id, 1, 1).await.unwrap();
        assert_eq!(snapshot.phase, RoundPhase::Voting);
        assert!(!cast_vote(&harness.state, game_id, 1, 3, VoteChoice::Ja).await.unwrap());
        assert!(Instant::now() - started < Duration::from_secs(1));
        assert!(harness.latest_round(game_id).await.messages.vote.is_none());

        harness.settle().await;
        assert!(harness.latest_round(game_id).await.messages.vote.is_some());
        assert_eq!(harness.group_texts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_games_leave_no_session_behind() {
        let harness = TestGame::new().await;

        for _ in 0..100 {
            let err = cast_vote(&harness.state, Uuid::new_v4(), 1, 1, VoteChoice::Ja)
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::NotFound(_)));
        }
        let err = catch_up(&harness.state, Uuid::new_v4(), RoundPhase::Reveal)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        assert!(harness.state.sessions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn keyboards_from_an_earlier_round_are_rejected() {
        let harness = TestGame::new().await;
        let game_id = harness.seed_game(5, GameState::Active).await;
        let mut finished = harness
            .seed_round(game_id, 1, RoundPhase::Reveal, 1, &[1, 2], None)
            .await;
        finished.result = Some(MissionResult::Success);
        harness.update_round(finished).await;
        let current = harness
            .seed_round(game_id, 2, RoundPhase::Voting, 2, &[2, 3], Some(HOUR))
            .await;

        let err = cast_vote(&harness.state, game_id, 1, 4, VoteChoice::Nej).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
        let err = cast_action(&harness.state, game_id, 1, 2, ActionChoice::Gola).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
        assert!(harness.store.list_votes(current.id).await.unwrap().is_empty());

        cast_vote(&harness.state, game_id, 2, 4, VoteChoice::Nej).await.unwrap();
        assert_eq!(harness.store.list_votes(current.id).await.unwrap().len(), 1);
    }
}
