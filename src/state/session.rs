//! Per-game runtime state: a serialization gate and cancellable timers.
//!
//! Everything here is process-local. Durable state lives in the store, so a
//! restart only loses armed timers, which recovery re-arms from the rounds'
//! `deadline_at`.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    task::JoinHandle,
    time::sleep,
};
use tracing::debug;
use uuid::Uuid;

/// What a timer is waiting for. At most one timer per purpose and game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerPurpose {
    /// End of the current round phase.
    PhaseDeadline,
    /// End of the Sista Chansen window.
    FinalGuess,
}

struct TimerEntry {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Runtime companion of one active game.
#[derive(Default)]
pub struct GameSession {
    gate: Arc<Mutex<()>>,
    timers: StdMutex<HashMap<TimerPurpose, TimerEntry>>,
}

impl GameSession {
    /// Serialize state-changing work on this game.
    pub async fn lock(&self) -> OwnedMutexGuard<()> {
        self.gate.clone().lock_owned().await
    }

    fn timers(&self) -> std::sync::MutexGuard<'_, HashMap<TimerPurpose, TimerEntry>> {
        // A poisoned map only means a panic happened while holding it; the
        // entries themselves are still consistent.
        self.timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Sessions of every game this process is driving.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<GameSession>>,
    generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session of a game known to be live, created if missing.
    ///
    /// Only call this after the game was loaded from the store; lookups for
    /// arbitrary ids go through [`SessionRegistry::get`].
    pub fn open(&self, game_id: Uuid) -> Arc<GameSession> {
        self.sessions.entry(game_id).or_default().clone()
    }

    pub fn get(&self, game_id: Uuid) -> Option<Arc<GameSession>> {
        self.sessions.get(&game_id).map(|entry| entry.clone())
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Run `work` once `deadline` is reached, replacing any timer with the same purpose.
    ///
    /// The timer unregisters itself before `work` starts, so `work` may re-arm
    /// the same purpose or tear the session down without aborting itself.
    pub fn arm_at<F, Fut>(
        self: &Arc<Self>,
        game_id: Uuid,
        purpose: TimerPurpose,
        deadline: OffsetDateTime,
        now: OffsetDateTime,
        work: F,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = Duration::try_from(deadline - now).unwrap_or(Duration::ZERO);
        self.arm_after(game_id, purpose, delay, work);
    }

    /// Same as [`SessionRegistry::arm_at`] with a relative delay.
    pub fn arm_after<F, Fut>(self: &Arc<Self>, game_id: Uuid, purpose: TimerPurpose, delay: Duration, work: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let session = self.open(game_id);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::downgrade(self);

        // Hold the map while spawning so the task cannot look for its entry
        // before it is inserted.
        let mut timers = session.timers();
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            let Some(registry) = registry.upgrade() else {
                return;
            };
            if !registry.release(game_id, purpose, generation) {
                return;
            }
            debug!(game_id = %game_id, ?purpose, "timer fired");
            work().await;
        });

        if let Some(previous) = timers.insert(purpose, TimerEntry { generation, handle }) {
            previous.handle.abort();
        }
        debug!(game_id = %game_id, ?purpose, ?delay, "timer armed");
    }

    /// Abort the timer for `purpose`, if any.
    pub fn cancel(&self, game_id: Uuid, purpose: TimerPurpose) {
        let Some(session) = self.get(game_id) else {
            return;
        };
        if let Some(entry) = session.timers().remove(&purpose) {
            entry.handle.abort();
            debug!(game_id = %game_id, ?purpose, "timer cancelled");
        }
    }

    /// Whether a timer for `purpose` is pending.
    pub fn is_armed(&self, game_id: Uuid, purpose: TimerPurpose) -> bool {
        self.sessions
            .get(&game_id)
            .is_some_and(|session| session.timers().contains_key(&purpose))
    }

    /// Abort every timer of the game and forget its session.
    pub fn teardown(&self, game_id: Uuid) {
        let Some((_, session)) = self.sessions.remove(&game_id) else {
            return;
        };
        for (_, entry) in session.timers().drain() {
            entry.handle.abort();
        }
        debug!(game_id = %game_id, "game session torn down");
    }

    /// Remove the entry of a timer that is about to run; false when it was replaced.
    fn release(&self, game_id: Uuid, purpose: TimerPurpose, generation: u64) -> bool {
        let Some(session) = self.get(game_id) else {
            return false;
        };
        let mut timers = session.timers();
        match timers.get(&purpose) {
            Some(entry) if entry.generation == generation => {
                timers.remove(&purpose);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn bump(count: &Arc<AtomicUsize>) -> impl FnOnce() -> futures::future::Ready<()> + Send + 'static {
        let count = count.clone();
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_the_pending_timer() {
        let registry = Arc::new(SessionRegistry::new());
        let game_id = Uuid::new_v4();
        let first = counter();
        let second = counter();

        registry.arm_after(game_id, TimerPurpose::PhaseDeadline, Duration::from_secs(10), bump(&first));
        registry.arm_after(game_id, TimerPurpose::PhaseDeadline, Duration::from_secs(20), bump(&second));
        sleep(Duration::from_secs(30)).await;

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert!(!registry.is_armed(game_id, TimerPurpose::PhaseDeadline));
    }

    #[tokio::test(start_paused = true)]
    async fn purposes_are_independent_and_cancellable() {
        let registry = Arc::new(SessionRegistry::new());
        let game_id = Uuid::new_v4();
        let phase = counter();
        let guess = counter();

        registry.arm_after(game_id, TimerPurpose::PhaseDeadline, Duration::from_secs(5), bump(&phase));
        registry.arm_after(game_id, TimerPurpose::FinalGuess, Duration::from_secs(5), bump(&guess));
        registry.cancel(game_id, TimerPurpose::FinalGuess);
        sleep(Duration::from_secs(6)).await;

        assert_eq!(phase.load(Ordering::SeqCst), 1);
        assert_eq!(guess.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_aborts_every_timer() {
        let registry = Arc::new(SessionRegistry::new());
        let game_id = Uuid::new_v4();
        let fired = counter();

        registry.arm_after(game_id, TimerPurpose::PhaseDeadline, Duration::from_secs(5), bump(&fired));
        registry.arm_after(game_id, TimerPurpose::FinalGuess, Duration::from_secs(5), bump(&fired));
        assert_eq!(registry.len(), 1);
        registry.teardown(game_id);
        sleep(Duration::from_secs(10)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn lookups_and_cancels_never_create_sessions() {
        let registry = Arc::new(SessionRegistry::new());
        let game_id = Uuid::new_v4();

        assert!(registry.get(game_id).is_none());
        registry.cancel(game_id, TimerPurpose::PhaseDeadline);
        assert!(!registry.is_armed(game_id, TimerPurpose::FinalGuess));
        assert!(registry.is_empty());

        registry.open(game_id);
        assert!(registry.get(game_id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn fired_timer_may_rearm_its_own_purpose() {
        let registry = Arc::new(SessionRegistry::new());
        let game_id = Uuid::new_v4();
        let fired = counter();

        let inner_registry = registry.clone();
        let inner_fired = fired.clone();
        registry.arm_after(game_id, TimerPurpose::PhaseDeadline, Duration::from_secs(5), move || async move {
            inner_fired.fetch_add(1, Ordering::SeqCst);
            inner_registry.arm_after(
                game_id,
                TimerPurpose::PhaseDeadline,
                Duration::from_secs(5),
                bump(&inner_fired),
            );
        });
        sleep(Duration::from_secs(11)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
