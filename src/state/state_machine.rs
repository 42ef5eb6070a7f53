use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Phases a single round moves through, in progress order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// The mission narrative has been posted; nomination has not opened yet.
    MissionPosted,
    /// The capo is picking the team.
    Nomination,
    /// Every player votes ja/nej on the proposed team.
    Voting,
    /// Team members secretly choose säkra or gola.
    Execution,
    /// The mission result is known; the round is over.
    Reveal,
}

impl RoundPhase {
    /// Position of the phase in the round's progress order.
    ///
    /// Recovery compares ranks to decide whether a game lags behind the timetable.
    pub fn rank(self) -> u8 {
        match self {
            RoundPhase::MissionPosted => 0,
            RoundPhase::Nomination => 1,
            RoundPhase::Voting => 2,
            RoundPhase::Execution => 3,
            RoundPhase::Reveal => 4,
        }
    }

    /// Whether the round has reached its final phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, RoundPhase::Reveal)
    }
}

/// Events that can be applied to a round's phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundEvent {
    /// Nomination opens after the mission was posted.
    AdvanceToNomination,
    /// The capo confirmed a full team.
    TeamConfirmed,
    /// The capo did not confirm a team in time; the capo rotates.
    NominationTimeout,
    /// The vote passed.
    VoteApproved,
    /// The vote failed; nomination reopens with the next capo.
    VoteRejected,
    /// Third consecutive failed proposal (rejected vote or nomination
    /// timeout): the mission fails automatically.
    KaosTriggered,
    /// Every team member acted or the execution deadline elapsed.
    AdvanceToReveal,
    /// The round is over; the caller creates the next round.
    RoundComplete,
}

/// Map `(phase, event)` to the next phase.
///
/// Unmapped pairs leave the phase unchanged; callers treat an unchanged phase
/// as "nothing to do". Deterministic and free of I/O.
pub fn next(phase: RoundPhase, event: RoundEvent) -> RoundPhase {
    match (phase, event) {
        (RoundPhase::MissionPosted, RoundEvent::AdvanceToNomination) => RoundPhase::Nomination,
        (RoundPhase::Nomination, RoundEvent::TeamConfirmed) => RoundPhase::Voting,
        (RoundPhase::Nomination, RoundEvent::NominationTimeout) => RoundPhase::Nomination,
        (RoundPhase::Voting, RoundEvent::VoteApproved) => RoundPhase::Execution,
        (RoundPhase::Voting, RoundEvent::VoteRejected) => RoundPhase::Nomination,
        (RoundPhase::Voting, RoundEvent::KaosTriggered) => RoundPhase::Reveal,
        (RoundPhase::Nomination, RoundEvent::KaosTriggered) => RoundPhase::Reveal,
        (RoundPhase::Execution, RoundEvent::AdvanceToReveal) => RoundPhase::Reveal,
        (RoundPhase::Reveal, RoundEvent::RoundComplete) => RoundPhase::MissionPosted,
        (phase, _) => phase,
    }
}

/// Whether `event` is part of the transition table for `phase`.
///
/// `NominationTimeout` maps nomination onto itself, so comparing phases is not
/// enough to tell a legal self-transition from an ignored event.
pub fn accepts(phase: RoundPhase, event: RoundEvent) -> bool {
    matches!(
        (phase, event),
        (RoundPhase::MissionPosted, RoundEvent::AdvanceToNomination)
            | (RoundPhase::Nomination, RoundEvent::TeamConfirmed)
            | (RoundPhase::Nomination, RoundEvent::NominationTimeout)
            | (RoundPhase::Voting, RoundEvent::VoteApproved)
            | (RoundPhase::Voting, RoundEvent::VoteRejected)
            | (RoundPhase::Voting, RoundEvent::KaosTriggered)
            | (RoundPhase::Nomination, RoundEvent::KaosTriggered)
            | (RoundPhase::Execution, RoundEvent::AdvanceToReveal)
            | (RoundPhase::Reveal, RoundEvent::RoundComplete)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHASES: [RoundPhase; 5] = [
        RoundPhase::MissionPosted,
        RoundPhase::Nomination,
        RoundPhase::Voting,
        RoundPhase::Execution,
        RoundPhase::Reveal,
    ];

    const EVENTS: [RoundEvent; 8] = [
        RoundEvent::AdvanceToNomination,
        RoundEvent::TeamConfirmed,
        RoundEvent::NominationTimeout,
        RoundEvent::VoteApproved,
        RoundEvent::VoteRejected,
        RoundEvent::KaosTriggered,
        RoundEvent::AdvanceToReveal,
        RoundEvent::RoundComplete,
    ];

    #[test]
    fn happy_path_through_a_round() {
        let mut phase = RoundPhase::MissionPosted;
        for event in [
            RoundEvent::AdvanceToNomination,
            RoundEvent::TeamConfirmed,
            RoundEvent::VoteApproved,
            RoundEvent::AdvanceToReveal,
        ] {
            phase = next(phase, event);
        }
        assert_eq!(phase, RoundPhase::Reveal);
        assert_eq!(
            next(phase, RoundEvent::RoundComplete),
            RoundPhase::MissionPosted
        );
    }

    #[test]
    fn rejected_vote_rolls_back_to_nomination() {
        assert_eq!(
            next(RoundPhase::Voting, RoundEvent::VoteRejected),
            RoundPhase::Nomination
        );
        assert_eq!(
            next(RoundPhase::Voting, RoundEvent::KaosTriggered),
            RoundPhase::Reveal
        );
        assert_eq!(
            next(RoundPhase::Nomination, RoundEvent::NominationTimeout),
            RoundPhase::Nomination
        );
        assert_eq!(
            next(RoundPhase::Nomination, RoundEvent::KaosTriggered),
            RoundPhase::Reveal
        );
    }

    #[test]
    fn unmapped_pairs_are_no_ops() {
        for phase in PHASES {
            for event in EVENTS {
                if !accepts(phase, event) {
                    assert_eq!(next(phase, event), phase, "{phase:?} + {event:?}");
                }
            }
        }
    }

    #[test]
    fn rank_follows_progress_order() {
        let ranks: Vec<u8> = PHASES.iter().map(|phase| phase.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3, 4]);
        assert!(RoundPhase::Reveal.is_terminal());
        assert!(!RoundPhase::Execution.is_terminal());
    }
}
