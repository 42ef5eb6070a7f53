//! Pure game rules: table lookups, tallies and score computation.

use rand::{Rng, seq::SliceRandom};

use crate::dao::models::{
    ActionChoice, MissionActionEntity, MissionResult, PlayerEntity, PlayerId, RoundEntity, Side,
    VoteChoice, VoteEntity,
};

pub const MIN_PLAYERS: usize = 4;
pub const MAX_PLAYERS: usize = 10;
pub const LAST_ROUND: u8 = 5;
pub const WINNING_SCORE: u8 = 3;
/// Consecutive failed proposals that end a round in kaos.
pub const KAOS_THRESHOLD: u8 = 3;

/// Team size for `player_count` players, unless the game fixes one.
pub fn team_size(player_count: usize, fixed: Option<u8>) -> Option<usize> {
    if let Some(fixed) = fixed {
        return Some(fixed as usize).filter(|size| (1..=player_count).contains(size));
    }
    match player_count {
        4 | 5 => Some(2),
        6..=8 => Some(3),
        9 | 10 => Some(4),
        _ => None,
    }
}

/// Number of golare dealt for `player_count` players.
pub fn golare_count(player_count: usize) -> Option<usize> {
    match player_count {
        4 => Some(1),
        5 | 6 => Some(2),
        7..=9 => Some(3),
        10 => Some(4),
        _ => None,
    }
}

/// Seat index of the capo after `failed_votes` rotations in round `round_number`.
pub fn capo_index(round_number: u8, failed_votes: u8, player_count: usize) -> usize {
    if player_count == 0 {
        return 0;
    }
    (usize::from(round_number.saturating_sub(1)) + usize::from(failed_votes)) % player_count
}

/// Points a side earns for round `round_number`.
pub fn round_points(round_number: u8) -> u8 {
    if round_number >= LAST_ROUND - 1 { 2 } else { 1 }
}

/// Shuffle seats and deal sides; each side gets exactly one key player.
pub fn deal_roles<R: Rng + ?Sized>(players: &mut [PlayerEntity], rng: &mut R) -> Option<()> {
    let golare = golare_count(players.len())?;
    players.shuffle(rng);

    let mut dealt: Vec<usize> = (0..players.len()).collect();
    dealt.shuffle(rng);
    for (position, seat) in dealt.into_iter().enumerate() {
        let player = &mut players[seat];
        player.side = Some(if position < golare { Side::Golare } else { Side::Akta });
        player.key_player = position == 0 || position == golare;
    }
    Some(())
}

/// Scores recomputed from resolved rounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scores {
    pub akta: u8,
    pub golare: u8,
}

impl Scores {
    pub fn from_rounds<'a>(rounds: impl IntoIterator<Item = &'a RoundEntity>) -> Self {
        let mut scores = Scores::default();
        for round in rounds {
            let Some(result) = round.result else {
                continue;
            };
            let points = round_points(round.round_number);
            match result.credited_side() {
                Side::Akta => scores.akta = (scores.akta + points).min(WINNING_SCORE),
                Side::Golare => scores.golare = (scores.golare + points).min(WINNING_SCORE),
            }
        }
        scores
    }

    pub fn of(&self, side: Side) -> u8 {
        match side {
            Side::Akta => self.akta,
            Side::Golare => self.golare,
        }
    }

    /// Side that reached the cap, or the leader once the last round is over.
    ///
    /// A tie after the last round goes to the golare.
    pub fn decided(&self, round_number: u8) -> Option<Side> {
        if self.golare >= WINNING_SCORE {
            Some(Side::Golare)
        } else if self.akta >= WINNING_SCORE {
            Some(Side::Akta)
        } else if round_number >= LAST_ROUND {
            Some(if self.akta > self.golare { Side::Akta } else { Side::Golare })
        } else {
            None
        }
    }
}

/// Outcome of a team vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteTally {
    pub ja: Vec<PlayerId>,
    pub nej: Vec<PlayerId>,
    pub abstained: Vec<PlayerId>,
}

impl VoteTally {
    pub fn new(players: &[PlayerEntity], votes: &[VoteEntity]) -> Self {
        let mut tally = VoteTally {
            ja: Vec::new(),
            nej: Vec::new(),
            abstained: Vec::new(),
        };
        for player in players {
            match votes.iter().find(|vote| vote.player_id == player.id) {
                Some(vote) if vote.choice == VoteChoice::Ja => tally.ja.push(player.id),
                Some(_) => tally.nej.push(player.id),
                None => tally.abstained.push(player.id),
            }
        }
        tally
    }

    /// Abstentions do not count either way.
    pub fn approved(&self) -> bool {
        self.ja.len() > self.nej.len()
    }

    pub fn is_complete(&self) -> bool {
        self.abstained.is_empty()
    }
}

/// Outcome of a mission execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionTally {
    pub gola: usize,
    /// Members who never acted and were counted as säkra.
    pub defaulted: Vec<PlayerId>,
}

impl MissionTally {
    pub fn new(team: &[PlayerId], actions: &[MissionActionEntity]) -> Self {
        let mut gola = 0;
        let mut defaulted = Vec::new();
        for member in team {
            match actions.iter().find(|action| action.player_id == *member) {
                Some(action) if action.choice == ActionChoice::Gola => gola += 1,
                Some(_) => {}
                None => defaulted.push(*member),
            }
        }
        MissionTally { gola, defaulted }
    }

    pub fn result(&self) -> MissionResult {
        if self.gola == 0 {
            MissionResult::Success
        } else {
            MissionResult::Fail
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};
    use time::OffsetDateTime;
    use uuid::Uuid;

    use super::*;
    use crate::dao::models::RoundMessages;
    use crate::state::state_machine::RoundPhase;

    fn players(count: usize) -> Vec<PlayerEntity> {
        (1..=count as i64)
            .map(|id| PlayerEntity {
                id,
                name: format!("p{id}"),
                side: None,
                key_player: false,
            })
            .collect()
    }

    fn vote(player_id: PlayerId, choice: VoteChoice) -> VoteEntity {
        VoteEntity {
            round_id: Uuid::nil(),
            player_id,
            choice,
            cast_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn resolved(round_number: u8, result: MissionResult) -> RoundEntity {
        RoundEntity {
            id: Uuid::new_v4(),
            game_id: Uuid::nil(),
            round_number,
            phase: RoundPhase::Reveal,
            capo_id: 1,
            team: Vec::new(),
            failed_votes: 0,
            result: Some(result),
            deadline_at: None,
            messages: RoundMessages::default(),
            version: 0,
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn team_size_table() {
        let sizes: Vec<Option<usize>> = (3..=11).map(|count| team_size(count, None)).collect();
        assert_eq!(
            sizes,
            vec![None, Some(2), Some(2), Some(3), Some(3), Some(3), Some(4), Some(4), None]
        );
        assert_eq!(team_size(6, Some(2)), Some(2));
        assert_eq!(team_size(4, Some(5)), None);
    }

    #[test]
    fn capo_rotates_with_failed_votes() {
        assert_eq!(capo_index(1, 0, 5), 0);
        assert_eq!(capo_index(3, 0, 5), 2);
        assert_eq!(capo_index(3, 2, 5), 4);
        assert_eq!(capo_index(5, 2, 5), 1);
    }

    #[test]
    fn three_ja_two_nej_is_approved() {
        let votes = [
            vote(1, VoteChoice::Ja),
            vote(2, VoteChoice::Ja),
            vote(3, VoteChoice::Ja),
            vote(4, VoteChoice::Nej),
            vote(5, VoteChoice::Nej),
        ];
        let tally = VoteTally::new(&players(5), &votes);
        assert!(tally.approved());
        assert!(tally.is_complete());
    }

    #[test]
    fn tie_with_abstention_is_rejected() {
        let votes = [
            vote(1, VoteChoice::Ja),
            vote(2, VoteChoice::Ja),
            vote(3, VoteChoice::Nej),
            vote(4, VoteChoice::Nej),
        ];
        let tally = VoteTally::new(&players(5), &votes);
        assert!(!tally.approved());
        assert_eq!(tally.abstained, vec![5]);
    }

    #[test]
    fn missing_actions_default_to_sakra() {
        let actions = [MissionActionEntity {
            round_id: Uuid::nil(),
            player_id: 2,
            choice: ActionChoice::Sakra,
            cast_at: OffsetDateTime::UNIX_EPOCH,
        }];
        let tally = MissionTally::new(&[2, 4], &actions);
        assert_eq!(tally.defaulted, vec![4]);
        assert_eq!(tally.result(), MissionResult::Success);
    }

    #[test]
    fn scores_use_round_points_and_cap() {
        let rounds = [
            resolved(1, MissionResult::Success),
            resolved(2, MissionResult::KaosFail),
            resolved(3, MissionResult::Fail),
            resolved(4, MissionResult::Success),
            resolved(5, MissionResult::Fail),
        ];
        let scores = Scores::from_rounds(&rounds);
        assert_eq!(scores, Scores { akta: 3, golare: 3 });

        let early = Scores::from_rounds(&rounds[..2]);
        assert_eq!(early, Scores { akta: 1, golare: 1 });
        assert_eq!(early.decided(2), None);
        assert_eq!(Scores { akta: 3, golare: 1 }.decided(4), Some(Side::Akta));
        assert_eq!(Scores { akta: 2, golare: 1 }.decided(5), Some(Side::Akta));
    }

    #[test]
    fn dealing_gives_each_side_one_key_player() {
        let mut rng = StdRng::seed_from_u64(7);
        for count in MIN_PLAYERS..=MAX_PLAYERS {
            let mut seated = players(count);
            deal_roles(&mut seated, &mut rng).unwrap();

            let golare: Vec<&PlayerEntity> = seated
                .iter()
                .filter(|player| player.side == Some(Side::Golare))
                .collect();
            assert_eq!(golare.len(), golare_count(count).unwrap());
            assert_eq!(golare.iter().filter(|player| player.key_player).count(), 1);
            assert_eq!(
                seated
                    .iter()
                    .filter(|player| player.side == Some(Side::Akta) && player.key_player)
                    .count(),
                1
            );
        }
    }
}
