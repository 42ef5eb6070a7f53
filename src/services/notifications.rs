//! Message texts, inline keyboards and callback payloads.
//!
//! Every text is HTML for the transport's parse mode; player names pass
//! through [`escape_html`]. Callback payloads stay under the platform's
//! 64-byte limit.

use uuid::Uuid;

use crate::{
    dao::models::{GameEntity, MissionResult, PlayerEntity, PlayerId, RoundEntity, Side},
    delivery::{InlineButton, SendOptions},
    narrative::escape_html,
    services::rules::{MissionTally, Scores, VoteTally, round_points},
};

fn name(game: &GameEntity, id: PlayerId) -> String {
    escape_html(&game.player_name(id))
}

fn names(game: &GameEntity, ids: &[PlayerId]) -> String {
    if ids.is_empty() {
        return "–".into();
    }
    ids.iter()
        .map(|id| name(game, *id))
        .collect::<Vec<_>>()
        .join(", ")
}

fn side_name(side: Side) -> &'static str {
    match side {
        Side::Akta => "Äkta",
        Side::Golare => "Golare",
    }
}

fn score_line(scores: Scores) -> String {
    format!(
        "Ställning: <b>Äkta {}</b> – <b>Golare {}</b>",
        scores.akta, scores.golare
    )
}

/// Callback payloads sent back by the chat adapter.
///
/// Round buttons carry the game id and the round number, so the adapter can
/// route a press to `/games/{id}/...` and a press on an old round's keyboard
/// is refused.
pub mod callback {
    use super::*;

    fn round_key(game_id: Uuid, round_number: u8) -> String {
        format!("{}:{round_number}", game_id.simple())
    }

    pub fn nominate(game_id: Uuid, round_number: u8, player: PlayerId) -> String {
        format!("nom:{}:{player}", round_key(game_id, round_number))
    }

    pub fn confirm(game_id: Uuid, round_number: u8) -> String {
        format!("conf:{}", round_key(game_id, round_number))
    }

    pub fn vote(game_id: Uuid, round_number: u8, ja: bool) -> String {
        let choice = if ja { "ja" } else { "nej" };
        format!("vote:{}:{choice}", round_key(game_id, round_number))
    }

    pub fn action(game_id: Uuid, round_number: u8, gola: bool) -> String {
        let choice = if gola { "gola" } else { "sakra" };
        format!("act:{}:{choice}", round_key(game_id, round_number))
    }

    pub fn guess(game_id: Uuid, target: PlayerId) -> String {
        format!("guess:{}:{target}", game_id.simple())
    }
}

pub fn role_message(game: &GameEntity, player: &PlayerEntity) -> String {
    match (player.side, player.key_player) {
        (Some(Side::Golare), key) => {
            let partners: Vec<PlayerId> = game
                .members_of(Side::Golare)
                .filter(|other| other.id != player.id)
                .map(|other| other.id)
                .collect();
            let mut text = String::from("Du är <b>golare</b>. Sabotera stötarna utan att avslöjas.");
            if !partners.is_empty() {
                text.push_str(&format!("\nDina medgolare: {}", names(game, &partners)));
            }
            if key {
                text.push_str("\nDu är golarnas nyckelperson. Håll dig dold till slutet.");
            }
            text
        }
        (Some(Side::Akta), true) => {
            let golare: Vec<PlayerId> = game.members_of(Side::Golare).map(|p| p.id).collect();
            format!(
                "Du är <b>tipsare</b> på den äkta sidan. Du vet att golarna är: {}\n\
                 Lotsa gänget rätt utan att bli avslöjad.",
                names(game, &golare)
            )
        }
        _ => "Du är <b>äkta</b>. Se till att stötarna lyckas och hitta golarna.".into(),
    }
}

pub fn mission_post(game: &GameEntity, round: &RoundEntity, team_size: usize, narrative: &str) -> String {
    format!(
        "<b>Stöt {} av 5</b> ({} poäng)\n\n{}\n\nCapo: <b>{}</b>. Teamet ska vara {} personer.",
        round.round_number,
        round_points(round.round_number),
        narrative,
        name(game, round.capo_id),
        team_size
    )
}

pub fn nomination_prompt(game: &GameEntity, round: &RoundEntity, team_size: usize) -> (String, SendOptions) {
    let text = format!(
        "Du är capo för stöt {}. Välj {} personer och bekräfta.\nValda: {}",
        round.round_number,
        team_size,
        names(game, &round.team)
    );
    let mut rows: Vec<Vec<InlineButton>> = game
        .players
        .iter()
        .map(|player| {
            let marker = if round.team.contains(&player.id) { "✅ " } else { "" };
            vec![InlineButton::new(
                format!("{marker}{}", player.name),
                callback::nominate(round.game_id, round.round_number, player.id),
            )]
        })
        .collect();
    if round.team.len() == team_size {
        rows.push(vec![InlineButton::new("Bekräfta teamet", callback::confirm(round.game_id, round.round_number))]);
    }
    (text, SendOptions::with_keyboard(rows))
}

pub fn nomination_opened(game: &GameEntity, round: &RoundEntity) -> String {
    format!(
        "Nomineringen är öppen. <b>{}</b> väljer team.",
        name(game, round.capo_id)
    )
}

pub fn nomination_timed_out(game: &GameEntity, round: &RoundEntity) -> String {
    format!(
        "Capon hann inte välja team ({} misslyckade förslag). Ny capo: <b>{}</b>.",
        round.failed_votes,
        name(game, round.capo_id)
    )
}

pub fn vote_prompt(game: &GameEntity, round: &RoundEntity, voted: &[PlayerId]) -> (String, SendOptions) {
    let mut text = format!(
        "Föreslaget team för stöt {}: <b>{}</b>\nRösta ja eller nej.",
        round.round_number,
        names(game, &round.team)
    );
    if !voted.is_empty() {
        text.push_str(&format!("\nHar röstat: {}", names(game, voted)));
    }
    let keyboard = vec![vec![
        InlineButton::new("Ja", callback::vote(round.game_id, round.round_number, true)),
        InlineButton::new("Nej", callback::vote(round.game_id, round.round_number, false)),
    ]];
    (text, SendOptions::with_keyboard(keyboard))
}

pub fn vote_result(game: &GameEntity, tally: &VoteTally, approved: bool) -> String {
    format!(
        "Omröstningen {}.\nJa: {}\nNej: {}\nRöstade inte: {}",
        if approved { "gick igenom" } else { "föll" },
        names(game, &tally.ja),
        names(game, &tally.nej),
        names(game, &tally.abstained)
    )
}

pub fn new_capo(game: &GameEntity, round: &RoundEntity) -> String {
    format!(
        "Förslaget röstades ner ({} av 3). Ny capo: <b>{}</b>.",
        round.failed_votes,
        name(game, round.capo_id)
    )
}

pub fn execution_prompt(round: &RoundEntity) -> (String, SendOptions) {
    let text = format!(
        "Du är med i teamet för stöt {}. Säkra eller gola?",
        round.round_number
    );
    let keyboard = vec![vec![
        InlineButton::new("Säkra", callback::action(round.game_id, round.round_number, false)),
        InlineButton::new("Gola", callback::action(round.game_id, round.round_number, true)),
    ]];
    (text, SendOptions::with_keyboard(keyboard))
}

pub fn mission_result(narrative: &str, result: MissionResult, tally: &MissionTally, scores: Scores) -> String {
    let headline = match result {
        MissionResult::Success => "<b>Stöten lyckades!</b>".to_string(),
        _ => format!("<b>Stöten misslyckades.</b> Antal gola: {}", tally.gola),
    };
    format!("{headline}\n\n{narrative}\n\n{}", score_line(scores))
}

pub fn kaos(narrative: &str, scores: Scores) -> String {
    format!("<b>KAOS!</b>\n\n{narrative}\n\n{}", score_line(scores))
}

pub fn nomination_reminder(round: &RoundEntity, team_size: usize) -> String {
    format!(
        "Påminnelse: välj {} personer för stöt {} innan tiden går ut.",
        team_size, round.round_number
    )
}

pub fn execution_reminder(round: &RoundEntity) -> String {
    format!(
        "Påminnelse: du har inte valt säkra eller gola för stöt {} än.",
        round.round_number
    )
}

pub fn wrap_up(round: &RoundEntity, scores: Scores) -> String {
    let outcome = match round.result {
        Some(MissionResult::Success) => "lyckades",
        Some(MissionResult::Fail) => "misslyckades",
        Some(MissionResult::KaosFail) => "slutade i kaos",
        None => "pågår fortfarande",
    };
    format!(
        "Dagens sammanfattning: stöt {} {}.\n{}",
        round.round_number,
        outcome,
        score_line(scores)
    )
}

pub fn endgame_announcement(leading: Side, guessing: Side) -> String {
    format!(
        "<b>{}</b> har nått tre poäng! Men det är inte över än.\n\
         Sista chansen: {} får ett försök att peka ut motståndarnas nyckelperson.",
        side_name(leading),
        side_name(guessing)
    )
}

pub fn final_guess_prompt(game: &GameEntity, guesser: PlayerId) -> (String, SendOptions) {
    let text = "Sista chansen! Vem är motståndarnas nyckelperson?".to_string();
    let rows = game
        .players
        .iter()
        .filter(|player| player.id != guesser)
        .map(|player| {
            vec![InlineButton::new(
                player.name.clone(),
                callback::guess(game.id, player.id),
            )]
        })
        .collect();
    (text, SendOptions::with_keyboard(rows))
}

pub fn guess_outcome(game: &GameEntity, target: Option<PlayerId>, correct: bool) -> String {
    match target {
        None => "Ingen gissning kom in i tid.".into(),
        Some(target) if correct => format!(
            "Gissningen på <b>{}</b> var rätt! Vinsten byter sida.",
            name(game, target)
        ),
        Some(target) => format!("Gissningen på <b>{}</b> var fel.", name(game, target)),
    }
}

pub fn golare_reveal(player: &PlayerEntity) -> String {
    let suffix = if player.key_player { " (nyckelperson)" } else { "" };
    format!("<b>{}</b> var golare{suffix}.", escape_html(&player.name))
}

pub fn winner(side: Side) -> String {
    format!("🏆 <b>{}</b> vinner spelet!", side_name(side))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_payloads_fit_the_platform_limit() {
        let id = Uuid::new_v4();
        for payload in [
            callback::nominate(id, 5, i64::MIN),
            callback::confirm(id, 5),
            callback::vote(id, 5, false),
            callback::action(id, 5, false),
            callback::guess(id, i64::MIN),
        ] {
            assert!(payload.len() <= 64, "{payload} is {} bytes", payload.len());
        }
    }

    #[test]
    fn round_buttons_name_their_game_and_round() {
        let id = Uuid::new_v4();
        assert_eq!(callback::vote(id, 3, true), format!("vote:{}:3:ja", id.simple()));
        assert_eq!(callback::action(id, 1, true), format!("act:{}:1:gola", id.simple()));
        assert_eq!(callback::nominate(id, 2, 7), format!("nom:{}:2:7", id.simple()));
    }
}
