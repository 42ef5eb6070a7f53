use std::time::SystemTime;

use mongodb::bson::{self, DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    dao::models::{
        ActionChoice, EndgameEntity, FinalGuessEntity, GameEntity, GameState, MissionActionEntity,
        MissionResult, PlayerEntity, PlayerId, RoundEntity, RoundMessages, Side, VoteChoice,
        VoteEntity,
    },
    state::state_machine::RoundPhase,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoGameDocument {
    #[serde(rename = "_id")]
    id: bson::Uuid,
    group_chat: i64,
    admin_id: i64,
    state: GameState,
    round_counter: i32,
    akta_score: i32,
    golare_score: i32,
    team_size: Option<i32>,
    players: Vec<PlayerEntity>,
    endgame: Option<EndgameEntity>,
    winner: Option<Side>,
    created_at: DateTime,
    updated_at: DateTime,
}

impl From<GameEntity> for MongoGameDocument {
    fn from(value: GameEntity) -> Self {
        Self {
            id: to_bson_uuid(value.id),
            group_chat: value.group_chat,
            admin_id: value.admin_id,
            state: value.state,
            round_counter: value.round_counter.into(),
            akta_score: value.akta_score.into(),
            golare_score: value.golare_score.into(),
            team_size: value.team_size.map(Into::into),
            players: value.players,
            endgame: value.endgame,
            winner: value.winner,
            created_at: to_bson_datetime(value.created_at),
            updated_at: to_bson_datetime(value.updated_at),
        }
    }
}

impl From<MongoGameDocument> for GameEntity {
    fn from(value: MongoGameDocument) -> Self {
        Self {
            id: from_bson_uuid(value.id),
            group_chat: value.group_chat,
            admin_id: value.admin_id,
            state: value.state,
            round_counter: narrow(value.round_counter),
            akta_score: narrow(value.akta_score),
            golare_score: narrow(value.golare_score),
            team_size: value.team_size.map(narrow),
            players: value.players,
            endgame: value.endgame,
            winner: value.winner,
            created_at: from_bson_datetime(value.created_at),
            updated_at: from_bson_datetime(value.updated_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRoundDocument {
    #[serde(rename = "_id")]
    id: bson::Uuid,
    game_id: bson::Uuid,
    round_number: i32,
    phase: RoundPhase,
    capo_id: i64,
    team: Vec<i64>,
    failed_votes: i32,
    result: Option<MissionResult>,
    deadline_at: Option<DateTime>,
    #[serde(default)]
    messages: RoundMessages,
    version: i64,
    created_at: DateTime,
    updated_at: DateTime,
}

impl From<RoundEntity> for MongoRoundDocument {
    fn from(value: RoundEntity) -> Self {
        Self {
            id: to_bson_uuid(value.id),
            game_id: to_bson_uuid(value.game_id),
            round_number: value.round_number.into(),
            phase: value.phase,
            capo_id: value.capo_id,
            team: value.team,
            failed_votes: value.failed_votes.into(),
            result: value.result,
            deadline_at: value.deadline_at.map(to_bson_datetime),
            messages: value.messages,
            version: i64::try_from(value.version).unwrap_or(i64::MAX),
            created_at: to_bson_datetime(value.created_at),
            updated_at: to_bson_datetime(value.updated_at),
        }
    }
}

impl From<MongoRoundDocument> for RoundEntity {
    fn from(value: MongoRoundDocument) -> Self {
        Self {
            id: from_bson_uuid(value.id),
            game_id: from_bson_uuid(value.game_id),
            round_number: narrow(value.round_number),
            phase: value.phase,
            capo_id: value.capo_id,
            team: value.team,
            failed_votes: narrow(value.failed_votes),
            result: value.result,
            deadline_at: value.deadline_at.map(from_bson_datetime),
            messages: value.messages,
            version: u64::try_from(value.version).unwrap_or_default(),
            created_at: from_bson_datetime(value.created_at),
            updated_at: from_bson_datetime(value.updated_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoVoteDocument {
    round_id: bson::Uuid,
    player_id: i64,
    choice: VoteChoice,
    cast_at: DateTime,
}

impl From<VoteEntity> for MongoVoteDocument {
    fn from(value: VoteEntity) -> Self {
        Self {
            round_id: to_bson_uuid(value.round_id),
            player_id: value.player_id,
            choice: value.choice,
            cast_at: to_bson_datetime(value.cast_at),
        }
    }
}

impl From<MongoVoteDocument> for VoteEntity {
    fn from(value: MongoVoteDocument) -> Self {
        Self {
            round_id: from_bson_uuid(value.round_id),
            player_id: value.player_id,
            choice: value.choice,
            cast_at: from_bson_datetime(value.cast_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoActionDocument {
    round_id: bson::Uuid,
    player_id: i64,
    choice: ActionChoice,
    cast_at: DateTime,
}

impl From<MissionActionEntity> for MongoActionDocument {
    fn from(value: MissionActionEntity) -> Self {
        Self {
            round_id: to_bson_uuid(value.round_id),
            player_id: value.player_id,
            choice: value.choice,
            cast_at: to_bson_datetime(value.cast_at),
        }
    }
}

impl From<MongoActionDocument> for MissionActionEntity {
    fn from(value: MongoActionDocument) -> Self {
        Self {
            round_id: from_bson_uuid(value.round_id),
            player_id: value.player_id,
            choice: value.choice,
            cast_at: from_bson_datetime(value.cast_at),
        }
    }
}

/// Final guesses are keyed by game id so the primary key enforces one per game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoFinalGuessDocument {
    #[serde(rename = "_id")]
    game_id: bson::Uuid,
    guessing_side: Side,
    target_id: Option<PlayerId>,
    guesser_id: Option<PlayerId>,
    correct: bool,
    created_at: DateTime,
}

impl From<FinalGuessEntity> for MongoFinalGuessDocument {
    fn from(value: FinalGuessEntity) -> Self {
        Self {
            game_id: to_bson_uuid(value.game_id),
            guessing_side: value.guessing_side,
            target_id: value.target_id,
            guesser_id: value.guesser_id,
            correct: value.correct,
            created_at: to_bson_datetime(value.created_at),
        }
    }
}

impl From<MongoFinalGuessDocument> for FinalGuessEntity {
    fn from(value: MongoFinalGuessDocument) -> Self {
        Self {
            game_id: from_bson_uuid(value.game_id),
            guessing_side: value.guessing_side,
            target_id: value.target_id,
            guesser_id: value.guesser_id,
            correct: value.correct,
            created_at: from_bson_datetime(value.created_at),
        }
    }
}

pub fn to_bson_uuid(id: Uuid) -> bson::Uuid {
    bson::Uuid::from_bytes(id.into_bytes())
}

fn from_bson_uuid(id: bson::Uuid) -> Uuid {
    Uuid::from_bytes(id.bytes())
}

fn to_bson_datetime(value: OffsetDateTime) -> DateTime {
    DateTime::from_system_time(SystemTime::from(value))
}

fn from_bson_datetime(value: DateTime) -> OffsetDateTime {
    OffsetDateTime::from(value.to_system_time())
}

fn narrow(value: i32) -> u8 {
    u8::try_from(value).unwrap_or_default()
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": to_bson_uuid(id)}
}
