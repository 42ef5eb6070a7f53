//! Validation helpers for DTOs.

use std::collections::HashSet;

use validator::ValidationError;

use crate::dto::game::CreateGameRequest;

/// Player ids must be unique and the admin must be seated.
pub fn validate_roster(request: &CreateGameRequest) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    if let Some(duplicate) = request.players.iter().find(|player| !seen.insert(player.id)) {
        let mut err = ValidationError::new("players_unique");
        err.message = Some(format!("player `{}` is listed twice", duplicate.id).into());
        return Err(err);
    }

    if !seen.contains(&request.admin_id) {
        let mut err = ValidationError::new("admin_seated");
        err.message = Some("the admin must be one of the players".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use validator::Validate;

    use super::*;
    use crate::dto::game::PlayerInput;

    fn request(admin_id: i64, ids: &[i64]) -> CreateGameRequest {
        CreateGameRequest {
            group_chat: -100,
            admin_id,
            team_size: None,
            players: ids
                .iter()
                .map(|id| PlayerInput {
                    id: *id,
                    name: format!("p{id}"),
                })
                .collect(),
        }
    }

    #[test]
    fn accepts_a_seated_admin() {
        assert!(validate_roster(&request(2, &[1, 2, 3, 4])).is_ok());
        assert!(request(2, &[1, 2, 3, 4]).validate().is_ok());
    }

    #[test]
    fn rejects_duplicate_players() {
        let err = validate_roster(&request(1, &[1, 2, 2, 4])).unwrap_err();
        assert_eq!(err.code, "players_unique");
    }

    #[test]
    fn rejects_an_admin_outside_the_roster() {
        let err = validate_roster(&request(9, &[1, 2, 3, 4])).unwrap_err();
        assert_eq!(err.code, "admin_seated");
    }

    #[test]
    fn rosters_below_four_players_are_rejected() {
        assert!(request(1, &[1, 2, 3]).validate().is_err());
        assert!(request(1, &(1..=11).collect::<Vec<_>>()).validate().is_err());
    }

    #[test]
    fn field_rules_apply_to_nested_players() {
        let mut invalid = request(1, &[1, 2, 3, 4]);
        invalid.players[3].name.clear();
        assert!(invalid.validate().is_err());
    }
}
