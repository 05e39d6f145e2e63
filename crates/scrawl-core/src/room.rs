use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of members a room can hold.
pub const MAX_MEMBERS: usize = 8;

/// Lifecycle state of a room. Transitions only move forward:
/// Lobby -> Ongoing -> Ended (an abandoned lobby may jump straight to Ended).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Lobby,
    Ongoing,
    Ended,
}

impl std::fmt::Display for GameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Lobby => "lobby",
            Self::Ongoing => "ongoing",
            Self::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// A status string in the cache that is not one of the known states.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized status: {0}")]
pub struct ParseStatusError(pub String);

impl std::str::FromStr for GameStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lobby" => Ok(Self::Lobby),
            "ongoing" => Ok(Self::Ongoing),
            "ended" => Ok(Self::Ended),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

/// A user currently playing in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMember {
    pub user_id: String,
    pub username: String,
}

impl GameMember {
    /// Canonical JSON encoding used for cache list entries. Field order is
    /// fixed by the struct declaration (`user_id` then `username`), so LREM
    /// and LPOS comparisons match byte-for-byte.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).expect("GameMember serialization is infallible")
    }
}

/// Rejection reasons for room membership and lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Room not found")]
    NotFound,
    #[error("User is already in this room")]
    AlreadyJoined,
    #[error("Room is no longer accepting members")]
    NotAcceptingMembers,
    #[error("Maximum room capacity reached")]
    CapacityReached,
}

/// A game room. The authoritative copy lives in the shared cache; this is the
/// in-memory snapshot that gets serialized into events and HTTP responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub room_id: String,
    pub owner: GameMember,
    pub users: Vec<GameMember>,
    pub status: GameStatus,
}

impl Room {
    /// Create a fresh lobby owned by the given member.
    pub fn new(owner: GameMember) -> Self {
        Self {
            room_id: Uuid::new_v4().to_string(),
            owner,
            users: Vec::new(),
            status: GameStatus::Lobby,
        }
    }

    /// Validate that a member may join without mutating anything.
    pub fn can_join(&self, member: &GameMember) -> Result<(), RoomError> {
        if self.users.iter().any(|u| u.user_id == member.user_id) {
            return Err(RoomError::AlreadyJoined);
        }
        if self.status != GameStatus::Lobby {
            return Err(RoomError::NotAcceptingMembers);
        }
        if self.users.len() >= MAX_MEMBERS {
            return Err(RoomError::CapacityReached);
        }
        Ok(())
    }

    /// Append a member to the in-memory list after validation.
    pub fn join(&mut self, member: GameMember) -> Result<(), RoomError> {
        self.can_join(&member)?;
        self.users.push(member);
        Ok(())
    }

    /// Remove the first matching entry from the in-memory list.
    /// Removing an absent member is a no-op.
    pub fn remove(&mut self, member: &GameMember) {
        if let Some(pos) = self.users.iter().position(|u| u == member) {
            self.users.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(n: u32) -> GameMember {
        GameMember {
            user_id: format!("00000000-0000-0000-0000-{n:012}"),
            username: format!("player{n}"),
        }
    }

    fn lobby() -> Room {
        Room::new(member(0))
    }

    #[test]
    fn new_room_is_empty_lobby() {
        let room = lobby();
        assert_eq!(room.status, GameStatus::Lobby);
        assert!(room.users.is_empty());
        // room_id must be a parseable UUID
        assert!(Uuid::parse_str(&room.room_id).is_ok());
    }

    #[test]
    fn join_appends_in_order() {
        let mut room = lobby();
        room.join(member(1)).unwrap();
        room.join(member(2)).unwrap();
        assert_eq!(room.users[0], member(1));
        assert_eq!(room.users[1], member(2));
    }

    #[test]
    fn join_rejects_duplicate_user_id() {
        let mut room = lobby();
        room.join(member(1)).unwrap();
        assert_eq!(room.join(member(1)), Err(RoomError::AlreadyJoined));
        assert_eq!(room.users.len(), 1);
    }

    #[test]
    fn join_rejects_when_not_lobby() {
        let mut room = lobby();
        room.status = GameStatus::Ongoing;
        assert_eq!(room.join(member(1)), Err(RoomError::NotAcceptingMembers));
    }

    #[test]
    fn join_rejects_at_capacity() {
        let mut room = lobby();
        for n in 1..=MAX_MEMBERS as u32 {
            room.join(member(n)).unwrap();
        }
        assert_eq!(room.join(member(99)), Err(RoomError::CapacityReached));
        assert_eq!(room.users.len(), MAX_MEMBERS);
    }

    #[test]
    fn remove_is_noop_for_absent_member() {
        let mut room = lobby();
        room.join(member(1)).unwrap();
        room.remove(&member(2));
        assert_eq!(room.users.len(), 1);
    }

    #[test]
    fn status_display_matches_wire_names() {
        assert_eq!(GameStatus::Lobby.to_string(), "lobby");
        assert_eq!(GameStatus::Ongoing.to_string(), "ongoing");
        assert_eq!(GameStatus::Ended.to_string(), "ended");
    }

    #[test]
    fn status_parse_roundtrip() {
        for status in [GameStatus::Lobby, GameStatus::Ongoing, GameStatus::Ended] {
            assert_eq!(status.to_string().parse::<GameStatus>().unwrap(), status);
        }
        assert!("paused".parse::<GameStatus>().is_err());
    }

    #[test]
    fn canonical_json_is_byte_stable() {
        let m = GameMember {
            user_id: "abc".to_string(),
            username: "alice".to_string(),
        };
        assert_eq!(m.canonical_json(), r#"{"user_id":"abc","username":"alice"}"#);
    }

    #[test]
    fn room_json_uses_lowercase_status() {
        let room = lobby();
        let json = serde_json::to_string(&room).unwrap();
        assert!(json.contains(r#""status":"lobby""#));
    }

    #[test]
    fn error_reason_texts() {
        assert_eq!(
            RoomError::AlreadyJoined.to_string(),
            "User is already in this room"
        );
        assert_eq!(
            RoomError::NotAcceptingMembers.to_string(),
            "Room is no longer accepting members"
        );
        assert_eq!(
            RoomError::CapacityReached.to_string(),
            "Maximum room capacity reached"
        );
    }
}
