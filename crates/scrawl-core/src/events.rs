use serde::{Deserialize, Serialize};

use crate::room::{GameMember, Room};

/// A chat line as seen by the room. `has_guessed` lets clients style messages
/// from players who already know the answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub username: String,
    pub message: String,
    pub has_guessed: bool,
}

/// A batch of drawing elements from the current drawer. Element geometry is
/// opaque to the server and relayed as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drawing {
    pub user: GameMember,
    pub elements: Vec<serde_json::Value>,
}

/// Payload announcing a new turn. `answer` is present only for the drawer;
/// relays strip it before forwarding to everyone else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnStartData {
    pub user: GameMember,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

/// Payload announcing the end of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnEndData {
    pub turn: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    pub message: String,
}

/// The tagged envelope exchanged on the room channel and the wire.
/// Serializes as `{"event_type": "<name>", "data": <payload>}` with lowercase
/// snake_case names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum Event {
    /// Client request to begin the game; carries no meaningful payload.
    Start(serde_json::Value),
    /// Sent personally to a freshly joined client with the room snapshot.
    Connect(Box<Room>),
    MemberJoin(GameMember),
    MemberLeave(GameMember),
    OwnerChange(GameMember),
    GameStateChange(Box<Room>),
    Message(ChatMessage),
    CorrectGuess(ChatMessage),
    Drawing(Drawing),
    TurnStart(TurnStartData),
    TurnEnd(TurnEndData),
    Error(ErrorData),
}

impl Event {
    /// The on-wire event name, mostly for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Connect(_) => "connect",
            Self::MemberJoin(_) => "member_join",
            Self::MemberLeave(_) => "member_leave",
            Self::OwnerChange(_) => "owner_change",
            Self::GameStateChange(_) => "game_state_change",
            Self::Message(_) => "message",
            Self::CorrectGuess(_) => "correct_guess",
            Self::Drawing(_) => "drawing",
            Self::TurnStart(_) => "turn_start",
            Self::TurnEnd(_) => "turn_end",
            Self::Error(_) => "error",
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("Event serialization is infallible")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::GameStatus;

    fn member() -> GameMember {
        GameMember {
            user_id: "u1".to_string(),
            username: "alice".to_string(),
        }
    }

    #[test]
    fn envelope_shape() {
        let event = Event::MemberJoin(member());
        let json: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(json["event_type"], "member_join");
        assert_eq!(json["data"]["user_id"], "u1");
        assert_eq!(json["data"]["username"], "alice");
    }

    #[test]
    fn wire_names_are_the_closed_set() {
        let room = Box::new(Room::new(member()));
        let chat = ChatMessage {
            username: "alice".to_string(),
            message: "hi".to_string(),
            has_guessed: false,
        };
        let cases: Vec<(Event, &str)> = vec![
            (Event::Start(serde_json::json!({})), "start"),
            (Event::Connect(room.clone()), "connect"),
            (Event::MemberJoin(member()), "member_join"),
            (Event::MemberLeave(member()), "member_leave"),
            (Event::OwnerChange(member()), "owner_change"),
            (Event::GameStateChange(room), "game_state_change"),
            (Event::Message(chat.clone()), "message"),
            (Event::CorrectGuess(chat), "correct_guess"),
            (
                Event::Drawing(Drawing {
                    user: member(),
                    elements: vec![],
                }),
                "drawing",
            ),
            (
                Event::TurnStart(TurnStartData {
                    user: member(),
                    answer: None,
                }),
                "turn_start",
            ),
            (Event::TurnEnd(TurnEndData { turn: 0 }), "turn_end"),
            (
                Event::Error(ErrorData {
                    message: "nope".to_string(),
                }),
                "error",
            ),
        ];
        for (event, name) in cases {
            assert_eq!(event.name(), name);
            let json: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
            assert_eq!(json["event_type"], name, "wire tag for {name}");
        }
    }

    #[test]
    fn event_json_roundtrip() {
        let event = Event::CorrectGuess(ChatMessage {
            username: "bob".to_string(),
            message: "Just guessed the answer!".to_string(),
            has_guessed: true,
        });
        let back: Event = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn turn_start_omits_redacted_answer() {
        let full = Event::TurnStart(TurnStartData {
            user: member(),
            answer: Some("apple".to_string()),
        });
        assert!(full.to_json().contains("\"answer\":\"apple\""));

        let redacted = Event::TurnStart(TurnStartData {
            user: member(),
            answer: None,
        });
        assert!(!redacted.to_json().contains("answer"));
    }

    #[test]
    fn turn_start_parses_without_answer() {
        let json = r#"{"event_type":"turn_start","data":{"user":{"user_id":"u1","username":"alice"}}}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        match event {
            Event::TurnStart(data) => assert!(data.answer.is_none()),
            other => panic!("Expected TurnStart, got: {other:?}"),
        }
    }

    #[test]
    fn game_state_change_carries_room() {
        let mut room = Room::new(member());
        room.status = GameStatus::Ended;
        let event = Event::GameStateChange(Box::new(room));
        let json: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(json["data"]["status"], "ended");
    }

    #[test]
    fn unknown_event_type_fails_to_parse() {
        let json = r#"{"event_type":"rematch","data":{}}"#;
        assert!(serde_json::from_str::<Event>(json).is_err());
    }

    #[test]
    fn drawing_elements_are_opaque() {
        let json = r#"{"event_type":"drawing","data":{"user":{"user_id":"u1","username":"alice"},"elements":[{"x":1,"y":2},[3,4],"free-form"]}}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        match event {
            Event::Drawing(d) => assert_eq!(d.elements.len(), 3),
            other => panic!("Expected Drawing, got: {other:?}"),
        }
    }
}
