use serde_json::Value;

use scrawl_core::events::{ChatMessage, Drawing, ErrorData, Event};
use scrawl_core::room::{GameMember, GameStatus, Room};

use crate::error::ProcessError;
use crate::rooms::RoomStore;

pub const OWNER_ONLY_MESSAGE: &str = "You do not own this room";
pub const CORRECT_GUESS_MESSAGE: &str = "Just guessed the answer!";
/// Replacement body for repeat correct guesses, so latecomers to the chat
/// never see the answer text.
const MASKED: &str = "****";

/// Pull the envelope fields out of a raw client frame.
fn parse_envelope(raw: &Value) -> Result<(&str, &Value), ProcessError> {
    let event_type = raw
        .get("event_type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProcessError::Malformed("missing event_type".to_string()))?;
    let data = raw
        .get("data")
        .ok_or_else(|| ProcessError::Malformed("missing data".to_string()))?;
    Ok((event_type, data))
}

/// How a chat line relates to the current answer.
#[derive(Debug, PartialEq, Eq)]
enum GuessOutcome {
    /// First correct guess from this user.
    Correct,
    /// Repeat correct guess; the text gets masked.
    Masked,
    /// An ordinary chat message.
    Plain,
}

fn evaluate_guess(answer: Option<&str>, text: &str, has_guessed: bool) -> GuessOutcome {
    match answer {
        Some(answer) if text.eq_ignore_ascii_case(answer) => {
            if has_guessed {
                GuessOutcome::Masked
            } else {
                GuessOutcome::Correct
            }
        },
        _ => GuessOutcome::Plain,
    }
}

/// Turn one inbound client frame into the event to publish. ERROR events are
/// returned for the caller to deliver personally rather than to the room.
pub async fn process_message(
    raw: &Value,
    room: &mut Room,
    user: &GameMember,
    store: &RoomStore,
) -> Result<Event, ProcessError> {
    let (event_type, data) = parse_envelope(raw)?;
    match event_type {
        "start" => {
            if user.user_id != room.owner.user_id {
                return Ok(Event::Error(ErrorData {
                    message: OWNER_ONLY_MESSAGE.to_string(),
                }));
            }
            if room.status != GameStatus::Lobby {
                return Ok(Event::Error(ErrorData {
                    message: "The game has already started".to_string(),
                }));
            }
            store.set_status(room, GameStatus::Ongoing).await?;
            Ok(Event::GameStateChange(Box::new(room.clone())))
        },
        "message" => {
            let text = data.get("message").and_then(Value::as_str).ok_or_else(|| {
                ProcessError::Malformed("message event without message text".to_string())
            })?;
            let answer = store.answer(&room.room_id).await?;
            let has_guessed = store.has_guessed(&room.room_id, &user.user_id).await?;
            match evaluate_guess(answer.as_deref(), text, has_guessed) {
                GuessOutcome::Correct => {
                    store.mark_guessed(&room.room_id, &user.user_id).await?;
                    Ok(Event::CorrectGuess(ChatMessage {
                        username: user.username.clone(),
                        message: CORRECT_GUESS_MESSAGE.to_string(),
                        has_guessed: true,
                    }))
                },
                GuessOutcome::Masked => Ok(Event::Message(ChatMessage {
                    username: user.username.clone(),
                    message: MASKED.to_string(),
                    has_guessed: true,
                })),
                GuessOutcome::Plain => Ok(Event::Message(ChatMessage {
                    username: user.username.clone(),
                    message: text.to_string(),
                    has_guessed,
                })),
            }
        },
        "drawing" => {
            let elements = data
                .get("elements")
                .and_then(Value::as_array)
                .cloned()
                .ok_or_else(|| {
                    ProcessError::Malformed("drawing event without elements".to_string())
                })?;
            Ok(Event::Drawing(Drawing {
                user: user.clone(),
                elements,
            }))
        },
        // Recognized events pass through with the given type and data;
        // anything else fails to parse and is malformed.
        _ => serde_json::from_value::<Event>(raw.clone())
            .map_err(|e| ProcessError::Malformed(format!("unrecognized or invalid event: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_requires_event_type() {
        let raw = json!({"data": {}});
        match parse_envelope(&raw) {
            Err(ProcessError::Malformed(reason)) => assert!(reason.contains("event_type")),
            other => panic!("Expected Malformed, got: {other:?}"),
        }
    }

    #[test]
    fn envelope_requires_data() {
        let raw = json!({"event_type": "message"});
        match parse_envelope(&raw) {
            Err(ProcessError::Malformed(reason)) => assert!(reason.contains("data")),
            other => panic!("Expected Malformed, got: {other:?}"),
        }
    }

    #[test]
    fn envelope_extracts_fields() {
        let raw = json!({"event_type": "drawing", "data": {"elements": []}});
        let (event_type, data) = parse_envelope(&raw).unwrap();
        assert_eq!(event_type, "drawing");
        assert!(data.get("elements").is_some());
    }

    #[test]
    fn first_correct_guess_wins() {
        assert_eq!(
            evaluate_guess(Some("apple"), "apple", false),
            GuessOutcome::Correct
        );
    }

    #[test]
    fn guess_comparison_ignores_case() {
        assert_eq!(
            evaluate_guess(Some("apple"), "Apple", false),
            GuessOutcome::Correct
        );
        assert_eq!(
            evaluate_guess(Some("Apple"), "APPLE", false),
            GuessOutcome::Correct
        );
    }

    #[test]
    fn repeat_correct_guess_is_masked() {
        assert_eq!(
            evaluate_guess(Some("apple"), "apple", true),
            GuessOutcome::Masked
        );
    }

    #[test]
    fn wrong_guess_is_plain() {
        assert_eq!(
            evaluate_guess(Some("apple"), "pear", false),
            GuessOutcome::Plain
        );
        assert_eq!(
            evaluate_guess(Some("apple"), "pear", true),
            GuessOutcome::Plain
        );
    }

    #[test]
    fn no_answer_between_turns_is_plain() {
        assert_eq!(evaluate_guess(None, "apple", false), GuessOutcome::Plain);
    }
}
