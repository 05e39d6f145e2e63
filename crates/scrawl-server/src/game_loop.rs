use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rand::Rng;

use scrawl_core::events::{Event, TurnEndData, TurnStartData};
use scrawl_core::room::GameStatus;

use crate::config::GameSettings;
use crate::rooms::{self, RoomStore};
use crate::state::AppState;

/// Cooldown between turns.
const TURN_COOLDOWN: Duration = Duration::from_secs(2);

/// The static word pool, loaded once at startup.
#[derive(Debug)]
pub struct WordList {
    words: Vec<String>,
}

impl WordList {
    /// Read one word per line, trimming whitespace and skipping blanks.
    pub fn load(path: &Path) -> io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let words: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();
        if words.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("word list {} is empty", path.display()),
            ));
        }
        tracing::info!(count = words.len(), path = %path.display(), "Loaded word list");
        Ok(Self { words })
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Draw `count` words uniformly with replacement.
    pub fn sample(&self, count: usize) -> Vec<String> {
        let mut rng = rand::rng();
        (0..count)
            .map(|_| self.words[rng.random_range(0..self.words.len())].clone())
            .collect()
    }
}

/// Register a room's game loop with the process-wide task registry, so the
/// runtime cannot drop it before completion.
pub fn spawn(state: &AppState, room_id: String) {
    state.tasks.spawn(game_loop(
        state.redis_client.clone(),
        state.rooms.clone(),
        Arc::clone(&state.words),
        state.config.game.clone(),
        state.config.pubsub.retry_budget,
        room_id,
    ));
}

/// Per-room background task: waits for the start signal on the room channel,
/// runs the rounds, then publishes the terminal state change.
pub async fn game_loop(
    client: redis::Client,
    store: RoomStore,
    words: Arc<WordList>,
    settings: GameSettings,
    retry_budget: u32,
    room_id: String,
) {
    tracing::info!(room = %room_id, "Game loop registered");

    let lobby_timeout = Duration::from_secs(settings.lobby_timeout_secs);
    let started = match tokio::time::timeout(
        lobby_timeout,
        wait_for_start(&client, &room_id, retry_budget),
    )
    .await
    {
        Ok(started) => started,
        Err(_) => {
            // Nobody started the game within the lobby window; reclaim the room.
            tracing::info!(room = %room_id, "Lobby timed out before the game started; ending room");
            if let Err(e) = store.set_status_by_id(&room_id, GameStatus::Ended).await {
                tracing::error!(room = %room_id, error = %e, "Failed to end abandoned room");
            }
            return;
        },
    };
    if !started {
        return;
    }

    tracing::info!(room = %room_id, "Received game start signal");
    if let Err(e) = rounds_loop(&store, &words, &settings, &room_id).await {
        tracing::error!(room = %room_id, error = %e, "Rounds loop aborted on cache error");
        return;
    }

    if let Err(e) = store.set_status_by_id(&room_id, GameStatus::Ended).await {
        tracing::error!(room = %room_id, error = %e, "Failed to persist ended status");
        return;
    }
    match store.load(&room_id).await {
        Ok(Some(room)) => {
            match store
                .publish(&room_id, &Event::GameStateChange(Box::new(room)))
                .await
            {
                Ok(()) => tracing::info!(room = %room_id, "Sent terminal state change"),
                Err(e) => {
                    tracing::error!(room = %room_id, error = %e, "Failed to publish terminal state change");
                },
            }
        },
        Ok(None) => {
            tracing::error!(
                room = %room_id,
                "Room couldn't be reloaded at game end. This should NEVER happen."
            );
        },
        Err(e) => {
            tracing::error!(room = %room_id, error = %e, "Room couldn't be reloaded at game end");
        },
    }
}

/// Block until a GAME_STATE_CHANGE(ongoing) arrives on the room channel.
/// Returns false when the retry budget is exhausted.
async fn wait_for_start(client: &redis::Client, room_id: &str, retry_budget: u32) -> bool {
    let mut connect_tries: u32 = 0;
    loop {
        let mut pubsub = match rooms::subscribe(client, room_id).await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                connect_tries += 1;
                if connect_tries >= retry_budget {
                    tracing::warn!(
                        room = %room_id,
                        tries = connect_tries,
                        "Game loop could not reach the cache; giving up. Is redis running?"
                    );
                    return false;
                }
                tracing::debug!(room = %room_id, error = %e, "Game loop subscribe failed");
                continue;
            },
        };
        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let Ok(payload) = msg.get_payload::<String>() else {
                continue;
            };
            match serde_json::from_str::<Event>(&payload) {
                Ok(Event::GameStateChange(room)) if room.status == GameStatus::Ongoing => {
                    return true;
                },
                Ok(_) => {},
                Err(e) => {
                    tracing::warn!(room = %room_id, error = %e, "Dropping unparseable channel payload");
                },
            }
        }
        connect_tries += 1;
        if connect_tries >= retry_budget {
            tracing::warn!(
                room = %room_id,
                tries = connect_tries,
                "Game loop could not reach the cache; giving up. Is redis running?"
            );
            return false;
        }
    }
}

/// Sequence every member's turn for the configured number of rounds.
async fn rounds_loop(
    store: &RoomStore,
    words: &WordList,
    settings: &GameSettings,
    room_id: &str,
) -> redis::RedisResult<()> {
    let n_members = store.member_count(room_id).await?;
    let mut pool = words.sample(n_members * settings.rounds as usize);
    let turn_time = Duration::from_secs(settings.sec_per_round);
    let poll_interval = Duration::from_millis(settings.poll_interval_ms);

    for round in 0..settings.rounds {
        tracing::info!(room = %room_id, round = round + 1, "Round starting");
        let members = store.members(room_id).await?;
        for (idx, member) in members.iter().enumerate() {
            // A member who disconnected since the snapshot loses the turn.
            if !store.has_member(room_id, member).await? {
                tracing::info!(
                    room = %room_id,
                    username = %member.username,
                    "Member no longer connected; skipping turn"
                );
                continue;
            }
            let Some(answer) = pool.pop() else {
                tracing::warn!(room = %room_id, "Word pool exhausted; ending rounds early");
                return Ok(());
            };
            store.set_answer(room_id, &answer).await?;
            store.seed_guessed(room_id, &member.user_id).await?;
            tracing::info!(room = %room_id, username = %member.username, "Turn to draw");
            store
                .publish(
                    room_id,
                    &Event::TurnStart(TurnStartData {
                        user: member.clone(),
                        answer: Some(answer),
                    }),
                )
                .await?;

            // Timing out is the normal outcome when not everyone guesses.
            match tokio::time::timeout(
                turn_time,
                wait_until_everyone_guesses(store, room_id, poll_interval),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => tracing::info!(room = %room_id, turn = idx, "Turn timed out"),
            }

            store.clear_turn(room_id).await?;
            store
                .publish(room_id, &Event::TurnEnd(TurnEndData { turn: idx }))
                .await?;
            tokio::time::sleep(TURN_COOLDOWN).await;
        }
    }
    Ok(())
}

/// Poll the cache until the guessed set covers the member list. Callers wrap
/// this in a timeout.
async fn wait_until_everyone_guesses(
    store: &RoomStore,
    room_id: &str,
    poll_interval: Duration,
) -> redis::RedisResult<()> {
    loop {
        let guesses = store.guessed_count(room_id).await?;
        let members = store.member_count(room_id).await?;
        if guesses >= members {
            tracing::info!(room = %room_id, "Everyone has guessed");
            return Ok(());
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn write_temp_words(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("{name}-{}.txt", uuid::Uuid::new_v4()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn load_strips_whitespace_and_blanks() {
        let path = write_temp_words("words", "apple\n  banana  \n\n\tcherry\n");
        let words = WordList::load(&path).unwrap();
        assert_eq!(words.len(), 3);
        let sampled: HashSet<String> = words.sample(100).into_iter().collect();
        assert!(sampled.is_subset(&HashSet::from([
            "apple".to_string(),
            "banana".to_string(),
            "cherry".to_string(),
        ])));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn load_rejects_empty_file() {
        let path = write_temp_words("empty", "\n   \n");
        let err = WordList::load(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let err = WordList::load(Path::new("/definitely/not/here.txt")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn sample_draws_with_replacement() {
        let path = write_temp_words("single", "onlyword\n");
        let words = WordList::load(&path).unwrap();
        // A one-word list can still fill any pool size.
        let pool = words.sample(5);
        assert_eq!(pool.len(), 5);
        assert!(pool.iter().all(|w| w == "onlyword"));
        std::fs::remove_file(path).ok();
    }
}
