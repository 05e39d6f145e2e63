use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use scrawl_core::events::Event;
use scrawl_core::room::{GameMember, GameStatus, Room};

use crate::error::StoreError;

/// Pub/sub channel for a room.
pub fn channel(room_id: &str) -> String {
    format!("room:{room_id}")
}

fn key(room_id: &str, field: &str) -> String {
    format!("room:{room_id}:{field}")
}

/// Open a dedicated pub/sub connection subscribed to the room channel.
pub async fn subscribe(
    client: &redis::Client,
    room_id: &str,
) -> redis::RedisResult<redis::aio::PubSub> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel(room_id)).await?;
    Ok(pubsub)
}

/// Cache-backed room state. All key formatting lives here; the shared cache
/// is the single source of truth for membership and turn bookkeeping.
#[derive(Clone)]
pub struct RoomStore {
    conn: ConnectionManager,
}

impl RoomStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Write owner, status, and users in one transaction. The users list is
    /// only pushed when non-empty.
    pub async fn save(&self, room: &Room) -> redis::RedisResult<()> {
        let mut conn = self.conn.clone();
        let users: Vec<String> = room.users.iter().map(GameMember::canonical_json).collect();
        tracing::info!(room = %room.room_id, "Writing room to cache");
        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(key(&room.room_id, "owner"), room.owner.canonical_json())
            .ignore()
            .set(key(&room.room_id, "status"), room.status.to_string())
            .ignore();
        if !users.is_empty() {
            pipe.rpush(key(&room.room_id, "users"), users).ignore();
        }
        pipe.query_async::<()>(&mut conn).await
    }

    /// Reconstruct a room. Returns `None` when the status key is absent.
    pub async fn load(&self, room_id: &str) -> redis::RedisResult<Option<Room>> {
        let mut conn = self.conn.clone();
        let raw_status: Option<String> = conn.get(key(room_id, "status")).await?;
        let Some(raw_status) = raw_status else {
            tracing::warn!(room = %room_id, "Room does not exist in cache");
            return Ok(None);
        };
        let Ok(status) = raw_status.parse::<GameStatus>() else {
            tracing::error!(room = %room_id, status = %raw_status, "Unrecognized status value in cache");
            return Ok(None);
        };
        let raw_owner: Option<String> = conn.get(key(room_id, "owner")).await?;
        let Some(owner) = raw_owner
            .as_deref()
            .and_then(|raw| serde_json::from_str::<GameMember>(raw).ok())
        else {
            tracing::error!(room = %room_id, "Room owner missing or unreadable");
            return Ok(None);
        };
        let users = self.members(room_id).await?;
        Ok(Some(Room {
            room_id: room_id.to_string(),
            owner,
            users,
            status,
        }))
    }

    /// Members in join order.
    pub async fn members(&self, room_id: &str) -> redis::RedisResult<Vec<GameMember>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(key(room_id, "users"), 0, -1).await?;
        Ok(raw
            .iter()
            .filter_map(|entry| {
                let parsed = serde_json::from_str::<GameMember>(entry);
                if parsed.is_err() {
                    tracing::error!(room = %room_id, entry, "Unreadable member entry in cache");
                }
                parsed.ok()
            })
            .collect())
    }

    pub async fn member_count(&self, room_id: &str) -> redis::RedisResult<usize> {
        let mut conn = self.conn.clone();
        conn.llen(key(room_id, "users")).await
    }

    /// Validate and append a member, mirroring the change into the cache.
    pub async fn join(&self, room: &mut Room, member: GameMember) -> Result<(), StoreError> {
        room.can_join(&member)?;
        let mut conn = self.conn.clone();
        tracing::info!(room = %room.room_id, username = %member.username, "Adding member to room");
        let _: i64 = conn
            .rpush(key(&room.room_id, "users"), member.canonical_json())
            .await
            .map_err(StoreError::Cache)?;
        room.users.push(member);
        Ok(())
    }

    /// Remove one matching list entry. A removal count other than 1 is
    /// logged but not an error.
    pub async fn leave(&self, room_id: &str, member: &GameMember) -> redis::RedisResult<()> {
        let mut conn = self.conn.clone();
        tracing::info!(room = %room_id, username = %member.username, "Removing member from room");
        let removed: i64 = conn
            .lrem(key(room_id, "users"), 1, member.canonical_json())
            .await?;
        if removed != 1 {
            tracing::warn!(
                room = %room_id,
                username = %member.username,
                removed,
                "Member removal did not match exactly one entry"
            );
        }
        Ok(())
    }

    /// True iff the member's canonical encoding is present in the list.
    pub async fn has_member(&self, room_id: &str, member: &GameMember) -> redis::RedisResult<bool> {
        let mut conn = self.conn.clone();
        let pos: Option<i64> = conn
            .lpos(
                key(room_id, "users"),
                member.canonical_json(),
                redis::LposOptions::default(),
            )
            .await?;
        Ok(pos.is_some())
    }

    pub async fn status(&self, room_id: &str) -> redis::RedisResult<Option<GameStatus>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key(room_id, "status")).await?;
        Ok(raw.and_then(|s| s.parse().ok()))
    }

    /// Move a room to a new status, locally and in the cache.
    pub async fn set_status(&self, room: &mut Room, status: GameStatus) -> redis::RedisResult<()> {
        self.set_status_by_id(&room.room_id, status).await?;
        room.status = status;
        Ok(())
    }

    pub async fn set_status_by_id(
        &self,
        room_id: &str,
        status: GameStatus,
    ) -> redis::RedisResult<()> {
        let mut conn = self.conn.clone();
        tracing::info!(room = %room_id, %status, "Setting room status");
        conn.set(key(room_id, "status"), status.to_string()).await
    }

    pub async fn set_owner(&self, room_id: &str, owner: &GameMember) -> redis::RedisResult<()> {
        let mut conn = self.conn.clone();
        conn.set(key(room_id, "owner"), owner.canonical_json()).await
    }

    // Turn bookkeeping. Only the room's game loop writes these keys, apart
    // from the guessed set which the processor adds to.

    pub async fn answer(&self, room_id: &str) -> redis::RedisResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key(room_id, "answer")).await
    }

    pub async fn set_answer(&self, room_id: &str, answer: &str) -> redis::RedisResult<()> {
        let mut conn = self.conn.clone();
        conn.set(key(room_id, "answer"), answer).await
    }

    /// Reset the guessed set to contain only the drawer, so the
    /// everyone-has-guessed predicate counts non-drawers alone.
    pub async fn seed_guessed(&self, room_id: &str, drawer_id: &str) -> redis::RedisResult<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(key(room_id, "guessed"))
            .ignore()
            .sadd(key(room_id, "guessed"), drawer_id)
            .ignore();
        pipe.query_async::<()>(&mut conn).await
    }

    pub async fn mark_guessed(&self, room_id: &str, user_id: &str) -> redis::RedisResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.sadd(key(room_id, "guessed"), user_id).await?;
        Ok(())
    }

    pub async fn has_guessed(&self, room_id: &str, user_id: &str) -> redis::RedisResult<bool> {
        let mut conn = self.conn.clone();
        conn.sismember(key(room_id, "guessed"), user_id).await
    }

    pub async fn guessed_count(&self, room_id: &str) -> redis::RedisResult<usize> {
        let mut conn = self.conn.clone();
        conn.scard(key(room_id, "guessed")).await
    }

    /// Clear per-turn keys; the answer exists only while a turn is live.
    pub async fn clear_turn(&self, room_id: &str) -> redis::RedisResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .del(vec![key(room_id, "answer"), key(room_id, "guessed")])
            .await?;
        Ok(())
    }

    /// Publish an event on the room channel.
    pub async fn publish(&self, room_id: &str, event: &Event) -> redis::RedisResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.publish(channel(room_id), event.to_json()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        assert_eq!(channel("abc"), "room:abc");
        assert_eq!(key("abc", "users"), "room:abc:users");
        assert_eq!(key("abc", "answer"), "room:abc:answer");
        assert_eq!(key("abc", "guessed"), "room:abc:guessed");
    }
}
