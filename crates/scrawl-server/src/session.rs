use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use crate::config::ServerConfig;

/// An opaque bearer token bound to a user identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub user_id: Uuid,
}

/// URL-safe token over 16 random bytes.
fn generate_token() -> String {
    URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes())
}

fn session_key(token: &str) -> String {
    format!("session:{token}")
}

/// Session storage backend, chosen once at startup.
pub enum SessionStore {
    Memory(InMemorySessions),
    Redis(RedisSessions),
}

impl SessionStore {
    pub fn from_config(config: &ServerConfig, conn: ConnectionManager) -> Self {
        if config.use_redis_sessions {
            let ttl = Duration::from_secs(config.sessions.ttl_secs);
            tracing::info!(ttl_secs = ttl.as_secs(), "Using cache-backed sessions");
            Self::Redis(RedisSessions { conn, ttl })
        } else {
            tracing::warn!(
                "Using in-memory sessions - these do NOT expire. \
                 Set USE_REDIS_SESSIONS=true to store sessions in the cache"
            );
            Self::Memory(InMemorySessions::default())
        }
    }

    /// Look up a token. An unknown token is `None`, not an error.
    pub async fn get(&self, token: &str) -> redis::RedisResult<Option<Session>> {
        match self {
            Self::Memory(store) => Ok(store.get(token)),
            Self::Redis(store) => store.get(token).await,
        }
    }

    /// Open a session for a user, generating and persisting a fresh token.
    pub async fn create(&self, user_id: Uuid) -> redis::RedisResult<Session> {
        match self {
            Self::Memory(store) => Ok(store.create(user_id)),
            Self::Redis(store) => store.create(user_id).await,
        }
    }

    /// Drop a session. Deleting an unknown token is logged, not an error.
    pub async fn delete(&self, token: &str) -> redis::RedisResult<()> {
        match self {
            Self::Memory(store) => {
                store.delete(token);
                Ok(())
            },
            Self::Redis(store) => store.delete(token).await,
        }
    }
}

/// Process-local sessions without expiry.
#[derive(Default)]
pub struct InMemorySessions {
    sessions: Mutex<HashMap<String, Session>>,
}

impl InMemorySessions {
    fn get(&self, token: &str) -> Option<Session> {
        self.sessions.lock().unwrap().get(token).cloned()
    }

    fn create(&self, user_id: Uuid) -> Session {
        let session = Session {
            id: generate_token(),
            user_id,
        };
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session.clone());
        session
    }

    fn delete(&self, token: &str) {
        if self.sessions.lock().unwrap().remove(token).is_none() {
            tracing::warn!("Session does not exist, so it cannot be deleted");
        }
    }
}

/// Sessions stored under `session:{token}` with a TTL. The value is the raw
/// user UUID bytes.
pub struct RedisSessions {
    conn: ConnectionManager,
    ttl: Duration,
}

impl RedisSessions {
    async fn get(&self, token: &str) -> redis::RedisResult<Option<Session>> {
        let mut conn = self.conn.clone();
        let data: Option<Vec<u8>> = conn.get(session_key(token)).await?;
        let Some(bytes) = data else {
            return Ok(None);
        };
        let Ok(user_id) = Uuid::from_slice(&bytes) else {
            tracing::error!("Session value is not a valid UUID; treating as missing");
            return Ok(None);
        };
        Ok(Some(Session {
            id: token.to_string(),
            user_id,
        }))
    }

    async fn create(&self, user_id: Uuid) -> redis::RedisResult<Session> {
        let session = Session {
            id: generate_token(),
            user_id,
        };
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(
                session_key(&session.id),
                user_id.as_bytes().to_vec(),
                self.ttl.as_secs(),
            )
            .await?;
        tracing::info!(ttl_secs = self.ttl.as_secs(), "Created session");
        Ok(session)
    }

    async fn delete(&self, token: &str) -> redis::RedisResult<()> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(session_key(token)).await?;
        if removed == 0 {
            tracing::warn!("Session does not exist, so it cannot be deleted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_url_safe_base64_of_16_bytes() {
        let token = generate_token();
        let bytes = URL_SAFE_NO_PAD.decode(&token).unwrap();
        assert_eq!(bytes.len(), 16);
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
        assert!(!token.contains('='));
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = InMemorySessions::default();
        let user_id = Uuid::new_v4();
        let session = store.create(user_id);
        let fetched = store.get(&session.id).unwrap();
        assert_eq!(fetched.user_id, user_id);
        assert_eq!(fetched.id, session.id);
    }

    #[test]
    fn memory_store_unknown_token_is_none() {
        let store = InMemorySessions::default();
        assert!(store.get("no-such-token").is_none());
    }

    #[test]
    fn memory_store_delete_removes_session() {
        let store = InMemorySessions::default();
        let session = store.create(Uuid::new_v4());
        store.delete(&session.id);
        assert!(store.get(&session.id).is_none());
        // double delete is a logged no-op
        store.delete(&session.id);
    }

    #[tokio::test]
    async fn variant_dispatch_for_memory_backend() {
        let store = SessionStore::Memory(InMemorySessions::default());
        let user_id = Uuid::new_v4();
        let session = store.create(user_id).await.unwrap();
        let fetched = store.get(&session.id).await.unwrap().unwrap();
        assert_eq!(fetched.user_id, user_id);
        store.delete(&session.id).await.unwrap();
        assert!(store.get(&session.id).await.unwrap().is_none());
    }
}
