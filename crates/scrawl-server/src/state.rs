use std::path::Path;
use std::sync::Arc;

use sqlx::PgPool;
use tokio_util::task::TaskTracker;

use crate::config::ServerConfig;
use crate::db;
use crate::error::StartupError;
use crate::game_loop::WordList;
use crate::rooms::RoomStore;
use crate::session::SessionStore;

/// Shared application state, cloned into every handler. Connections are
/// passed in explicitly rather than reached for ambiently, so tests can
/// assemble their own.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// Dedicated client for opening pub/sub connections.
    pub redis_client: redis::Client,
    pub rooms: RoomStore,
    pub sessions: Arc<SessionStore>,
    pub words: Arc<WordList>,
    pub config: Arc<ServerConfig>,
    /// Registry of spawned relays and game loops. Tasks are held here until
    /// completion so the runtime cannot reclaim them early.
    pub tasks: TaskTracker,
}

impl AppState {
    /// Connect to Postgres and Redis and assemble the shared state.
    pub async fn connect(config: ServerConfig) -> Result<Self, StartupError> {
        let db = PgPool::connect(&config.database_url).await?;
        db::init(&db).await?;

        let redis_client = redis::Client::open(config.redis_url.as_str())?;
        let conn = redis_client.get_connection_manager().await?;

        let words = Arc::new(WordList::load(Path::new(&config.words_path))?);
        let sessions = Arc::new(SessionStore::from_config(&config, conn.clone()));
        let rooms = RoomStore::new(conn);

        Ok(Self {
            db,
            redis_client,
            rooms,
            sessions,
            words,
            config: Arc::new(config),
            tasks: TaskTracker::new(),
        })
    }
}
