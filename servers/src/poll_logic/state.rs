use lib_polls::error::StoreError;
use lib_polls::{BroadcastHub, IdentityProvider, MemoryPollStore, Poll, PollStore, VoteEngine};
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "postgres")]
use lib_polls::store::PgPollStore;

/// The store chosen at startup.
pub enum ServerStore {
    Memory(MemoryPollStore),
    #[cfg(feature = "postgres")]
    Postgres(PgPollStore),
}

impl ServerStore {
    pub fn backend_name(&self) -> &'static str {
        match self {
            ServerStore::Memory(_) => "memory",
            #[cfg(feature = "postgres")]
            ServerStore::Postgres(_) => "postgres",
        }
    }

    /// Checks that the backend answers.
    pub async fn ping(&self) -> Result<(), StoreError> {
        match self {
            ServerStore::Memory(_) => Ok(()),
            #[cfg(feature = "postgres")]
            ServerStore::Postgres(s) => s.ping().await,
        }
    }
}

impl PollStore for ServerStore {
    async fn get(&self, id: &str) -> Result<Poll, StoreError> {
        match self {
            ServerStore::Memory(s) => s.get(id).await,
            #[cfg(feature = "postgres")]
            ServerStore::Postgres(s) => s.get(id).await,
        }
    }

    async fn list(&self) -> Result<Vec<Poll>, StoreError> {
        match self {
            ServerStore::Memory(s) => s.list().await,
            #[cfg(feature = "postgres")]
            ServerStore::Postgres(s) => s.list().await,
        }
    }

    async fn insert(&self, poll: Poll) -> Result<(), StoreError> {
        match self {
            ServerStore::Memory(s) => s.insert(poll).await,
            #[cfg(feature = "postgres")]
            ServerStore::Postgres(s) => s.insert(poll).await,
        }
    }

    async fn save(&self, poll: Poll) -> Result<(), StoreError> {
        match self {
            ServerStore::Memory(s) => s.save(poll).await,
            #[cfg(feature = "postgres")]
            ServerStore::Postgres(s) => s.save(poll).await,
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        match self {
            ServerStore::Memory(s) => s.delete(id).await,
            #[cfg(feature = "postgres")]
            ServerStore::Postgres(s) => s.delete(id).await,
        }
    }
}

pub type Engine = VoteEngine<ServerStore>;

#[derive(Clone)]
pub struct AppState {
    // Vote engine shared by every request handler
    pub engine: Arc<Engine>,
    // Verifies bearer tokens
    pub identity: Arc<dyn IdentityProvider>,
    // Fan-out of committed snapshots to WebSocket clients
    pub hub: BroadcastHub,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(engine: Engine, identity: Arc<dyn IdentityProvider>) -> Self {
        let hub = engine.hub().clone();
        Self {
            engine: Arc::new(engine),
            identity,
            hub,
            started_at: Instant::now(),
        }
    }
}
