//! Host port registry
//!
//! Every project container binds two host ports, one from the frontend range
//! and one from the backend range. Reservations live in a shared key-value
//! store under `port:<range>:<port>` so several backend instances never hand
//! out the same port. Each key carries a 24h expiry so a crash between
//! allocation and release cannot leak a port forever.

use crate::{CoreError, Result};
use async_trait::async_trait;
use devforge_config::{PortsConfig, StoreConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Expiry applied to every reservation
pub const RESERVATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Named port span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortRange {
    Frontend,
    Backend,
}

impl PortRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Frontend => "frontend",
            Self::Backend => "backend",
        }
    }

    /// Store key holding the reservation for `port`
    pub fn key(&self, port: u16) -> String {
        format!("port:{}:{}", self.as_str(), port)
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set-if-absent key store with per-key expiry
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Create `key` with the given expiry unless it already exists.
    /// Returns true if this call created it.
    async fn try_reserve(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key`. Missing keys are not an error.
    async fn release(&self, key: &str) -> Result<()>;
}

/// Redis-backed store shared by all backend instances
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        use redis::IntoConnectionInfo;

        let mut info = config
            .url
            .as_str()
            .into_connection_info()
            .map_err(|e| CoreError::StoreUnavailable(format!("{}: {}", config.url, e)))?;
        if let Some(password) = &config.password {
            info.redis.password = Some(password.clone());
        }

        let client = redis::Client::open(info)
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| CoreError::StoreUnavailable(format!("{}: {}", config.url, e)))?;

        tracing::debug!("Connected to reservation store at {}", config.url);
        Ok(Self { conn })
    }
}

#[async_trait]
impl ReservationStore for RedisStore {
    async fn try_reserve(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        // SET NX EX claims and expires in one round trip
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))?;
        Ok(reply.is_some())
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }
}

/// Process-local store for single-instance deployments and tests
#[derive(Default)]
pub struct MemoryStore {
    keys: Mutex<HashMap<String, Instant>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys
    pub fn live_keys(&self) -> usize {
        let now = Instant::now();
        match self.keys.lock() {
            Ok(keys) => keys.values().filter(|exp| **exp > now).count(),
            Err(_) => 0,
        }
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn try_reserve(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| CoreError::StoreUnavailable("memory store poisoned".into()))?;
        match keys.get(key) {
            Some(expires) if *expires > now => Ok(false),
            _ => {
                keys.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| CoreError::StoreUnavailable("memory store poisoned".into()))?;
        keys.remove(key);
        Ok(())
    }
}

/// Open the store selected by `config.url`
pub async fn connect_store(config: &StoreConfig) -> Result<Arc<dyn ReservationStore>> {
    if config.is_memory() {
        tracing::debug!("Using process-local port reservations");
        return Ok(Arc::new(MemoryStore::new()));
    }
    Ok(Arc::new(RedisStore::connect(config).await?))
}

/// Allocates host ports from the frontend and backend ranges
pub struct PortRegistry {
    store: Arc<dyn ReservationStore>,
    frontend: (u16, u16),
    backend: (u16, u16),
    ttl: Duration,
}

impl PortRegistry {
    pub fn new(store: Arc<dyn ReservationStore>, config: &PortsConfig) -> Result<Self> {
        Ok(Self::with_bounds(
            store,
            config.frontend.bounds()?,
            config.backend.bounds()?,
        ))
    }

    pub fn with_bounds(
        store: Arc<dyn ReservationStore>,
        frontend: (u16, u16),
        backend: (u16, u16),
    ) -> Self {
        Self {
            store,
            frontend,
            backend,
            ttl: RESERVATION_TTL,
        }
    }

    /// Override the reservation expiry
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Inclusive bounds of `range`
    pub fn bounds(&self, range: PortRange) -> (u16, u16) {
        match range {
            PortRange::Frontend => self.frontend,
            PortRange::Backend => self.backend,
        }
    }

    /// Reserve the lowest free port in `range`
    pub async fn acquire(&self, range: PortRange) -> Result<u16> {
        let (start, end) = self.bounds(range);
        for port in start..=end {
            if self.store.try_reserve(&range.key(port), self.ttl).await? {
                tracing::debug!("Reserved {} port {}", range, port);
                return Ok(port);
            }
        }
        Err(CoreError::PortsExhausted {
            range: range.to_string(),
            start,
            end,
        })
    }

    /// Drop the reservation for `port`. Releasing a free port is a no-op.
    pub async fn release(&self, range: PortRange, port: u16) -> Result<()> {
        self.store.release(&range.key(port)).await?;
        tracing::debug!("Released {} port {}", range, port);
        Ok(())
    }
}
