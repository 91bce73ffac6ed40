//! Pooled Redis connection access.
//!
//! Mirrors the teacher's own `RedisPool` wrapper around `bb8`/`bb8-redis`: a thin
//! facade offering pipeline execution, single-query execution, and raw connection
//! checkout, so callers never touch `bb8::Pool` directly. Dropped from the teacher's
//! version: the SQL-query-result caching layer (`RedisCache`, `CachedQuery`) and
//! anything coupled to its ORM — out of scope here, this pool only carries records and
//! index data for this engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bb8::{ManageConnection, Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use redis::aio::MultiplexedConnection;
use redis::{FromRedisValue, Pipeline, RedisError};

use crate::config::PoolConfig;
use crate::error::Result;
use crate::scripts::ScriptLibrary;

/// A pooled connection plus a per-instance broken flag. `bb8_redis`'s own
/// `RedisConnectionManager::has_broken` always answers "no", so marking a connection
/// unusable after a transport error has to happen here instead — see
/// [`TrackingManager`] and [`TrackedConnection::mark_broken`].
pub struct TrackedConnection {
    inner: MultiplexedConnection,
    broken: Arc<AtomicBool>,
}

impl TrackedConnection {
    /// The underlying connection, for passing to `query_async`.
    pub fn conn_mut(&mut self) -> &mut MultiplexedConnection {
        &mut self.inner
    }

    /// Mark this connection unusable. `bb8` checks this just before deciding whether
    /// to recycle a returned connection, so a transaction that saw a transport error
    /// on this connection can ensure it's closed rather than handed to the next caller.
    pub fn mark_broken(&self) {
        self.broken.store(true, Ordering::Relaxed);
    }
}

/// Wraps [`RedisConnectionManager`] to carry [`TrackedConnection`]'s broken flag
/// through bb8's `has_broken` hook.
#[derive(Clone)]
pub struct TrackingManager {
    inner: RedisConnectionManager,
}

impl ManageConnection for TrackingManager {
    type Connection = TrackedConnection;
    type Error = RedisError;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let inner = self.inner.connect().await?;
        Ok(TrackedConnection {
            inner,
            broken: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> std::result::Result<(), Self::Error> {
        self.inner.is_valid(&mut conn.inner).await
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.broken.load(Ordering::Relaxed)
    }
}

/// A managed pool of Redis connections, plus the loaded script library every
/// transaction and query needs to invoke server-side scripts by SHA1.
pub struct RedisPool {
    pool: Pool<TrackingManager>,
    scripts: ScriptLibrary,
}

impl RedisPool {
    /// Connect using the given configuration and load the script library.
    ///
    /// `max_active` is the hard ceiling on live connections; `0` means unbounded, per
    /// the design's own documented default. `bb8` has no separate "cap idle
    /// connections below the ceiling" concept, so `max_idle` isn't consulted here —
    /// it is never used to shrink `max_active`, nor the other way around.
    pub async fn new(config: &PoolConfig) -> Result<Self> {
        let manager = TrackingManager {
            inner: RedisConnectionManager::new(config.connection_url())?,
        };
        let max_size = if config.max_active > 0 {
            config.max_active
        } else {
            u32::MAX
        };
        let pool = Pool::builder()
            .max_size(max_size)
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .build(manager)
            .await?;

        let scripts = {
            let mut conn = pool.get().await?;
            ScriptLibrary::load(conn.conn_mut()).await?
        };

        Ok(RedisPool { pool, scripts })
    }

    pub fn scripts(&self) -> &ScriptLibrary {
        &self.scripts
    }

    /// Construct and run a pipeline using the provided closure.
    pub async fn pipe<T, R>(&self, func: T) -> Result<R>
    where
        for<'a> T: FnOnce(&'a mut Pipeline) -> &'a mut Pipeline,
        R: FromRedisValue,
    {
        let mut pipe = redis::pipe();
        let pipe = func(&mut pipe);
        let mut conn = self.pool.get().await?;
        let res: R = pipe.query_async(conn.conn_mut()).await?;
        Ok(res)
    }

    /// Run a single Redis command built by the closure against a checked-out
    /// connection.
    pub async fn sq<T, R>(&self, func: T) -> Result<R>
    where
        T: for<'b> FnOnce(
            &'b mut PooledConnection<'_, TrackingManager>,
        ) -> redis::RedisFuture<'b, R>,
        R: FromRedisValue,
    {
        let mut conn = self.pool.get().await?;
        Ok(func(&mut conn).await?)
    }

    /// Check out a pooled connection for exclusive use by one [`crate::transaction::Transaction`].
    pub async fn conn(&self) -> Result<PooledConnection<'_, TrackingManager>> {
        Ok(self.pool.get().await?)
    }
}

impl Clone for RedisPool {
    fn clone(&self) -> Self {
        RedisPool {
            pool: self.pool.clone(),
            scripts: self.scripts.clone(),
        }
    }
}
