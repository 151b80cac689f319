//! Redis-backed shared cache.
//!
//! The only cached datum is the gateway bearer token, shared so horizontally
//! scaled instances do not each run their own credential exchange. Redis
//! being down degrades to per-process fetches; it is never required for
//! correctness.

pub mod error;
pub mod keys;

use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::CacheConfig;
use error::CacheError;

/// Redis connection pool type alias
pub type RedisPool = Pool<RedisConnectionManager>;

/// Initialize the Redis connection pool
pub async fn init_cache_pool(config: &CacheConfig) -> Result<RedisPool, CacheError> {
    let redis_url = config
        .redis_url
        .as_deref()
        .ok_or_else(|| CacheError::Configuration("REDIS_URL not set".to_string()))?;

    info!(
        max_connections = config.max_connections,
        "Initializing Redis cache pool"
    );

    let client = Client::open(redis_url).map_err(|e| {
        error!("Failed to create Redis client: {}", e);
        CacheError::Connection(e.to_string())
    })?;

    let manager = RedisConnectionManager::new(client.get_connection_info().clone()).map_err(|e| {
        error!("Failed to create Redis connection manager: {}", e);
        CacheError::Connection(e.to_string())
    })?;

    let pool = Pool::builder()
        .max_size(config.max_connections)
        .connection_timeout(Duration::from_secs(5))
        .build(manager)
        .await
        .map_err(|e| {
            error!("Failed to build Redis connection pool: {}", e);
            CacheError::Connection(e.to_string())
        })?;

    if let Err(e) = health_check(&pool).await {
        // Degrade instead of failing startup; callers fall back to direct fetches.
        warn!("Initial Redis connection test failed, continuing: {}", e);
    }

    Ok(pool)
}

/// Health check for the Redis connection pool
pub async fn health_check(pool: &RedisPool) -> Result<(), CacheError> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| CacheError::Connection(e.to_string()))?;

    let _: String = redis::cmd("PING")
        .query_async(&mut *conn)
        .await
        .map_err(|e| CacheError::Connection(e.to_string()))?;

    Ok(())
}

/// Fetch a string value, treating any Redis failure as a miss.
pub async fn get_string(pool: &RedisPool, key: &str) -> Option<String> {
    let mut conn = match pool.get().await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(key = %key, "Redis unavailable on read: {}", e);
            return None;
        }
    };
    match conn.get::<_, Option<String>>(key).await {
        Ok(value) => value,
        Err(e) => {
            warn!(key = %key, "Redis read failed: {}", e);
            None
        }
    }
}

/// Store a string value with a TTL; failures are logged and swallowed.
pub async fn set_string_ex(pool: &RedisPool, key: &str, value: &str, ttl_secs: u64) {
    let mut conn = match pool.get().await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(key = %key, "Redis unavailable on write: {}", e);
            return;
        }
    };
    if let Err(e) = conn.set_ex::<_, _, ()>(key, value, ttl_secs).await {
        warn!(key = %key, "Redis write failed: {}", e);
    }
}
