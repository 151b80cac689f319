//! Gateway credential cache.
//!
//! Bearer tokens are short-lived; we cache them with a safety margin so a
//! token is never presented near its expiry. The cache is written through to
//! Redis so scaled-out instances share one credential exchange, with an
//! in-process single-flight lock preventing stampedes inside one instance.
//! Redundant fetches (e.g. two instances racing) are safe, just wasteful.

use crate::cache::{self, keys, RedisPool};
use crate::config::MpesaConfig;
use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::http::GatewayHttpClient;
use crate::payments::types::AuthResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Tokens are treated as expired this many seconds before their actual
/// expiry so an in-flight request never carries a dying token.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

pub struct TokenCache {
    http: GatewayHttpClient,
    consumer_key: String,
    consumer_secret: String,
    auth_url: String,
    redis: Option<RedisPool>,
    // Doubles as the single-flight lock: concurrent callers queue here
    // instead of each running a credential exchange.
    local: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(
        config: &MpesaConfig,
        http: GatewayHttpClient,
        redis: Option<RedisPool>,
    ) -> Self {
        Self {
            http,
            consumer_key: config.consumer_key.clone(),
            consumer_secret: config.consumer_secret.clone(),
            auth_url: format!(
                "{}/oauth/v1/generate?grant_type=client_credentials",
                config.base_url
            ),
            redis,
            local: Mutex::new(None),
        }
    }

    /// Return a bearer token valid for at least the safety margin.
    ///
    /// Never returns a stale token; a failed exchange surfaces as
    /// `GatewayError::Auth`.
    pub async fn get_token(&self) -> GatewayResult<String> {
        let mut guard = self.local.lock().await;

        if let Some(cached) = guard.as_ref() {
            if cached.is_valid() {
                return Ok(cached.token.clone());
            }
        }

        if let Some(cached) = self.read_shared().await {
            if cached.is_valid() {
                let token = cached.token.clone();
                *guard = Some(cached);
                return Ok(token);
            }
        }

        let fresh = self.fetch_token().await?;
        self.write_shared(&fresh).await;
        let token = fresh.token.clone();
        *guard = Some(fresh);
        Ok(token)
    }

    async fn read_shared(&self) -> Option<CachedToken> {
        let pool = self.redis.as_ref()?;
        let raw = cache::get_string(pool, &keys::gateway_token(&self.consumer_key)).await?;
        match serde_json::from_str::<CachedToken>(&raw) {
            Ok(cached) => Some(cached),
            Err(e) => {
                warn!("Discarding unreadable cached gateway token: {}", e);
                None
            }
        }
    }

    async fn write_shared(&self, token: &CachedToken) {
        let pool = match self.redis.as_ref() {
            Some(pool) => pool,
            None => return,
        };
        let ttl = (token.expires_at - Utc::now()).num_seconds();
        if ttl <= 0 {
            return;
        }
        let raw = match serde_json::to_string(token) {
            Ok(raw) => raw,
            Err(_) => return,
        };
        cache::set_string_ex(
            pool,
            &keys::gateway_token(&self.consumer_key),
            &raw,
            ttl as u64,
        )
        .await;
    }

    async fn fetch_token(&self) -> GatewayResult<CachedToken> {
        debug!("Fetching fresh gateway bearer token");
        let response: AuthResponse = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.auth_url,
                None,
                Some((&self.consumer_key, &self.consumer_secret)),
                None,
            )
            .await
            .map_err(|e| GatewayError::Auth {
                message: format!("credential exchange failed: {}", e),
            })?;

        if response.access_token.trim().is_empty() {
            return Err(GatewayError::Auth {
                message: "credential exchange returned an empty token".to_string(),
            });
        }

        let expires_in = parse_expires_in(&response.expires_in);
        let lifetime = expires_in.saturating_sub(EXPIRY_MARGIN_SECS.unsigned_abs());
        if lifetime == 0 {
            return Err(GatewayError::Auth {
                message: format!("token lifetime too short: {}s", expires_in),
            });
        }

        Ok(CachedToken {
            token: response.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(lifetime as i64),
        })
    }
}

/// The sandbox returns `expires_in` as a string, production as a number.
fn parse_expires_in(value: &serde_json::Value) -> u64 {
    match value {
        serde_json::Value::Number(n) => n.as_u64().unwrap_or(3600),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(3600),
        _ => 3600,
    }
}
