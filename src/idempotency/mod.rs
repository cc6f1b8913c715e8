//! Request-fingerprint → cached response, fail-closed on store outage
//! (spec §4.1 "Idempotency"), grounded on the original `idempotency.py`.

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    /// No record for this key yet; caller should proceed and call `store`.
    Fresh,
    /// A `:pending` marker is present — a concurrent duplicate is mid-flight
    /// (spec §11 supplement #5).
    Pending,
    /// A terminal response is cached; return it unchanged.
    Cached(String),
}

/// Canonical (sorted-keys) JSON SHA-256 fingerprint (spec §4.1).
pub fn fingerprint(body: &serde_json::Value) -> String {
    let canonical = canonicalize(body);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", serde_json::to_string(k).unwrap(), canonicalize(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

pub struct IdempotencyRecord {
    pub fingerprint: String,
    pub response: String,
}

#[async_trait::async_trait]
pub trait IdempotencyBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>>;
    async fn get_pending(&self, key: &str) -> Result<bool>;
    async fn mark_pending(&self, key: &str, fingerprint: &str, pending_ttl: Duration) -> Result<()>;
    async fn store(&self, key: &str, record: &IdempotencyRecord, ttl: Duration) -> Result<()>;
}

/// Redis-backed idempotency store, grounded on
/// `ratelimit::daily::RedisDailyQuotaStore`'s key/TTL conventions. A cached
/// record is stored as `fingerprint\x00response`; the `:pending` marker is a
/// sibling key with its own short TTL (spec §6 key-value layout).
pub struct RedisIdempotencyBackend {
    client: redis::Client,
}

impl RedisIdempotencyBackend {
    pub fn new(redis_url: &str) -> Result<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }

    fn pending_key(key: &str) -> String {
        format!("{key}:pending")
    }
}

#[async_trait::async_trait]
impl IdempotencyBackend for RedisIdempotencyBackend {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        use redis::AsyncCommands;
        let mut conn = self.client.get_async_connection().await?;
        let raw: Option<String> = conn.get(key).await?;
        Ok(raw.and_then(|raw| {
            let (fingerprint, response) = raw.split_once('\0')?;
            Some(IdempotencyRecord {
                fingerprint: fingerprint.to_string(),
                response: response.to_string(),
            })
        }))
    }

    async fn get_pending(&self, key: &str) -> Result<bool> {
        use redis::AsyncCommands;
        let mut conn = self.client.get_async_connection().await?;
        let exists: bool = conn.exists(Self::pending_key(key)).await?;
        Ok(exists)
    }

    async fn mark_pending(&self, key: &str, fingerprint: &str, pending_ttl: Duration) -> Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.client.get_async_connection().await?;
        let _: () = conn
            .set_ex(Self::pending_key(key), fingerprint, pending_ttl.as_secs() as usize)
            .await?;
        Ok(())
    }

    async fn store(&self, key: &str, record: &IdempotencyRecord, ttl: Duration) -> Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.client.get_async_connection().await?;
        let raw = format!("{}\0{}", record.fingerprint, record.response);
        let _: () = conn.set_ex(key, raw, ttl.as_secs() as usize).await?;
        let _: () = conn.del(Self::pending_key(key)).await?;
        Ok(())
    }
}

/// Process-local fallback for development setups with no Redis configured.
/// Never expires entries (dev-only; a real deployment always sets REDIS_URL).
#[derive(Default)]
pub struct InMemoryIdempotencyBackend {
    records: parking_lot::Mutex<std::collections::HashMap<String, String>>,
    pending: parking_lot::Mutex<std::collections::HashSet<String>>,
}

#[async_trait::async_trait]
impl IdempotencyBackend for InMemoryIdempotencyBackend {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        Ok(self.records.lock().get(key).and_then(|raw| {
            let (fingerprint, response) = raw.split_once('\0')?;
            Some(IdempotencyRecord {
                fingerprint: fingerprint.to_string(),
                response: response.to_string(),
            })
        }))
    }

    async fn get_pending(&self, key: &str) -> Result<bool> {
        Ok(self.pending.lock().contains(key))
    }

    async fn mark_pending(&self, key: &str, _fingerprint: &str, _pending_ttl: Duration) -> Result<()> {
        self.pending.lock().insert(key.to_string());
        Ok(())
    }

    async fn store(&self, key: &str, record: &IdempotencyRecord, _ttl: Duration) -> Result<()> {
        self.records
            .lock()
            .insert(key.to_string(), format!("{}\0{}", record.fingerprint, record.response));
        self.pending.lock().remove(key);
        Ok(())
    }
}

/// `fail_closed` mirrors the original's `IDEMPOTENCY_FAIL_CLOSED` env-var
/// default of `true` (spec §4.1: "Store outages fail closed").
pub struct IdempotencyStore {
    backend: std::sync::Arc<dyn IdempotencyBackend>,
    ttl: Duration,
    fail_closed: bool,
}

#[derive(Debug)]
pub enum Outcome {
    Proceed,
    ReturnCached(String),
    Conflict,
    Unavailable,
}

impl IdempotencyStore {
    pub fn new(backend: std::sync::Arc<dyn IdempotencyBackend>, ttl: Duration, fail_closed: bool) -> Self {
        Self {
            backend,
            ttl,
            fail_closed,
        }
    }

    fn redis_key(user_id: &str, key: &str) -> String {
        format!("idempotency:user:{user_id}:key:{key}")
    }

    pub async fn check(&self, user_id: &str, key: &str, body: &serde_json::Value) -> Outcome {
        let redis_key = Self::redis_key(user_id, key);
        let body_fingerprint = fingerprint(body);

        match self.backend.get(&redis_key).await {
            Ok(Some(record)) => {
                if record.fingerprint == body_fingerprint {
                    Outcome::ReturnCached(record.response)
                } else {
                    Outcome::Conflict
                }
            }
            Ok(None) => match self.backend.get_pending(&redis_key).await {
                Ok(true) => Outcome::Unavailable,
                Ok(false) => {
                    if self
                        .backend
                        .mark_pending(&redis_key, &body_fingerprint, Duration::from_secs(300))
                        .await
                        .is_err()
                        && self.fail_closed
                    {
                        return Outcome::Unavailable;
                    }
                    Outcome::Proceed
                }
                Err(_) if self.fail_closed => Outcome::Unavailable,
                Err(_) => Outcome::Proceed,
            },
            Err(_) if self.fail_closed => Outcome::Unavailable,
            Err(_) => Outcome::Proceed,
        }
    }

    pub async fn store<T: Serialize>(
        &self,
        user_id: &str,
        key: &str,
        body: &serde_json::Value,
        response: &T,
    ) -> Result<()> {
        let redis_key = Self::redis_key(user_id, key);
        let record = IdempotencyRecord {
            fingerprint: fingerprint(body),
            response: serde_json::to_string(response).context("failed to serialize cached response")?,
        };
        self.backend.store(&redis_key, &record, self.ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_is_independent_of_key_order() {
        let a = json!({"quantity": 10, "symbol": "RELIANCE"});
        let b = json!({"symbol": "RELIANCE", "quantity": 10});
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_differs_on_value_change() {
        let a = json!({"quantity": 10});
        let b = json!({"quantity": 11});
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
