//! Server-side carry of a weather payload between two requests.
//!
//! The browser only ever holds `"{id}.{signature}"`; the payload itself stays
//! in memory until its TTL runs out.

use std::{
    collections::HashMap,
    fmt,
    time::{Duration, Instant},
};

use anyhow::anyhow;
use axum::http::{HeaderMap, header};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::Sha256;
use uuid::Uuid;
use weather_core::WeatherSnapshot;

pub const COOKIE_NAME: &str = "weather_session";

type HmacSha256 = Hmac<Sha256>;

struct Entry {
    snapshot: WeatherSnapshot,
    expires_at: Instant,
}

pub struct SessionStore {
    mac: HmacSha256,
    ttl: Duration,
    entries: Mutex<HashMap<Uuid, Entry>>,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(secret: &str, ttl: Duration) -> anyhow::Result<Self> {
        if secret.is_empty() {
            return Err(anyhow!("Session secret must not be empty.\nHint: set SECRET_KEY."));
        }
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| anyhow!("invalid session secret: {e}"))?;

        Ok(Self {
            mac,
            ttl,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Store `snapshot` under a fresh id and return the signed token for it.
    pub fn insert(&self, snapshot: WeatherSnapshot) -> String {
        let id = Uuid::new_v4();
        let now = Instant::now();

        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            id,
            Entry {
                snapshot,
                expires_at: now + self.ttl,
            },
        );
        drop(entries);

        format!("{}.{}", id.simple(), hex::encode(self.sign(&id)))
    }

    /// The payload behind `token`, if the signature holds and it has not expired.
    ///
    /// Reading does not consume the entry; a reload within the TTL renders again.
    pub fn get(&self, token: &str) -> Option<WeatherSnapshot> {
        let id = self.verify(token)?;

        let mut entries = self.entries.lock();
        let expired = entries.get(&id)?.expires_at <= Instant::now();
        if expired {
            entries.remove(&id);
            tracing::debug!(session = %id.simple(), "session expired");
            return None;
        }
        entries.get(&id).map(|entry| entry.snapshot.clone())
    }

    /// `Set-Cookie` value carrying `token`.
    pub fn cookie(&self, token: &str) -> String {
        format!(
            "{COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.ttl.as_secs()
        )
    }

    fn sign(&self, id: &Uuid) -> Vec<u8> {
        self.mac
            .clone()
            .chain_update(id.as_bytes())
            .finalize()
            .into_bytes()
            .to_vec()
    }

    fn verify(&self, token: &str) -> Option<Uuid> {
        let (id, signature) = token.split_once('.')?;
        let id = Uuid::try_parse(id).ok()?;
        let signature = hex::decode(signature).ok()?;

        match self.mac.clone().chain_update(id.as_bytes()).verify_slice(&signature) {
            Ok(()) => Some(id),
            Err(_) => {
                tracing::warn!(session = %id.simple(), "rejected session token with bad signature");
                None
            }
        }
    }
}

/// Session token from the request's `Cookie` headers.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == COOKIE_NAME)
        .map(|(_, token)| token.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn snapshot() -> WeatherSnapshot {
        WeatherSnapshot::from_value(json!({ "name": "Lisbon" }))
    }

    fn store() -> SessionStore {
        SessionStore::new("test-secret", Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn insert_then_get_returns_the_payload() {
        let store = store();
        let token = store.insert(snapshot());

        assert_eq!(store.get(&token), Some(snapshot()));
        // Still there on a second read.
        assert_eq!(store.get(&token), Some(snapshot()));
    }

    #[test]
    fn tampered_token_is_rejected() {
        let store = store();
        let token = store.insert(snapshot());
        let (id, sig) = token.split_once('.').unwrap();

        let mut forged = sig.to_string();
        let last = if forged.ends_with('0') { "1" } else { "0" };
        forged.replace_range(forged.len() - 1.., last);

        assert_eq!(store.get(&format!("{id}.{forged}")), None);
        assert_eq!(store.get(id), None);
        assert_eq!(store.get("not-a-token"), None);
    }

    #[test]
    fn token_from_another_secret_is_rejected() {
        let other = SessionStore::new("other-secret", Duration::from_secs(60)).unwrap();
        let token = other.insert(snapshot());
        assert_eq!(store().get(&token), None);
    }

    #[test]
    fn expired_entry_is_missing() {
        let store = SessionStore::new("test-secret", Duration::ZERO).unwrap();
        let token = store.insert(snapshot());
        assert_eq!(store.get(&token), None);
    }

    #[test]
    fn empty_secret_is_refused() {
        assert!(SessionStore::new("", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn cookie_carries_token_and_attributes() {
        let cookie = store().cookie("abc.def");
        assert!(cookie.starts_with("weather_session=abc.def;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=60"));
    }

    #[test]
    fn token_is_found_among_other_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; weather_session=abc.def; lang=en"),
        );
        assert_eq!(token_from_headers(&headers).as_deref(), Some("abc.def"));

        assert_eq!(token_from_headers(&HeaderMap::new()), None);
    }
}
