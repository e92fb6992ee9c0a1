use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;

use crate::common::UserId;

pub const TOKEN_ENV_VAR: &str = "WHISKER_JWT";

/// Source of the bearer credential. Called once per connection attempt and
/// once per history request; implementations need not cache.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Option<String>;
}

/// Fixed token, handy for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Reads the token from an environment variable at call time.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
    lookup: fn(&str) -> Option<String>,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self::with_lookup(var, |name| std::env::var(name).ok())
    }

    fn with_lookup(var: impl Into<String>, lookup: fn(&str) -> Option<String>) -> Self {
        Self {
            var: var.into(),
            lookup,
        }
    }
}

impl Default for EnvToken {
    fn default() -> Self {
        Self::new(TOKEN_ENV_VAR)
    }
}

#[async_trait]
impl TokenProvider for EnvToken {
    async fn bearer_token(&self) -> Option<String> {
        (self.lookup)(&self.var).filter(|token| !token.trim().is_empty())
    }
}

/// User id carried in a JWT payload: numeric `id`, then numeric `userId`,
/// then `sub` (number or numeric string). The signature is not checked.
pub fn user_id_from_jwt(token: &str) -> Option<UserId> {
    let payload = match decode_payload(token) {
        Some(payload) => payload,
        None => {
            log::error!("Failed to decode JWT payload");
            return None;
        }
    };

    payload
        .get("id")
        .and_then(Value::as_i64)
        .or_else(|| payload.get("userId").and_then(Value::as_i64))
        .or_else(|| match payload.get("sub")? {
            Value::Number(number) => number.as_i64(),
            Value::String(raw) => raw.trim().parse().ok(),
            _ => None,
        })
}

fn decode_payload(token: &str) -> Option<Value> {
    let segment = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(segment.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}
