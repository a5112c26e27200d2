//! Signed login tokens.
//!
//! A token is `hex(cbor(claims)).hex(hmac_sha256(secret, cbor(claims)))`.
//! Claims carry the account, the app and an absolute expiry in unix seconds.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Secret used when none is configured. Development only.
pub const DEFAULT_SECRET: &str = "relaygate-dev-secret";

/// Token failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Not two hex segments, or claims do not decode
    #[error("malformed token")]
    Malformed,

    /// Signature does not match the claims
    #[error("invalid token signature")]
    InvalidSignature,

    /// Expiry is in the past
    #[error("token expired")]
    Expired,

    /// Claims could not be encoded
    #[error("encode token: {0}")]
    Encode(String),
}

/// Token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Account signing in
    pub account: String,
    /// Tenant app
    pub app: String,
    /// Expiry, unix seconds
    pub exp: i64,
}

impl Token {
    /// Claims valid for `ttl` from now.
    pub fn new(account: impl Into<String>, app: impl Into<String>, ttl: Duration) -> Self {
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        Self { account: account.into(), app: app.into(), exp: unix_now().saturating_add(ttl) }
    }
}

fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs() as i64)
}

fn mac(secret: &str) -> Result<HmacSha256, TokenError> {
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| TokenError::Encode(e.to_string()))
}

/// Sign `token` with `secret`.
pub fn generate(secret: &str, token: &Token) -> Result<String, TokenError> {
    let mut claims = Vec::new();
    ciborium::into_writer(token, &mut claims).map_err(|e| TokenError::Encode(e.to_string()))?;
    let mut mac = mac(secret)?;
    mac.update(&claims);
    let signature = mac.finalize().into_bytes();
    Ok(format!("{}.{}", hex::encode(&claims), hex::encode(signature)))
}

/// Verify and decode a token against the current time.
pub fn parse(secret: &str, token: &str) -> Result<Token, TokenError> {
    parse_at(secret, token, unix_now())
}

/// Verify and decode a token, treating `now` as the current unix time.
pub fn parse_at(secret: &str, token: &str, now: i64) -> Result<Token, TokenError> {
    let (claims, signature) = token.split_once('.').ok_or(TokenError::Malformed)?;
    let claims = hex::decode(claims).map_err(|_| TokenError::Malformed)?;
    let signature = hex::decode(signature).map_err(|_| TokenError::Malformed)?;

    let mut mac = mac(secret)?;
    mac.update(&claims);
    mac.verify_slice(&signature).map_err(|_| TokenError::InvalidSignature)?;

    let token: Token = ciborium::from_reader(claims.as_slice()).map_err(|_| TokenError::Malformed)?;
    if token.exp <= now {
        return Err(TokenError::Expired);
    }
    Ok(token)
}
