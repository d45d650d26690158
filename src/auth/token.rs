// Bearer token decoding
// Only the payload segment is read; signatures are the server's business

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::error::{Result, SessionError};

/// A bearer token together with the expiry decoded from its `exp` claim.
///
/// Token and expiry only ever travel together, so the session can never hold
/// one without the other.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Decode `token` and build an `AccessToken` from its expiry claim
    pub fn parse(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        let expires_at_millis = decode_expiry_millis(&token)?;
        let expires_at = Utc
            .timestamp_millis_opt(expires_at_millis)
            .single()
            .ok_or_else(|| {
                SessionError::MalformedToken(format!("exp out of range: {}", expires_at_millis))
            })?;

        Ok(Self { token, expires_at })
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn expires_at_millis(&self) -> i64 {
        self.expires_at.timestamp_millis()
    }

    /// Expired when `now` is at or past the expiry instant
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Remaining lifetime; negative once expired
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Short prefix of the token for log lines
    pub fn redacted(&self) -> &str {
        redact(&self.token)
    }
}

/// First 8 characters of a token, never the whole credential
pub fn redact(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(8)
        .map(|(idx, _)| idx)
        .unwrap_or(token.len());
    &token[..end]
}

/// Decode the `exp` claim of a `header.payload.signature` token into
/// milliseconds since the epoch
pub fn decode_expiry_millis(token: &str) -> Result<i64> {
    let claims = decode_claims(token)?;

    let exp = claims
        .get("exp")
        .ok_or_else(|| SessionError::MalformedToken("token has no exp claim".to_string()))?;

    // exp is seconds since epoch; some issuers emit it as a float
    if let Some(secs) = exp.as_i64() {
        return secs
            .checked_mul(1000)
            .ok_or_else(|| SessionError::MalformedToken(format!("exp out of range: {}", secs)));
    }
    if let Some(secs) = exp.as_f64() {
        if secs.is_finite() && secs.abs() < (i64::MAX / 1000) as f64 {
            return Ok((secs * 1000.0) as i64);
        }
    }

    Err(SessionError::MalformedToken(format!(
        "exp claim is not a number: {}",
        exp
    )))
}

/// Decode the payload segment into its JSON claims
pub fn decode_claims(token: &str) -> Result<Value> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(SessionError::MalformedToken(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let payload = segments[1];
    if payload.is_empty() {
        return Err(SessionError::MalformedToken(
            "payload segment is empty".to_string(),
        ));
    }

    // Accept padded input and the standard alphabet as well
    let normalized: String = payload
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();

    let bytes = URL_SAFE_NO_PAD
        .decode(normalized.as_bytes())
        .map_err(|e| SessionError::MalformedToken(format!("invalid base64 payload: {}", e)))?;

    let claims: Value = serde_json::from_slice(&bytes)
        .map_err(|e| SessionError::MalformedToken(format!("invalid JSON payload: {}", e)))?;

    if !claims.is_object() {
        return Err(SessionError::MalformedToken(
            "payload is not a JSON object".to_string(),
        ));
    }

    Ok(claims)
}

/// Build an unsigned token carrying `claims`.
///
/// The API never accepts these; they exist for local tooling and tests that
/// need a decodable credential.
pub fn encode_unsigned(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    format!("{}.{}.", header, payload)
}

/// Unsigned token expiring `seconds` from now
pub fn unsigned_expiring_in(seconds: i64, subject: &str) -> String {
    let exp = Utc::now().timestamp() + seconds;
    encode_unsigned(&serde_json::json!({ "sub": subject, "exp": exp }))
}
