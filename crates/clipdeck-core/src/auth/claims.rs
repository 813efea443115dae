//! Decoding of the claims carried in the session token.
//!
//! The token is never verified client-side; the claims are only read to
//! decide when to attempt a silent refresh. Anything that cannot be decoded
//! counts as expiring now.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// Claims read from the token payload. Never persisted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Claims {
    /// Subject (username)
    #[serde(default)]
    pub sub: Option<String>,
    /// Expiry (seconds since epoch)
    #[serde(default)]
    pub exp: Option<f64>,
}

impl Claims {
    /// Decode the payload (middle) segment of a JWT-shaped token.
    /// Returns `None` for anything that is not three dot-separated segments
    /// with a base64url JSON object in the middle.
    pub fn decode(token: &str) -> Option<Self> {
        let mut parts = token.split('.');
        let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let exp = self.exp?;
        if !exp.is_finite() {
            return None;
        }
        DateTime::from_timestamp(exp.floor() as i64, 0)
    }
}

/// Remaining lifetime of `token` at `now`, or `None` when it has no readable expiry.
/// Negative once the token has expired.
pub fn time_until_expiry(token: &str, now: DateTime<Utc>) -> Option<Duration> {
    Claims::decode(token)?.expires_at().map(|exp| exp - now)
}

/// Whether the background check should attempt a refresh.
/// True when the remaining lifetime is at or below `threshold`, or unreadable.
pub fn needs_refresh(token: &str, now: DateTime<Utc>, threshold: Duration) -> bool {
    match time_until_expiry(token, now) {
        Some(remaining) => remaining <= threshold,
        None => true,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build an unsigned JWT-shaped token with the given payload JSON
    pub(crate) fn token_with_payload(payload: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload);
        format!("{}.{}.signature", header, body)
    }

    pub(crate) fn token_expiring_at(exp: i64) -> String {
        token_with_payload(&format!(r#"{{"sub":"alice","exp":{}}}"#, exp))
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000, 0).expect("valid timestamp")
    }

    #[test]
    fn test_decode_reads_sub_and_exp() {
        let token = token_expiring_at(1_750_003_600);
        let claims = Claims::decode(&token).expect("claims");
        assert_eq!(claims.sub.as_deref(), Some("alice"));
        assert_eq!(claims.expires_at().map(|t| t.timestamp()), Some(1_750_003_600));
    }

    #[test]
    fn test_padded_payload_is_accepted() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"exp":1750003600}"#);
        let token = format!("h.{}.s", payload);
        assert!(Claims::decode(&token).and_then(|c| c.expires_at()).is_some());
    }

    #[test]
    fn test_far_expiry_does_not_need_refresh() {
        let threshold = Duration::hours(1);
        for secs in [3601, 7200, 86_400, 30 * 86_400] {
            let token = token_expiring_at(now().timestamp() + secs);
            assert!(!needs_refresh(&token, now(), threshold), "exp in {}s", secs);
        }
    }

    #[test]
    fn test_near_expiry_needs_refresh() {
        let threshold = Duration::hours(1);
        for secs in [3600, 3599, 60, 0, -60, -86_400] {
            let token = token_expiring_at(now().timestamp() + secs);
            assert!(needs_refresh(&token, now(), threshold), "exp in {}s", secs);
        }
    }

    #[test]
    fn test_undecodable_tokens_need_refresh() {
        let threshold = Duration::hours(1);
        let cases = [
            String::new(),
            "opaque-token".to_string(),
            "a.b".to_string(),
            "a.b.c.d".to_string(),
            "a.!!!not-base64!!!.c".to_string(),
            token_with_payload("not json"),
            token_with_payload(r#"{"sub":"alice"}"#),
            token_with_payload(r#"{"exp":"tomorrow"}"#),
        ];
        for token in cases {
            assert!(needs_refresh(&token, now(), threshold), "token {:?}", token);
            assert!(time_until_expiry(&token, now()).is_none());
        }
    }

    #[test]
    fn test_time_until_expiry_is_negative_after_expiry() {
        let token = token_expiring_at(now().timestamp() - 120);
        let remaining = time_until_expiry(&token, now()).expect("remaining");
        assert_eq!(remaining.num_seconds(), -120);
    }
}
