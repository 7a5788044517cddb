//! Bearer token handling on the client side.
//!
//! Tokens are decoded without signature verification. The resulting claims
//! only drive refresh timing and display hints; they must never be used to
//! grant or deny anything, which stays with the API.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const NAME_IDENTIFIER_CLAIM: &str =
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier";

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token(<redacted, {} bytes>)", self.0.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("token has {0} segment(s), expected at least 2")]
    MissingSegments(usize),
    #[error("payload segment is not valid base64: {0}")]
    Base64(String),
    #[error("payload is not valid JSON: {0}")]
    Json(String),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("claim '{0}' is missing or malformed")]
    MissingClaim(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Claims(serde_json::Map<String, serde_json::Value>);

impl Claims {
    pub fn from_map(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.get(name)
    }

    /// `exp` in seconds since the epoch. Accepts integral or fractional JSON
    /// numbers; anything else is treated as absent.
    pub fn exp(&self) -> Option<i64> {
        let value = self.0.get("exp")?;
        value
            .as_i64()
            .or_else(|| value.as_f64().filter(|v| v.is_finite()).map(|v| v as i64))
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp()
            .and_then(|seconds| DateTime::<Utc>::from_timestamp(seconds, 0))
    }

    /// The caller's user id, normalized to an integer whether the issuer
    /// wrote it as a number or as a numeric string.
    pub fn user_id(&self) -> Option<i64> {
        [NAME_IDENTIFIER_CLAIM, "sub"]
            .iter()
            .filter_map(|name| self.0.get(*name))
            .find_map(normalize_id)
    }
}

pub fn normalize_id(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(number) => number.as_i64(),
        serde_json::Value::String(raw) => raw.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub fn decode(token: &Token) -> Result<Claims, DecodeError> {
    let segments = token.as_str().split('.').collect::<Vec<_>>();
    if segments.len() < 2 {
        return Err(DecodeError::MissingSegments(segments.len()));
    }

    let payload = segments[1];
    let bytes = URL_SAFE_LENIENT
        .decode(payload)
        .or_else(|_| STANDARD_LENIENT.decode(payload))
        .map_err(|error| DecodeError::Base64(error.to_string()))?;

    let value = serde_json::from_slice::<serde_json::Value>(&bytes)
        .map_err(|error| DecodeError::Json(error.to_string()))?;
    match value {
        serde_json::Value::Object(map) => Ok(Claims(map)),
        _ => Err(DecodeError::NotAnObject),
    }
}

/// Undecodable tokens and tokens without a numeric `exp` count as expiring.
pub fn is_expiring_soon(token: &Token, horizon: Duration, now: DateTime<Utc>) -> bool {
    let Ok(claims) = decode(token) else {
        return true;
    };
    let Some(exp) = claims.exp() else {
        return true;
    };
    let remaining_ms = exp.saturating_mul(1000).saturating_sub(now.timestamp_millis());
    remaining_ms < horizon.num_milliseconds()
}


#[cfg(test)]
mod tests {
    use super::test_tokens::*;
    use super::*;
    use proptest::prelude::*;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T09:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    #[test]
    fn decode_reads_claims_from_middle_segment() {
        let token = with_payload(&serde_json::json!({ "exp": 1_800_000_000, "role": "owner" }));
        let claims = decode(&token).expect("decode");
        assert_eq!(claims.exp(), Some(1_800_000_000));
        assert_eq!(claims.get("role"), Some(&serde_json::json!("owner")));
    }

    #[test]
    fn decode_accepts_standard_alphabet_with_padding() {
        let body = base64::engine::general_purpose::STANDARD.encode(r#"{"exp":1}"#);
        let token = Token::new(format!("h.{body}.s"));
        assert_eq!(decode(&token).expect("decode").exp(), Some(1));
    }

    #[test]
    fn decode_rejects_single_segment() {
        let result = decode(&Token::new("not-a-jwt"));
        assert_eq!(result, Err(DecodeError::MissingSegments(1)));
    }

    #[test]
    fn decode_rejects_non_base64_payload() {
        let result = decode(&Token::new("aaa.!!!***.bbb"));
        assert!(matches!(result, Err(DecodeError::Base64(_))));
    }

    #[test]
    fn decode_rejects_non_json_payload() {
        let body = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode("plain text");
        let result = decode(&Token::new(format!("h.{body}.s")));
        assert!(matches!(result, Err(DecodeError::Json(_))));
    }

    #[test]
    fn decode_rejects_non_object_payload() {
        let body = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode("[1,2]");
        let result = decode(&Token::new(format!("h.{body}.s")));
        assert_eq!(result, Err(DecodeError::NotAnObject));
    }

    #[test]
    fn user_id_is_normalized_from_string_or_number() {
        let from_string =
            decode(&with_payload(&serde_json::json!({ NAME_IDENTIFIER_CLAIM: "17" }))).expect("decode");
        let from_number =
            decode(&with_payload(&serde_json::json!({ NAME_IDENTIFIER_CLAIM: 17 }))).expect("decode");
        let from_sub = decode(&with_payload(&serde_json::json!({ "sub": " 17 " }))).expect("decode");
        assert_eq!(from_string.user_id(), Some(17));
        assert_eq!(from_number.user_id(), Some(17));
        assert_eq!(from_sub.user_id(), Some(17));
    }

    #[test]
    fn missing_exp_counts_as_expiring() {
        let token = with_payload(&serde_json::json!({ "sub": "1" }));
        assert!(is_expiring_soon(&token, Duration::minutes(5), fixed_now()));
    }

    #[test]
    fn debug_output_does_not_leak_token() {
        let token = Token::new("secret.value.here");
        assert!(!format!("{token:?}").contains("secret"));
    }

    proptest! {
        #[test]
        fn expiring_soon_matches_exp_arithmetic(
            offset_seconds in -86_400i64..86_400i64,
            horizon_seconds in 0i64..7_200i64
        ) {
            let now = fixed_now();
            let exp = now.timestamp() + offset_seconds;
            let token = expiring_at(exp);
            let expected = exp * 1000 - now.timestamp_millis() < horizon_seconds * 1000;
            prop_assert_eq!(
                is_expiring_soon(&token, Duration::seconds(horizon_seconds), now),
                expected
            );
        }

        #[test]
        fn malformed_tokens_fail_decode_and_count_as_expired(
            raw in prop_oneof![
                "[A-Za-z0-9_\\-]{0,40}",
                "[A-Za-z0-9]{1,10}\\.[!@#$%^&*()]{1,10}(\\.[A-Za-z0-9]{0,10})?",
            ]
        ) {
            let token = Token::new(raw);
            prop_assert!(decode(&token).is_err());
            prop_assert!(is_expiring_soon(&token, Duration::minutes(5), fixed_now()));
        }
    }
}
