//! Unverified reading of bearer token claims.
//!
//! Nothing in this module checks a signature. Claims read here only drive local
//! decisions (is the stored token visibly expired, when to renew it). The API
//! validates the token on every protected call.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::errors::DecodeError;

/// Claims payload of a token, as the server wrote it.
///
/// Only `exp` matters to the session logic. Fields of an unexpected type are
/// read as absent rather than failing the decode.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Claims {
    #[serde(default, deserialize_with = "lenient_string")]
    pub sub: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: Option<String>,
    /// Issued at, epoch seconds.
    #[serde(default, deserialize_with = "lenient_epoch")]
    pub iat: Option<i64>,
    /// Expiry, epoch seconds.
    #[serde(default, deserialize_with = "lenient_epoch")]
    pub exp: Option<i64>,
    /// Every other claim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// See [`is_expired`].
    pub fn is_expired_at(&self, now: i64) -> bool {
        is_expired(self, now)
    }
}

/// Reads the claims segment of `header.claims.signature` without verifying it.
///
/// Decoded by hand rather than through a JWT library so that any header `alg` and a
/// malformed `exp` are tolerated instead of rejecting the whole token.
pub fn decode_unverified(token: &str) -> Result<Claims, DecodeError> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(DecodeError::Malformed);
    };

    let payload = payload.trim_end_matches('=');
    let bytes = match URL_SAFE_NO_PAD.decode(payload) {
        Ok(bytes) => bytes,
        Err(err) => STANDARD_NO_PAD.decode(payload).map_err(|_| err)?,
    };

    Ok(serde_json::from_slice(&bytes)?)
}

/// True iff the token carries a numeric expiry that is at or before `now`.
///
/// A missing expiry is not proof of expiry; callers decide what to do with it.
pub fn is_expired(claims: &Claims, now: i64) -> bool {
    claims.exp.is_some_and(|exp| exp <= now)
}

/// How long to wait before renewing a token, leaving `max(remaining * ratio, min_margin)`
/// of its lifetime unused. `None` when there is no expiry or it has already passed.
pub fn refresh_delay(
    claims: &Claims,
    now: i64,
    margin_ratio: f64,
    min_margin: Duration,
) -> Option<Duration> {
    let remaining = claims.exp?.checked_sub(now)?;
    if remaining <= 0 {
        return None;
    }

    let remaining = Duration::from_secs(remaining.unsigned_abs());
    // NaN would slip through `clamp` and panic in `mul_f64`.
    let ratio = if margin_ratio.is_finite() {
        margin_ratio.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let margin = remaining.mul_f64(ratio).max(min_margin);
    Some(remaining.saturating_sub(margin))
}

/// Current time in epoch seconds.
pub fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_epoch<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| {
        v.as_i64()
            // Rounding up keeps `exp <= now` exact for fractional expiries.
            .or_else(|| v.as_f64().filter(|f| f.is_finite()).map(|f| f.ceil() as i64))
    }))
}
