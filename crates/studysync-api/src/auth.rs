use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use studysync_core::util::user_fingerprint;

use crate::config::AppConfig;
use crate::error::AppError;

pub const MAX_OWNER_LEN: usize = 128;

const SESSION_CLAIMS: [&str; 3] = ["session_id", "sid", "jti"];

/// The queue a request acts on, resolved from the bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOwner {
    pub owner: String,
    pub session: Option<String>,
}

impl QueueOwner {
    pub fn fingerprint(&self) -> u64 {
        user_fingerprint(&self.owner)
    }
}

/// Maps HS256 access tokens onto queue owners.
///
/// The owner is read from a configurable claim (`sub` unless
/// `STUDYSYNC_JWT_OWNER_CLAIM` names another one). String and integer
/// claim values are accepted; integers are rendered in decimal.
#[derive(Clone)]
pub struct OwnerTokenVerifier {
    key: DecodingKey,
    validation: Validation,
    owner_claim: String,
    audience: Option<String>,
    clock_skew: std::time::Duration,
}

impl OwnerTokenVerifier {
    pub fn from_config(config: &AppConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = config.auth_clock_skew.as_secs();
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "iat"]);
        if let Some(issuer) = config.jwt_issuer.as_deref() {
            validation.set_issuer(&[issuer]);
        }

        Self {
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            owner_claim: config.jwt_owner_claim.clone(),
            audience: config.jwt_audience.clone(),
            clock_skew: config.auth_clock_skew,
        }
    }

    pub fn resolve_owner(&self, token: &str) -> Result<QueueOwner, AppError> {
        let claims = decode::<Map<String, Value>>(token, &self.key, &self.validation)
            .map_err(|error| {
                AppError::unauthorized(format!("Token validation failed: {}", sanitize(&error)))
            })?
            .claims;

        if let Some(expected) = self.audience.as_deref() {
            if !audience_matches(claims.get("aud"), expected) {
                return Err(AppError::unauthorized("Token audience is not allowed"));
            }
        }
        check_token_window(&claims, self.clock_skew, chrono::Utc::now().timestamp())?;

        let owner = owner_from_claim(claims.get(&self.owner_claim)).ok_or_else(|| {
            AppError::unauthorized(format!(
                "Token `{}` claim does not name a queue owner",
                self.owner_claim
            ))
        })?;

        Ok(QueueOwner {
            owner,
            session: session_from_claims(&claims),
        })
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let Some((scheme, token)) = header.split_once(' ') else {
        return Err(AppError::unauthorized(
            "Authorization header must be `Bearer <token>`",
        ));
    };
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }

    match token.trim() {
        "" => Err(AppError::unauthorized("Bearer token is empty")),
        token => Ok(token),
    }
}

/// Normalize a claim value into a queue owner id.
///
/// Owner ids partition every table, so blank values, control characters and
/// values over `MAX_OWNER_LEN` bytes are refused rather than truncated.
fn owner_from_claim(value: Option<&Value>) -> Option<String> {
    let raw = match value? {
        Value::String(value) => value.trim().to_string(),
        Value::Number(number) if number.is_i64() || number.is_u64() => number.to_string(),
        _ => return None,
    };

    let usable = !raw.is_empty()
        && raw.len() <= MAX_OWNER_LEN
        && !raw.chars().any(char::is_control);
    usable.then_some(raw)
}

fn session_from_claims(claims: &Map<String, Value>) -> Option<String> {
    SESSION_CLAIMS
        .iter()
        .filter_map(|name| claims.get(*name).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn check_token_window(
    claims: &Map<String, Value>,
    clock_skew: std::time::Duration,
    now: i64,
) -> Result<(), AppError> {
    let skew = i64::try_from(clock_skew.as_secs()).unwrap_or(0);
    let timestamp = |name: &str| claims.get(name).and_then(Value::as_i64);

    let Some(exp) = timestamp("exp") else {
        return Err(AppError::unauthorized("Token missing `exp` claim"));
    };
    if exp <= now.saturating_sub(skew) {
        return Err(AppError::unauthorized("Token is expired"));
    }

    let Some(iat) = timestamp("iat") else {
        return Err(AppError::unauthorized("Token missing `iat` claim"));
    };
    if iat > now.saturating_add(skew) {
        return Err(AppError::unauthorized("Token `iat` is in the future"));
    }

    match timestamp("nbf") {
        Some(nbf) if nbf > now.saturating_add(skew) => {
            Err(AppError::unauthorized("Token is not yet valid"))
        }
        _ => Ok(()),
    }
}

fn audience_matches(aud: Option<&Value>, expected: &str) -> bool {
    match aud {
        Some(Value::String(value)) => value == expected,
        Some(Value::Array(values)) => values.iter().any(|value| value.as_str() == Some(expected)),
        _ => false,
    }
}

fn sanitize(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}
