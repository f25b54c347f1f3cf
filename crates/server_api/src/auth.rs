use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{OfficeId, Role, UserId, Viewer},
    error::{ApiError, ErrorCode},
};

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub ttl_seconds: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
    iat: i64,
    role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    office_id: Option<i64>,
}

pub fn mint_viewer_token(
    cfg: &AuthConfig,
    viewer: &Viewer,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let exp = now + Duration::seconds(cfg.ttl_seconds);
    let claims = Claims {
        sub: format!("user:{}", viewer.user_id.0),
        iat: now.timestamp(),
        exp: exp.timestamp(),
        role: viewer.role,
        office_id: viewer.office_id.map(|id| id.0),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(cfg.jwt_secret.as_bytes()),
    )
}

/// Turns a bearer token into the viewer every operation is evaluated for.
pub fn viewer_from_token(cfg: &AuthConfig, token: &str) -> Result<Viewer, ApiError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(cfg.jwt_secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| ApiError::new(ErrorCode::Unauthorized, format!("invalid token: {e}")))?;

    let claims = data.claims;
    let user_id = claims
        .sub
        .strip_prefix("user:")
        .and_then(|id| id.parse::<i64>().ok())
        .map(UserId)
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "invalid token subject"))?;

    Ok(Viewer {
        user_id,
        role: claims.role,
        office_id: claims.office_id.map(OfficeId),
    })
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
