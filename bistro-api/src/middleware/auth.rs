use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::{AppState, AuthConfig};

pub const STAFF_ROLES: [&str; 2] = ["STAFF", "ADMIN"];

const MAX_TOKEN_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StaffClaims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

impl StaffClaims {
    pub fn is_staff(&self) -> bool {
        STAFF_ROLES.contains(&self.role.as_str())
    }
}

/// Signs an HS256 token for `sub` valid for `expiration_seconds`.
pub fn issue_token(
    secret: &str,
    sub: &str,
    role: &str,
    expiration_seconds: u64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let ttl = Duration::seconds(expiration_seconds.min(MAX_TOKEN_TTL_SECONDS) as i64);
    let exp = Utc::now() + ttl;
    let claims = StaffClaims {
        sub: sub.to_owned(),
        role: role.to_owned(),
        exp: exp.timestamp().max(0) as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
}

// ============================================================================
// Staff Authentication Middleware
// ============================================================================

/// Checks the bearer token on `headers` for a staff role. Returns `None`
/// when the gate is off.
pub fn authorize_staff(auth: &AuthConfig, headers: &HeaderMap) -> Result<Option<StaffClaims>, AppError> {
    if !auth.is_enabled() {
        return Ok(None);
    }

    // 1. Extract token from Authorization header
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::AuthenticationError("Missing bearer token".to_string()))?;

    // 2. Decode and validate JWT
    let token_data = decode::<StaffClaims>(
        token,
        &DecodingKey::from_secret(auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        tracing::debug!("Rejected staff token: {}", e);
        AppError::AuthenticationError("Invalid or expired token".to_string())
    })?;

    // 3. Check role
    if !token_data.claims.is_staff() {
        return Err(AppError::AuthorizationError("Staff role required".to_string()));
    }

    Ok(Some(token_data.claims))
}

pub async fn staff_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(claims) = authorize_staff(&state.auth, req.headers())? {
        req.extensions_mut().insert(claims);
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issued_token_round_trips() {
        let token = issue_token("secret", "staff-7", "STAFF", 60).unwrap();
        let data = decode::<StaffClaims>(
            &token,
            &DecodingKey::from_secret(b"secret"),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(data.claims.sub, "staff-7");
        assert!(data.claims.is_staff());
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
        headers
    }

    #[test]
    fn test_authorize_staff() {
        let auth = AuthConfig {
            secret: "secret".to_string(),
        };

        let staff = issue_token("secret", "staff-7", "ADMIN", 60).unwrap();
        let claims = authorize_staff(&auth, &bearer(&staff)).unwrap().unwrap();
        assert_eq!(claims.sub, "staff-7");

        let forged = issue_token("other", "staff-7", "STAFF", 60).unwrap();
        assert!(matches!(
            authorize_staff(&auth, &bearer(&forged)),
            Err(AppError::AuthenticationError(_))
        ));

        let guest = issue_token("secret", "guest", "CUSTOMER", 60).unwrap();
        assert!(matches!(
            authorize_staff(&auth, &bearer(&guest)),
            Err(AppError::AuthorizationError(_))
        ));
        assert!(matches!(
            authorize_staff(&auth, &HeaderMap::new()),
            Err(AppError::AuthenticationError(_))
        ));
    }

    #[test]
    fn test_open_gate_needs_no_token() {
        let auth = AuthConfig {
            secret: String::new(),
        };
        assert!(authorize_staff(&auth, &HeaderMap::new()).unwrap().is_none());
    }

    #[test]
    fn test_customer_role_is_not_staff() {
        let claims = StaffClaims {
            sub: "guest".to_string(),
            role: "CUSTOMER".to_string(),
            exp: 0,
        };
        assert!(!claims.is_staff());
    }
}
