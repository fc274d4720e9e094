//! # Bearer Authentication
//!
//! Order endpoints accept tokens minted by the account service: HS256, issuer
//! `skillhub`, carrying `user_id`, `email` and `role`. Callbacks are not
//! authenticated here; providers prove themselves with signatures instead.

use crate::handlers::{payment_error_to_response, ErrorResponse};
use crate::state::AppState;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use pay_core::{PaymentError, PaymentResult};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

pub const TOKEN_ISSUER: &str = "skillhub";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: String,
    pub exp: usize,
    pub iss: String,
}

pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> PaymentResult<Claims> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "bearer token rejected");
                PaymentError::Unauthorized("invalid or expired token".to_string())
            })
    }
}

/// Authenticated caller, extracted from `Authorization: Bearer <jwt>`
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: String,
}

impl From<Claims> for CurrentUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.user_id,
            email: claims.email,
            role: claims.role,
        }
    }
}

fn bearer_token(parts: &Parts) -> PaymentResult<&str> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| PaymentError::Unauthorized("missing Authorization header".to_string()))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| PaymentError::Unauthorized("expected a Bearer token".to_string()))
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).map_err(payment_error_to_response)?;
        let claims = state.auth.verify(token).map_err(payment_error_to_response)?;
        Ok(claims.into())
    }
}

/// Mint a token the way the account service does; tests only.
#[cfg(test)]
pub(crate) fn issue_token(secret: &str, user_id: Uuid, ttl: chrono::Duration) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = Claims {
        user_id,
        email: "buyer@example.com".to_string(),
        role: "user".to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
        iss: TOKEN_ISSUER.to_string(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_valid_token_round_trips_claims() {
        let user = Uuid::new_v4();
        let token = issue_token("secret", user, Duration::hours(1));

        let claims = JwtVerifier::new("secret").verify(&token).unwrap();
        assert_eq!(claims.user_id, user);
        assert_eq!(claims.iss, TOKEN_ISSUER);
    }

    #[test]
    fn test_wrong_secret_is_unauthorized() {
        let token = issue_token("secret", Uuid::new_v4(), Duration::hours(1));
        let err = JwtVerifier::new("other").verify(&token).unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn test_expired_token_is_unauthorized() {
        let token = issue_token("secret", Uuid::new_v4(), Duration::hours(-2));
        assert!(matches!(
            JwtVerifier::new("secret").verify(&token),
            Err(PaymentError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_bearer_prefix_required() {
        let request = axum::http::Request::builder()
            .header(AUTHORIZATION, "Basic dXNlcjpwYXNz")
            .body(())
            .unwrap();
        let (parts, _) = request.into_parts();
        assert!(bearer_token(&parts).is_err());
    }
}
