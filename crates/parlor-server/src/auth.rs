//! Token verification for the WebSocket upgrade.
//!
//! The core only ever sees identities that passed an [`IdentityVerifier`].

use async_trait::async_trait;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authentication errors. All of them reject the upgrade with 401.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Neither a `token` query parameter nor a bearer header was sent.
    #[error("Missing token")]
    MissingToken,

    /// The token has expired.
    #[error("Token expired")]
    Expired,

    /// The token failed verification.
    #[error("Invalid token: {0}")]
    Invalid(String),

    /// The token verified but names no user.
    #[error("Token has no username")]
    EmptyUsername,

    /// Issuing a token failed.
    #[error("Failed to issue token: {0}")]
    Issue(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
    }
}

/// Turns a bearer token into a verified username.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify a token and return the identity it carries.
    async fn verify(&self, token: &str) -> Result<String, AuthError>;
}

/// JWT claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// HS256 JWT verifier.
#[derive(Clone)]
pub struct JwtVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a verifier for a shared secret.
    #[must_use]
    pub fn new(secret: &str, leeway_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_secs;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Issue a token for `username`, valid for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn issue(&self, username: &str, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            username: username.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Issue(e.to_string()))
    }

    /// Decode and validate a token.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature, algorithm or expiry is wrong.
    pub fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            })
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<String, AuthError> {
        let claims = self.decode(token)?;
        if claims.username.is_empty() {
            return Err(AuthError::EmptyUsername);
        }
        Ok(claims.username)
    }
}

/// Pull the token from `?token=` or an `Authorization: Bearer` header.
///
/// # Errors
///
/// Returns [`AuthError::MissingToken`] if neither is present.
pub fn extract_token(query: Option<&str>, headers: &HeaderMap) -> Result<String, AuthError> {
    if let Some(token) = query.filter(|t| !t.is_empty()) {
        return Ok(token.to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .ok_or(AuthError::MissingToken)
}
