//! Session token handling
//!
//! The dashboard signs HS256 tokens whose `sub` is the user id and whose
//! `admin` flag gates the admin endpoints. This service only verifies them;
//! `generate_token` exists for tooling and tests.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::{EconomyError, Result};

/// Payload stored in a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User identifier
    pub sub: String,
    #[serde(default)]
    pub admin: bool,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

#[derive(Clone)]
pub struct JwtValidator {
    secret: String,
    expiry_seconds: u64,
}

impl JwtValidator {
    /// Returns an error if the secret is empty or too short
    pub fn new(secret: String, expiry_seconds: u64) -> Result<Self> {
        if secret.is_empty() {
            return Err(EconomyError::Config(
                "JWT_SECRET is required in production mode".into(),
            ));
        }
        if secret.len() < 32 {
            return Err(EconomyError::Config(
                "JWT_SECRET must be at least 32 characters".into(),
            ));
        }
        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    /// Validator for dev mode (fixed secret)
    pub fn new_dev() -> Self {
        Self {
            secret: "dev-mode-secret-not-for-production-use-123456".into(),
            expiry_seconds: 3600,
        }
    }

    pub fn generate_token(&self, user_id: &str, admin: bool) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| EconomyError::Internal(format!("System time error: {e}")))?
            .as_secs();

        let claims = Claims {
            sub: user_id.to_string(),
            admin,
            iat: now,
            exp: now + self.expiry_seconds,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| EconomyError::Internal(format!("Failed to generate token: {e}")))
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        match decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        ) {
            Ok(data) if data.claims.sub.is_empty() => {
                Err(EconomyError::Unauthorized("Token has no subject".into()))
            }
            Ok(data) => Ok(data.claims),
            Err(err) => {
                use jsonwebtoken::errors::ErrorKind;
                let msg = match err.kind() {
                    ErrorKind::ExpiredSignature => "Token expired",
                    ErrorKind::InvalidToken => "Invalid token",
                    ErrorKind::InvalidSignature => "Invalid signature",
                    _ => "Token validation failed",
                };
                Err(EconomyError::Unauthorized(msg.into()))
            }
        }
    }
}

/// Extract token from an Authorization header value.
/// Supports "Bearer <token>" and raw tokens.
pub fn extract_token_from_header(auth_header: Option<&str>) -> Option<&str> {
    let header = auth_header?;

    if let Some(token) = header.strip_prefix("Bearer ") {
        let token = token.trim();
        if !token.is_empty() {
            return Some(token);
        }
    }

    if !header.contains(' ') {
        let token = header.trim();
        if !token.is_empty() {
            return Some(token);
        }
    }

    None
}

/// Extract a named cookie from a Cookie header value
pub fn extract_cookie<'a>(cookie_header: Option<&'a str>, name: &str) -> Option<&'a str> {
    cookie_header?
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}
