//! Authentication for economy endpoints
//!
//! Provides:
//! - Session token validation (HS256 JWT)
//! - Caller identity from the Authorization header or `session` cookie
//! - `X-User-Id` passthrough in dev mode

pub mod jwt;

use hyper::header::{AUTHORIZATION, COOKIE};
use hyper::HeaderMap;

use crate::types::{EconomyError, Result};

pub use jwt::{extract_cookie, extract_token_from_header, Claims, JwtValidator};

pub const SESSION_COOKIE: &str = "session";
pub const DEV_USER_HEADER: &str = "x-user-id";

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub admin: bool,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            admin: claims.admin,
        }
    }
}

/// Resolves the caller of a request
#[derive(Clone)]
pub struct Authenticator {
    validator: JwtValidator,
    dev_mode: bool,
}

impl Authenticator {
    pub fn new(validator: JwtValidator, dev_mode: bool) -> Self {
        Self {
            validator,
            dev_mode,
        }
    }

    pub fn validator(&self) -> &JwtValidator {
        &self.validator
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Identity> {
        let auth_header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        let cookie_header = headers.get(COOKIE).and_then(|v| v.to_str().ok());

        let token = extract_token_from_header(auth_header)
            .or_else(|| extract_cookie(cookie_header, SESSION_COOKIE));

        if let Some(token) = token {
            return self.validator.verify_token(token).map(Identity::from);
        }

        if self.dev_mode {
            if let Some(user_id) = headers
                .get(DEV_USER_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
            {
                return Ok(Identity {
                    user_id: user_id.to_string(),
                    admin: true,
                });
            }
        }

        Err(EconomyError::Unauthorized("No token provided".into()))
    }

    pub fn require_admin(&self, headers: &HeaderMap) -> Result<Identity> {
        let identity = self.authenticate(headers)?;
        if !identity.admin {
            return Err(EconomyError::Forbidden("Admin permission required".into()));
        }
        Ok(identity)
    }
}
