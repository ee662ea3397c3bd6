//! Authentication state and request extraction.

use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::warn;
use serde::Deserialize;
use thiserror::Error;

use super::claims::{Claims, Role};
use crate::api::{ApiError, AppState};

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingAuthHeader,

    #[error("invalid authorization header")]
    InvalidAuthHeader,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token has expired")]
    TokenExpired,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("authentication error: {0}")]
    Internal(String),
}

/// A user account available for dev-mode credential login.
#[derive(Debug, Clone, Deserialize)]
pub struct DevUser {
    pub username: String,
    /// bcrypt hash of the password.
    pub password_hash: String,
    pub user_id: String,
    #[serde(default)]
    pub role: Role,
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret. Generated per process when unset.
    pub jwt_secret: Option<String>,
    /// Token lifetime in seconds.
    pub token_ttl_secs: Option<u64>,
    /// Users accepted by `POST /auth/login`.
    #[serde(default)]
    pub dev_users: Vec<DevUser>,
}

const DEFAULT_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

/// Shared authentication state.
#[derive(Clone)]
pub struct AuthState {
    encoding: EncodingKey,
    decoding: DecodingKey,
    token_ttl_secs: u64,
    dev_users: Vec<DevUser>,
}

impl AuthState {
    pub fn new(config: AuthConfig) -> Self {
        let secret = config.jwt_secret.unwrap_or_else(|| {
            warn!("no jwt secret configured, generating an ephemeral one");
            nanoid::nanoid!(64)
        });

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            token_ttl_secs: config.token_ttl_secs.unwrap_or(DEFAULT_TOKEN_TTL_SECS),
            dev_users: config.dev_users,
        }
    }

    /// Issue a token for a user.
    pub fn generate_token(
        &self,
        user_id: &str,
        username: &str,
        role: Role,
    ) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: now + self.token_ttl_secs as i64,
            iat: Some(now),
            name: Some(username.to_string()),
            role: Some(role.to_string()),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(e.to_string()))
    }

    /// Validate a token and return its claims.
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(err.to_string()),
            })
    }

    /// Check dev-mode credentials, returning the matching user.
    pub fn check_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<&DevUser, AuthError> {
        let user = self
            .dev_users
            .iter()
            .find(|u| u.username == username)
            .ok_or(AuthError::InvalidCredentials)?;

        let ok = bcrypt::verify(password, &user.password_hash)
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        if !ok {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(user)
    }
}

/// The authenticated identity of a request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub username: String,
    pub role: Role,
}

/// Extractor resolving the bearer token to a user.
///
/// Rejects with 401 before any handler work happens, so no stream is opened
/// for an unauthenticated request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthUser);

impl CurrentUser {
    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn username(&self) -> &str {
        &self.0.username
    }

    pub fn role(&self) -> Role {
        self.0.role
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or(AuthError::MissingAuthHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;

        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidAuthHeader)?;

        let claims = state.auth.verify_token(token)?;
        Ok(CurrentUser(AuthUser {
            id: claims.sub.clone(),
            username: claims.display_name().to_string(),
            role: claims.effective_role(),
        }))
    }
}
