use crate::config::AuthSettings;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
    RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;
use usertest_ledger::UserId;

/// JWT claims issued by the identity provider.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub exp: u64,
    pub iat: u64,
}

/// HS256 verification settings, shared with handlers through a request extension.
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_expiry: Duration,
}

impl AuthConfig {
    pub fn new(jwt_secret: impl Into<String>, token_expiry: Duration) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            token_expiry,
        }
    }

    pub fn from_settings(settings: &AuthSettings) -> Self {
        let jwt_secret = if settings.jwt_secret.is_empty() {
            warn!("No JWT secret configured, generated a random one; issued tokens die with the process");
            use rand::Rng;
            let secret: [u8; 32] = rand::thread_rng().gen();
            hex::encode(secret)
        } else {
            settings.jwt_secret.clone()
        };
        Self::new(jwt_secret, Duration::from_secs(settings.token_expiry_secs))
    }

    pub fn create_token(&self, user_id: &str) -> Result<String, AuthError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| AuthError::InternalError)?
            .as_secs();

        let claims = Claims {
            sub: user_id.to_string(),
            exp: now + self.token_expiry.as_secs(),
            iat: now,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_ref()),
        )
        .map_err(|_| AuthError::TokenCreation)
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_ref()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|_| AuthError::InvalidToken)?;

        if claims.sub.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }
}

#[derive(Debug)]
pub enum AuthError {
    InvalidToken,
    MissingToken,
    TokenCreation,
    InternalError,
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid authentication token"),
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "Missing authentication token"),
            AuthError::TokenCreation => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create token")
            }
            AuthError::InternalError => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
        };

        (status, Json(AuthErrorBody { error: message })).into_response()
    }
}

/// The caller, taken from the bearer token's `sub`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_config = parts
            .extensions
            .get::<AuthConfig>()
            .ok_or(AuthError::InternalError)?
            .clone();

        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AuthError::MissingToken)?;

        let claims = auth_config.validate_token(bearer.token())?;
        Ok(AuthUser {
            user_id: UserId::new(claims.sub),
        })
    }
}
