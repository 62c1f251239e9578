use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRef, FromRequestParts, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::Json;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::ApiError;
use crate::router::AppState;

pub mod user;

use user::{StoreError, User};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(Box<jsonwebtoken::errors::Error>),
    #[error("failed to sign token: {0}")]
    Signing(Box<jsonwebtoken::errors::Error>),
    #[error("token subject is not a user id")]
    InvalidSubject,
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::Invalid(Box::new(e)),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Expired => ApiError::TokenExpired,
            AuthError::Invalid(_) | AuthError::InvalidSubject => ApiError::InvalidToken,
            AuthError::Signing(e) => ApiError::Internal(anyhow::Error::new(*e)),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.into())
    }
}

/// Claims of the tokens this service hands out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub jti: String,
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signs and checks our HS256 tokens. Issuer and audience are both the
/// configured issuer name.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    validity: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, issuer: &str, validity_days: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_owned(),
            validity: Duration::days(validity_days),
        }
    }

    pub fn issue(&self, user_id: Uuid) -> Result<String, AuthError> {
        self.issue_at(user_id, OffsetDateTime::now_utc())
    }

    pub fn issue_at(&self, user_id: Uuid, now: OffsetDateTime) -> Result<String, AuthError> {
        let claims = Claims {
            jti: Uuid::new_v4().to_string(),
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            aud: self.issuer.clone(),
            iat: now.unix_timestamp(),
            exp: (now + self.validity).unix_timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(Box::new(e)))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.issuer]);
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

/// Who an identity provider says the caller is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderIdentity {
    pub subject: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub locale: Option<String>,
}

/// Checks a token issued by an external identity provider.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<ProviderIdentity, AuthError>;
}

#[derive(Debug, Deserialize)]
struct ProviderClaims {
    sub: String,
    name: Option<String>,
    email: Option<String>,
    locale: Option<String>,
}

/// Verifies provider tokens signed with a secret shared with the provider.
pub struct SharedSecretVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl SharedSecretVerifier {
    pub fn new(secret: &str) -> Self {
        // audience is not checked unless set
        let validation = Validation::new(Algorithm::HS256);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }
}

#[async_trait]
impl IdentityVerifier for SharedSecretVerifier {
    async fn verify(&self, token: &str) -> Result<ProviderIdentity, AuthError> {
        let data = decode::<ProviderClaims>(token, &self.key, &self.validation)?;
        let ProviderClaims {
            sub,
            name,
            email,
            locale,
        } = data.claims;
        Ok(ProviderIdentity {
            subject: sub,
            name,
            email,
            locale,
        })
    }
}

/// The caller of a request carrying a valid `Authorization: Bearer` token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub claims: Claims,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<TokenIssuer>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(ApiError::MissingCredentials)?;

        let issuer = Arc::<TokenIssuer>::from_ref(state);
        let claims = issuer.verify(token).map_err(|e| {
            debug!("rejected bearer token: {}", e);
            ApiError::from(e)
        })?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidSubject)?;

        Ok(AuthenticatedUser { user_id, claims })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub auth_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub auth_token: String,
}

/// Exchanges an identity provider token for one of ours, creating the user
/// on first login.
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<TokenRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(request) =
        payload.map_err(|rejection| ApiError::bad_request("invalid_request", rejection.body_text()))?;
    if request.auth_token.trim().is_empty() {
        return Err(ApiError::bad_request(
            "invalid_request",
            "authToken must not be empty",
        ));
    }

    let identity = state
        .identity
        .verify(&request.auth_token)
        .await
        .map_err(|e| {
            warn!("identity provider token rejected: {}", e);
            ApiError::bad_request("invalid_auth_token", "identity token could not be verified")
        })?;

    let now = OffsetDateTime::now_utc();
    let user = match state.users.get_by_provider_id(&identity.subject).await? {
        Some(user) => state.users.touch_last_seen(user.id, now).await?,
        None => {
            let user = state.users.create(User::from_identity(&identity, now)).await?;
            info!(user_id = %user.id, "created user on first login");
            user
        }
    };

    let auth_token = state.tokens.issue(user.id)?;
    Ok(Json(TokenResponse { auth_token }))
}

/// The user behind the bearer token.
pub async fn current_user(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
) -> Result<Json<User>, ApiError> {
    state
        .users
        .get(caller.user_id)
        .await?
        .map(Json)
        .ok_or(ApiError::UserNotFound)
}
