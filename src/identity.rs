//! Bridge to the external identity provider.
//!
//! The provider owns credentials and sessions. Locally we only verify its
//! access tokens and mirror each account into `users` the first time we see it.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::IdentityConfig;
use crate::entities::user;
use crate::error::ApiError;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Email already exists")]
    AlreadyRegistered,
    #[error("Identity provider error: {0}")]
    Provider(String),
    #[error("Identity provider unreachable: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::InvalidToken
            | IdentityError::TokenExpired
            | IdentityError::InvalidCredentials => ApiError::Unauthenticated(err.to_string()),
            IdentityError::AlreadyRegistered => ApiError::Conflict(err.to_string()),
            IdentityError::Provider(_) | IdentityError::Http(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

/// An account as the identity provider reports it.
#[derive(Clone, Debug, PartialEq)]
pub struct IdentityUser {
    pub id: Uuid,
    pub email: String,
    pub email_confirmed: bool,
}

#[derive(Clone, Debug)]
pub struct IdentitySession {
    pub access_token: String,
    pub user: IdentityUser,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolves a bearer token to the account that owns it.
    async fn get_user(&self, token: &str) -> Result<IdentityUser, IdentityError>;

    async fn sign_in(&self, email: &str, password: &str)
        -> Result<IdentitySession, IdentityError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<IdentityUser, IdentityError>;
}

/// Supabase-style provider: HS256 access tokens verified locally, password
/// flows over the provider's REST API.
pub struct SupabaseIdentity {
    client: reqwest::Client,
    url: String,
    api_key: SecretString,
    jwt_secret: SecretString,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: usize,
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default)]
    pub email_verified: bool,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct ProviderUser {
    id: Uuid,
    email: String,
    #[serde(default)]
    email_confirmed_at: Option<String>,
}

impl From<ProviderUser> for IdentityUser {
    fn from(user: ProviderUser) -> Self {
        IdentityUser {
            id: user.id,
            email: user.email,
            email_confirmed: user.email_confirmed_at.is_some(),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    user: ProviderUser,
}

impl SupabaseIdentity {
    pub fn new(config: &IdentityConfig) -> Result<Self, IdentityError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            jwt_secret: config.jwt_secret.clone(),
        })
    }

    fn decode_claims(&self, token: &str) -> Result<AccessClaims, IdentityError> {
        decode_access_token(token, self.jwt_secret.expose_secret())
    }
}

pub fn decode_access_token(token: &str, secret: &str) -> Result<AccessClaims, IdentityError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    decode::<AccessClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|err| match err.kind() {
        ErrorKind::ExpiredSignature => IdentityError::TokenExpired,
        _ => IdentityError::InvalidToken,
    })
}

#[async_trait]
impl IdentityProvider for SupabaseIdentity {
    async fn get_user(&self, token: &str) -> Result<IdentityUser, IdentityError> {
        let claims = self.decode_claims(token)?;
        let email = claims.email.ok_or(IdentityError::InvalidToken)?;

        Ok(IdentityUser {
            id: claims.sub,
            email,
            email_confirmed: claims.user_metadata.email_verified,
        })
    }

    #[instrument(skip(self, password))]
    async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<IdentitySession, IdentityError> {
        let response = self
            .client
            .post(format!("{}/auth/v1/token?grant_type=password", self.url))
            .header("apikey", self.api_key.expose_secret())
            .json(&Credentials { email, password })
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED
        {
            return Err(IdentityError::InvalidCredentials);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(IdentityError::Provider(format!("HTTP {status}: {text}")));
        }

        let body: TokenResponse = response.json().await?;
        Ok(IdentitySession {
            access_token: body.access_token,
            user: body.user.into(),
        })
    }

    #[instrument(skip(self, password))]
    async fn sign_up(&self, email: &str, password: &str) -> Result<IdentityUser, IdentityError> {
        let response = self
            .client
            .post(format!("{}/auth/v1/signup", self.url))
            .header("apikey", self.api_key.expose_secret())
            .json(&Credentials { email, password })
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            let message = body["msg"]
                .as_str()
                .or_else(|| body["error_description"].as_str())
                .or_else(|| body["message"].as_str())
                .unwrap_or("Registration failed")
                .to_owned();
            if message.to_lowercase().contains("already") {
                return Err(IdentityError::AlreadyRegistered);
            }
            return Err(IdentityError::Provider(message));
        }

        // Depending on email-confirmation settings the user is either the
        // root object or nested under `user`.
        let user = match body.get("user") {
            Some(user) if user.is_object() => user.clone(),
            _ => body,
        };
        let user: ProviderUser = serde_json::from_value(user)
            .map_err(|err| IdentityError::Provider(format!("Unexpected sign-up response: {err}")))?;

        Ok(user.into())
    }
}

/// Returns the local user for a provider account, creating it on first sight.
pub async fn ensure_user<C: ConnectionTrait>(
    db: &C,
    identity: &IdentityUser,
    name: Option<String>,
) -> Result<user::Model, ApiError> {
    if let Some(existing) = user::Entity::find_by_id(identity.id).one(db).await? {
        return Ok(existing);
    }

    let email_taken = user::Entity::find()
        .filter(user::Column::Email.eq(identity.email.as_str()))
        .one(db)
        .await?
        .is_some();
    if email_taken {
        return Err(ApiError::Conflict(format!(
            "Email {} is linked to another account",
            identity.email
        )));
    }

    let now = Utc::now();
    let created = user::ActiveModel {
        id: Set(identity.id),
        email: Set(identity.email.clone()),
        name: Set(name),
        phone: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await;

    match created {
        Ok(created) => {
            info!(user_id = %created.id, "Mirrored new identity-provider user");
            Ok(created)
        }
        // A concurrent first request may have inserted the same account.
        Err(err) => match user::Entity::find_by_id(identity.id).one(db).await? {
            Some(existing) => Ok(existing),
            None => Err(err.into()),
        },
    }
}
