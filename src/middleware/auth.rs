//! Token authentication gate for every protected route.
//!
//! Validation order: signature → field decoding → role → expiry. The first
//! failing check decides the rejection reason.

use std::fmt;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use thiserror::Error;
use zeroize::Zeroizing;

use super::cipher::SharedKey;
use super::credential::Credential;
use crate::config::Config;
use crate::errors::AppError;
use crate::state::AppState;

pub const AUTH_HEADER: &str = "x-auth-token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no token has been provided")]
    NoCredential,

    #[error("please provide a valid authentication token")]
    InvalidSignature,

    #[error("invalid role")]
    InvalidRole,

    #[error("token has expired")]
    TokenExpired,
}

/// Roles carried in credentials. Matching is exact on the wire name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "ROLE_USER",
            Role::Admin => "ROLE_ADMIN",
            Role::Other(s) => s,
        }
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        match s {
            "ROLE_USER" => Role::User,
            "ROLE_ADMIN" => Role::Admin,
            other => Role::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated caller, attached to the request for downstream handlers.
#[derive(Clone)]
pub struct Identity {
    pub subject: String,
    /// Decrypted caller secret.
    pub secret: Zeroizing<String>,
    pub role: Role,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("subject", &self.subject)
            .field("secret", &"****")
            .field("role", &self.role)
            .finish()
    }
}

impl Identity {
    /// The fixed identity used when authentication is bypassed.
    pub fn test_user() -> Self {
        Self {
            subject: "test".into(),
            secret: Zeroizing::new(String::new()),
            role: Role::User,
        }
    }
}

pub enum AuthMode {
    /// Validate every credential against the shared key.
    Enforce { key: SharedKey },
    /// Accept every request as `identity`. Development and test deployments only.
    Bypass { identity: Identity },
}

pub struct AuthConfig {
    pub mode: AuthMode,
}

impl AuthConfig {
    pub fn enforce(key: SharedKey) -> Self {
        Self {
            mode: AuthMode::Enforce { key },
        }
    }

    pub fn bypass(identity: Identity) -> Self {
        Self {
            mode: AuthMode::Bypass { identity },
        }
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        if cfg.ignore_auth {
            return Ok(Self::bypass(Identity::test_user()));
        }
        Ok(Self::enforce(SharedKey::from_hex(&cfg.secret_key)?))
    }
}

pub struct Authenticator {
    mode: AuthMode,
}

impl Authenticator {
    pub fn new(config: AuthConfig) -> Self {
        Self { mode: config.mode }
    }

    pub fn is_bypassed(&self) -> bool {
        matches!(self.mode, AuthMode::Bypass { .. })
    }

    pub fn authenticate(&self, token: Option<&str>, required: &Role) -> Result<Identity, AuthError> {
        self.authenticate_at(token, required, chrono::Utc::now().timestamp_millis())
    }

    /// Validate `token` as of `now_ms` (epoch milliseconds).
    pub fn authenticate_at(
        &self,
        token: Option<&str>,
        required: &Role,
        now_ms: i64,
    ) -> Result<Identity, AuthError> {
        let key = match &self.mode {
            AuthMode::Bypass { identity } => return Ok(identity.clone()),
            AuthMode::Enforce { key } => key,
        };

        let raw = token.ok_or(AuthError::NoCredential)?;
        let credential = Credential::parse(raw)?;

        if !key.verify(&credential.signed_payload(), credential.signature) {
            return Err(AuthError::InvalidSignature);
        }

        let subject = credential.subject()?;
        let role = credential.role()?;
        let secret = key
            .decrypt_secret(credential.secret_material)
            .map_err(|_| AuthError::InvalidSignature)?;
        let expires_at = credential.expires_at_ms()?;

        if &role != required {
            return Err(AuthError::InvalidRole);
        }

        if now_ms >= expires_at {
            return Err(AuthError::TokenExpired);
        }

        Ok(Identity {
            subject,
            secret: Zeroizing::new(secret),
            role,
        })
    }
}

/// Gate for routes that require `ROLE_USER`.
pub async fn require_user(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    gate(&state.auth, &Role::User, req, next).await
}

/// Authenticate the request and hand the identity to the wrapped handler
/// through request extensions. Rejected requests never reach the handler.
pub async fn gate(
    auth: &Authenticator,
    required: &Role,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(AUTH_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty());

    match auth.authenticate(token, required) {
        Ok(identity) => {
            tracing::debug!(subject = %identity.subject, role = %identity.role, "authenticated");
            req.extensions_mut().insert(identity);
            Ok(next.run(req).await)
        }
        Err(e) => {
            tracing::warn!(
                reason = %e,
                token = %token.map(mask).unwrap_or_default(),
                path = %req.uri().path(),
                "rejected request"
            );
            Err(e.into())
        }
    }
}

// Never log a full credential
fn mask(token: &str) -> String {
    if token.len() > 8 {
        format!("{}…{}", &token[..4], &token[token.len() - 4..])
    } else {
        "****".to_string()
    }
}
