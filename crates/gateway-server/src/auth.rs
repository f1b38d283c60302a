//! # Bearer Authentication
//!
//! Verifies bearer credentials on inbound requests and enforces route roles.
//!
//! - Without a signing secret, a credential is checked structurally: three
//!   dot-separated segments, a base64url JSON payload and an `exp` claim
//!   (seconds since the epoch) that is not in the past.
//! - With a secret, the credential is verified as an HS256 JWT.
//!
//! Bypass patterns are exact paths, or prefixes when they end in `*`.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use gateway_config::AuthSettings;
use gateway_core::{GatewayError, GatewayRequest, ServiceRoute};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::{error::ApiError, state::AppState};

/// Role required on the admin endpoints
pub const ADMIN_ROLE: &str = "admin";

/// Authentication configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Require credentials at all
    pub enabled: bool,
    /// Paths that skip authentication
    pub bypass_paths: Vec<String>,
    /// Paths that skip the role check
    pub role_bypass_paths: Vec<String>,
    /// HS256 signing secret
    pub secret: Option<SecretString>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::from(&AuthSettings::default())
    }
}

impl From<&AuthSettings> for AuthConfig {
    fn from(settings: &AuthSettings) -> Self {
        Self {
            enabled: settings.enabled,
            bypass_paths: settings.bypass_paths.clone(),
            role_bypass_paths: settings.role_bypass_paths.clone(),
            secret: settings.secret.clone(),
        }
    }
}

impl AuthConfig {
    /// Configuration that admits every request
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Check if a path skips authentication
    pub fn is_bypass_path(&self, path: &str) -> bool {
        self.bypass_paths.iter().any(|p| path_matches(p, path))
    }

    /// Check if a path skips the role check
    pub fn is_role_bypass_path(&self, path: &str) -> bool {
        self.role_bypass_paths.iter().any(|p| path_matches(p, path))
    }
}

/// Exact match, or prefix match for patterns ending in `*`
pub fn path_matches(pattern: &str, path: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => path == pattern,
    }
}

/// Authenticated caller
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// Subject identifier
    pub id: String,
    /// Granted roles
    pub roles: Vec<String>,
    /// Credential expiry
    pub expires_at: Option<DateTime<Utc>>,
    /// Remaining claims
    pub claims: HashMap<String, serde_json::Value>,
}

impl Principal {
    /// Check if the principal holds the role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Check if the principal holds any of the roles
    pub fn has_any_role(&self, roles: &[String]) -> bool {
        roles.iter().any(|r| self.has_role(r))
    }
}

/// Credential payload
#[derive(Debug, Clone, Deserialize)]
struct TokenClaims {
    sub: Option<String>,
    #[serde(default, alias = "userId")]
    id: Option<serde_json::Value>,
    role: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
    exp: Option<i64>,
    #[serde(flatten)]
    additional: HashMap<String, serde_json::Value>,
}

impl TokenClaims {
    fn into_principal(self) -> Principal {
        let id = self
            .sub
            .or_else(|| match self.id {
                Some(serde_json::Value::String(s)) => Some(s),
                Some(serde_json::Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| "unknown".to_string());

        let mut roles = self.roles;
        if let Some(role) = self.role {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }

        Principal {
            id,
            roles,
            expires_at: self.exp.and_then(|e| DateTime::from_timestamp(e, 0)),
            claims: self.additional,
        }
    }
}

/// Authentication error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// No bearer credential on a protected path
    #[error("Authentication required")]
    MissingCredentials,

    /// Credential is malformed or its signature does not verify
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Credential expiry is in the past
    #[error("Token expired")]
    Expired,

    /// Principal lacks every role the route accepts
    #[error("Requires one of the roles: {}", .0.join(", "))]
    InsufficientRole(Vec<String>),
}

impl AuthError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingCredentials | Self::InvalidToken(_) | Self::Expired => {
                StatusCode::UNAUTHORIZED
            }
            Self::InsufficientRole(_) => StatusCode::FORBIDDEN,
        }
    }
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InsufficientRole(_) => Self::forbidden(err.to_string()),
            _ => Self::unauthorized(err.to_string()),
        }
    }
}

/// Verifies credentials and route roles
pub struct Authenticator {
    config: AuthConfig,
    decoding_key: Option<DecodingKey>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("config", &self.config)
            .field("verifies_signature", &self.decoding_key.is_some())
            .finish()
    }
}

impl Authenticator {
    /// Create an authenticator
    pub fn new(config: AuthConfig) -> Self {
        let decoding_key = config
            .secret
            .as_ref()
            .map(|s| DecodingKey::from_secret(s.expose_secret().as_bytes()));
        Self {
            config,
            decoding_key,
        }
    }

    /// Authentication configuration
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Whether credentials are required anywhere
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Authenticate a request.
    ///
    /// Returns `None` when authentication is disabled or the path bypasses it.
    pub fn authenticate(&self, request: &GatewayRequest) -> Result<Option<Principal>, AuthError> {
        if !self.config.enabled || self.config.is_bypass_path(&request.path) {
            return Ok(None);
        }
        let token = request.bearer_token().ok_or(AuthError::MissingCredentials)?;
        let principal = self.verify_token(token)?;
        debug!(principal = %principal.id, roles = ?principal.roles, "Request authenticated");
        Ok(Some(principal))
    }

    /// Check the route's role requirement.
    ///
    /// Requests that skipped authentication carry no principal and are not
    /// role-checked.
    pub fn authorize(
        &self,
        principal: Option<&Principal>,
        route: &ServiceRoute,
        path: &str,
    ) -> Result<(), AuthError> {
        if route.required_roles.is_empty() || self.config.is_role_bypass_path(path) {
            return Ok(());
        }
        match principal {
            Some(p) if !p.has_any_role(&route.required_roles) => {
                Err(AuthError::InsufficientRole(route.required_roles.clone()))
            }
            _ => Ok(()),
        }
    }

    /// Verify a bearer credential
    pub fn verify_token(&self, token: &str) -> Result<Principal, AuthError> {
        let claims = match &self.decoding_key {
            Some(key) => Self::verify_signed(token, key)?,
            None => Self::verify_structure(token)?,
        };
        Ok(claims.into_principal())
    }

    fn verify_signed(token: &str, key: &DecodingKey) -> Result<TokenClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::new();

        decode::<TokenClaims>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => {
                    debug!(error = %e, "JWT validation failed");
                    AuthError::InvalidToken(e.to_string())
                }
            })
    }

    fn verify_structure(token: &str) -> Result<TokenClaims, AuthError> {
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(AuthError::InvalidToken(
                "expected three dot-separated segments".to_string(),
            ));
        }

        let payload = URL_SAFE_NO_PAD
            .decode(segments[1].trim_end_matches('='))
            .map_err(|e| AuthError::InvalidToken(format!("payload is not base64url: {e}")))?;
        let claims: TokenClaims = serde_json::from_slice(&payload)
            .map_err(|e| AuthError::InvalidToken(format!("payload is not a JSON object: {e}")))?;

        if let Some(exp) = claims.exp {
            if exp <= Utc::now().timestamp() {
                return Err(AuthError::Expired);
            }
        }
        Ok(claims)
    }
}

/// Admin endpoint guard: requires a principal with the admin role
pub async fn admin_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let auth = &state.auth;
    if !auth.is_enabled() {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    let result = token
        .ok_or(AuthError::MissingCredentials)
        .and_then(|t| auth.verify_token(t))
        .and_then(|principal| {
            if principal.has_role(ADMIN_ROLE) {
                Ok(principal)
            } else {
                Err(AuthError::InsufficientRole(vec![ADMIN_ROLE.to_string()]))
            }
        });

    match result {
        Ok(principal) => {
            debug!(principal = %principal.id, path = %request.uri().path(), "Admin request");
            next.run(request).await
        }
        Err(err) => {
            warn!(error = %err, path = %request.uri().path(), "Admin access denied");
            ApiError::from(GatewayError::from(err)).into_response()
        }
    }
}
