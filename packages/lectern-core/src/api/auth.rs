//! Bearer-token authentication.
//!
//! Token verification is a capability: something that maps a bearer
//! token to a user identity. The production implementation asks the
//! external auth service; tests inject a static verifier.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;

use crate::error::{LecternError, LecternResult};

/// The identity behind a verified token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: Option<String>,
}

/// Capability mapping bearer tokens to identities.
#[async_trait::async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> LecternResult<AuthenticatedUser>;
}

#[derive(Deserialize)]
struct AuthUserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// Verifier backed by the external auth service's user endpoint.
pub struct AuthServiceVerifier {
    http: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl AuthServiceVerifier {
    pub fn new(base_url: &str, service_key: &str, timeout: Duration) -> LecternResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LecternError::Internal(format!("http client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl TokenVerifier for AuthServiceVerifier {
    async fn verify(&self, token: &str) -> LecternResult<AuthenticatedUser> {
        let response = self
            .http
            .get(format!("{}/auth/v1/user", self.base_url))
            .bearer_auth(token)
            .header("apikey", &self.service_key)
            .send()
            .await
            .map_err(|e| LecternError::Unauthorized(format!("auth service unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(LecternError::Unauthorized("invalid token".to_string()));
        }

        let user: AuthUserResponse = response
            .json()
            .await
            .map_err(|_| LecternError::Unauthorized("malformed auth response".to_string()))?;

        Ok(AuthenticatedUser {
            user_id: user.id,
            email: user.email,
        })
    }
}

/// Static verifier for tests and local development.
#[derive(Default)]
pub struct StaticTokenVerifier {
    tokens: Mutex<HashMap<String, AuthenticatedUser>>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&self, token: &str, user_id: &str) {
        self.tokens.lock().insert(
            token.to_string(),
            AuthenticatedUser {
                user_id: user_id.to_string(),
                email: None,
            },
        );
    }
}

#[async_trait::async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> LecternResult<AuthenticatedUser> {
        self.tokens
            .lock()
            .get(token)
            .cloned()
            .ok_or_else(|| LecternError::Unauthorized("invalid token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_verifier_round_trip() {
        let verifier = StaticTokenVerifier::new();
        verifier.allow("tok-1", "user-1");

        let user = verifier.verify("tok-1").await.unwrap();
        assert_eq!(user.user_id, "user-1");

        let err = verifier.verify("unknown").await.unwrap_err();
        assert!(matches!(err, LecternError::Unauthorized(_)));
    }
}
