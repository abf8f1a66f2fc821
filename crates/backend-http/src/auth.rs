//! Account endpoints and the bearer credential they issue.

use crate::{BackendError, HttpBackend};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shopflow_model::{LoginOutcome, Profile};
use shopflow_query::ApiRequest;
use std::sync::{PoisonError, RwLock};

/// Holds the opaque bearer token for the current session, if any.
#[derive(Default)]
pub struct AuthSession {
    token: RwLock<Option<SecretString>>,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

impl AuthSession {
    pub fn set(&self, token: impl Into<String>) {
        let secret = SecretString::from(token.into());
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(secret);
    }

    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_authenticated(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn bearer(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|token| token.expose_secret().to_string())
    }

    pub(crate) fn require(&self) -> Result<String, BackendError> {
        self.bearer()
            .ok_or_else(|| BackendError::Auth("no bearer token; log in first".to_string()))
    }
}

/// Registration form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Provisioning data for an authenticator app.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TwoFactorSetup {
    pub otp_uri: String,
    pub secret: String,
}

fn field<'a>(json: &'a Value, key: &str) -> Option<&'a str> {
    json.get(key).and_then(Value::as_str)
}

fn parse_login(json: &Value) -> Result<LoginOutcome, BackendError> {
    if json.get("twofa_required").and_then(Value::as_bool) == Some(true) {
        let pending = field(json, "token")
            .ok_or_else(|| BackendError::Parse("2FA response without token".to_string()))?;
        return Ok(LoginOutcome::TwoFactor {
            pending_token: pending.to_string(),
        });
    }
    field(json, "access_token")
        .map(|token| LoginOutcome::Authenticated {
            access_token: token.to_string(),
        })
        .ok_or_else(|| BackendError::Parse("login response without access_token".to_string()))
}

impl HttpBackend {
    /// First login step. Stores the bearer token when no second factor is needed.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, BackendError> {
        let json = self
            .post(&["api", "login"], &json!({ "email": email, "password": password }), None)
            .await?;
        let outcome = parse_login(&json)?;
        if let LoginOutcome::Authenticated { access_token } = &outcome {
            self.session().set(access_token.as_str());
        }
        tracing::info!(
            two_factor = matches!(outcome, LoginOutcome::TwoFactor { .. }),
            "Login accepted"
        );
        Ok(outcome)
    }

    /// Second login step. Stores and returns the bearer token.
    pub async fn verify_two_factor(
        &self,
        pending_token: &str,
        code: &str,
    ) -> Result<String, BackendError> {
        let json = self
            .post(
                &["api", "verify-2fa"],
                &json!({ "token": pending_token, "code": code }),
                None,
            )
            .await?;
        let token = field(&json, "access_token")
            .ok_or_else(|| BackendError::Parse("2FA response without access_token".to_string()))?;
        self.session().set(token);
        Ok(token.to_string())
    }

    /// Create an account; returns the new user id.
    pub async fn register(&self, account: &NewAccount) -> Result<String, BackendError> {
        if !account.email.contains('@') {
            return Err(BackendError::InvalidRequest("email address is required".to_string()));
        }
        if account.password.is_empty() {
            return Err(BackendError::InvalidRequest("password is required".to_string()));
        }
        let body = serde_json::to_value(account).map_err(|e| BackendError::Parse(e.to_string()))?;
        let json = self.post(&["api", "register"], &body, None).await?;
        field(&json, "user_id")
            .map(str::to_string)
            .ok_or_else(|| BackendError::Parse("register response without user_id".to_string()))
    }

    pub async fn verify_email(&self, token: &str) -> Result<(), BackendError> {
        self.post(&["api", "verify-email"], &json!({ "token": token }), None)
            .await?;
        Ok(())
    }

    /// Enable TOTP for the logged-in account.
    pub async fn setup_two_factor(&self) -> Result<TwoFactorSetup, BackendError> {
        let bearer = self.session().require()?;
        let json = self
            .post(&["api", "setup-2fa"], &json!({}), Some(bearer.as_str()))
            .await?;
        serde_json::from_value(json).map_err(|e| BackendError::Parse(e.to_string()))
    }

    /// Profile of the logged-in account.
    pub async fn profile(&self) -> Result<Profile, BackendError> {
        self.session().require()?;
        let json = self.get(&ApiRequest::new(["api", "profile"])).await?;
        serde_json::from_value(json).map_err(|e| BackendError::Parse(e.to_string()))
    }

    pub async fn user(&self, user_id: &str) -> Result<Profile, BackendError> {
        let json = self.get(&ApiRequest::new(["users", user_id])).await?;
        serde_json::from_value(json).map_err(|e| BackendError::Parse(e.to_string()))
    }

    pub fn logout(&self) {
        self.session().clear();
    }
}
