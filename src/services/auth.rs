// src/services/auth.rs
use crate::errors::{AuthError, StyleError};
use crate::services::kv_store::KeyValueStore;
use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const AUTH_STORAGE_KEY: &str = "pb_auth";
const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    pub token: String,
    pub user: AuthUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationForm {
    pub email: String,
    pub name: String,
    pub password: String,
    pub password_confirm: String,
}

impl RegistrationForm {
    fn validate(&self) -> Result<(), AuthError> {
        if self.email.trim().is_empty() || self.name.trim().is_empty() || self.password.is_empty() {
            return Err(AuthError::Invalid("Please fill in all fields.".to_string()));
        }
        if self.password != self.password_confirm {
            return Err(AuthError::Invalid("Passwords do not match.".to_string()));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::Invalid(format!(
                "Password must be at least {} characters long.",
                MIN_PASSWORD_LEN
            )));
        }
        Ok(())
    }
}

/// Hosted user directory.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn authenticate(&self, email: &str, password: &str) -> Result<AuthState, AuthError>;
    async fn create_user(&self, form: &RegistrationForm) -> Result<(), AuthError>;
}

/// REST client for a PocketBase `users` collection.
pub struct PocketBaseClient {
    base_url: String,
    client: Client,
}

impl PocketBaseClient {
    pub fn new(base_url: &str) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, AuthError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;

        if !status.is_success() {
            return Err(normalize_error(status.as_u16(), &text));
        }
        serde_json::from_str(&text).map_err(|e| AuthError::Rejected {
            status: status.as_u16(),
            message: format!("Unreadable auth response: {}", e),
            fields: BTreeMap::new(),
        })
    }
}

#[async_trait]
impl AuthBackend for PocketBaseClient {
    async fn authenticate(&self, email: &str, password: &str) -> Result<AuthState, AuthError> {
        let body = self
            .post(
                "/api/collections/users/auth-with-password",
                json!({ "identity": email, "password": password }),
            )
            .await?;

        let token = body["token"].as_str().unwrap_or_default().to_string();
        let user: Option<AuthUser> = serde_json::from_value(body["record"].clone()).ok();
        match user {
            Some(user) if !token.is_empty() => Ok(AuthState { token, user }),
            _ => Err(AuthError::Rejected {
                status: 200,
                message: "Auth response is missing token or record".to_string(),
                fields: BTreeMap::new(),
            }),
        }
    }

    async fn create_user(&self, form: &RegistrationForm) -> Result<(), AuthError> {
        self.post(
            "/api/collections/users/records",
            json!({
                "email": form.email,
                "name": form.name,
                "password": form.password,
                "passwordConfirm": form.password_confirm
            }),
        )
        .await
        .map(|_| ())
    }
}

/// Maps a PocketBase error body to [`AuthError::Rejected`].
///
/// Field entries look like `{"email": {"code": "...", "message": "..."}}`; an entry
/// without a string message falls back to its code, then to "invalid value".
pub fn normalize_error(status: u16, body: &str) -> AuthError {
    let value: Value = serde_json::from_str(body).unwrap_or(Value::Null);

    let message = value["message"]
        .as_str()
        .filter(|m| !m.is_empty())
        .unwrap_or("Authentication failed")
        .to_string();

    let fields = value["data"]
        .as_object()
        .map(|data| {
            data.iter()
                .map(|(field, detail)| {
                    let text = detail["message"]
                        .as_str()
                        .or_else(|| detail["code"].as_str())
                        .or_else(|| detail.as_str())
                        .unwrap_or("invalid value");
                    (field.clone(), text.to_string())
                })
                .collect()
        })
        .unwrap_or_default();

    AuthError::Rejected {
        status,
        message,
        fields,
    }
}

/// The signed-in user, persisted across restarts and observable through a watch channel.
pub struct AuthSession {
    backend: Arc<dyn AuthBackend>,
    store: Arc<dyn KeyValueStore>,
    state: watch::Sender<Option<AuthState>>,
}

impl AuthSession {
    /// Loads any previously saved auth state; unreadable state starts signed out.
    pub async fn restore(
        backend: Arc<dyn AuthBackend>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, StyleError> {
        let initial = match store.get(AUTH_STORAGE_KEY).await? {
            Some(raw) => match serde_json::from_str::<AuthState>(&raw) {
                Ok(state) => {
                    info!("Restored session for {}", state.user.email);
                    Some(state)
                }
                Err(e) => {
                    warn!("Discarding unreadable saved auth state: {}", e);
                    None
                }
            },
            None => None,
        };

        let (state, _) = watch::channel(initial);
        Ok(Self {
            backend,
            store,
            state,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<AuthState>> {
        self.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_some()
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.state.borrow().as_ref().map(|s| s.user.clone())
    }

    /// Resolves the user a request acts for. Only the bearer token issued by the
    /// last successful login is accepted.
    pub fn authorize(&self, token: Option<&str>) -> Result<AuthUser, AuthError> {
        let state = self.state.borrow();
        match (state.as_ref(), token) {
            (Some(current), Some(presented))
                if !presented.is_empty() && current.token == presented =>
            {
                Ok(current.user.clone())
            }
            _ => Err(AuthError::NotAuthenticated),
        }
    }

    async fn set_state(&self, state: Option<AuthState>) -> Result<(), StyleError> {
        match &state {
            Some(s) => {
                let raw = serde_json::to_string(s)?;
                self.store.set(AUTH_STORAGE_KEY, &raw).await?;
            }
            None => self.store.remove(AUTH_STORAGE_KEY).await?,
        }
        self.state.send_replace(state);
        Ok(())
    }

    /// Signs in and returns the state, including the bearer token clients must present.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthState, StyleError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AuthError::Invalid("Please enter email and password.".to_string()).into());
        }

        let state = self.backend.authenticate(email.trim(), password).await?;
        self.set_state(Some(state.clone())).await?;
        info!("Logged in as {}", state.user.email);
        Ok(state)
    }

    /// Creates the account, then signs it in.
    pub async fn register(&self, form: &RegistrationForm) -> Result<AuthState, StyleError> {
        form.validate()?;
        self.backend.create_user(form).await?;
        info!("Registered {}", form.email);
        self.login(&form.email, &form.password).await
    }

    pub async fn logout(&self) -> Result<(), StyleError> {
        if let Some(user) = self.current_user() {
            info!("Logging out {}", user.email);
        }
        self.set_state(None).await
    }
}
