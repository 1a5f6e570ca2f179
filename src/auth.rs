//! OAuth2 session lifecycle for the Gmail API
//!
//! Access tokens are short-lived. Before each cycle the session is refreshed
//! proactively when it is within the refresh threshold of expiring, and the
//! refreshed session is written back through the `SessionStore`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use yup_oauth2::ApplicationSecret;

use crate::config::AuthConfig;
use crate::error::{AutomationError, Result};
use crate::models::Session;
use crate::session::SessionStore;

/// Gmail scopes the session must have been granted
///
/// - gmail.modify: read messages, create drafts, remove the UNREAD label
pub const REQUIRED_SCOPES: &[&str] = &["https://www.googleapis.com/auth/gmail.modify"];

/// Load OAuth2 client credentials
///
/// Uses the Google `credentials.json` when it exists, otherwise the
/// `GOOGLE_CLIENT_ID` / `GOOGLE_CLIENT_SECRET` environment variables.
pub async fn load_application_secret(config: &AuthConfig) -> Result<ApplicationSecret> {
    if config.credentials_file.exists() {
        let secret = yup_oauth2::read_application_secret(&config.credentials_file)
            .await
            .map_err(|e| AutomationError::Auth(format!("Failed to read credentials: {}", e)))?;
        debug!("Loaded OAuth client credentials from {:?}", config.credentials_file);
        return Ok(secret);
    }

    load_credentials_from_env(&config.token_uri)
}

/// Load OAuth2 client credentials from environment variables
///
/// # Environment Variables
/// - `GOOGLE_CLIENT_ID`: OAuth2 client ID
/// - `GOOGLE_CLIENT_SECRET`: OAuth2 client secret
/// - `GOOGLE_TOKEN_URI`: token endpoint (optional, defaults to `default_token_uri`)
pub fn load_credentials_from_env(default_token_uri: &str) -> Result<ApplicationSecret> {
    let client_id = env::var("GOOGLE_CLIENT_ID")
        .map_err(|_| AutomationError::Config("GOOGLE_CLIENT_ID not set".to_string()))?;
    let client_secret = env::var("GOOGLE_CLIENT_SECRET")
        .map_err(|_| AutomationError::Config("GOOGLE_CLIENT_SECRET not set".to_string()))?;
    let token_uri = env::var("GOOGLE_TOKEN_URI").unwrap_or_else(|_| default_token_uri.to_string());

    Ok(ApplicationSecret {
        client_id,
        client_secret,
        token_uri,
        auth_uri: "https://accounts.google.com/o/oauth2/auth".to_string(),
        ..Default::default()
    })
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    /// Google only rotates this occasionally
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Snapshot of the stored session's token
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TokenStatus {
    pub has_session: bool,
    pub has_refresh_token: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub minutes_until_expiry: Option<i64>,
    pub is_expired: bool,
    pub user_email: Option<String>,
}

impl TokenStatus {
    pub fn of(session: Option<&Session>, now: DateTime<Utc>) -> Self {
        match session {
            Some(session) => {
                let remaining = session.access_token_expiry - now;
                Self {
                    has_session: true,
                    has_refresh_token: session.refresh_token.is_some(),
                    expires_at: Some(session.access_token_expiry),
                    minutes_until_expiry: Some(remaining.num_minutes()),
                    is_expired: remaining <= ChronoDuration::zero(),
                    user_email: Some(session.user_email.clone()),
                }
            }
            None => Self {
                has_session: false,
                has_refresh_token: false,
                expires_at: None,
                minutes_until_expiry: None,
                is_expired: true,
                user_email: None,
            },
        }
    }
}

/// Keeps the stored session's access token usable
pub struct TokenLifecycleManager {
    http: reqwest::Client,
    secret: ApplicationSecret,
    store: Arc<dyn SessionStore>,
    refresh_threshold: ChronoDuration,
}

impl TokenLifecycleManager {
    pub fn new(secret: ApplicationSecret, store: Arc<dyn SessionStore>, config: &AuthConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            secret,
            store,
            refresh_threshold: ChronoDuration::seconds(config.refresh_threshold_secs),
        })
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn needs_refresh(&self, session: &Session, now: DateTime<Utc>) -> bool {
        session.access_token_expiry - now < self.refresh_threshold
    }

    /// Refresh the access token if it expires within the threshold
    ///
    /// On success the refreshed session is persisted. A failed refresh is
    /// logged and the session is returned untouched; the provider will reject
    /// it later if it really expired.
    pub async fn ensure_fresh(&self, session: Session) -> Session {
        let now = Utc::now();
        if !self.needs_refresh(&session, now) {
            return session;
        }

        let Some(refresh_token) = session.refresh_token.clone() else {
            warn!(
                "Access token for {} expires at {} and no refresh token is stored",
                session.user_email, session.access_token_expiry
            );
            return session;
        };

        let token = match self.exchange_refresh_token(&refresh_token).await {
            Ok(token) => token,
            Err(e) => {
                warn!("Token refresh for {} failed: {}", session.user_email, e);
                return session;
            }
        };

        let refreshed = Session {
            access_token: token.access_token,
            access_token_expiry: Utc::now() + ChronoDuration::seconds(token.expires_in),
            refresh_token: token.refresh_token.or(session.refresh_token),
            user_email: session.user_email,
        };

        if let Err(e) = self.store.save(&refreshed).await {
            warn!("Refreshed token could not be persisted: {}", e);
        }
        info!(
            "Refreshed access token for {}, valid until {}",
            refreshed.user_email, refreshed.access_token_expiry
        );
        refreshed
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.secret.token_uri)
            .form(&[
                ("client_id", self.secret.client_id.as_str()),
                ("client_secret", self.secret.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AutomationError::Auth(format!(
                "token endpoint returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AutomationError::Auth(format!("Invalid token response: {}", e)))
    }

    /// Stored session, refreshed if needed
    pub async fn load_fresh_session(&self) -> Result<Session> {
        let session = self.store.load().await?.ok_or_else(|| {
            AutomationError::Auth("no session found, sign in first".to_string())
        })?;
        Ok(self.ensure_fresh(session).await)
    }

    pub async fn token_status(&self) -> Result<TokenStatus> {
        let session = self.store.load().await?;
        Ok(TokenStatus::of(session.as_ref(), Utc::now()))
    }
}
