//! Flow configuration, tokens and completion results

use chrono::{DateTime, Duration, Utc};

/// Production authorization endpoint.
pub const AUTH_ENDPOINT: &str = "http://dev.swcombine.net/ws/oauth2/auth/";
/// Production token endpoint.
pub const TOKEN_ENDPOINT: &str = "http://dev.swcombine.net/ws/oauth2/token/";
/// Host the authorization server redirects from.
pub const AUTH_HOST: &str = "dev.swcombine.net";

/// Redirect sentinel used when no loopback listener is available.
pub const OUT_OF_BAND_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

/// Callback path the authorization server navigates to on success.
pub const CALLBACK_CODE_PATH: &str = "/ws/oauth2/auth/code.php";
/// Callback path the authorization server navigates to on error.
pub const CALLBACK_ERROR_PATH: &str = "/ws/oauth2/auth/error.php";

/// OAuth flow configuration, immutable for the manager's lifetime.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Client id for the app.
    pub client_id: String,
    /// Client secret for the app. Ships inside the desktop binary and is
    /// sent on token exchange; preserved as observed behavior.
    pub client_secret: String,
    /// Authorization endpoint URL.
    pub auth_url: String,
    /// Token endpoint URL.
    pub token_url: String,
    /// Host expected as the referring origin of the loopback redirect.
    pub auth_host: String,
    /// Loopback port to listen on for authorisation responses, if any.
    pub port: Option<u16>,
    /// App runs on a shared machine; session data will not be saved.
    pub shared: bool,
}

impl AuthConfig {
    /// Configuration against the production endpoints.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        port: Option<u16>,
        shared: bool,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_url: AUTH_ENDPOINT.to_string(),
            token_url: TOKEN_ENDPOINT.to_string(),
            auth_host: AUTH_HOST.to_string(),
            port,
            shared,
        }
    }

    /// Redirect target derived from the configured port: the loopback
    /// listener address, or the out-of-band sentinel when no port is set.
    pub fn redirect_uri(&self) -> String {
        match self.port {
            Some(port) => format!("http://localhost:{}/", port),
            None => OUT_OF_BAND_URI.to_string(),
        }
    }
}

/// Tokens obtained from the authorization server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: String,
    expires_in: i64,
    expires_at: DateTime<Utc>,
}

impl OAuthToken {
    pub fn new(access_token: String, refresh_token: String) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_in: 0,
            expires_at: Utc::now(),
        }
    }

    /// Token carrying only a refresh token, as seeded from persisted state.
    pub fn from_refresh_token(refresh_token: impl Into<String>) -> Self {
        Self::new(String::new(), refresh_token.into())
    }

    /// Set the lifetime in seconds. `expires_at` is recomputed from the
    /// current time on every call and is never stored independently.
    pub fn set_expires_in(&mut self, seconds: i64) {
        self.expires_in = seconds;
        self.expires_at = Utc::now() + Duration::seconds(seconds);
    }

    pub fn expires_in(&self) -> i64 {
        self.expires_in
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// Whether the user has authorised the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Something failed along the way.
    Error,
    /// The user authorised the app and tokens were obtained.
    Authorised,
    /// The end-user or authorization server denied the request.
    Denied,
}

impl AuthOutcome {
    /// Human-readable description, used when no specific reason is known.
    pub fn description(&self) -> &'static str {
        match self {
            AuthOutcome::Error => "Unspecified Error",
            AuthOutcome::Authorised => "Authorised",
            AuthOutcome::Denied => "The end-user or authorization server denied the request",
        }
    }
}

/// The single completion raised for an authorisation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResult {
    pub outcome: AuthOutcome,
    /// Reason the app has not been authorised, when one is known.
    pub reason: Option<String>,
    /// The caller's state payload with the identity marker stripped.
    pub state: Option<String>,
}

impl CompletionResult {
    /// The reason, falling back to the outcome's description.
    pub fn display_reason(&self) -> &str {
        match self.reason.as_deref() {
            Some(reason) if !reason.trim().is_empty() => reason,
            _ => self.outcome.description(),
        }
    }
}
