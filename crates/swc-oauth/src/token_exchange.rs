//! Authorization-code-for-token exchange

use crate::types::{AuthConfig, OAuthToken};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Deserialize;
use swc_types::{SdkError, SdkResult};
use tracing::{debug, error};

/// Token response from the authorization server. Missing fields never fail
/// the exchange.
#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,

    #[serde(default)]
    refresh_token: String,

    /// Lifetime of the access token in seconds.
    #[serde(default)]
    expires_in: i64,
}

/// Error body of a rejected exchange.
#[derive(Debug, Default, Deserialize)]
struct RequestError {
    #[serde(default)]
    error: String,
}

/// Performs the code-for-token HTTP exchange.
pub struct TokenExchanger {
    client: Client,
}

impl TokenExchanger {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Exchange an authorization code for tokens.
    ///
    /// `redirect_uri` is the redirect target the code was issued against,
    /// which differs from the configured one when the attempt fell back to
    /// the out-of-band sentinel.
    pub async fn exchange(
        &self,
        config: &AuthConfig,
        code: &str,
        redirect_uri: &str,
    ) -> SdkResult<OAuthToken> {
        debug!("Exchanging authorization code at {}", config.token_url);

        let params = [
            ("code", code),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
            ("access_type", "offline"),
        ];

        let response = self
            .client
            .post(&config.token_url)
            .header(ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() != 200 {
            let status_text = status
                .canonical_reason()
                .unwrap_or("Unknown Status")
                .to_string();
            // Best-effort decode of the error body; an unreadable body
            // still produces a typed failure.
            let body = response.bytes().await.unwrap_or_default();
            let request_error: RequestError = serde_json::from_slice(&body).unwrap_or_default();
            error!(
                "Token exchange rejected (HTTP {}): {}",
                status, request_error.error
            );
            return Err(SdkError::Remote {
                error: request_error.error,
                status: status.as_u16(),
                status_text,
            });
        }

        let body = response.bytes().await?;
        let wire: TokenResponse = serde_json::from_slice(&body)?;

        let mut token = OAuthToken::new(wire.access_token, wire.refresh_token);
        token.set_expires_in(wire.expires_in);
        Ok(token)
    }
}

impl Default for TokenExchanger {
    fn default() -> Self {
        Self::new()
    }
}
