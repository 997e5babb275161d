//! Authorisation flow manager - orchestrates the complete browser flow
//!
//! Owns the configuration and session state, builds the authorization URL,
//! races the two redirect detectors, drives the token exchange and
//! persists the resulting session. One attempt may be live at a time and
//! each attempt resolves exactly once.

use crate::callback::{extract_identity, CallbackPayload};
use crate::listener::RedirectListener;
use crate::monitor::{BrowserMonitor, MonitorEvent};
use crate::surface::BrowserSurface;
use crate::token_exchange::TokenExchanger;
use crate::types::{AuthConfig, AuthOutcome, CompletionResult, OAuthToken, OUT_OF_BAND_URI};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use swc_store::{PersistedCredential, PersistentStore};
use swc_types::{SdkError, SdkResult};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Who resolved the attempt. The explicit tri-state (rather than a single
/// "we closed it ourselves" flag) is what makes a duplicate resolution a
/// detectable programming error instead of a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Pending,
    Detector,
    UserClosed,
}

/// State of the single live attempt.
struct Attempt {
    resolution: Mutex<Resolution>,
}

impl Attempt {
    fn new() -> Self {
        Self {
            resolution: Mutex::new(Resolution::Pending),
        }
    }

    /// First resolver wins; a second resolution is rejected.
    fn resolve(&self, how: Resolution) -> bool {
        let mut resolution = self.resolution.lock();
        if *resolution == Resolution::Pending {
            *resolution = how;
            true
        } else {
            false
        }
    }
}

/// The active detection strategy for an attempt. The losing side of the
/// race is torn down without effect when this drops.
enum Detector {
    Listener(RedirectListener, oneshot::Receiver<String>),
    Monitor(BrowserMonitor, oneshot::Receiver<MonitorEvent>),
}

/// What won the race.
enum Won {
    /// A detector captured the redirect; cookie is set when the browser
    /// monitor grabbed it at match time.
    Payload { query: String, cookie: Option<String> },
    /// The detector channel died without a payload.
    DetectorGone,
    /// The user closed the surface before any redirect was seen.
    UserClosed,
}

/// Releases the single-attempt guard when the attempt ends, however it
/// ends.
struct AttemptGuard<'a>(&'a AtomicBool);

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Authorisation flow manager.
pub struct AuthFlowManager {
    config: AuthConfig,
    exchanger: TokenExchanger,
    store: PersistentStore,
    token: RwLock<Option<OAuthToken>>,
    character: RwLock<Option<String>>,
    cookie: RwLock<Option<String>>,
    persist_error: RwLock<Option<String>>,
    attempt_live: AtomicBool,
}

impl AuthFlowManager {
    /// Initialise a manager, seeding cookie and refresh-token state from
    /// the persistent store unless the machine is shared.
    ///
    /// A missing or undecryptable stored session is not an error; an
    /// unexpected I/O failure while reading it is.
    pub fn initialise(config: AuthConfig) -> SdkResult<Self> {
        let store = PersistentStore::open(config.shared)?;
        Self::with_store(config, store)
    }

    /// Initialise over an explicit store.
    pub fn with_store(config: AuthConfig, store: PersistentStore) -> SdkResult<Self> {
        let mut token = None;
        let mut cookie = None;

        if !config.shared {
            if let Some(credential) = store.load()? {
                if let Some(refresh) = credential.refresh_token.filter(|r| !r.is_empty()) {
                    debug!("Seeding session from persisted credential");
                    cookie = credential.cookie;
                    token = Some(OAuthToken::from_refresh_token(refresh));
                }
            }
        }

        Ok(Self {
            config,
            exchanger: TokenExchanger::new(),
            store,
            token: RwLock::new(token),
            character: RwLock::new(None),
            cookie: RwLock::new(cookie),
            persist_error: RwLock::new(None),
            attempt_live: AtomicBool::new(false),
        })
    }

    /// Tokens from the last successful authorisation (or a refresh-token
    /// seed from a previous run).
    pub fn token(&self) -> Option<OAuthToken> {
        self.token.read().clone()
    }

    /// Character the app acts on behalf of, once authorised.
    pub fn character(&self) -> Option<String> {
        self.character.read().clone()
    }

    /// Error from the most recent session save, if it failed. The attempt's
    /// completion result is unaffected; the session just will not survive a
    /// restart.
    pub fn last_persist_error(&self) -> Option<String> {
        self.persist_error.read().clone()
    }

    /// Run one authorisation attempt to completion.
    ///
    /// Opens the surface on the authorization endpoint, waits for either
    /// the loopback listener or the navigation monitor to capture the
    /// redirect (or for the user to give up and close the window), then
    /// exchanges the code, persists the session and returns the single
    /// completion result for the attempt.
    ///
    /// Fails fast with [`SdkError::AlreadyInProgress`] while another
    /// attempt is unresolved. There is no timeout: an abandoned attempt
    /// waits until the surface is closed.
    pub async fn attempt_authorise(
        &self,
        surface: Arc<dyn BrowserSurface>,
        scopes: &[String],
        state: &str,
    ) -> SdkResult<CompletionResult> {
        if self
            .attempt_live
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SdkError::AlreadyInProgress);
        }
        let _guard = AttemptGuard(&self.attempt_live);

        self.run_attempt(surface, scopes, state).await
    }

    async fn run_attempt(
        &self,
        surface: Arc<dyn BrowserSurface>,
        scopes: &[String],
        state: &str,
    ) -> SdkResult<CompletionResult> {
        let mut redirect_uri = self.config.redirect_uri();

        // Subscribe before navigating so an immediate close still counts.
        let mut closed_rx = surface.subscribe_closed();

        // A valid saved session skips the login form.
        if let Some(cookie) = self.cookie.read().clone() {
            surface.set_cookie(&cookie);
        }

        // Strategy selection: loopback listener when a port is configured
        // and bindable, otherwise watch the surface's navigations against
        // the out-of-band redirect.
        let mut detector = match self.config.port {
            Some(port) => match RedirectListener::listen_to(port, &self.config.auth_host).await {
                Ok((listener, rx)) => {
                    info!("Authorisation attempt using loopback listener on port {}", port);
                    Detector::Listener(listener, rx)
                }
                Err(e) => {
                    warn!(
                        "Loopback listener unavailable, monitoring browser navigation instead: {}",
                        e
                    );
                    redirect_uri = OUT_OF_BAND_URI.to_string();
                    let (monitor, rx) = BrowserMonitor::watch(surface.clone());
                    Detector::Monitor(monitor, rx)
                }
            },
            None => {
                debug!("No port configured, monitoring browser navigation");
                let (monitor, rx) = BrowserMonitor::watch(surface.clone());
                Detector::Monitor(monitor, rx)
            }
        };

        let url = build_auth_url(&self.config, scopes, &redirect_uri, state);
        surface.navigate(&url)?;

        let attempt = Attempt::new();

        // Race the detector against the user closing the window. The
        // listener fires on a background task; awaiting it here brings the
        // result back onto the task that owns the surface before any
        // teardown happens.
        let won = match &mut detector {
            Detector::Listener(_, rx) => tokio::select! {
                result = rx => match result {
                    Ok(query) => Won::Payload { query, cookie: None },
                    Err(_) => Won::DetectorGone,
                },
                _ = &mut closed_rx => Won::UserClosed,
            },
            Detector::Monitor(_, rx) => tokio::select! {
                result = rx => match result {
                    Ok(MonitorEvent { query, cookie }) => Won::Payload { query, cookie },
                    Err(_) => Won::DetectorGone,
                },
                _ = &mut closed_rx => Won::UserClosed,
            },
        };

        let resolved_by = match won {
            Won::UserClosed => Resolution::UserClosed,
            _ => Resolution::Detector,
        };
        if !attempt.resolve(resolved_by) {
            // Unreachable while a single race decides the attempt. The
            // first resolution stands either way; a late one only logs.
            warn!("Suppressed duplicate resolution of authorisation attempt");
        }

        let completion = match won {
            Won::UserClosed => {
                info!("Authorisation window closed by user");
                CompletionResult {
                    outcome: AuthOutcome::Denied,
                    reason: None,
                    state: None,
                }
            }
            Won::DetectorGone => CompletionResult {
                outcome: AuthOutcome::Error,
                reason: Some("authorisation was cancelled".to_string()),
                state: None,
            },
            Won::Payload { query, cookie } => {
                self.complete_from_callback(&query, cookie, &surface, &redirect_uri)
                    .await
            }
        };

        // Tear down interactive resources exactly once. The user-closed
        // path has no surface left to close.
        match detector {
            Detector::Listener(mut listener, _) => listener.stop(),
            Detector::Monitor(monitor, _) => drop(monitor),
        }
        if resolved_by == Resolution::Detector {
            surface.close();
        }

        self.persist_session();

        info!("Authorisation attempt resolved: {:?}", completion.outcome);
        Ok(completion)
    }

    /// Map a captured callback to a completion, exchanging the code and
    /// committing session state on success.
    async fn complete_from_callback(
        &self,
        query: &str,
        monitor_cookie: Option<String>,
        surface: &Arc<dyn BrowserSurface>,
        redirect_uri: &str,
    ) -> CompletionResult {
        let payload = CallbackPayload::parse(query);

        let code = match payload.code {
            Some(code) => code,
            None => {
                // App was not authorised for some reason.
                return if payload.error.as_deref() == Some("access_denied") {
                    CompletionResult {
                        outcome: AuthOutcome::Denied,
                        reason: None,
                        state: None,
                    }
                } else {
                    CompletionResult {
                        outcome: AuthOutcome::Error,
                        reason: payload.description,
                        state: None,
                    }
                };
            }
        };

        // The state carries the name of the user who logged in.
        let raw_state = payload.state.unwrap_or_default();
        let (identity, stripped_state) = extract_identity(&raw_state);

        match self.exchanger.exchange(&self.config, &code, redirect_uri).await {
            Ok(token) => {
                let cookie = monitor_cookie.or_else(|| surface.cookie());
                *self.token.write() = Some(token);
                *self.character.write() = identity;
                *self.cookie.write() = cookie;

                CompletionResult {
                    outcome: AuthOutcome::Authorised,
                    reason: None,
                    state: Some(stripped_state),
                }
            }
            Err(e) => {
                error!("Token exchange failed: {}", e);
                CompletionResult {
                    outcome: AuthOutcome::Error,
                    reason: Some(e.to_string()),
                    state: Some(stripped_state),
                }
            }
        }
    }

    /// Write the current session to the store. Failures here must not
    /// replace the attempt's completion result; they are logged and kept
    /// for [`AuthFlowManager::last_persist_error`] so callers can detect a
    /// session that will not survive a restart.
    fn persist_session(&self) {
        let credential = PersistedCredential {
            character: self.character.read().clone(),
            refresh_token: self
                .token
                .read()
                .as_ref()
                .map(|token| token.refresh_token.clone()),
            cookie: self.cookie.read().clone(),
        };

        let saved = self.store.save(&credential);
        if let Err(e) = &saved {
            error!("Failed to persist session: {}", e);
        }
        *self.persist_error.write() = saved.err().map(|e| e.to_string());
    }
}

/// Authorization URL as the server expects it: scopes joined with a
/// space, client id and redirect target verbatim.
fn build_auth_url(config: &AuthConfig, scopes: &[String], redirect_uri: &str, state: &str) -> String {
    format!(
        "{}?response_type=code&client_id={}&scope={}&redirect_uri={}&state={}",
        config.auth_url,
        config.client_id,
        scopes.join(" "),
        redirect_uri,
        state
    )
}
