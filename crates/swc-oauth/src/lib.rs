//! OAuth 2.0 authorization-code flow for the Star Wars Combine web services
//!
//! The flow manager opens an interactive browser surface on the
//! authorization endpoint and races two detectors for the redirect that
//! carries the authorization code: a loopback HTTP listener (preferred,
//! used when a port is configured and bindable) and a monitor over the
//! surface's own navigation events (fallback, using the out-of-band
//! redirect sentinel). Whichever fires first resolves the attempt exactly
//! once; the code is then exchanged for tokens and the session persisted
//! for the next start.
//!
//! The browser surface itself is an external collaborator behind the
//! narrow [`BrowserSurface`] trait, so any embedded web view (or a
//! headless test double) can drive the flow.

pub mod callback;
pub mod flow_manager;
pub mod listener;
pub mod monitor;
pub mod surface;
pub mod token_exchange;
pub mod types;

pub use callback::CallbackPayload;
pub use flow_manager::AuthFlowManager;
pub use listener::RedirectListener;
pub use monitor::BrowserMonitor;
pub use surface::BrowserSurface;
pub use token_exchange::TokenExchanger;
pub use types::{AuthConfig, AuthOutcome, CompletionResult, OAuthToken};
