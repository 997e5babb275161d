//! Fallback redirect detection via the surface's own navigation events

use crate::surface::BrowserSurface;
use crate::types::{CALLBACK_CODE_PATH, CALLBACK_ERROR_PATH};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// What the monitor saw when a callback navigation landed.
#[derive(Debug, Clone)]
pub struct MonitorEvent {
    /// Raw query string of the callback URL.
    pub query: String,
    /// Cookie captured from the surface before the attempt resolves, for
    /// reuse on a later attempt.
    pub cookie: Option<String>,
}

/// Watches completed navigations for the authorization server's callback
/// paths. Used when no loopback listener is available.
pub struct BrowserMonitor {
    task: JoinHandle<()>,
}

impl BrowserMonitor {
    /// Start watching the surface. The returned channel fires at most
    /// once, on the first navigation to a recognized callback path.
    pub fn watch(surface: Arc<dyn BrowserSurface>) -> (Self, oneshot::Receiver<MonitorEvent>) {
        let (tx, rx) = oneshot::channel();
        let mut navigations = surface.subscribe_navigations();

        let task = tokio::spawn(async move {
            while let Some(url) = navigations.recv().await {
                if url.path() != CALLBACK_CODE_PATH && url.path() != CALLBACK_ERROR_PATH {
                    // User is still browsing or authenticating.
                    debug!("Ignoring navigation to {}", url.path());
                    continue;
                }

                // Grab the session cookie before anything tears the
                // surface down.
                let cookie = surface.cookie();
                let query = url.query().unwrap_or_default().to_string();
                let _ = tx.send(MonitorEvent { query, cookie });
                return;
            }
        });

        (Self { task }, rx)
    }
}

impl Drop for BrowserMonitor {
    // Teardown is just unsubscribing; the monitor owns no external
    // resources.
    fn drop(&mut self) {
        self.task.abort();
    }
}
