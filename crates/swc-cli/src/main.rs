//! Console demo for the authorisation flow
//!
//! Opens the system browser on the authorization endpoint and waits for
//! the loopback listener to capture the redirect. The system browser
//! cannot report navigations or cookies, so the listener is the only
//! detector that can resolve the attempt here; embedded web views get the
//! full fallback behavior.

use std::sync::Arc;

use clap::Parser;
use parking_lot::Mutex;
use swc_oauth::{AuthConfig, AuthFlowManager, BrowserSurface};
use swc_types::{SdkError, SdkResult};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

#[derive(Parser)]
#[command(name = "swc-auth", about = "Authorise an app against the SWCombine web services")]
struct Args {
    /// Client id for the app
    #[arg(long)]
    client_id: String,

    /// Client secret for the app
    #[arg(long)]
    client_secret: String,

    /// Loopback port to listen on for the authorisation redirect
    #[arg(long, default_value_t = 8150)]
    port: u16,

    /// Requested scope; repeat for multiple scopes
    #[arg(long = "scope", default_values_t = vec!["character_read".to_string()])]
    scopes: Vec<String>,

    /// Opaque state payload round-tripped through the flow
    #[arg(long, default_value = "test key;value")]
    state: String,

    /// App is on a shared machine; do not save session data
    #[arg(long)]
    shared: bool,
}

/// The user's default browser as a [`BrowserSurface`].
///
/// Navigation into it is a one-way street: there are no navigation or
/// close events and no cookie access, which is exactly the capability set
/// a detached system browser has.
#[derive(Default)]
struct SystemBrowser {
    // Held so the subscriptions stay open without ever firing.
    nav_senders: Mutex<Vec<mpsc::UnboundedSender<Url>>>,
    close_senders: Mutex<Vec<oneshot::Sender<()>>>,
}

impl BrowserSurface for SystemBrowser {
    fn navigate(&self, url: &str) -> SdkResult<()> {
        open::that(url).map_err(|e| SdkError::Internal(format!("Failed to open browser: {}", e)))
    }

    fn subscribe_navigations(&self) -> mpsc::UnboundedReceiver<Url> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.nav_senders.lock().push(tx);
        rx
    }

    fn subscribe_closed(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.close_senders.lock().push(tx);
        rx
    }

    fn cookie(&self) -> Option<String> {
        None
    }

    fn set_cookie(&self, _cookie: &str) {
        debug!("System browser manages its own cookies");
    }

    fn close(&self) {
        debug!("System browser stays open; nothing to close");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "swc=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = AuthConfig::new(
        args.client_id,
        args.client_secret,
        Some(args.port),
        args.shared,
    );
    let manager = AuthFlowManager::initialise(config)?;

    info!("Opening browser for authorisation...");
    let surface: Arc<dyn BrowserSurface> = Arc::new(SystemBrowser::default());
    let result = manager
        .attempt_authorise(surface, &args.scopes, &args.state)
        .await?;

    println!("Authorise Result: {}", result.display_reason());
    if let Some(state) = result.state {
        println!("Returned state: {}", state);
    }
    if let Some(character) = manager.character() {
        println!("Authorised on behalf of {}", character);
    }

    Ok(())
}
