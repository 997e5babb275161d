//! Capability interface over the interactive browser surface
//!
//! The flow never renders anything itself. Whatever embedded web view the
//! host app uses only has to navigate, report completed navigations,
//! expose its cookie, and close.

use swc_types::SdkResult;
use tokio::sync::{mpsc, oneshot};
use url::Url;

/// An interactive browser surface the user authenticates in.
///
/// Navigation and close events are delivered on channels so the flow can
/// await them from its own task; implementations fire the closed signal on
/// any close, user-driven or programmatic, and the flow tells the two
/// apart by when the signal arrives.
pub trait BrowserSurface: Send + Sync {
    /// Point the surface at a URL.
    fn navigate(&self, url: &str) -> SdkResult<()>;

    /// Subscribe to completed navigations.
    fn subscribe_navigations(&self) -> mpsc::UnboundedReceiver<Url>;

    /// Fires once when the surface is closed.
    fn subscribe_closed(&self) -> oneshot::Receiver<()>;

    /// Current cookie value of the surface's document, if any.
    fn cookie(&self) -> Option<String>;

    /// Pre-seed the surface's cookie, saving the user a login if a valid
    /// session exists.
    fn set_cookie(&self, cookie: &str);

    /// Close the surface.
    fn close(&self);
}
