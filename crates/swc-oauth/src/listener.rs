//! Loopback HTTP listener for authorisation redirects
//!
//! The preferred detection strategy: the authorization server redirects
//! the browser to `http://localhost:{port}/` and the listener captures the
//! query string. Requests are never answered; the listener only reads.
//! (The browser's final GET goes unacknowledged. Preserved behavior.)

use std::time::Duration;
use swc_types::{SdkError, SdkResult};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

const REQUEST_HEAD_LIMIT: usize = 8192;
/// A connection that has not finished its request head by now is stalled
/// and must not hold up the accept loop.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Captures the first authorisation redirect on a loopback port.
///
/// Completion fires exactly once; the accept loop keeps running until
/// [`RedirectListener::stop`] (or drop).
pub struct RedirectListener {
    shutdown: Option<oneshot::Sender<()>>,
}

impl RedirectListener {
    /// Bind `http://localhost:{port}/` and start accepting in the
    /// background. The returned channel yields the query string of the
    /// first valid redirect.
    pub async fn listen_to(
        port: u16,
        auth_host: &str,
    ) -> SdkResult<(Self, oneshot::Receiver<String>)> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::Unsupported => SdkError::PlatformUnsupported,
                _ => SdkError::PortBindFailure { port, source: e },
            })?;

        debug!("Authorisation listener waiting on http://localhost:{}/", port);

        let (result_tx, result_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(accept_loop(
            listener,
            auth_host.to_string(),
            result_tx,
            shutdown_rx,
        ));

        Ok((
            Self {
                shutdown: Some(shutdown_tx),
            },
            result_rx,
        ))
    }

    /// Stop the listener. Idempotent and best-effort; teardown errors are
    /// swallowed.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
            debug!("Authorisation listener stopped");
        }
    }
}

impl Drop for RedirectListener {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    auth_host: String,
    result_tx: oneshot::Sender<String>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut result_tx = Some(result_tx);

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => return,
            accepted = listener.accept() => {
                let (mut socket, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Failed to accept redirect connection: {}", e);
                        continue;
                    }
                };

                // The browser may split the head across TCP segments.
                let head = match timeout(REQUEST_READ_TIMEOUT, read_request_head(&mut socket)).await {
                    Ok(head) if !head.is_empty() => head,
                    Ok(_) => continue,
                    Err(_) => {
                        debug!("Gave up on a stalled request from {}", peer);
                        continue;
                    }
                };

                let request = String::from_utf8_lossy(&head);
                match matching_query(&request, &auth_host) {
                    Some(query) => {
                        if let Some(tx) = result_tx.take() {
                            debug!("Authorisation redirect received from {}", peer);
                            let _ = tx.send(query);
                        }
                        // Keep accepting until stopped.
                    }
                    None => debug!("Ignoring request from {} that is not an authorisation redirect", peer),
                }
                // The socket drops without a response being written.
            }
        }
    }
}

/// Read until the blank line terminating the request head, connection
/// close, or the size limit. Read errors end the head early; whatever
/// arrived is still parsed.
async fn read_request_head(socket: &mut TcpStream) -> Vec<u8> {
    let mut head = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        match socket.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                head.extend_from_slice(&chunk[..n]);
                if head.windows(4).any(|w| w == b"\r\n\r\n") || head.len() >= REQUEST_HEAD_LIMIT {
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to read redirect request: {}", e);
                break;
            }
        }
    }

    head
}

/// Query string of the request, if it is a GET referred by the expected
/// authorization host. Anything else is ignored.
fn matching_query(request: &str, auth_host: &str) -> Option<String> {
    let mut lines = request.lines();
    let request_line = lines.next()?;

    let mut parts = request_line.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    if method != "GET" {
        return None;
    }

    let referer = lines
        .take_while(|line| !line.is_empty())
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("referer") {
                Some(value.trim().to_string())
            } else {
                None
            }
        })?;

    let referer_host = Url::parse(&referer).ok()?.host_str()?.to_string();
    if referer_host != auth_host {
        return None;
    }

    Some(
        target
            .split_once('?')
            .map(|(_, query)| query.to_string())
            .unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    const AUTH_HOST: &str = "dev.swcombine.net";

    fn free_port() -> u16 {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("can bind probe socket");
        probe.local_addr().expect("probe has an address").port()
    }

    async fn send_request(port: u16, request: &str) {
        let mut stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .expect("listener is accepting");
        stream
            .write_all(request.as_bytes())
            .await
            .expect("request is written");
        // Give the accept loop a chance to process before the socket drops.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn resolves_on_matching_redirect() {
        let port = free_port();
        let (_listener, rx) = RedirectListener::listen_to(port, AUTH_HOST).await.unwrap();

        send_request(
            port,
            "GET /?code=ABC123&state=s HTTP/1.1\r\n\
             Host: localhost\r\n\
             Referer: http://dev.swcombine.net/ws/oauth2/auth/\r\n\
             \r\n",
        )
        .await;

        let query = rx.await.expect("listener should resolve");
        assert_eq!(query, "code=ABC123&state=s");
    }

    #[tokio::test]
    async fn redirect_split_across_segments_still_resolves() {
        let port = free_port();
        let (_listener, rx) = RedirectListener::listen_to(port, AUTH_HOST).await.unwrap();

        let mut stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .expect("listener is accepting");
        stream
            .write_all(b"GET /?code=ABC123&state=s HTTP/1.1\r\nHost: localhost\r\n")
            .await
            .unwrap();
        // The rest of the head, Referer included, arrives later.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        stream
            .write_all(b"Referer: http://dev.swcombine.net/ws/oauth2/auth/\r\n\r\n")
            .await
            .unwrap();

        let query = rx.await.expect("split redirect must resolve");
        assert_eq!(query, "code=ABC123&state=s");
    }

    #[tokio::test]
    async fn bulky_cookie_header_does_not_hide_the_referer() {
        let port = free_port();
        let (_listener, rx) = RedirectListener::listen_to(port, AUTH_HOST).await.unwrap();

        let request = format!(
            "GET /?code=ABC123 HTTP/1.1\r\n\
             Host: localhost\r\n\
             Cookie: session={}\r\n\
             Referer: http://dev.swcombine.net/ws/oauth2/auth/\r\n\
             \r\n",
            "x".repeat(4000)
        );
        send_request(port, &request).await;

        let query = rx.await.expect("large head within the limit resolves");
        assert_eq!(query, "code=ABC123");
    }

    #[tokio::test]
    async fn foreign_referer_keeps_listening() {
        let port = free_port();
        let (_listener, mut rx) = RedirectListener::listen_to(port, AUTH_HOST).await.unwrap();

        send_request(
            port,
            "GET /?code=evil HTTP/1.1\r\n\
             Host: localhost\r\n\
             Referer: http://attacker.example/\r\n\
             \r\n",
        )
        .await;
        assert!(rx.try_recv().is_err(), "foreign referer must not resolve");

        send_request(
            port,
            "GET /?code=good HTTP/1.1\r\n\
             Host: localhost\r\n\
             Referer: http://dev.swcombine.net/ws/oauth2/auth/\r\n\
             \r\n",
        )
        .await;

        let query = rx.await.expect("subsequent valid redirect resolves");
        assert_eq!(query, "code=good");
    }

    #[tokio::test]
    async fn non_get_and_missing_referer_are_ignored() {
        let port = free_port();
        let (_listener, mut rx) = RedirectListener::listen_to(port, AUTH_HOST).await.unwrap();

        send_request(
            port,
            "POST /?code=X HTTP/1.1\r\n\
             Host: localhost\r\n\
             Referer: http://dev.swcombine.net/\r\n\
             \r\n",
        )
        .await;
        send_request(port, "GET /?code=X HTTP/1.1\r\nHost: localhost\r\n\r\n").await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn bind_failure_reports_port() {
        let port = free_port();
        let _occupier = TcpListener::bind(("127.0.0.1", port)).await.unwrap();

        let err = RedirectListener::listen_to(port, AUTH_HOST)
            .await
            .err()
            .expect("second bind must fail");
        match err {
            SdkError::PortBindFailure { port: failed, .. } => assert_eq!(failed, port),
            other => panic!("expected PortBindFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let port = free_port();
        let (mut listener, _rx) = RedirectListener::listen_to(port, AUTH_HOST).await.unwrap();

        listener.stop();
        listener.stop();

        // Loop has shut down; connections are refused or reset eventually.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(listener.shutdown.is_none());
    }
}
