use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};
use url::Url;

const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_REQUEST_BYTES: usize = 8192;

#[derive(Debug, Clone)]
pub struct PresentationRequest {
    pub authorization_url: Url,
    pub callback_scheme: String,
    /// Ask the browser not to reuse cookies or an existing login.
    pub ephemeral: bool,
}

/// Interactive surface that shows the authorization page and hands back the
/// URL the provider redirected to.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn present(&self, request: PresentationRequest) -> Result<Url, InfraError>;
}

/// Receives the redirect on the loopback `redirect_uri` the application is
/// registered with. The authorization URL is logged for the user to open.
#[derive(Debug, Clone)]
pub struct LoopbackBrowserSession {
    redirect_uri: Url,
    timeout: Duration,
}

impl LoopbackBrowserSession {
    pub fn new(redirect_uri: &str) -> Result<Self, InfraError> {
        let redirect_uri = Url::parse(redirect_uri)
            .map_err(|error| InfraError::InvalidUrl(format!("redirect uri: {error}")))?;
        if redirect_uri.host_str().is_none() {
            return Err(InfraError::InvalidUrl(format!(
                "redirect uri has no host: {redirect_uri}"
            )));
        }
        Ok(Self {
            redirect_uri,
            timeout: DEFAULT_CALLBACK_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn bind_address(&self) -> Result<(String, u16), InfraError> {
        let host = self
            .redirect_uri
            .host_str()
            .ok_or_else(|| InfraError::InvalidUrl("redirect uri has no host".to_string()))?;
        let port = self
            .redirect_uri
            .port_or_known_default()
            .ok_or_else(|| InfraError::InvalidUrl("redirect uri has no port".to_string()))?;
        Ok((host.trim_matches(['[', ']']).to_string(), port))
    }

    async fn accept_callback(&self, listener: &TcpListener) -> Result<Url, InfraError> {
        loop {
            let (mut stream, peer) = listener.accept().await?;
            debug!(%peer, "loopback connection accepted");

            let mut buffer = vec![0u8; MAX_REQUEST_BYTES];
            let read = stream.read(&mut buffer).await?;
            let request = String::from_utf8_lossy(&buffer[..read]);

            let Some(target) = request_target(&request) else {
                respond(&mut stream, "400 Bad Request", "Malformed request").await?;
                continue;
            };
            // Browsers also ask for a favicon; only the redirect carries a query.
            if !target.contains('?') {
                respond(&mut stream, "404 Not Found", "Not found").await?;
                continue;
            }

            let callback = self
                .redirect_uri
                .join(target)
                .map_err(|error| InfraError::InvalidUrl(format!("callback target: {error}")))?;
            let code = callback
                .query_pairs()
                .find(|(key, _)| key == "code")
                .map(|(_, value)| value.into_owned());
            let body = match code {
                Some(code) => format!("Authorization Code: {code}"),
                None => "Authorization was not granted. You can close this window.".to_string(),
            };
            respond(&mut stream, "200 OK", &body).await?;
            return Ok(callback);
        }
    }
}

#[async_trait]
impl BrowserSession for LoopbackBrowserSession {
    async fn present(&self, request: PresentationRequest) -> Result<Url, InfraError> {
        if request.callback_scheme != self.redirect_uri.scheme() {
            return Err(InfraError::Authorization(format!(
                "callback scheme {} does not match redirect uri {}",
                request.callback_scheme, self.redirect_uri
            )));
        }

        let (host, port) = self.bind_address()?;
        let listener = TcpListener::bind((host.as_str(), port)).await?;
        info!(
            url = %request.authorization_url,
            ephemeral = request.ephemeral,
            "open the authorization URL in a browser to log in to TickTick"
        );

        tokio::time::timeout(self.timeout, self.accept_callback(&listener))
            .await
            .map_err(|_| {
                InfraError::Authorization("timed out waiting for the authorization callback".to_string())
            })?
    }
}

/// Extracts the request target from an HTTP/1.x request line.
fn request_target(request: &str) -> Option<&str> {
    let request_line = request.lines().next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    let version = parts.next()?;
    if method != "GET" || !version.starts_with("HTTP/") || !target.starts_with('/') {
        return None;
    }
    Some(target)
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) -> Result<(), InfraError> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_target_reads_get_request_line() {
        let request = "GET /?code=abc&state=xyz HTTP/1.1\r\nHost: 127.0.0.1:8080\r\n\r\n";
        assert_eq!(request_target(request), Some("/?code=abc&state=xyz"));
    }

    #[test]
    fn request_target_rejects_other_requests() {
        assert_eq!(request_target("POST / HTTP/1.1\r\n\r\n"), None);
        assert_eq!(request_target("GET\r\n"), None);
        assert_eq!(request_target("garbage"), None);
        assert_eq!(request_target(""), None);
    }

    #[test]
    fn redirect_uri_without_host_is_rejected() {
        assert!(matches!(
            LoopbackBrowserSession::new("mailto:someone@example.com"),
            Err(InfraError::InvalidUrl(_))
        ));
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .expect("bind ephemeral port")
            .local_addr()
            .expect("local addr")
            .port()
    }

    async fn send_request(port: u16, request: &str) -> String {
        let mut attempts = 0;
        let mut stream = loop {
            match TcpStream::connect(("127.0.0.1", port)).await {
                Ok(stream) => break stream,
                Err(error) if attempts < 100 => {
                    attempts += 1;
                    debug!(%error, "listener not ready yet");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(error) => panic!("could not connect to loopback listener: {error}"),
            }
        };
        stream.write_all(request.as_bytes()).await.expect("write request");
        let mut response = String::new();
        stream.read_to_string(&mut response).await.expect("read response");
        response
    }

    #[tokio::test]
    async fn loopback_session_returns_callback_url() {
        let port = free_port();
        let session = LoopbackBrowserSession::new(&format!("http://127.0.0.1:{port}"))
            .expect("session")
            .with_timeout(Duration::from_secs(5));
        let request = PresentationRequest {
            authorization_url: Url::parse("https://ticktick.com/oauth/authorize?state=s1")
                .expect("valid url"),
            callback_scheme: "http".to_string(),
            ephemeral: true,
        };

        let presented = tokio::spawn(async move { session.present(request).await });

        let favicon = send_request(port, "GET /favicon.ico HTTP/1.1\r\n\r\n").await;
        assert!(favicon.starts_with("HTTP/1.1 404"));
        let callback = send_request(port, "GET /?code=abc123&state=s1 HTTP/1.1\r\n\r\n").await;
        assert!(callback.starts_with("HTTP/1.1 200"));
        assert!(callback.ends_with("Authorization Code: abc123"));

        let url = presented.await.expect("join").expect("callback url");
        assert_eq!(url.as_str(), format!("http://127.0.0.1:{port}/?code=abc123&state=s1"));
    }

    #[tokio::test]
    async fn mismatched_callback_scheme_fails_without_listening() {
        let session = LoopbackBrowserSession::new("http://127.0.0.1:8080").expect("session");
        let request = PresentationRequest {
            authorization_url: Url::parse("https://ticktick.com/oauth/authorize").expect("valid url"),
            callback_scheme: "ticktick".to_string(),
            ephemeral: true,
        };
        assert!(matches!(
            session.present(request).await,
            Err(InfraError::Authorization(_))
        ));
    }
}
