use std::time::Duration;

use drivebatch_core::{OAuthClient, OAuthToken};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

use crate::config::OAUTH_SCOPES;

const SUCCESS_RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nConnection: close\r\n\r\n\
    <html><body><h2>Authentication successful</h2><p>You can now close this window.</p></body></html>";

const FAILURE_RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nConnection: close\r\n\r\n\
    <html><body><h2>Authorization failed</h2><p>Return to the app and try again.</p></body></html>";

#[derive(Debug, Error)]
pub enum OAuthFlowError {
    #[error("oauth error: {0}")]
    OAuth(#[from] drivebatch_core::OAuthError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("authorization code missing in redirect")]
    MissingCode,
    #[error("authorization was denied: {0}")]
    ConsentDenied(String),
    #[error("authorization timed out")]
    Timeout,
}

/// Interactive consent flow: opens the provider's consent page and waits
/// for the redirect on the registered loopback port.
pub struct ConsentFlow {
    port: u16,
    timeout: Duration,
    open_browser: bool,
}

impl ConsentFlow {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self {
            port,
            timeout,
            open_browser: true,
        }
    }

    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/oauth2callback", self.port)
    }

    pub async fn authenticate(&self, oauth: &OAuthClient) -> Result<OAuthToken, OAuthFlowError> {
        let redirect_uri = self.redirect_uri();
        // Bind before presenting the URL so the redirect cannot race the
        // listener. The listener is dropped on every exit path, releasing
        // the fixed port for the next attempt.
        let listener = TcpListener::bind(("127.0.0.1", self.port)).await?;
        let url = oauth.authorize_url(&redirect_uri, OAUTH_SCOPES, None)?;
        self.present_consent_url(&url);

        let code = self.wait_for_code(&listener).await?;
        let token = oauth.exchange_code(&code, Some(&redirect_uri)).await?;
        Ok(token)
    }

    fn present_consent_url(&self, url: &Url) {
        if self.open_browser && webbrowser::open(url.as_str()).is_ok() {
            return;
        }
        tracing::info!("open this URL in your browser to continue: {url}");
        println!("Open this URL in your browser:\n{url}");
    }

    async fn wait_for_code(&self, listener: &TcpListener) -> Result<String, OAuthFlowError> {
        let (mut stream, _) = tokio::time::timeout(self.timeout, listener.accept())
            .await
            .map_err(|_| OAuthFlowError::Timeout)??;

        let mut request = vec![0u8; 8192];
        let read = tokio::time::timeout(Duration::from_secs(10), stream.read(&mut request))
            .await
            .map_err(|_| OAuthFlowError::Timeout)??;
        let request_text = String::from_utf8_lossy(&request[..read]);
        let result = parse_callback_request(&request_text);

        let page = if result.is_ok() {
            SUCCESS_RESPONSE
        } else {
            FAILURE_RESPONSE
        };
        let _ = stream.write_all(page).await;
        let _ = stream.shutdown().await;

        result
    }
}

fn parse_callback_request(request: &str) -> Result<String, OAuthFlowError> {
    let request_line = request.lines().next().ok_or(OAuthFlowError::MissingCode)?;
    let target = request_line
        .split_whitespace()
        .nth(1)
        .ok_or(OAuthFlowError::MissingCode)?;
    let request_url = if target.starts_with("http://") || target.starts_with("https://") {
        Url::parse(target).map_err(|_| OAuthFlowError::MissingCode)?
    } else {
        Url::parse(&format!("http://localhost{target}")).map_err(|_| OAuthFlowError::MissingCode)?
    };

    if let Some(reason) = request_url
        .query_pairs()
        .find_map(|(key, value)| (key == "error" && !value.is_empty()).then(|| value.into_owned()))
    {
        return Err(OAuthFlowError::ConsentDenied(reason));
    }

    request_url
        .query_pairs()
        .find_map(|(key, value)| (key == "code" && !value.is_empty()).then(|| value.into_owned()))
        .ok_or(OAuthFlowError::MissingCode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn extracts_code_from_request_line() {
        let req = "GET /oauth2callback?code=abc123&state=xyz HTTP/1.1\r\nHost: localhost\r\n\r\n";
        assert_eq!(parse_callback_request(req).unwrap(), "abc123");
    }

    #[test]
    fn missing_code_is_an_error() {
        let req = "GET /oauth2callback?state=xyz HTTP/1.1\r\nHost: localhost\r\n\r\n";
        assert!(matches!(
            parse_callback_request(req),
            Err(OAuthFlowError::MissingCode)
        ));
    }

    #[test]
    fn denied_consent_is_reported_with_the_provider_reason() {
        let req = "GET /oauth2callback?error=access_denied HTTP/1.1\r\nHost: localhost\r\n\r\n";
        assert!(matches!(
            parse_callback_request(req),
            Err(OAuthFlowError::ConsentDenied(ref reason)) if reason == "access_denied"
        ));
    }

    #[tokio::test]
    async fn authenticate_round_trips_the_loopback_callback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("code=auth-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "token-1",
                "token_type": "Bearer",
                "expires_in": 3599,
                "refresh_token": "refresh-1"
            })))
            .mount(&server)
            .await;

        let oauth = OAuthClient::with_base_url(&server.uri(), "client-id", "secret").unwrap();
        let flow = ConsentFlow::new(18432, Duration::from_secs(5)).without_browser();

        let auth = tokio::spawn(async move { flow.authenticate(&oauth).await });

        // Simulate the browser redirect hitting the loopback listener.
        let mut stream = connect_with_retry("127.0.0.1:18432").await;
        stream
            .write_all(
                b"GET /oauth2callback?code=auth-code HTTP/1.1\r\nHost: localhost\r\n\r\n",
            )
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.contains("Authentication successful"));

        let token = auth.await.unwrap().unwrap();
        assert_eq!(token.access_token, "token-1");
        assert_eq!(token.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn denied_redirect_fails_the_flow() {
        let server = MockServer::start().await;
        let oauth = OAuthClient::with_base_url(&server.uri(), "client-id", "secret").unwrap();
        let flow = ConsentFlow::new(18433, Duration::from_secs(5)).without_browser();

        let auth = tokio::spawn(async move { flow.authenticate(&oauth).await });

        let mut stream = connect_with_retry("127.0.0.1:18433").await;
        stream
            .write_all(
                b"GET /oauth2callback?error=access_denied HTTP/1.1\r\nHost: localhost\r\n\r\n",
            )
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.contains("Authorization failed"));

        assert!(matches!(
            auth.await.unwrap(),
            Err(OAuthFlowError::ConsentDenied(_))
        ));
    }

    async fn connect_with_retry(addr: &str) -> tokio::net::TcpStream {
        for _ in 0..50 {
            if let Ok(stream) = tokio::net::TcpStream::connect(addr).await {
                return stream;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("listener never came up on {addr}");
    }
}
