//! Local HTTP listener that receives the OAuth redirect

use anyhow::{Context, Result};
use log::debug;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

/// Query parameters the identity provider appends to the redirect
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse from an HTTP request line such as
    /// `GET /signin-oidc?code=AUTH_CODE&state=xyz HTTP/1.1`
    pub fn from_request_line(request_line: &str) -> Option<Self> {
        let target = request_line.split_whitespace().nth(1)?;
        let url = url::Url::parse(&format!("http://localhost{}", target)).ok()?;

        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "code" => params.code = value,
                "state" => params.state = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                _ => {}
            }
        }
        Some(params)
    }

    /// Whether this request is the redirect rather than a stray browser fetch
    fn is_redirect(&self) -> bool {
        self.code.is_some() || self.error.is_some()
    }
}

/// Listener bound to a loopback port for the duration of one login
pub struct LoopbackListener {
    listener: TcpListener,
    port: u16,
}

impl LoopbackListener {
    /// Port range to try for the local callback server
    const PORT_RANGE_START: u16 = 8400;
    const PORT_RANGE_END: u16 = 8410;

    /// Bind the first free port in the range
    pub fn bind() -> Result<Self> {
        for port in Self::PORT_RANGE_START..=Self::PORT_RANGE_END {
            if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)) {
                return Ok(Self { listener, port });
            }
        }
        anyhow::bail!(
            "Could not bind to any port in range {}-{}",
            Self::PORT_RANGE_START,
            Self::PORT_RANGE_END
        )
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` as it appears in the redirect URI
    pub fn host(&self) -> String {
        format!("localhost:{}", self.port)
    }

    /// Wait for the redirect and return the authorization code
    ///
    /// Requests that carry neither `code` nor `error` (favicon and the like)
    /// get a 404 and waiting continues. Gives up after `timeout`.
    pub fn wait_for_code(&self, expected_state: &str, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        self.listener
            .set_nonblocking(true)
            .context("Failed to configure callback listener")?;

        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    if let Some(params) = Self::handle_request(stream)? {
                        return Self::code_from(params, expected_state);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        anyhow::bail!("Timed out waiting for the authorization redirect");
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => return Err(e).context("Failed to accept connection"),
            }
        }
    }

    /// Read one request, answer the browser, and return the redirect params
    fn handle_request(mut stream: TcpStream) -> Result<Option<CallbackParams>> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;

        let mut request_line = String::new();
        BufReader::new(&stream)
            .read_line(&mut request_line)
            .context("Failed to read request")?;

        let params = CallbackParams::from_request_line(&request_line).unwrap_or_default();
        if !params.is_redirect() {
            debug!("Ignoring non-redirect request: {}", request_line.trim());
            stream
                .write_all(b"HTTP/1.1 404 Not Found\r\nConnection: close\r\nContent-Length: 0\r\n\r\n")
                .ok();
            return Ok(None);
        }

        let (status, body) = if params.code.is_some() {
            ("200 OK", "Authentication successful! You can close this window.")
        } else {
            ("400 Bad Request", "Authentication failed. Please try again.")
        };
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{}</h1></body></html>",
            status, body
        );
        stream.write_all(response.as_bytes()).ok();
        Ok(Some(params))
    }

    fn code_from(params: CallbackParams, expected_state: &str) -> Result<String> {
        if let Some(err) = params.error {
            match params.error_description {
                Some(description) => anyhow::bail!("OAuth error: {} ({})", err, description),
                None => anyhow::bail!("OAuth error: {}", err),
            }
        }
        if params.state.as_deref() != Some(expected_state) {
            anyhow::bail!("OAuth state mismatch in redirect");
        }
        params.code.context("No authorization code received")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_code_and_state() {
        let params =
            CallbackParams::from_request_line("GET /signin-oidc?code=0.AXo%2Fabc&state=s1 HTTP/1.1\r\n")
                .unwrap();
        assert_eq!(params.code.as_deref(), Some("0.AXo/abc"));
        assert_eq!(params.state.as_deref(), Some("s1"));
        assert!(params.is_redirect());
    }

    #[test]
    fn test_parse_error() {
        let params = CallbackParams::from_request_line(
            "GET /?error=access_denied&error_description=user+declined HTTP/1.1",
        )
        .unwrap();
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert_eq!(params.error_description.as_deref(), Some("user declined"));

        let err = LoopbackListener::code_from(params, "s1").unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    #[test]
    fn test_favicon_is_not_redirect() {
        let params = CallbackParams::from_request_line("GET /favicon.ico HTTP/1.1").unwrap();
        assert!(!params.is_redirect());
    }

    #[test]
    fn test_state_mismatch_rejected() {
        let params = CallbackParams {
            code: Some("c".into()),
            state: Some("other".into()),
            ..Default::default()
        };
        assert!(LoopbackListener::code_from(params, "s1").is_err());
    }

    #[test]
    fn test_wait_for_code_over_socket() {
        let listener = LoopbackListener::bind().unwrap();
        let port = listener.port();

        let client = std::thread::spawn(move || {
            let mut favicon = TcpStream::connect(("127.0.0.1", port)).unwrap();
            favicon.write_all(b"GET /favicon.ico HTTP/1.1\r\n\r\n").unwrap();
            drop(favicon);
            let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
            stream
                .write_all(b"GET /signin-oidc?code=abc&state=s1 HTTP/1.1\r\n\r\n")
                .unwrap();
        });

        let code = listener.wait_for_code("s1", Duration::from_secs(5)).unwrap();
        client.join().unwrap();
        assert_eq!(code, "abc");
    }
}
