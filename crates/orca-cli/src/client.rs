//! Minimal HTTP/1.1 client for the orcad REST API.

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Empty};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Connection target parsed from `--api`.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// `host:port` to connect to.
    authority: String,
    /// Path prefix of the API, without trailing `/`.
    base_path: String,
}

/// A complete response.
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub location: Option<String>,
    pub body: Bytes,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<String>,
}

impl ApiClient {
    pub fn new(api_url: &str) -> Result<Self> {
        let uri: http::Uri = api_url
            .parse()
            .with_context(|| format!("invalid API url {api_url:?}"))?;
        match uri.scheme_str() {
            Some("http") => {}
            Some(other) => bail!("unsupported scheme {other:?} in API url, only http is supported"),
            None => bail!("API url {api_url:?} needs an http:// scheme"),
        }
        let host = uri
            .host()
            .with_context(|| format!("API url {api_url:?} has no host"))?;
        let port = uri.port_u16().unwrap_or(80);
        Ok(Self {
            authority: format!("{host}:{port}"),
            base_path: uri.path().trim_end_matches('/').to_string(),
        })
    }

    /// Send a body-less request to `path` (relative to the API root).
    pub async fn send(&self, method: Method, path: &str) -> Result<Reply> {
        let target = format!("{}{path}", self.base_path);
        let stream = tokio::net::TcpStream::connect(&self.authority)
            .await
            .with_context(|| format!("failed to connect to {}", self.authority))?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "API connection closed with error");
            }
        });

        let req = http::Request::builder()
            .method(method.clone())
            .uri(&target)
            .header("host", &self.authority)
            .header("accept", "application/json")
            .header("user-agent", "orca-cli/0.1")
            .body(Empty::<Bytes>::new())?;

        let resp = sender
            .send_request(req)
            .await
            .with_context(|| format!("{method} {target} failed"))?;
        let status = resp.status();
        let location = resp
            .headers()
            .get(http::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.into_body().collect().await?.to_bytes();
        debug!(%method, %target, %status, "API request completed");

        Ok(Reply {
            status,
            location,
            body,
        })
    }
}

impl Reply {
    /// Error message from the `{ success: false, error }` envelope, if any.
    pub fn error_message(&self) -> Option<String> {
        serde_json::from_slice::<ErrorEnvelope>(&self.body)
            .ok()
            .and_then(|envelope| envelope.error)
    }

    /// Status line text, e.g. `404 Not Found`.
    pub fn status_line(&self) -> String {
        match self.status.canonical_reason() {
            Some(reason) => format!("{} {reason}", self.status.as_u16()),
            None => self.status.as_u16().to_string(),
        }
    }

    /// Fail unless the response has status `expected`.
    ///
    /// The server's error message, when present, is printed to stderr first.
    pub fn expect_status(&self, expected: StatusCode) -> Result<()> {
        if self.status == expected {
            return Ok(());
        }
        if let Some(message) = self.error_message() {
            eprintln!("Error: {message}");
        }
        bail!(
            "Expecting HTTP Status code {} got {}, reason {:?}",
            expected.as_u16(),
            self.status.as_u16(),
            self.status_line()
        )
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).context("malformed response body")
    }

    /// Location header of a `202 Accepted` reply.
    pub fn require_location(&self) -> Result<&str> {
        self.location
            .as_deref()
            .context("response carries no Location header")
    }
}
