//! HTTP access to the accounting platform's REST API.
//!
//! Response bodies are returned verbatim. The remote API does not reliably
//! signal failures through status codes, so a call is considered failed when
//! its body contains the literal text `error` (see [`indicates_failure`]).

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};

pub const DEFAULT_USER_AGENT: &str = concat!("tax-rate-sync/", env!("CARGO_PKG_VERSION"));

const FAILURE_MARKER: &str = "error";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// True when a response body reports a failure.
///
/// This is a plain case-sensitive substring check: any body containing
/// `error` anywhere counts as failed.
pub fn indicates_failure(body: &str) -> bool {
    body.contains(FAILURE_MARKER)
}

/// One authenticated conversation with the remote API.
#[async_trait]
pub trait TaxApi: Send + Sync {
    /// POSTs the login payload and returns the response body.
    async fn login(&self, url: &str, payload: String) -> Result<String, GatewayError>;

    /// PUTs one tax schedule update and returns the response body.
    async fn submit_update(&self, url: &str, payload: String) -> Result<String, GatewayError>;
}

/// Opens a fresh [`TaxApi`] session for each update cycle.
pub trait ApiConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn TaxApi>, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct HttpConnector {
    user_agent: String,
}

impl HttpConnector {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

impl ApiConnector for HttpConnector {
    fn connect(&self) -> Result<Box<dyn TaxApi>, GatewayError> {
        Ok(Box::new(HttpGateway::new(&self.user_agent)?))
    }
}

/// `reqwest` client with the fixed headers and a cookie store, so the session
/// cookie set by the login call authenticates the updates that follow.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
}

impl HttpGateway {
    pub fn new(user_agent: &str) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .cookie_store(true)
            .build()
            .map_err(GatewayError::Client)?;

        Ok(Self { client })
    }

    async fn send(
        &self,
        request: RequestBuilder,
        url: &str,
        payload: String,
    ) -> Result<String, GatewayError> {
        let transport = |source| GatewayError::Transport {
            url: url.to_string(),
            source,
        };

        let response = request
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .body(payload)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let body = response.text().await.map_err(transport)?;

        tracing::debug!(%url, %status, bytes = body.len(), "received API response");
        Ok(body)
    }
}

#[async_trait]
impl TaxApi for HttpGateway {
    async fn login(&self, url: &str, payload: String) -> Result<String, GatewayError> {
        self.send(self.client.post(url), url, payload).await
    }

    async fn submit_update(&self, url: &str, payload: String) -> Result<String, GatewayError> {
        self.send(self.client.put(url), url, payload).await
    }
}
