//! HTTP client with XSRF token handling.
//!
//! Wraps reqwest with:
//! - Optional attachment of the trusted anti-forgery token
//! - A single transparent retry when the server rejects the token and hands
//!   out a fresh one
//!
//! Responses are returned as-is; HTTP status is never turned into an error
//! here.

use crate::config::NetworkConfig;
use crate::token::TokenCache;
use crate::value::QueryParams;
use crate::{BridgeError, Result};
use bytes::Bytes;
use reqwest::{header, Client, Method, RequestBuilder, Response};
use std::sync::Arc;
use tracing::{debug, warn};

/// Request payload.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(serde_json::Value),
    /// Sent as `application/x-www-form-urlencoded`.
    Form(QueryParams),
    Bytes(Bytes),
    Text(String),
}

/// Per-request options.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    /// Attach the trusted XSRF token and refresh it once on rejection.
    pub use_trusted_token: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: Vec::new(),
            body: None,
            use_trusted_token: false,
        }
    }
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post() -> Self {
        Self::default().with_method(Method::POST)
    }

    pub fn delete() -> Self {
        Self::default().with_method(Method::DELETE)
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn with_form(mut self, form: QueryParams) -> Self {
        self.body = Some(RequestBody::Form(form));
        self
    }

    pub fn with_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(RequestBody::Bytes(body.into()));
        self
    }

    pub fn with_text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(body.into()));
        self
    }

    pub fn with_trusted_token(mut self) -> Self {
        self.use_trusted_token = true;
        self
    }
}

/// HTTP client that shares the runtime's [`TokenCache`].
#[derive(Debug, Clone)]
pub struct ResilientFetch {
    client: Client,
    tokens: Arc<TokenCache>,
}

impl ResilientFetch {
    /// Create a client with a cookie store and the default timeout.
    pub fn new(tokens: Arc<TokenCache>) -> Result<Self> {
        let client = Client::builder()
            .timeout(NetworkConfig::REQUEST_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT)
            .cookie_store(true)
            .build()
            .map_err(|e| BridgeError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: None,
            })?;

        Ok(Self::with_client(client, tokens))
    }

    pub fn with_client(client: Client, tokens: Arc<TokenCache>) -> Self {
        Self { client, tokens }
    }

    pub fn tokens(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    /// Issue a request, retrying once if the attached token was rejected.
    ///
    /// The retry happens only when `use_trusted_token` is set, the status is
    /// 403 and the response carries a fresh token. Whatever the second
    /// attempt returns is returned unchanged.
    pub async fn request(&self, url: &str, mut options: RequestOptions) -> Result<Response> {
        let use_token = std::mem::take(&mut options.use_trusted_token);
        let attached = if use_token { self.tokens.current() } else { None };

        let response = self.dispatch(url, &options, attached.as_deref()).await?;

        if !use_token || response.status() != NetworkConfig::XSRF_REJECTED_STATUS {
            return Ok(response);
        }

        let fresh = match response
            .headers()
            .get(NetworkConfig::XSRF_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            Some(fresh) => fresh.to_string(),
            None => return Ok(response),
        };

        warn!(
            "{} {} rejected the XSRF token, retrying with a fresh one",
            options.method, url
        );
        self.tokens.rotate(attached.as_deref(), &fresh);

        self.dispatch(url, &options, Some(&fresh)).await
    }

    async fn dispatch(
        &self,
        url: &str,
        options: &RequestOptions,
        token: Option<&str>,
    ) -> Result<Response> {
        let mut request = self.client.request(options.method.clone(), url);

        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        if let Some(token) = token {
            request = request.header(NetworkConfig::XSRF_HEADER, token);
        }

        request = apply_body(request, options.body.as_ref());

        debug!("{} {}", options.method, url);

        request.send().await.map_err(|e| {
            if e.is_timeout() {
                BridgeError::Timeout
            } else {
                BridgeError::Network {
                    message: format!("{} {} failed: {}", options.method, url, e),
                    cause: Some(e.to_string()),
                }
            }
        })
    }
}

fn apply_body(request: RequestBuilder, body: Option<&RequestBody>) -> RequestBuilder {
    match body {
        None => request,
        Some(RequestBody::Json(json)) => request.json(json),
        Some(RequestBody::Form(form)) => request
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form.to_string()),
        Some(RequestBody::Bytes(data)) => request.body(data.clone()),
        Some(RequestBody::Text(text)) => request.body(text.clone()),
    }
}
