//! HTTP dispatch for proxied and direct attempts
//!
//! The executor talks to the network through the [`Transport`] trait; the
//! production implementation rides on reqwest. Proxy configuration binds at
//! client construction, so proxied clients are cached per endpoint key.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};
use tracing::debug;

use crate::error::{DetourError, Result};
use crate::models::ProxyEndpoint;

/// Overall timeout a request carries when the caller does not set one
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("detour/", env!("CARGO_PKG_VERSION"));

/// One logical HTTP request
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Overall per-dispatch timeout
    pub timeout: Duration,
}

impl ProxyRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        let mut request = Self::new(Method::POST, url);
        request.body = Some(body.into());
        request
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Rewrite as a GET with the body folded into the query string
    ///
    /// Used when an exit rejects the method: the body (assumed to be
    /// form-encoded text) lands on the URL query, the body itself is
    /// dropped, and the framing headers go with it.
    pub(crate) fn to_query_get(&self) -> Result<ProxyRequest> {
        let mut url = url::Url::parse(&self.url)
            .map_err(|e| DetourError::InvalidRequest(format!("invalid url '{}': {}", self.url, e)))?;

        if let Some(body) = &self.body {
            if !body.is_empty() {
                let text = std::str::from_utf8(body).map_err(|_| {
                    DetourError::InvalidRequest("request body is not valid UTF-8".to_string())
                })?;
                let merged = match url.query() {
                    Some(existing) if !existing.is_empty() => format!("{existing}&{text}"),
                    _ => text.to_string(),
                };
                url.set_query(Some(&merged));
            }
        }

        let mut headers = self.headers.clone();
        headers.remove(CONTENT_TYPE);
        headers.remove(CONTENT_LENGTH);

        Ok(ProxyRequest {
            method: Method::GET,
            url: url.to_string(),
            headers,
            body: None,
            timeout: self.timeout,
        })
    }
}

/// Response from one dispatch, body fully buffered
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Dispatch seam between the executor and the HTTP stack
///
/// `via` selects the forward proxy; `None` dispatches directly. Errors are
/// transport-level only (network failure or timeout); any HTTP response,
/// success or not, comes back as a [`ProxyResponse`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dispatch(
        &self,
        request: &ProxyRequest,
        via: Option<&ProxyEndpoint>,
    ) -> Result<ProxyResponse>;
}

/// reqwest-backed production transport
pub struct HttpTransport {
    direct: reqwest::Client,
    proxied: DashMap<String, reqwest::Client>,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        Ok(Self {
            direct: Self::builder()
                .build()
                .map_err(|e| DetourError::InvalidConfig(format!("failed to build HTTP client: {e}")))?,
            proxied: DashMap::new(),
        })
    }

    fn builder() -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(USER_AGENT)
            .tcp_nodelay(true)
    }

    fn client_for(&self, endpoint: &ProxyEndpoint) -> Result<reqwest::Client> {
        let key = endpoint.key();
        if let Some(client) = self.proxied.get(&key) {
            return Ok(client.clone());
        }

        let mut proxy = reqwest::Proxy::all(endpoint.base_url())
            .map_err(|e| DetourError::InvalidConfig(format!("proxy url for {key}: {e}")))?;
        if let (Some(user), Some(pass)) = (&endpoint.username, &endpoint.password) {
            proxy = proxy.basic_auth(user, pass);
        }

        let client = Self::builder()
            .proxy(proxy)
            .build()
            .map_err(|e| DetourError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        debug!(endpoint = %key, "Built proxied client");
        self.proxied.insert(key, client.clone());
        Ok(client)
    }

    #[cfg(test)]
    fn cached_clients(&self) -> usize {
        self.proxied.len()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn dispatch(
        &self,
        request: &ProxyRequest,
        via: Option<&ProxyEndpoint>,
    ) -> Result<ProxyResponse> {
        let client = match via {
            Some(endpoint) => self.client_for(endpoint)?,
            None => self.direct.clone(),
        };

        let mut builder = client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone())
            .timeout(request.timeout);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e, request.timeout))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| classify_reqwest_error(&e, request.timeout))?;

        let via_label = via.map(|e| e.key()).unwrap_or_else(|| "direct".to_string());
        debug!(status = status.as_u16(), via = %via_label, "Dispatch complete");

        Ok(ProxyResponse {
            status,
            headers,
            body,
        })
    }
}

fn classify_reqwest_error(err: &reqwest::Error, timeout: Duration) -> DetourError {
    if err.is_timeout() {
        DetourError::Timeout(timeout)
    } else {
        DetourError::Network(err.to_string())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builders() {
        let get = ProxyRequest::get("https://example.com/status");
        assert_eq!(get.method, Method::GET);
        assert!(get.body.is_none());
        assert_eq!(get.timeout, DEFAULT_REQUEST_TIMEOUT);

        let post = ProxyRequest::post("https://example.com/submit", "a=1")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(post.method, Method::POST);
        assert_eq!(post.body.as_deref(), Some(b"a=1".as_slice()));
        assert_eq!(post.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_query_get_folds_body_into_query() {
        let mut request = ProxyRequest::post("https://api.example.com/submit", "a=1&b=2");
        request
            .headers
            .insert(CONTENT_TYPE, "application/x-www-form-urlencoded".parse().unwrap());

        let converted = request.to_query_get().unwrap();
        assert_eq!(converted.method, Method::GET);
        assert_eq!(converted.url, "https://api.example.com/submit?a=1&b=2");
        assert!(converted.body.is_none());
        assert!(!converted.headers.contains_key(CONTENT_TYPE));
        assert_eq!(converted.timeout, request.timeout);
    }

    #[test]
    fn test_query_get_merges_existing_query() {
        let request = ProxyRequest::post("https://api.example.com/submit?x=9", "a=1");
        let converted = request.to_query_get().unwrap();
        assert_eq!(converted.url, "https://api.example.com/submit?x=9&a=1");
    }

    #[test]
    fn test_query_get_without_body_changes_method_only() {
        let request = ProxyRequest::post("https://api.example.com/submit", "");
        let converted = request.to_query_get().unwrap();
        assert_eq!(converted.method, Method::GET);
        assert_eq!(converted.url, "https://api.example.com/submit");
    }

    #[test]
    fn test_query_get_rejects_bad_input() {
        assert!(ProxyRequest::post("not a url", "a=1").to_query_get().is_err());

        let binary = ProxyRequest::post("https://api.example.com/submit", vec![0xffu8, 0xfe]);
        assert!(binary.to_query_get().is_err());
    }

    #[test]
    fn test_response_helpers() {
        let ok = ProxyResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"hello"),
        };
        assert!(ok.is_success());
        assert_eq!(ok.body_text(), "hello");

        let rejected = ProxyResponse {
            status: StatusCode::METHOD_NOT_ALLOWED,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };
        assert!(!rejected.is_success());
    }

    #[test]
    fn test_proxied_clients_cached_per_key() {
        let transport = HttpTransport::new().unwrap();
        let first = ProxyEndpoint::parse("10.0.0.1:3128").unwrap();
        let second = ProxyEndpoint::parse("10.0.0.2:3128:user:pass").unwrap();

        transport.client_for(&first).unwrap();
        transport.client_for(&first).unwrap();
        assert_eq!(transport.cached_clients(), 1);

        transport.client_for(&second).unwrap();
        assert_eq!(transport.cached_clients(), 2);
    }
}
