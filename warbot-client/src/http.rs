//! Plain HTTP(S) GET transport for bootstrap calls.

use crate::chain::Chain;
use crate::error::RequestError;
use crate::stream::{ClientStream, Endpoint};
use crate::tls::create_tls_connector;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::header::{HOST, REFERER, USER_AGENT};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio_rustls::TlsConnector;
use warbot_protocol::Document;

/// Desktop browser user agent sent with every request.
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36 Edg/119.0.0.0";

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Transfer timeout covering connect, request and body.
    pub timeout: Duration,
    pub user_agent: String,
    pub referer: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: DESKTOP_USER_AGENT.to_string(),
            referer: None,
        }
    }
}

impl HttpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }
}

/// A successful HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body parsed as a JSON object; empty when it is not one.
    pub fn document(&self) -> Document {
        Document::from_slice_lossy(&self.body)
    }
}

/// GET-only HTTP client. Each request uses a fresh connection.
#[derive(Clone)]
pub struct HttpClient {
    config: HttpConfig,
    connector: TlsConnector,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            connector: create_tls_connector(),
        }
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Issues a GET as a single-stage chain.
    pub fn get(&self, url: impl Into<String>) -> Chain<HttpResponse> {
        let url = url.into();
        let config = self.config.clone();
        let connector = self.connector.clone();
        Chain::new(async move {
            tracing::debug!("GET {}", url);
            match tokio::time::timeout(config.timeout, fetch(&connector, &config, &url)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::debug!("GET {} timed out after {:?}", url, config.timeout);
                    Err(RequestError::Timeout)
                }
            }
        })
    }

    /// Issues a GET with query parameters appended to `base`.
    pub fn get_with_query(&self, base: &str, query: &[(&str, String)]) -> Chain<HttpResponse> {
        self.get(with_query(base, query))
    }
}

async fn fetch(
    connector: &TlsConnector,
    config: &HttpConfig,
    url: &str,
) -> Result<HttpResponse, RequestError> {
    let (uri, endpoint) = Endpoint::parse(url).map_err(RequestError::network)?;
    let stream = ClientStream::connect(&endpoint, connector)
        .await
        .map_err(RequestError::network)?;

    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(RequestError::network)?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!("HTTP connection error: {}", e);
        }
    });

    let host = match uri.port_u16() {
        Some(port) => format!("{}:{}", endpoint.host, port),
        None => endpoint.host.clone(),
    };
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    let mut builder = Request::builder()
        .method(Method::GET)
        .uri(path)
        .header(HOST, host)
        .header(USER_AGENT, config.user_agent.as_str());
    if let Some(referer) = &config.referer {
        builder = builder.header(REFERER, referer.as_str());
    }
    let request = builder.body(Empty::<Bytes>::new()).map_err(|e| {
        tracing::warn!("Cannot build request for {}: {}", url, e);
        RequestError::Unspecified
    })?;

    let response = sender
        .send_request(request)
        .await
        .map_err(RequestError::network)?;

    let status = response.status();
    if status.as_u16() >= 300 {
        return Err(RequestError::BadStatus {
            code: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
        });
    }

    let body = response
        .into_body()
        .collect()
        .await
        .map_err(RequestError::network)?
        .to_bytes();

    Ok(HttpResponse {
        status: status.as_u16(),
        body,
    })
}

/// Appends percent-encoded query parameters to a URL.
pub fn with_query(base: &str, query: &[(&str, String)]) -> String {
    let mut url = base.to_string();
    let mut sep = if base.contains('?') { '&' } else { '?' };
    for (key, value) in query {
        url.push(sep);
        url.push_str(&encode_component(key));
        url.push('=');
        url.push_str(&encode_component(value));
        sep = '&';
    }
    url
}

fn encode_component(s: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char)
            }
            _ => {
                out.push('%');
                out.push(HEX[(b >> 4) as usize] as char);
                out.push(HEX[(b & 0x0f) as usize] as char);
            }
        }
    }
    out
}


#[cfg(test)]
mod tests {
    use super::test_server::{route, serve};
    use super::*;

    #[test]
    fn test_with_query_encoding() {
        let url = with_query(
            "https://example.net/servlet",
            &[("token", "a b&c".to_string()), ("lang", "zh_cn".to_string())],
        );
        assert_eq!(url, "https://example.net/servlet?token=a%20b%26c&lang=zh_cn");

        let url = with_query("http://h/x?y=1", &[("z", "{\"q\":1}".to_string())]);
        assert_eq!(url, "http://h/x?y=1&z=%7B%22q%22%3A1%7D");
    }

    #[tokio::test]
    async fn test_get_body() {
        let base = serve(vec![route("/index.html", 200, "hello")]).await;
        let client = HttpClient::new(HttpConfig::new().with_referer("https://example.net/"));
        let response = client.get(format!("{}/index.html?t=1", base)).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.text(), "hello");
    }

    #[tokio::test]
    async fn test_bad_status() {
        let base = serve(vec![route("/boom", 500, "")]).await;
        let client = HttpClient::new(HttpConfig::new());

        let err = client.get(format!("{}/boom", base)).await.unwrap_err();
        assert_eq!(
            err,
            RequestError::BadStatus {
                code: 500,
                reason: "Internal Server Error".to_string()
            }
        );

        let err = client.get(format!("{}/missing", base)).await.unwrap_err();
        assert!(matches!(err, RequestError::BadStatus { code: 404, .. }));
    }

    #[tokio::test]
    async fn test_unbuildable_request() {
        let base = serve(vec![route("/index.html", 200, "hello")]).await;
        let client = HttpClient::new(HttpConfig::new().with_user_agent("bad\nagent"));
        let err = client.get(format!("{}/index.html", base)).await.unwrap_err();
        assert_eq!(err, RequestError::Unspecified);
    }

    #[tokio::test]
    async fn test_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpClient::new(HttpConfig::new());
        let err = client.get(format!("http://{}/", addr)).await.unwrap_err();
        assert!(matches!(err, RequestError::Network(_)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept but never answer.
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = HttpClient::new(HttpConfig::new().with_timeout(Duration::from_millis(200)));
        let err = client.get(format!("http://{}/", addr)).await.unwrap_err();
        assert_eq!(err, RequestError::Timeout);
        assert!(err.is_timeout());
    }

    #[test]
    fn test_response_document() {
        let response = HttpResponse {
            status: 200,
            body: Bytes::from_static(br#"{"serverInfoToken":"abc"}"#),
        };
        use warbot_protocol::ValueExt;
        assert_eq!(response.document().get("serverInfoToken").text(), "abc");
    }
}
