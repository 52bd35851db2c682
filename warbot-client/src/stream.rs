//! Client stream abstraction for TLS and plain TCP.

use crate::error::ClientError;
use crate::tls::server_name;
use hyper::Uri;
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::TlsConnector;

/// Host, port and transport security resolved from a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl Endpoint {
    /// Resolves an `http`, `https`, `ws` or `wss` URL.
    pub fn from_uri(uri: &Uri) -> Result<Self, ClientError> {
        let secure = match uri.scheme_str() {
            Some("https") | Some("wss") => true,
            Some("http") | Some("ws") => false,
            other => {
                return Err(ClientError::InvalidUrl(format!(
                    "unsupported scheme {:?} in {}",
                    other, uri
                )))
            }
        };
        let host = uri
            .host()
            .ok_or_else(|| ClientError::InvalidUrl(format!("missing host in {}", uri)))?
            .to_string();
        let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });
        Ok(Self { host, port, secure })
    }

    /// Parses and resolves a URL string.
    pub fn parse(url: &str) -> Result<(Uri, Self), ClientError> {
        let uri: Uri = url
            .parse()
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", url, e)))?;
        let endpoint = Self::from_uri(&uri)?;
        Ok((uri, endpoint))
    }
}

pin_project! {
    /// A client stream that can be either plain TCP or TLS.
    #[project = ClientStreamProj]
    pub enum ClientStream {
        Plain { #[pin] stream: TcpStream },
        Tls { #[pin] stream: ClientTlsStream<TcpStream> },
    }
}

impl ClientStream {
    /// Opens a TCP connection to the endpoint, upgrading to TLS when it is secure.
    pub async fn connect(
        endpoint: &Endpoint,
        connector: &TlsConnector,
    ) -> Result<Self, ClientError> {
        tracing::debug!("Connecting to {}:{}...", endpoint.host, endpoint.port);
        let tcp_stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        tcp_stream.set_nodelay(true).ok();

        if !endpoint.secure {
            return Ok(ClientStream::Plain { stream: tcp_stream });
        }

        tracing::debug!("Performing TLS handshake with {}...", endpoint.host);
        let stream = connector
            .connect(server_name(&endpoint.host)?, tcp_stream)
            .await
            .map_err(|e| ClientError::TlsHandshake(e.to_string()))?;
        Ok(ClientStream::Tls { stream })
    }

    /// Returns whether this stream is TLS-encrypted.
    pub fn is_tls(&self) -> bool {
        matches!(self, ClientStream::Tls { .. })
    }
}

impl AsyncRead for ClientStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_read(cx, buf),
            ClientStreamProj::Tls { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_write(cx, buf),
            ClientStreamProj::Tls { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_flush(cx),
            ClientStreamProj::Tls { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_shutdown(cx),
            ClientStreamProj::Tls { stream } => stream.poll_shutdown(cx),
        }
    }
}
