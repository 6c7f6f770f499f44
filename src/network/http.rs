//! HTTP handler for serving page connections

use std::convert::Infallible;
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::debug;

use crate::proxy::InterceptProxy;
use crate::{DetourError, Result};

/// HTTP handler for processing connections
pub struct HttpHandler;

impl HttpHandler {
    /// Serve HTTP/1.1 requests on a connection until it closes
    ///
    /// # Errors
    ///
    /// Returns error if the connection fails at the protocol level
    pub async fn handle_connection(stream: TcpStream, proxy: Arc<InterceptProxy>) -> Result<()> {
        let peer = stream.peer_addr().ok();
        debug!("Serving connection from {:?}", peer);

        let service = service_fn(move |request: Request<Incoming>| {
            let proxy = Arc::clone(&proxy);
            async move { Ok::<_, Infallible>(proxy.handle(request).await) }
        });

        http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .await
            .map_err(|e| DetourError::Other(format!("Connection error: {e}")))
    }

    /// Create a simple HTTP response
    ///
    /// # Panics
    ///
    /// Panics if response builder fails (should never happen with valid inputs)
    #[must_use]
    pub fn create_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
        Response::builder()
            .status(status)
            .header(hyper::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Full::new(Bytes::from(body.to_string())))
            .expect("Failed to build response")
    }

    /// Create an error response
    #[must_use]
    pub fn error_response(error: &DetourError) -> Response<Full<Bytes>> {
        let status = match error {
            DetourError::Upstream(_) => StatusCode::BAD_GATEWAY,
            DetourError::DataTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            DetourError::InvalidUrl { .. } | DetourError::InvalidNamespace(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        Self::create_response(status, &format!("Error: {error}"))
    }

    /// Validate an incoming request against size limits
    ///
    /// # Errors
    ///
    /// Returns error if request is too large or carries too many headers
    pub fn validate_request(
        request: &Request<impl hyper::body::Body>,
        max_size: usize,
        max_headers: usize,
    ) -> Result<()> {
        if let Some(content_length) = request.headers().get(hyper::header::CONTENT_LENGTH) {
            if let Ok(length_str) = content_length.to_str() {
                if let Ok(length) = length_str.parse::<usize>() {
                    if length > max_size {
                        return Err(DetourError::DataTooLarge {
                            size: length,
                            limit: max_size,
                        });
                    }
                }
            }
        }

        let header_count = request.headers().len();
        if header_count > max_headers {
            return Err(DetourError::Other(format!(
                "Too many headers: {header_count}"
            )));
        }

        Ok(())
    }

    /// Read a body with size limit
    ///
    /// # Errors
    ///
    /// Returns error if body is too large or read fails
    pub async fn read_body<B>(body: B, max_size: usize) -> Result<Bytes>
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        let collected = body
            .collect()
            .await
            .map_err(|e| DetourError::Upstream(format!("Failed to read body: {e}")))?;

        let bytes = collected.to_bytes();

        if bytes.len() > max_size {
            return Err(DetourError::DataTooLarge {
                size: bytes.len(),
                limit: max_size,
            });
        }

        Ok(bytes)
    }
}
