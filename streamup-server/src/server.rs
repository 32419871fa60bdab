//! HTTP/2 server implementation

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, SERVER};
use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper::{Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use streamup_core::ObjectOptions;
use streamup_engine::Storage;
use streamup_net::{HEADER_META_PREFIX, SERVER_NAME};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::auth::Authenticator;
use crate::handlers::handle_request;

pub type BoxBody = Full<Bytes>;

/// Everything a request handler needs
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub auth: Option<Arc<Authenticator>>,
}

pub struct StreamupServer {
    state: AppState,
}

impl StreamupServer {
    /// A server that accepts unsigned requests
    pub fn new(storage: Storage) -> Self {
        Self {
            state: AppState { storage, auth: None },
        }
    }

    /// Require every object request to be signed by one of these keys
    pub fn with_authenticator(mut self, authenticator: Authenticator) -> Self {
        self.state.auth = Some(Arc::new(authenticator));
        self
    }

    pub async fn serve(self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener).await
    }

    /// Accept connections on an already bound listener until it fails
    pub async fn serve_listener(self, listener: TcpListener) -> std::io::Result<()> {
        info!(addr = %listener.local_addr()?, "streamup server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            debug!("New connection from {}", remote_addr);

            let state = self.state.clone();
            tokio::spawn(async move {
                Self::handle_connection(stream, remote_addr, state).await;
            });
        }
    }

    async fn handle_connection(stream: TcpStream, remote_addr: SocketAddr, state: AppState) {
        let io = TokioIo::new(stream);

        let service = service_fn(move |req| {
            let state = state.clone();
            async move { handle_request(req, state).await }
        });

        if let Err(err) = http2::Builder::new(TokioExecutor::new())
            .serve_connection(io, service)
            .await
        {
            error!("HTTP/2 connection error from {}: {}", remote_addr, err);
        }
    }
}

/// JSON response builder
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    match serde_json::to_vec(body) {
        Ok(bytes) => {
            let mut response = raw_response(status, Bytes::from(bytes));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            error!("Failed to encode response body: {}", e);
            raw_response(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new())
        }
    }
}

/// Response carrying object bytes
/// Object bytes with the content type and user metadata it was created with
pub fn object_response(data: Vec<u8>, options: &ObjectOptions) -> Response<BoxBody> {
    let mut response = raw_response(StatusCode::OK, Bytes::from(data));
    let headers = response.headers_mut();

    let content_type = options
        .content_type
        .as_deref()
        .and_then(|value| HeaderValue::from_str(value).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(CONTENT_TYPE, content_type);

    for (name, value) in &options.metadata {
        let header = HeaderName::from_bytes(format!("{}{}", HEADER_META_PREFIX, name).as_bytes());
        match (header, HeaderValue::from_str(value)) {
            (Ok(header), Ok(value)) => {
                headers.insert(header, value);
            }
            _ => debug!(name = %name, "Metadata not representable as a header"),
        }
    }
    response
}

pub fn empty_response(status: StatusCode) -> Response<BoxBody> {
    raw_response(status, Bytes::new())
}

fn raw_response(status: StatusCode, body: Bytes) -> Response<BoxBody> {
    let length = body.len();
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(SERVER, HeaderValue::from_static(SERVER_NAME));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    response
}
