//! `RemoteStore` over the streamup HTTP/2 API

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, StatusCode, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use streamup_core::auth::{CanonicalRequest, Credentials};
use streamup_core::{
    CompletedPart, CompletedUpload, ETag, ListedPart, ObjectOptions, RemoteStore, StoreError,
    Target, UploadId, MIN_PART_SIZE,
};
use streamup_net::{
    decode_error, CompleteUploadRequest, CreateUploadResponse, ListPartsResponse, Route,
    UploadPartResponse, HEADER_KEY, HEADER_NONCE, HEADER_SIGNATURE, HEADER_TIMESTAMP,
};
use tracing::{debug, trace};

type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// Client for a streamup server
#[derive(Clone)]
pub struct HttpStore {
    client: HttpClient,
    base_url: String,
    credentials: Option<Arc<Credentials>>,
    request_timeout: Option<Duration>,
    min_part_size: usize,
}

impl HttpStore {
    /// Connect to `endpoint`, e.g. `http://127.0.0.1:8080`
    pub fn new(endpoint: &str) -> streamup_core::Result<Self> {
        let uri: Uri = endpoint
            .parse()
            .map_err(|e| StoreError::InvalidRequest(format!("invalid endpoint '{}': {}", endpoint, e)))?;

        match uri.scheme_str() {
            Some("http") => {}
            other => {
                return Err(StoreError::InvalidRequest(format!(
                    "unsupported endpoint scheme {:?}",
                    other
                )))
            }
        }
        let authority = uri
            .authority()
            .ok_or_else(|| StoreError::InvalidRequest(format!("endpoint '{}' has no host", endpoint)))?;

        Ok(HttpStore {
            client: http2_client(),
            base_url: format!("http://{}", authority),
            credentials: None,
            request_timeout: None,
            min_part_size: MIN_PART_SIZE,
        })
    }

    /// Sign every request with these credentials
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(Arc::new(credentials));
        self
    }

    /// Give up on a request after `timeout`; the failure counts as a timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Minimum non-final part size the server was started with
    pub fn with_min_part_size(mut self, min_part_size: usize) -> Self {
        self.min_part_size = min_part_size;
        self
    }

    /// Bytes of a committed object
    pub async fn get_object(&self, target: &Target) -> streamup_core::Result<Bytes> {
        self.send(&Route::GetObject { target: target.clone() }, Bytes::new()).await
    }

    pub async fn delete_object(&self, target: &Target) -> streamup_core::Result<()> {
        self.send(&Route::DeleteObject { target: target.clone() }, Bytes::new())
            .await
            .map(|_| ())
    }

    async fn send(&self, route: &Route, body: Bytes) -> streamup_core::Result<Bytes> {
        let request = self.build_request(route, body)?;
        trace!(method = %request.method(), uri = %request.uri(), "Sending request");

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| StoreError::Transport(e.to_string()))?;
            let status = response.status();
            let bytes = response
                .into_body()
                .collect()
                .await
                .map_err(|e| StoreError::Transport(e.to_string()))?
                .to_bytes();
            Ok::<(StatusCode, Bytes), StoreError>((status, bytes))
        };

        let (status, bytes) = match self.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, exchange).await.map_err(|_| {
                StoreError::Timeout(format!("{} {} exceeded {:?}", route.method(), route.path_and_query(), timeout))
            })??,
            None => exchange.await?,
        };

        if !status.is_success() {
            let err = decode_error(status, &bytes);
            debug!(status = %status, error = %err, "Request failed");
            return Err(err);
        }
        Ok(bytes)
    }

    async fn send_json<T: DeserializeOwned>(&self, route: &Route, body: Bytes) -> streamup_core::Result<T> {
        let bytes = self.send(route, body).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::InvalidResponse(format!("{}: {}", route.path_and_query(), e)))
    }

    fn build_request(&self, route: &Route, body: Bytes) -> streamup_core::Result<Request<Full<Bytes>>> {
        let method = route.method();
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(format!("{}{}", self.base_url, route.path_and_query()));

        if let (Some(credentials), Some(target)) = (&self.credentials, route.target()) {
            let mut canonical = CanonicalRequest::new(method.as_str(), target.clone(), &body);
            for (name, value) in route.query_params() {
                canonical = canonical.with_query_param(name, &value);
            }
            let headers = canonical.sign(credentials).headers();
            builder = builder
                .header(HEADER_KEY, headers.key)
                .header(HEADER_SIGNATURE, headers.signature)
                .header(HEADER_TIMESTAMP, headers.timestamp)
                .header(HEADER_NONCE, headers.nonce);
        }

        builder
            .body(Full::new(body))
            .map_err(|e| StoreError::InvalidRequest(e.to_string()))
    }
}

fn http2_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).http2_only(true).build_http()
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn create_upload(
        &self,
        target: &Target,
        options: &ObjectOptions,
    ) -> streamup_core::Result<UploadId> {
        let route = Route::CreateUpload { target: target.clone() };
        let body = if options.is_empty() {
            Bytes::new()
        } else {
            Bytes::from(serde_json::to_vec(options)?)
        };
        let response: CreateUploadResponse = self.send_json(&route, body).await?;
        Ok(response.upload_id)
    }

    async fn upload_part(
        &self,
        target: &Target,
        upload_id: &UploadId,
        part_number: u32,
        body: Bytes,
    ) -> streamup_core::Result<ETag> {
        let route = Route::UploadPart {
            target: target.clone(),
            upload_id: upload_id.clone(),
            part_number,
        };
        let response: UploadPartResponse = self.send_json(&route, body).await?;
        Ok(response.etag)
    }

    async fn list_parts(&self, target: &Target, upload_id: &UploadId) -> streamup_core::Result<Vec<ListedPart>> {
        let route = Route::ListParts {
            target: target.clone(),
            upload_id: upload_id.clone(),
        };
        let response: ListPartsResponse = self.send_json(&route, Bytes::new()).await?;
        Ok(response.parts)
    }

    async fn complete_upload(
        &self,
        target: &Target,
        upload_id: &UploadId,
        parts: &[CompletedPart],
    ) -> streamup_core::Result<CompletedUpload> {
        let route = Route::CompleteUpload {
            target: target.clone(),
            upload_id: upload_id.clone(),
        };
        let body = serde_json::to_vec(&CompleteUploadRequest { parts: parts.to_vec() })?;
        self.send_json(&route, Bytes::from(body)).await
    }

    async fn abort_upload(&self, target: &Target, upload_id: &UploadId) -> streamup_core::Result<()> {
        let route = Route::AbortUpload {
            target: target.clone(),
            upload_id: upload_id.clone(),
        };
        self.send(&route, Bytes::new()).await.map(|_| ())
    }

    fn min_part_size(&self) -> usize {
        self.min_part_size
    }

    /// Each part gets its own connection pool
    fn part_handle(&self) -> Option<Arc<dyn RemoteStore>> {
        Some(Arc::new(HttpStore {
            client: http2_client(),
            ..self.clone()
        }))
    }
}
