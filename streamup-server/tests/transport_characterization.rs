//! Characterization tests for the HTTP/2 transport
//! These drive a live server over a real socket with a plain hyper client

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::net::SocketAddr;
use streamup_core::auth::{CanonicalRequest, Credentials};
use streamup_core::*;
use streamup_engine::{Storage, StorageEngine};
use streamup_net::*;
use streamup_server::{Authenticator, StreamupServer};
use tokio::net::TcpListener;

type HttpClient = Client<HttpConnector, Full<Bytes>>;

async fn start(server: StreamupServer) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve_listener(listener));
    addr
}

fn client() -> HttpClient {
    Client::builder(TokioExecutor::new()).http2_only(true).build_http()
}

fn storage() -> (Storage, tempfile::TempDir) {
    let (engine, temp) = StorageEngine::temp().unwrap();
    (Storage::new(engine.with_min_part_size(4)), temp)
}

async fn send(
    client: &HttpClient,
    addr: SocketAddr,
    route: &Route,
    body: Vec<u8>,
    credentials: Option<&Credentials>,
) -> (StatusCode, Bytes) {
    let mut builder = Request::builder()
        .method(route.method())
        .uri(format!("http://{}{}", addr, route.path_and_query()));

    if let (Some(credentials), Some(target)) = (credentials, route.target()) {
        let mut canonical = CanonicalRequest::new(route.method().as_str(), target.clone(), &body);
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

    let response = client
        .request(builder.body(Full::new(Bytes::from(body))).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes)
}

#[tokio::test]
async fn net_health_endpoint_answers() {
    let (storage, _temp) = storage();
    let addr = start(StreamupServer::new(storage)).await;

    let (status, body) = send(&client(), addr, &Route::Health, Vec::new(), None).await;
    assert_eq!(status, StatusCode::OK);

    let health: HealthResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(health.status, "healthy");
}

#[tokio::test]
async fn net_multipart_upload_over_http2() {
    let (storage, _temp) = storage();
    let addr = start(StreamupServer::new(storage)).await;
    let client = client();
    let target = Target::new("photos", "albums/2024/cat.jpg").unwrap();

    let (status, body) = send(&client, addr, &Route::CreateUpload { target: target.clone() }, Vec::new(), None).await;
    assert_eq!(status, StatusCode::OK);
    let upload_id = serde_json::from_slice::<CreateUploadResponse>(&body).unwrap().upload_id;

    // Parts arrive out of order over concurrent streams
    let bodies: Vec<Vec<u8>> = vec![b"aaaa".to_vec(), b"bbbb".to_vec(), b"cc".to_vec()];
    let mut tasks = Vec::new();
    for (i, part) in bodies.iter().enumerate().rev() {
        let client = client.clone();
        let route = Route::UploadPart {
            target: target.clone(),
            upload_id: upload_id.clone(),
            part_number: i as u32 + 1,
        };
        let part = part.clone();
        tasks.push(tokio::spawn(async move { send(&client, addr, &route, part, None).await }));
    }
    for task in tasks {
        let (status, _) = task.await.unwrap();
        assert_eq!(status, StatusCode::OK);
    }

    let list = Route::ListParts { target: target.clone(), upload_id: upload_id.clone() };
    let (status, body) = send(&client, addr, &list, Vec::new(), None).await;
    assert_eq!(status, StatusCode::OK);
    let listed = serde_json::from_slice::<ListPartsResponse>(&body).unwrap().parts;
    assert_eq!(listed.iter().map(|p| p.part_number).collect::<Vec<_>>(), vec![1, 2, 3]);

    let request = CompleteUploadRequest {
        parts: listed
            .iter()
            .map(|p| CompletedPart { part_number: p.part_number, etag: p.etag.clone() })
            .collect(),
    };
    let complete = Route::CompleteUpload { target: target.clone(), upload_id };
    let (status, body) = send(&client, addr, &complete, serde_json::to_vec(&request).unwrap(), None).await;
    assert_eq!(status, StatusCode::OK);
    let done: CompleteUploadResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(done.size, 10);
    assert_eq!(done.part_count, 3);

    let (status, body) = send(&client, addr, &Route::GetObject { target }, Vec::new(), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"aaaabbbbcc");
}

#[tokio::test]
async fn net_errors_carry_codes_and_statuses() {
    let (storage, _temp) = storage();
    let addr = start(StreamupServer::new(storage)).await;
    let client = client();
    let target = Target::new("photos", "cat.jpg").unwrap();

    let abort = Route::AbortUpload { target: target.clone(), upload_id: UploadId::new("nope") };
    let (status, body) = send(&client, addr, &abort, Vec::new(), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(matches!(decode_error(status, &body), StoreError::NoSuchUpload(_)));

    let (status, _) = send(&client, addr, &Route::GetObject { target }, Vec::new(), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = Request::builder()
        .method(Method::PUT)
        .uri(format!("http://{}/v1/photos/cat.jpg?uploadId=x", addr))
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = client.request(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn net_signed_requests_are_enforced() {
    let (storage, _temp) = storage();
    let credentials = Credentials::generate();
    let server = StreamupServer::new(storage)
        .with_authenticator(Authenticator::new(vec![credentials.public_key()]));
    let addr = start(server).await;
    let client = client();
    let target = Target::new("private", "report.csv").unwrap();
    let create = Route::CreateUpload { target: target.clone() };

    let (status, body) = send(&client, addr, &create, Vec::new(), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(matches!(decode_error(status, &body), StoreError::AuthenticationFailed(_)));

    let stranger = Credentials::generate();
    let (status, _) = send(&client, addr, &create, Vec::new(), Some(&stranger)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&client, addr, &create, Vec::new(), Some(&credentials)).await;
    assert_eq!(status, StatusCode::OK);
    let upload_id = serde_json::from_slice::<CreateUploadResponse>(&body).unwrap().upload_id;

    let part = Route::UploadPart { target, upload_id, part_number: 1 };
    let (status, _) = send(&client, addr, &part, b"col1,col2".to_vec(), Some(&credentials)).await;
    assert_eq!(status, StatusCode::OK);

    // Health stays open
    let (status, _) = send(&client, addr, &Route::Health, Vec::new(), None).await;
    assert_eq!(status, StatusCode::OK);
}
