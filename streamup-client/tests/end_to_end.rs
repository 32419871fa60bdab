//! Uploads through the local engine and through a live HTTP/2 server

use bytes::Bytes;
use futures::stream;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use streamup_client::*;
use streamup_core::auth::Credentials;
use streamup_core::{ObjectOptions, RemoteStore, StoreError, Target};
use streamup_engine::{LocalStore, Storage, StorageEngine};
use streamup_server::{Authenticator, StreamupServer};
use tokio::net::TcpListener;

const PART: usize = 64 * 1024;

fn storage() -> (Storage, tempfile::TempDir) {
    let (engine, temp) = StorageEngine::temp().unwrap();
    (Storage::new(engine.with_min_part_size(PART)), temp)
}

fn options() -> UploadOptions {
    UploadOptions::default()
        .with_max_part_size(PART)
        .with_concurrent_parts(4)
        .with_settle_delay(Duration::ZERO)
        .with_poll_interval(Duration::from_millis(20))
        .with_wait_time(Duration::from_secs(10))
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

async fn start(server: StreamupServer) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve_listener(listener));
    addr
}

#[tokio::test]
async fn local_store_assembles_object() {
    let (storage, _temp) = storage();
    let store = LocalStore::new(storage.clone());
    let target = Target::new("archive", "2024/backup.tar").unwrap();
    let data = payload(PART * 3 + 1234);

    let upload = StreamingUpload::builder(Arc::new(store))
        .target(target.clone())
        .reader(io::Cursor::new(data.clone()))
        .options(options())
        .build()
        .unwrap();
    let summary = upload.begin().unwrap().await.unwrap();

    assert_eq!(summary.parts, 4);
    assert_eq!(summary.size, data.len() as u64);
    assert!(summary.etag.as_str().ends_with("-4"));

    let stored = storage.get_object(&target.bucket, &target.key).unwrap().unwrap();
    assert_eq!(stored, data);
    assert!(storage.list_uploads(&target.bucket).unwrap().is_empty());
}

#[tokio::test]
async fn local_store_rejects_undersized_part_size() {
    let (storage, _temp) = storage();
    let result = StreamingUpload::builder(Arc::new(LocalStore::new(storage)))
        .target(Target::new("archive", "small").unwrap())
        .reader(io::Cursor::new(vec![0u8; 10]))
        .options(options().with_max_part_size(PART / 2))
        .build();

    assert!(matches!(result, Err(UploadError::Config(_))));
}

#[tokio::test]
async fn local_store_accepts_empty_stream() {
    let (storage, _temp) = storage();
    let target = Target::new("archive", "empty").unwrap();

    let summary = StreamingUpload::builder(Arc::new(LocalStore::new(storage.clone())))
        .target(target.clone())
        .stream(stream::empty())
        .options(options())
        .build()
        .unwrap()
        .begin()
        .unwrap()
        .await
        .unwrap();

    assert_eq!(summary.parts, 0);
    assert_eq!(storage.get_object(&target.bucket, &target.key).unwrap(), Some(Vec::new()));
}

#[tokio::test]
async fn http_store_uploads_over_http2() {
    let (storage, _temp) = storage();
    let addr = start(StreamupServer::new(storage.clone())).await;
    let store = HttpStore::new(&format!("http://{}", addr))
        .unwrap()
        .with_min_part_size(PART)
        .with_request_timeout(Duration::from_secs(10));
    let target = Target::new("media", "videos/clip 01.mp4").unwrap();
    let data = payload(PART * 5 + 17);

    let fragments: Vec<io::Result<Bytes>> = data
        .chunks(10_000)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    let summary = StreamingUpload::builder(Arc::new(store.clone()))
        .target(target.clone())
        .stream(stream::iter(fragments))
        .options(options())
        .build()
        .unwrap()
        .begin()
        .unwrap()
        .await
        .unwrap();

    assert_eq!(summary.parts, 6);
    assert_eq!(store.get_object(&target).await.unwrap(), Bytes::from(data));

    store.delete_object(&target).await.unwrap();
    assert!(matches!(store.get_object(&target).await, Err(StoreError::NoSuchKey(_))));
}

#[tokio::test]
async fn http_store_forwards_object_options() {
    let (storage, _temp) = storage();
    let credentials = Credentials::generate();
    let server = StreamupServer::new(storage.clone())
        .with_authenticator(Authenticator::new(vec![credentials.public_key()]));
    let addr = start(server).await;
    let store = HttpStore::new(&format!("http://{}", addr))
        .unwrap()
        .with_min_part_size(PART)
        .with_credentials(credentials);
    let target = Target::new("media", "posters/launch.png").unwrap();
    let object = ObjectOptions::new()
        .with_content_type("image/png")
        .with_metadata("campaign", "spring");

    let summary = StreamingUpload::builder(Arc::new(store.clone()))
        .target(target.clone())
        .object_options(object.clone())
        .reader(io::Cursor::new(payload(PART * 2 + 5)))
        .options(options())
        .build()
        .unwrap()
        .begin()
        .unwrap()
        .await
        .unwrap();
    assert_eq!(summary.parts, 3);

    let metadata = storage.get_metadata(&target.bucket, &target.key).unwrap().unwrap();
    assert_eq!(metadata.options, object);
    assert_eq!(metadata.size, (PART * 2 + 5) as u64);
}

#[tokio::test]
async fn http_store_signs_requests() {
    let (storage, _temp) = storage();
    let credentials = Credentials::generate();
    let server = StreamupServer::new(storage)
        .with_authenticator(Authenticator::new(vec![credentials.public_key()]));
    let addr = start(server).await;
    let endpoint = format!("http://{}", addr);
    let target = Target::new("private", "ledger.csv").unwrap();

    let anonymous = HttpStore::new(&endpoint).unwrap().with_min_part_size(PART);
    let err = StreamingUpload::builder(Arc::new(anonymous))
        .target(target.clone())
        .reader(io::Cursor::new(payload(100)))
        .options(options())
        .build()
        .unwrap()
        .begin()
        .unwrap()
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Store(StoreError::AuthenticationFailed(_))));

    let signed = HttpStore::new(&endpoint)
        .unwrap()
        .with_min_part_size(PART)
        .with_credentials(credentials);
    let summary = StreamingUpload::builder(Arc::new(signed.clone()))
        .target(target.clone())
        .reader(io::Cursor::new(payload(PART + 100)))
        .options(options())
        .build()
        .unwrap()
        .begin()
        .unwrap()
        .await
        .unwrap();
    assert_eq!(summary.parts, 2);
    assert_eq!(signed.get_object(&target).await.unwrap().len(), PART + 100);
}

#[tokio::test]
async fn http_store_reports_server_errors() {
    let (storage, _temp) = storage();
    let addr = start(StreamupServer::new(storage)).await;
    let store = HttpStore::new(&format!("http://{}", addr)).unwrap();
    let target = Target::new("media", "missing").unwrap();

    let err = store
        .abort_upload(&target, &streamup_core::UploadId::new("unknown"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NoSuchUpload(_)));
    assert!(!err.is_transient());
}
