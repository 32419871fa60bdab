//! HTTP request handlers for the streamup server

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{Request, Response, StatusCode};
use streamup_core::*;
use streamup_engine::Storage;
use streamup_net::*;
use tracing::{debug, error, info, warn};

use crate::server::{empty_response, json_response, object_response, AppState, BoxBody};

/// Main request handler
pub async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: AppState,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    debug!("Handling {} {}", method, path);

    let route = match Route::parse(&method, &path, query.as_deref()) {
        Ok(route) => route,
        Err(e) => {
            warn!("{} {} rejected: {}", method, path, e);
            let (status, body) = protocol_error_response(&e);
            return Ok(json_response(status, &body));
        }
    };

    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();

    if let (Some(auth), Some(target)) = (&state.auth, route.target()) {
        if let Err(e) = auth.verify(&method, &route, target, &parts.headers, &body) {
            warn!("{} {} denied: {}", method, path, e);
            return Ok(error_response(&e));
        }
    }

    let response = match dispatch(route, body, &state.storage) {
        Ok(response) => response,
        Err(e) => {
            if status_for(&e).is_server_error() {
                error!("Handler error for {} {}: {}", method, path, e);
            }
            error_response(&e)
        }
    };

    info!("{} {} -> {}", method, path, response.status());
    Ok(response)
}

fn dispatch(route: Route, body: Bytes, storage: &Storage) -> Result<Response<BoxBody>> {
    match route {
        Route::Health => Ok(handle_health()),

        Route::CreateUpload { target } => {
            let options: CreateUploadRequest = if body.is_empty() {
                ObjectOptions::default()
            } else {
                serde_json::from_slice(&body)
                    .map_err(|e| StoreError::InvalidRequest(format!("bad object options: {}", e)))?
            };
            let upload = storage.create_upload(&target.bucket, &target.key, &options)?;
            Ok(json_response(
                StatusCode::OK,
                &CreateUploadResponse { upload_id: upload.upload_id },
            ))
        }

        Route::UploadPart { target, upload_id, part_number } => {
            debug!(%target, %upload_id, part_number, size = body.len(), "storing part");
            let info = storage.put_part(&target.bucket, &target.key, &upload_id, part_number, &body)?;
            Ok(json_response(StatusCode::OK, &UploadPartResponse { etag: info.etag() }))
        }

        Route::ListParts { target, upload_id } => {
            let parts = storage
                .list_parts(&target.bucket, &upload_id)?
                .iter()
                .map(|p| ListedPart {
                    part_number: p.part_number,
                    etag: p.etag(),
                    size: p.size,
                })
                .collect();
            Ok(json_response(StatusCode::OK, &ListPartsResponse { parts }))
        }

        Route::CompleteUpload { target, upload_id } => {
            let request: CompleteUploadRequest = serde_json::from_slice(&body)
                .map_err(|e| StoreError::InvalidRequest(format!("bad part list: {}", e)))?;
            let metadata =
                storage.complete_upload(&target.bucket, &target.key, &upload_id, &request.parts)?;
            Ok(json_response(
                StatusCode::OK,
                &CompleteUploadResponse {
                    etag: metadata.etag,
                    size: metadata.size,
                    part_count: metadata.manifest.part_count() as u32,
                },
            ))
        }

        Route::AbortUpload { target, upload_id } => {
            storage.abort_upload(&target.bucket, &upload_id)?;
            Ok(empty_response(StatusCode::NO_CONTENT))
        }

        Route::GetObject { target } => {
            let found = (
                storage.get_metadata(&target.bucket, &target.key)?,
                storage.get_object(&target.bucket, &target.key)?,
            );
            match found {
                (Some(metadata), Some(data)) => Ok(object_response(data, &metadata.options)),
                _ => Err(StoreError::NoSuchKey(target.to_string())),
            }
        }

        Route::DeleteObject { target } => {
            storage.delete_object(&target.bucket, &target.key)?;
            Ok(empty_response(StatusCode::NO_CONTENT))
        }
    }
}

fn handle_health() -> Response<BoxBody> {
    json_response(
        StatusCode::OK,
        &HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            service: "streamup".to_string(),
        },
    )
}

fn error_response(err: &StoreError) -> Response<BoxBody> {
    json_response(status_for(err), &ErrorBody::from_store_error(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamup_engine::StorageEngine;

    fn storage() -> (Storage, tempfile::TempDir) {
        let (engine, temp) = StorageEngine::temp().unwrap();
        (Storage::new(engine.with_min_part_size(0)), temp)
    }

    async fn body_json(response: Response<BoxBody>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_multipart_flow() {
        let (storage, _temp) = storage();
        let target = Target::new("photos", "cat.jpg").unwrap();

        let created = dispatch(Route::CreateUpload { target: target.clone() }, Bytes::new(), &storage).unwrap();
        let upload_id = UploadId::new(body_json(created).await["upload_id"].as_str().unwrap());

        let uploaded = dispatch(
            Route::UploadPart { target: target.clone(), upload_id: upload_id.clone(), part_number: 1 },
            Bytes::from_static(b"meow"),
            &storage,
        )
        .unwrap();
        let etag = ETag::new(body_json(uploaded).await["etag"].as_str().unwrap());

        let listed = dispatch(
            Route::ListParts { target: target.clone(), upload_id: upload_id.clone() },
            Bytes::new(),
            &storage,
        )
        .unwrap();
        assert_eq!(body_json(listed).await["parts"][0]["etag"], etag.as_str());

        let request = CompleteUploadRequest { parts: vec![CompletedPart { part_number: 1, etag }] };
        let completed = dispatch(
            Route::CompleteUpload { target: target.clone(), upload_id },
            Bytes::from(serde_json::to_vec(&request).unwrap()),
            &storage,
        )
        .unwrap();
        assert_eq!(body_json(completed).await["size"], 4);

        let object = dispatch(Route::GetObject { target }, Bytes::new(), &storage).unwrap();
        let bytes = object.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"meow");
    }

    #[tokio::test]
    async fn test_object_served_with_creation_options() {
        let (storage, _temp) = storage();
        let target = Target::new("reports", "q3.csv").unwrap();
        let options = ObjectOptions::new()
            .with_content_type("text/csv")
            .with_metadata("owner", "finance");

        let created = dispatch(
            Route::CreateUpload { target: target.clone() },
            Bytes::from(serde_json::to_vec(&options).unwrap()),
            &storage,
        )
        .unwrap();
        let upload_id = UploadId::new(body_json(created).await["upload_id"].as_str().unwrap());
        let info = storage
            .put_part(&target.bucket, &target.key, &upload_id, 1, b"total,12")
            .unwrap();
        storage
            .complete_upload(
                &target.bucket,
                &target.key,
                &upload_id,
                &[CompletedPart { part_number: 1, etag: info.etag() }],
            )
            .unwrap();

        let object = dispatch(Route::GetObject { target }, Bytes::new(), &storage).unwrap();
        assert_eq!(object.headers()["content-type"], "text/csv");
        assert_eq!(object.headers()["x-streamup-meta-owner"], "finance");
    }

    #[tokio::test]
    async fn test_malformed_object_options_are_bad_request() {
        let (storage, _temp) = storage();
        let target = Target::new("reports", "q3.csv").unwrap();

        let err = dispatch(Route::CreateUpload { target }, Bytes::from_static(b"[1, 2]"), &storage)
            .unwrap_err();
        assert_eq!(status_for(&err), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_upload_maps_to_not_found() {
        let (storage, _temp) = storage();
        let target = Target::new("photos", "cat.jpg").unwrap();

        let err = dispatch(
            Route::AbortUpload { target, upload_id: UploadId::new("missing") },
            Bytes::new(),
            &storage,
        )
        .unwrap_err();
        let response = error_response(&err);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "NoSuchUpload");
    }

    #[tokio::test]
    async fn test_malformed_completion_body_is_bad_request() {
        let (storage, _temp) = storage();
        let target = Target::new("photos", "cat.jpg").unwrap();
        let upload = storage.create_upload(&target.bucket, &target.key, &ObjectOptions::default()).unwrap();

        let err = dispatch(
            Route::CompleteUpload { target, upload_id: upload.upload_id },
            Bytes::from_static(b"not json"),
            &storage,
        )
        .unwrap_err();
        assert_eq!(status_for(&err), StatusCode::BAD_REQUEST);
    }
}
