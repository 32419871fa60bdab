//! JSON bodies and error mapping

use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use streamup_core::*;

use crate::ProtocolError;

/// Body of `POST ?uploads`; an empty body means no options
pub type CreateUploadRequest = ObjectOptions;

/// Response to `POST ?uploads`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateUploadResponse {
    pub upload_id: UploadId,
}

/// Response to `PUT ?partNumber&uploadId`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPartResponse {
    pub etag: ETag,
}

/// Response to `GET ?uploadId`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPartsResponse {
    pub parts: Vec<ListedPart>,
}

/// Body of `POST ?uploadId`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteUploadRequest {
    pub parts: Vec<CompletedPart>,
}

/// Response to `POST ?uploadId`
pub type CompleteUploadResponse = CompletedUpload;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

/// Error body carried by every non-2xx response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl ErrorBody {
    pub fn from_store_error(err: &StoreError) -> Self {
        ErrorBody {
            error: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// Rebuild the store error this body describes
    pub fn into_store_error(self, status: StatusCode) -> StoreError {
        match self.error.as_str() {
            "RequestTimeout" => StoreError::Timeout(self.message),
            "NoSuchUpload" => StoreError::NoSuchUpload(self.message),
            "NoSuchKey" => StoreError::NoSuchKey(self.message),
            "InvalidPart" => StoreError::InvalidPart(self.message),
            "InvalidRequest" | "NotFound" => StoreError::InvalidRequest(self.message),
            "AccessDenied" => StoreError::AuthenticationFailed(self.message),
            _ => StoreError::Storage(format!("{} ({}): {}", self.error, status, self.message)),
        }
    }
}

/// HTTP status for a store error code
pub fn status_for(err: &StoreError) -> StatusCode {
    status_for_code(err.code())
}

pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        "NoSuchUpload" | "NoSuchKey" | "NotFound" => StatusCode::NOT_FOUND,
        "InvalidPart" | "InvalidRequest" => StatusCode::BAD_REQUEST,
        "AccessDenied" => StatusCode::FORBIDDEN,
        "RequestTimeout" => StatusCode::REQUEST_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Status and body for a request that did not resolve to a route
pub fn protocol_error_response(err: &ProtocolError) -> (StatusCode, ErrorBody) {
    let code = match err {
        ProtocolError::NotFound(_) => "NotFound",
        _ => "InvalidRequest",
    };
    let body = ErrorBody {
        error: code.to_string(),
        message: err.to_string(),
    };
    (status_for_code(code), body)
}

/// Turn a non-success response into a store error.
///
/// Gateway and request timeouts are the transient class regardless of the body.
pub fn decode_error(status: StatusCode, body: &[u8]) -> StoreError {
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        let message = String::from_utf8_lossy(body).into_owned();
        return StoreError::Timeout(format!("{}: {}", status, message));
    }

    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(error_body) => error_body.into_store_error(status),
        Err(_) => StoreError::InvalidResponse(format!(
            "{} with body '{}'",
            status,
            String::from_utf8_lossy(body)
        )),
    }
}
