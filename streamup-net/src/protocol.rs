//! Route definitions and URL handling

use hyper::Method;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::BTreeMap;
use streamup_core::{StoreError, Target, UploadId};

use crate::{API_PREFIX, HEALTH_PATH, QUERY_PART_NUMBER, QUERY_UPLOADS, QUERY_UPLOAD_ID};

/// Unreserved characters per RFC 3986 stay as they are
const STRICT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Protocol error types
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("No route for {0}")]
    NotFound(String),

    #[error("Malformed path: {0}")]
    MalformedPath(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid parameter {0}: {1}")]
    InvalidParameter(&'static str, String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

impl From<ProtocolError> for StoreError {
    fn from(err: ProtocolError) -> Self {
        StoreError::InvalidRequest(err.to_string())
    }
}

/// One operation of the HTTP API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Health,
    CreateUpload { target: Target },
    UploadPart { target: Target, upload_id: UploadId, part_number: u32 },
    ListParts { target: Target, upload_id: UploadId },
    CompleteUpload { target: Target, upload_id: UploadId },
    AbortUpload { target: Target, upload_id: UploadId },
    GetObject { target: Target },
    DeleteObject { target: Target },
}

impl Route {
    /// Resolve a request line into a route
    pub fn parse(method: &Method, path: &str, query: Option<&str>) -> Result<Route, ProtocolError> {
        if path == HEALTH_PATH {
            if method == Method::GET {
                return Ok(Route::Health);
            }
            return Err(ProtocolError::UnsupportedOperation(format!("{} {}", method, path)));
        }

        let rest = path
            .strip_prefix(API_PREFIX)
            .ok_or_else(|| ProtocolError::NotFound(path.to_string()))?;
        let target = parse_object_path(rest)?;
        let params = parse_query(query.unwrap_or(""))?;

        let upload_id = params.get(QUERY_UPLOAD_ID).map(|id| UploadId::new(id.as_str()));
        if let Some(id) = &upload_id {
            if id.is_empty() {
                return Err(ProtocolError::InvalidParameter(QUERY_UPLOAD_ID, "empty".to_string()));
            }
        }
        let part_number = params
            .get(QUERY_PART_NUMBER)
            .map(|n| parse_part_number(n))
            .transpose()?;

        let route = match (method, params.contains_key(QUERY_UPLOADS), upload_id, part_number) {
            (&Method::POST, true, None, None) => Route::CreateUpload { target },
            (&Method::PUT, false, Some(upload_id), Some(part_number)) => Route::UploadPart {
                target,
                upload_id,
                part_number,
            },
            (&Method::PUT, false, Some(_), None) => {
                return Err(ProtocolError::MissingParameter(QUERY_PART_NUMBER))
            }
            (&Method::PUT, false, None, Some(_)) => {
                return Err(ProtocolError::MissingParameter(QUERY_UPLOAD_ID))
            }
            (&Method::GET, false, Some(upload_id), None) => Route::ListParts { target, upload_id },
            (&Method::POST, false, Some(upload_id), None) => Route::CompleteUpload { target, upload_id },
            (&Method::DELETE, false, Some(upload_id), None) => Route::AbortUpload { target, upload_id },
            (&Method::GET, false, None, None) => Route::GetObject { target },
            (&Method::DELETE, false, None, None) => Route::DeleteObject { target },
            _ => {
                return Err(ProtocolError::UnsupportedOperation(format!("{} {}", method, path)))
            }
        };

        Ok(route)
    }

    pub fn method(&self) -> Method {
        match self {
            Route::Health | Route::ListParts { .. } | Route::GetObject { .. } => Method::GET,
            Route::CreateUpload { .. } | Route::CompleteUpload { .. } => Method::POST,
            Route::UploadPart { .. } => Method::PUT,
            Route::AbortUpload { .. } | Route::DeleteObject { .. } => Method::DELETE,
        }
    }

    pub fn target(&self) -> Option<&Target> {
        match self {
            Route::Health => None,
            Route::CreateUpload { target }
            | Route::UploadPart { target, .. }
            | Route::ListParts { target, .. }
            | Route::CompleteUpload { target, .. }
            | Route::AbortUpload { target, .. }
            | Route::GetObject { target }
            | Route::DeleteObject { target } => Some(target),
        }
    }

    /// Query parameters in sorted order; flag parameters carry an empty value
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        match self {
            Route::CreateUpload { .. } => vec![(QUERY_UPLOADS, String::new())],
            Route::UploadPart { upload_id, part_number, .. } => vec![
                (QUERY_PART_NUMBER, part_number.to_string()),
                (QUERY_UPLOAD_ID, upload_id.to_string()),
            ],
            Route::ListParts { upload_id, .. }
            | Route::CompleteUpload { upload_id, .. }
            | Route::AbortUpload { upload_id, .. } => vec![(QUERY_UPLOAD_ID, upload_id.to_string())],
            Route::Health | Route::GetObject { .. } | Route::DeleteObject { .. } => Vec::new(),
        }
    }

    /// Encoded path and query, ready to append to an endpoint
    pub fn path_and_query(&self) -> String {
        let mut uri = match self.target() {
            None => HEALTH_PATH.to_string(),
            Some(target) => object_path(target),
        };

        let query = self
            .query_params()
            .into_iter()
            .map(|(name, value)| {
                if value.is_empty() {
                    name.to_string()
                } else {
                    format!("{}={}", name, encode_component(&value))
                }
            })
            .collect::<Vec<_>>()
            .join("&");

        if !query.is_empty() {
            uri.push('?');
            uri.push_str(&query);
        }
        uri
    }
}

/// `/v1/{bucket}/{key}` with both components percent-encoded
pub fn object_path(target: &Target) -> String {
    format!(
        "{}{}/{}",
        API_PREFIX,
        encode_component(target.bucket.as_str()),
        encode_component(target.key.as_str())
    )
}

/// Split the part of a path after the API prefix into a target.
///
/// The key is everything after the first slash, so unencoded nested keys work too.
pub fn parse_object_path(rest: &str) -> Result<Target, ProtocolError> {
    let (bucket, key) = rest
        .split_once('/')
        .ok_or_else(|| ProtocolError::MalformedPath("expected /v1/{bucket}/{key}".to_string()))?;

    let bucket = decode_component(bucket)?;
    let key = decode_component(key)?;
    Target::new(&bucket, &key).map_err(|e| ProtocolError::MalformedPath(e.to_string()))
}

/// Parse a query string; a parameter without `=` is a flag with an empty value
pub fn parse_query(query: &str) -> Result<BTreeMap<String, String>, ProtocolError> {
    let mut params = BTreeMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.insert(decode_component(name)?, decode_component(value)?);
    }
    Ok(params)
}

pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, STRICT_ENCODE_SET).to_string()
}

pub fn decode_component(value: &str) -> Result<String, ProtocolError> {
    percent_decode_str(value)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| ProtocolError::MalformedPath(format!("invalid utf-8 in '{}'", value)))
}

fn parse_part_number(value: &str) -> Result<u32, ProtocolError> {
    match value.parse::<u32>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(ProtocolError::InvalidParameter(QUERY_PART_NUMBER, value.to_string())),
    }
}
