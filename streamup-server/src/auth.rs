//! Signed request verification

use hyper::{HeaderMap, Method};
use std::sync::Mutex;
use std::time::Duration;
use streamup_core::auth::{CanonicalRequest, NonceCache, PublicKey, SignatureHeaders};
use streamup_core::{Result, StoreError, Target};
use streamup_net::{Route, HEADER_KEY, HEADER_NONCE, HEADER_SIGNATURE, HEADER_TIMESTAMP};

/// How far a request timestamp may drift from the server clock
pub const DEFAULT_REPLAY_WINDOW: Duration = Duration::from_secs(300);

/// Checks signatures against a fixed set of client keys
pub struct Authenticator {
    authorized: Vec<PublicKey>,
    nonces: Mutex<NonceCache>,
}

impl Authenticator {
    pub fn new(authorized: Vec<PublicKey>) -> Self {
        Self::with_window(authorized, DEFAULT_REPLAY_WINDOW)
    }

    pub fn with_window(authorized: Vec<PublicKey>, window: Duration) -> Self {
        Authenticator {
            authorized,
            nonces: Mutex::new(NonceCache::new(window)),
        }
    }

    /// Verify the signature headers of a request for `route`
    pub fn verify(
        &self,
        method: &Method,
        route: &Route,
        target: &Target,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<()> {
        let signature = SignatureHeaders {
            key: header(headers, HEADER_KEY)?,
            signature: header(headers, HEADER_SIGNATURE)?,
            timestamp: header(headers, HEADER_TIMESTAMP)?,
            nonce: header(headers, HEADER_NONCE)?,
        };

        let mut request = CanonicalRequest::new(method.as_str(), target.clone(), body);
        for (name, value) in route.query_params() {
            request = request.with_query_param(name, &value);
        }

        let mut nonces = self
            .nonces
            .lock()
            .map_err(|_| StoreError::Internal("nonce cache poisoned".to_string()))?;
        signature.verify(request, &self.authorized, &mut nonces)?;
        Ok(())
    }
}

fn header(headers: &HeaderMap, name: &'static str) -> Result<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| StoreError::AuthenticationFailed(format!("missing {} header", name)))
}
