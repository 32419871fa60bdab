//! Ed25519 credentials
//!
//! A client's credentials are an Ed25519 key pair. The server is configured
//! with the public halves it accepts.

use crate::{hex, Result, StoreError};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;

/// Ed25519 key pair used to sign requests
#[derive(Clone)]
pub struct Credentials {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl Credentials {
    /// Generate a new key pair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();

        Credentials {
            signing_key,
            verifying_key,
        }
    }

    /// Rebuild credentials from the 32-byte secret key
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(bytes);
        let verifying_key = signing_key.verifying_key();

        Credentials {
            signing_key,
            verifying_key,
        }
    }

    /// Parse a hex-encoded secret key
    pub fn from_secret_hex(secret: &str) -> Result<Self> {
        let bytes = hex::decode_32(secret.trim())
            .ok_or_else(|| StoreError::AuthenticationFailed("invalid secret key".to_string()))?;
        Ok(Self::from_secret_bytes(&bytes))
    }

    /// Secret key bytes (sensitive)
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Public half of these credentials
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_verifying_key(self.verifying_key)
    }

    /// Sign data with the secret key
    pub fn sign(&self, data: &[u8]) -> Signature {
        self.signing_key.sign(data)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("public_key", &self.public_key().to_hex())
            .finish_non_exhaustive()
    }
}

/// Public key for verification operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
}

impl PublicKey {
    /// Create from verifying key
    pub fn from_verifying_key(verifying_key: VerifyingKey) -> Self {
        PublicKey { verifying_key }
    }

    /// Create from public key bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes)
            .map_err(|e| StoreError::AuthenticationFailed(format!("invalid public key: {}", e)))?;

        Ok(PublicKey { verifying_key })
    }

    /// Parse a hex-encoded public key
    pub fn from_hex(key: &str) -> Result<Self> {
        let bytes = hex::decode_32(key.trim())
            .ok_or_else(|| StoreError::AuthenticationFailed("invalid public key encoding".to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Get public key bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Verify a signature against data
    pub fn verify(&self, data: &[u8], signature: &Signature) -> Result<()> {
        self.verifying_key
            .verify(data, signature)
            .map_err(|_| StoreError::InvalidSignature)
    }
}
