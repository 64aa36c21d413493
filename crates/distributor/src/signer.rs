//! Request signing.
//!
//! The distributor only answers collectors it knows, identified by an
//! Ed25519 public key. Every request body is wrapped in a
//! [`SignedRequest`] carrying the `sender` key and a `sign` signature over
//! the SHA-256 of the JSON-encoded body.
//!
//! Signing is a seam: anything implementing [`RequestSigner`] can be handed
//! to the HTTP client.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::DistributorError;
use crate::query::DistributorRequest;
use crate::Result;

/// A request body with its sender and signature attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRequest {
    /// The unsigned body, flattened into the envelope.
    #[serde(flatten)]
    pub body: DistributorRequest,
    /// Hex-encoded public key of the collector.
    pub sender: String,
    /// Hex-encoded signature.
    pub sign: String,
}

/// Produces signed requests.
pub trait RequestSigner: Send + Sync {
    /// Sign `body`.
    fn sign(&self, body: DistributorRequest) -> Result<SignedRequest>;
}

/// Ed25519 signer holding the collector's secret key.
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// Create a signer from a 32-byte secret seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
        }
    }

    /// Create a signer from a hex-encoded 32-byte secret seed.
    pub fn from_hex(secret_hex: &str) -> Result<Self> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| DistributorError::Signing(format!("invalid secret key hex: {e}")))?;
        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            DistributorError::Signing(format!(
                "invalid secret key length: expected 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::from_seed(&seed))
    }

    /// Hex-encoded public key, used as the `sender` field.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().as_bytes())
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Signer({})", self.public_key_hex())
    }
}

impl RequestSigner for Ed25519Signer {
    fn sign(&self, body: DistributorRequest) -> Result<SignedRequest> {
        let digest = body_digest(&body)?;
        let signature = self.key.sign(&digest);
        Ok(SignedRequest {
            body,
            sender: self.public_key_hex(),
            sign: hex::encode(signature.to_bytes()),
        })
    }
}

fn body_digest(body: &DistributorRequest) -> Result<[u8; 32]> {
    let encoded = serde_json::to_vec(body)?;
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Ok(bytes)
}

/// Check that `request.sign` is a valid signature by `request.sender`.
pub fn verify_signed_request(request: &SignedRequest) -> Result<()> {
    let key_bytes: [u8; 32] = hex::decode(&request.sender)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| DistributorError::Signing("invalid sender key".to_string()))?;
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|_| DistributorError::Signing("invalid sender key".to_string()))?;
    let sig_bytes: [u8; 64] = hex::decode(&request.sign)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| DistributorError::Signing("invalid signature encoding".to_string()))?;
    let signature = Signature::from_bytes(&sig_bytes);
    let digest = body_digest(&request.body)?;
    key.verify(&digest, &signature)
        .map_err(|_| DistributorError::Signing("signature mismatch".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED_HEX: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

    #[test]
    fn test_sign_and_verify() {
        let signer = Ed25519Signer::from_hex(SEED_HEX).unwrap();
        let signed = signer.sign(DistributorRequest::tally(5, 10)).unwrap();
        assert_eq!(signed.sender, signer.public_key_hex());
        assert_eq!(signed.sign.len(), 128);
        verify_signed_request(&signed).unwrap();
    }

    #[test]
    fn test_tampered_body_fails_verification() {
        let signer = Ed25519Signer::from_hex(SEED_HEX).unwrap();
        let mut signed = signer.sign(DistributorRequest::cycle_range(0, 9)).unwrap();
        signed.body.end_cycle = Some(10);
        assert!(verify_signed_request(&signed).is_err());
    }

    #[test]
    fn test_envelope_flattens_body() {
        let signer = Ed25519Signer::from_hex(SEED_HEX).unwrap();
        let signed = signer.sign(DistributorRequest::latest_cycles(1)).unwrap();
        let value = serde_json::to_value(&signed).unwrap();
        assert_eq!(value["count"], 1);
        assert!(value["sender"].is_string());
        assert!(value["sign"].is_string());
    }

    #[test]
    fn test_bad_seed() {
        assert!(Ed25519Signer::from_hex("zz").is_err());
        assert!(Ed25519Signer::from_hex("abcd").is_err());
    }
}
