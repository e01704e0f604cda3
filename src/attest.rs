//! Attestation boundary.
//!
//! Proof construction happens in an external subsystem; this crate only
//! holds the handle it returns. A failed or unverified attestation aborts
//! the execution; no handle is ever fabricated in its place.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::error::{MarshalError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Handle returned by the proving collaborator
#[derive(Debug, Clone)]
pub struct Attestation {
    pub handle: String,
    pub verified: bool,
}

/// External proving collaborator: `attest(claim, witness)` over the
/// computed result. Possibly failing; treated as a remote call.
#[async_trait]
pub trait Attestor: Send + Sync {
    async fn attest(&self, claim: &Value, witness: &Value) -> Result<Attestation>;
}

/// In-process attestor producing keyed HMAC-SHA256 handles. Stands in for
/// the remote prover in deployments that only need tamper-evident audit
/// handles rather than zero-knowledge proofs.
pub struct HmacAttestor {
    key: Vec<u8>,
}

impl HmacAttestor {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: secret.as_ref().to_vec(),
        }
    }
}

#[async_trait]
impl Attestor for HmacAttestor {
    async fn attest(&self, claim: &Value, witness: &Value) -> Result<Attestation> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| MarshalError::AttestationFailed(format!("HMAC init failed: {}", e)))?;

        mac.update(&serde_json::to_vec(claim)?);
        mac.update(b"|");
        mac.update(&serde_json::to_vec(witness)?);

        let tag = mac.finalize().into_bytes();
        Ok(Attestation {
            handle: hex::encode(tag),
            verified: true,
        })
    }
}
