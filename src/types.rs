//! Serialized share proofs and the helpers that derive their public inputs.

use crate::circuit::{RlnPublicInput, RlnPublicOutput};
use crate::config::SecurityConfig;
use crate::proof::MrlnProof;
use crate::utils::{bytes_to_field, field_from_hex, field_to_hex, poseidon_hash};
use anyhow::{Context, Result};
use log::debug;
use pasta_curves::pallas;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

pub const FIELD_HEX_LENGTH: usize = 64;

/// A share as it travels on the wire: proof bytes plus every public input in hex.
///
/// `x` and `external_nullifier` are the prover's inputs; `y`, `root` and
/// `nullifier` are the values the circuit exposes. Together they are the
/// instance column `[x, external_nullifier, y, root, nullifier]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareProofOutput {
    pub x: String,
    pub external_nullifier: String,
    pub y: String,
    pub root: String,
    /// Shared by every message an identity sends under one external nullifier.
    pub nullifier: String,
    /// Raw halo2 proof bytes
    pub zkp_proof: Vec<u8>,
    /// Unix timestamp when proof was generated
    pub timestamp: u64,
}

/// The `(nullifier, x, y)` triple a verifier remembers per accepted share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Share {
    pub nullifier: pallas::Base,
    pub x: pallas::Base,
    pub y: pallas::Base,
}

impl ShareProofOutput {
    #[must_use]
    pub fn from_proof(proof: &MrlnProof, timestamp: u64) -> Self {
        Self {
            x: field_to_hex(proof.input.x),
            external_nullifier: field_to_hex(proof.input.external_nullifier),
            y: field_to_hex(proof.output.y),
            root: field_to_hex(proof.output.root),
            nullifier: field_to_hex(proof.output.nullifier),
            zkp_proof: proof.bytes.clone(),
            timestamp,
        }
    }

    /// Validates with the default timestamp window.
    pub fn validate(&self) -> Result<()> {
        self.validate_with(&SecurityConfig::default())
    }

    /// Checks presence, timestamp window and canonical hex of every field.
    ///
    /// Does not verify the proof itself; that needs a verifying key.
    pub fn validate_with(&self, security: &SecurityConfig) -> Result<()> {
        debug!("Starting share proof validation");
        debug!("ZK proof size: {} bytes", self.zkp_proof.len());
        debug!("Timestamp: {}", self.timestamp);

        if self.zkp_proof.is_empty() {
            return Err(anyhow::anyhow!(
                "ZK proof cannot be empty. The proof data is missing."
            ));
        }

        let current_timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .map_err(|e| anyhow::anyhow!("System clock unavailable: {}", e))?;
        debug!("Current timestamp: {}", current_timestamp);

        if self.timestamp > current_timestamp.saturating_add(security.timestamp_tolerance_secs) {
            return Err(anyhow::anyhow!(
                "Timestamp is too far in the future: {} (current: {}, tolerance: {}s). Please check system clock and proof timestamp.",
                self.timestamp,
                current_timestamp,
                security.timestamp_tolerance_secs
            ));
        }

        if current_timestamp > self.timestamp.saturating_add(security.timestamp_max_age_secs) {
            return Err(anyhow::anyhow!(
                "Timestamp is too old: {} (current: {}, max age: {}s). This proof may be expired. Please generate a fresh proof.",
                self.timestamp,
                current_timestamp,
                security.timestamp_max_age_secs
            ));
        }

        self.to_proof().map(|_| ())
    }

    /// Parses the public values back into field elements.
    pub fn to_proof(&self) -> Result<MrlnProof> {
        let field = |name: &str, hex: &str| {
            if hex.is_empty() {
                return Err(anyhow::anyhow!(
                    "{name} cannot be empty. Expected {FIELD_HEX_LENGTH} hex characters."
                ));
            }
            field_from_hex(hex).with_context(|| format!("Invalid {name} '{hex}'"))
        };

        Ok(MrlnProof {
            input: RlnPublicInput {
                x: field("x", &self.x)?,
                external_nullifier: field("external nullifier", &self.external_nullifier)?,
            },
            output: RlnPublicOutput {
                y: field("y", &self.y)?,
                root: field("root", &self.root)?,
                nullifier: field("nullifier", &self.nullifier)?,
            },
            bytes: self.zkp_proof.clone(),
        })
    }
}

impl From<&MrlnProof> for Share {
    fn from(proof: &MrlnProof) -> Self {
        Self {
            nullifier: proof.output.nullifier,
            x: proof.input.x,
            y: proof.output.y,
        }
    }
}

/// Maps an arbitrary signal to the evaluation point `x`.
///
/// # Examples
///
/// ```
/// use mrln::types::signal_hash;
///
/// assert_eq!(signal_hash("hello"), signal_hash("hello"));
/// assert_ne!(signal_hash("hello"), signal_hash("world"));
/// ```
#[must_use]
pub fn signal_hash(signal: &str) -> pallas::Base {
    let digest: [u8; 32] = Sha3_256::digest(signal.as_bytes()).into();
    bytes_to_field(&digest)
}

/// External nullifier for `epoch` within one application: `H(epoch, application)`.
#[must_use]
#[inline]
pub fn external_nullifier(epoch: u64, application: u64) -> pallas::Base {
    poseidon_hash(pallas::Base::from(epoch), pallas::Base::from(application))
}
