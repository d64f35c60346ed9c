//! Share proofs as opaque, verifiable capabilities.
//!
//! The registry never looks inside a proof: it only asks a [`ProofArtifact`]
//! whether it verifies. [`CircuitProof`] is the halo2-backed artifact.

use crate::circuit::{
    public_inputs, verify_with_key, MrlnProver, RlnCircuit, RlnPublicInput, RlnPublicOutput,
    RlnWitness,
};
use crate::config::KeysConfig;
use crate::CIRCUIT_K;
use anyhow::{Context, Result};
use halo2_proofs::plonk::{keygen_vk, VerifyingKey};
use halo2_proofs::poly::commitment::Params;
use log::{debug, info};
use pasta_curves::{pallas, vesta};
use std::fs;
use std::io::{BufReader, BufWriter, Write};

/// A proof the registry can check but not interpret.
pub trait ProofArtifact {
    fn verify(&self) -> bool;
}

impl<P: ProofArtifact + ?Sized> ProofArtifact for &P {
    fn verify(&self) -> bool {
        (**self).verify()
    }
}

/// A serialized share proof together with the public values it commits to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MrlnProof {
    pub input: RlnPublicInput,
    pub output: RlnPublicOutput,
    pub bytes: Vec<u8>,
}

impl MrlnProof {
    /// Proves `witness` for `input`.
    pub fn create(
        prover: &mut MrlnProver,
        params: &Params<vesta::Affine>,
        witness: &RlnWitness,
        input: RlnPublicInput,
    ) -> Result<Self> {
        let output = witness.public_output(&input);
        let circuit = witness.to_circuit()?;
        let bytes = prover
            .generate_proof(params, circuit, &public_inputs(&input, &output))
            .map_err(|e| anyhow::anyhow!("Failed to create share proof: {e:?}"))?;

        Ok(Self {
            input,
            output,
            bytes,
        })
    }

    #[must_use]
    pub fn public_inputs(&self) -> Vec<pallas::Base> {
        public_inputs(&self.input, &self.output)
    }
}

/// Verifying key and parameters for share proofs.
pub struct MrlnVerifier {
    params: Params<vesta::Affine>,
    vk: VerifyingKey<vesta::Affine>,
}

impl MrlnVerifier {
    pub fn new(params: Params<vesta::Affine>) -> Result<Self> {
        let vk = keygen_vk(&params, &RlnCircuit::default())
            .map_err(|e| anyhow::anyhow!("{e:?}"))
            .context("Failed to generate verifying key")?;
        Ok(Self { params, vk })
    }

    #[must_use]
    pub fn verify(&self, proof: &MrlnProof) -> bool {
        verify_with_key(&self.params, &self.vk, &proof.bytes, &proof.public_inputs())
    }

    /// Binds `proof` to this verifier as a [`ProofArtifact`].
    #[must_use]
    pub fn artifact<'a>(&'a self, proof: &'a MrlnProof) -> CircuitProof<'a> {
        CircuitProof {
            verifier: self,
            proof,
            expected_root: None,
        }
    }
}

/// A share proof checked by a halo2 verifier, optionally pinned to a membership root.
pub struct CircuitProof<'a> {
    verifier: &'a MrlnVerifier,
    proof: &'a MrlnProof,
    expected_root: Option<pallas::Base>,
}

impl CircuitProof<'_> {
    /// Only accept the proof if it was made against `root`.
    #[must_use]
    pub fn with_root(mut self, root: pallas::Base) -> Self {
        self.expected_root = Some(root);
        self
    }
}

impl ProofArtifact for CircuitProof<'_> {
    fn verify(&self) -> bool {
        if let Some(root) = self.expected_root {
            if self.proof.output.root != root {
                debug!("Share proof made against a different membership root");
                return false;
            }
        }
        self.verifier.verify(self.proof)
    }
}

/// IPA parameters for [`CIRCUIT_K`], read from or written to `keys.cache_dir`
/// when persistence is enabled.
pub fn load_or_create_params(keys: &KeysConfig) -> Result<Params<vesta::Affine>> {
    if !keys.enable_persistence {
        return Ok(Params::new(CIRCUIT_K));
    }

    let path = keys.cache_dir.join(format!("params_k{CIRCUIT_K}.bin"));
    if path.exists() {
        let file = fs::File::open(&path)
            .with_context(|| format!("Failed to open params file: {}", path.display()))?;
        let params = Params::read(&mut BufReader::new(file))
            .with_context(|| format!("Failed to read params file: {}", path.display()))?;
        debug!("Loaded params from {}", path.display());
        return Ok(params);
    }

    let params = Params::new(CIRCUIT_K);
    fs::create_dir_all(&keys.cache_dir).with_context(|| {
        format!("Failed to create key cache directory: {}", keys.cache_dir.display())
    })?;
    let file = fs::File::create(&path)
        .with_context(|| format!("Failed to create params file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    params
        .write(&mut writer)
        .and_then(|()| writer.flush())
        .with_context(|| format!("Failed to write params file: {}", path.display()))?;
    info!("Cached params at {}", path.display());
    Ok(params)
}
