//! Multi-message rate-limiting nullifiers (MRLN).
//!
//! Members stake tokens to buy a per-epoch message quota. Each message carries
//! a zero-knowledge share proving membership and quota compliance; sending
//! more than the quota reveals the member's secret, and anyone holding the
//! evidence can slash the stake.
//!
//! # Components
//!
//! - [`RlnCircuit`]: halo2 circuit proving one share
//! - [`MrlnProver`] / [`MrlnVerifier`]: proof generation and verification
//! - [`MerkleTree`]: Poseidon Merkle tree of rate commitments
//! - [`MrlnRegistry`]: staking state machine (register, withdraw, release, slash)
//! - [`TokenLedger`]: in-memory escrow the registry settles against
//! - [`ShareProofOutput`]: serialized share proof format
//! - [`ShareLog`]: replay and rate-limit detection for verifiers
//!
//! # Example
//!
//! ```no_run
//! use mrln::{
//!     circuit::{RlnPublicInput, RlnWitness},
//!     merkle::MerkleTree,
//!     proof::{MrlnProof, MrlnVerifier},
//!     MrlnProver, CIRCUIT_K, TREE_HEIGHT,
//! };
//! use halo2_proofs::poly::commitment::Params;
//! use pasta_curves::{pallas, vesta};
//!
//! let secret = pallas::Base::from(42);
//! let limit = pallas::Base::from(3);
//! let leaf = mrln::circuit::rate_commitment(mrln::circuit::identity_commitment(secret), limit);
//! let tree = MerkleTree::from_leaves(TREE_HEIGHT, &[leaf]).unwrap();
//!
//! let witness = RlnWitness {
//!     identity_secret: secret,
//!     user_message_limit: limit,
//!     message_id: pallas::Base::from(0),
//!     merkle_witness: tree.witness(0).unwrap(),
//! };
//! let input = RlnPublicInput {
//!     x: pallas::Base::from(7),
//!     external_nullifier: mrln::types::external_nullifier(1, 0),
//! };
//!
//! let params = Params::<vesta::Affine>::new(CIRCUIT_K);
//! let proof = MrlnProof::create(&mut MrlnProver::new(), &params, &witness, input).unwrap();
//! assert!(MrlnVerifier::new(params).unwrap().verify(&proof));
//! ```

pub mod account;
pub mod balances;
pub mod circuit;
pub mod config;
pub mod merkle;
pub mod proof;
pub mod registry;
pub mod shares;
pub mod table;
pub mod types;
pub mod utils;

#[cfg(test)]
mod merkle_tests;

pub use account::Account;
pub use balances::{Escrow, EscrowError, TokenLedger};
pub use circuit::{MrlnProver, RlnCircuit};
pub use merkle::{MerkleTree, MerkleWitness};
pub use proof::{CircuitProof, MrlnProof, MrlnVerifier, ProofArtifact};
pub use registry::{MrlnRegistry, RegistryConfig, RegistryError, TxContext};
pub use shares::{ShareLog, ShareOutcome};
pub use types::ShareProofOutput;
pub use utils::{bytes_to_field, field_to_bytes, poseidon_hash};

/// Height of the membership tree; the registry's `set_size` is `1 << TREE_HEIGHT`.
pub const TREE_HEIGHT: usize = 20;

/// Circuit parameter for the halo2 proving system.
///
/// `k = 12` gives 4096 rows. A share spends most of them on Poseidon
/// permutations, one per Merkle level plus a handful for the commitments,
/// `a1` and the nullifier.
///
/// Changing `CIRCUIT_K` requires regenerating all proving and verifying keys.
/// Prover and verifier must use the same value, or verification will fail.
pub const CIRCUIT_K: u32 = 12;
