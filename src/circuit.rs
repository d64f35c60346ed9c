//! Membership + secret-share circuit.
//!
//! Proves, without revealing the identity secret, that
//!
//! 1. `identity_commitment = H(identity_secret)`
//! 2. `rate_commitment = H(identity_commitment, user_message_limit)`
//! 3. `rate_commitment` is a leaf of the membership tree with root `root`
//! 4. `a1 = H(identity_secret, external_nullifier, message_id)`
//! 5. `y = a1 * x + identity_secret`
//! 6. `nullifier = H(a1)`
//!
//! `H` is Poseidon (`P128Pow5T3`) over the Pallas base field. The instance
//! column holds `[x, external_nullifier, y, root, nullifier]`: the first two
//! are the public input, the last three the public output.
//!
//! Every message in one epoch yields a point `(x, y)` on the line
//! `a1 * X + identity_secret`, so two messages in the same epoch reveal the
//! secret to anyone holding both shares, and both carry the same nullifier.

use crate::merkle::MerkleWitness;
use crate::utils::{poseidon_hash, poseidon_hash1, poseidon_hash3};
use crate::TREE_HEIGHT;
use anyhow::Result;
use halo2_gadgets::poseidon::{
    primitives::{ConstantLength, P128Pow5T3},
    Hash as PoseidonHash, Pow5Chip, Pow5Config,
};
use halo2_proofs::{
    circuit::{AssignedCell, Layouter, SimpleFloorPlanner, Value},
    plonk::{
        create_proof, keygen_pk, keygen_vk, verify_proof, Advice, Circuit, Column,
        ConstraintSystem, Error, Expression, Instance, ProvingKey, Selector, SingleVerifier,
        VerifyingKey,
    },
    poly::{commitment::Params, Rotation},
    transcript::{Blake2bRead, Blake2bWrite, Challenge255},
};
use log::debug;
use pasta_curves::{pallas, vesta};
use rand::rngs::OsRng;
use std::sync::Arc;

type Cell = AssignedCell<pallas::Base, pallas::Base>;

/// Row of `x` in the instance column.
pub const X_ROW: usize = 0;
/// Row of the external nullifier in the instance column.
pub const EXTERNAL_NULLIFIER_ROW: usize = 1;
/// Row of the share `y` in the instance column.
pub const Y_ROW: usize = 2;
/// Row of the membership root in the instance column.
pub const ROOT_ROW: usize = 3;
/// Row of the nullifier in the instance column.
pub const NULLIFIER_ROW: usize = 4;

/// Public input of a share proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RlnPublicInput {
    /// Evaluation point, usually derived from the signal being sent.
    pub x: pallas::Base,
    /// Epoch identifier.
    pub external_nullifier: pallas::Base,
}

/// Public output of a share proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RlnPublicOutput {
    pub y: pallas::Base,
    pub root: pallas::Base,
    pub nullifier: pallas::Base,
}

/// Lays out public input and output in instance-column order.
#[must_use]
pub fn public_inputs(input: &RlnPublicInput, output: &RlnPublicOutput) -> Vec<pallas::Base> {
    vec![
        input.x,
        input.external_nullifier,
        output.y,
        output.root,
        output.nullifier,
    ]
}

#[must_use]
pub fn identity_commitment(identity_secret: pallas::Base) -> pallas::Base {
    poseidon_hash1(identity_secret)
}

/// Leaf value stored in the membership tree for an identity and its quota.
#[must_use]
pub fn rate_commitment(
    identity_commitment: pallas::Base,
    user_message_limit: pallas::Base,
) -> pallas::Base {
    poseidon_hash(identity_commitment, user_message_limit)
}

/// Private inputs of the share circuit.
#[derive(Debug, Clone)]
pub struct RlnWitness {
    pub identity_secret: pallas::Base,
    pub user_message_limit: pallas::Base,
    pub message_id: pallas::Base,
    pub merkle_witness: MerkleWitness,
}

impl RlnWitness {
    #[must_use]
    pub fn identity_commitment(&self) -> pallas::Base {
        identity_commitment(self.identity_secret)
    }

    #[must_use]
    pub fn rate_commitment(&self) -> pallas::Base {
        rate_commitment(self.identity_commitment(), self.user_message_limit)
    }

    /// Slope of the epoch's share line.
    #[must_use]
    pub fn slope(&self, external_nullifier: pallas::Base) -> pallas::Base {
        poseidon_hash3(self.identity_secret, external_nullifier, self.message_id)
    }

    /// Computes, outside the circuit, the values the proof will expose.
    #[must_use]
    pub fn public_output(&self, input: &RlnPublicInput) -> RlnPublicOutput {
        let a1 = self.slope(input.external_nullifier);
        RlnPublicOutput {
            y: a1 * input.x + self.identity_secret,
            root: self.merkle_witness.calculate_root(self.rate_commitment()),
            nullifier: poseidon_hash1(a1),
        }
    }

    /// Builds the circuit instance for this witness.
    ///
    /// # Errors
    /// Fails if the Merkle witness height differs from [`TREE_HEIGHT`].
    pub fn to_circuit(&self) -> Result<RlnCircuit> {
        if self.merkle_witness.height() != TREE_HEIGHT
            || self.merkle_witness.positions.len() != TREE_HEIGHT
        {
            return Err(anyhow::anyhow!(
                "Merkle witness must have height {}, got {}",
                TREE_HEIGHT,
                self.merkle_witness.height()
            ));
        }

        let mut circuit = RlnCircuit {
            identity_secret: Value::known(self.identity_secret),
            user_message_limit: Value::known(self.user_message_limit),
            message_id: Value::known(self.message_id),
            ..RlnCircuit::default()
        };
        for level in 0..TREE_HEIGHT {
            circuit.path_siblings[level] = Value::known(self.merkle_witness.siblings[level]);
            circuit.path_positions[level] = Value::known(self.merkle_witness.positions[level]);
        }

        Ok(circuit)
    }
}

#[derive(Debug, Clone)]
pub struct RlnConfig {
    advices: [Column<Advice>; 5],
    instance: Column<Instance>,
    s_swap: Selector,
    s_mul_add: Selector,
    poseidon: Pow5Config<pallas::Base, 3, 2>,
}

#[derive(Debug, Clone)]
pub struct RlnCircuit {
    pub identity_secret: Value<pallas::Base>,
    pub user_message_limit: Value<pallas::Base>,
    pub message_id: Value<pallas::Base>,
    pub path_siblings: [Value<pallas::Base>; TREE_HEIGHT],
    /// `true` when the path node at that level is a right child.
    pub path_positions: [Value<bool>; TREE_HEIGHT],
}

impl Default for RlnCircuit {
    fn default() -> Self {
        Self {
            identity_secret: Value::unknown(),
            user_message_limit: Value::unknown(),
            message_id: Value::unknown(),
            path_siblings: [Value::unknown(); TREE_HEIGHT],
            path_positions: [Value::unknown(); TREE_HEIGHT],
        }
    }
}

impl RlnCircuit {
    fn hash<const L: usize>(
        config: &RlnConfig,
        mut layouter: impl Layouter<pallas::Base>,
        message: [Cell; L],
    ) -> Result<Cell, Error> {
        let chip = Pow5Chip::construct(config.poseidon.clone());
        let hasher = PoseidonHash::<_, _, P128Pow5T3, ConstantLength<L>, 3, 2>::init(
            chip,
            layouter.namespace(|| "init"),
        )?;
        hasher.hash(layouter.namespace(|| "hash"), message)
    }

    /// Orders `current` and the level's sibling into `(left, right)`.
    fn swap(
        &self,
        config: &RlnConfig,
        mut layouter: impl Layouter<pallas::Base>,
        current: &Cell,
        level: usize,
    ) -> Result<(Cell, Cell), Error> {
        layouter.assign_region(
            || "conditional swap",
            |mut region| {
                config.s_swap.enable(&mut region, 0)?;

                let current =
                    current.copy_advice(|| "current", &mut region, config.advices[0], 0)?;
                let sibling = region.assign_advice(
                    || "sibling",
                    config.advices[1],
                    0,
                    || self.path_siblings[level],
                )?;
                let is_right = self.path_positions[level];
                region.assign_advice(
                    || "position",
                    config.advices[2],
                    0,
                    || is_right.map(|bit| pallas::Base::from(u64::from(bit))),
                )?;

                let ordered = current
                    .value()
                    .copied()
                    .zip(sibling.value().copied())
                    .zip(is_right)
                    .map(|((current, sibling), is_right)| {
                        if is_right {
                            (sibling, current)
                        } else {
                            (current, sibling)
                        }
                    });

                let left = region.assign_advice(
                    || "left",
                    config.advices[3],
                    0,
                    || ordered.map(|(left, _)| left),
                )?;
                let right = region.assign_advice(
                    || "right",
                    config.advices[4],
                    0,
                    || ordered.map(|(_, right)| right),
                )?;

                Ok((left, right))
            },
        )
    }
}

impl Circuit<pallas::Base> for RlnCircuit {
    type Config = RlnConfig;
    type FloorPlanner = SimpleFloorPlanner;

    fn without_witnesses(&self) -> Self {
        Self::default()
    }

    fn configure(meta: &mut ConstraintSystem<pallas::Base>) -> Self::Config {
        let advices = [(); 5].map(|_| meta.advice_column());
        let instance = meta.instance_column();
        meta.enable_equality(instance);
        for advice in advices.iter() {
            meta.enable_equality(*advice);
        }

        let rc_a = [(); 3].map(|_| meta.fixed_column());
        let rc_b = [(); 3].map(|_| meta.fixed_column());
        meta.enable_constant(rc_b[0]);

        let poseidon = Pow5Chip::<pallas::Base, 3, 2>::configure::<P128Pow5T3>(
            meta,
            [advices[0], advices[1], advices[2]],
            advices[3],
            rc_a,
            rc_b,
        );

        let s_swap = meta.selector();
        meta.create_gate("conditional swap", |meta| {
            let s = meta.query_selector(s_swap);
            let current = meta.query_advice(advices[0], Rotation::cur());
            let sibling = meta.query_advice(advices[1], Rotation::cur());
            let bit = meta.query_advice(advices[2], Rotation::cur());
            let left = meta.query_advice(advices[3], Rotation::cur());
            let right = meta.query_advice(advices[4], Rotation::cur());
            let one = Expression::Constant(pallas::Base::one());

            vec![
                s.clone() * bit.clone() * (one - bit.clone()),
                s.clone()
                    * (left - (current.clone() + bit.clone() * (sibling.clone() - current.clone()))),
                s * (right - (sibling.clone() + bit * (current - sibling))),
            ]
        });

        let s_mul_add = meta.selector();
        meta.create_gate("a * b + c = d", |meta| {
            let s = meta.query_selector(s_mul_add);
            let a = meta.query_advice(advices[0], Rotation::cur());
            let b = meta.query_advice(advices[1], Rotation::cur());
            let c = meta.query_advice(advices[2], Rotation::cur());
            let d = meta.query_advice(advices[3], Rotation::cur());

            vec![s * (a * b + c - d)]
        });

        RlnConfig {
            advices,
            instance,
            s_swap,
            s_mul_add,
            poseidon,
        }
    }

    fn synthesize(
        &self,
        config: Self::Config,
        mut layouter: impl Layouter<pallas::Base>,
    ) -> Result<(), Error> {
        let (x, external_nullifier, identity_secret, user_message_limit, message_id) = layouter
            .assign_region(
                || "load inputs",
                |mut region| {
                    let x = region.assign_advice_from_instance(
                        || "x",
                        config.instance,
                        X_ROW,
                        config.advices[0],
                        0,
                    )?;
                    let external_nullifier = region.assign_advice_from_instance(
                        || "external nullifier",
                        config.instance,
                        EXTERNAL_NULLIFIER_ROW,
                        config.advices[1],
                        0,
                    )?;
                    let identity_secret = region.assign_advice(
                        || "identity secret",
                        config.advices[2],
                        0,
                        || self.identity_secret,
                    )?;
                    let user_message_limit = region.assign_advice(
                        || "user message limit",
                        config.advices[3],
                        0,
                        || self.user_message_limit,
                    )?;
                    let message_id = region.assign_advice(
                        || "message id",
                        config.advices[4],
                        0,
                        || self.message_id,
                    )?;

                    Ok((
                        x,
                        external_nullifier,
                        identity_secret,
                        user_message_limit,
                        message_id,
                    ))
                },
            )?;

        let identity_commitment = Self::hash(
            &config,
            layouter.namespace(|| "identity commitment"),
            [identity_secret.clone()],
        )?;
        let rate_commitment = Self::hash(
            &config,
            layouter.namespace(|| "rate commitment"),
            [identity_commitment, user_message_limit],
        )?;

        let mut current = rate_commitment;
        for level in 0..TREE_HEIGHT {
            let (left, right) = self.swap(
                &config,
                layouter.namespace(|| format!("merkle level {level} swap")),
                &current,
                level,
            )?;
            current = Self::hash(
                &config,
                layouter.namespace(|| format!("merkle level {level} hash")),
                [left, right],
            )?;
        }
        layouter.constrain_instance(current.cell(), config.instance, ROOT_ROW)?;

        let a1 = Self::hash(
            &config,
            layouter.namespace(|| "a1"),
            [identity_secret.clone(), external_nullifier, message_id],
        )?;

        let y = layouter.assign_region(
            || "y = a1 * x + identity_secret",
            |mut region| {
                config.s_mul_add.enable(&mut region, 0)?;

                let a1 = a1.copy_advice(|| "a1", &mut region, config.advices[0], 0)?;
                let x = x.copy_advice(|| "x", &mut region, config.advices[1], 0)?;
                let secret =
                    identity_secret.copy_advice(|| "secret", &mut region, config.advices[2], 0)?;

                let y = a1
                    .value()
                    .zip(x.value())
                    .zip(secret.value())
                    .map(|((a1, x), secret)| *a1 * *x + *secret);
                region.assign_advice(|| "y", config.advices[3], 0, || y)
            },
        )?;
        layouter.constrain_instance(y.cell(), config.instance, Y_ROW)?;

        let nullifier = Self::hash(&config, layouter.namespace(|| "nullifier"), [a1])?;
        layouter.constrain_instance(nullifier.cell(), config.instance, NULLIFIER_ROW)?;

        Ok(())
    }
}

/// Prover utility for generating and verifying share proofs with cached keys.
pub struct MrlnProver {
    vk: Option<Arc<VerifyingKey<vesta::Affine>>>,
    pk: Option<Arc<ProvingKey<vesta::Affine>>>,
}

impl Default for MrlnProver {
    fn default() -> Self {
        Self::new()
    }
}

impl MrlnProver {
    /// Create a new prover with no cached keys.
    pub fn new() -> Self {
        Self { vk: None, pk: None }
    }

    /// Generate keys and cache them for future use.
    pub fn generate_and_cache_keys(&mut self, params: &Params<vesta::Affine>) -> Result<(), Error> {
        let circuit = RlnCircuit::default();
        let vk = keygen_vk(params, &circuit)?;
        let pk = keygen_pk(params, vk.clone(), &circuit)?;

        self.vk = Some(Arc::new(vk));
        self.pk = Some(Arc::new(pk));
        Ok(())
    }

    fn proving_key(
        &mut self,
        params: &Params<vesta::Affine>,
    ) -> Result<Arc<ProvingKey<vesta::Affine>>, Error> {
        if self.pk.is_none() {
            self.generate_and_cache_keys(params)?;
        }
        self.pk.clone().ok_or(Error::Synthesis)
    }

    /// The cached verifying key, generated on first use.
    pub fn verifying_key(
        &mut self,
        params: &Params<vesta::Affine>,
    ) -> Result<Arc<VerifyingKey<vesta::Affine>>, Error> {
        if self.vk.is_none() {
            let vk = keygen_vk(params, &RlnCircuit::default())?;
            self.vk = Some(Arc::new(vk));
        }
        self.vk.clone().ok_or(Error::Synthesis)
    }

    /// Generates a share proof; returns the serialized proof bytes.
    pub fn generate_proof(
        &mut self,
        params: &Params<vesta::Affine>,
        circuit: RlnCircuit,
        public_inputs: &[pallas::Base],
    ) -> Result<Vec<u8>, Error> {
        let pk = self.proving_key(params)?;

        let mut transcript = Blake2bWrite::<_, vesta::Affine, Challenge255<_>>::init(vec![]);
        let public_inputs_slice: &[&[&[pallas::Base]]] = &[&[public_inputs]];
        create_proof(
            params,
            &pk,
            &[circuit],
            public_inputs_slice,
            OsRng,
            &mut transcript,
        )?;

        let proof = transcript.finalize();
        debug!("Generated share proof of {} bytes", proof.len());
        Ok(proof)
    }

    /// Verifies a share proof.
    ///
    /// # Returns
    /// `Ok(true)` if the proof is valid, `Ok(false)` if invalid, or an error
    /// if the verifying key could not be generated.
    pub fn verify_proof(
        &mut self,
        params: &Params<vesta::Affine>,
        proof: &[u8],
        public_inputs: &[pallas::Base],
    ) -> Result<bool, Error> {
        let vk = self.verifying_key(params)?;
        Ok(verify_with_key(params, &vk, proof, public_inputs))
    }
}

pub(crate) fn verify_with_key(
    params: &Params<vesta::Affine>,
    vk: &VerifyingKey<vesta::Affine>,
    proof: &[u8],
    public_inputs: &[pallas::Base],
) -> bool {
    let strategy = SingleVerifier::new(params);
    let mut transcript = Blake2bRead::<_, vesta::Affine, Challenge255<_>>::init(proof);

    let public_inputs_slice: &[&[&[pallas::Base]]] = &[&[public_inputs]];
    let result = verify_proof(params, vk, strategy, public_inputs_slice, &mut transcript);
    if let Err(e) = &result {
        debug!("Share proof rejected: {e:?}");
    }

    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::MerkleTree;
    use crate::CIRCUIT_K;
    use halo2_proofs::dev::MockProver;

    fn setup() -> (RlnWitness, RlnPublicInput) {
        let secret = pallas::Base::from(0xDEADBEEF);
        let limit = pallas::Base::from(3);

        let mut tree = MerkleTree::new(TREE_HEIGHT).unwrap();
        tree.set_leaf(0, pallas::Base::from(11)).unwrap();
        tree.set_leaf(1, pallas::Base::from(12)).unwrap();
        tree.set_leaf(5, rate_commitment(identity_commitment(secret), limit))
            .unwrap();

        let witness = RlnWitness {
            identity_secret: secret,
            user_message_limit: limit,
            message_id: pallas::Base::from(1),
            merkle_witness: tree.witness(5).unwrap(),
        };
        let input = RlnPublicInput {
            x: pallas::Base::from(777),
            external_nullifier: pallas::Base::from(42),
        };
        (witness, input)
    }

    #[test]
    fn test_public_output_root_matches_tree() {
        let (witness, input) = setup();
        let output = witness.public_output(&input);
        assert_eq!(
            output.root,
            witness
                .merkle_witness
                .calculate_root(witness.rate_commitment())
        );
        assert_eq!(output.nullifier, poseidon_hash1(witness.slope(input.external_nullifier)));
    }

    #[test]
    fn test_honest_witness_satisfies_circuit() {
        let (witness, input) = setup();
        let output = witness.public_output(&input);
        let circuit = witness.to_circuit().unwrap();

        let prover =
            MockProver::run(CIRCUIT_K, &circuit, vec![public_inputs(&input, &output)]).unwrap();
        assert_eq!(prover.verify(), Ok(()));
    }

    #[test]
    fn test_wrong_root_rejected() {
        let (witness, input) = setup();
        let mut output = witness.public_output(&input);
        output.root += pallas::Base::one();
        let circuit = witness.to_circuit().unwrap();

        let prover =
            MockProver::run(CIRCUIT_K, &circuit, vec![public_inputs(&input, &output)]).unwrap();
        assert!(prover.verify().is_err());
    }

    #[test]
    fn test_wrong_y_rejected() {
        let (witness, input) = setup();
        let mut output = witness.public_output(&input);
        output.y += pallas::Base::one();
        let circuit = witness.to_circuit().unwrap();

        let prover =
            MockProver::run(CIRCUIT_K, &circuit, vec![public_inputs(&input, &output)]).unwrap();
        assert!(prover.verify().is_err());
    }

    #[test]
    fn test_wrong_nullifier_rejected() {
        let (witness, input) = setup();
        let mut output = witness.public_output(&input);
        output.nullifier = poseidon_hash1(output.nullifier);
        let circuit = witness.to_circuit().unwrap();

        let prover =
            MockProver::run(CIRCUIT_K, &circuit, vec![public_inputs(&input, &output)]).unwrap();
        assert!(prover.verify().is_err());
    }

    #[test]
    fn test_wrong_message_limit_rejected() {
        let (mut witness, input) = setup();
        let output = witness.public_output(&input);
        witness.user_message_limit = pallas::Base::from(1000);
        let circuit = witness.to_circuit().unwrap();

        let prover =
            MockProver::run(CIRCUIT_K, &circuit, vec![public_inputs(&input, &output)]).unwrap();
        assert!(prover.verify().is_err());
    }

    #[test]
    fn test_flipped_position_rejected() {
        let (mut witness, input) = setup();
        let output = witness.public_output(&input);
        witness.merkle_witness.positions[0] = !witness.merkle_witness.positions[0];
        let circuit = witness.to_circuit().unwrap();

        let prover =
            MockProver::run(CIRCUIT_K, &circuit, vec![public_inputs(&input, &output)]).unwrap();
        assert!(prover.verify().is_err());
    }

    #[test]
    fn test_short_witness_rejected() {
        let (mut witness, _) = setup();
        witness.merkle_witness.siblings.pop();
        witness.merkle_witness.positions.pop();
        assert!(witness.to_circuit().is_err());
    }
}
