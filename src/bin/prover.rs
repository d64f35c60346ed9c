use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use mrln::{
    circuit::{identity_commitment, rate_commitment, RlnPublicInput, RlnWitness},
    config::Config,
    merkle::{read_leaves, MerkleTree},
    proof::{load_or_create_params, MrlnProof},
    types::{external_nullifier, signal_hash, ShareProofOutput},
    utils::{field_from_hex, field_to_bytes, field_to_hex},
    MrlnProver, TREE_HEIGHT,
};
use pasta_curves::pallas;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Rate commitments of all members, one hex field element per line.
    #[arg(short, long)]
    leaves_file: PathBuf,

    #[arg(short = 's', long, env = "MRLN_IDENTITY_SECRET", hide_env_values = true)]
    identity_secret: String,

    /// Message limit the identity registered with.
    #[arg(short = 'm', long)]
    message_limit: u64,

    /// Which of the epoch's message slots this share uses, below the limit.
    #[arg(short = 'i', long, default_value_t = 0)]
    message_id: u64,

    #[arg(short, long)]
    epoch: u64,

    /// Application identifier mixed into the external nullifier.
    #[arg(short, long, default_value_t = 0)]
    application: u64,

    /// The message being sent; hashed to the evaluation point.
    #[arg(long)]
    signal: String,

    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args
        .config
        .as_deref()
        .map(Config::load_from_file)
        .transpose()?
        .unwrap_or_default();

    if args.message_limit == 0 {
        return Err(anyhow::anyhow!("Message limit must be at least 1"));
    }
    if args.message_id >= args.message_limit {
        return Err(anyhow::anyhow!(
            "Message id {} is outside the quota of {} messages",
            args.message_id,
            args.message_limit
        ));
    }

    println!("Loading leaves from: {}", args.leaves_file.display());
    let leaves = read_leaves(&args.leaves_file, config.leaves.max_file_size)?;
    println!("Loaded {} leaves", leaves.len());

    let unique: HashSet<[u8; 32]> = leaves.iter().map(|&l| field_to_bytes(l)).collect();
    if unique.len() != leaves.len() {
        return Err(anyhow::anyhow!(
            "Leaves file '{}' contains duplicate leaves",
            args.leaves_file.display()
        ));
    }

    let identity_secret = field_from_hex(&args.identity_secret)
        .context("Identity secret must be a canonical 64-character hex field element")?;
    let user_message_limit = pallas::Base::from(args.message_limit);
    let leaf = rate_commitment(identity_commitment(identity_secret), user_message_limit);
    debug!("Rate commitment: {}", field_to_hex(leaf));

    let leaf_index = leaves.iter().position(|l| *l == leaf).with_context(|| {
        format!(
            "Rate commitment {} not found in leaves file '{}'. Check the identity secret and message limit.",
            field_to_hex(leaf),
            args.leaves_file.display()
        )
    })?;
    println!("Found rate commitment at index {leaf_index}");

    println!("Building Merkle tree...");
    let tree = MerkleTree::from_leaves(TREE_HEIGHT, &leaves)?;
    println!("Merkle root: {}", field_to_hex(tree.root()));

    let witness = RlnWitness {
        identity_secret,
        user_message_limit,
        message_id: pallas::Base::from(args.message_id),
        merkle_witness: tree.witness(leaf_index as u64)?,
    };
    let input = RlnPublicInput {
        x: signal_hash(&args.signal),
        external_nullifier: external_nullifier(args.epoch, args.application),
    };

    println!("Generating ZK proof (this may take a while)...");
    let params = load_or_create_params(&config.keys)?;
    let mut prover = MrlnProver::new();
    let proof = MrlnProof::create(&mut prover, &params, &witness, input)?;
    info!("ZK proof generated, size: {} bytes", proof.bytes.len());

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| anyhow::anyhow!("System clock unavailable: {}", e))?;
    let output = ShareProofOutput::from_proof(&proof, timestamp);

    let output_path = args.output.unwrap_or(config.proof.output_file);
    println!("Writing proof to: {}", output_path.display());
    let json_output =
        serde_json::to_string_pretty(&output).context("Failed to serialize proof to JSON")?;
    fs::write(&output_path, json_output).context("Failed to write proof file")?;

    println!("Proof successfully generated and saved!");
    println!("Merkle Root: {}", output.root);
    println!("Nullifier: {}", output.nullifier);

    Ok(())
}
