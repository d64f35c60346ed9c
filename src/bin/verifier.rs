use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info, warn};
use mrln::{
    config::Config,
    merkle::{read_leaves, MerkleTree},
    proof::{load_or_create_params, MrlnVerifier, ProofArtifact},
    shares::{ShareLog, ShareOutcome},
    types::{Share, ShareProofOutput},
    utils::field_to_hex,
    CIRCUIT_K, TREE_HEIGHT,
};
use std::fs;
use std::path::{Path, PathBuf};

/// Overrides the proof file size limit from the config.
const MAX_PROOF_FILE_SIZE_ENV: &str = "MRLN_MAX_PROOF_FILE_SIZE";
/// Overrides the ZK proof size limit from the config.
const MAX_ZK_PROOF_SIZE_ENV: &str = "MRLN_MAX_ZK_PROOF_SIZE";

fn env_override<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long)]
    proof_file: PathBuf,

    /// Only accept shares made against the tree of these leaves.
    #[arg(short, long)]
    leaves_file: Option<PathBuf>,

    /// Defaults to `<proof file>.shares.log`.
    #[arg(short, long)]
    share_log: Option<PathBuf>,

    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn load_proof(path: &Path, config: &Config) -> Result<ShareProofOutput> {
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "Proof file does not exist: {}",
            path.display()
        ));
    }

    let metadata = fs::metadata(path).context("Failed to read proof file metadata")?;
    debug!("Proof file size: {} bytes", metadata.len());

    let max_proof_file_size = env_override(MAX_PROOF_FILE_SIZE_ENV, config.proof.max_file_size);
    if metadata.len() > max_proof_file_size {
        return Err(anyhow::anyhow!(
            "Proof file too large: {} bytes (max {} bytes). Set {} to raise the limit.",
            metadata.len(),
            max_proof_file_size,
            MAX_PROOF_FILE_SIZE_ENV
        ));
    }

    let proof_content = fs::read_to_string(path).context("Failed to read proof file")?;

    info!("Parsing proof JSON...");
    serde_json::from_str(&proof_content).context("Failed to parse proof JSON")
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

    info!("Loading proof from: {}", args.proof_file.display());
    println!("Loading proof from: {}", args.proof_file.display());
    let output = load_proof(&args.proof_file, &config)?;

    output
        .validate_with(&config.security)
        .context("Proof validation failed. The proof structure is invalid or contains malformed field elements.")?;
    info!("Proof validation passed");

    println!("Proof details:");
    println!("  Merkle Root: {}", output.root);
    println!("  External Nullifier: {}", output.external_nullifier);
    println!("  Nullifier: {}", output.nullifier);
    println!("  Timestamp: {}", output.timestamp);
    println!("  ZK Proof Size: {} bytes", output.zkp_proof.len());

    let max_zk_proof_size = env_override(MAX_ZK_PROOF_SIZE_ENV, config.proof.max_zk_proof_size);
    if output.zkp_proof.len() > max_zk_proof_size {
        return Err(anyhow::anyhow!(
            "ZK proof size exceeds limit: {} bytes (max {} bytes). Check that prover and verifier use the same CIRCUIT_K (current: {}), or set {}.",
            output.zkp_proof.len(),
            max_zk_proof_size,
            CIRCUIT_K,
            MAX_ZK_PROOF_SIZE_ENV
        ));
    }

    let proof = output.to_proof()?;

    info!("Generating verifying key...");
    println!("Verifying ZK proof...");
    let params = load_or_create_params(&config.keys)?;
    let verifier = MrlnVerifier::new(params)?;

    let mut artifact = verifier.artifact(&proof);
    if let Some(leaves_file) = &args.leaves_file {
        let leaves = read_leaves(leaves_file, config.leaves.max_file_size)?;
        let root = MerkleTree::from_leaves(TREE_HEIGHT, &leaves)?.root();
        debug!("Expected root: {}", field_to_hex(root));
        artifact = artifact.with_root(root);
    }

    if !artifact.verify() {
        error!("Proof verification FAILED");
        println!("\n✗ Proof verification FAILED!");
        return Err(anyhow::anyhow!("Proof verification failed"));
    }

    info!("Proof verification PASSED");
    println!("\n✓ Proof verification PASSED!");
    println!("The sender is a member within its message quota for this epoch.");

    let share_log_path = args.share_log.unwrap_or_else(|| {
        let mut path = args.proof_file.clone();
        path.set_extension("shares.log");
        path
    });
    let mut share_log = ShareLog::open(&share_log_path)?;

    match share_log.record(Share::from(&proof))? {
        ShareOutcome::Recorded => {
            info!("Share recorded to: {}", share_log_path.display());
            println!("\nShare recorded to: {}", share_log_path.display());
            Ok(())
        }
        ShareOutcome::Replay => Err(anyhow::anyhow!(
            "Share already seen: replay of nullifier {}",
            output.nullifier
        )),
        ShareOutcome::RateLimitExceeded { previous } => {
            warn!(
                "Rate limit exceeded: earlier share x={} y={}",
                field_to_hex(previous.x),
                field_to_hex(previous.y)
            );
            println!("\nRate limit exceeded for nullifier {}", output.nullifier);
            println!("Earlier share: x={} y={}", field_to_hex(previous.x), field_to_hex(previous.y));
            println!("Current share: x={} y={}", output.x, output.y);
            println!("These two shares are evidence for slashing the sender.");
            Err(anyhow::anyhow!(
                "Rate limit exceeded: nullifier {} reused with a different signal",
                output.nullifier
            ))
        }
    }
}
