use anyhow::{Context, Result};
use clap::Parser;
use mrln::circuit::{identity_commitment, rate_commitment};
use mrln::utils::field_to_hex;
use pasta_curves::group::ff::Field;
use pasta_curves::pallas;
use rand::rngs::OsRng;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Generates random identity secrets and the matching membership leaves.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = 16)]
    count: usize,

    /// Message limit every generated identity registers with.
    #[arg(short, long, default_value_t = 1)]
    limit: u64,

    /// One `secret limit` pair per line.
    #[arg(long, default_value = "identities.txt")]
    secrets_out: PathBuf,

    /// One rate commitment per line, in tree order.
    #[arg(long, default_value = "leaves.txt")]
    leaves_out: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.count == 0 {
        return Err(anyhow::anyhow!("Count must be at least 1"));
    }
    if args.limit == 0 {
        return Err(anyhow::anyhow!("Message limit must be at least 1"));
    }

    println!("Generating {} identities...", args.count);
    let limit = pallas::Base::from(args.limit);
    let secrets: Vec<pallas::Base> = (0..args.count)
        .map(|_| pallas::Base::random(OsRng))
        .collect();
    let leaves: Vec<pallas::Base> = secrets
        .iter()
        .map(|&secret| rate_commitment(identity_commitment(secret), limit))
        .collect();

    let unique: HashSet<[u8; 32]> = leaves.iter().map(|&l| mrln::field_to_bytes(l)).collect();
    if unique.len() != leaves.len() {
        return Err(anyhow::anyhow!("Generated duplicate leaves"));
    }

    let mut secrets_file = BufWriter::new(
        File::create(&args.secrets_out).context("Failed to create identities file")?,
    );
    for secret in &secrets {
        writeln!(secrets_file, "{} {}", field_to_hex(*secret), args.limit)
            .context("Failed to write identity")?;
    }
    secrets_file.flush().context("Failed to flush identities file")?;

    let mut leaves_file =
        BufWriter::new(File::create(&args.leaves_out).context("Failed to create leaves file")?);
    for leaf in &leaves {
        writeln!(leaves_file, "{}", field_to_hex(*leaf)).context("Failed to write leaf")?;
    }
    leaves_file.flush().context("Failed to flush leaves file")?;

    println!("Identities written to {}", args.secrets_out.display());
    println!("Leaves written to {}", args.leaves_out.display());
    println!("First leaves:");
    for (i, leaf) in leaves.iter().take(5).enumerate() {
        println!("  {}: {}", i, field_to_hex(*leaf));
    }

    Ok(())
}
