use mrln::circuit::{identity_commitment, rate_commitment};
use mrln::utils::field_to_hex;
use pasta_curves::group::ff::Field;
use pasta_curves::pallas;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::thread;
use tempfile::TempDir;

const PROVER: &str = "./target/release/prover";
const VERIFIER: &str = "./target/release/verifier";
const GENERATE_IDENTITIES: &str = "./target/release/generate_identities";

fn binaries_present(paths: &[&str]) -> bool {
    if paths.iter().all(|p| PathBuf::from(p).exists()) {
        return true;
    }
    eprintln!("Skipping integration test: release binaries not found");
    false
}

fn random_secret() -> pallas::Base {
    pallas::Base::random(rand::thread_rng())
}

/// Writes a leaves file containing `secret`'s rate commitment among `others` random members.
fn write_leaves(path: &Path, secret: pallas::Base, limit: u64, others: usize) {
    let mut leaves = vec![rate_commitment(
        identity_commitment(random_secret()),
        pallas::Base::from(limit),
    )];
    leaves.push(rate_commitment(
        identity_commitment(secret),
        pallas::Base::from(limit),
    ));
    for _ in 1..others {
        leaves.push(rate_commitment(
            identity_commitment(random_secret()),
            pallas::Base::from(limit),
        ));
    }

    let content: Vec<String> = leaves.into_iter().map(field_to_hex).collect();
    fs::write(path, content.join("\n")).expect("Failed to write leaves file");
}

fn prove(
    leaves_file: &Path,
    secret: pallas::Base,
    limit: u64,
    message_id: u64,
    signal: &str,
    output: &Path,
) -> Output {
    Command::new(PROVER)
        .arg("--leaves-file")
        .arg(leaves_file)
        .arg("--message-limit")
        .arg(limit.to_string())
        .arg("--message-id")
        .arg(message_id.to_string())
        .arg("--epoch")
        .arg("7")
        .arg("--signal")
        .arg(signal)
        .arg("--output")
        .arg(output)
        .env("MRLN_IDENTITY_SECRET", field_to_hex(secret))
        .output()
        .expect("Failed to execute prover")
}

fn verify(proof_file: &Path, extra: &[&OsStr]) -> Output {
    Command::new(VERIFIER)
        .arg("--proof-file")
        .arg(proof_file)
        .args(extra)
        .output()
        .expect("Failed to execute verifier")
}

#[test]
fn test_end_to_end_prover_verifier_workflow() {
    if !binaries_present(&[PROVER, VERIFIER]) {
        return;
    }

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let leaves_file = temp_dir.path().join("leaves.txt");
    let proof_file = temp_dir.path().join("proof.json");
    let secret = random_secret();
    write_leaves(&leaves_file, secret, 3, 3);

    let prover_output = prove(&leaves_file, secret, 3, 0, "hello", &proof_file);
    assert!(
        prover_output.status.success(),
        "Prover failed: {}",
        String::from_utf8_lossy(&prover_output.stderr)
    );
    assert!(proof_file.exists(), "Proof file was not created");

    let verifier_output = verify(&proof_file, &[OsStr::new("--leaves-file"), leaves_file.as_os_str()]);
    assert!(
        verifier_output.status.success(),
        "Verifier failed: {}",
        String::from_utf8_lossy(&verifier_output.stderr)
    );

    let verifier_stdout = String::from_utf8_lossy(&verifier_output.stdout);
    assert!(
        verifier_stdout.contains("Proof verification PASSED"),
        "Proof verification did not pass: {verifier_stdout}"
    );
    assert!(temp_dir.path().join("proof.shares.log").exists());
}

#[test]
fn test_replay_attack_prevention() {
    if !binaries_present(&[PROVER, VERIFIER]) {
        return;
    }

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let leaves_file = temp_dir.path().join("leaves.txt");
    let proof_file = temp_dir.path().join("proof.json");
    let secret = random_secret();
    write_leaves(&leaves_file, secret, 1, 2);

    let prover_output = prove(&leaves_file, secret, 1, 0, "once", &proof_file);
    assert!(
        prover_output.status.success(),
        "Prover failed: {}",
        String::from_utf8_lossy(&prover_output.stderr)
    );

    let first = verify(&proof_file, &[]);
    assert!(
        first.status.success(),
        "First verification should succeed: {}",
        String::from_utf8_lossy(&first.stderr)
    );

    let second = verify(&proof_file, &[]);
    assert!(
        !second.status.success(),
        "Second verification should fail due to replay"
    );
    let stderr = String::from_utf8_lossy(&second.stderr);
    assert!(
        stderr.contains("replay"),
        "Error should mention replay: {stderr}"
    );
}

#[test]
fn test_rate_limit_violation_detected() {
    if !binaries_present(&[PROVER, VERIFIER]) {
        return;
    }

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let leaves_file = temp_dir.path().join("leaves.txt");
    let share_log = temp_dir.path().join("shares.log");
    let first_proof = temp_dir.path().join("first.json");
    let second_proof = temp_dir.path().join("second.json");
    let secret = random_secret();
    write_leaves(&leaves_file, secret, 1, 2);

    // Same epoch and message id, different signals.
    for (signal, proof_file) in [("first", &first_proof), ("second", &second_proof)] {
        let output = prove(&leaves_file, secret, 1, 0, signal, proof_file);
        assert!(
            output.status.success(),
            "Prover failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let log_args = [OsStr::new("--share-log"), share_log.as_os_str()];
    let first = verify(&first_proof, &log_args);
    assert!(
        first.status.success(),
        "First share should be accepted: {}",
        String::from_utf8_lossy(&first.stderr)
    );

    let second = verify(&second_proof, &log_args);
    assert!(!second.status.success(), "Second share should be rejected");
    let stderr = String::from_utf8_lossy(&second.stderr);
    assert!(
        stderr.contains("Rate limit exceeded"),
        "Error should report the rate limit violation: {stderr}"
    );
}

#[test]
fn test_wrong_membership_root_rejected() {
    if !binaries_present(&[PROVER, VERIFIER]) {
        return;
    }

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let leaves_file = temp_dir.path().join("leaves.txt");
    let other_leaves = temp_dir.path().join("other_leaves.txt");
    let proof_file = temp_dir.path().join("proof.json");
    let secret = random_secret();
    write_leaves(&leaves_file, secret, 2, 3);
    write_leaves(&other_leaves, random_secret(), 2, 3);

    let prover_output = prove(&leaves_file, secret, 2, 1, "hi", &proof_file);
    assert!(prover_output.status.success());

    let verifier_output = verify(&proof_file, &[OsStr::new("--leaves-file"), other_leaves.as_os_str()]);
    assert!(
        !verifier_output.status.success(),
        "Verifier should reject a proof for a different tree"
    );
}

#[test]
fn test_invalid_proof_structure() {
    if !binaries_present(&[VERIFIER]) {
        return;
    }

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let proof_file = temp_dir.path().join("invalid_proof.json");

    let zero = "0".repeat(64);
    let invalid_json = format!(
        r#"{{
        "x": "invalid_hex",
        "external_nullifier": "{zero}",
        "y": "{zero}",
        "root": "{zero}",
        "nullifier": "{zero}",
        "zkp_proof": [1, 2, 3],
        "timestamp": 1234567890
    }}"#
    );
    fs::write(&proof_file, invalid_json).expect("Failed to write invalid proof file");

    let verifier_output = verify(&proof_file, &[]);
    assert!(
        !verifier_output.status.success(),
        "Verifier should fail on invalid proof structure"
    );
}

#[test]
fn test_unknown_identity_rejected() {
    if !binaries_present(&[PROVER]) {
        return;
    }

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let leaves_file = temp_dir.path().join("leaves.txt");
    let proof_file = temp_dir.path().join("proof.json");
    let secret = random_secret();
    write_leaves(&leaves_file, secret, 2, 2);

    // Right secret, wrong limit: the rate commitment differs.
    let output = prove(&leaves_file, secret, 1, 0, "x", &proof_file);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("not found"),
        "Error should say the rate commitment was not found: {stderr}"
    );
}

#[test]
fn test_message_id_outside_quota() {
    if !binaries_present(&[PROVER]) {
        return;
    }

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let leaves_file = temp_dir.path().join("leaves.txt");
    let proof_file = temp_dir.path().join("proof.json");
    let secret = random_secret();
    write_leaves(&leaves_file, secret, 2, 2);

    let output = prove(&leaves_file, secret, 2, 2, "x", &proof_file);
    assert!(!output.status.success());
    assert!(!proof_file.exists());
}

#[test]
fn test_duplicate_leaves() {
    if !binaries_present(&[PROVER]) {
        return;
    }

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let leaves_file = temp_dir.path().join("duplicate_leaves.txt");
    let proof_file = temp_dir.path().join("proof.json");
    let secret = random_secret();
    let leaf = field_to_hex(rate_commitment(
        identity_commitment(secret),
        pallas::Base::from(1),
    ));
    fs::write(&leaves_file, format!("{leaf}\n{leaf}\n")).expect("Failed to write leaves file");

    let output = prove(&leaves_file, secret, 1, 0, "x", &proof_file);
    assert!(
        !output.status.success(),
        "Prover should fail with duplicate leaves"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.to_lowercase().contains("duplicate"),
        "Error should mention duplicate: {stderr}"
    );
}

#[test]
fn test_generate_identities_then_prove() {
    if !binaries_present(&[GENERATE_IDENTITIES, PROVER, VERIFIER]) {
        return;
    }

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let secrets_file = temp_dir.path().join("identities.txt");
    let leaves_file = temp_dir.path().join("leaves.txt");
    let proof_file = temp_dir.path().join("proof.json");

    let output = Command::new(GENERATE_IDENTITIES)
        .arg("--count")
        .arg("5")
        .arg("--limit")
        .arg("4")
        .arg("--secrets-out")
        .arg(&secrets_file)
        .arg("--leaves-out")
        .arg(&leaves_file)
        .output()
        .expect("Failed to execute generate_identities");
    assert!(output.status.success());

    let secrets = fs::read_to_string(&secrets_file).unwrap();
    let leaves = fs::read_to_string(&leaves_file).unwrap();
    assert_eq!(secrets.lines().count(), 5);
    assert_eq!(leaves.lines().count(), 5);

    let (secret_hex, limit) = secrets
        .lines()
        .nth(3)
        .and_then(|line| line.split_once(' '))
        .unwrap();
    assert_eq!(limit, "4");
    let secret = mrln::utils::field_from_hex(secret_hex).unwrap();

    let prover_output = prove(&leaves_file, secret, 4, 3, "generated", &proof_file);
    assert!(
        prover_output.status.success(),
        "Prover failed: {}",
        String::from_utf8_lossy(&prover_output.stderr)
    );
    assert!(verify(&proof_file, &[]).status.success());
}

#[test]
fn test_concurrent_prover_calls() {
    if !binaries_present(&[PROVER]) {
        return;
    }

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let leaves_file = temp_dir.path().join("leaves.txt");
    let secret = random_secret();
    write_leaves(&leaves_file, secret, 2, 3);

    let handles: Vec<_> = (0..2u64)
        .map(|message_id| {
            let leaves_file = leaves_file.clone();
            let proof_file = temp_dir.path().join(format!("proof{message_id}.json"));
            thread::spawn(move || {
                let output = prove(&leaves_file, secret, 2, message_id, "parallel", &proof_file);
                (output, proof_file)
            })
        })
        .collect();

    for handle in handles {
        let (output, proof_file) = handle.join().expect("Prover thread panicked");
        assert!(
            output.status.success(),
            "Prover failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        assert!(proof_file.exists());
    }
}
