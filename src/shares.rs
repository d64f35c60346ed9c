//! Append-only log of accepted shares, used to spot replays and rate-limit breaches.
//!
//! Each line is `nullifier x y` in field hex. Two shares with the same
//! nullifier come from the same identity, epoch and message id; if their `x`
//! differs, the identity has sent more messages than it paid for.

use crate::types::Share;
use crate::utils::{field_from_hex, field_to_hex};
use anyhow::{Context, Result};
use log::{debug, warn};
use pasta_curves::pallas;
use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Seek, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareOutcome {
    /// First share under this nullifier; now in the log.
    Recorded,
    /// The same share was seen before.
    Replay,
    /// Another share with this nullifier but a different `x`.
    RateLimitExceeded { previous: Share },
}

#[derive(Debug)]
pub struct ShareLog {
    path: PathBuf,
    shares: HashMap<[u8; 32], Share>,
}

fn nullifier_key(nullifier: pallas::Base) -> [u8; 32] {
    crate::utils::field_to_bytes(nullifier)
}

fn parse_line(line: &str) -> Result<Share> {
    let mut parts = line.split_whitespace();
    let mut next = |name: &str| -> Result<pallas::Base> {
        let hex = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("Share log line is missing {name}"))?;
        field_from_hex(hex)
    };
    Ok(Share {
        nullifier: next("nullifier")?,
        x: next("x")?,
        y: next("y")?,
    })
}

impl ShareLog {
    /// Loads the log at `path`; a missing file is an empty log.
    pub fn open(path: &Path) -> Result<Self> {
        let mut shares = HashMap::new();

        if path.exists() {
            let file = fs::File::open(path)
                .with_context(|| format!("Failed to open share log: {}", path.display()))?;
            for (number, line) in BufReader::new(file).lines().enumerate() {
                let line = line.context("Failed to read line from share log")?;
                if line.trim().is_empty() {
                    continue;
                }
                let share = parse_line(&line)
                    .with_context(|| format!("Malformed share log line {}", number + 1))?;
                shares.entry(nullifier_key(share.nullifier)).or_insert(share);
            }
        }

        debug!("Loaded {} shares from {}", shares.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            shares,
        })
    }

    /// Classifies `share` against the log and appends it if it is new.
    pub fn record(&mut self, share: Share) -> Result<ShareOutcome> {
        let key = nullifier_key(share.nullifier);

        if let Some(previous) = self.shares.get(&key).copied() {
            if previous.x == share.x {
                debug!("Replayed share for nullifier {}", field_to_hex(share.nullifier));
                return Ok(ShareOutcome::Replay);
            }
            warn!(
                "Rate limit exceeded for nullifier {}",
                field_to_hex(share.nullifier)
            );
            return Ok(ShareOutcome::RateLimitExceeded { previous });
        }

        self.append(&share)?;
        self.shares.insert(key, share);
        Ok(ShareOutcome::Recorded)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shares.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, share: &Share) -> Result<()> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open share log: {}", self.path.display()))?;

        let mut writer = std::io::BufWriter::new(&file);
        let pos = writer
            .seek(std::io::SeekFrom::End(0))
            .context("Failed to seek to end of share log")?;
        if pos > 0 {
            // Tolerate a log whose last line was written without a newline.
            let mut last = [0u8; 1];
            let mut reader = fs::File::open(&self.path).context("Failed to reopen share log")?;
            reader
                .seek(std::io::SeekFrom::Start(pos - 1))
                .context("Failed to seek share log")?;
            std::io::Read::read_exact(&mut reader, &mut last)
                .context("Failed to read share log")?;
            if last[0] != b'\n' {
                writer.write_all(b"\n").context("Failed to write newline")?;
            }
        }

        writeln!(
            writer,
            "{} {} {}",
            field_to_hex(share.nullifier),
            field_to_hex(share.x),
            field_to_hex(share.y)
        )
        .context("Failed to write share")?;
        writer.flush().context("Failed to flush share log")?;
        Ok(())
    }
}
