use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::Config;

/// Counters for one conversion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub messages_seen: usize,
    pub routed: usize,
    pub topic_matches: usize,
    pub spam_filtered: usize,
    pub skipped_no_body: usize,
    pub failed: usize,
    pub archives: usize,
    pub chunks_created: usize,
    pub chunks_reused: usize,
    /// Archives or chunks abandoned because they could not be opened or read.
    pub unit_failures: usize,
    pub flush_failures: usize,
    /// Failure rows that could not be appended to the ledger.
    pub ledger_failures: usize,
    /// Topic rows dropped by the domain-rule policy when splitting into part files.
    pub split_filtered: usize,
    pub split_files: usize,
}

#[derive(Debug, Serialize)]
pub struct SheetEntry {
    pub rows: usize,
    pub sha256: String,
}

#[derive(Debug, Serialize)]
pub struct Manifest {
    pub source_dir: PathBuf,
    pub failure_ledger: PathBuf,
    pub duration_s: f64,
    pub stats: RunStats,
    pub sheets: BTreeMap<String, SheetEntry>,
    /// Effective configuration after file and command-line overrides.
    pub config: Config,
    pub version: String,
}

impl Manifest {
    /// Digests every persisted spreadsheet that is still on disk.
    pub fn build(
        config: &Config,
        failure_ledger: &Path,
        duration_s: f64,
        stats: RunStats,
        persisted: &BTreeMap<PathBuf, usize>,
    ) -> Result<Self> {
        let mut sheets = BTreeMap::new();
        for (path, rows) in persisted {
            if !path.exists() {
                continue;
            }
            sheets.insert(
                path.display().to_string(),
                SheetEntry {
                    rows: *rows,
                    sha256: sha256_file(path)?,
                },
            );
        }

        Ok(Self {
            source_dir: config.source_dir.clone(),
            failure_ledger: failure_ledger.to_path_buf(),
            duration_s,
            stats,
            sheets,
            config: config.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        File::create(path)
            .and_then(|mut f| f.write_all(&json))
            .with_context(|| format!("write {}", path.display()))
    }
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
