// =============================================================================
// QMesh Distributed QPU - Discovery Registry
// =============================================================================
// Table of Contents:
//   1. PeerRecord / DeploymentMode - Registry entries
//   2. DiscoveryRegistry - Advisory-locked registry file
//   3. Waiting and keyed deletion
// =============================================================================
// Purpose: The registry file that maps peer identifiers to connection
//          endpoints. Every access holds an advisory lock on the file
//          (exclusive for read-modify-write, shared for reads) so readers
//          observe either the pre- or post-write contents, never a torn one.
//          Entries are removed by key prefix, which lets a whole job be
//          dropped with one call.
// =============================================================================

use crate::error::RegistryError;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

// =============================================================================
// 1. PeerRecord / DeploymentMode - Registry entries
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentMode {
    #[serde(rename = "hpc")]
    Hpc,
    #[serde(rename = "co_located")]
    CoLocated,
    #[serde(rename = "cloud")]
    Cloud,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub endpoint: String,
    pub nodename: String,
    pub mode: DeploymentMode,
}

impl PeerRecord {
    pub fn new(endpoint: impl Into<String>, mode: DeploymentMode) -> Self {
        Self {
            endpoint: endpoint.into(),
            nodename: local_nodename(),
            mode,
        }
    }
}

fn local_nodename() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

// =============================================================================
// 2. DiscoveryRegistry - Advisory-locked registry file
// =============================================================================

#[derive(Debug, Clone)]
pub struct DiscoveryRegistry {
    file_path: PathBuf,
}

impl DiscoveryRegistry {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn publish(&self, key: &str, record: &PeerRecord) -> Result<(), RegistryError> {
        let mut file = self.open()?;
        file.lock_exclusive()?;
        let result = (|| {
            let mut entries = read_entries(&mut file)?;
            entries.insert(key.to_string(), record.clone());
            write_entries(&mut file, &entries)
        })();
        let _ = file.unlock();
        result?;
        tracing::debug!(key, endpoint = %record.endpoint, "published registry entry");
        Ok(())
    }

    pub fn snapshot(&self) -> Result<BTreeMap<String, PeerRecord>, RegistryError> {
        let mut file = self.open()?;
        file.lock_shared()?;
        let entries = read_entries(&mut file);
        let _ = file.unlock();
        entries
    }

    pub fn lookup(&self, key: &str) -> Result<Option<PeerRecord>, RegistryError> {
        Ok(self.snapshot()?.remove(key))
    }

    pub fn entries_with_prefix(
        &self,
        prefix: &str,
    ) -> Result<BTreeMap<String, PeerRecord>, RegistryError> {
        let entries = self.snapshot()?;
        Ok(entries
            .into_iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .collect())
    }

    // =========================================================================
    // 3. Waiting and keyed deletion
    // =========================================================================

    // Polls until `expected` entries with the prefix are present, not counting
    // `exclude` (the caller's own key).
    pub fn wait_for_peers(
        &self,
        prefix: &str,
        expected: usize,
        exclude: &str,
        timeout: Duration,
    ) -> Result<BTreeMap<String, PeerRecord>, RegistryError> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut entries = self.entries_with_prefix(prefix)?;
            entries.remove(exclude);
            if entries.len() >= expected {
                return Ok(entries);
            }
            if Instant::now() >= deadline {
                return Err(RegistryError::WaitTimeout {
                    prefix: prefix.to_string(),
                    expected,
                    found: entries.len(),
                });
            }
            std::thread::sleep(Duration::from_millis(25));
        }
    }

    // Keyed delete: drops every entry whose key starts with the prefix and
    // returns how many were removed.
    pub fn remove_prefix(&self, prefix: &str) -> Result<usize, RegistryError> {
        let mut file = self.open()?;
        file.lock_exclusive()?;
        let result = (|| {
            let entries = read_entries(&mut file)?;
            let retained: BTreeMap<String, PeerRecord> = entries
                .iter()
                .filter(|(key, _)| !key.starts_with(prefix))
                .map(|(key, record)| (key.clone(), record.clone()))
                .collect();
            let removed = entries.len() - retained.len();
            write_entries(&mut file, &retained)?;
            Ok(removed)
        })();
        let _ = file.unlock();
        result
    }

    fn open(&self) -> Result<File, RegistryError> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.file_path)?)
    }
}

fn read_entries(file: &mut File) -> Result<BTreeMap<String, PeerRecord>, RegistryError> {
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    // A corrupted file degrades to an empty registry instead of wedging every
    // process that shares it.
    Ok(serde_json::from_str(&contents).unwrap_or_default())
}

fn write_entries(
    file: &mut File,
    entries: &BTreeMap<String, PeerRecord>,
) -> Result<(), RegistryError> {
    let serialized = serde_json::to_string_pretty(entries)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(serialized.as_bytes())?;
    file.sync_all()?;
    Ok(())
}
