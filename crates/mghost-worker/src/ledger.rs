//! Key ledger: which user a watermark key was issued to.
//!
//! Records live in a single pretty-printed JSON array. Every mutation
//! rewrites the whole file through a temporary sibling and a rename, so a
//! crash mid-write leaves the previous ledger intact.

use chrono::{DateTime, Timelike, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

use mghost_models::{KeySequence, VideoInfo};

use crate::error::{WorkerError, WorkerResult};

/// Smallest generated key.
pub const MIN_UNIQUE_KEY: i64 = 100_000;
/// Number of generated keys (`100000..=999999`).
const KEY_SPACE: i64 = 900_000;
/// Returned by `next_key` on an empty ledger.
const FIRST_SEQUENTIAL_KEY: i64 = 1000;
const TIMESTAMP_ATTEMPTS: usize = 100;

/// Number of candidate keys derived from a unique key.
pub const DERIVED_KEY_COUNT: usize = 4;

/// One issued watermark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedRecord {
    pub id: String,
    /// Unique key the candidate keys were derived from
    pub key: i64,
    pub keys: Vec<i64>,
    pub sequence: KeySequence,
    #[serde(default = "default_fragment_length")]
    pub fragment_length_secs: f64,
    pub video_path: PathBuf,
    pub output_path: PathBuf,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_info: Option<VideoInfo>,
    pub created_at: DateTime<Utc>,
}

fn default_fragment_length() -> f64 {
    mghost_models::job::DEFAULT_FRAGMENT_LENGTH_SECS
}

/// Fields supplied by the caller when recording an embed.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub key: i64,
    pub keys: Vec<i64>,
    pub sequence: KeySequence,
    pub fragment_length_secs: f64,
    pub video_path: PathBuf,
    pub output_path: PathBuf,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    pub video_info: Option<VideoInfo>,
}

/// JSON-file backed store of embed records.
#[derive(Debug)]
pub struct KeyLedger {
    path: PathBuf,
    records: Vec<EmbedRecord>,
}

impl KeyLedger {
    /// Load the ledger at `path`. A missing or empty file is an empty ledger.
    pub async fn open(path: impl Into<PathBuf>) -> WorkerResult<Self> {
        let path = path.into();
        let records = match fs::read_to_string(&path).await {
            Ok(text) if text.trim().is_empty() => Vec::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                WorkerError::ledger(format!("{} is not a valid ledger: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), records = records.len(), "Key ledger loaded");
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a record and persist the ledger.
    pub async fn save_record(&mut self, new: NewRecord) -> WorkerResult<EmbedRecord> {
        let record = EmbedRecord {
            id: uuid::Uuid::new_v4().to_string(),
            key: new.key,
            keys: new.keys,
            sequence: new.sequence,
            fragment_length_secs: new.fragment_length_secs,
            video_path: new.video_path,
            output_path: new.output_path,
            user_email: new.user_email,
            user_name: new.user_name,
            video_info: new.video_info,
            created_at: Utc::now(),
        };

        self.records.push(record.clone());
        if let Err(e) = self.persist().await {
            self.records.pop();
            return Err(e);
        }

        info!(id = %record.id, key = record.key, "Embed record saved");
        Ok(record)
    }

    /// Most recent record issued for `key`.
    pub fn find_by_key(&self, key: i64) -> Option<&EmbedRecord> {
        self.records
            .iter()
            .filter(|r| r.key == key)
            .max_by_key(|r| r.created_at)
    }

    pub fn find_by_id(&self, id: &str) -> Option<&EmbedRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn key_exists(&self, key: i64) -> bool {
        self.records.iter().any(|r| r.key == key)
    }

    /// One above the highest recorded key, or 1000 for an empty ledger.
    pub fn next_key(&self) -> i64 {
        self.records
            .iter()
            .map(|r| r.key)
            .filter(|k| *k > 0)
            .max()
            .map(|k| k + 1)
            .unwrap_or(FIRST_SEQUENTIAL_KEY)
    }

    /// A six-digit key not present in the ledger.
    ///
    /// Keys come from the current wall-clock time plus a small random
    /// offset. If every timestamp candidate collides, the key space is
    /// scanned from a time-derived starting point.
    pub async fn generate_unique_key(&self) -> WorkerResult<i64> {
        for _ in 0..TIMESTAMP_ATTEMPTS {
            let offset = rand::rng().random_range(0..100);
            let key = timestamp_key(Utc::now(), offset);
            if !self.key_exists(key) {
                debug!(key, "Generated unique key");
                return Ok(key);
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        warn!(
            attempts = TIMESTAMP_ATTEMPTS,
            "Timestamp keys exhausted, scanning key space"
        );
        let start = Utc::now().timestamp_millis().rem_euclid(KEY_SPACE);
        (0..KEY_SPACE)
            .map(|i| MIN_UNIQUE_KEY + (start + i) % KEY_SPACE)
            .find(|key| !self.key_exists(*key))
            .ok_or(WorkerError::KeySpaceExhausted)
    }

    /// Remove a record by ID and persist the ledger.
    pub async fn delete_record(&mut self, id: &str) -> WorkerResult<EmbedRecord> {
        let index = self
            .records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| WorkerError::RecordNotFound(id.to_string()))?;

        let removed = self.records.remove(index);
        if let Err(e) = self.persist().await {
            self.records.insert(index, removed);
            return Err(e);
        }

        info!(id, key = removed.key, "Embed record deleted");
        Ok(removed)
    }

    /// All records, newest first.
    pub fn all_records(&self) -> Vec<&EmbedRecord> {
        let mut records: Vec<&EmbedRecord> = self.records.iter().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    async fn persist(&self) -> WorkerResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_string_pretty(&self.records)?;
        let tmp = temp_path(&self.path);
        fs::write(&tmp, json).await?;
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "records.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Six-digit key from the sub-ten-minute part of `now` plus `offset`.
pub fn timestamp_key(now: DateTime<Utc>, offset: u32) -> i64 {
    let millis = now.timestamp_subsec_millis().min(999);
    let base = (now.minute() % 10) * 100_000 + now.second() * 1000 + millis;
    let mut key = (i64::from(base) + i64::from(offset)) % KEY_SPACE;
    if key < MIN_UNIQUE_KEY {
        key += MIN_UNIQUE_KEY;
    }
    key
}

fn lcg(seed: u64) -> u64 {
    seed.wrapping_mul(1_103_515_245).wrapping_add(12_345) & 0x7fff_ffff
}

/// Candidate keys and key order derived from a unique key.
///
/// Produces four distinct keys in `100..=999` and a permutation of their
/// indices. The derivation is deterministic, so a recorded unique key is
/// enough to regenerate both.
pub fn derive_keys(unique_key: i64) -> (Vec<i64>, KeySequence) {
    let mut seed = unique_key.unsigned_abs();
    let mut keys = Vec::with_capacity(DERIVED_KEY_COUNT);
    while keys.len() < DERIVED_KEY_COUNT {
        seed = lcg(seed);
        let key = 100 + (seed % 900) as i64;
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    let mut seed = unique_key.unsigned_abs().wrapping_add(12_345);
    let mut remaining: Vec<usize> = (0..DERIVED_KEY_COUNT).collect();
    let mut order = Vec::with_capacity(DERIVED_KEY_COUNT);
    while !remaining.is_empty() {
        seed = lcg(seed);
        let index = (seed % remaining.len() as u64) as usize;
        order.push(remaining.remove(index));
    }

    (keys, KeySequence::from_indices(order))
}
