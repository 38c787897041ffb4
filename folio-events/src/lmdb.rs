//! LMDB-backed event log.
//!
//! Uses heed to keep the log in a memory-mapped environment that several
//! processes can open at once: the API process appends, and a separate
//! `folio-consumer` process reads and commits. LMDB serializes write
//! transactions across processes, so offset assignment stays dense.
//!
//! # Layout
//!
//! Three named databases:
//!
//! - `records`: `[topic][0x00][partition: u32 BE][offset: u64 BE]` →
//!   `[appended_at millis: i64 LE][key len: u32 LE][key][payload]`
//! - `heads`: `[topic][0x00][partition: u32 BE]` → next offset (`u64` BE),
//!   and `start:[topic][0x00][partition: u32 BE]` → oldest retained offset
//! - `offsets`: `[group][0x00][topic][0x00][partition: u32 BE]` → committed
//!   offset (`u64` BE)
//!
//! The partition count is stored under `meta` in `heads` on first open and
//! checked on every later open.
//!
//! Truncated records are deleted outright, so LMDB returns their pages to its
//! free list and later appends reuse them instead of growing the map.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use folio_core::{ConfigError, EventLogError, FolioResult, Topic};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use std::path::{Path, PathBuf};

use crate::log::{partition_for, EventLog, LogPosition, LogRecord, DEFAULT_PARTITIONS};

const SEPARATOR: u8 = 0x00;
const PARTITIONS_META_KEY: &[u8] = b"meta:partitions";
const START_KEY_PREFIX: &[u8] = b"start:";

/// Event log location and sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLogConfig {
    /// Directory holding the LMDB environment.
    pub path: PathBuf,
    /// Maximum size of the map in megabytes.
    pub max_size_mb: usize,
    /// Partitions per topic.
    pub partitions: u32,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/event-log"),
            max_size_mb: 256,
            partitions: DEFAULT_PARTITIONS,
        }
    }
}

impl EventLogConfig {
    /// Create EventLogConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `FOLIO_EVENT_LOG_PATH`: environment directory (default: `./data/event-log`)
    /// - `FOLIO_EVENT_LOG_MAX_MB`: map size in MB (default: 256)
    /// - `FOLIO_EVENT_PARTITIONS`: partitions per topic (default: 8)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            path: std::env::var("FOLIO_EVENT_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.path),
            max_size_mb: std::env::var("FOLIO_EVENT_LOG_MAX_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size_mb),
            partitions: std::env::var("FOLIO_EVENT_PARTITIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.partitions),
        }
    }
}

fn backend(e: impl std::fmt::Display) -> EventLogError {
    EventLogError::Backend {
        reason: e.to_string(),
    }
}

fn txn(e: heed::Error) -> EventLogError {
    EventLogError::Transaction {
        reason: e.to_string(),
    }
}

/// Durable event log in an LMDB environment.
#[derive(Clone)]
pub struct LmdbEventLog {
    env: Env,
    records: Database<Bytes, Bytes>,
    heads: Database<Bytes, Bytes>,
    offsets: Database<Bytes, Bytes>,
    partitions: u32,
}

impl LmdbEventLog {
    /// Open or create the log.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - The LMDB environment or its databases cannot be opened
    /// - The log was created with a different partition count
    pub fn open(config: &EventLogConfig) -> FolioResult<Self> {
        Self::open_at(&config.path, config.max_size_mb, config.partitions)
    }

    pub fn open_at<P: AsRef<Path>>(path: P, max_size_mb: usize, partitions: u32) -> FolioResult<Self> {
        let partitions = partitions.max(1);
        std::fs::create_dir_all(&path).map_err(backend)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(3)
                .open(path.as_ref())
        }
        .map_err(backend)?;

        let mut wtxn = env.write_txn().map_err(txn)?;
        let records: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("records"))
            .map_err(backend)?;
        let heads: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("heads"))
            .map_err(backend)?;
        let offsets: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("offsets"))
            .map_err(backend)?;

        match heads.get(&wtxn, PARTITIONS_META_KEY).map_err(txn)? {
            Some(stored) => {
                let stored = decode_u64(stored) as u32;
                if stored != partitions {
                    return Err(ConfigError::InvalidValue {
                        field: "FOLIO_EVENT_PARTITIONS".to_string(),
                        value: partitions.to_string(),
                        reason: format!("event log at this path was created with {} partitions", stored),
                    }
                    .into());
                }
            }
            None => {
                heads
                    .put(&mut wtxn, PARTITIONS_META_KEY, &u64::from(partitions).to_be_bytes())
                    .map_err(txn)?;
            }
        }
        wtxn.commit().map_err(txn)?;

        tracing::debug!(path = %path.as_ref().display(), partitions, "LMDB event log opened");

        Ok(Self {
            env,
            records,
            heads,
            offsets,
            partitions,
        })
    }

    fn check_partition(&self, topic: Topic, partition: u32) -> Result<(), EventLogError> {
        if partition >= self.partitions {
            return Err(EventLogError::PartitionOutOfRange {
                topic: topic.to_string(),
                partition,
                count: self.partitions,
            });
        }
        Ok(())
    }

    fn head(&self, rtxn: &RoTxn, topic: Topic, partition: u32) -> Result<u64, EventLogError> {
        Ok(self
            .heads
            .get(rtxn, &head_key(topic, partition))
            .map_err(txn)?
            .map(decode_u64)
            .unwrap_or(0))
    }

    fn start(&self, rtxn: &RoTxn, topic: Topic, partition: u32) -> Result<u64, EventLogError> {
        Ok(self
            .heads
            .get(rtxn, &start_key(topic, partition))
            .map_err(txn)?
            .map(decode_u64)
            .unwrap_or(0))
    }
}

// ============================================================================
// ENCODING
// ============================================================================

fn partition_prefix(topic: Topic, partition: u32) -> Vec<u8> {
    let name = topic.name().as_bytes();
    let mut key = Vec::with_capacity(name.len() + 5);
    key.extend_from_slice(name);
    key.push(SEPARATOR);
    key.extend_from_slice(&partition.to_be_bytes());
    key
}

fn head_key(topic: Topic, partition: u32) -> Vec<u8> {
    partition_prefix(topic, partition)
}

fn start_key(topic: Topic, partition: u32) -> Vec<u8> {
    let mut key = START_KEY_PREFIX.to_vec();
    key.extend_from_slice(&partition_prefix(topic, partition));
    key
}

fn record_key(topic: Topic, partition: u32, offset: u64) -> Vec<u8> {
    let mut key = partition_prefix(topic, partition);
    key.extend_from_slice(&offset.to_be_bytes());
    key
}

fn offset_key(group: &str, topic: Topic, partition: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(group.len() + 1);
    key.extend_from_slice(group.as_bytes());
    key.push(SEPARATOR);
    key.extend_from_slice(&partition_prefix(topic, partition));
    key
}

fn decode_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[8 - n..].copy_from_slice(&bytes[..n]);
    u64::from_be_bytes(buf)
}

fn encode_record(appended_at: DateTime<Utc>, key: &str, payload: &[u8]) -> Vec<u8> {
    let mut value = Vec::with_capacity(12 + key.len() + payload.len());
    value.extend_from_slice(&appended_at.timestamp_millis().to_le_bytes());
    value.extend_from_slice(&(key.len() as u32).to_le_bytes());
    value.extend_from_slice(key.as_bytes());
    value.extend_from_slice(payload);
    value
}

fn decode_record(
    topic: Topic,
    partition: u32,
    offset: u64,
    bytes: &[u8],
) -> Result<LogRecord, EventLogError> {
    let corrupt = |reason: &str| EventLogError::Decode {
        topic: topic.to_string(),
        partition,
        offset,
        reason: reason.to_string(),
    };
    if bytes.len() < 12 {
        return Err(corrupt("record shorter than header"));
    }
    let millis = i64::from_le_bytes(
        bytes[0..8]
            .try_into()
            .map_err(|_| corrupt("invalid timestamp"))?,
    );
    let key_len = u32::from_le_bytes(
        bytes[8..12]
            .try_into()
            .map_err(|_| corrupt("invalid key length"))?,
    ) as usize;
    let key_end = 12 + key_len;
    if bytes.len() < key_end {
        return Err(corrupt("key length exceeds record"));
    }
    let key = std::str::from_utf8(&bytes[12..key_end])
        .map_err(|_| corrupt("key is not UTF-8"))?
        .to_string();

    Ok(LogRecord {
        topic,
        partition,
        offset,
        key,
        payload: bytes[key_end..].to_vec(),
        appended_at: DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now),
    })
}

// ============================================================================
// EVENT LOG
// ============================================================================

#[async_trait]
impl EventLog for LmdbEventLog {
    fn partition_count(&self) -> u32 {
        self.partitions
    }

    async fn append(&self, topic: Topic, key: &str, payload: Vec<u8>) -> FolioResult<LogPosition> {
        let partition = partition_for(key, self.partitions);
        let head = head_key(topic, partition);

        let mut wtxn = self.env.write_txn().map_err(txn)?;
        let offset = self
            .heads
            .get(&wtxn, &head)
            .map_err(txn)?
            .map(decode_u64)
            .unwrap_or(0);

        self.records
            .put(
                &mut wtxn,
                &record_key(topic, partition, offset),
                &encode_record(Utc::now(), key, &payload),
            )
            .map_err(txn)?;
        self.heads
            .put(&mut wtxn, &head, &(offset + 1).to_be_bytes())
            .map_err(txn)?;
        wtxn.commit().map_err(txn)?;

        Ok(LogPosition {
            topic,
            partition,
            offset,
        })
    }

    async fn read(
        &self,
        topic: Topic,
        partition: u32,
        from_offset: u64,
        max: usize,
    ) -> FolioResult<Vec<LogRecord>> {
        self.check_partition(topic, partition)?;
        let rtxn = self.env.read_txn().map_err(txn)?;
        let end = self.head(&rtxn, topic, partition)?;

        let mut records = Vec::new();
        let mut offset = from_offset.max(self.start(&rtxn, topic, partition)?);
        while offset < end && records.len() < max {
            match self
                .records
                .get(&rtxn, &record_key(topic, partition, offset))
                .map_err(txn)?
            {
                Some(bytes) => records.push(decode_record(topic, partition, offset, bytes)?),
                None => break,
            }
            offset += 1;
        }
        Ok(records)
    }

    async fn end_offset(&self, topic: Topic, partition: u32) -> FolioResult<u64> {
        self.check_partition(topic, partition)?;
        let rtxn = self.env.read_txn().map_err(txn)?;
        Ok(self.head(&rtxn, topic, partition)?)
    }

    async fn start_offset(&self, topic: Topic, partition: u32) -> FolioResult<u64> {
        self.check_partition(topic, partition)?;
        let rtxn = self.env.read_txn().map_err(txn)?;
        let end = self.head(&rtxn, topic, partition)?;
        Ok(self.start(&rtxn, topic, partition)?.min(end))
    }

    async fn truncate_before(&self, topic: Topic, partition: u32, before: u64) -> FolioResult<u64> {
        self.check_partition(topic, partition)?;
        let mut wtxn = self.env.write_txn().map_err(txn)?;
        let start = self.start(&wtxn, topic, partition)?;
        let cutoff = before.min(self.head(&wtxn, topic, partition)?);
        if cutoff <= start {
            return Ok(0);
        }

        let mut removed = 0;
        for offset in start..cutoff {
            if self
                .records
                .delete(&mut wtxn, &record_key(topic, partition, offset))
                .map_err(txn)?
            {
                removed += 1;
            }
        }
        self.heads
            .put(&mut wtxn, &start_key(topic, partition), &cutoff.to_be_bytes())
            .map_err(txn)?;
        wtxn.commit().map_err(txn)?;

        tracing::debug!(topic = %topic, partition, start, cutoff, removed, "Event log truncated");
        Ok(removed)
    }

    async fn min_committed_offset(&self, topic: Topic, partition: u32) -> FolioResult<Option<u64>> {
        self.check_partition(topic, partition)?;
        let mut suffix = vec![SEPARATOR];
        suffix.extend_from_slice(&partition_prefix(topic, partition));

        let rtxn = self.env.read_txn().map_err(txn)?;
        let mut min: Option<u64> = None;
        for entry in self.offsets.iter(&rtxn).map_err(txn)? {
            let (key, value) = entry.map_err(txn)?;
            if key.ends_with(&suffix) {
                let offset = decode_u64(value);
                min = Some(min.map_or(offset, |m| m.min(offset)));
            }
        }
        Ok(min)
    }

    async fn committed_offset(
        &self,
        group: &str,
        topic: Topic,
        partition: u32,
    ) -> FolioResult<Option<u64>> {
        self.check_partition(topic, partition)?;
        let rtxn = self.env.read_txn().map_err(txn)?;
        Ok(self
            .offsets
            .get(&rtxn, &offset_key(group, topic, partition))
            .map_err(txn)?
            .map(decode_u64))
    }

    async fn commit(
        &self,
        group: &str,
        topic: Topic,
        partition: u32,
        next_offset: u64,
    ) -> FolioResult<()> {
        self.check_partition(topic, partition)?;
        let mut wtxn = self.env.write_txn().map_err(txn)?;
        self.offsets
            .put(
                &mut wtxn,
                &offset_key(group, topic, partition),
                &next_offset.to_be_bytes(),
            )
            .map_err(txn)?;
        wtxn.commit().map_err(txn)?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{compact, consumer_lag};
    use tempfile::TempDir;

    fn create_test_log(partitions: u32) -> (LmdbEventLog, TempDir) {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let log = LmdbEventLog::open_at(dir.path(), 10, partitions).expect("Failed to open log");
        (log, dir)
    }

    #[tokio::test]
    async fn test_append_and_read() {
        let (log, _dir) = create_test_log(4);
        let first = log
            .append(Topic::AssetChanges, "asset-1", b"{\"a\":1}".to_vec())
            .await
            .unwrap();
        let second = log
            .append(Topic::AssetChanges, "asset-1", b"{\"a\":2}".to_vec())
            .await
            .unwrap();

        assert_eq!(first.partition, second.partition);
        assert_eq!(second.offset, first.offset + 1);

        let records = log
            .read(Topic::AssetChanges, first.partition, 0, 10)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, "asset-1");
        assert_eq!(records[1].payload, b"{\"a\":2}".to_vec());
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let position = {
            let log = LmdbEventLog::open_at(dir.path(), 10, 2).unwrap();
            let position = log
                .append(Topic::TeamActivity, "7", b"event".to_vec())
                .await
                .unwrap();
            log.commit("g", Topic::TeamActivity, position.partition, 1)
                .await
                .unwrap();
            position
        };

        let log = LmdbEventLog::open_at(dir.path(), 10, 2).unwrap();
        assert_eq!(log.end_offset(Topic::TeamActivity, position.partition).await.unwrap(), 1);
        assert_eq!(
            log.committed_offset("g", Topic::TeamActivity, position.partition)
                .await
                .unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_reopen_with_other_partition_count_fails() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        drop(LmdbEventLog::open_at(dir.path(), 10, 4).unwrap());
        assert!(LmdbEventLog::open_at(dir.path(), 10, 8).is_err());
    }

    #[tokio::test]
    async fn test_offsets_are_per_group_and_topic() {
        let (log, _dir) = create_test_log(1);
        log.commit("cache-updater-team", Topic::TeamActivity, 0, 5)
            .await
            .unwrap();

        assert_eq!(
            log.committed_offset("cache-updater-team", Topic::TeamActivity, 0)
                .await
                .unwrap(),
            Some(5)
        );
        assert_eq!(
            log.committed_offset("cache-updater-team", Topic::AssetChanges, 0)
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            log.committed_offset("other", Topic::TeamActivity, 0)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_read_window() {
        let (log, _dir) = create_test_log(1);
        for i in 0..6u8 {
            log.append(Topic::TeamActivity, "k", vec![i]).await.unwrap();
        }
        let window = log.read(Topic::TeamActivity, 0, 4, 10).await.unwrap();
        assert_eq!(window.iter().map(|r| r.offset).collect::<Vec<_>>(), vec![4, 5]);
        assert!(log.read(Topic::TeamActivity, 0, 6, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_truncate_moves_start_and_survives_reopen() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        {
            let log = LmdbEventLog::open_at(dir.path(), 10, 1).unwrap();
            for i in 0..5u8 {
                log.append(Topic::AssetChanges, "k", vec![i]).await.unwrap();
            }
            assert_eq!(log.truncate_before(Topic::AssetChanges, 0, 3).await.unwrap(), 3);
        }

        let log = LmdbEventLog::open_at(dir.path(), 10, 1).unwrap();
        assert_eq!(log.start_offset(Topic::AssetChanges, 0).await.unwrap(), 3);
        assert_eq!(log.start_offset(Topic::TeamActivity, 0).await.unwrap(), 0);

        let records = log.read(Topic::AssetChanges, 0, 0, 10).await.unwrap();
        assert_eq!(records.iter().map(|r| r.offset).collect::<Vec<_>>(), vec![3, 4]);

        let next = log.append(Topic::AssetChanges, "k", vec![5]).await.unwrap();
        assert_eq!(next.offset, 5);
        assert_eq!(log.truncate_before(Topic::AssetChanges, 0, 2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_min_committed_offset_ignores_other_partitions() {
        let (log, _dir) = create_test_log(2);
        assert_eq!(log.min_committed_offset(Topic::TeamActivity, 0).await.unwrap(), None);
        log.commit("cache-updater-team", Topic::TeamActivity, 0, 7).await.unwrap();
        log.commit("audit", Topic::TeamActivity, 0, 2).await.unwrap();
        log.commit("audit", Topic::TeamActivity, 1, 1).await.unwrap();
        log.commit("audit", Topic::AssetChanges, 0, 0).await.unwrap();
        assert_eq!(log.min_committed_offset(Topic::TeamActivity, 0).await.unwrap(), Some(2));
        assert_eq!(log.min_committed_offset(Topic::TeamActivity, 1).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_consumed_log_keeps_accepting_appends_in_small_map() {
        // 3000 records of 1 KiB would overflow a 1 MiB map three times over
        // without retention.
        let dir = TempDir::new().expect("Failed to create temp dir");
        let log = LmdbEventLog::open_at(dir.path(), 1, 1).unwrap();
        let payload = vec![0xAB; 1024];

        for i in 0..3000u64 {
            let position = log
                .append(Topic::AssetChanges, "asset", payload.clone())
                .await
                .unwrap_or_else(|e| panic!("append {} failed: {}", i, e));
            log.commit("cache-updater-asset", Topic::AssetChanges, 0, position.offset + 1)
                .await
                .unwrap();
            if i % 50 == 49 {
                compact(&log, Topic::AssetChanges, 10_000).await.unwrap();
            }
        }

        assert_eq!(log.end_offset(Topic::AssetChanges, 0).await.unwrap(), 3000);
        assert_eq!(log.start_offset(Topic::AssetChanges, 0).await.unwrap(), 3000);
    }

    #[tokio::test]
    async fn test_retention_cap_bounds_an_idle_group() {
        let (log, _dir) = create_test_log(1);
        for i in 0..20u8 {
            log.append(Topic::TeamActivity, "team", vec![i]).await.unwrap();
        }
        log.commit("stalled", Topic::TeamActivity, 0, 2).await.unwrap();

        assert_eq!(compact(&log, Topic::TeamActivity, 5).await.unwrap(), 15);
        assert_eq!(log.start_offset(Topic::TeamActivity, 0).await.unwrap(), 15);
        assert_eq!(consumer_lag(&log, "stalled", Topic::TeamActivity).await.unwrap(), 5);

        let resumed = log.read(Topic::TeamActivity, 0, 2, 10).await.unwrap();
        assert_eq!(resumed.first().map(|r| r.offset), Some(15));
    }

    #[test]
    fn test_record_codec_rejects_truncated_value() {
        let err = decode_record(Topic::TeamActivity, 0, 0, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, EventLogError::Decode { .. }));

        let encoded = encode_record(Utc::now(), "key", b"payload");
        let record = decode_record(Topic::TeamActivity, 1, 2, &encoded).unwrap();
        assert_eq!(record.key, "key");
        assert_eq!(record.payload, b"payload".to_vec());
    }
}
