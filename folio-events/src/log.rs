//! Event log interface.
//!
//! An ordered, partitioned, at-least-once log. Records are appended under a
//! key; the key picks the partition, so every record for one subject lands in
//! one partition and keeps its append order. Consumer groups track their own
//! committed offset per partition.
//!
//! Retention is explicit: [`compact`] drops records every group has
//! committed past, and caps how far any partition may grow behind its head.

use async_trait::async_trait;
use folio_core::{FolioResult, Timestamp, Topic};
use std::time::Duration;

/// Default number of partitions per topic.
pub const DEFAULT_PARTITIONS: u32 = 8;

/// Where an appended record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogPosition {
    pub topic: Topic,
    pub partition: u32,
    pub offset: u64,
}

/// One record read back from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub topic: Topic,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
    pub appended_at: Timestamp,
}

impl LogRecord {
    pub fn position(&self) -> LogPosition {
        LogPosition {
            topic: self.topic,
            partition: self.partition,
            offset: self.offset,
        }
    }
}

/// Backing store for the two event topics.
///
/// Offsets within a partition start at 0 and are dense. `commit` stores the
/// offset of the *next* record a group should read.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Partitions per topic. Fixed for the lifetime of the log.
    fn partition_count(&self) -> u32;

    /// Append a record to the partition chosen by `key`.
    async fn append(&self, topic: Topic, key: &str, payload: Vec<u8>) -> FolioResult<LogPosition>;

    /// Read up to `max` records starting at `from_offset`, in offset order.
    async fn read(
        &self,
        topic: Topic,
        partition: u32,
        from_offset: u64,
        max: usize,
    ) -> FolioResult<Vec<LogRecord>>;

    /// Offset one past the last record in a partition.
    async fn end_offset(&self, topic: Topic, partition: u32) -> FolioResult<u64>;

    /// Offset of the oldest retained record. Equal to the end offset when
    /// the partition is empty or fully truncated.
    async fn start_offset(&self, topic: Topic, partition: u32) -> FolioResult<u64>;

    /// Delete every record below `before`, clamped to the end offset.
    /// Offsets are never reused. Returns how many records were removed.
    async fn truncate_before(&self, topic: Topic, partition: u32, before: u64) -> FolioResult<u64>;

    /// Lowest offset committed on this partition by any group, or `None`
    /// if no group has committed yet.
    async fn min_committed_offset(&self, topic: Topic, partition: u32) -> FolioResult<Option<u64>>;

    /// The next offset `group` should read, or `None` if it never committed.
    async fn committed_offset(
        &self,
        group: &str,
        topic: Topic,
        partition: u32,
    ) -> FolioResult<Option<u64>>;

    /// Record that `group` has processed everything before `next_offset`.
    async fn commit(
        &self,
        group: &str,
        topic: Topic,
        partition: u32,
        next_offset: u64,
    ) -> FolioResult<()>;
}

/// Stable partition for a key.
///
/// BLAKE3 of the key, first eight bytes as little-endian `u64`, modulo the
/// partition count. Identical across processes and restarts.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    let partitions = partitions.max(1);
    let hash = blake3::hash(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    (u64::from_le_bytes(prefix) % u64::from(partitions)) as u32
}

/// Total retained records not yet committed by `group` on `topic`.
pub async fn consumer_lag(log: &dyn EventLog, group: &str, topic: Topic) -> FolioResult<u64> {
    let mut lag = 0;
    for partition in 0..log.partition_count() {
        let end = log.end_offset(topic, partition).await?;
        let start = log.start_offset(topic, partition).await?;
        let committed = log
            .committed_offset(group, topic, partition)
            .await?
            .map_or(start, |offset| offset.max(start));
        lag += end.saturating_sub(committed);
    }
    Ok(lag)
}

/// Apply retention to every partition of `topic`.
///
/// Records below the lowest offset any group has committed are dropped.
/// Independently, at most `max_retained` records are kept behind the head,
/// so a group that stopped committing cannot pin the log forever; it resumes
/// from the oldest retained record and relies on TTL expiry for what it
/// missed. Returns how many records were removed.
pub async fn compact(log: &dyn EventLog, topic: Topic, max_retained: u64) -> FolioResult<u64> {
    let mut removed = 0;
    for partition in 0..log.partition_count() {
        let end = log.end_offset(topic, partition).await?;
        let start = log.start_offset(topic, partition).await?;
        let consumed = log.min_committed_offset(topic, partition).await?.unwrap_or(start);
        let cutoff = consumed.max(end.saturating_sub(max_retained)).min(end);
        if cutoff > start {
            removed += log.truncate_before(topic, partition, cutoff).await?;
        }
    }
    Ok(removed)
}

/// Wait until `group` has committed everything on `topic`, polling every
/// `interval`. Returns `false` if `timeout` elapses first.
pub async fn wait_for_drain(
    log: &dyn EventLog,
    group: &str,
    topic: Topic,
    interval: Duration,
    timeout: Duration,
) -> FolioResult<bool> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if consumer_lag(log, group, topic).await? == 0 {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_partition_is_stable() {
        assert_eq!(partition_for("7", 8), partition_for("7", 8));
        assert_eq!(partition_for("anything", 1), 0);
        assert_eq!(partition_for("anything", 0), 0);
    }

    proptest! {
        #[test]
        fn prop_partition_in_range(key in ".*", partitions in 1u32..64) {
            prop_assert!(partition_for(&key, partitions) < partitions);
        }
    }
}
