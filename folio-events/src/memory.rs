//! In-memory event log for testing and single-process deployments.

use async_trait::async_trait;
use chrono::Utc;
use folio_core::{EventLogError, FolioResult, Topic};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::log::{partition_for, EventLog, LogPosition, LogRecord, DEFAULT_PARTITIONS};

/// Retained records of one partition. The record at index `i` has offset
/// `start + i`.
#[derive(Debug, Clone, Default)]
struct Partition {
    start: u64,
    records: Vec<LogRecord>,
}

impl Partition {
    fn end(&self) -> u64 {
        self.start + self.records.len() as u64
    }
}

#[derive(Debug, Default)]
struct LogState {
    partitions: HashMap<Topic, Vec<Partition>>,
    offsets: HashMap<(String, Topic, u32), u64>,
}

impl LogState {
    fn partition(&self, topic: Topic, partition: u32) -> Option<&Partition> {
        self.partitions
            .get(&topic)
            .and_then(|parts| parts.get(partition as usize))
    }
}

/// Event log held in process memory.
///
/// Records and committed offsets live behind one `RwLock`; nothing survives a
/// restart.
pub struct InMemoryEventLog {
    state: Arc<RwLock<LogState>>,
    partitions: u32,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    pub fn with_partitions(partitions: u32) -> Self {
        Self {
            state: Arc::new(RwLock::new(LogState::default())),
            partitions: partitions.max(1),
        }
    }

    /// Retained records across all partitions of a topic.
    pub fn len(&self, topic: Topic) -> FolioResult<usize> {
        let state = self.state.read().map_err(|_| EventLogError::LockPoisoned)?;
        Ok(state
            .partitions
            .get(&topic)
            .map(|parts| parts.iter().map(|p| p.records.len()).sum())
            .unwrap_or(0))
    }

    pub fn is_empty(&self, topic: Topic) -> FolioResult<bool> {
        Ok(self.len(topic)? == 0)
    }

    fn check_partition(&self, topic: Topic, partition: u32) -> FolioResult<()> {
        if partition >= self.partitions {
            return Err(EventLogError::PartitionOutOfRange {
                topic: topic.to_string(),
                partition,
                count: self.partitions,
            }
            .into());
        }
        Ok(())
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemoryEventLog {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            partitions: self.partitions,
        }
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    fn partition_count(&self) -> u32 {
        self.partitions
    }

    async fn append(&self, topic: Topic, key: &str, payload: Vec<u8>) -> FolioResult<LogPosition> {
        let partition = partition_for(key, self.partitions);
        let mut state = self.state.write().map_err(|_| EventLogError::LockPoisoned)?;
        let parts = state
            .partitions
            .entry(topic)
            .or_insert_with(|| vec![Partition::default(); self.partitions as usize]);
        let part = &mut parts[partition as usize];
        let offset = part.end();
        part.records.push(LogRecord {
            topic,
            partition,
            offset,
            key: key.to_string(),
            payload,
            appended_at: Utc::now(),
        });
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
        let state = self.state.read().map_err(|_| EventLogError::LockPoisoned)?;
        let Some(part) = state.partition(topic, partition) else {
            return Ok(Vec::new());
        };
        Ok(part
            .records
            .iter()
            .skip(from_offset.saturating_sub(part.start) as usize)
            .take(max)
            .cloned()
            .collect())
    }

    async fn end_offset(&self, topic: Topic, partition: u32) -> FolioResult<u64> {
        self.check_partition(topic, partition)?;
        let state = self.state.read().map_err(|_| EventLogError::LockPoisoned)?;
        Ok(state.partition(topic, partition).map_or(0, Partition::end))
    }

    async fn start_offset(&self, topic: Topic, partition: u32) -> FolioResult<u64> {
        self.check_partition(topic, partition)?;
        let state = self.state.read().map_err(|_| EventLogError::LockPoisoned)?;
        Ok(state.partition(topic, partition).map_or(0, |p| p.start))
    }

    async fn truncate_before(&self, topic: Topic, partition: u32, before: u64) -> FolioResult<u64> {
        self.check_partition(topic, partition)?;
        let mut state = self.state.write().map_err(|_| EventLogError::LockPoisoned)?;
        let Some(part) = state
            .partitions
            .get_mut(&topic)
            .and_then(|parts| parts.get_mut(partition as usize))
        else {
            return Ok(0);
        };
        let cutoff = before.min(part.end());
        if cutoff <= part.start {
            return Ok(0);
        }
        let removed = cutoff - part.start;
        part.records.drain(..removed as usize);
        part.start = cutoff;
        Ok(removed)
    }

    async fn min_committed_offset(&self, topic: Topic, partition: u32) -> FolioResult<Option<u64>> {
        self.check_partition(topic, partition)?;
        let state = self.state.read().map_err(|_| EventLogError::LockPoisoned)?;
        Ok(state
            .offsets
            .iter()
            .filter(|((_, t, p), _)| *t == topic && *p == partition)
            .map(|(_, offset)| *offset)
            .min())
    }

    async fn committed_offset(
        &self,
        group: &str,
        topic: Topic,
        partition: u32,
    ) -> FolioResult<Option<u64>> {
        self.check_partition(topic, partition)?;
        let state = self.state.read().map_err(|_| EventLogError::LockPoisoned)?;
        Ok(state
            .offsets
            .get(&(group.to_string(), topic, partition))
            .copied())
    }

    async fn commit(
        &self,
        group: &str,
        topic: Topic,
        partition: u32,
        next_offset: u64,
    ) -> FolioResult<()> {
        self.check_partition(topic, partition)?;
        let mut state = self.state.write().map_err(|_| EventLogError::LockPoisoned)?;
        state
            .offsets
            .insert((group.to_string(), topic, partition), next_offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_same_partition_in_order() {
        let log = InMemoryEventLog::with_partitions(4);
        let a = log.append(Topic::TeamActivity, "7", b"one".to_vec()).await.unwrap();
        let b = log.append(Topic::TeamActivity, "7", b"two".to_vec()).await.unwrap();

        assert_eq!(a.partition, b.partition);
        assert_eq!((a.offset, b.offset), (0, 1));

        let records = log.read(Topic::TeamActivity, a.partition, 0, 10).await.unwrap();
        let payloads: Vec<_> = records.iter().map(|r| r.payload.clone()).collect();
        assert_eq!(payloads, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[tokio::test]
    async fn test_topics_are_independent() {
        let log = InMemoryEventLog::with_partitions(1);
        log.append(Topic::TeamActivity, "k", vec![1]).await.unwrap();
        assert_eq!(log.len(Topic::TeamActivity).unwrap(), 1);
        assert!(log.is_empty(Topic::AssetChanges).unwrap());
    }

    #[tokio::test]
    async fn test_read_respects_offset_and_max() {
        let log = InMemoryEventLog::with_partitions(1);
        for i in 0..5u8 {
            log.append(Topic::AssetChanges, "k", vec![i]).await.unwrap();
        }
        let records = log.read(Topic::AssetChanges, 0, 2, 2).await.unwrap();
        assert_eq!(records.iter().map(|r| r.offset).collect::<Vec<_>>(), vec![2, 3]);
        assert!(log.read(Topic::AssetChanges, 0, 9, 2).await.unwrap().is_empty());
        assert_eq!(log.end_offset(Topic::AssetChanges, 0).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_offsets_are_per_group() {
        let log = InMemoryEventLog::with_partitions(2);
        assert_eq!(log.committed_offset("a", Topic::TeamActivity, 1).await.unwrap(), None);
        log.commit("a", Topic::TeamActivity, 1, 3).await.unwrap();
        assert_eq!(log.committed_offset("a", Topic::TeamActivity, 1).await.unwrap(), Some(3));
        assert_eq!(log.committed_offset("b", Topic::TeamActivity, 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_truncate_keeps_offsets_stable() {
        let log = InMemoryEventLog::with_partitions(1);
        for i in 0..6u8 {
            log.append(Topic::TeamActivity, "k", vec![i]).await.unwrap();
        }

        assert_eq!(log.truncate_before(Topic::TeamActivity, 0, 4).await.unwrap(), 4);
        assert_eq!(log.start_offset(Topic::TeamActivity, 0).await.unwrap(), 4);
        assert_eq!(log.len(Topic::TeamActivity).unwrap(), 2);

        // Reads below the start clamp to the oldest retained record.
        let records = log.read(Topic::TeamActivity, 0, 0, 10).await.unwrap();
        assert_eq!(records.iter().map(|r| r.offset).collect::<Vec<_>>(), vec![4, 5]);

        let next = log.append(Topic::TeamActivity, "k", vec![6]).await.unwrap();
        assert_eq!(next.offset, 6);

        // Truncating past the end stops at the end.
        assert_eq!(log.truncate_before(Topic::TeamActivity, 0, 100).await.unwrap(), 3);
        assert_eq!(log.start_offset(Topic::TeamActivity, 0).await.unwrap(), 7);
        assert_eq!(log.end_offset(Topic::TeamActivity, 0).await.unwrap(), 7);
        assert_eq!(log.truncate_before(Topic::TeamActivity, 0, 3).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_min_committed_offset_spans_groups() {
        let log = InMemoryEventLog::with_partitions(2);
        assert_eq!(log.min_committed_offset(Topic::AssetChanges, 0).await.unwrap(), None);
        log.commit("a", Topic::AssetChanges, 0, 9).await.unwrap();
        log.commit("b", Topic::AssetChanges, 0, 4).await.unwrap();
        log.commit("c", Topic::AssetChanges, 1, 1).await.unwrap();
        log.commit("d", Topic::TeamActivity, 0, 0).await.unwrap();
        assert_eq!(log.min_committed_offset(Topic::AssetChanges, 0).await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_partition_out_of_range() {
        let log = InMemoryEventLog::with_partitions(2);
        assert!(log.read(Topic::TeamActivity, 2, 0, 1).await.is_err());
    }
}
