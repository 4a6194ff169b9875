use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use super::error::OutboxError;
use super::record::{NewOutboxEvent, OutboxRecord, OutboxStatus};
use super::store::OutboxStore;
use super::unit_of_work::DomainWrite;
use crate::clock::{Clock, SystemClock};

/// Outbox table kept in process memory.
///
/// Cloning creates another handle to the same storage, so a relay thread and
/// request handlers can share one store.
#[derive(Clone)]
pub struct InMemoryOutboxStore {
    records: Arc<RwLock<Vec<OutboxRecord>>>,
    seq: Arc<AtomicU64>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Use `clock` to stamp `created_at` on appended records.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        InMemoryOutboxStore {
            records: Arc::new(RwLock::new(Vec::new())),
            seq: Arc::new(AtomicU64::new(1)),
            clock,
        }
    }

    /// Snapshot of every record, in creation order.
    pub fn records(&self) -> Result<Vec<OutboxRecord>, OutboxError> {
        let records = self
            .records
            .read()
            .map_err(|_| OutboxError::LockPoisoned("read"))?;
        Ok(records.clone())
    }

    pub fn count_by_status(&self, status: OutboxStatus) -> Result<usize, OutboxError> {
        let records = self
            .records
            .read()
            .map_err(|_| OutboxError::LockPoisoned("read"))?;
        Ok(records.iter().filter(|r| r.status == status).count())
    }

    pub fn len(&self) -> Result<usize, OutboxError> {
        let records = self
            .records
            .read()
            .map_err(|_| OutboxError::LockPoisoned("read"))?;
        Ok(records.len())
    }

    pub fn is_empty(&self) -> Result<bool, OutboxError> {
        Ok(self.len()? == 0)
    }

    fn update<T>(
        &self,
        id: u64,
        operation: &'static str,
        f: impl FnOnce(&mut OutboxRecord) -> T,
    ) -> Result<T, OutboxError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| OutboxError::LockPoisoned(operation))?;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(OutboxError::NotFound(id))?;
        Ok(f(record))
    }
}

impl OutboxStore for InMemoryOutboxStore {
    fn commit_unit(
        &self,
        events: Vec<NewOutboxEvent>,
        writes: Vec<DomainWrite<'_>>,
    ) -> Result<Vec<u64>, OutboxError> {
        for event in &events {
            event.validate()?;
        }

        // Take the lock before touching anything so a poisoned store applies nothing.
        let mut records = self
            .records
            .write()
            .map_err(|_| OutboxError::LockPoisoned("commit"))?;

        // Writes go first so a failing one leaves nothing appended.
        for write in writes {
            write()?;
        }

        let now = self.clock.now();
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            let id = self.seq.fetch_add(1, Ordering::Relaxed);
            records.push(event.into_record(id, now));
            ids.push(id);
        }

        Ok(ids)
    }

    fn claim_batch(&self, max: usize, older_than: SystemTime) -> Result<Vec<OutboxRecord>, OutboxError> {
        let records = self
            .records
            .read()
            .map_err(|_| OutboxError::LockPoisoned("claim"))?;
        let mut held_back: HashSet<&str> = HashSet::new();
        let mut claimed = Vec::new();

        for record in records.iter() {
            if claimed.len() >= max {
                break;
            }
            if record.status.is_terminal() || record.created_at > older_than {
                continue;
            }
            if held_back.contains(record.partition_key.as_str()) {
                continue;
            }
            if record.is_claimable(older_than) {
                claimed.push(record.clone());
            } else {
                held_back.insert(record.partition_key.as_str());
            }
        }

        Ok(claimed)
    }

    fn mark_processed(&self, id: u64, at: SystemTime) -> Result<(), OutboxError> {
        self.update(id, "mark processed", |record| {
            record.status = OutboxStatus::Processed;
            record.processed_at = Some(at);
        })
    }

    fn mark_failed(&self, id: u64, error: &str, retry_at: SystemTime) -> Result<u32, OutboxError> {
        self.update(id, "mark failed", |record| {
            record.status = OutboxStatus::Failed;
            record.retry_count = record.retry_count.saturating_add(1);
            record.available_at = retry_at;
            record.last_error = Some(error.to_string());
            record.retry_count
        })
    }

    fn mark_dead_lettered(&self, id: u64, error: &str, at: SystemTime) -> Result<(), OutboxError> {
        self.update(id, "mark dead-lettered", |record| {
            record.status = OutboxStatus::DeadLettered;
            record.retry_count = record.retry_count.saturating_add(1);
            record.processed_at = Some(at);
            record.last_error = Some(error.to_string());
        })
    }

    fn get(&self, id: u64) -> Result<Option<OutboxRecord>, OutboxError> {
        let records = self
            .records
            .read()
            .map_err(|_| OutboxError::LockPoisoned("get"))?;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    fn purge_terminal(&self, older_than: SystemTime) -> Result<usize, OutboxError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| OutboxError::LockPoisoned("purge"))?;
        let before = records.len();
        records.retain(|record| {
            !(record.status.is_terminal()
                && record.processed_at.is_some_and(|done| done <= older_than))
        });
        Ok(before - records.len())
    }
}
