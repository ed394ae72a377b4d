use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::RwLock;

use crate::db::{JobStore, StoreError};
use crate::models::job::Job;
use crate::models::status::ScanStatus;
use crate::services::queue::select_next;

/// Process-local job store.
///
/// Used by tests and single-process demos. Writes can be made to fail to
/// exercise queue-failure handling: `set_unavailable(true)` rejects every
/// write, `set_inserts_failing(true)` rejects only inserts and
/// `reject_writes_for` rejects writes to one scan.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
    unavailable: AtomicBool,
    inserts_failing: AtomicBool,
    rejected_scans: Mutex<HashSet<String>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_inserts_failing(&self, failing: bool) {
        self.inserts_failing.store(failing, Ordering::SeqCst);
    }

    pub fn reject_writes_for(&self, scan_id: impl Into<String>) {
        self.rejected_scans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(scan_id.into());
    }

    /// Snapshot of every stored job.
    pub async fn all(&self) -> Vec<Job> {
        self.jobs.read().await.values().cloned().collect()
    }

    fn check_writable(&self, scan_id: &str) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        let rejected = self
            .rejected_scans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(scan_id);
        if rejected {
            return Err(StoreError::Unavailable(format!("writes to {scan_id} rejected")));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        self.check_writable(&job.scan_id)?;
        if self.inserts_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("insert timed out".to_string()));
        }
        self.jobs.write().await.insert(job.scan_id.clone(), job.clone());
        Ok(())
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        self.check_writable(&job.scan_id)?;
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.scan_id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(job.scan_id.clone())),
        }
    }

    async fn get(&self, scan_id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(scan_id).cloned())
    }

    async fn max_queue_position(&self) -> Result<Option<i64>, StoreError> {
        Ok(self.jobs.read().await.values().map(|j| j.queue_position).max())
    }

    async fn next_queued(&self) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(select_next(jobs.values()).cloned())
    }

    async fn list_by_status(&self, statuses: &[ScanStatus]) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| statuses.contains(&j.status))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.dispatch_order(b));
        Ok(matching)
    }

    async fn count_by_status(&self, status: ScanStatus) -> Result<i64, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs.values().filter(|j| j.status == status).count() as i64)
    }

    async fn mark_queue_failed(&self, scan_id: &str, message: &str) -> Result<bool, StoreError> {
        self.check_writable(scan_id)?;
        match self.jobs.write().await.get_mut(scan_id) {
            Some(job) => {
                job.status = ScanStatus::QueueFailed;
                job.last_error_message = Some(message.to_string());
                job.updated_at = chrono::Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{NewJob, Priority};

    fn job(scan_id: &str, priority: Priority, position: i64) -> Job {
        Job::queued(NewJob::new(scan_id, "brain_tumor", priority), position)
    }

    #[tokio::test]
    async fn next_queued_prefers_priority_then_position() {
        let store = InMemoryJobStore::new();
        store.insert(&job("a", Priority::Medium, 1)).await.unwrap();
        store.insert(&job("b", Priority::Urgent, 3)).await.unwrap();
        store.insert(&job("c", Priority::Urgent, 2)).await.unwrap();

        let next = store.next_queued().await.unwrap().unwrap();
        assert_eq!(next.scan_id, "c");
    }

    #[tokio::test]
    async fn next_queued_skips_non_queued() {
        let store = InMemoryJobStore::new();
        let mut busy = job("a", Priority::Urgent, 1);
        busy.status = ScanStatus::QueueProcessing;
        store.insert(&busy).await.unwrap();

        assert!(store.next_queued().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_requires_existing_record() {
        let store = InMemoryJobStore::new();
        let err = store.update(&job("ghost", Priority::Low, 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn unavailable_store_rejects_writes() {
        let store = InMemoryJobStore::new();
        store.set_unavailable(true);

        assert!(store.insert(&job("a", Priority::Low, 1)).await.is_err());
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failing_inserts_still_allow_queue_failed_marking() {
        let store = InMemoryJobStore::new();
        store.insert(&job("a", Priority::Low, 1)).await.unwrap();
        store.set_inserts_failing(true);

        assert!(store.insert(&job("a", Priority::Low, 2)).await.is_err());
        assert!(store.mark_queue_failed("a", "insert timed out").await.unwrap());
        assert!(!store.mark_queue_failed("missing", "insert timed out").await.unwrap());
        assert_eq!(store.get("a").await.unwrap().unwrap().status, ScanStatus::QueueFailed);
    }

    #[tokio::test]
    async fn rejected_scan_blocks_only_its_own_writes() {
        let store = InMemoryJobStore::new();
        store.insert(&job("a", Priority::Low, 1)).await.unwrap();
        store.insert(&job("b", Priority::Low, 2)).await.unwrap();
        store.reject_writes_for("a");

        assert!(store.update(&job("a", Priority::High, 1)).await.is_err());
        assert!(store.update(&job("b", Priority::High, 2)).await.is_ok());
    }
}
