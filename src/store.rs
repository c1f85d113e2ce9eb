use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use crate::subscriber::Subscriber;
use crate::subscriber::SyncStatus;

/// Handle to the persisted subscriber records: CRUD plus the status queries
/// the batch and cleanup drivers run on. The host application is expected to
/// own durable storage; this in-memory store provides the same contract for
/// the workers and for embedding.
///
/// Clones share the same records. Batches process one record at a time (no
/// internal parallelism), so the coarse lock is never contended within a run.
#[derive(Clone, Default)]
pub struct SubscriberStore {
    inner: Arc<Mutex<BTreeMap<Uuid, Subscriber>>>,
}

impl SubscriberStore {
    pub fn new() -> Self { Self::default() }

    pub fn insert(
        &self,
        subscriber: Subscriber,
    ) -> Uuid {
        let id = subscriber.id;
        self.inner.lock().unwrap().insert(id, subscriber);
        id
    }

    pub fn get(
        &self,
        id: Uuid,
    ) -> Option<Subscriber> {
        self.inner.lock().unwrap().get(&id).cloned()
    }

    /// Write a record back (upsert by record id)
    pub fn save(
        &self,
        subscriber: Subscriber,
    ) {
        self.inner
            .lock()
            .unwrap()
            .insert(subscriber.id, subscriber);
    }

    pub fn delete(
        &self,
        id: Uuid,
    ) -> bool {
        self.inner.lock().unwrap().remove(&id).is_some()
    }

    /// Records with `status`, oldest first, at most `limit` of them (0 lifts
    /// the bound)
    pub fn with_status(
        &self,
        status: SyncStatus,
        limit: usize,
    ) -> Vec<Subscriber> {
        let mut matching: Vec<Subscriber> = self
            .inner
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|s| s.created_at);
        if limit > 0 {
            matching.truncate(limit);
        }
        matching
    }

    pub fn count_with_status(
        &self,
        status: SyncStatus,
    ) -> usize {
        self.inner
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.status == status)
            .count()
    }

    pub fn count_older_than(
        &self,
        status: SyncStatus,
        cutoff: DateTime<Utc>,
    ) -> usize {
        self.inner
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.status == status && s.created_at < cutoff)
            .count()
    }

    /// Delete records with `status` created before `cutoff`, oldest first, at
    /// most `limit` of them (0 lifts the bound). Returns how many were
    /// deleted.
    pub fn prune(
        &self,
        status: SyncStatus,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> usize {
        let mut records = self.inner.lock().unwrap();
        let mut doomed: Vec<(DateTime<Utc>, Uuid)> = records
            .values()
            .filter(|s| s.status == status && s.created_at < cutoff)
            .map(|s| (s.created_at, s.id))
            .collect();
        doomed.sort();
        if limit > 0 {
            doomed.truncate(limit);
        }
        for (_, id) in &doomed {
            records.remove(id);
        }
        doomed.len()
    }

    pub fn len(&self) -> usize { self.inner.lock().unwrap().len() }

    pub fn is_empty(&self) -> bool { self.inner.lock().unwrap().is_empty() }
}
