//! Process-local registry of report jobs.
//!
//! [`JobStore`] is a cheap-to-clone handle over a sharded concurrent map, so the
//! orchestrator (writer) and the HTTP handlers (readers) share one instance
//! without a global lock. Every read returns an owned snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use serde_json::Value;

use crate::error::StoreError;
use crate::state_machine::{Job, JobUpdate, Stage};

#[derive(Debug, Clone, Default)]
pub struct JobStore {
    jobs: Arc<DashMap<String, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new job at QUEUED and return its id.
    pub fn create(&self, input: impl Into<String>) -> String {
        self.insert(Job::new(input.into()))
    }

    /// Insert a job whose earlier stages are already recorded.
    pub fn create_resumed(
        &self,
        input: impl Into<String>,
        seeded: BTreeMap<Stage, Value>,
        resumed_from: &str,
    ) -> String {
        self.insert(Job::resumed(input.into(), seeded, resumed_from))
    }

    fn insert(&self, job: Job) -> String {
        let id = job.id.clone();
        self.jobs.insert(id.clone(), job);
        id
    }

    pub fn get(&self, id: &str) -> Result<Job, StoreError> {
        self.jobs
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Apply a single atomic update and return the resulting snapshot.
    pub fn update(&self, id: &str, update: JobUpdate) -> Result<Job, StoreError> {
        let mut job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        job.apply(update)?;
        Ok(job.value().clone())
    }

    /// Remove a terminal job. Returns `false` if it was already gone.
    pub fn evict(&self, id: &str) -> Result<bool, StoreError> {
        if self.jobs.remove_if(id, |_, job| job.is_terminal()).is_some() {
            return Ok(true);
        }
        if self.jobs.contains_key(id) {
            return Err(StoreError::StillRunning(id.to_string()));
        }
        Ok(false)
    }

    /// Evict terminal jobs untouched for longer than `retention`.
    pub fn sweep(&self, retention: Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let before = self.jobs.len();
        self.jobs
            .retain(|_, job| !(job.is_terminal() && job.updated_at < cutoff));
        before.saturating_sub(self.jobs.len())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
