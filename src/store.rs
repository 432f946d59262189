//! Persistence seams for instance records and metric samples.
//!
//! Durable storage lives outside this crate. [`MemoryStore`] implements both
//! traits in memory and backs tests and single-process deployments.

use crate::instance::{Instance, InstanceId};
use crate::metrics::MetricSample;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// CRUD access to instance records.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Instance>>;

    async fn list(&self) -> Result<Vec<Instance>>;

    /// Insert or replace a record.
    async fn put(&self, instance: Instance) -> Result<()>;

    /// Remove a record, returning it if it existed.
    async fn remove(&self, id: &str) -> Result<Option<Instance>>;

    /// Every host port assigned to any stored instance.
    async fn ports_in_use(&self) -> Result<HashSet<u16>> {
        Ok(self
            .list()
            .await?
            .iter()
            .flat_map(|instance| instance.ports.all())
            .collect())
    }
}

/// Append-only time series of samples per instance.
#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn append(&self, sample: MetricSample) -> Result<()>;

    async fn latest(&self, instance_id: &str) -> Result<Option<MetricSample>>;

    /// Samples with `from <= timestamp <= to`, oldest first.
    async fn range(
        &self,
        instance_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>>;
}

/// Default number of samples kept per instance (one day at 30s).
pub const DEFAULT_RETENTION: usize = 2880;

/// In-memory [`InstanceStore`] and [`MetricStore`].
pub struct MemoryStore {
    instances: DashMap<InstanceId, Instance>,
    samples: DashMap<InstanceId, VecDeque<MetricSample>>,
    retention: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retention` samples per instance, dropping the oldest.
    pub fn with_retention(retention: usize) -> Self {
        Self {
            instances: DashMap::new(),
            samples: DashMap::new(),
            retention: retention.max(1),
        }
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Instance>> {
        Ok(self.instances.get(id).map(|entry| entry.clone()))
    }

    async fn list(&self) -> Result<Vec<Instance>> {
        let mut instances: Vec<Instance> =
            self.instances.iter().map(|entry| entry.clone()).collect();
        instances.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(instances)
    }

    async fn put(&self, instance: Instance) -> Result<()> {
        self.instances.insert(instance.id.clone(), instance);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<Option<Instance>> {
        self.samples.remove(id);
        Ok(self.instances.remove(id).map(|(_, instance)| instance))
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn append(&self, sample: MetricSample) -> Result<()> {
        let mut series = self.samples.entry(sample.instance_id.clone()).or_default();
        series.push_back(sample);
        while series.len() > self.retention {
            series.pop_front();
        }
        Ok(())
    }

    async fn latest(&self, instance_id: &str) -> Result<Option<MetricSample>> {
        Ok(self
            .samples
            .get(instance_id)
            .and_then(|series| series.back().cloned()))
    }

    async fn range(
        &self,
        instance_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>> {
        Ok(self
            .samples
            .get(instance_id)
            .map(|series| {
                series
                    .iter()
                    .filter(|sample| sample.timestamp >= from && sample.timestamp <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
