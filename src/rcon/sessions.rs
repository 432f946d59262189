//! One console session per instance.

use crate::rcon::{RconClient, Result};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Lazily created console sessions keyed by instance id.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<RconClient>>,
    connecting: DashMap<String, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl SessionRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            connecting: DashMap::new(),
            timeout,
        }
    }

    /// Existing authenticated session, or a fresh one.
    ///
    /// Connects for the same instance are serialized, so concurrent callers
    /// share one session.
    pub async fn get_or_connect(
        &self,
        instance_id: &str,
        host: &str,
        port: u16,
        password: &str,
    ) -> Result<Arc<RconClient>> {
        if let Some(client) = self.get(instance_id) {
            if client.is_authenticated().await {
                return Ok(client);
            }
        }

        let gate = self
            .connecting
            .entry(instance_id.to_string())
            .or_default()
            .clone();
        let _connecting = gate.lock().await;

        // another caller may have connected while we waited
        if let Some(client) = self.get(instance_id) {
            if client.is_authenticated().await {
                return Ok(client);
            }
        }

        let client = Arc::new(RconClient::connect(host, port, password, self.timeout).await?);
        if let Some(previous) = self
            .sessions
            .insert(instance_id.to_string(), Arc::clone(&client))
        {
            previous.disconnect().await;
        }
        debug!("Registered console session for instance {}", instance_id);
        Ok(client)
    }

    pub fn get(&self, instance_id: &str) -> Option<Arc<RconClient>> {
        self.sessions
            .get(instance_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Tear down the session of one instance, if any.
    pub async fn disconnect(&self, instance_id: &str) {
        if let Some((_, client)) = self.sessions.remove(instance_id) {
            client.disconnect().await;
        }
        self.connecting.remove(instance_id);
    }

    pub async fn disconnect_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.disconnect(&id).await;
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(crate::rcon::DEFAULT_TIMEOUT)
    }
}
