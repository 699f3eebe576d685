//! Hub client facade
//!
//! `HubClient` is a cheap handle (clone it freely). All clones share one
//! connection, one request-id counter and one set of listeners.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::{ClientConfig, Endpoint};
use crate::error::{Error, Result};
use crate::protocol::Command;
use crate::types::{EntityState, HistoryState, StateChangeEvent, StatisticValue, StatisticsPeriod};

use super::connection::{run_supervisor, ConnectionState, Shared};
use super::dispatcher::{ConnectionStatus, ListenerId};

// ─────────────────────────────────────────────────────────────────
// Client Handle
// ─────────────────────────────────────────────────────────────────

/// Handle to one logical hub connection
#[derive(Clone)]
pub struct HubClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    shared: Arc<Shared>,
    supervisor: AsyncMutex<Option<Supervisor>>,
}

struct Supervisor {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl Supervisor {
    async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            debug!(error = %e, "Connection supervisor ended abnormally");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(supervisor) = self.supervisor.get_mut().take() {
            let _ = supervisor.shutdown_tx.send(true);
        }
    }
}

impl HubClient {
    /// Create a client; nothing is opened until [`HubClient::connect`]
    pub fn new(config: ClientConfig) -> Self {
        let shared = Arc::new(Shared::new(config.connection.clone()));
        Self {
            inner: Arc::new(Inner {
                config,
                shared,
                supervisor: AsyncMutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // ─────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────

    /// Open the connection and log in
    ///
    /// Resolves on the first login outcome. After a failure the client
    /// keeps reconnecting in the background within the attempt budget,
    /// unless the hub rejected the token under the terminal policy.
    /// Calling again once the budget is spent starts over from zero.
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let endpoint = Endpoint::resolve(&self.inner.config.hub)?;
        if endpoint.token.is_none() {
            return Err(Error::MissingToken);
        }

        let mut supervisor = self.inner.supervisor.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        // The previous transport must be gone before a new one opens
        if let Some(previous) = supervisor.take() {
            previous.stop().await;
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_supervisor(
            Arc::clone(&self.inner.shared),
            endpoint,
            ready_tx,
            shutdown_rx,
        ));
        *supervisor = Some(Supervisor { handle, shutdown_tx });

        ready_rx
            .await
            .unwrap_or_else(|_| Err(Error::connection_lost("connection supervisor stopped")))
    }

    /// Close the connection and stop reconnecting
    pub async fn disconnect(&self) {
        let supervisor = self.inner.supervisor.lock().await.take();
        if let Some(supervisor) = supervisor {
            info!("Closing hub connection");
            supervisor.stop().await;
        }
    }

    /// True only between successful login and the next close
    pub fn is_connected(&self) -> bool {
        self.inner.shared.is_authenticated()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.shared.phase()
    }

    /// Version reported by the hub in `auth_ok`
    pub fn hub_version(&self) -> Option<String> {
        self.inner.shared.ha_version()
    }

    /// Reconnect attempts since the last successful login
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.shared.reconnect_attempts()
    }

    // ─────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────

    /// Snapshot of every entity
    pub async fn get_states(&self) -> Result<Vec<EntityState>> {
        self.request_as(Command::GetStates).await
    }

    /// Snapshot of one entity, `None` if the hub does not know it
    pub async fn get_state(&self, entity_id: &str) -> Result<Option<EntityState>> {
        let states = self.get_states().await?;
        Ok(states.into_iter().find(|s| s.entity_id == entity_id))
    }

    /// Invoke a service; resolves once the hub confirms the call
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        service_data: Option<Value>,
    ) -> Result<Value> {
        self.inner
            .shared
            .request(Command::call_service(domain, service, service_data))
            .await
    }

    /// Aggregated statistics per id
    pub async fn get_statistics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        statistic_ids: &[String],
        period: StatisticsPeriod,
    ) -> Result<HashMap<String, Vec<StatisticValue>>> {
        let command = Command::statistics(start, end, statistic_ids.to_vec(), period);
        self.request_as(command).await
    }

    /// Raw state history per entity
    pub async fn get_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        entity_ids: &[String],
        minimal_response: bool,
    ) -> Result<HashMap<String, Vec<HistoryState>>> {
        let command = Command::history(start, end, entity_ids.to_vec(), minimal_response);
        self.request_as(command).await
    }

    /// Round trip of one `ping`
    pub async fn ping(&self) -> Result<Duration> {
        let started = Instant::now();
        self.inner.shared.request(Command::Ping).await?;
        Ok(started.elapsed())
    }

    async fn request_as<T: DeserializeOwned>(&self, command: Command) -> Result<T> {
        let name = command.type_name();
        let value = self.inner.shared.request(command).await?;
        serde_json::from_value(value).map_err(|e| Error::ProtocolMalformed {
            message: format!("Unexpected {} result: {}", name, e),
        })
    }

    // ─────────────────────────────────────────────────────────────
    // Listeners
    // ─────────────────────────────────────────────────────────────

    /// Called synchronously, in registration order, for every state change
    pub fn subscribe_state_changes<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StateChangeEvent) + Send + Sync + 'static,
    {
        self.inner.shared.dispatcher.subscribe_state_changes(listener)
    }

    /// State changes as a channel
    pub fn state_changes(&self) -> mpsc::UnboundedReceiver<StateChangeEvent> {
        self.inner.shared.dispatcher.state_changes()
    }

    pub fn on_connection_status<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.inner.shared.dispatcher.on_connection_status(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.shared.dispatcher.unsubscribe(id)
    }
}

impl std::fmt::Debug for HubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClient")
            .field("url", &self.inner.config.hub.url)
            .field("state", &self.connection_state())
            .finish()
    }
}
