//! Hub Client - WebSocket protocol client for a home-automation hub
//!
//! Keeps one authenticated connection to the hub, correlates command
//! results by id, fans `state_changed` events out to listeners, and
//! reconnects with exponential backoff when the socket drops.
//!
//! ```no_run
//! # async fn demo() -> hub_client::Result<()> {
//! use hub_client::{ClientConfig, HubClient};
//!
//! let config = ClientConfig::load(None)?;
//! let client = HubClient::new(config);
//! client.subscribe_state_changes(|event| println!("{} -> {}", event.entity_id, event.new_state.state));
//! client.connect().await?;
//! let lights = client.get_states().await?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod hub;
pub mod logging;
pub mod protocol;
pub mod types;
pub mod version;

pub use config::{ClientConfig, Endpoint};
pub use error::{Error, ErrorCode, Result};
pub use hub::{ConnectionState, ConnectionStatus, HubClient, ListenerId};
pub use types::{EntityState, HistoryState, StateChangeEvent, StatisticValue, StatisticsPeriod};
