//! Hub connection
//!
//! The transport owns the socket, the handshake logs in, the correlator
//! matches results to requests, the dispatcher fans events out, and the
//! connection supervisor ties them together with reconnect backoff.

mod auth;
mod client;
mod connection;
mod correlator;
mod dispatcher;
mod reconnect;
mod transport;

pub use auth::{Handshake, HandshakeState, HandshakeStep};
pub use client::HubClient;
pub use connection::ConnectionState;
pub use correlator::{Correlator, PendingRequest};
pub use dispatcher::{ConnectionStatus, Dispatcher, ListenerId, ListenerRegistry};
pub use reconnect::ReconnectBackoff;
pub use transport::{Transport, TransportEvent};
