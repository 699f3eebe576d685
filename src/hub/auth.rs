//! Login sequence
//!
//! The hub opens with `auth_required`, the client answers with its token,
//! and the hub replies `auth_ok` or `auth_invalid`. Nothing else may be
//! sent until `auth_ok` arrives. The state machine here is pure; the
//! session drives it with decoded frames.

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::{AuthMessage, Incoming};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingAuthRequest,
    AwaitingAuthResult,
    Authenticated,
    Failed,
}

/// What the session should do with a handshake frame
#[derive(Debug)]
pub enum HandshakeStep {
    /// Send this message to the hub
    Reply(AuthMessage),

    /// Login complete
    Authenticated { ha_version: Option<String> },

    /// Token rejected
    Rejected(String),

    /// Frame has no meaning at this point
    Ignored,
}

/// Per-connection login state
#[derive(Debug)]
pub struct Handshake {
    token: String,
    state: HandshakeState,
}

impl Handshake {
    /// A missing token fails here, before any frame is exchanged
    pub fn new(token: Option<&str>) -> Result<Self> {
        match token {
            Some(token) if !token.is_empty() => Ok(Self {
                token: token.to_string(),
                state: HandshakeState::AwaitingAuthRequest,
            }),
            _ => Err(Error::MissingToken),
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, HandshakeState::Authenticated | HandshakeState::Failed)
    }

    pub fn on_message(&mut self, message: &Incoming) -> HandshakeStep {
        match (self.state, message) {
            (HandshakeState::AwaitingAuthRequest, Incoming::AuthRequired(req)) => {
                debug!(ha_version = ?req.ha_version, "Hub requested authentication");
                self.state = HandshakeState::AwaitingAuthResult;
                HandshakeStep::Reply(AuthMessage::new(self.token.clone()))
            }
            (HandshakeState::AwaitingAuthResult, Incoming::AuthOk(ok)) => {
                self.state = HandshakeState::Authenticated;
                HandshakeStep::Authenticated {
                    ha_version: ok.ha_version.clone(),
                }
            }
            (HandshakeState::AwaitingAuthResult, Incoming::AuthInvalid(invalid)) => {
                self.state = HandshakeState::Failed;
                let message = if invalid.message.is_empty() {
                    "Invalid access token".to_string()
                } else {
                    invalid.message.clone()
                };
                HandshakeStep::Rejected(message)
            }
            (state, other) => {
                warn!(state = ?state, message_type = other.type_name(), "Unexpected message during handshake");
                HandshakeStep::Ignored
            }
        }
    }
}
