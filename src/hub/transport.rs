//! Raw WebSocket transport
//!
//! Owns one socket for its whole life. Inbound frames are decoded into
//! [`Incoming`] here and nowhere else. The event stream ends with exactly
//! one [`TransportEvent::Closed`], after which no further messages surface.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::Incoming;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What an open transport reports
#[derive(Debug)]
pub enum TransportEvent {
    /// A decoded frame from the hub
    Message(Incoming),

    /// The socket failed; `Closed` follows
    Errored(Error),

    /// The socket is gone
    Closed { reason: Option<String> },
}

/// One opened WebSocket connection
pub struct Transport {
    url: Url,
    write: SplitSink<WsStream, WsMessage>,
    read: SplitStream<WsStream>,
    closing_reason: Option<String>,
    closed: bool,
}

impl Transport {
    /// Open the socket; this is the `opened` signal
    pub async fn open(url: &Url, timeout: Duration) -> Result<Self> {
        debug!(url = %url, "Opening hub socket");

        let (stream, _response) = tokio::time::timeout(timeout, connect_async(url.clone()))
            .await
            .map_err(|_| Error::ConnectionTimeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })?
            .map_err(|e| Error::connection_failed(url.as_str(), e.to_string()))?;

        let (write, read) = stream.split();
        Ok(Self {
            url: url.clone(),
            write,
            read,
            closing_reason: None,
            closed: false,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Send one text frame
    pub async fn send_text(&mut self, text: String) -> Result<()> {
        if self.closed {
            return Err(Error::connection_lost("transport already closed"));
        }
        trace!(frame = %text, "Sending frame");
        self.write.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    /// Wait for the next event
    ///
    /// Cancel-safe: dropping the future never loses a decoded frame.
    /// Returns `None` once `Closed` has been delivered.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        if self.closed {
            return None;
        }
        if let Some(reason) = self.closing_reason.take() {
            self.closed = true;
            return Some(TransportEvent::Closed { reason: Some(reason) });
        }

        loop {
            match self.read.next().await {
                Some(Ok(WsMessage::Text(text))) => match Incoming::from_json(&text) {
                    Ok(msg) => return Some(TransportEvent::Message(msg)),
                    Err(e) => warn!(error = %e, "Failed to parse message"),
                },
                Some(Ok(WsMessage::Binary(data))) => match Incoming::from_json_bytes(&data) {
                    Ok(msg) => return Some(TransportEvent::Message(msg)),
                    Err(e) => warn!(error = %e, "Failed to parse binary message"),
                },
                // tungstenite queues the pong reply itself
                Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!(frame = ?frame, "Received close frame");
                    self.closed = true;
                    return Some(TransportEvent::Closed {
                        reason: frame.map(close_reason),
                    });
                }
                Some(Ok(WsMessage::Frame(_))) => {}
                Some(Err(e)) => {
                    self.closing_reason = Some(e.to_string());
                    return Some(TransportEvent::Errored(Error::WebSocket(e)));
                }
                None => {
                    self.closed = true;
                    return Some(TransportEvent::Closed { reason: None });
                }
            }
        }
    }

    /// Close the socket from our side
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.write.send(WsMessage::Close(None)).await {
            debug!(error = %e, "Close frame not delivered");
        }
        let _ = self.write.close().await;
    }
}

fn close_reason(frame: CloseFrame<'_>) -> String {
    if frame.reason.is_empty() {
        format!("close code {}", u16::from(frame.code))
    } else {
        format!("{} ({})", frame.reason, u16::from(frame.code))
    }
}
