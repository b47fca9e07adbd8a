//! Server-Sent-Event streams.
//!
//! # How an SSE client is served (for beginners)
//!
//! SSE is one-way: the server keeps an HTTP response open and writes
//! `text/event-stream` records into it.  The client sends its own messages
//! with ordinary POST requests that name its address.
//!
//! ```text
//!  GET /events ──▶ SseEndpoint::connect ──▶ (ConnectionHandle, SseStream)
//!                        │                          │
//!                        │ registers SseTransport   │ HTTP layer writes
//!                        ▼                          ▼ event.to_wire() per item
//!                   sse hub shard ──frames──▶ bounded channel
//!
//!  POST /events ──▶ SseEndpoint::post(client_id, body) ──▶ Hub::deliver_inbound
//! ```
//!
//! The first event on every stream is `connect`, whose data is
//! `{"client_id": "<address>"}` so the client learns where to POST.
//! Heartbeat pings are comment lines, which browsers ignore.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use fanout_core::{Address, Frame, FrameKind, SequenceCounter};
use futures_util::Stream;
use serde_json::json;
use tokio::sync::mpsc;

use crate::application::connection::ConnectionHandle;
use crate::application::hub::Hub;
use crate::application::transport::{Transport, TransportError};

const CONNECT_EVENT: &str = "connect";
const MESSAGE_EVENT: &str = "message";
const HEARTBEAT: &str = "heartbeat";

/// One record of an event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Message {
        id: String,
        event: String,
        data: String,
    },
    Comment(String),
}

impl SseEvent {
    /// Renders the record in `text/event-stream` format, including the blank
    /// line that terminates it.  Multi-line data becomes one `data:` line per
    /// line.
    pub fn to_wire(&self) -> String {
        match self {
            SseEvent::Message { id, event, data } => {
                let mut out = format!("id: {id}\nevent: {event}\n");
                for line in data.split('\n') {
                    out.push_str("data: ");
                    out.push_str(line.strip_suffix('\r').unwrap_or(line));
                    out.push('\n');
                }
                out.push('\n');
                out
            }
            SseEvent::Comment(text) => format!(": {text}\n\n"),
        }
    }

    /// Returns the event name, or `None` for comments.
    pub fn event(&self) -> Option<&str> {
        match self {
            SseEvent::Message { event, .. } => Some(event),
            SseEvent::Comment(_) => None,
        }
    }

    /// Returns the data, or `None` for comments.
    pub fn data(&self) -> Option<&str> {
        match self {
            SseEvent::Message { data, .. } => Some(data),
            SseEvent::Comment(_) => None,
        }
    }
}

/// Hub-wide event ids: `sse:{hubId}:{n}`.
#[derive(Debug)]
struct EventIds {
    hub_id: u64,
    counter: SequenceCounter,
}

impl EventIds {
    fn next(&self) -> String {
        format!("sse:{}:{}", self.hub_id, self.counter.next())
    }

    fn message(&self, event: &str, data: String) -> SseEvent {
        SseEvent::Message {
            id: self.next(),
            event: event.to_string(),
            data,
        }
    }
}

/// Transport that writes frames into a stream's event channel.
pub struct SseTransport {
    events: Option<mpsc::Sender<SseEvent>>,
    ids: Arc<EventIds>,
}

impl SseTransport {
    async fn push(&mut self, event: SseEvent) -> Result<(), TransportError> {
        let events = self.events.as_ref().ok_or(TransportError::Closed)?;
        events.send(event).await.map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let data = match frame.kind {
            FrameKind::Text => frame.as_text().unwrap_or_default().to_string(),
            FrameKind::Binary => String::from_utf8_lossy(&frame.body).into_owned(),
        };
        let event = self.ids.message(MESSAGE_EVENT, data);
        self.push(event).await
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.push(SseEvent::Comment(HEARTBEAT.to_string())).await
    }

    async fn close(&mut self) {
        // Dropping the sender ends the client's stream.
        self.events = None;
    }
}

/// The receiving end the HTTP layer streams to the client.
#[derive(Debug)]
pub struct SseStream {
    address: Address,
    events: mpsc::Receiver<SseEvent>,
}

impl SseStream {
    pub fn address(&self) -> Address {
        self.address
    }

    /// Waits for the next event.  Returns `None` once the hub closed the
    /// connection.
    pub async fn recv(&mut self) -> Option<SseEvent> {
        self.events.recv().await
    }
}

impl Stream for SseStream {
    type Item = SseEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<SseEvent>> {
        self.events.poll_recv(cx)
    }
}

/// Registers SSE clients with an `sse` hub and accepts their messages.
#[derive(Debug, Clone)]
pub struct SseEndpoint {
    hub: Hub,
    ids: Arc<EventIds>,
}

impl SseEndpoint {
    pub fn new(hub: Hub) -> Self {
        let ids = Arc::new(EventIds {
            hub_id: hub.id(),
            counter: SequenceCounter::starting_at(1),
        });
        Self { hub, ids }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Registers a new client.  `buffer` bounds the events queued for a slow
    /// client; a full queue holds the shard's write until `write_wait`
    /// expires, after which the client is dropped.
    ///
    /// The returned stream already holds the `connect` event.
    pub fn connect(&self, buffer: usize) -> (ConnectionHandle, SseStream) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = self.hub.register_with(|address: &Address| -> Box<dyn Transport> {
            let hello = json!({ "client_id": address.to_string() }).to_string();
            // The channel is empty and at least one slot wide.
            let _ = tx.try_send(self.ids.message(CONNECT_EVENT, hello));
            Box::new(SseTransport {
                events: Some(tx),
                ids: Arc::clone(&self.ids),
            })
        });
        let stream = SseStream {
            address: handle.address(),
            events: rx,
        };
        (handle, stream)
    }

    /// Delivers a message POSTed by the client with address `client_id`.
    /// Returns `false` if the address cannot belong to this endpoint's hub.
    pub fn post(&self, client_id: &str, data: impl Into<Bytes>) -> bool {
        self.hub.deliver_inbound(client_id, data)
    }
}
