//! Handler capability and the context an engine hands to it.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde_json::Value;

use crate::error::HandlerError;
use crate::events::EventKind;
use crate::net::connection::ConnectionId;

/// Something that reacts to a server event.
pub trait EventHandler: Send + Sync {
    fn handle(&self, ctx: &EventContext) -> Result<(), HandlerError>;
}

/// Shared, type-erased handler.
pub type SharedHandler = Arc<dyn EventHandler>;

/// Adapter turning a closure into an [`EventHandler`].
pub struct FnHandler<F>(F);

/// Wrap a closure as a handler.
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&EventContext) -> Result<(), HandlerError> + Send + Sync,
{
    FnHandler(f)
}

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&EventContext) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, ctx: &EventContext) -> Result<(), HandlerError> {
        (self.0)(ctx)
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnHandler")
    }
}

/// Head and body of an HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// What the event carries.
#[derive(Debug, Clone, Default)]
pub enum EventPayload {
    #[default]
    None,
    /// Bytes read from a stream, datagram, or WebSocket message.
    Data(Bytes),
    /// A dispatched task, or its result for `finish`.
    Task { id: u64, data: Value },
    Request(HttpRequest),
}

/// Reply collected from handlers while an event is dispatched.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub chunks: Vec<Bytes>,
    pub close: bool,
}

impl Reply {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunks joined into one buffer.
    pub fn body(&self) -> Bytes {
        match self.chunks.as_slice() {
            [] => Bytes::new(),
            [single] => single.clone(),
            chunks => Bytes::from(chunks.concat()),
        }
    }
}

/// Context of one event dispatch.
#[derive(Debug)]
pub struct EventContext {
    event: EventKind,
    port: Option<u16>,
    connection: Option<ConnectionId>,
    worker_id: Option<usize>,
    peer: Option<SocketAddr>,
    payload: EventPayload,
    reply: Mutex<Reply>,
}

impl EventContext {
    pub fn new(event: EventKind) -> Self {
        Self {
            event,
            port: None,
            connection: None,
            worker_id: None,
            peer: None,
            payload: EventPayload::None,
            reply: Mutex::new(Reply::default()),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_connection(mut self, connection: ConnectionId) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn with_worker(mut self, worker_id: usize) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn with_payload(mut self, payload: EventPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn event(&self) -> EventKind {
        self.event
    }

    /// Port of the bind point that produced the event.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    pub fn worker_id(&self) -> Option<usize> {
        self.worker_id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Bytes of a data event, if any.
    pub fn data(&self) -> Option<&Bytes> {
        match &self.payload {
            EventPayload::Data(data) => Some(data),
            _ => None,
        }
    }

    pub fn request(&self) -> Option<&HttpRequest> {
        match &self.payload {
            EventPayload::Request(request) => Some(request),
            _ => None,
        }
    }

    pub fn task(&self) -> Option<(u64, &Value)> {
        match &self.payload {
            EventPayload::Task { id, data } => Some((*id, data)),
            _ => None,
        }
    }

    /// Queue bytes to send back to the peer.
    pub fn reply(&self, data: impl Into<Bytes>) {
        self.lock_reply().chunks.push(data.into());
    }

    /// HTTP status for a request event.
    pub fn set_status(&self, status: u16) {
        self.lock_reply().status = Some(status);
    }

    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.lock_reply().headers.push((name.into(), value.into()));
    }

    /// Ask the engine to close the connection after this event.
    pub fn close(&self) {
        self.lock_reply().close = true;
    }

    /// Take everything handlers queued.
    pub fn take_reply(&self) -> Reply {
        std::mem::take(&mut *self.lock_reply())
    }

    fn lock_reply(&self) -> std::sync::MutexGuard<'_, Reply> {
        self.reply.lock().expect("event reply mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_collects_chunks_in_order() {
        let ctx = EventContext::new(EventKind::Receive)
            .with_port(9501)
            .with_payload(EventPayload::Data(Bytes::from_static(b"ping")));

        assert_eq!(ctx.data().map(|d| &d[..]), Some(&b"ping"[..]));
        ctx.reply("po");
        ctx.reply(Bytes::from_static(b"ng"));
        ctx.close();

        let reply = ctx.take_reply();
        assert_eq!(&reply.body()[..], b"pong");
        assert!(reply.close);
        assert!(ctx.take_reply().is_empty());
    }

    #[test]
    fn closures_become_handlers() {
        let handler = handler_fn(|ctx| {
            ctx.set_status(201);
            Ok(())
        });
        let ctx = EventContext::new(EventKind::Request);
        handler.handle(&ctx).unwrap();
        assert_eq!(ctx.take_reply().status, Some(201));
    }
}
