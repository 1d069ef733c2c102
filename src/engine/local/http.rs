//! HTTP and WebSocket bind points.
//!
//! # Data Flow
//! ```text
//! accepted stream
//!     → hyper-util auto builder (HTTP/1.1, HTTP/2, or both)
//!     → upgrade request?  handshake handler → WebSocket session
//!                           (open, message..., close)
//!     → static file below the document root?  served directly
//!     → request handler → Reply → response (404 without handler, 500 on error)
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode};
use axum::response::IntoResponse;
use bytes::Bytes;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::events::{EventContext, EventKind, EventPayload, HttpRequest, Reply};
use crate::net::connection::ConnectionGuard;

use super::options::HttpOptions;
use super::static_files::StaticRoot;
use super::PointContext;

/// State shared by every request on one connection.
struct HttpSession {
    point: PointContext,
    http: HttpOptions,
    static_root: Option<Arc<StaticRoot>>,
    peer: Option<SocketAddr>,
    // also held by an upgraded WebSocket session
    guard: Arc<ConnectionGuard>,
}

pub(crate) async fn serve_http<S>(
    point: PointContext,
    http: HttpOptions,
    static_root: Option<Arc<StaticRoot>>,
    stream: S,
    peer: Option<SocketAddr>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut shutdown = point.shutdown.subscribe();
    let session = Arc::new(HttpSession {
        guard: Arc::new(point.track_connection()),
        point: point.clone(),
        http,
        static_root,
        peer,
    });
    let id = session.guard.id();

    let service = {
        let session = Arc::clone(&session);
        service_fn(move |req: Request<Incoming>| {
            let session = Arc::clone(&session);
            async move { Ok::<_, Infallible>(session.respond(req.map(Body::new)).await) }
        })
    };

    let builder = auto::Builder::new(TokioExecutor::new());
    let builder = match (http.http1, http.http2) {
        (true, false) => builder.http1_only(),
        (false, true) => builder.http2_only(),
        _ => builder,
    };

    let mut connection = Box::pin(builder.serve_connection_with_upgrades(TokioIo::new(stream), service));
    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = shutdown.recv() => {
            connection.as_mut().graceful_shutdown();
            connection.as_mut().await
        }
    };
    if let Err(err) = result {
        tracing::debug!(connection = %id, error = %err, "HTTP connection ended with error");
    }

    drop(connection);
    drop(session);
    point.record_close();
}

impl HttpSession {
    fn event(&self, kind: EventKind) -> EventContext {
        let ctx = self.point.context(kind).with_connection(self.guard.id());
        match self.peer {
            Some(peer) => ctx.with_peer(peer),
            None => ctx,
        }
    }

    async fn respond(self: &Arc<Self>, req: Request<Body>) -> Response<Body> {
        let point = &self.point;
        point.shared.stats.record_request(point.port);

        if self.http.websocket && is_websocket_upgrade(req.headers()) {
            return self.upgrade(req).await;
        }

        if let Some(root) = &self.static_root {
            if let Some(response) = root.serve(req.method(), req.uri().path()).await {
                return response;
            }
        }

        let (parts, body) = req.into_parts();
        let body = match axum::body::to_bytes(body, point.options.package_max_length).await {
            Ok(body) => body,
            Err(err) => {
                tracing::debug!(error = %err, "Failed to read request body");
                return status_response(StatusCode::PAYLOAD_TOO_LARGE);
            }
        };

        let ctx = self
            .event(EventKind::Request)
            .with_payload(EventPayload::Request(http_request(&parts, body)));
        match point.shared.handlers.dispatch(&ctx) {
            Ok(true) => reply_response(ctx.take_reply()),
            Ok(false) => status_response(StatusCode::NOT_FOUND),
            Err(err) => {
                tracing::warn!(
                    method = %parts.method,
                    uri = %parts.uri,
                    error = %err,
                    "Request handler failed"
                );
                status_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    async fn upgrade(self: &Arc<Self>, req: Request<Body>) -> Response<Body> {
        let point = &self.point;
        let (mut parts, _body) = req.into_parts();

        let ctx = self
            .event(EventKind::Handshake)
            .with_payload(EventPayload::Request(http_request(&parts, Bytes::new())));
        if let Err(err) = point.shared.handlers.dispatch(&ctx) {
            tracing::warn!(error = %err, "Handshake handler refused connection");
            return status_response(StatusCode::FORBIDDEN);
        }
        let reply = ctx.take_reply();
        if reply.status.is_some_and(|status| status >= 300) {
            return reply_response(reply);
        }

        let upgrade = match <WebSocketUpgrade as FromRequestParts<()>>::from_request_parts(
            &mut parts,
            &(),
        )
        .await
        {
            Ok(upgrade) => upgrade,
            Err(rejection) => return rejection.into_response(),
        };
        let session = Arc::clone(self);
        upgrade.on_upgrade(move |socket| session.websocket(socket))
    }

    async fn websocket(self: Arc<Self>, mut socket: WebSocket) {
        let point = &self.point;
        let mut shutdown = point.shutdown.subscribe();
        tracing::debug!(connection = %self.guard.id(), "WebSocket opened");

        let ctx = self.event(EventKind::Open);
        point.shared.handlers.notify(&ctx);
        let mut open = send_reply(&mut socket, ctx.take_reply()).await;

        while open && !point.shutdown.is_triggered() {
            let message = tokio::select! {
                message = socket.recv() => message,
                _ = shutdown.recv() => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            };
            let data = match message {
                Some(Ok(Message::Text(text))) => Bytes::copy_from_slice(text.as_str().as_bytes()),
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    tracing::debug!(error = %err, "WebSocket receive failed");
                    break;
                }
            };

            let ctx = self
                .event(EventKind::Message)
                .with_payload(EventPayload::Data(data));
            point.shared.handlers.notify(&ctx);
            open = send_reply(&mut socket, ctx.take_reply()).await;
        }

        point
            .shared
            .handlers
            .notify(&self.event(EventKind::Close));
        tracing::debug!(connection = %self.guard.id(), "WebSocket closed");
    }
}

/// Send queued chunks as frames; false when the session should end.
async fn send_reply(socket: &mut WebSocket, reply: Reply) -> bool {
    for chunk in reply.chunks {
        let message = match std::str::from_utf8(&chunk) {
            Ok(text) => Message::Text(text.to_owned().into()),
            Err(_) => Message::Binary(chunk),
        };
        if let Err(err) = socket.send(message).await {
            tracing::debug!(error = %err, "WebSocket send failed");
            return false;
        }
    }
    if reply.close {
        let _ = socket.send(Message::Close(None)).await;
        return false;
    }
    true
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

fn http_request(parts: &Parts, body: Bytes) -> HttpRequest {
    HttpRequest {
        method: parts.method.to_string(),
        uri: parts.uri.to_string(),
        headers: parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
        body,
    }
}

fn status_response(status: StatusCode) -> Response<Body> {
    let reason = status.canonical_reason().unwrap_or_default();
    (status, reason).into_response()
}

/// Turn what handlers queued into a response.
fn reply_response(reply: Reply) -> Response<Body> {
    let status = match StatusCode::from_u16(reply.status.unwrap_or(200)) {
        Ok(status) => status,
        Err(_) => {
            tracing::warn!(status = ?reply.status, "Handler set an invalid status code");
            return status_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let mut response = Response::new(Body::from(reply.body()));
    *response.status_mut() = status;
    for (name, value) in &reply.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().append(name, value);
            }
            _ => tracing::warn!(header = %name, "Handler set an invalid header"),
        }
    }
    response
}
