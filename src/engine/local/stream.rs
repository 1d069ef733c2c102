//! Raw byte-stream connections: `connect`, `receive`, `close`.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::OrNone;
use crate::events::{EventKind, EventPayload, Reply};

use super::PointContext;

const READ_BUFFER: usize = 64 * 1024;

pub(crate) async fn serve_stream<S>(point: PointContext, mut stream: S, peer: Option<SocketAddr>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let guard = point.track_connection();
    let id = guard.id();
    let mut shutdown = point.shutdown.subscribe();
    tracing::debug!(connection = %id, peer = %OrNone(&peer), port = point.port, "Stream connected");

    let event = |kind| {
        let ctx = point.context(kind).with_connection(id);
        match peer {
            Some(peer) => ctx.with_peer(peer),
            None => ctx,
        }
    };

    let ctx = event(EventKind::Connect);
    point.shared.handlers.notify(&ctx);
    let mut open = write_reply(&mut stream, ctx.take_reply()).await;

    let mut buf = vec![0u8; READ_BUFFER.min(point.options.package_max_length)];
    while open {
        let read = tokio::select! {
            read = stream.read(&mut buf) => read,
            _ = shutdown.recv() => break,
        };
        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                tracing::debug!(connection = %id, error = %err, "Stream read failed");
                break;
            }
        };

        let ctx = event(EventKind::Receive)
            .with_payload(EventPayload::Data(Bytes::copy_from_slice(&buf[..n])));
        point.shared.handlers.notify(&ctx);
        open = write_reply(&mut stream, ctx.take_reply()).await;
    }

    let _ = stream.shutdown().await;
    point.shared.handlers.notify(&event(EventKind::Close));
    drop(guard);
    point.record_close();
    tracing::debug!(connection = %id, "Stream closed");
}

/// Write queued chunks; false when the connection should close.
async fn write_reply<S>(stream: &mut S, reply: Reply) -> bool
where
    S: AsyncWrite + Unpin,
{
    for chunk in &reply.chunks {
        if let Err(err) = stream.write_all(chunk).await {
            tracing::debug!(error = %err, "Stream write failed");
            return false;
        }
    }
    if !reply.chunks.is_empty() {
        if let Err(err) = stream.flush().await {
            tracing::debug!(error = %err, "Stream flush failed");
            return false;
        }
    }
    !reply.close
}
