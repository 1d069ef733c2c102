//! Datagram bind points: one `packet` event per datagram, replies go back
//! to the sender.

use bytes::Bytes;
use tokio::net::UdpSocket;

use crate::events::{EventKind, EventPayload};

use super::PointContext;

const MAX_DATAGRAM: usize = 64 * 1024;

pub(crate) async fn serve_datagram(point: PointContext, socket: UdpSocket) {
    let mut shutdown = point.shutdown.subscribe();
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let received = tokio::select! {
            received = socket.recv_from(&mut buf) => received,
            _ = shutdown.recv() => break,
        };
        let (n, peer) = match received {
            Ok(received) => received,
            Err(err) => {
                tracing::debug!(port = point.port, error = %err, "Datagram receive failed");
                continue;
            }
        };

        let ctx = point
            .context(EventKind::Packet)
            .with_peer(peer)
            .with_payload(EventPayload::Data(Bytes::copy_from_slice(&buf[..n])));
        point.shared.handlers.notify(&ctx);

        for chunk in ctx.take_reply().chunks {
            if let Err(err) = socket.send_to(&chunk, peer).await {
                tracing::debug!(%peer, error = %err, "Datagram send failed");
                break;
            }
        }
    }
    tracing::debug!(port = point.port, "Datagram loop stopped");
}
