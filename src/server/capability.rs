//! Folding tier signals into one server capability.
//!
//! A higher tier's engine also services every lower-tier event, so the
//! highest observed signal satisfies all registrations.

use crate::events::ServerTier;

/// Combine tier signals: any WebSocket wins immediately, any Http raises the
/// result to Http, otherwise Transport.
pub fn combine<I>(tiers: I) -> ServerTier
where
    I: IntoIterator<Item = ServerTier>,
{
    let mut inferred = ServerTier::Transport;
    for tier in tiers {
        match tier {
            ServerTier::WebSocket => return ServerTier::WebSocket,
            ServerTier::Http => inferred = ServerTier::Http,
            ServerTier::Transport => {}
        }
    }
    inferred
}
