//! Main socket plus additional listeners, unique by port.

use crate::config::SocketAddress;
use crate::error::ConfigurationError;
use crate::events::ServerTier;
use crate::net::listener::Listener;
use crate::server::capability;

/// The main bind point and every additional listener.
///
/// No two entries, the main socket included, share a port. Additional
/// listeners iterate in insertion order.
#[derive(Debug, Clone)]
pub struct ListenerSet {
    main_socket: SocketAddress,
    listeners: Vec<Listener>,
}

impl ListenerSet {
    pub fn new<I>(main_socket: SocketAddress, listeners: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = Listener>,
    {
        let mut set = Self::with_main_socket(main_socket);
        set.add_listeners(listeners)?;
        Ok(set)
    }

    /// A set with no additional listeners.
    pub fn with_main_socket(main_socket: SocketAddress) -> Self {
        Self {
            main_socket,
            listeners: Vec::new(),
        }
    }

    /// Add listeners in order, stopping at the first port clash.
    ///
    /// Listeners accepted before the clash stay registered.
    pub fn add_listeners<I>(&mut self, listeners: I) -> Result<(), ConfigurationError>
    where
        I: IntoIterator<Item = Listener>,
    {
        for listener in listeners {
            self.add_listener(listener)?;
        }
        Ok(())
    }

    pub fn add_listener(&mut self, listener: Listener) -> Result<(), ConfigurationError> {
        let port = listener.port();
        if port == self.main_socket.port() {
            return Err(ConfigurationError::PortTakenByMain(port));
        }
        if self.get(port).is_some() {
            return Err(ConfigurationError::DuplicatePort(port));
        }

        tracing::debug!(socket = %listener.socket(), "Listener added");
        self.listeners.push(listener);
        Ok(())
    }

    /// Replace the main socket, e.g. once an ephemeral port has been bound.
    pub fn change_main_socket(&mut self, socket: SocketAddress) -> Result<(), ConfigurationError> {
        if self.get(socket.port()).is_some() {
            return Err(ConfigurationError::MainSocketPortTaken(socket.port()));
        }

        tracing::debug!(from = %self.main_socket, to = %socket, "Main socket changed");
        self.main_socket = socket;
        Ok(())
    }

    pub fn main_socket(&self) -> &SocketAddress {
        &self.main_socket
    }

    pub fn get(&self, port: u16) -> Option<&Listener> {
        self.listeners.iter().find(|l| l.port() == port)
    }

    pub fn get_mut(&mut self, port: u16) -> Option<&mut Listener> {
        self.listeners.iter_mut().find(|l| l.port() == port)
    }

    /// Additional listeners in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Listener> {
        self.listeners.iter()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Every port in use, main first.
    pub fn ports(&self) -> Vec<u16> {
        std::iter::once(self.main_socket.port())
            .chain(self.listeners.iter().map(Listener::port))
            .collect()
    }

    /// Tier needed by the additional listeners' registrations.
    pub fn infer_tier(&self) -> ServerTier {
        capability::combine(self.listeners.iter().map(|l| l.callbacks().infer_tier()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListenerSettings;
    use crate::events::{handler_fn, EventCallbackRegistry};

    fn listener(port: u16) -> Listener {
        Listener::new(
            SocketAddress::tcp("0.0.0.0", port),
            ListenerSettings::new(),
            EventCallbackRegistry::new(),
        )
    }

    fn listener_with(port: u16, event: &str) -> Listener {
        let mut callbacks = EventCallbackRegistry::new();
        callbacks.register(event, handler_fn(|_ctx| Ok(()))).unwrap();
        Listener::new(SocketAddress::tcp("0.0.0.0", port), ListenerSettings::new(), callbacks)
    }

    #[test]
    fn rejects_listener_on_main_port() {
        let err = ListenerSet::new(SocketAddress::tcp("0.0.0.0", 9501), [listener(9501)]).unwrap_err();
        assert!(matches!(err, ConfigurationError::PortTakenByMain(9501)));
    }

    #[test]
    fn rejects_duplicate_additional_port() {
        let mut set = ListenerSet::new(SocketAddress::tcp("0.0.0.0", 9501), [listener(9200)]).unwrap();
        let err = set.add_listener(listener(9200)).unwrap_err();

        assert!(matches!(err, ConfigurationError::DuplicatePort(9200)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn keeps_listeners_added_before_a_clash() {
        let mut set = ListenerSet::with_main_socket(SocketAddress::tcp("0.0.0.0", 9501));
        let result = set.add_listeners([listener(9300), listener(9301), listener(9300)]);

        assert!(result.is_err());
        assert_eq!(set.ports(), vec![9501, 9300, 9301]);
    }

    #[test]
    fn iterates_in_insertion_order() {
        let set = ListenerSet::new(
            SocketAddress::tcp("0.0.0.0", 9501),
            [listener(9400), listener(9100), listener(9300)],
        )
        .unwrap();

        let ports: Vec<u16> = set.iter().map(Listener::port).collect();
        assert_eq!(ports, vec![9400, 9100, 9300]);
    }

    #[test]
    fn main_socket_cannot_move_onto_listener_port() {
        let mut set = ListenerSet::new(SocketAddress::tcp("0.0.0.0", 0), [listener(9200)]).unwrap();

        let err = set
            .change_main_socket(set.main_socket().with_port(9200))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::MainSocketPortTaken(9200)));

        set.change_main_socket(set.main_socket().with_port(41000)).unwrap();
        assert_eq!(set.main_socket().port(), 41000);
        assert!(set.add_listener(listener(41000)).is_err());
    }

    #[test]
    fn tier_combines_listener_registries() {
        let set = ListenerSet::new(
            SocketAddress::tcp("0.0.0.0", 9501),
            [listener_with(9200, "close"), listener_with(9201, "request")],
        )
        .unwrap();
        assert_eq!(set.infer_tier(), ServerTier::Http);

        let empty = ListenerSet::with_main_socket(SocketAddress::tcp("0.0.0.0", 9501));
        assert_eq!(empty.infer_tier(), ServerTier::Transport);
    }
}
