//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

use server_composer::engine::{EngineSettings, EngineStats, TaskPayload};
use server_composer::error::EngineError;
use server_composer::events::SharedHandler;
use server_composer::lifecycle::ProcessControl;
use server_composer::{
    Engine, EngineFactory, EnginePort, EventKind, RunningMode, ServerTier, SocketAddress,
};

/// Secondary bind point as the engine saw it.
pub struct RecordedPort {
    pub socket: SocketAddress,
    pub settings: Vec<EngineSettings>,
}

/// Every call a [`RecordingEngine`] received.
#[derive(Default)]
pub struct Recorded {
    pub created: Option<(ServerTier, SocketAddress, RunningMode)>,
    pub settings: Vec<EngineSettings>,
    pub handlers: Vec<(EventKind, SharedHandler)>,
    pub ports: Vec<RecordedPort>,
    pub tasks: Vec<TaskPayload>,
    pub shutdowns: usize,
    pub reloads: usize,
}

impl Recorded {
    /// Last handler attached for `kind`; later attachments replace earlier ones.
    pub fn handler(&self, kind: EventKind) -> Option<&SharedHandler> {
        self.handlers
            .iter()
            .rev()
            .find(|(k, _)| *k == kind)
            .map(|(_, h)| h)
    }

    /// Events attached to the engine handle, in attachment order.
    pub fn events(&self) -> Vec<EventKind> {
        self.handlers.iter().map(|(k, _)| *k).collect()
    }

    pub fn port(&self, port: u16) -> Option<&RecordedPort> {
        self.ports.iter().find(|p| p.socket.port() == port)
    }
}

pub type Log = Arc<Mutex<Recorded>>;

/// Factory producing engines that record instead of serving.
#[derive(Clone)]
pub struct RecordingFactory {
    pub log: Log,
    /// Port reported for an ephemeral main socket.
    pub ephemeral_port: u16,
    /// Port reported whatever the main socket asks for.
    pub forced_port: Option<u16>,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self {
            log: Log::default(),
            ephemeral_port: 43117,
            forced_port: None,
        }
    }
}

impl EngineFactory for RecordingFactory {
    type Engine = RecordingEngine;

    fn create(
        &self,
        tier: ServerTier,
        socket: &SocketAddress,
        mode: RunningMode,
    ) -> Result<RecordingEngine, EngineError> {
        self.log.lock().unwrap().created = Some((tier, socket.clone(), mode));
        let port = match (self.forced_port, socket.is_ephemeral()) {
            (Some(port), _) => port,
            (None, true) => self.ephemeral_port,
            (None, false) => socket.port(),
        };
        Ok(RecordingEngine {
            tier,
            port,
            log: Arc::clone(&self.log),
            stop: Arc::new((Mutex::new(false), Condvar::new())),
        })
    }
}

/// Engine whose `start` blocks until `shutdown` is called.
pub struct RecordingEngine {
    tier: ServerTier,
    port: u16,
    log: Log,
    stop: Arc<(Mutex<bool>, Condvar)>,
}

impl Engine for RecordingEngine {
    type Port = RecordingPort;

    fn tier(&self) -> ServerTier {
        self.tier
    }

    fn apply_settings(&self, settings: &EngineSettings) -> Result<(), EngineError> {
        self.log.lock().unwrap().settings.push(settings.clone());
        Ok(())
    }

    fn on(&self, event: EventKind, handler: SharedHandler) -> Result<(), EngineError> {
        self.log.lock().unwrap().handlers.push((event, handler));
        Ok(())
    }

    fn listen(&self, socket: &SocketAddress) -> Result<RecordingPort, EngineError> {
        let mut log = self.log.lock().unwrap();
        log.ports.push(RecordedPort {
            socket: socket.clone(),
            settings: Vec::new(),
        });
        Ok(RecordingPort {
            log: Arc::clone(&self.log),
            index: log.ports.len() - 1,
            port: socket.port(),
        })
    }

    fn bound_port(&self) -> u16 {
        self.port
    }

    fn start(&self) -> bool {
        let (lock, cvar) = &*self.stop;
        let mut stopped = lock.lock().unwrap();
        while !*stopped {
            stopped = cvar.wait(stopped).unwrap();
        }
        true
    }

    fn shutdown(&self) -> Result<(), EngineError> {
        self.log.lock().unwrap().shutdowns += 1;
        let (lock, cvar) = &*self.stop;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
        Ok(())
    }

    fn reload(&self) -> Result<(), EngineError> {
        self.log.lock().unwrap().reloads += 1;
        Ok(())
    }

    fn stats(&self) -> EngineStats {
        let log = self.log.lock().unwrap();
        EngineStats::from([
            ("connection_num".to_string(), Value::from(0)),
            ("task_count".to_string(), Value::from(log.tasks.len())),
        ])
    }

    fn dispatch_task(&self, payload: TaskPayload) -> Result<(), EngineError> {
        self.log.lock().unwrap().tasks.push(payload);
        Ok(())
    }
}

pub struct RecordingPort {
    log: Log,
    index: usize,
    port: u16,
}

impl EnginePort for RecordingPort {
    fn apply_settings(&mut self, settings: &EngineSettings) -> Result<(), EngineError> {
        self.log.lock().unwrap().ports[self.index]
            .settings
            .push(settings.clone());
        Ok(())
    }

    fn port(&self) -> u16 {
        self.port
    }
}

/// Process control over a fixed set of pretend pids.
#[derive(Default)]
pub struct FakeProcessControl {
    pub alive: Mutex<HashSet<i32>>,
    pub signals: Mutex<Vec<(&'static str, i32)>>,
    pub refuse_signals: bool,
}

impl FakeProcessControl {
    pub fn with_alive(pids: &[i32]) -> Self {
        Self {
            alive: Mutex::new(pids.iter().copied().collect()),
            ..Self::default()
        }
    }

    fn signal(&self, name: &'static str, pid: i32) -> io::Result<()> {
        if self.refuse_signals {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        self.signals.lock().unwrap().push((name, pid));
        Ok(())
    }
}

impl ProcessControl for FakeProcessControl {
    fn is_alive(&self, pid: i32) -> bool {
        self.alive.lock().unwrap().contains(&pid)
    }

    fn terminate(&self, pid: i32) -> io::Result<()> {
        self.signal("terminate", pid)
    }

    fn reload(&self, pid: i32) -> io::Result<()> {
        self.signal("reload", pid)
    }
}

/// Same Arc, regardless of vtable identity.
pub fn same_handler(a: &SharedHandler, b: &SharedHandler) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// A loopback port nobody is listening on right now.
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Poll until `addr` accepts TCP connections.
pub fn wait_for_listener(addr: SocketAddr) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if TcpStream::connect_timeout(&addr, Duration::from_millis(100)).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("{} never started accepting", addr);
}

/// Poll until `check` holds.
pub fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(10));
    }
}
