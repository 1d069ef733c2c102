//! In-process engine built on tokio.
//!
//! # Data Flow
//! ```text
//! LocalEngine::start()
//!     → daemonize (optional), runtime (multi-thread in process mode,
//!       current-thread in reactor mode)
//!     → open every bind point, one accept loop each
//!     → pid file, start / manager-start / worker-start × N
//!     → control loop: Reload (worker-stop/worker-start) until Shutdown
//!       (API calls and, when enabled, SIGTERM/SIGINT/SIGUSR1 feed the same
//!       channel)
//!     → shutdown fan-out, drain, worker-stop / manager-stop / shutdown
//! ```
//!
//! # Design Decisions
//! - Handlers run inline on the connection task; `task` runs on the
//!   blocking pool
//! - Handlers are handle-global; a bind point only decides which settings
//!   and protocol a connection gets
//! - Control commands and tasks issued before the loop is up are queued
//! - Signals are only forwarded when the factory asks for it, and only for
//!   the lifetime of the loop
//! - Sockets asking for port 0 are bound at declaration, the rest at start

mod bind;
mod datagram;
mod handlers;
mod http;
mod options;
mod static_files;
mod stats;
mod stream;
mod tasks;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use crate::config::SocketAddress;
use crate::engine::{
    Engine, EngineFactory, EnginePort, EngineSettings, EngineStats, RunningMode, TaskPayload,
};
use crate::error::EngineError;
use crate::events::{EventContext, EventKind, ServerTier, SharedHandler};
use crate::lifecycle::signals::{self, ControlCommand, SignalForwarding};
use crate::lifecycle::{PidFile, Shutdown};
use crate::net::connection::ConnectionGuard;
use crate::net::ConnectionTracker;

use self::bind::{BindPoint, Bound};
use self::handlers::HandlerTable;
use self::options::{EngineOptions, Protocol};
use self::static_files::StaticRoot;
use self::stats::EngineCounters;
use self::tasks::{QueuedTask, TaskQueue};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Creates [`LocalEngine`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalEngineFactory {
    forward_signals: bool,
}

impl LocalEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let SIGTERM/SIGINT stop and SIGUSR1 reload the engines this factory
    /// creates, while their loop runs. Meant for a process whose main job is
    /// the server.
    pub fn with_signal_forwarding(mut self) -> Self {
        self.forward_signals = true;
        self
    }
}

impl EngineFactory for LocalEngineFactory {
    type Engine = LocalEngine;

    fn create(
        &self,
        tier: ServerTier,
        socket: &SocketAddress,
        mode: RunningMode,
    ) -> Result<LocalEngine, EngineError> {
        let mut engine = LocalEngine::new(tier, socket, mode)?;
        engine.forward_signals = self.forward_signals;
        Ok(engine)
    }
}

/// Channels into the next (or current) run of the event loop.
struct Control {
    tx: mpsc::UnboundedSender<ControlCommand>,
    rx: Option<mpsc::UnboundedReceiver<ControlCommand>>,
    tasks: TaskQueue,
    task_rx: Option<mpsc::UnboundedReceiver<QueuedTask>>,
}

impl Control {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (tasks, task_rx) = TaskQueue::new();
        Self {
            tx,
            rx: Some(rx),
            tasks,
            task_rx: Some(task_rx),
        }
    }
}

pub(crate) struct Shared {
    tier: ServerTier,
    mode: RunningMode,
    settings: RwLock<EngineSettings>,
    points: Mutex<Vec<BindPoint>>,
    handlers: HandlerTable,
    stats: EngineCounters,
    connections: ConnectionTracker,
    running: AtomicBool,
    control: Mutex<Control>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("engine state poisoned")
}

impl Shared {
    fn settings(&self) -> EngineSettings {
        self.settings.read().expect("engine state poisoned").clone()
    }

    /// Queue a command for the loop; picked up as soon as it runs.
    fn send(&self, command: ControlCommand) -> Result<(), EngineError> {
        lock(&self.control)
            .tx
            .send(command)
            .map_err(|_| EngineError::NotStarted)
    }

    /// Task workers default to one; `task_worker_num = 0` disables tasks.
    fn task_worker_count(&self) -> usize {
        EngineOptions::from_settings(&self.settings()).map_or(1, |options| options.task_worker_num)
    }
}

/// What one bind point's tasks need.
#[derive(Clone)]
pub(crate) struct PointContext {
    shared: Arc<Shared>,
    port: u16,
    options: Arc<EngineOptions>,
    shutdown: Shutdown,
}

impl PointContext {
    fn context(&self, kind: EventKind) -> EventContext {
        EventContext::new(kind).with_port(self.port)
    }

    fn track_connection(&self) -> ConnectionGuard {
        let guard = self.shared.connections.track();
        self.shared.stats.record_accept(&self.shared.connections);
        guard
    }

    fn record_close(&self) {
        self.shared.stats.record_close(&self.shared.connections);
    }
}

/// Engine serving every bind point from one tokio runtime.
pub struct LocalEngine {
    shared: Arc<Shared>,
    main_port: u16,
    forward_signals: bool,
}

impl LocalEngine {
    pub fn new(
        tier: ServerTier,
        socket: &SocketAddress,
        mode: RunningMode,
    ) -> Result<Self, EngineError> {
        let main = BindPoint::new(socket)?;
        let main_port = main.port();
        tracing::debug!(socket = %main.socket(), %tier, %mode, "Local engine created");

        Ok(Self {
            shared: Arc::new(Shared {
                tier,
                mode,
                settings: RwLock::new(EngineSettings::new()),
                points: Mutex::new(vec![main]),
                handlers: HandlerTable::default(),
                stats: EngineCounters::default(),
                connections: ConnectionTracker::new(),
                running: AtomicBool::new(false),
                control: Mutex::new(Control::new()),
            }),
            main_port,
            forward_signals: false,
        })
    }

    pub fn running_mode(&self) -> RunningMode {
        self.shared.mode
    }

    /// True while the event loop runs.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn run(&self) -> Result<(), EngineError> {
        let settings = self.shared.settings();
        let options = EngineOptions::from_settings(&settings)?;
        let task_workers = options.task_worker_num;

        let (control_rx, task_rx) = {
            let mut control = lock(&self.shared.control);
            let (Some(rx), Some(task_rx)) = (control.rx.take(), control.task_rx.take()) else {
                return Err(EngineError::Unsupported(
                    "event loop is already running".to_string(),
                ));
            };
            self.shared.running.store(true, Ordering::SeqCst);
            (rx, (task_workers > 0).then_some(task_rx))
        };

        let result = self.run_runtime(settings, options, task_workers, control_rx, task_rx);

        // leftover commands and tasks go with the old channels
        *lock(&self.shared.control) = Control::new();
        self.shared.running.store(false, Ordering::SeqCst);
        result
    }

    fn run_runtime(
        &self,
        settings: EngineSettings,
        options: EngineOptions,
        task_workers: usize,
        control: mpsc::UnboundedReceiver<ControlCommand>,
        tasks: Option<mpsc::UnboundedReceiver<QueuedTask>>,
    ) -> Result<(), EngineError> {
        if options.daemonize {
            daemonize()?;
        }

        let runtime = build_runtime(self.shared.mode, &options)?;
        let result = runtime.block_on(self.serve(settings, options, task_workers, control, tasks));
        runtime.shutdown_timeout(DRAIN_TIMEOUT);
        result
    }

    async fn serve(
        &self,
        settings: EngineSettings,
        options: EngineOptions,
        task_workers: usize,
        control: mpsc::UnboundedReceiver<ControlCommand>,
        tasks: Option<mpsc::UnboundedReceiver<QueuedTask>>,
    ) -> Result<(), EngineError> {
        let mut points = std::mem::take(&mut *lock(&self.shared.points));
        let result = self
            .serve_points(&mut points, settings, options, task_workers, control, tasks)
            .await;
        for point in &points {
            point.cleanup();
        }
        *lock(&self.shared.points) = points;
        result
    }

    async fn serve_points(
        &self,
        points: &mut [BindPoint],
        settings: EngineSettings,
        options: EngineOptions,
        task_workers: usize,
        mut control: mpsc::UnboundedReceiver<ControlCommand>,
        tasks: Option<mpsc::UnboundedReceiver<QueuedTask>>,
    ) -> Result<(), EngineError> {
        let options = Arc::new(options);
        let shutdown = Shutdown::new();
        let static_root = match options.static_root() {
            Some(root) => Some(Arc::new(StaticRoot::new(root).map_err(|err| {
                EngineError::InvalidSetting {
                    key: "document_root".to_string(),
                    reason: err.to_string(),
                }
            })?)),
            None => None,
        };

        let mut loops = JoinSet::new();
        for point in points.iter_mut() {
            let mut effective = settings.clone();
            effective.extend(point.settings().iter().map(|(k, v)| (k.clone(), v.clone())));
            let protocol = Protocol::select(self.shared.tier, point.socket().transport(), &effective)?;
            let bound = point.open().await?;
            tracing::info!(socket = %point.socket(), ?protocol, "Listening");

            let context = PointContext {
                shared: Arc::clone(&self.shared),
                port: point.port(),
                options: Arc::clone(&options),
                shutdown: shutdown.clone(),
            };
            loops.spawn(accept_loop(context, bound, protocol, static_root.clone()));
        }

        let pid_file = PidFile::from_option(options.pid_file.clone());
        pid_file.write(std::process::id())?;

        let _signals = self.forward_signals();

        let workers = options.worker_num + task_workers;
        self.shared.stats.mark_started(options.worker_num);
        if let Some(rx) = tasks {
            loops.spawn(tasks::run_task_workers(
                Arc::clone(&self.shared),
                rx,
                task_workers,
                options.worker_num,
                shutdown.clone(),
            ));
        }

        self.fire(EventKind::Start, None);
        self.fire(EventKind::ManagerStart, None);
        self.fire_workers(EventKind::WorkerStart, workers);
        tracing::info!(
            port = self.main_port,
            workers = options.worker_num,
            task_workers,
            "Event loop running"
        );

        while let Some(command) = control.recv().await {
            match command {
                ControlCommand::Shutdown => break,
                ControlCommand::Reload => {
                    tracing::info!(workers, "Reloading workers");
                    self.fire_workers(EventKind::WorkerStop, workers);
                    self.shared.stats.record_reload();
                    self.fire_workers(EventKind::WorkerStart, workers);
                }
            }
        }

        tracing::info!("Event loop stopping");
        shutdown.trigger();
        while loops.join_next().await.is_some() {}
        self.drain().await;

        self.fire_workers(EventKind::WorkerStop, workers);
        self.fire(EventKind::ManagerStop, None);
        self.fire(EventKind::Shutdown, None);

        pid_file.remove()?;
        Ok(())
    }

    fn forward_signals(&self) -> Option<SignalForwarding> {
        if !self.forward_signals {
            return None;
        }
        let tx = lock(&self.shared.control).tx.clone();
        match signals::forward_signals(tx) {
            Ok(forwarding) => Some(forwarding),
            Err(err) => {
                tracing::warn!(error = %err, "Signal forwarding unavailable");
                None
            }
        }
    }

    /// Wait for open connections to finish their close events.
    async fn drain(&self) {
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while self.shared.connections.active_count() > 0 {
            if Instant::now() >= deadline {
                tracing::warn!(
                    open = self.shared.connections.active_count(),
                    "Connections still open after drain timeout"
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn fire(&self, kind: EventKind, worker: Option<usize>) {
        let ctx = EventContext::new(kind).with_port(self.main_port);
        let ctx = match worker {
            Some(worker) => ctx.with_worker(worker),
            None => ctx,
        };
        self.shared.handlers.notify(&ctx);
    }

    fn fire_workers(&self, kind: EventKind, workers: usize) {
        for worker in 0..workers {
            self.fire(kind, Some(worker));
        }
    }
}

impl Engine for LocalEngine {
    type Port = LocalPort;

    fn tier(&self) -> ServerTier {
        self.shared.tier
    }

    fn apply_settings(&self, settings: &EngineSettings) -> Result<(), EngineError> {
        let mut current = self.shared.settings.write().expect("engine state poisoned");
        let mut merged = current.clone();
        merged.extend(settings.iter().map(|(k, v)| (k.clone(), v.clone())));

        EngineOptions::from_settings(&merged)?;
        options::check_port_settings(&merged)?;
        *current = merged;
        Ok(())
    }

    fn on(&self, event: EventKind, handler: SharedHandler) -> Result<(), EngineError> {
        if event.min_tier() > self.shared.tier {
            tracing::debug!(%event, tier = %self.shared.tier, "Event will not fire on this tier");
        }
        if self.shared.handlers.set(event, handler) {
            tracing::debug!(%event, "Handler replaced");
        }
        Ok(())
    }

    fn listen(&self, socket: &SocketAddress) -> Result<LocalPort, EngineError> {
        if self.is_running() {
            return Err(EngineError::Unsupported(
                "bind points cannot be added while running".to_string(),
            ));
        }
        let point = BindPoint::new(socket)?;
        let port = point.port();

        let mut points = lock(&self.shared.points);
        points.push(point);
        tracing::debug!(socket = %socket, port, "Bind point added");
        Ok(LocalPort {
            shared: Arc::clone(&self.shared),
            index: points.len() - 1,
            port,
        })
    }

    fn bound_port(&self) -> u16 {
        self.main_port
    }

    fn start(&self) -> bool {
        match self.run() {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(error = %err, "Event loop failed");
                false
            }
        }
    }

    fn shutdown(&self) -> Result<(), EngineError> {
        self.shared.send(ControlCommand::Shutdown)
    }

    fn reload(&self) -> Result<(), EngineError> {
        self.shared.send(ControlCommand::Reload)
    }

    fn stats(&self) -> EngineStats {
        self.shared.stats.snapshot(&self.shared.connections)
    }

    fn dispatch_task(&self, payload: TaskPayload) -> Result<(), EngineError> {
        if self.shared.task_worker_count() == 0 {
            return Err(EngineError::Unsupported(
                "task workers are disabled (task_worker_num = 0)".to_string(),
            ));
        }
        let pending = self.shared.stats.task_queued();
        let id = lock(&self.shared.control).tasks.push(payload, pending)?;
        tracing::debug!(task = id, "Task queued");
        Ok(())
    }
}

impl std::fmt::Debug for LocalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEngine")
            .field("tier", &self.shared.tier)
            .field("mode", &self.shared.mode)
            .field("main_port", &self.main_port)
            .field("forward_signals", &self.forward_signals)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Secondary bind point of a [`LocalEngine`].
pub struct LocalPort {
    shared: Arc<Shared>,
    index: usize,
    port: u16,
}

impl EnginePort for LocalPort {
    fn apply_settings(&mut self, settings: &EngineSettings) -> Result<(), EngineError> {
        options::check_port_settings(settings)?;
        let mut points = lock(&self.shared.points);
        let point = points.get_mut(self.index).ok_or_else(|| {
            EngineError::Unsupported("bind point settings cannot change while running".to_string())
        })?;
        point.merge_settings(settings);
        Ok(())
    }

    fn port(&self) -> u16 {
        self.port
    }
}

impl std::fmt::Debug for LocalPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPort")
            .field("index", &self.index)
            .field("port", &self.port)
            .finish()
    }
}

fn build_runtime(mode: RunningMode, options: &EngineOptions) -> std::io::Result<tokio::runtime::Runtime> {
    match mode {
        RunningMode::Reactor => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build(),
        RunningMode::Process => tokio::runtime::Builder::new_multi_thread()
            .worker_threads(options.reactor_num.unwrap_or_else(num_cpus::get))
            .thread_name("server-reactor")
            .enable_all()
            .build(),
    }
}

#[cfg(unix)]
fn daemonize() -> Result<(), EngineError> {
    tracing::info!("Detaching from terminal");
    nix::unistd::daemon(true, false).map_err(|errno| EngineError::Io(errno.into()))
}

#[cfg(not(unix))]
fn daemonize() -> Result<(), EngineError> {
    Err(EngineError::Unsupported("daemon mode".to_string()))
}

async fn accept_loop(
    point: PointContext,
    bound: Bound,
    protocol: Protocol,
    static_root: Option<Arc<StaticRoot>>,
) {
    let port = point.port;
    let limit = Arc::new(Semaphore::new(point.options.max_conn));
    let mut stop = point.shutdown.subscribe();

    match bound {
        Bound::Udp(socket) => datagram::serve_datagram(point, socket).await,
        Bound::Tcp(listener) => loop {
            let permit = tokio::select! {
                permit = Arc::clone(&limit).acquire_owned() => permit,
                _ = stop.recv() => break,
            };
            let Ok(permit) = permit else { break };
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = stop.recv() => break,
            };
            match accepted {
                Ok((stream, peer)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        tracing::debug!(port, %peer, error = %err, "Could not disable Nagle");
                    }
                    spawn_connection(&point, protocol, &static_root, stream, Some(peer), permit);
                }
                Err(err) => {
                    tracing::warn!(port, error = %err, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        },
        #[cfg(unix)]
        Bound::Unix(listener) => loop {
            let permit = tokio::select! {
                permit = Arc::clone(&limit).acquire_owned() => permit,
                _ = stop.recv() => break,
            };
            let Ok(permit) = permit else { break };
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = stop.recv() => break,
            };
            match accepted {
                Ok((stream, _)) => {
                    spawn_connection(&point, protocol, &static_root, stream, None, permit);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        },
    }
    tracing::debug!(port, "Accept loop stopped");
}

fn spawn_connection<S>(
    point: &PointContext,
    protocol: Protocol,
    static_root: &Option<Arc<StaticRoot>>,
    stream: S,
    peer: Option<SocketAddr>,
    permit: OwnedSemaphorePermit,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let point = point.clone();
    let static_root = static_root.clone();
    tokio::spawn(async move {
        let _permit = permit;
        match protocol {
            Protocol::Http(http) => http::serve_http(point, http, static_root, stream, peer).await,
            Protocol::Stream | Protocol::Datagram => stream::serve_stream(point, stream, peer).await,
        }
    });
}
