//! The local engine serving real sockets on loopback.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::tungstenite::Message;

#[cfg(unix)]
use nix::sys::signal::{SigHandler, Signal};

use server_composer::engine::LocalEngine;
use server_composer::error::{EngineError, HandlerError};
use server_composer::events::DEFAULT_PRIORITY;
use server_composer::lifecycle::PidFile;
use server_composer::{
    handler_fn, EventCallbackRegistry, EventContext, EventKind, Listener, ListenerSet,
    ListenerSettings, LocalEngineFactory, RunningMode, RunningServerHandle, ServerBuilder,
    ServerError, ServerSettings, SocketAddress,
};

mod common;
use common::{free_port, wait_until};

/// A handle running its event loop on a background thread.
struct Server {
    handle: Arc<RunningServerHandle<LocalEngine>>,
    runner: thread::JoinHandle<bool>,
}

impl Server {
    fn start(listeners: ListenerSet, callbacks: EventCallbackRegistry, settings: ServerSettings) -> Self {
        Self::start_with(LocalEngineFactory::new(), listeners, callbacks, settings)
    }

    fn start_with(
        factory: LocalEngineFactory,
        listeners: ListenerSet,
        callbacks: EventCallbackRegistry,
        settings: ServerSettings,
    ) -> Self {
        let handle = ServerBuilder::new(factory, listeners, callbacks)
            .with_settings(settings)
            .with_running_mode(RunningMode::Reactor)
            .make()
            .unwrap();
        let handle = Arc::new(handle);
        let runner = {
            let handle = Arc::clone(&handle);
            thread::spawn(move || handle.start())
        };
        wait_until(|| {
            handle
                .metrics()
                .map(|stats| stats["start_time"] != json!(0))
                .unwrap_or(false)
        });
        Self { handle, runner }
    }

    fn main_only(callbacks: EventCallbackRegistry, settings: ServerSettings) -> Self {
        Self::start(
            ListenerSet::with_main_socket(SocketAddress::tcp("127.0.0.1", 0)),
            callbacks,
            settings,
        )
    }

    fn port(&self) -> u16 {
        self.handle.listeners().main_socket().port()
    }

    fn stop(self) -> bool {
        self.handle.shutdown().unwrap();
        self.runner.join().unwrap()
    }
}

fn settings(entries: Value) -> ServerSettings {
    let mut settings = ServerSettings::new();
    let Value::Object(entries) = entries else {
        panic!("settings must be an object");
    };
    settings.add(entries).unwrap();
    settings
}

fn echo(ctx: &EventContext) -> Result<(), HandlerError> {
    if let Some(data) = ctx.data() {
        ctx.reply(data.clone());
    }
    Ok(())
}

fn recorder(
    events: &Arc<Mutex<Vec<EventKind>>>,
) -> impl Fn(&EventContext) -> Result<(), HandlerError> + Send + Sync + 'static {
    let events = Arc::clone(events);
    move |ctx: &EventContext| {
        events.lock().unwrap().push(ctx.event());
        Ok(())
    }
}

#[tokio::test]
async fn test_listener_handlers_serve_every_bind_point() {
    let listener_port = free_port();
    let started = Arc::new(Mutex::new(Vec::new()));

    let mut callbacks = EventCallbackRegistry::new();
    callbacks.register("start", handler_fn(recorder(&started))).unwrap();

    // declared on the listener, attached to the whole server
    let mut listener_callbacks = EventCallbackRegistry::new();
    listener_callbacks.register_request_handler(
        handler_fn(|ctx: &EventContext| {
            let request = ctx.request().ok_or("not an HTTP request")?;
            ctx.set_status(201);
            ctx.set_header("x-served-by", ctx.port().unwrap_or_default().to_string());
            ctx.reply(format!("{} {}", request.method, request.uri));
            Ok(())
        }),
        DEFAULT_PRIORITY,
    );

    let listeners = ListenerSet::new(
        SocketAddress::tcp("127.0.0.1", 0),
        [Listener::new(
            SocketAddress::tcp("127.0.0.1", listener_port),
            ListenerSettings::new(),
            listener_callbacks,
        )],
    )
    .unwrap();
    let server = Server::start(listeners, callbacks, settings(json!({"worker_count": 1})));
    let main_port = server.port();
    assert_eq!(*started.lock().unwrap(), vec![EventKind::Start]);

    let client = reqwest::Client::new();
    for port in [main_port, listener_port] {
        let response = client
            .post(format!("http://127.0.0.1:{}/echo", port))
            .body("payload")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        assert_eq!(response.headers()["x-served-by"], port.to_string().as_str());
        assert_eq!(response.text().await.unwrap(), "POST /echo");
    }

    let stats = server.handle.metrics().unwrap();
    assert_eq!(stats["request_count"], json!(2));
    assert_eq!(stats["worker_num"], json!(1));

    drop(client);
    assert!(server.stop());
}

#[tokio::test]
async fn test_failing_request_handler_is_a_server_error() {
    let mut callbacks = EventCallbackRegistry::new();
    callbacks.register_request_handler(
        handler_fn(|_: &EventContext| Err("database unavailable".into())),
        DEFAULT_PRIORITY,
    );
    let server = Server::main_only(callbacks, settings(json!({"worker_count": 1})));

    let response = reqwest::get(format!("http://127.0.0.1:{}/", server.port()))
        .await
        .unwrap();
    assert_eq!(response.status(), 500);

    assert!(server.stop());
}

#[tokio::test]
async fn test_tcp_echo_with_connection_events() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut callbacks = EventCallbackRegistry::new();
    callbacks.register("connect", handler_fn(recorder(&events))).unwrap();
    callbacks.register("close", handler_fn(recorder(&events))).unwrap();
    callbacks.register("receive", handler_fn(echo)).unwrap();

    let server = Server::main_only(callbacks, settings(json!({"worker_count": 1})));
    assert_eq!(server.handle.tier(), server_composer::ServerTier::Transport);

    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", server.port()))
        .await
        .unwrap();
    stream.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");
    drop(stream);

    wait_until(|| events.lock().unwrap().len() == 2);
    assert_eq!(
        *events.lock().unwrap(),
        vec![EventKind::Connect, EventKind::Close]
    );
    assert_eq!(server.handle.metrics().unwrap()["accept_count"], json!(1));

    assert!(server.stop());
}

#[tokio::test]
async fn test_websocket_session_echoes_messages() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut callbacks = EventCallbackRegistry::new();
    callbacks
        .register(
            "open",
            handler_fn(|ctx: &EventContext| {
                ctx.reply("welcome");
                Ok(())
            }),
        )
        .unwrap();
    callbacks
        .register(
            "handshake",
            handler_fn(|ctx: &EventContext| {
                match ctx.request() {
                    Some(request) if request.uri.contains("deny") => Err("forbidden room".into()),
                    _ => Ok(()),
                }
            }),
        )
        .unwrap();
    callbacks.register("message", handler_fn(echo)).unwrap();
    callbacks.register("close", handler_fn(recorder(&events))).unwrap();

    let server = Server::main_only(callbacks, settings(json!({"worker_count": 1})));
    let port = server.port();

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{}/chat", port))
        .await
        .unwrap();
    let greeting = ws.next().await.unwrap().unwrap();
    assert_eq!(greeting.to_text().unwrap(), "welcome");

    ws.send(Message::Text("hello".into())).await.unwrap();
    let echoed = ws.next().await.unwrap().unwrap();
    assert_eq!(echoed.to_text().unwrap(), "hello");

    ws.send(Message::Binary(vec![0xff, 0x00].into())).await.unwrap();
    let echoed = ws.next().await.unwrap().unwrap();
    assert!(echoed.is_binary());
    assert_eq!(&echoed.into_data()[..], b"\xff\x00");

    ws.close(None).await.unwrap();
    wait_until(|| events.lock().unwrap().contains(&EventKind::Close));

    // refused handshakes never open a session
    assert!(
        tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{}/deny", port))
            .await
            .is_err()
    );

    // plain HTTP on a websocket bind point without a request handler
    let response = reqwest::get(format!("http://127.0.0.1:{}/", port))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    assert!(server.stop());
}

#[test]
fn test_dispatched_task_runs_and_finishes() {
    let results = Arc::new(Mutex::new(Vec::new()));
    let mut callbacks = EventCallbackRegistry::new();
    callbacks
        .register(
            "task",
            handler_fn(|ctx: &EventContext| {
                if let Some((_, data)) = ctx.task() {
                    let n = data["n"].as_u64().unwrap_or_default();
                    ctx.reply(json!({ "square": n * n }).to_string());
                }
                Ok(())
            }),
        )
        .unwrap();
    {
        let results = Arc::clone(&results);
        callbacks
            .register(
                "finish",
                handler_fn(move |ctx: &EventContext| {
                    if let Some((id, data)) = ctx.task() {
                        results.lock().unwrap().push((id, data.clone()));
                    }
                    Ok(())
                }),
            )
            .unwrap();
    }

    let server = Server::main_only(
        callbacks,
        settings(json!({"worker_count": 1, "task_worker_count": 1})),
    );

    server.handle.dispatch_task(json!({ "n": 12 })).unwrap();
    wait_until(|| !results.lock().unwrap().is_empty());
    assert_eq!(
        *results.lock().unwrap(),
        vec![(0, json!({ "square": 144 }))]
    );
    wait_until(|| server.handle.metrics().unwrap()["tasking_num"] == json!(0));
    assert_eq!(server.handle.metrics().unwrap()["task_count"], json!(1));

    assert!(server.stop());
}

#[test]
fn test_tasks_refused_without_task_workers() {
    let server = Server::main_only(
        EventCallbackRegistry::new(),
        settings(json!({"worker_count": 1, "task_worker_count": 0})),
    );

    assert!(matches!(
        server.handle.dispatch_task(json!("ignored")),
        Err(ServerError::Engine(EngineError::Unsupported(_)))
    ));

    assert!(server.stop());
}

#[test]
fn test_reload_restarts_workers() {
    let started = Arc::new(AtomicUsize::new(0));
    let mut callbacks = EventCallbackRegistry::new();
    {
        let started = Arc::clone(&started);
        callbacks
            .register(
                "worker-start",
                handler_fn(move |_: &EventContext| {
                    started.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();
    }

    let server = Server::main_only(
        callbacks,
        settings(json!({"worker_count": 2, "task_worker_count": 0})),
    );
    wait_until(|| started.load(Ordering::SeqCst) == 2);

    server.handle.reload().unwrap();
    wait_until(|| started.load(Ordering::SeqCst) == 4);
    assert_eq!(server.handle.metrics().unwrap()["reload_count"], json!(1));

    assert!(server.stop());
}

#[test]
fn test_pid_file_lives_as_long_as_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run").join("server.pid");

    let server = Server::main_only(
        EventCallbackRegistry::new(),
        settings(json!({"worker_count": 1, "pid_file": path.to_string_lossy()})),
    );
    assert_eq!(
        PidFile::new(&path).read(),
        Some(std::process::id() as i32)
    );
    assert!(server.handle.running());

    let handle = Arc::clone(&server.handle);
    assert!(server.stop());
    assert!(!path.exists());
    assert!(!handle.running());
}

#[tokio::test]
async fn test_static_files_served_before_handlers() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("index.html"), "<h1>hi</h1>").unwrap();

    let mut callbacks = EventCallbackRegistry::new();
    callbacks.register_request_handler(
        handler_fn(|ctx: &EventContext| {
            ctx.reply("dynamic");
            Ok(())
        }),
        DEFAULT_PRIORITY,
    );
    let server = Server::main_only(
        callbacks,
        settings(json!({
            "worker_count": 1,
            "public_directory": root.path().to_string_lossy(),
            "static_file_handler_enabled": true
        })),
    );
    let base = format!("http://127.0.0.1:{}", server.port());

    let response = reqwest::get(format!("{}/index.html", base)).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "text/html; charset=utf-8"
    );
    assert_eq!(response.text().await.unwrap(), "<h1>hi</h1>");

    let response = reqwest::get(format!("{}/missing.txt", base)).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "dynamic");

    assert!(server.stop());
}

#[cfg(unix)]
#[test]
fn test_signals_reload_and_stop_a_forwarding_loop() {
    use server_composer::lifecycle::{ProcessControl, SignalProcessControl};
    use server_composer::ServerState;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("server.pid");
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut callbacks = EventCallbackRegistry::new();
    callbacks.register("worker-start", handler_fn(recorder(&events))).unwrap();
    callbacks.register("worker-stop", handler_fn(recorder(&events))).unwrap();

    let server = Server::start_with(
        LocalEngineFactory::new().with_signal_forwarding(),
        ListenerSet::with_main_socket(SocketAddress::tcp("127.0.0.1", 0)),
        callbacks,
        settings(json!({
            "worker_count": 1,
            "task_worker_count": 0,
            "pid_file": path.to_string_lossy()
        })),
    );
    let pid = PidFile::new(&path).read().unwrap();
    assert_eq!(pid, std::process::id() as i32);

    SignalProcessControl.reload(pid).unwrap();
    wait_until(|| events.lock().unwrap().len() == 3);
    assert_eq!(
        *events.lock().unwrap(),
        vec![EventKind::WorkerStart, EventKind::WorkerStop, EventKind::WorkerStart]
    );
    assert_eq!(server.handle.metrics().unwrap()["reload_count"], json!(1));

    SignalProcessControl.terminate(pid).unwrap();
    assert!(server.runner.join().unwrap());
    assert_eq!(server.handle.state(), ServerState::Stopped);
    assert!(!path.exists());
    assert_eq!(events.lock().unwrap().last(), Some(&EventKind::WorkerStop));

    // a stopped loop no longer keeps SIGTERM from ending the process
    assert_eq!(handler_of(Signal::SIGTERM), SigHandler::SigDfl);
    assert_eq!(handler_of(Signal::SIGINT), SigHandler::SigDfl);
}

/// Current disposition of `signal`, left in place.
#[cfg(unix)]
fn handler_of(signal: Signal) -> SigHandler {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigSet};

    let swap = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    let current = unsafe { sigaction(signal, &swap) }.unwrap();
    unsafe { sigaction(signal, &current) }.unwrap();
    current.handler()
}

#[test]
fn test_shutdown_right_after_start_is_not_lost() {
    let handle = ServerBuilder::new(
        LocalEngineFactory::new(),
        ListenerSet::with_main_socket(SocketAddress::tcp("127.0.0.1", 0)),
        EventCallbackRegistry::new(),
    )
    .with_settings(settings(json!({"worker_count": 1, "task_worker_count": 0})))
    .with_running_mode(RunningMode::Reactor)
    .make()
    .unwrap();
    let handle = Arc::new(handle);
    let runner = {
        let handle = Arc::clone(&handle);
        thread::spawn(move || handle.start())
    };

    // the first call that reaches the engine must stop it, whether or not
    // the loop is up yet
    loop {
        match handle.shutdown() {
            Ok(()) => break,
            Err(ServerError::NotRunning(_)) => thread::yield_now(),
            Err(err) => panic!("shutdown failed: {err}"),
        }
    }
    assert!(runner.join().unwrap());
}
