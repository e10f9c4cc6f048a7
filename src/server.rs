//! Accepts DAP clients and serves one session per connection.

use crate::command::Registry;
use crate::config::{Listen, ServerConfig};
use crate::engine::Engine;
use crate::muted_error;
use crate::protocol::io::{Connection, FileTracer};
use crate::protocol::ChildSpawnedEventBody;
use crate::session::Session;
use anyhow::{bail, Context};
use log::{info, warn};
use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

struct Inner {
    engine: Arc<dyn Engine>,
    registry: Arc<Registry>,
    config: ServerConfig,
    tracer: Option<FileTracer>,
    sessions: AtomicU64,

    configured: Mutex<bool>,
    configured_cond: Condvar,

    session: Mutex<Option<Arc<Session>>>,
    children: Mutex<Vec<ChildSpawnedEventBody>>,
}

pub struct Server {
    inner: Arc<Inner>,
    started: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    pub fn new(engine: Arc<dyn Engine>, config: ServerConfig) -> anyhow::Result<Self> {
        let tracer = match (&config.log_file, config.trace_dap) {
            (Some(path), true) => Some(FileTracer::new(path)?),
            (None, true) => {
                warn!(target: "dap", "--trace-dap requires --log-file; tracing disabled");
                None
            }
            _ => None,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                engine,
                registry: Arc::new(Registry::standard()),
                config,
                tracer,
                sessions: AtomicU64::new(0),
                configured: Mutex::new(false),
                configured_cond: Condvar::new(),
                session: Mutex::new(None),
                children: Mutex::default(),
            }),
            started: AtomicBool::new(false),
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    fn mark_started(&self) -> anyhow::Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            bail!("server is already started");
        }
        Ok(())
    }

    /// Start serving on the configured endpoint. Returns the bound address for TCP.
    pub fn start(&self) -> anyhow::Result<Option<SocketAddr>> {
        match self.inner.config.listen.clone() {
            Listen::Tcp(addr) => self.start_tcp(&addr).map(Some),
            Listen::Unix(path) => self.start_unix(&path).map(|_| None),
            Listen::Stdio => self.start_stdio().map(|_| None),
        }
    }

    /// Listen on a TCP socket, clients are served one after another.
    pub fn start_tcp(&self, addr: &str) -> anyhow::Result<SocketAddr> {
        self.mark_started()?;
        let listener = TcpListener::bind(addr).with_context(|| format!("bind {addr}"))?;
        let local = listener.local_addr()?;
        info!(target: "dap", "listening on {local}");

        let inner = self.inner.clone();
        self.spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!(target: "dap", "accept failed: {err:#}");
                        continue;
                    }
                };
                let peer = stream
                    .peer_addr()
                    .map(|p| p.to_string())
                    .unwrap_or_default();
                info!(target: "dap", "DAP client connected: {peer}");

                let (id, tracer) = inner.next_session();
                match Connection::tcp(stream, tracer) {
                    Ok(connection) => inner.serve(id, connection),
                    Err(err) => warn!(target: "dap", "failed to init DAP I/O: {err:#}"),
                }
                if inner.config.oneshot {
                    break;
                }
            }
        })?;
        Ok(local)
    }

    /// Listen on a Unix socket.
    #[cfg(unix)]
    pub fn start_unix(&self, path: &Path) -> anyhow::Result<()> {
        use std::os::unix::net::UnixListener;

        self.mark_started()?;
        let listener =
            UnixListener::bind(path).with_context(|| format!("bind {}", path.display()))?;
        info!(target: "dap", "listening on unix:{}", path.display());

        let inner = self.inner.clone();
        self.spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!(target: "dap", "accept failed: {err:#}");
                        continue;
                    }
                };
                info!(target: "dap", "DAP client connected");

                let (id, tracer) = inner.next_session();
                match Connection::unix(stream, tracer) {
                    Ok(connection) => inner.serve(id, connection),
                    Err(err) => warn!(target: "dap", "failed to init DAP I/O: {err:#}"),
                }
                if inner.config.oneshot {
                    break;
                }
            }
        })
    }

    #[cfg(not(unix))]
    pub fn start_unix(&self, _: &Path) -> anyhow::Result<()> {
        bail!("unix sockets are not supported on this platform")
    }

    /// Serve a single session over stdin and stdout.
    pub fn start_stdio(&self) -> anyhow::Result<()> {
        self.mark_started()?;
        let inner = self.inner.clone();
        self.spawn(move || {
            let (id, tracer) = inner.next_session();
            inner.serve(id, Connection::stdio(tracer));
        })
    }

    fn spawn(&self, f: impl FnOnce() + Send + 'static) -> anyhow::Result<()> {
        let handle = thread::Builder::new()
            .name("dap-server".to_string())
            .spawn(f)
            .context("spawn server thread")?;
        *lock(&self.worker) = Some(handle);
        Ok(())
    }

    /// Block until the server thread finishes, for `oneshot` servers and stdio.
    pub fn join(&self) {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            _ = handle.join();
        }
    }

    /// Block until a client is done configuring its session. Returns `false` on timeout.
    pub fn wait_for_client(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut configured = lock(&self.inner.configured);
        while !*configured {
            match deadline {
                None => {
                    configured = self
                        .inner
                        .configured_cond
                        .wait(configured)
                        .unwrap_or_else(|e| e.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    configured = self
                        .inner
                        .configured_cond
                        .wait_timeout(configured, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0;
                }
            }
        }
        true
    }

    /// Session of the connected client, if any.
    pub fn session(&self) -> Option<Arc<Session>> {
        lock(&self.inner.session).clone()
    }

    /// Tear down the current session. Returns `false` if no client is connected.
    pub fn stop_session(&self) -> bool {
        match self.session() {
            Some(session) => {
                session.stop();
                true
            }
            None => false,
        }
    }

    /// Record an adapter started for a forked debuggee and announce it to the current
    /// client. Returns `true` if the client was notified.
    pub fn child_spawned(&self, name: &str, pid: u32, socket: &str) -> bool {
        let child = ChildSpawnedEventBody {
            name: name.to_string(),
            pid,
            socket: socket.to_string(),
        };
        lock(&self.inner.children).push(child.clone());

        let Some(session) = self.session() else {
            return false;
        };
        muted_error!(session.child_spawned(child), "child spawned:").is_some()
    }

    pub fn children(&self) -> Vec<ChildSpawnedEventBody> {
        lock(&self.inner.children).clone()
    }
}

impl Inner {
    fn set_configured(&self) {
        *lock(&self.configured) = true;
        self.configured_cond.notify_all();
    }

    /// Allocate an id for the next session, with a tracer tagged by it.
    fn next_session(&self) -> (u64, Option<FileTracer>) {
        let id = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        (id, self.tracer.as_ref().map(|t| t.for_session(id)))
    }

    fn serve(self: &Arc<Self>, id: u64, connection: Connection) {
        let session = Session::new(
            self.engine.clone(),
            self.registry.clone(),
            connection,
            self.config.session_config(),
        );
        let inner: Weak<Inner> = Arc::downgrade(self);
        session.on_configured(move || {
            if let Some(inner) = inner.upgrade() {
                inner.set_configured();
            }
        });

        let children = lock(&self.children).clone();
        for child in children {
            _ = muted_error!(session.child_spawned(child), "announce child:");
        }

        *lock(&self.session) = Some(session.clone());
        match session.run() {
            Ok(()) => {
                info!(target: "dap", "session {id} finished");
                if let Some(t) = &self.tracer {
                    t.note(&format!("session {id} finished"));
                }
            }
            Err(err) => {
                warn!(target: "dap", "session {id} ended with error: {err:#}");
                if let Some(t) = &self.tracer {
                    t.note(&format!("session {id} error: {err:#}"));
                }
            }
        }
        session.stop();
        *lock(&self.session) = None;
    }
}
