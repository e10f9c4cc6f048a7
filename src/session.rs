//! One debugging session per client connection.

use crate::breakpoint::{Breakpoint, BreakpointId};
use crate::command::{Ctx, Registry, Signal};
use crate::engine::value::{panic_error, ValueRef};
use crate::engine::{Engine, EventHook, Mode, ThreadId};
use crate::error::Error;
use crate::handles::{FrameEntry, Handles, VariableEntry};
use crate::{muted_error, weak_error};
use crate::processor::CommandProcessor;
use crate::protocol::io::{Connection, DapReader, DapWriter};
use crate::protocol::{
    Breakpoint as ProtocolBreakpoint, BreakpointEventBody, ChildSpawnedEventBody, Event, Request,
    Source, ThreadEventBody,
};
use log::{debug, error, info};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    Idle,
    Initializing,
    Configuring,
    Running,
    Terminating,
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound of a single evaluation or forward on a debuggee thread.
    pub eval_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            eval_timeout: Duration::from_secs(1),
        }
    }
}

type Callback = Box<dyn FnOnce() + Send>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Session {
    engine: Arc<dyn Engine>,
    registry: Arc<Registry>,
    config: SessionConfig,

    reader: Mutex<Option<DapReader>>,
    writer: Mutex<DapWriter>,
    shutdown: Mutex<Option<Callback>>,

    frames: Handles<FrameEntry>,
    variables: Handles<VariableEntry>,
    log_points: Mutex<HashMap<BreakpointId, String>>,
    processors: Mutex<HashMap<ThreadId, Arc<CommandProcessor>>>,

    state: Mutex<SessionState>,
    mode: Mutex<Option<Mode>>,
    on_configured: Mutex<Option<Callback>>,
    thread_events: AtomicBool,
    closed: AtomicBool,
}

impl Session {
    pub fn new(
        engine: Arc<dyn Engine>,
        registry: Arc<Registry>,
        connection: Connection,
        config: SessionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            registry,
            config,
            reader: Mutex::new(Some(connection.reader)),
            writer: Mutex::new(connection.writer),
            shutdown: Mutex::new(connection.shutdown),
            frames: Handles::new(),
            variables: Handles::new(),
            log_points: Mutex::default(),
            processors: Mutex::default(),
            state: Mutex::new(SessionState::Idle),
            mode: Mutex::new(None),
            on_configured: Mutex::new(None),
            thread_events: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Set a callback fired once, when the client is done configuring.
    pub fn on_configured(&self, callback: impl FnOnce() + Send + 'static) {
        *lock(&self.on_configured) = Some(Box::new(callback));
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn eval_timeout(&self) -> Duration {
        self.config.eval_timeout
    }

    pub fn frames(&self) -> &Handles<FrameEntry> {
        &self.frames
    }

    pub fn variables(&self) -> &Handles<VariableEntry> {
        &self.variables
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        let mut current = lock(&self.state);
        if *current != SessionState::Closed && *current != state {
            debug!(target: "dap", "session: {} -> {state}", *current);
            *current = state;
        }
    }

    pub fn mode(&self) -> Option<Mode> {
        *lock(&self.mode)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Processor of a thread, created on first use.
    pub fn processor(&self, thread: ThreadId) -> Arc<CommandProcessor> {
        lock(&self.processors)
            .entry(thread)
            .or_insert_with(|| Arc::new(CommandProcessor::new(thread)))
            .clone()
    }

    /// Forget every frame id and variables reference.
    ///
    /// Handles die together whatever thread resumes, so a still stopped thread loses its
    /// handles too and the client has to request them again.
    pub fn invalidate_handles(&self) {
        self.frames.clear();
        self.variables.clear();
    }

    pub fn log_point(&self, breakpoint: BreakpointId) -> Option<String> {
        lock(&self.log_points).get(&breakpoint).cloned()
    }

    pub fn set_log_point(&self, breakpoint: BreakpointId, template: Option<&str>) {
        let mut log_points = lock(&self.log_points);
        match template.filter(|t| !t.is_empty()) {
            Some(template) => {
                log_points.insert(breakpoint, template.to_string());
            }
            None => {
                log_points.remove(&breakpoint);
            }
        }
    }

    /// Delete breakpoints together with their log points.
    pub fn clear_breakpoints(&self, breakpoints: &[Breakpoint]) {
        let mut log_points = lock(&self.log_points);
        for bp in breakpoints {
            if !self.engine.remove_breakpoint(bp.id) {
                debug!(target: "dap", "breakpoint {} is already removed", bp.id);
            }
            log_points.remove(&bp.id);
        }
    }

    // --------------------------------- messaging -------------------------------------------------

    pub fn send_event(&self, event: Event) -> Result<(), Error> {
        lock(&self.writer).write_event(&event)
    }

    pub fn respond(&self, request: &Request, result: Result<Option<Value>, String>) -> Result<(), Error> {
        lock(&self.writer).write_response(request, result)
    }

    /// Announce an adapter started for a forked debuggee.
    pub fn child_spawned(&self, child: ChildSpawnedEventBody) -> Result<(), Error> {
        self.send_event(Event::ChildSpawned(child))
    }

    // --------------------------------- lifecycle -------------------------------------------------

    /// Start the engine.
    pub(crate) fn start(&self, mode: Mode) -> Result<(), Error> {
        self.thread_events.store(true, Ordering::SeqCst);
        self.engine.start(mode)?;
        *lock(&self.mode) = Some(mode);
        info!(target: "dap", "debugger started ({mode})");
        Ok(())
    }

    /// Fire the configured callback, only the first call has an effect.
    pub(crate) fn configured(&self) {
        let callback = lock(&self.on_configured).take();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Serve requests until the client goes away or the session is stopped.
    pub fn run(self: &Arc<Self>) -> Result<(), Error> {
        let Some(mut reader) = lock(&self.reader).take() else {
            return Err(Error::Internal(anyhow::anyhow!("session is already running")));
        };
        self.engine
            .set_hook(Some(self.clone() as Arc<dyn EventHook>));

        let result = loop {
            if self.is_closed() {
                break Ok(());
            }

            let request = match reader.read_request() {
                Ok(request) => request,
                Err(_) if self.is_closed() => break Ok(()),
                Err(e) if e.is_disconnect() => {
                    info!(target: "dap", "client disconnected");
                    break Ok(());
                }
                Err(e) => break Err(e),
            };

            if let Err(e) = self.handle(&request) {
                info!(target: "dap", "client disconnected: {e:#}");
                break Ok(());
            }
        };

        if let Err(e) = &result {
            error!(target: "dap", "session ended with error: {e:#}");
        }
        self.stop();
        result
    }

    /// Serve a request on the session thread.
    pub fn handle(&self, request: &Request) -> Result<Signal, Error> {
        self.execute(request, None)
    }

    /// Dispatch a request and translate a handler failure into a failed response. Returns an
    /// error only when the client can no longer be reached. A panicking handler fails its
    /// own request only.
    pub fn execute(
        &self,
        request: &Request,
        processor: Option<&CommandProcessor>,
    ) -> Result<Signal, Error> {
        debug!(target: "dap", "{}: {}", request.seq, request.command);
        let ctx = Ctx::new(self, request, processor);
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.registry.dispatch(&ctx)))
            .unwrap_or_else(|payload| {
                let e = panic_error(payload.as_ref());
                Err(Error::Internal(anyhow::anyhow!("handler panicked: {}", e.message)))
            });
        match result {
            Ok(signal) => Ok(signal),
            Err(e) if e.is_disconnect() => Err(e),
            Err(e) => {
                if e.is_internal() {
                    error!(target: "dap", "{} failed: {e:#}", request.command);
                } else {
                    debug!(target: "dap", "{} failed: {e:#}", request.command);
                }
                self.respond(request, Err(e.response_message()))?;
                Ok(Signal::Stay)
            }
        }
    }

    /// Tear the session down. Safe to call more than once.
    pub fn stop(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(SessionState::Terminating);

        self.thread_events.store(false, Ordering::SeqCst);
        self.engine.set_hook(None);
        self.engine.stop();

        let processors: Vec<_> = lock(&self.processors).drain().map(|(_, p)| p).collect();
        for processor in processors {
            processor.close();
        }
        self.invalidate_handles();

        if let Some(shutdown) = lock(&self.shutdown).take() {
            shutdown();
        }
        self.set_state(SessionState::Closed);
        info!(target: "dap", "session closed");

        if self.mode() == Some(Mode::Launched) {
            self.engine.exit();
        }
    }

    fn thread_event(&self, reason: &'static str, thread: ThreadId) {
        if !self.thread_events.load(Ordering::SeqCst) {
            return;
        }
        _ = muted_error!(
            self.send_event(Event::Thread(ThreadEventBody {
                reason,
                thread_id: thread,
            })),
            "thread event:"
        );
    }
}

impl EventHook for Session {
    fn at_line(&self, thread: ThreadId) {
        self.processor(thread).at_line(self);
    }

    fn at_end(&self, thread: ThreadId) {
        self.processor(thread).at_end(self);
    }

    fn at_return(&self, thread: ThreadId, value: Option<ValueRef>) {
        self.processor(thread).at_return(self, value);
    }

    fn at_breakpoint(&self, thread: ThreadId, breakpoint: BreakpointId) {
        self.processor(thread).at_breakpoint(breakpoint);
    }

    fn at_catchpoint(&self, thread: ThreadId, exception: ValueRef) {
        self.processor(thread).at_catchpoint(exception);
    }

    fn thread_started(&self, thread: ThreadId) {
        self.thread_event("started", thread);
    }

    fn thread_exited(&self, thread: ThreadId) {
        self.thread_event("exited", thread);
        let processor = lock(&self.processors).remove(&thread);
        if let Some(processor) = processor {
            processor.close();
        }
    }

    fn breakpoint_changed(&self, breakpoint: &Breakpoint, reason: &str) {
        let (source, line) = match &breakpoint.location {
            crate::breakpoint::Location::Line { source, line } => {
                (Some(Source::from_path(source)), Some(*line))
            }
            crate::breakpoint::Location::Method { .. } => (None, None),
        };
        _ = weak_error!(
            self.send_event(Event::Breakpoint(BreakpointEventBody {
                reason: reason.to_string(),
                breakpoint: ProtocolBreakpoint {
                    id: Some(breakpoint.id),
                    verified: true,
                    source,
                    line,
                    ..Default::default()
                },
            })),
            "breakpoint event:"
        );
    }
}
