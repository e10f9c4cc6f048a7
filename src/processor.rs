//! Per-thread stop/resume state machine.
//!
//! A debuggee thread stopped by the engine parks inside [`CommandProcessor`] and serves
//! requests and evaluation jobs pushed from the session thread until one of them resumes it.

use crate::breakpoint::{BreakpointId, Location};
use crate::channel::{Channel, PopError, PushError};
use crate::command::value::safe;
use crate::command::Signal;
use crate::engine::value::{panic_error, EvalError, EvalResult, ValueRef};
use crate::engine::{StopReason, ThreadId};
use crate::error::Error;
use crate::protocol::{Event, OutputEventBody, Request, Source, StoppedEventBody};
use crate::session::Session;
use log::{debug, trace, warn};
use once_cell::sync;
use regex::Regex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use strum_macros::{Display, IntoStaticStr};

type JobFn = Box<dyn FnOnce() -> Box<dyn Any + Send> + Send>;
type JobResult = (u64, Result<Box<dyn Any + Send>, EvalError>);

/// Unit of work delivered to a stopped thread.
pub enum Item {
    /// Contextual request forwarded by the session.
    Request(Request),
    /// Code that must run on the debuggee thread, result goes back by `id`.
    Job { id: u64, job: JobFn },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ProcessorState {
    /// Thread is owned by the engine.
    Running,
    /// Stop hook fired, stop event not yet processed.
    Stopped,
    /// Blocked on the request channel.
    AwaitingCommand,
    /// Running an evaluation job.
    Executing,
}

/// Why a thread is currently suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum StopCause {
    Breakpoint,
    Catchpoint,
    Step,
    Pause,
    End,
    Return,
}

impl StopCause {
    fn event(self, thread: ThreadId, location: &str) -> StoppedEventBody {
        let (reason, description, text) = match self {
            StopCause::Breakpoint => ("breakpoint", "Hit breakpoint", "Hit breakpoint at"),
            StopCause::Catchpoint => ("exception", "Hit catchpoint", "Hit catchpoint at"),
            StopCause::Pause => ("pause", "Paused", "Paused at"),
            StopCause::Step | StopCause::End | StopCause::Return => {
                ("step", "Stepped", "Stepped at")
            }
        };
        StoppedEventBody {
            reason,
            thread_id: thread,
            description,
            text: format!("{text} {location}"),
            hit_breakpoint_ids: None,
        }
    }
}

pub struct CommandProcessor {
    thread: ThreadId,
    requests: Channel<Item>,
    results: Channel<JobResult>,
    /// One evaluation at a time.
    exec_lock: Mutex<()>,
    next_job: AtomicU64,
    pause_requested: AtomicBool,
    state: Mutex<ProcessorState>,
    last_stop: Mutex<Option<StopCause>>,
    last_breakpoint: Mutex<Option<BreakpointId>>,
    last_exception: Mutex<Option<ValueRef>>,
    last_return: Mutex<Option<ValueRef>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl CommandProcessor {
    pub fn new(thread: ThreadId) -> Self {
        Self {
            thread,
            requests: Channel::new(),
            results: Channel::new(),
            exec_lock: Mutex::new(()),
            next_job: AtomicU64::new(1),
            pause_requested: AtomicBool::new(false),
            state: Mutex::new(ProcessorState::Running),
            last_stop: Mutex::new(None),
            last_breakpoint: Mutex::new(None),
            last_exception: Mutex::new(None),
            last_return: Mutex::new(None),
        }
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn state(&self) -> ProcessorState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ProcessorState) {
        let mut current = lock(&self.state);
        if *current != state {
            trace!(target: "processor", "thread #{}: {} -> {state}", self.thread, *current);
            *current = state;
        }
    }

    /// Cause of the current (or the most recent) stop.
    pub fn last_stop(&self) -> Option<StopCause> {
        *lock(&self.last_stop)
    }

    /// Exception caught by the last catchpoint, cleared on resume.
    pub fn last_exception(&self) -> Option<ValueRef> {
        lock(&self.last_exception).clone()
    }

    /// Value returned by the frame the thread stopped at the end of, cleared on resume.
    pub fn last_return(&self) -> Option<ValueRef> {
        lock(&self.last_return).clone()
    }

    pub fn is_pause_requested(&self) -> bool {
        self.pause_requested.load(Ordering::SeqCst)
    }

    /// Make the next step stop of this thread report a pause.
    pub fn request_pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    /// Return `true` if an item waits for the thread to pick it up.
    pub fn is_pending(&self) -> bool {
        self.requests.is_pending()
    }

    /// Release the thread and reject everything sent afterwards.
    pub fn close(&self) {
        self.requests.close();
        self.results.close();
    }

    /// Hand a contextual request over to the thread.
    pub fn forward(&self, request: Request, timeout: Duration) -> Result<(), Error> {
        match self.requests.push_timeout(Item::Request(request), timeout) {
            Ok(()) => Ok(()),
            Err(PushError::Timeout(_)) => Err(self.timeout_error()),
            Err(PushError::Closed(_)) => Err(Error::MissingThread(self.thread)),
        }
    }

    fn timeout_error(&self) -> Error {
        Error::Timeout {
            thread: self.thread,
            name: None,
        }
    }

    /// Run `f` on the thread and wait for its result.
    ///
    /// The whole call is bounded by `timeout`: a job that the thread does not pick up in
    /// time is withdrawn and [`Error::Timeout`] is returned. Panics inside `f` come back as
    /// evaluation errors.
    pub fn execute<T, F>(&self, f: F, timeout: Duration) -> Result<EvalResult<T>, Error>
    where
        T: Send + 'static,
        F: FnOnce() -> EvalResult<T> + Send + 'static,
    {
        let _guard = lock(&self.exec_lock);
        let deadline = Instant::now() + timeout;
        let id = self.next_job.fetch_add(1, Ordering::SeqCst);
        let job: JobFn = Box::new(move || Box::new(f()) as Box<dyn Any + Send>);

        match self.requests.push_timeout(Item::Job { id, job }, timeout) {
            Ok(()) => {}
            Err(PushError::Timeout(_)) => return Err(self.timeout_error()),
            Err(PushError::Closed(_)) => return Err(Error::MissingThread(self.thread)),
        }

        loop {
            let now = Instant::now();
            if now >= deadline {
                let withdrawn = self
                    .requests
                    .take_if(|item| matches!(item, Item::Job { id: pending, .. } if *pending == id));
                debug!(
                    target: "processor",
                    "thread #{}: job {id} timed out (withdrawn: {})", self.thread, withdrawn.is_some()
                );
                return Err(self.timeout_error());
            }

            match self.results.pop_timeout(deadline - now) {
                Ok((result_id, result)) if result_id == id => {
                    return match result {
                        Ok(boxed) => boxed
                            .downcast::<EvalResult<T>>()
                            .map(|r| *r)
                            .map_err(|_| Error::Internal(anyhow::anyhow!("unexpected job result type"))),
                        Err(e) => Ok(Err(e)),
                    };
                }
                Ok((result_id, _)) => {
                    debug!(target: "processor", "thread #{}: drop stale result of job {result_id}", self.thread);
                }
                Err(PopError::Timeout) => {}
                Err(PopError::Closed) => return Err(Error::MissingThread(self.thread)),
            }
        }
    }

    // --------------------------------- engine hooks ----------------------------------------------

    pub fn at_line(&self, session: &Session) {
        self.stopped(session, StopCause::Step);
    }

    pub fn at_end(&self, session: &Session) {
        self.stopped(session, StopCause::End);
    }

    pub fn at_return(&self, session: &Session, value: Option<ValueRef>) {
        *lock(&self.last_return) = value;
        self.stopped(session, StopCause::Return);
    }

    pub fn at_breakpoint(&self, breakpoint: BreakpointId) {
        *lock(&self.last_breakpoint) = Some(breakpoint);
    }

    pub fn at_catchpoint(&self, exception: ValueRef) {
        *lock(&self.last_exception) = Some(exception);
    }

    fn stopped(&self, session: &Session, step_cause: StopCause) {
        let breakpoint = lock(&self.last_breakpoint).take();
        if let Some(id) = breakpoint {
            if self.log_point(session, id) {
                return;
            }
        }

        self.set_state(ProcessorState::Stopped);
        let context = session.engine().context(self.thread);
        let reason = context
            .as_ref()
            .map(|ctx| ctx.stop_reason)
            .unwrap_or(StopReason::Unknown);

        let cause = match reason {
            StopReason::Breakpoint => Some(StopCause::Breakpoint),
            StopReason::Catchpoint => Some(StopCause::Catchpoint),
            StopReason::Step if self.pause_requested.swap(false, Ordering::SeqCst) => {
                Some(StopCause::Pause)
            }
            StopReason::Step => Some(step_cause),
            StopReason::Unknown => None,
        };
        *lock(&self.last_stop) = cause;

        match cause {
            Some(cause) => {
                let location = context.map(|ctx| ctx.location).unwrap_or_default();
                let mut body = cause.event(self.thread, &location);
                if cause == StopCause::Breakpoint {
                    body.hit_breakpoint_ids = breakpoint.map(|id| vec![id]);
                }
                debug!(target: "processor", "thread #{} stopped: {cause}", self.thread);
                if let Err(e) = session.send_event(Event::Stopped(body)) {
                    debug!(target: "processor", "stopped event is not delivered: {e:#}");
                }
            }
            None => warn!(target: "processor", "thread #{} stopped for unknown reason", self.thread),
        }

        self.process_requests(session);
    }

    /// Expand the log point template of a just hit breakpoint. Returns `true` if the
    /// breakpoint is a log point, the thread must not stop then.
    fn log_point(&self, session: &Session, id: BreakpointId) -> bool {
        static PLACEHOLDER_RE: sync::Lazy<Regex> =
            sync::Lazy::new(|| Regex::new(r"\{([^}]+)\}").expect("must compile"));

        let Some(template) = session.log_point(id) else {
            return false;
        };

        let scope = match session.engine().frame_scope(self.thread, 0) {
            Ok(scope) => scope,
            Err(e) => {
                debug!(target: "processor", "log point {id} ignored: {e:#}");
                return true;
            }
        };

        let mut output = String::with_capacity(template.len());
        let mut last = 0;
        for caps in PLACEHOLDER_RE.captures_iter(&template) {
            let (Some(whole), Some(expr)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            output.push_str(&template[last..whole.start()]);
            match safe(|| scope.eval(expr.as_str())?.to_s()) {
                Ok(s) => output.push_str(&s),
                Err(e) => {
                    // a broken log point stays silent
                    debug!(target: "processor", "log point {id}: '{}' failed: {e}", expr.as_str());
                    return true;
                }
            }
            last = whole.end();
        }
        output.push_str(&template[last..]);
        output.push('\n');

        let line = session
            .engine()
            .breakpoints()
            .into_iter()
            .find(|bp| bp.id == id)
            .and_then(|bp| match bp.location {
                Location::Line { source, line } => Some((source, line)),
                Location::Method { .. } => None,
            });

        let body = OutputEventBody {
            category: "console",
            output,
            source: line.as_ref().map(|(source, _)| Source::from_path(source)),
            line: line.map(|(_, line)| line),
        };
        if let Err(e) = session.send_event(Event::Output(body)) {
            debug!(target: "processor", "output event is not delivered: {e:#}");
        }
        true
    }

    fn process_requests(&self, session: &Session) {
        loop {
            self.set_state(ProcessorState::AwaitingCommand);
            let Some(item) = self.requests.pop() else {
                debug!(target: "processor", "thread #{}: channel closed", self.thread);
                break;
            };

            match item {
                Item::Job { id, job } => {
                    self.set_state(ProcessorState::Executing);
                    let result = panic::catch_unwind(AssertUnwindSafe(job))
                        .map_err(|payload| panic_error(payload.as_ref()));
                    // nobody waits for a result left by a timed out caller
                    _ = self.results.take_if(|_| true);
                    if self.results.push((id, result)).is_err() {
                        debug!(target: "processor", "thread #{}: result of job {id} dropped", self.thread);
                    }
                }
                Item::Request(request) => match session.execute(&request, Some(self)) {
                    Ok(Signal::Resume) => break,
                    Ok(Signal::Stay) => {}
                    Err(e) => {
                        warn!(target: "processor", "thread #{}: {} failed: {e:#}", self.thread, request.command);
                    }
                },
            }
        }

        *lock(&self.last_exception) = None;
        *lock(&self.last_return) = None;
        session.invalidate_handles();
        self.set_state(ProcessorState::Running);
    }
}
