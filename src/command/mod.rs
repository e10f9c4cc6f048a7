//! Command registry and the per-request handler context.

pub mod breakpoints;
mod control;
mod inspect;
mod lifecycle;
pub mod value;

use crate::engine::value::{panic_error, EvalError, EvalResult, ValueRef};
use crate::engine::{Engine, ExecutionContext, Frame, FrameScope, ThreadId};
use crate::error::Error;
use crate::handles::{ChildKey, Payload, ScopeKind};
use crate::processor::CommandProcessor;
use crate::protocol::{Event, Request, ThreadArguments};
use crate::session::Session;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// What a thread does after a contextual command ran on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Leave the command loop and give the thread back to the engine.
    Resume,
    /// Keep waiting for commands.
    Stay,
}

pub type DirectFn = fn(&Ctx) -> Result<(), Error>;
pub type InContextFn = fn(&Ctx, &CommandProcessor) -> Result<Signal, Error>;
pub type ForwardFn = fn(&Ctx, &CommandProcessor) -> Result<(), Error>;

/// How a command is executed.
#[derive(Clone, Copy)]
pub enum Handler {
    /// Runs inline on the session thread.
    Direct(DirectFn),
    /// Runs on the target debuggee thread. `in_context` is used when the request is already
    /// served by that thread's processor, `forward` hands the request over to it otherwise.
    Contextual {
        in_context: InContextFn,
        forward: ForwardFn,
    },
}

/// Static `command name -> handler` table.
#[derive(Default)]
pub struct Registry {
    handlers: HashMap<&'static str, Handler>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every supported DAP command.
    pub fn standard() -> Self {
        let mut registry = Self::new();

        registry.register("initialize", Handler::Direct(lifecycle::initialize));
        registry.register("launch", Handler::Direct(lifecycle::launch));
        registry.register("attach", Handler::Direct(lifecycle::attach));
        registry.register(
            "configurationDone",
            Handler::Direct(lifecycle::configuration_done),
        );
        registry.register("disconnect", Handler::Direct(lifecycle::disconnect));

        registry.register("setBreakpoints", Handler::Direct(breakpoints::set_breakpoints));
        registry.register(
            "setFunctionBreakpoints",
            Handler::Direct(breakpoints::set_function_breakpoints),
        );
        registry.register(
            "setExceptionBreakpoints",
            Handler::Direct(breakpoints::set_exception_breakpoints),
        );
        registry.register(
            "breakpointLocations",
            Handler::Direct(breakpoints::breakpoint_locations),
        );

        registry.register(
            "continue",
            Handler::Contextual {
                in_context: control::resume,
                forward: control::forward,
            },
        );
        registry.register(
            "next",
            Handler::Contextual {
                in_context: control::step_over,
                forward: control::forward,
            },
        );
        registry.register(
            "stepIn",
            Handler::Contextual {
                in_context: control::step_in,
                forward: control::forward,
            },
        );
        registry.register(
            "stepOut",
            Handler::Contextual {
                in_context: control::step_out,
                forward: control::forward,
            },
        );
        registry.register(
            "pause",
            Handler::Contextual {
                in_context: control::pause,
                forward: control::forward_pause,
            },
        );

        registry.register("threads", Handler::Direct(inspect::threads));
        registry.register("stackTrace", Handler::Direct(inspect::stack_trace));
        registry.register("scopes", Handler::Direct(inspect::scopes));
        registry.register("variables", Handler::Direct(inspect::variables));
        registry.register("evaluate", Handler::Direct(inspect::evaluate));
        registry.register("exceptionInfo", Handler::Direct(inspect::exception_info));
        registry.register("source", Handler::Direct(inspect::source));

        registry
    }

    pub fn register(&mut self, command: &'static str, handler: Handler) {
        self.handlers.insert(command, handler);
    }

    pub fn get(&self, command: &str) -> Option<Handler> {
        self.handlers.get(command).copied()
    }

    /// Run the handler of a request.
    pub fn dispatch(&self, ctx: &Ctx) -> Result<Signal, Error> {
        let handler = self
            .get(&ctx.request.command)
            .ok_or_else(|| Error::UnknownCommand(ctx.request.command.clone()))?;

        match handler {
            Handler::Direct(execute) => execute(ctx).map(|_| Signal::Stay),
            Handler::Contextual { in_context, forward } => {
                if let Some(processor) = ctx.processor {
                    return in_context(ctx, processor);
                }

                ctx.started()?;
                let args: ThreadArguments = ctx.args()?;
                let thread = ctx.find_thread(args.thread_id)?;
                let processor = ctx.session.processor(thread.id);
                forward(ctx, &processor)?;
                Ok(Signal::Stay)
            }
        }
    }
}

/// Accessor of a single child in a resolved variables reference.
pub type Getter = Arc<dyn Fn() -> EvalResult<ValueRef> + Send + Sync>;

/// Children behind a variables reference.
pub struct ResolvedVariables {
    pub thread: ThreadId,
    pub frame: usize,
    pub named: Vec<(String, Getter)>,
    pub indexed: Vec<(String, Getter)>,
}

/// Everything a handler needs to serve one request.
pub struct Ctx<'a> {
    pub session: &'a Session,
    pub request: &'a Request,
    /// Processor of the thread serving the request, if it runs in context.
    pub processor: Option<&'a CommandProcessor>,
}

impl<'a> Ctx<'a> {
    pub fn new(
        session: &'a Session,
        request: &'a Request,
        processor: Option<&'a CommandProcessor>,
    ) -> Self {
        Self {
            session,
            request,
            processor,
        }
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        self.session.engine()
    }

    pub fn args<T: DeserializeOwned + Default>(&self) -> Result<T, Error> {
        self.request
            .arguments()
            .map_err(|e| Error::InvalidArgument(format!("Invalid arguments: {e}")))
    }

    pub fn respond(&self, body: impl Serialize) -> Result<(), Error> {
        let body = serde_json::to_value(body)?;
        self.session.respond(self.request, Ok(Some(body)))
    }

    pub fn respond_empty(&self) -> Result<(), Error> {
        self.session.respond(self.request, Ok(None))
    }

    pub fn event(&self, event: Event) -> Result<(), Error> {
        self.session.send_event(event)
    }

    /// Fail unless the debugger is running.
    pub fn started(&self) -> Result<(), Error> {
        if self.engine().is_started() {
            return Ok(());
        }
        Err(Error::NotStarted(self.request.command.clone()))
    }

    /// Fail if the debugger is already running.
    pub fn stopped(&self) -> Result<(), Error> {
        if !self.engine().is_started() {
            return Ok(());
        }
        Err(Error::AlreadyStarted(self.request.command.clone()))
    }

    pub fn find_thread(&self, id: Option<ThreadId>) -> Result<ExecutionContext, Error> {
        let id = id.ok_or(Error::MissingArgument("thread ID"))?;
        self.engine().context(id).ok_or(Error::MissingThread(id))
    }

    pub fn find_frame(&self, ctx: &ExecutionContext, frame: usize) -> Result<Frame, Error> {
        if frame >= ctx.stack_size {
            return Err(Error::MissingFrame(frame));
        }
        Ok(self.engine().frame(ctx.id, frame)?)
    }

    /// Resolve a frame id issued by `stackTrace`.
    pub fn resolve_frame_id(&self, id: Option<i64>) -> Result<(Frame, ThreadId, usize), Error> {
        let id = id.ok_or(Error::MissingArgument("frame ID"))?;
        let entry = self.session.frames().get(id).ok_or(Error::MissingEntry {
            scope: "frame ID",
            value: id,
        })?;

        let ctx = self.find_thread(Some(entry.thread))?;
        let frame = self.find_frame(&ctx, entry.frame)?;
        Ok((frame, entry.thread, entry.frame))
    }

    fn frame_scope(&self, thread: ThreadId, frame: usize) -> Result<Arc<dyn FrameScope>, Error> {
        let ctx = self.find_thread(Some(thread))?;
        self.find_frame(&ctx, frame)?;
        Ok(self.engine().frame_scope(thread, frame)?)
    }

    /// Resolve a variables reference into child accessors.
    pub fn resolve_variables_reference(&self, reference: Option<i64>) -> Result<ResolvedVariables, Error> {
        let reference = reference.ok_or(Error::MissingArgument("variables reference"))?;
        let entry = self
            .session
            .variables()
            .get(reference)
            .ok_or(Error::MissingEntry {
                scope: "variables reference",
                value: reference,
            })?;

        let invalid = || Error::InvalidEntry {
            scope: "variable scope",
            value: entry.kind.to_string(),
        };

        let (named, indexed) = match (entry.kind, &entry.payload) {
            (ScopeKind::Locals | ScopeKind::Arguments, Payload::Names(names)) => {
                let scope = self.frame_scope(entry.thread, entry.frame)?;
                let processor = self.session.processor(entry.thread);
                let named = names
                    .iter()
                    .map(|name| {
                        let scope = scope.clone();
                        let processor = processor.clone();
                        let key = name.clone();
                        let get: Getter = Arc::new(move || match key.as_str() {
                            "self" => scope.self_value(),
                            "$!" => processor
                                .last_exception()
                                .ok_or_else(|| EvalError::new("no exception is pending")),
                            "%return" => processor
                                .last_return()
                                .ok_or_else(|| EvalError::new("no return value is pending")),
                            _ => scope.local(&key),
                        });
                        (name.clone(), get)
                    })
                    .collect();
                (named, vec![])
            }
            (ScopeKind::Globals, Payload::Names(names)) => {
                let scope = self.frame_scope(entry.thread, entry.frame)?;
                let named = names
                    .iter()
                    .map(|name| {
                        let scope = scope.clone();
                        let key = name.clone();
                        let get: Getter = Arc::new(move || scope.eval(&key));
                        (name.clone(), get)
                    })
                    .collect();
                (named, vec![])
            }
            (
                ScopeKind::Variable | ScopeKind::Evaluate,
                Payload::Value {
                    value,
                    named,
                    indexed,
                },
            ) => {
                let named = named
                    .iter()
                    .map(|name| {
                        let value = value.clone();
                        let key = name.clone();
                        let get: Getter = Arc::new(move || value.member(&key));
                        (name.clone(), get)
                    })
                    .collect();
                let indexed = indexed
                    .iter()
                    .map(|key| {
                        let value = value.clone();
                        let child = key.clone();
                        let get: Getter = Arc::new(move || match &child {
                            ChildKey::Index(idx) => value.index(*idx),
                            ChildKey::Key(k) => value.get(k),
                            ChildKey::Name(name) => value.member(name),
                        });
                        (value::child_name(key), get)
                    })
                    .collect();
                (named, indexed)
            }
            _ => return Err(invalid()),
        };

        Ok(ResolvedVariables {
            thread: entry.thread,
            frame: entry.frame,
            named,
            indexed,
        })
    }

    /// Run `f` on a debuggee thread. Thread `0` and the thread serving this request run
    /// `f` inline.
    pub fn execute_on_thread<T, F>(&self, thread: ThreadId, f: F) -> Result<EvalResult<T>, Error>
    where
        T: Send + 'static,
        F: FnOnce() -> EvalResult<T> + Send + 'static,
    {
        let inline = thread == 0 || self.processor.is_some_and(|p| p.thread() == thread);
        if inline {
            return Ok(match panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(result) => result,
                Err(payload) => Err(panic_error(payload.as_ref())),
            });
        }

        self.find_thread(Some(thread))?;
        let processor = self.session.processor(thread);
        processor
            .execute(f, self.session.eval_timeout())
            .map_err(|e| match e {
                Error::Timeout { thread, .. } => Error::Timeout {
                    thread,
                    name: self.thread_name(thread),
                },
                e => e,
            })
    }

    pub fn thread_name(&self, thread: ThreadId) -> Option<String> {
        self.engine().context(thread).and_then(|ctx| ctx.name)
    }
}
