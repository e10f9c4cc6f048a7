//! Interface of the instrumentation engine.
//!
//! The engine owns the debuggee threads, knows how to step and interrupt them, reads
//! frames and evaluates expressions. The adapter only talks to it through [`Engine`] and
//! receives notifications through [`EventHook`].

pub mod value;

use crate::breakpoint::{Breakpoint, BreakpointId, HitCondition, Location};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strum_macros::{Display, EnumString};
use value::{EvalResult, ValueRef};

/// Stable number of a debuggee thread.
pub type ThreadId = i64;

/// Why the engine stopped a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Breakpoint,
    Catchpoint,
    Step,
    Unknown,
}

/// Snapshot of one debuggee thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub id: ThreadId,
    pub name: Option<String>,
    pub stack_size: usize,
    pub stop_reason: StopReason,
    /// Human readable current position, like `app.rb:12`.
    pub location: String,
}

impl ExecutionContext {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("Thread #{}", self.id))
    }
}

/// Frame metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decorated call description (`Foo#bar(a, b)`).
    pub name: String,
    pub file: PathBuf,
    pub line: u32,
}

/// How a debug session was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    Attached,
    Launched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Over,
    Into,
    Out,
}

/// Source position of a method, `(file, line)`.
pub type SourceLocation = (PathBuf, u32);

/// Where the class-level and the instance-level methods with some name are defined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodLocations {
    pub class_method: Option<SourceLocation>,
    pub instance_method: Option<SourceLocation>,
}

/// Evaluation scope of a single frame. Name listings may be read from any thread, value
/// accessors and `eval` must be called on the thread owning the frame.
pub trait FrameScope: Send + Sync {
    fn argument_names(&self) -> Vec<String>;

    /// All local names, arguments included.
    fn local_names(&self) -> Vec<String>;

    fn local(&self, name: &str) -> EvalResult<ValueRef>;

    /// The receiver of the frame.
    fn self_value(&self) -> EvalResult<ValueRef>;

    /// Return `true` if the frame runs in the top-level object, `self` is hidden then.
    fn is_top_level(&self) -> bool;

    fn eval(&self, expression: &str) -> EvalResult<ValueRef>;
}

/// Notifications from the engine. Stop hooks are invoked on the stopped thread itself
/// and block until the client resumes it.
pub trait EventHook: Send + Sync {
    fn at_line(&self, thread: ThreadId);
    fn at_end(&self, thread: ThreadId);
    fn at_return(&self, thread: ThreadId, value: Option<ValueRef>);
    fn at_breakpoint(&self, thread: ThreadId, breakpoint: BreakpointId);
    fn at_catchpoint(&self, thread: ThreadId, exception: ValueRef);

    fn thread_started(&self, thread: ThreadId);
    fn thread_exited(&self, thread: ThreadId);

    /// A breakpoint was verified, moved or removed by the engine itself.
    fn breakpoint_changed(&self, breakpoint: &Breakpoint, reason: &str);
}

pub trait Engine: Send + Sync {
    fn start(&self, mode: Mode) -> anyhow::Result<()>;
    fn stop(&self);
    fn is_started(&self) -> bool;

    /// Install (or remove) the receiver of engine notifications.
    fn set_hook(&self, hook: Option<Arc<dyn EventHook>>);

    /// Live debuggee threads.
    fn contexts(&self) -> Vec<ExecutionContext>;

    fn context(&self, thread: ThreadId) -> Option<ExecutionContext> {
        self.contexts().into_iter().find(|ctx| ctx.id == thread)
    }

    fn frame(&self, thread: ThreadId, frame: usize) -> anyhow::Result<Frame>;
    fn frame_scope(&self, thread: ThreadId, frame: usize) -> anyhow::Result<Arc<dyn FrameScope>>;

    fn global_names(&self) -> Vec<String>;
    fn eval_global(&self, expression: &str) -> EvalResult<ValueRef>;

    fn interrupt(&self, thread: ThreadId) -> anyhow::Result<()>;

    /// Arm a single step for the thread, it takes effect once the thread resumes.
    fn step(&self, thread: ThreadId, kind: StepKind) -> anyhow::Result<()>;

    /// Lines of a source file where a breakpoint may be placed.
    fn breakpoint_lines(&self, path: &Path) -> anyhow::Result<Vec<u32>>;
    fn breakpoints(&self) -> Vec<Breakpoint>;
    fn add_breakpoint(&self, location: Location) -> anyhow::Result<Breakpoint>;
    fn update_breakpoint(
        &self,
        id: BreakpointId,
        condition: Option<String>,
        hit_condition: HitCondition,
    ) -> anyhow::Result<()>;
    fn remove_breakpoint(&self, id: BreakpointId) -> bool;

    fn method_locations(&self, _class: &str, _method: &str) -> MethodLocations {
        MethodLocations::default()
    }

    fn catchpoints(&self) -> Vec<String>;
    fn clear_catchpoints(&self);
    fn add_catchpoint(&self, class: &str);

    /// Terminate the host process, called when a launched session ends.
    fn exit(&self) {
        std::process::exit(0)
    }
}
