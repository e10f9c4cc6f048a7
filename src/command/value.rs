//! Safe projection of debuggee values into DAP variables.

use crate::command::Ctx;
use crate::engine::value::{panic_error, EvalResult, ValueKind, ValueRef};
use crate::engine::ThreadId;
use crate::error::Error;
use crate::handles::{ChildKey, Handle, Payload, ScopeKind, VariableEntry};
use itertools::Itertools;
use log::debug;
use std::panic::{self, AssertUnwindSafe};

/// Marker shown in place of a value that cannot be rendered.
pub const EVAL_ERROR: &str = "*Error in evaluation*";

/// Run a debuggee accessor, a panic is reported as an evaluation error.
pub fn safe<T>(f: impl FnOnce() -> EvalResult<T>) -> EvalResult<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(panic_error(payload.as_ref())),
    }
}

/// Value rendered for the client.
#[derive(Debug, Clone)]
pub struct Projection {
    pub value: String,
    pub type_name: Option<String>,
    pub named: Vec<String>,
    pub indexed: Vec<ChildKey>,
}

impl Projection {
    fn leaf(value: String) -> Self {
        Self {
            value,
            type_name: None,
            named: vec![],
            indexed: vec![],
        }
    }

    pub fn has_children(&self) -> bool {
        !self.named.is_empty() || !self.indexed.is_empty()
    }
}

/// Inspect a value, read its type and child keys. Never fails: every accessor that raises
/// degrades to [`EVAL_ERROR`] or to "no children". Must run on the thread owning the value.
pub fn prepare_value(value: &ValueRef) -> Projection {
    let rendered = safe(|| value.inspect()).unwrap_or_else(|e| {
        debug!(target: "dap", "inspect failed: {e}");
        EVAL_ERROR.to_string()
    });
    let type_name = safe(|| value.class_name()).ok().flatten();

    let kind = safe(|| value.kind()).ok();
    let Some(kind) = kind.filter(|k| !k.is_scalar()) else {
        return Projection {
            type_name,
            ..Projection::leaf(rendered)
        };
    };

    let mut named = safe(|| value.instance_variables()).unwrap_or_default();
    named.extend(safe(|| value.class_variables()).unwrap_or_default());

    let indexed = match kind {
        ValueKind::Array => safe(|| value.len())
            .map(|len| (0..len).map(ChildKey::Index).collect_vec())
            .unwrap_or_default(),
        ValueKind::Map => safe(|| value.keys())
            .map(|keys| keys.into_iter().map(ChildKey::Key).collect_vec())
            .unwrap_or_default(),
        _ => vec![],
    };

    Projection {
        value: rendered,
        type_name,
        named,
        indexed,
    }
}

/// Display name of a child key.
pub fn child_name(key: &ChildKey) -> String {
    match key {
        ChildKey::Name(name) => name.clone(),
        ChildKey::Index(idx) => idx.to_string(),
        ChildKey::Key(key) => safe(|| key.inspect())
            .or_else(|_| safe(|| key.to_s()))
            .unwrap_or_else(|_| "???".to_string()),
    }
}

/// Result of [`prepare_value_response`], shared by `variables` and `evaluate`.
#[derive(Debug, Clone)]
pub struct ValueResponse {
    pub value: String,
    pub type_name: Option<String>,
    pub variables_reference: Handle,
    pub named: Option<usize>,
    pub indexed: Option<usize>,
}

/// Obtain a value with `get` on the owning thread, project it and register its children.
///
/// Thread `0` means "any thread", the getter runs inline then. Evaluation failures and
/// unresponsive threads are rendered into the value string, other errors propagate.
pub fn prepare_value_response<F>(
    ctx: &Ctx,
    thread: ThreadId,
    frame: usize,
    kind: ScopeKind,
    get: F,
) -> Result<ValueResponse, Error>
where
    F: FnOnce() -> EvalResult<ValueRef> + Send + 'static,
{
    let outcome = ctx.execute_on_thread(thread, move || {
        let value = safe(get)?;
        let projection = prepare_value(&value);
        Ok((value, projection))
    });

    let (value, projection) = match outcome {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => return Ok(ValueResponse::leaf(e.to_string())),
        Err(Error::Timeout { thread, .. }) => {
            let marker = match ctx.thread_name(thread) {
                Some(name) => format!("*Thread #{thread} ({name}) unresponsive*"),
                None => format!("*Thread #{thread} unresponsive*"),
            };
            return Ok(ValueResponse::leaf(marker));
        }
        Err(e) => return Err(e),
    };

    if !projection.has_children() {
        return Ok(ValueResponse {
            type_name: projection.type_name,
            ..ValueResponse::leaf(projection.value)
        });
    }

    let named = projection.named.len();
    let indexed = projection.indexed.len();
    let reference = ctx.session.variables().insert(VariableEntry {
        thread,
        frame,
        kind,
        payload: Payload::Value {
            value,
            named: projection.named,
            indexed: projection.indexed,
        },
    });

    Ok(ValueResponse {
        value: projection.value,
        type_name: projection.type_name,
        variables_reference: reference,
        named: Some(named),
        indexed: Some(indexed),
    })
}

impl ValueResponse {
    fn leaf(value: String) -> Self {
        Self {
            value,
            type_name: None,
            variables_reference: 0,
            named: None,
            indexed: None,
        }
    }
}
