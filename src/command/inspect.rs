//! Read-only inspection commands.

use crate::command::value::{prepare_value_response, safe, EVAL_ERROR};
use crate::command::Ctx;
use crate::engine::value::{EvalError, ValueRef};
use crate::error::Error;
use crate::handles::{FrameEntry, Payload, ScopeKind, VariableEntry};
use crate::protocol::{
    EvaluateArguments, EvaluateResponseBody, ExceptionDetails, ExceptionInfoResponseBody, Scope,
    ScopesArguments, Source, SourceArguments, StackFrame, StackTraceArguments, Thread,
    ThreadArguments, Variable, VariablesArguments,
};
use itertools::Itertools;
use serde_json::json;
use std::io;

pub(super) fn threads(ctx: &Ctx) -> Result<(), Error> {
    ctx.started()?;

    let threads = ctx
        .engine()
        .contexts()
        .into_iter()
        .map(|c| Thread {
            id: c.id,
            name: c.display_name(),
        })
        .collect_vec();
    ctx.respond(json!({ "threads": threads }))
}

pub(super) fn stack_trace(ctx: &Ctx) -> Result<(), Error> {
    ctx.started()?;
    let args: StackTraceArguments = ctx.args()?;
    let thread = ctx.find_thread(args.thread_id)?;

    let first = args.start_frame.unwrap_or(0);
    let last = match args.levels {
        Some(levels) if levels > 0 => first.saturating_add(levels).min(thread.stack_size),
        _ => thread.stack_size,
    };

    let mut frames = Vec::with_capacity(last.saturating_sub(first));
    for i in first..last {
        let frame = ctx.engine().frame(thread.id, i)?;
        frames.push(StackFrame {
            id: ctx.session.frames().insert(FrameEntry {
                thread: thread.id,
                frame: i,
            }),
            name: frame.name,
            source: Source::from_path(&frame.file),
            line: frame.line,
            column: 0,
        });
    }

    ctx.respond(json!({
        "stackFrames": frames,
        "totalFrames": thread.stack_size,
    }))
}

pub(super) fn scopes(ctx: &Ctx) -> Result<(), Error> {
    ctx.started()?;
    let args: ScopesArguments = ctx.args()?;
    let (_, thread, frame) = ctx.resolve_frame_id(args.frame_id)?;
    let scope = ctx.engine().frame_scope(thread, frame)?;

    let arguments = scope.argument_names().into_iter().sorted().collect_vec();

    let mut locals = scope
        .local_names()
        .into_iter()
        .filter(|name| !arguments.contains(name))
        .collect_vec();
    if !scope.is_top_level() {
        locals.push("self".to_string());
    }
    let processor = ctx.session.processor(thread);
    if processor.last_exception().is_some() {
        locals.push("$!".to_string());
    }
    if frame == 0 && processor.last_return().is_some() {
        locals.push("%return".to_string());
    }
    locals.sort();

    let globals = ctx.engine().global_names().into_iter().sorted().collect_vec();

    let mut scopes = vec![];
    let mut add = |name: &str, kind: ScopeKind, names: Vec<String>, expensive: bool| {
        if names.is_empty() {
            return;
        }
        let count = names.len();
        let reference = ctx.session.variables().insert(VariableEntry {
            thread,
            frame,
            kind,
            payload: Payload::Names(names),
        });
        scopes.push(Scope {
            name: name.to_string(),
            presentation_hint: kind.to_string(),
            variables_reference: reference,
            named_variables: count,
            indexed_variables: 0,
            expensive,
        });
    };
    add("Arguments", ScopeKind::Arguments, arguments, false);
    add("Locals", ScopeKind::Locals, locals, false);
    add("Globals", ScopeKind::Globals, globals, true);

    ctx.respond(json!({ "scopes": scopes }))
}

pub(super) fn variables(ctx: &Ctx) -> Result<(), Error> {
    ctx.started()?;
    let args: VariablesArguments = ctx.args()?;
    let resolved = ctx.resolve_variables_reference(args.variables_reference)?;

    let (named, indexed) = match args.filter.as_deref() {
        Some("named") => (resolved.named, vec![]),
        Some("indexed") => (vec![], resolved.indexed),
        _ => (resolved.named, resolved.indexed),
    };
    let vars = named.into_iter().chain(indexed).collect_vec();

    let first = args.start.unwrap_or(0).min(vars.len());
    let last = match args.count {
        Some(count) if count > 0 => first.saturating_add(count).min(vars.len()),
        _ => vars.len(),
    };

    let mut variables = Vec::with_capacity(last - first);
    for (name, get) in vars.into_iter().skip(first).take(last - first) {
        let response = prepare_value_response(
            ctx,
            resolved.thread,
            resolved.frame,
            ScopeKind::Variable,
            move || get(),
        )?;
        variables.push(Variable {
            name,
            value: response.value,
            r#type: response.type_name,
            variables_reference: response.variables_reference,
            named_variables: response.named,
            indexed_variables: response.indexed,
        });
    }

    ctx.respond(json!({ "variables": variables }))
}

pub(super) fn evaluate(ctx: &Ctx) -> Result<(), Error> {
    ctx.started()?;
    let args: EvaluateArguments = ctx.args()?;
    let expression = args.expression;

    let response = match args.frame_id {
        None => {
            let engine = ctx.engine().clone();
            prepare_value_response(ctx, 0, 0, ScopeKind::Evaluate, move || {
                engine.eval_global(&expression)
            })?
        }
        Some(id) => {
            let (_, thread, frame) = ctx.resolve_frame_id(Some(id))?;
            let scope = ctx.engine().frame_scope(thread, frame)?;
            prepare_value_response(ctx, thread, frame, ScopeKind::Evaluate, move || {
                scope.eval(&expression)
            })?
        }
    };

    ctx.respond(EvaluateResponseBody {
        result: response.value,
        r#type: response.type_name,
        variables_reference: response.variables_reference,
        named_variables: response.named,
        indexed_variables: response.indexed,
    })
}

fn exception_description(ex: &ValueRef) -> String {
    let message = safe(|| ex.message()).ok().flatten();
    let class = safe(|| ex.class_name()).ok().flatten();
    match (message, class) {
        (Some(message), Some(class)) => format!("{message} ({class})"),
        (Some(message), None) => message,
        _ => EVAL_ERROR.to_string(),
    }
}

fn exception_details(ex: &ValueRef, evaluate_name: String) -> ExceptionDetails {
    let class_name = safe(|| ex.class_name()).ok().flatten();
    let type_name = class_name
        .as_deref()
        .and_then(|name| name.rsplit("::").next())
        .map(ToOwned::to_owned);
    let inner = safe(|| ex.cause()).ok().flatten();

    ExceptionDetails {
        message: safe(|| ex.message()).ok().flatten(),
        type_name,
        full_type_name: class_name,
        stack_trace: safe(|| ex.backtrace()).unwrap_or_default().join("\n"),
        inner_exception: inner
            .map(|inner| vec![exception_details(&inner, format!("{evaluate_name}.cause"))])
            .unwrap_or_default(),
        evaluate_name,
    }
}

pub(super) fn exception_info(ctx: &Ctx) -> Result<(), Error> {
    ctx.started()?;
    let args: ThreadArguments = ctx.args()?;
    let thread = ctx.find_thread(args.thread_id)?;

    let Some(ex) = ctx.session.processor(thread.id).last_exception() else {
        return Err(Error::InvalidArgument(
            "Not in a catchpoint context".to_string(),
        ));
    };

    let body = ctx.execute_on_thread(thread.id, move || {
        Ok::<_, EvalError>(ExceptionInfoResponseBody {
            exception_id: safe(|| ex.class_name())
                .ok()
                .flatten()
                .unwrap_or_else(|| "Unknown".to_string()),
            description: exception_description(&ex),
            break_mode: "always",
            details: exception_details(&ex, "$!".to_string()),
        })
    })??;

    ctx.respond(body)
}

pub(super) fn source(ctx: &Ctx) -> Result<(), Error> {
    let args: SourceArguments = ctx.args()?;
    let path = args.source.path.ok_or(Error::MissingArgument("source path"))?;

    match std::fs::read_to_string(&path) {
        Ok(content) => ctx.respond(json!({ "content": content })),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NoSource(path)),
        Err(_) => Err(Error::UnreadableSource(path)),
    }
}
