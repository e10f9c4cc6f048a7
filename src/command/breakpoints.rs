//! Breakpoint management commands.

use crate::breakpoint::{
    compile_condition, compile_hit_condition, parse_method_identifier, Breakpoint, BreakpointDiff,
    HitCondition, Location,
};
use crate::command::Ctx;
use crate::engine::SourceLocation;
use crate::error::Error;
use crate::protocol::{
    Breakpoint as ProtocolBreakpoint, BreakpointLocationsArguments, SetBreakpointsArguments,
    SetExceptionBreakpointsArguments, SetFunctionBreakpointsArguments, Source,
};
use itertools::Itertools;
use serde_json::json;
use std::path::{Path, PathBuf};

/// Resolve a client path into a readable file.
fn can_read_file(path: Option<&str>) -> Result<PathBuf, Error> {
    let path = path.ok_or(Error::MissingArgument("source path"))?;
    let real = std::fs::canonicalize(path).map_err(|_| Error::NoSource(path.to_string()))?;
    if std::fs::File::open(&real).is_err() {
        return Err(Error::UnreadableSource(real.display().to_string()));
    }
    Ok(real)
}

fn potential_lines(ctx: &Ctx, path: &Path) -> Result<Vec<u32>, Error> {
    ctx.engine().breakpoint_lines(path).map_err(|e| {
        log::debug!(target: "dap", "resolve breakpoint lines of {}: {e:#}", path.display());
        Error::InvalidArgument(format!(
            "Failed to resolve breakpoints for {}",
            path.display()
        ))
    })
}

/// Compile client conditions up front, so a bad condition leaves breakpoints untouched.
fn compile(
    condition: Option<&str>,
    hit_condition: Option<&str>,
) -> Result<(Option<String>, HitCondition), Error> {
    let hit = compile_hit_condition(hit_condition).map_err(|e| Error::InvalidArgument(e.to_string()))?;
    Ok((compile_condition(condition), hit))
}

/// Apply conditions to a confirmed breakpoint, both in the engine and in the diff.
fn apply_conditions(
    ctx: &Ctx,
    diff: &mut BreakpointDiff,
    mut bp: Breakpoint,
    condition: Option<String>,
    hit_condition: HitCondition,
) -> Result<Breakpoint, Error> {
    ctx.engine()
        .update_breakpoint(bp.id, condition.clone(), hit_condition)?;
    bp.condition = condition;
    bp.hit_condition = hit_condition;
    diff.update(bp.clone());
    Ok(bp)
}

pub(super) fn set_breakpoints(ctx: &Ctx) -> Result<(), Error> {
    let args: SetBreakpointsArguments = ctx.args()?;
    let path = can_read_file(args.source.path.as_deref())?;
    let source = Source::from_path(&path);

    let existing = ctx
        .engine()
        .breakpoints()
        .into_iter()
        .filter(|bp| matches!(&bp.location, Location::Line { source, .. } if *source == path))
        .collect_vec();

    if args.lines.is_empty() && args.breakpoints.is_empty() {
        ctx.session.clear_breakpoints(&existing);
        return ctx.respond(json!({ "breakpoints": [] }));
    }

    let lines = potential_lines(ctx, &path)?;
    let compiled = args
        .breakpoints
        .iter()
        .map(|rq| compile(rq.condition.as_deref(), rq.hit_condition.as_deref()))
        .collect::<Result<Vec<_>, _>>()?;

    let location = |line: u32| Location::Line {
        source: path.clone(),
        line,
    };
    let unverified = |line: u32| ProtocolBreakpoint {
        verified: false,
        message: Some(format!("Line {line} is not a valid breakpoint location")),
        source: Some(source.clone()),
        line: Some(line),
        ..Default::default()
    };
    let verified = |bp: &Breakpoint, line: u32| ProtocolBreakpoint {
        id: Some(bp.id),
        verified: true,
        source: Some(source.clone()),
        line: Some(line),
        ..Default::default()
    };

    let mut diff = BreakpointDiff::new(existing);
    let mut results = vec![];

    for &line in &args.lines {
        if !lines.contains(&line) {
            results.push(unverified(line));
            continue;
        }
        let bp = diff.find_or_add(&location(line), |loc| ctx.engine().add_breakpoint(loc))?;
        results.push(verified(&bp, line));
    }

    for (rq, (condition, hit_condition)) in args.breakpoints.iter().zip(compiled) {
        if !lines.contains(&rq.line) {
            results.push(unverified(rq.line));
            continue;
        }
        let bp = diff.find_or_add(&location(rq.line), |loc| ctx.engine().add_breakpoint(loc))?;
        let bp = apply_conditions(ctx, &mut diff, bp, condition, hit_condition)?;
        ctx.session.set_log_point(bp.id, rq.log_message.as_deref());
        results.push(verified(&bp, rq.line));
    }

    let (_, stale) = diff.finish();
    ctx.session.clear_breakpoints(&stale);

    ctx.respond(json!({ "breakpoints": results }))
}

fn method_breakpoint(bp: &Breakpoint, at: Option<SourceLocation>) -> ProtocolBreakpoint {
    ProtocolBreakpoint {
        id: Some(bp.id),
        verified: true,
        source: at.as_ref().map(|(file, _)| Source::from_path(file)),
        line: at.map(|(_, line)| line),
        ..Default::default()
    }
}

pub(super) fn set_function_breakpoints(ctx: &Ctx) -> Result<(), Error> {
    let args: SetFunctionBreakpointsArguments = ctx.args()?;

    let existing = ctx
        .engine()
        .breakpoints()
        .into_iter()
        .filter(|bp| bp.location.is_method())
        .collect_vec();

    let compiled = args
        .breakpoints
        .iter()
        .map(|rq| compile(rq.condition.as_deref(), rq.hit_condition.as_deref()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut diff = BreakpointDiff::new(existing);
    let mut results = vec![];

    for (rq, (condition, hit_condition)) in args.breakpoints.iter().zip(compiled) {
        let Some(location) = parse_method_identifier(&rq.name) else {
            results.push(ProtocolBreakpoint {
                verified: false,
                message: Some(format!("'{}' is not a valid method identifier", rq.name)),
                ..Default::default()
            });
            continue;
        };

        let bp = diff.find_or_add(&location, |loc| ctx.engine().add_breakpoint(loc))?;
        let bp = apply_conditions(ctx, &mut diff, bp, condition, hit_condition)?;

        let Location::Method { class, method } = &bp.location else {
            continue;
        };
        let found = ctx.engine().method_locations(class, method);
        match (found.class_method, found.instance_method) {
            (None, None) => results.push(method_breakpoint(&bp, None)),
            (class_method, instance_method) => {
                results.extend(
                    [class_method, instance_method]
                        .into_iter()
                        .flatten()
                        .map(|at| method_breakpoint(&bp, Some(at))),
                );
            }
        }
    }

    let (_, stale) = diff.finish();
    ctx.session.clear_breakpoints(&stale);

    ctx.respond(json!({ "breakpoints": results }))
}

pub(super) fn set_exception_breakpoints(ctx: &Ctx) -> Result<(), Error> {
    let args: SetExceptionBreakpointsArguments = ctx.args()?;

    ctx.engine().clear_catchpoints();
    for filter in &args.filters {
        match filter.as_str() {
            "all" => ctx.engine().add_catchpoint("Exception"),
            unknown => log::debug!(target: "dap", "unknown exception filter '{unknown}'"),
        }
    }

    ctx.respond_empty()
}

pub(super) fn breakpoint_locations(ctx: &Ctx) -> Result<(), Error> {
    let args: BreakpointLocationsArguments = ctx.args()?;
    let path = can_read_file(args.source.path.as_deref())?;
    let lines = potential_lines(ctx, &path)?;

    let end = args.end_line.unwrap_or(args.line);
    let found = lines
        .into_iter()
        .filter(|l| (args.line..=end).contains(l))
        .sorted()
        .dedup()
        .map(|line| json!({ "line": line }))
        .collect_vec();

    ctx.respond(json!({ "breakpoints": found }))
}
