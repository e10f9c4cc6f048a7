//! Contextual commands: resume, step and pause a thread.

use crate::command::{Ctx, Signal};
use crate::engine::StepKind;
use crate::error::Error;
use crate::processor::{CommandProcessor, ProcessorState, StopCause};
use log::debug;

pub(super) fn resume(ctx: &Ctx, _: &CommandProcessor) -> Result<Signal, Error> {
    ctx.respond_empty()?;
    Ok(Signal::Resume)
}

fn step(ctx: &Ctx, processor: &CommandProcessor, kind: StepKind) -> Result<Signal, Error> {
    ctx.engine().step(processor.thread(), kind)?;
    ctx.respond_empty()?;
    Ok(Signal::Resume)
}

pub(super) fn step_over(ctx: &Ctx, processor: &CommandProcessor) -> Result<Signal, Error> {
    step(ctx, processor, StepKind::Over)
}

pub(super) fn step_in(ctx: &Ctx, processor: &CommandProcessor) -> Result<Signal, Error> {
    step(ctx, processor, StepKind::Into)
}

pub(super) fn step_out(ctx: &Ctx, processor: &CommandProcessor) -> Result<Signal, Error> {
    step(ctx, processor, StepKind::Out)
}

/// Make the next step stop of the thread report a pause. A thread whose current stop is
/// already the reported pause (the request was forwarded before the interrupt landed) is
/// left alone, otherwise the following step would be reported as a pause too.
pub(super) fn pause(ctx: &Ctx, processor: &CommandProcessor) -> Result<Signal, Error> {
    if processor.last_stop() == Some(StopCause::Pause) {
        debug!(target: "dap", "thread #{} is already paused", processor.thread());
    } else {
        processor.request_pause();
    }
    ctx.respond_empty()?;
    Ok(Signal::Stay)
}

/// Queue the request on the thread, the thread responds once it picks the request up. A
/// running thread takes it on its next stop.
pub(super) fn forward(ctx: &Ctx, processor: &CommandProcessor) -> Result<(), Error> {
    processor.forward(ctx.request.clone(), ctx.session.eval_timeout())
}

/// Interrupt a running thread, then queue the request as any other. The stop caused by the
/// interrupt reports a pause.
pub(super) fn forward_pause(ctx: &Ctx, processor: &CommandProcessor) -> Result<(), Error> {
    if processor.state() == ProcessorState::Running {
        processor.request_pause();
        ctx.engine().interrupt(processor.thread())?;
    }
    forward(ctx, processor)
}
