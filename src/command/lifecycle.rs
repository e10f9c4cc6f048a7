use crate::command::Ctx;
use crate::engine::Mode;
use crate::error::Error;
use crate::protocol::{Event, LaunchArguments};
use crate::session::SessionState;
use serde_json::json;

pub(super) fn initialize(ctx: &Ctx) -> Result<(), Error> {
    ctx.session.set_state(SessionState::Initializing);
    ctx.respond(json!({
        "supportsConfigurationDoneRequest": true,
        "supportsFunctionBreakpoints": true,
        "supportsConditionalBreakpoints": true,
        "supportsHitConditionalBreakpoints": true,
        "supportsLogPoints": true,
        "supportsBreakpointLocationsRequest": true,
        "supportsDelayedStackTraceLoading": true,
        "supportsExceptionInfoRequest": true,
        "exceptionBreakpointFilters": [
            { "filter": "all", "label": "Exceptions" }
        ],
    }))?;
    ctx.event(Event::Initialized)
}

pub(super) fn launch(ctx: &Ctx) -> Result<(), Error> {
    ctx.stopped()?;
    let args: LaunchArguments = ctx.args()?;
    if !args.no_debug.unwrap_or(false) {
        ctx.session.start(Mode::Launched)?;
    }
    ctx.session.set_state(SessionState::Configuring);
    ctx.respond_empty()
}

pub(super) fn attach(ctx: &Ctx) -> Result<(), Error> {
    ctx.stopped()?;
    ctx.session.start(Mode::Attached)?;
    ctx.session.set_state(SessionState::Configuring);
    ctx.respond_empty()
}

pub(super) fn configuration_done(ctx: &Ctx) -> Result<(), Error> {
    ctx.respond_empty()?;
    ctx.session.set_state(SessionState::Running);
    ctx.session.configured();
    Ok(())
}

pub(super) fn disconnect(ctx: &Ctx) -> Result<(), Error> {
    ctx.session.set_state(SessionState::Terminating);
    // the client may already be gone, teardown happens regardless
    let result = ctx.respond_empty();
    ctx.session.stop();
    result
}
