use anyhow::Context;
use std::fs::OpenOptions;
use std::path::Path;

/// Install the global logger.
///
/// Filters come from `RUST_LOG`, `info` by default. With a log file the output goes there,
/// otherwise to stderr: stdout may carry the protocol itself.
pub fn init(log_file: Option<&Path>) -> anyhow::Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.target(env_logger::Target::Stderr);

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init().context("install logger")
}
