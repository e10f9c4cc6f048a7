use crate::engine::value::EvalError;
use crate::engine::ThreadId;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- request argument errors -----------------------------------
    #[error("Invalid command")]
    UnknownCommand(String),
    #[error("Argument is unspecified: {0}")]
    MissingArgument(&'static str),
    #[error("{0}")]
    InvalidArgument(String),

    // --------------------------------- referenced entity not found -------------------------------
    #[error("Cannot locate {scope} #{value}")]
    MissingEntry { scope: &'static str, value: i64 },
    #[error("Cannot locate thread #{0}")]
    MissingThread(ThreadId),
    #[error("Cannot locate frame #{0}")]
    MissingFrame(usize),
    #[error("Error resolving {scope}: {value}")]
    InvalidEntry { scope: &'static str, value: String },

    // --------------------------------- debugger state errors -------------------------------------
    #[error("Cannot {0} - debugger is not running")]
    NotStarted(String),
    #[error("Cannot {0} - debugger is already running")]
    AlreadyStarted(String),
    #[error("Debugger on thread #{thread} is not responding")]
    Timeout {
        thread: ThreadId,
        name: Option<String>,
    },

    // --------------------------------- debuggee errors -------------------------------------------
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error("No source file available for '{0}'")]
    NoSource(String),
    #[error("Source file '{0}' exists but cannot be read")]
    UnreadableSource(String),

    // --------------------------------- transport errors ------------------------------------------
    #[error("client disconnected: {0}")]
    Disconnected(#[source] io::Error),
    #[error(transparent)]
    Io(io::Error),
    #[error("malformed message: {0}")]
    Protocol(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    // --------------------------------- unclassified errors ---------------------------------------
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => Error::Disconnected(e),
            _ => Error::Io(e),
        }
    }
}

impl Error {
    /// Return a hint to the session loop - the client is gone and the session must end.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::Disconnected(_))
    }

    /// Return true for errors with no user facing meaning.
    pub fn is_internal(&self) -> bool {
        match self {
            Error::UnknownCommand(_)
            | Error::MissingArgument(_)
            | Error::InvalidArgument(_)
            | Error::MissingEntry { .. }
            | Error::MissingThread(_)
            | Error::MissingFrame(_)
            | Error::InvalidEntry { .. }
            | Error::NotStarted(_)
            | Error::AlreadyStarted(_)
            | Error::Timeout { .. }
            | Error::Eval(_)
            | Error::NoSource(_)
            | Error::UnreadableSource(_)
            | Error::Disconnected(_) => false,

            Error::Io(_)
            | Error::Protocol(_)
            | Error::Json(_)
            | Error::Internal(_) => true,
        }
    }

    /// Message of the failed response sent to the client.
    pub fn response_message(&self) -> String {
        if self.is_internal() {
            return "An internal error occurred".to_string();
        }
        self.to_string()
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "dap", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "dap", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
