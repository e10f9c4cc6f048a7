//! Values observed in the debuggee.

use std::fmt::{self, Debug};
use std::sync::Arc;

/// Shared reference to a captured debuggee value.
pub type ValueRef = Arc<dyn DebugValue>;

pub type EvalResult<T> = Result<T, EvalError>;

/// An error raised by the debuggee while evaluating an expression or an accessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalError {
    pub message: String,
    /// Class of the raised error, if known.
    pub class: Option<String>,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            class: None,
        }
    }

    pub fn with_class(message: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            class: Some(class.into()),
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.class {
            Some(class) => write!(f, "{} ({class})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for EvalError {}

/// Turn a panic payload caught while running debuggee code into an evaluation error.
pub(crate) fn panic_error(payload: &(dyn std::any::Any + Send)) -> EvalError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    EvalError::with_class(message, "panic")
}

/// Coarse classification of a value, used to decide whether it has children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Nil,
    Boolean,
    String,
    Symbol,
    Number,
    Time,
    Range,
    Date,
    Array,
    Map,
    Object,
}

impl ValueKind {
    /// Scalars never expose children.
    pub fn is_scalar(self) -> bool {
        !matches!(self, ValueKind::Array | ValueKind::Map | ValueKind::Object)
    }
}

/// A value living in the debuggee.
///
/// Every accessor may fail (the debuggee raised) or even panic, callers must guard them
/// (see [`crate::command::value::safe`]).
pub trait DebugValue: Debug + Send + Sync {
    fn kind(&self) -> EvalResult<ValueKind>;

    /// Debug representation of the value.
    fn inspect(&self) -> EvalResult<String>;

    /// Plain string conversion, used as a fallback for [`DebugValue::inspect`].
    fn to_s(&self) -> EvalResult<String>;

    fn class_name(&self) -> EvalResult<Option<String>>;

    fn instance_variables(&self) -> EvalResult<Vec<String>> {
        Ok(vec![])
    }

    fn class_variables(&self) -> EvalResult<Vec<String>> {
        Ok(vec![])
    }

    /// Read a named member (as returned by [`DebugValue::instance_variables`] or
    /// [`DebugValue::class_variables`]).
    fn member(&self, name: &str) -> EvalResult<ValueRef>;

    /// Number of elements of an array-like value.
    fn len(&self) -> EvalResult<usize> {
        Ok(0)
    }

    fn index(&self, idx: usize) -> EvalResult<ValueRef> {
        Err(EvalError::new(format!("index {idx} out of range")))
    }

    /// Keys of a map-like value.
    fn keys(&self) -> EvalResult<Vec<ValueRef>> {
        Ok(vec![])
    }

    fn get(&self, key: &ValueRef) -> EvalResult<ValueRef>;

    // exception accessors, meaningful only for raised errors

    fn message(&self) -> EvalResult<Option<String>> {
        Ok(None)
    }

    fn backtrace(&self) -> EvalResult<Vec<String>> {
        Ok(vec![])
    }

    fn cause(&self) -> EvalResult<Option<ValueRef>> {
        Ok(None)
    }
}
