//! Diagnostics and the raised-error channel.
//!
//! `original_source/include/emerald/log.h` keeps one process-wide raised
//! error and a small set of log levels. Per the redesign note in
//! `spec.md` §9 ("Replace the singleton channel with a per-interpreter
//! context field... return a `Result<Value, Raised>`-style sum"), we drop
//! the global and thread the channel through [`crate::eval::Signal`]
//! instead: [`RaisedError`] is the payload carried by `Signal::Raised`,
//! and `catch`/`clear`/`flush` become plain methods instead of free
//! functions over hidden statics.

use std::fmt;

use log::Level;

use crate::heap::{Heap, HeapId};
use crate::position::Position;
use crate::value::Value;

/// Log verbosity, mirroring `em_log_level_t`. Exposed so the CLI can map
/// its `-li/-lw/-lf` flags onto the `log` crate's filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    #[must_use]
    pub fn to_log_level(self) -> Level {
        match self {
            Self::Info => Level::Info,
            Self::Warning => Level::Warn,
            Self::Error => Level::Error,
            Self::Fatal => Level::Error,
        }
    }
}

/// The seven builtin error classes a raise/catch can reference by name.
/// User `class` declarations can also be raised; those are represented by
/// [`ErrorClass::User`] wrapping the class's heap id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Error,
    SyntaxError,
    RuntimeError,
    SystemBreak,
    SystemContinue,
    SystemReturn,
    SystemExit,
    User(HeapId),
}

impl ErrorClass {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Error => "Error",
            Self::SyntaxError => "SyntaxError",
            Self::RuntimeError => "RuntimeError",
            Self::SystemBreak => "SystemBreak",
            Self::SystemContinue => "SystemContinue",
            Self::SystemReturn => "SystemReturn",
            Self::SystemExit => "SystemExit",
            Self::User(_) => "<class>",
        }
    }

    /// Ancestry test used by `try/catch` and `em_class_inherits`: does
    /// `self` match `target` (identity, or does self's base chain reach
    /// target)? Builtin classes form a flat hierarchy rooted at `Error`
    /// (every builtin "is-a" `Error`, matching the original's single
    /// catch-all `Error` class); `SystemExit`'s integer payload still
    /// matches only `SystemExit` itself so `exit()` can't be swallowed by
    /// a bare `catch e = Error`.
    #[must_use]
    pub fn inherits(self, target: ErrorClass, heap: &Heap) -> bool {
        if self == target {
            return true;
        }
        match (self, target) {
            (Self::User(id), Self::User(base_id)) => heap.class_inherits(id, base_id),
            (
                Self::SyntaxError | Self::RuntimeError,
                Self::Error,
            ) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A pending error: a class identity plus a formatted message, optionally
/// tied to a source position and (for `SystemExit`) an integer code.
#[derive(Debug, Clone)]
pub struct RaisedError {
    pub class: ErrorClass,
    pub message: String,
    pub pos: Option<Position>,
    /// Carried only by `SystemExit`; the process exit code.
    pub exit_code: Option<i32>,
    /// Carried only by `raise` of a user class instance, so `try/catch`
    /// can rebind the exact instance value rather than re-instantiating.
    pub instance: Option<Value>,
}

impl RaisedError {
    #[must_use]
    pub fn new(class: ErrorClass, message: impl Into<String>, pos: Option<Position>) -> Self {
        Self {
            class,
            message: message.into(),
            pos,
            exit_code: None,
            instance: None,
        }
    }

    #[must_use]
    pub fn runtime(message: impl Into<String>, pos: &Position) -> Self {
        Self::new(ErrorClass::RuntimeError, message, Some(pos.clone()))
    }

    #[must_use]
    pub fn syntax(message: impl Into<String>, pos: &Position) -> Self {
        Self::new(ErrorClass::SyntaxError, message, Some(pos.clone()))
    }

    #[must_use]
    pub fn exit(code: i32) -> Self {
        Self {
            class: ErrorClass::SystemExit,
            message: format!("SystemExit({code})"),
            pos: None,
            exit_code: Some(code),
            instance: None,
        }
    }

    /// Render as the top-level flush format from `em_log_verror`:
    /// `Error (File 'P', Line L, Column C):\n  MESSAGE\n -> offending source line`
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(pos) = &self.pos {
            out.push_str(&format!(
                "{} (File '{}', Line {}, Column {}):\n  {}",
                self.class, pos.path, pos.line, pos.column, self.message
            ));
            if let Some(line) = pos.current_line_text() {
                out.push_str(&format!("\n -> {line}"));
            }
        } else {
            out.push_str(&format!("{}: {}", self.class, self.message));
        }
        out
    }
}

impl fmt::Display for RaisedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

impl std::error::Error for RaisedError {}
