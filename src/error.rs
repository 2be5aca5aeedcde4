//! Error kinds for the transfer protocol (spec §7).
//!
//! The framework distinguishes two failure classes: [`LogicError`] for
//! programmer misuse, surfaced synchronously and never captured, and
//! [`RuntimeError`] for transient I/O failures, which are captured into an
//! accessor's `activeException` slot and re-thrown by `postXxx`.

use snafu::Snafu;

/// Programmer-misuse errors: unsupported access-mode flags, out-of-range
/// offsets, type mismatches on a shared target, writes to read-only
/// registers. Never recovered; the caller must fix the call.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum LogicError {
    #[snafu(display("register '{path}' does not support access mode {flag}"))]
    UnsupportedAccessMode { path: String, flag: &'static str },

    #[snafu(display("window [{offset}, {offset}+{length}) is out of range for '{path}' ({size} elements)"))]
    OutOfRange {
        path: String,
        offset: usize,
        length: usize,
        size: usize,
    },

    #[snafu(display("register '{path}' is read-only"))]
    ReadOnly { path: String },

    #[snafu(display("register '{path}' is write-only"))]
    WriteOnly { path: String },

    #[snafu(display(
        "shared target state for '{path}' was already created with a different UserType"
    ))]
    TypeMismatch { path: String },

    #[snafu(display("unknown logical register '{path}'"))]
    UnknownRegister { path: String },

    #[snafu(display("unknown plugin '{name}' for register '{path}'"))]
    UnknownPlugin { path: String, name: String },

    #[snafu(display("could not parse parameter '{name}' for plugin '{plugin}': {reason}"))]
    BadParameter {
        plugin: String,
        name: String,
        reason: String,
    },

    #[snafu(display("operation is not supported: {reason}"))]
    Unsupported { reason: String },

    #[snafu(display("malformed device descriptor: {reason}"))]
    BadDescriptor { reason: String },
}

/// Transient I/O failures: device closed, EIO, shm lock contention, an event
/// file that vanished. Captured into `activeException`; once set, the owning
/// backend is in "exception" state until the next successful `open()`.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum RuntimeError {
    #[snafu(display("{message}"))]
    Generic { message: String },

    #[snafu(display("backend is in exception state: {message}"))]
    InException { message: String },

    #[snafu(display("I/O error accessing '{path}': {message}"))]
    Io { path: String, message: String },

    #[snafu(display("read was interrupted"))]
    Interrupted,
}

impl RuntimeError {
    pub fn generic(message: impl Into<String>) -> Self {
        RuntimeError::Generic {
            message: message.into(),
        }
    }
}

/// Top-level error type returned from the public API. A `postXxx` call
/// either consumes an `activeException` and clears it, or re-throws it as
/// this variant; `Logic` errors never pass through `activeException`.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[snafu(display("{source}"))]
    Logic { source: LogicError },

    #[snafu(display("{source}"))]
    Runtime { source: RuntimeError },
}

impl From<LogicError> for DeviceError {
    fn from(source: LogicError) -> Self {
        DeviceError::Logic { source }
    }
}

impl From<RuntimeError> for DeviceError {
    fn from(source: RuntimeError) -> Self {
        DeviceError::Runtime { source }
    }
}

pub type LogicResult<T> = Result<T, LogicError>;
pub type RuntimeResult<T> = Result<T, RuntimeError>;
pub type DeviceResult<T> = Result<T, DeviceError>;
