use thiserror::Error;

/// Stable status codes returned across the FFI boundary.
///
/// Values and meanings are fixed by the external interface; do not renumber.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok = 0,
    GeneralError = 1000,
    AlreadyRunning = 1001,
    ShouldQuitUnexpected = 1002,
    NotRunning = 1003,
    StopFailed = 1004,
    InvalidArguments = 1005,
    BufferNotEmpty = 1006,
    PrivilegeDenied = 1007,
}

impl From<StatusCode> for i32 {
    fn from(code: StatusCode) -> Self {
        code as i32
    }
}

/// Internal error type threaded through the core with `?`. The FFI shim is the
/// only place that collapses this down to a bare `StatusCode`. Variants map
/// one-to-one onto the status codes of section 6 rather than collapsing
/// through a generic "state" bucket, so the shim's `status_code()` call never
/// has to re-derive which specific precondition failed from a message string.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid argument: {context}")]
    Argument { context: String },

    /// Internal invariant violations not named by the public status table
    /// (e.g. misuse of a type outside its documented lifecycle).
    #[error("invalid state: {context}")]
    Internal { context: String },

    #[error("already running: {context}")]
    AlreadyRunning { context: String },

    #[error("not running: {context}")]
    NotRunning { context: String },

    #[error("stop failed: {context}")]
    StopFailed { context: String },

    #[error("should-stop predicate unexpectedly false at loop exit: {context}")]
    ShouldQuitUnexpected { context: String },

    #[error("privilege check failed: {context}")]
    Privilege { context: String },

    #[error("resource error: {context}")]
    Resource { context: String },

    #[error("handler error: {context}")]
    Handler { context: String },
}

impl CoreError {
    pub fn argument(context: impl Into<String>) -> Self {
        CoreError::Argument { context: context.into() }
    }

    pub fn internal(context: impl Into<String>) -> Self {
        CoreError::Internal { context: context.into() }
    }

    pub fn already_running(context: impl Into<String>) -> Self {
        CoreError::AlreadyRunning { context: context.into() }
    }

    pub fn not_running(context: impl Into<String>) -> Self {
        CoreError::NotRunning { context: context.into() }
    }

    pub fn stop_failed(context: impl Into<String>) -> Self {
        CoreError::StopFailed { context: context.into() }
    }

    pub fn should_quit_unexpected(context: impl Into<String>) -> Self {
        CoreError::ShouldQuitUnexpected { context: context.into() }
    }

    pub fn privilege(context: impl Into<String>) -> Self {
        CoreError::Privilege { context: context.into() }
    }

    pub fn resource(context: impl Into<String>) -> Self {
        CoreError::Resource { context: context.into() }
    }

    pub fn handler(context: impl Into<String>) -> Self {
        CoreError::Handler { context: context.into() }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::Argument { .. } => StatusCode::InvalidArguments,
            CoreError::Internal { .. } => StatusCode::GeneralError,
            CoreError::AlreadyRunning { .. } => StatusCode::AlreadyRunning,
            CoreError::NotRunning { .. } => StatusCode::NotRunning,
            CoreError::StopFailed { .. } => StatusCode::StopFailed,
            CoreError::ShouldQuitUnexpected { .. } => StatusCode::ShouldQuitUnexpected,
            CoreError::Privilege { .. } => StatusCode::PrivilegeDenied,
            CoreError::Resource { .. } => StatusCode::GeneralError,
            CoreError::Handler { .. } => StatusCode::GeneralError,
        }
    }
}

impl From<CoreError> for i32 {
    fn from(err: CoreError) -> Self {
        err.status_code().into()
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
