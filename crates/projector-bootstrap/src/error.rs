use thiserror::Error;

use crate::bridge::CANNOT_LOAD_MODULE;

/// Outcome reported to the host by every public bootstrap operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The operation completed
    Success,
    /// The operation failed; the last-error slot holds the diagnostic
    Error,
    /// Cancellation was observed at a guard boundary
    Terminated,
}

/// The prelude or the factory returned a value of the wrong shape
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("prelude did not return a value")]
    PreludeNoValue,
    #[error("prelude must return a function")]
    PreludeNotCallable,
    #[error("factory did not return a value")]
    FactoryNoValue,
    #[error("factory must return an object")]
    FactoryNotObject,
    #[error("prelude has not been compiled")]
    PreludeNotCompiled,
    #[error("prelude has not produced a template factory")]
    FactoryMissing,
}

/// Script failed to compile
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CompileError {
    /// Diagnostic name the source was compiled under
    pub name: String,
    /// Compiler message
    pub message: String,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Contract(#[from] ContractViolation),

    /// Exception raised while script code ran, rendered to text
    #[error("{0}")]
    Script(String),

    /// A module requested through `load_module` could not be provided
    #[error("{0}")]
    Resolution(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("execution terminated")]
    Terminated,
}

impl BootstrapError {
    pub fn status(&self) -> Status {
        match self {
            BootstrapError::Terminated => Status::Terminated,
            _ => Status::Error,
        }
    }

    /// Wrap an error raised while script code was running.
    ///
    /// Resolution failures raised by the bridge keep their own variant.
    pub fn script(err: &mlua::Error) -> Self {
        let message = render_script_error(err);
        if message == CANNOT_LOAD_MODULE {
            return BootstrapError::Resolution(message);
        }
        BootstrapError::Script(message)
    }

    /// Wrap an error raised by the engine outside of script code
    pub(crate) fn engine(err: mlua::Error) -> Self {
        BootstrapError::Engine(render_script_error(&err))
    }
}

impl<T> From<&Result<T, BootstrapError>> for Status {
    fn from(result: &Result<T, BootstrapError>) -> Self {
        match result {
            Ok(_) => Status::Success,
            Err(e) => e.status(),
        }
    }
}

/// Render an engine error down to the message that was originally raised.
///
/// Errors raised by native callbacks reach the host wrapped in one callback
/// layer per Lua frame they crossed, and Lua errors carry a stack traceback.
/// Neither belongs in the last-error slot.
pub fn render_script_error(err: &mlua::Error) -> String {
    match innermost(err) {
        mlua::Error::RuntimeError(message) => strip_traceback(message).to_string(),
        mlua::Error::SyntaxError { message, .. } => strip_traceback(message).to_string(),
        mlua::Error::MemoryError(message) => strip_traceback(message).to_string(),
        mlua::Error::ExternalError(inner) => inner.to_string(),
        other => strip_traceback(&other.to_string()).to_string(),
    }
}

fn innermost(err: &mlua::Error) -> &mlua::Error {
    match err {
        mlua::Error::CallbackError { cause, .. } => innermost(cause),
        mlua::Error::WithContext { cause, .. } => innermost(cause),
        other => other,
    }
}

fn strip_traceback(message: &str) -> &str {
    match message.find("\nstack traceback:") {
        Some(index) => &message[..index],
        None => message,
    }
}
