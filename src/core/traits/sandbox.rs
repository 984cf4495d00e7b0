use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::extractor::SourceUnit;

/// Builds invocable sessions out of untrusted source text.
///
/// `open` is called on the worker thread that will own the session, so
/// sessions do not have to be `Send`.
#[mockall::automock]
pub trait Sandbox: std::fmt::Debug + Send + Sync {
    fn open(
        &self,
        unit: &SourceUnit,
        limits: &ExecutionLimits,
    ) -> Result<Box<dyn Session>, CompileError>;
}

/// A compiled unit with its entry point resolved. Lives for one run.
pub trait Session {
    /// Calls the entry point with `args` spread positionally. `Ok(None)` means
    /// the call produced no representable value.
    fn invoke(&mut self, args: Vec<Value>) -> Result<Option<Value>, InvokeError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Wall-clock budget for compiling the unit and for each invocation.
    /// `None` waits indefinitely.
    pub time_ms: Option<u64>,
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum CompileError {
    #[error("failed to parse code: {msg}")]
    CompilationFailed { msg: String },
    #[error("compilation exceeded the {time_ms}ms time limit")]
    TimedOut { time_ms: u64 },
    #[error("entry point `{name}` is not callable")]
    EntryNotCallable { name: String },
    #[error("sandbox unavailable: {msg}")]
    Internal { msg: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum InvokeError {
    #[error("arguments could not be materialized: {msg}")]
    Input { msg: String },
    #[error("{msg}")]
    Thrown { msg: String },
    #[error("{msg}")]
    Output { msg: String },
}
