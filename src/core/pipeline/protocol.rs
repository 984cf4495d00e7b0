//! Line-delimited JSON spoken between a verifier and a sandbox worker process.
//!
//! The parent writes one `Open` request, waits for `Ready` (or `OpenFailed`),
//! then alternates `Invoke` requests with `Finished` replies. Closing the
//! worker's stdin ends the session.

use std::io::{BufRead, Write};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{
    extractor::SourceUnit,
    traits::sandbox::{CompileError, ExecutionLimits, InvokeError, Sandbox},
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    Open {
        unit: SourceUnit,
        limits: ExecutionLimits,
    },
    Invoke {
        args: Vec<Value>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Ready,
    OpenFailed { error: CompileError },
    Finished { outcome: Outcome, elapsed_us: u64 },
}

/// Wire form of `Result<Option<Value>, InvokeError>`. Keeps a returned
/// `null` apart from "no value".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Returned { value: Value },
    NoValue,
    Failed { error: InvokeError },
}

impl From<Result<Option<Value>, InvokeError>> for Outcome {
    fn from(result: Result<Option<Value>, InvokeError>) -> Self {
        match result {
            Ok(Some(value)) => Outcome::Returned { value },
            Ok(None) => Outcome::NoValue,
            Err(error) => Outcome::Failed { error },
        }
    }
}

impl From<Outcome> for Result<Option<Value>, InvokeError> {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Returned { value } => Ok(Some(value)),
            Outcome::NoValue => Ok(None),
            Outcome::Failed { error } => Err(error),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("worker pipe failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("expected {expected} request")]
    Unexpected { expected: &'static str },
}

/// Worker side of the protocol. Returns once `input` is closed or the unit
/// fails to compile.
pub fn serve(
    sandbox: &dyn Sandbox,
    input: impl BufRead,
    mut output: impl Write,
) -> Result<(), ProtocolError> {
    let mut lines = input.lines();

    let Some(line) = lines.next() else {
        return Ok(());
    };
    let Request::Open { unit, limits } = serde_json::from_str::<Request>(&line?)? else {
        return Err(ProtocolError::Unexpected { expected: "open" });
    };

    let mut session = match sandbox.open(&unit, &limits) {
        Ok(session) => session,
        Err(error) => {
            tracing::debug!("Failed to open session: {:?}", error);
            return send(&mut output, &Reply::OpenFailed { error });
        }
    };
    send(&mut output, &Reply::Ready)?;

    for line in lines {
        let Request::Invoke { args } = serde_json::from_str::<Request>(&line?)? else {
            return Err(ProtocolError::Unexpected { expected: "invoke" });
        };

        let started = Instant::now();
        let outcome = session.invoke(args);
        let elapsed = started.elapsed();
        tracing::debug!("Invocation finished in {:?}: {:?}", elapsed, outcome);

        send(
            &mut output,
            &Reply::Finished {
                outcome: outcome.into(),
                elapsed_us: elapsed.as_micros() as u64,
            },
        )?;
    }

    Ok(())
}

fn send(output: &mut impl Write, reply: &Reply) -> Result<(), ProtocolError> {
    serde_json::to_writer(&mut *output, reply)?;
    output.write_all(b"\n")?;
    output.flush()?;
    Ok(())
}
