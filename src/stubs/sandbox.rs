use std::time::Duration;

use serde_json::Value;

use crate::core::{
    extractor::SourceUnit,
    traits::sandbox::{CompileError, ExecutionLimits, InvokeError, Sandbox, Session},
};

/// Sandbox that opens sessions answering every invocation with a fixed
/// outcome after a fixed delay.
#[derive(Debug, Clone)]
pub struct SandboxStub {
    open_result: Result<(), CompileError>,
    outcome: Result<Option<Value>, InvokeError>,
    delay: Duration,
}

impl SandboxStub {
    pub fn new(
        open_result: Result<(), CompileError>,
        outcome: Result<Option<Value>, InvokeError>,
        delay: Duration,
    ) -> Self {
        Self {
            open_result,
            outcome,
            delay,
        }
    }
}

impl Sandbox for SandboxStub {
    #[tracing::instrument]
    fn open(
        &self,
        unit: &SourceUnit,
        limits: &ExecutionLimits,
    ) -> Result<Box<dyn Session>, CompileError> {
        tracing::debug!("Open result: {:?}", self.open_result);

        self.open_result.clone().map(|_| {
            Box::new(SessionStub::new(self.outcome.clone(), self.delay)) as Box<dyn Session>
        })
    }
}

#[derive(Debug, Clone)]
pub struct SessionStub {
    outcome: Result<Option<Value>, InvokeError>,
    delay: Duration,
}

impl SessionStub {
    pub fn new(outcome: Result<Option<Value>, InvokeError>, delay: Duration) -> Self {
        Self { outcome, delay }
    }
}

impl Session for SessionStub {
    fn invoke(&mut self, args: Vec<Value>) -> Result<Option<Value>, InvokeError> {
        tracing::debug!("Start invocation: args={:?}", args);
        std::thread::sleep(self.delay);
        tracing::debug!("Invocation result: {:?}", self.outcome);

        self.outcome.clone()
    }
}
