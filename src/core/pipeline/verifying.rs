use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::{Sender, channel};
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    constants::{EVENT_CHANNEL_SIZE, EVENT_TX_ERR},
    core::{
        canonical,
        domain::{CaseError, CaseStage, ExecutionResult, Summary, TestCase},
        extractor::{self, EntryPoint, ExtractionError, SourceUnit},
        pipeline::worker::{Invocation, Worker, WorkerHost},
        traits::sandbox::{CompileError, ExecutionLimits},
    },
};

/// Suite-fatal failures. No results are produced when one of these occurs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VerifyError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Compilation(CompileError),
}

impl From<CompileError> for VerifyError {
    fn from(err: CompileError) -> Self {
        match err {
            CompileError::EntryNotCallable { name } => {
                VerifyError::Extraction(ExtractionError::NotCallable { name })
            }
            other => VerifyError::Compilation(other),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunEvent {
    Extracting,
    Extracted { entry: String },
    CaseStage { index: usize, stage: CaseStage },
    CaseFinished { index: usize, result: ExecutionResult },
    Done { results: Vec<ExecutionResult> },
    Failed { error: VerifyError },
}

/// Runs a submitted solution against an ordered suite of test cases.
///
/// Cases run one after another in input order against a single session;
/// a case-local failure is recorded and never stops the suite. A worker that
/// times out or crashes is stopped and replaced before the next case.
#[derive(Clone, Debug)]
pub struct Verifier {
    host: WorkerHost,
    limits: ExecutionLimits,
}

impl Verifier {
    pub fn new(host: WorkerHost, limits: ExecutionLimits) -> Self {
        Self { host, limits }
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    pub async fn verify(
        &self,
        source: &str,
        entry: &EntryPoint,
        cases: &[TestCase],
    ) -> Result<Vec<ExecutionResult>, VerifyError> {
        self.run(source, entry, cases, None).await
    }

    /// Same as [`Verifier::verify`], publishing progress while the suite runs.
    /// The stream always ends with `Done` or `Failed`.
    pub fn verify_stream(
        &self,
        source: String,
        entry: EntryPoint,
        cases: Vec<TestCase>,
    ) -> ReceiverStream<RunEvent> {
        let (event_tx, event_rx) = channel::<RunEvent>(EVENT_CHANNEL_SIZE);
        let verifier = self.clone();

        tokio::spawn(async move {
            let event = match verifier.run(&source, &entry, &cases, Some(&event_tx)).await {
                Ok(results) => RunEvent::Done { results },
                Err(error) => RunEvent::Failed { error },
            };
            emit(Some(&event_tx), event).await;
        });

        ReceiverStream::new(event_rx)
    }

    #[tracing::instrument(skip_all, fields(cases = cases.len()))]
    async fn run(
        &self,
        source: &str,
        entry: &EntryPoint,
        cases: &[TestCase],
        events: Option<&Sender<RunEvent>>,
    ) -> Result<Vec<ExecutionResult>, VerifyError> {
        emit(events, RunEvent::Extracting).await;
        let unit = Arc::new(extractor::extract(source, entry)?);
        tracing::debug!("Extracted entry point: {}", unit.entry);

        let worker = Worker::start(&self.host, unit.clone(), &self.limits).await?;
        emit(
            events,
            RunEvent::Extracted {
                entry: unit.entry.clone(),
            },
        )
        .await;

        let mut worker = Some(worker);
        let mut results = Vec::with_capacity(cases.len());
        for (index, case) in cases.iter().enumerate() {
            let result = self.run_case(index, case, &unit, &mut worker, events).await;
            tracing::debug!("Case {} finished: {:?}", index, result);
            emit(
                events,
                RunEvent::CaseFinished {
                    index,
                    result: result.clone(),
                },
            )
            .await;
            results.push(result);
        }
        if let Some(worker) = worker {
            worker.shutdown().await;
        }

        let summary = Summary::of(&results);
        tracing::info!(
            "Verification of `{}` completed: {}/{} passed",
            unit.entry,
            summary.passed,
            summary.total
        );
        Ok(results)
    }

    async fn run_case(
        &self,
        index: usize,
        case: &TestCase,
        unit: &Arc<SourceUnit>,
        worker: &mut Option<Worker>,
        events: Option<&Sender<RunEvent>>,
    ) -> ExecutionResult {
        let started = Instant::now();

        emit(events, stage(index, CaseStage::Isolating)).await;
        let args = match canonical::isolate(&case.input) {
            Ok(args) => args,
            Err(e) => {
                return ExecutionResult::failed(
                    case,
                    CaseError::Isolation { msg: e.msg },
                    started.elapsed(),
                );
            }
        };

        emit(events, stage(index, CaseStage::Invoking)).await;
        let mut current = match worker.take() {
            Some(current) => current,
            None => {
                tracing::debug!("Starting replacement worker for case {}", index);
                match Worker::start(&self.host, unit.clone(), &self.limits).await {
                    Ok(current) => current,
                    Err(e) => {
                        tracing::error!("Failed to restart sandbox worker: {}", e);
                        return ExecutionResult::failed(
                            case,
                            CaseError::Internal { msg: e.to_string() },
                            started.elapsed(),
                        );
                    }
                }
            }
        };

        match current.invoke(args, self.limits.time_ms).await {
            Ok(Invocation {
                outcome: Ok(actual_output),
                elapsed,
            }) => {
                *worker = Some(current);
                emit(events, stage(index, CaseStage::Comparing)).await;
                let passed = canonical::equals(actual_output.as_ref(), &case.expected_output);
                ExecutionResult {
                    test_case: case.clone(),
                    actual_output,
                    passed,
                    error: None,
                    execution_time: Some(elapsed),
                }
            }
            Ok(Invocation {
                outcome: Err(e),
                elapsed,
            }) => {
                *worker = Some(current);
                ExecutionResult::failed(case, e.into(), elapsed)
            }
            Err(e) => {
                tracing::warn!("Stopping worker {} after case {}: {}", current.id(), index, e);
                current.terminate().await;
                ExecutionResult::failed(case, e.into(), started.elapsed())
            }
        }
    }
}

fn stage(index: usize, stage: CaseStage) -> RunEvent {
    RunEvent::CaseStage { index, stage }
}

async fn emit(events: Option<&Sender<RunEvent>>, event: RunEvent) {
    if let Some(events) = events {
        if events.send(event).await.is_err() {
            tracing::debug!("{}", EVENT_TX_ERR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        boa::BoaSandbox,
        core::traits::sandbox::{InvokeError, MockSandbox, Session},
        stubs::sandbox::SessionStub,
    };
    use std::time::Duration;
    use itertools::Itertools;
    use serde_json::{Value, json};
    use tokio_stream::StreamExt;

    fn limits() -> ExecutionLimits {
        ExecutionLimits {
            time_ms: Some(5000),
            loop_iteration_limit: 100_000_000,
            recursion_limit: 256,
        }
    }

    fn verifier() -> Verifier {
        Verifier::new(WorkerHost::Thread(Arc::new(BoaSandbox::new())), limits())
    }

    fn mocked(sandbox: MockSandbox) -> Verifier {
        Verifier::new(WorkerHost::Thread(Arc::new(sandbox)), limits())
    }

    fn case(input: Vec<Value>, expected_output: Value) -> TestCase {
        TestCase::new(input, expected_output)
    }

    #[tokio::test]
    async fn test_sum_of_two_numbers_passes() {
        let cases = vec![case(vec![json!(2), json!(3)], json!(5))];
        let results = verifier()
            .verify("function sum(a,b){ return a+b; }", &EntryPoint::First, &cases)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].passed);
        assert_eq!(results[0].actual_output, Some(json!(5)));
        assert_eq!(results[0].error, None);
        assert!(results[0].execution_time.is_some());
    }

    #[tokio::test]
    async fn test_array_reduce_passes() {
        let cases = vec![case(vec![json!([1, 2, 3])], json!(6))];
        let results = verifier()
            .verify(
                "function sum(arr){ return arr.reduce((a,b)=>a+b,0); }",
                &EntryPoint::First,
                &cases,
            )
            .await
            .unwrap();

        assert!(results[0].passed);
        assert_eq!(results[0].actual_output, Some(json!(6)));
    }

    #[tokio::test]
    async fn test_missing_return_fails_without_error() {
        let cases = vec![case(vec![json!(1), json!(2)], json!(3))];
        let results = verifier()
            .verify("function broken(a,b){ }", &EntryPoint::First, &cases)
            .await
            .unwrap();

        assert!(!results[0].passed);
        assert_eq!(results[0].actual_output, None);
        assert_eq!(results[0].error, None);
    }

    #[tokio::test]
    async fn test_misspelled_entry_point_is_fatal() {
        let cases = vec![case(vec![json!(1), json!(2)], json!(3))];
        let result = verifier()
            .verify(
                "const ad = (a,b) => a+b;",
                &EntryPoint::Named("add".to_string()),
                &cases,
            )
            .await;

        assert_eq!(
            result,
            Err(VerifyError::Extraction(ExtractionError::NotFound {
                name: "add".to_string()
            }))
        );
    }

    #[tokio::test]
    async fn test_bare_expression_is_fatal() {
        let cases = vec![case(vec![], json!(3))];
        let result = verifier().verify("1 + 2", &EntryPoint::First, &cases).await;
        assert_eq!(
            result,
            Err(VerifyError::Extraction(ExtractionError::NoEntryPoint))
        );
    }

    #[tokio::test]
    async fn test_non_callable_binding_is_an_extraction_error() {
        let sandbox = {
            let mut sandbox = MockSandbox::new();
            sandbox.expect_open().times(1).returning(|unit, _| {
                Err(CompileError::EntryNotCallable {
                    name: unit.entry.clone(),
                })
            });
            sandbox
        };
        let verifier = mocked(sandbox);

        let result = verifier
            .verify("function f() {}", &EntryPoint::First, &[case(vec![], json!(1))])
            .await;
        assert_eq!(
            result,
            Err(VerifyError::Extraction(ExtractionError::NotCallable {
                name: "f".to_string()
            }))
        );
    }

    #[tokio::test]
    async fn test_syntax_error_is_fatal() {
        let cases = vec![case(vec![json!(1)], json!(1))];
        let result = verifier()
            .verify("function id(x) { return x;", &EntryPoint::First, &cases)
            .await;

        assert!(matches!(
            result,
            Err(VerifyError::Compilation(CompileError::CompilationFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_thrown_error_is_recorded_and_suite_continues() {
        let source = r#"
            function check(x) {
                if (x < 0) { throw new Error("boom"); }
                return x * 2;
            }
        "#;
        let cases = vec![
            case(vec![json!(1)], json!(2)),
            case(vec![json!(-1)], json!(0)),
            case(vec![json!(3)], json!(6)),
        ];
        let results = verifier()
            .verify(source, &EntryPoint::First, &cases)
            .await
            .unwrap();

        assert_eq!(
            results.iter().map(|r| r.passed).collect_vec(),
            vec![true, false, true]
        );
        assert!(results[1].error.as_deref().unwrap().contains("boom"));
        assert_eq!(results[1].actual_output, None);
        assert!(results[1].execution_time.is_some());
    }

    #[tokio::test]
    async fn test_always_throwing_solution() {
        let cases = vec![case(vec![], json!(null)), case(vec![json!(1)], json!(1))];
        let results = verifier()
            .verify(
                r#"function fail(){ throw new Error("boom"); }"#,
                &EntryPoint::First,
                &cases,
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        for result in &results {
            assert!(!result.passed);
            assert!(result.error.as_deref().unwrap().contains("boom"));
        }
    }

    #[tokio::test]
    async fn test_results_preserve_case_order() {
        let cases = (0..10)
            .map(|i| case(vec![json!(i)], json!(if i % 3 == 0 { i * i } else { -1 })))
            .collect_vec();
        let results = verifier()
            .verify("const square = (x) => x * x;", &EntryPoint::First, &cases)
            .await
            .unwrap();

        assert_eq!(results.len(), cases.len());
        for (i, (result, case)) in results.iter().zip(&cases).enumerate() {
            assert_eq!(&result.test_case, case);
            assert_eq!(result.passed, i % 3 == 0);
            assert_eq!(result.actual_output, Some(json!(i * i)));
        }
    }

    #[tokio::test]
    async fn test_mutating_arguments_does_not_leak() {
        let source = "function drain(arr) { const n = arr.length; arr.length = 0; arr.push('x'); return n; }";
        let shared = json!([1, 2, 3]);
        let cases = vec![
            case(vec![shared.clone()], json!(3)),
            case(vec![shared.clone()], json!(3)),
        ];
        let results = verifier()
            .verify(source, &EntryPoint::First, &cases)
            .await
            .unwrap();

        assert!(results.iter().all(|r| r.passed));
        assert_eq!(cases[0].input, vec![shared.clone()]);
        assert_eq!(results[1].test_case.input, vec![shared]);
    }

    #[tokio::test]
    async fn test_comparison_is_canonical() {
        let source = "function pairs() { return { a: 1, b: [1.0, 2] }; }";
        let cases = vec![
            case(vec![], json!({ "a": 1, "b": [1, 2.0] })),
            case(vec![], json!({ "b": [1, 2], "a": 1 })),
        ];
        let results = verifier()
            .verify(source, &EntryPoint::First, &cases)
            .await
            .unwrap();

        assert!(results[0].passed);
        assert!(!results[1].passed);
        assert_eq!(results[1].error, None);
    }

    #[tokio::test]
    async fn test_helper_binding_before_function_is_skipped() {
        let source = r#"
            const helper = (x) => x * 10;
            function solve(a, b) { return a + b; }
        "#;
        let results = verifier()
            .verify(source, &EntryPoint::First, &[case(vec![json!(1), json!(2)], json!(3))])
            .await
            .unwrap();

        assert!(results[0].passed);
        assert_eq!(results[0].actual_output, Some(json!(3)));
    }

    #[tokio::test]
    async fn test_slow_compilation_is_fatal() {
        let mut sandbox = MockSandbox::new();
        sandbox.expect_open().times(1).returning(|_, _| {
            std::thread::sleep(Duration::from_millis(500));
            Ok(Box::new(SessionStub::new(Ok(None), Duration::ZERO)) as Box<dyn Session>)
        });
        let limits = ExecutionLimits {
            time_ms: Some(100),
            ..limits()
        };
        let verifier = Verifier::new(WorkerHost::Thread(Arc::new(sandbox)), limits);

        let result = verifier
            .verify("function f() {}", &EntryPoint::First, &[case(vec![], json!(1))])
            .await;
        assert_eq!(
            result,
            Err(VerifyError::Compilation(CompileError::TimedOut { time_ms: 100 }))
        );
    }

    #[tokio::test]
    async fn test_timed_out_case_gets_fresh_worker() {
        let mut sandbox = MockSandbox::new();
        let mut delays = vec![Duration::ZERO, Duration::from_millis(400)];
        sandbox.expect_open().times(2).returning(move |_, _| {
            let delay = delays.pop().unwrap_or_default();
            Ok(Box::new(SessionStub::new(Ok(Some(json!(7))), delay)) as Box<dyn Session>)
        });
        let limits = ExecutionLimits {
            time_ms: Some(100),
            ..limits()
        };
        let verifier = Verifier::new(WorkerHost::Thread(Arc::new(sandbox)), limits);
        let cases = vec![case(vec![], json!(7)), case(vec![], json!(7))];

        let results = verifier
            .verify("function f() {}", &EntryPoint::First, &cases)
            .await
            .unwrap();

        assert_eq!(
            results[0].error.as_deref(),
            Some("execution exceeded the 100ms time limit")
        );
        assert!(results[1].passed);
    }

    #[tokio::test]
    async fn test_session_is_opened_once_per_healthy_run() {
        let mut sandbox = MockSandbox::new();
        sandbox.expect_open().times(1).returning(|_, _| {
            Ok(Box::new(SessionStub::new(Ok(Some(json!(5))), Default::default())) as Box<dyn Session>)
        });
        let verifier = mocked(sandbox);
        let cases = vec![
            case(vec![json!(2), json!(3)], json!(5)),
            case(vec![json!(1), json!(1)], json!(2)),
            case(vec![json!(0), json!(5)], json!(5)),
        ];

        let results = verifier
            .verify("function sum(a, b) { return a + b; }", &EntryPoint::First, &cases)
            .await
            .unwrap();
        assert_eq!(
            results.iter().map(|r| r.passed).collect_vec(),
            vec![true, false, true]
        );
    }

    #[tokio::test]
    async fn test_output_error_is_case_local() {
        let mut sandbox = MockSandbox::new();
        sandbox.expect_open().times(1).returning(|_, _| {
            Ok(Box::new(SessionStub::new(
                Err(InvokeError::Output {
                    msg: "Converting circular structure to JSON".to_string(),
                }),
                Default::default(),
            )) as Box<dyn Session>)
        });
        let verifier = mocked(sandbox);

        let results = verifier
            .verify("function f() {}", &EntryPoint::First, &[case(vec![], json!({}))])
            .await
            .unwrap();
        assert_eq!(
            results[0].error.as_deref(),
            Some("output could not be serialized: Converting circular structure to JSON")
        );
    }

    #[tokio::test]
    async fn test_stream_reports_progress_in_order() {
        let cases = vec![
            case(vec![json!(1), json!(1)], json!(2)),
            case(vec![json!(2), json!(2)], json!(5)),
        ];
        let events: Vec<RunEvent> = verifier()
            .verify_stream(
                "const add = (a, b) => a + b;".to_string(),
                EntryPoint::First,
                cases,
            )
            .collect()
            .await;

        assert_eq!(events[0], RunEvent::Extracting);
        assert_eq!(
            events[1],
            RunEvent::Extracted {
                entry: "add".to_string()
            }
        );

        let stages = events
            .iter()
            .filter_map(|e| match e {
                RunEvent::CaseStage { index, stage } => Some((*index, *stage)),
                _ => None,
            })
            .collect_vec();
        assert_eq!(
            stages,
            vec![
                (0, CaseStage::Isolating),
                (0, CaseStage::Invoking),
                (0, CaseStage::Comparing),
                (1, CaseStage::Isolating),
                (1, CaseStage::Invoking),
                (1, CaseStage::Comparing),
            ]
        );

        let Some(RunEvent::Done { results }) = events.last() else {
            panic!("expected Done event, got {:?}", events.last());
        };
        assert!(results[0].passed);
        assert!(!results[1].passed);
    }

    #[tokio::test]
    async fn test_stream_reports_fatal_error_once() {
        let events: Vec<RunEvent> = verifier()
            .verify_stream("42".to_string(), EntryPoint::First, vec![case(vec![], json!(42))])
            .collect()
            .await;

        assert_eq!(
            events,
            vec![
                RunEvent::Extracting,
                RunEvent::Failed {
                    error: VerifyError::Extraction(ExtractionError::NoEntryPoint)
                }
            ]
        );
    }
}
