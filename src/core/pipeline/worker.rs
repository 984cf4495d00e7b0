use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::{
    constants::{WORKER_READY_ERR, WORKER_SHUTDOWN_GRACE_MS, WORKER_STACK_SIZE, WORKER_SUBCOMMAND},
    core::{
        domain::CaseError,
        extractor::SourceUnit,
        pipeline::protocol::{Reply, Request},
        traits::sandbox::{CompileError, ExecutionLimits, InvokeError, Sandbox},
    },
};

#[derive(Debug)]
pub struct Invocation {
    pub outcome: Result<Option<Value>, InvokeError>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkerError {
    #[error("execution exceeded the {time_ms}ms time limit")]
    Timeout { time_ms: u64 },
    #[error("sandbox worker crashed")]
    Crashed,
    #[error("sandbox worker sent an unexpected message: {msg}")]
    Protocol { msg: String },
}

impl From<WorkerError> for CaseError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Timeout { time_ms } => CaseError::Timeout { time_ms },
            WorkerError::Crashed => CaseError::WorkerCrashed,
            WorkerError::Protocol { msg } => CaseError::Internal { msg },
        }
    }
}

impl From<InvokeError> for CaseError {
    fn from(err: InvokeError) -> Self {
        match err {
            InvokeError::Input { msg } => CaseError::Isolation { msg },
            InvokeError::Thrown { msg } => CaseError::Runtime { msg },
            InvokeError::Output { msg } => CaseError::Output { msg },
        }
    }
}

/// Program that serves the sandbox protocol on its stdin/stdout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// This executable, re-entered through its hidden worker subcommand.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, [WORKER_SUBCOMMAND]))
    }
}

/// Where sessions live.
///
/// A `Process` worker is killed as soon as it exceeds its budget. A `Thread`
/// worker cannot be stopped, only abandoned, so it is meant for in-process
/// sandboxes whose invocations are known to finish (stubs, mocks).
#[derive(Clone, Debug)]
pub enum WorkerHost {
    Process(WorkerCommand),
    Thread(Arc<dyn Sandbox>),
}

/// One compiled session, hosted in a child process or on a dedicated thread.
#[derive(Debug)]
pub struct Worker {
    id: Uuid,
    transport: Transport,
}

#[derive(Debug)]
enum Transport {
    Process(ProcessWorker),
    Thread(ThreadWorker),
}

impl Worker {
    /// Compiles `unit` in a fresh worker. Compilation shares the per-case
    /// budget; a worker that does not report readiness in time is stopped.
    #[tracing::instrument(skip_all, fields(entry = %unit.entry))]
    pub async fn start(
        host: &WorkerHost,
        unit: Arc<SourceUnit>,
        limits: &ExecutionLimits,
    ) -> Result<Self, CompileError> {
        let id = Uuid::new_v4();
        let transport = match host {
            WorkerHost::Process(command) => {
                Transport::Process(ProcessWorker::start(command, &unit, limits).await?)
            }
            WorkerHost::Thread(sandbox) => {
                Transport::Thread(ThreadWorker::start(id, sandbox.clone(), unit, limits).await?)
            }
        };

        tracing::debug!("Worker {} ready", id);
        Ok(Self { id, transport })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// OS process id of a process-hosted worker.
    pub fn pid(&self) -> Option<u32> {
        match &self.transport {
            Transport::Process(process) => process.child.id(),
            Transport::Thread(_) => None,
        }
    }

    pub async fn invoke(
        &mut self,
        args: Vec<Value>,
        time_ms: Option<u64>,
    ) -> Result<Invocation, WorkerError> {
        match &mut self.transport {
            Transport::Process(process) => process.invoke(args, time_ms).await,
            Transport::Thread(thread) => thread.invoke(args, time_ms).await,
        }
    }

    /// Stops the worker immediately, whatever it is running.
    pub async fn terminate(self) {
        match self.transport {
            Transport::Process(process) => process.kill().await,
            Transport::Thread(_) => {
                tracing::warn!("Abandoning thread-hosted worker {}, it cannot be stopped", self.id);
            }
        }
    }

    /// Ends an idle worker, giving a process a short grace period to exit on
    /// its own before it is killed.
    pub async fn shutdown(self) {
        match self.transport {
            Transport::Process(process) => process.shutdown().await,
            Transport::Thread(_) => {}
        }
    }
}

async fn bounded<F: Future>(time_ms: Option<u64>, future: F) -> Result<F::Output, u64> {
    match time_ms {
        Some(time_ms) => tokio::time::timeout(Duration::from_millis(time_ms), future)
            .await
            .map_err(|_| time_ms),
        None => Ok(future.await),
    }
}

#[derive(Debug)]
struct ProcessWorker {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl ProcessWorker {
    async fn start(
        command: &WorkerCommand,
        unit: &SourceUnit,
        limits: &ExecutionLimits,
    ) -> Result<Self, CompileError> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CompileError::Internal {
                msg: format!("Failed to spawn sandbox worker: {}", e),
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(CompileError::Internal {
                msg: "sandbox worker pipes unavailable".to_string(),
            });
        };
        let mut process = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        let open = Request::Open {
            unit: unit.clone(),
            limits: limits.clone(),
        };
        match bounded(limits.time_ms, process.exchange(&open)).await {
            Ok(Ok(Reply::Ready)) => Ok(process),
            Ok(Ok(Reply::OpenFailed { error })) => {
                process.shutdown().await;
                Err(error)
            }
            Ok(Ok(reply)) => {
                process.kill().await;
                Err(CompileError::Internal {
                    msg: format!("unexpected reply to open: {:?}", reply),
                })
            }
            Ok(Err(e)) => {
                process.kill().await;
                Err(CompileError::Internal { msg: e.to_string() })
            }
            Err(time_ms) => {
                tracing::warn!("Sandbox worker did not compile within {}ms", time_ms);
                process.kill().await;
                Err(CompileError::TimedOut { time_ms })
            }
        }
    }

    async fn invoke(
        &mut self,
        args: Vec<Value>,
        time_ms: Option<u64>,
    ) -> Result<Invocation, WorkerError> {
        match bounded(time_ms, self.exchange(&Request::Invoke { args })).await {
            Ok(Ok(Reply::Finished {
                outcome,
                elapsed_us,
            })) => Ok(Invocation {
                outcome: outcome.into(),
                elapsed: Duration::from_micros(elapsed_us),
            }),
            Ok(Ok(reply)) => Err(WorkerError::Protocol {
                msg: format!("{:?}", reply),
            }),
            Ok(Err(e)) => Err(e),
            Err(time_ms) => Err(WorkerError::Timeout { time_ms }),
        }
    }

    async fn exchange(&mut self, request: &Request) -> Result<Reply, WorkerError> {
        let mut line = serde_json::to_string(request).map_err(|e| WorkerError::Protocol {
            msg: e.to_string(),
        })?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|_| WorkerError::Crashed)?;
        self.stdin.flush().await.map_err(|_| WorkerError::Crashed)?;

        match self.stdout.next_line().await {
            Ok(Some(line)) => serde_json::from_str(&line).map_err(|e| WorkerError::Protocol {
                msg: e.to_string(),
            }),
            Ok(None) | Err(_) => Err(WorkerError::Crashed),
        }
    }

    async fn kill(mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::error!("Failed to kill sandbox worker: {}", e);
        }
    }

    async fn shutdown(self) {
        let Self {
            mut child, stdin, ..
        } = self;
        drop(stdin);

        let grace = Duration::from_millis(WORKER_SHUTDOWN_GRACE_MS);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!("Sandbox worker exited: {}", status),
            Ok(Err(e)) => tracing::error!("Failed to wait for sandbox worker: {}", e),
            Err(_) => {
                tracing::warn!("Sandbox worker ignored shutdown, killing it");
                if let Err(e) = child.kill().await {
                    tracing::error!("Failed to kill sandbox worker: {}", e);
                }
            }
        }
    }
}

struct Job {
    args: Vec<Value>,
    reply: oneshot::Sender<Invocation>,
}

#[derive(Debug)]
struct ThreadWorker {
    job_tx: mpsc::Sender<Job>,
}

impl ThreadWorker {
    async fn start(
        id: Uuid,
        sandbox: Arc<dyn Sandbox>,
        unit: Arc<SourceUnit>,
        limits: &ExecutionLimits,
    ) -> Result<Self, CompileError> {
        let (job_tx, job_rx) = mpsc::channel::<Job>(1);
        let (ready_tx, ready_rx) = oneshot::channel();
        let thread_limits = limits.clone();

        std::thread::Builder::new()
            .name(format!("sandbox-{}", id))
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || serve(sandbox, unit, thread_limits, ready_tx, job_rx))
            .map_err(|e| CompileError::Internal { msg: e.to_string() })?;

        match bounded(limits.time_ms, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(Self { job_tx }),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(CompileError::Internal {
                msg: WORKER_READY_ERR.to_string(),
            }),
            Err(time_ms) => {
                tracing::warn!("Abandoning thread-hosted worker {} stuck compiling", id);
                Err(CompileError::TimedOut { time_ms })
            }
        }
    }

    async fn invoke(
        &self,
        args: Vec<Value>,
        time_ms: Option<u64>,
    ) -> Result<Invocation, WorkerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.job_tx
            .send(Job {
                args,
                reply: reply_tx,
            })
            .await
            .map_err(|_| WorkerError::Crashed)?;

        bounded(time_ms, reply_rx)
            .await
            .map_err(|time_ms| WorkerError::Timeout { time_ms })?
            .map_err(|_| WorkerError::Crashed)
    }
}

fn serve(
    sandbox: Arc<dyn Sandbox>,
    unit: Arc<SourceUnit>,
    limits: ExecutionLimits,
    ready_tx: oneshot::Sender<Result<(), CompileError>>,
    mut job_rx: mpsc::Receiver<Job>,
) {
    let mut session = match sandbox.open(&unit, &limits) {
        Ok(session) => session,
        Err(e) => {
            tracing::debug!("Failed to open session: {:?}", e);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    if ready_tx.send(Ok(())).is_err() {
        return;
    }

    while let Some(job) = job_rx.blocking_recv() {
        let started = Instant::now();
        let outcome = session.invoke(job.args);
        let elapsed = started.elapsed();
        tracing::debug!("Invocation finished in {:?}: {:?}", elapsed, outcome);

        if job.reply.send(Invocation { outcome, elapsed }).is_err() {
            tracing::debug!("Invocation result discarded, worker was abandoned");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::sandbox::{MockSandbox, Session};
    use crate::stubs::sandbox::SandboxStub;
    use serde_json::json;

    fn unit() -> Arc<SourceUnit> {
        Arc::new(SourceUnit {
            source: "function f() {}".to_string(),
            entry: "f".to_string(),
        })
    }

    fn limits() -> ExecutionLimits {
        ExecutionLimits {
            time_ms: Some(1000),
            loop_iteration_limit: 1_000_000,
            recursion_limit: 64,
        }
    }

    fn thread_host(sandbox: impl Sandbox + 'static) -> WorkerHost {
        WorkerHost::Thread(Arc::new(sandbox))
    }

    #[derive(Debug)]
    struct PanickingSession;

    impl Session for PanickingSession {
        fn invoke(&mut self, _args: Vec<Value>) -> Result<Option<Value>, InvokeError> {
            panic!("engine bug");
        }
    }

    #[tokio::test]
    async fn test_invocation_result_is_returned() {
        let host = thread_host(SandboxStub::new(Ok(()), Ok(Some(json!(42))), Duration::ZERO));
        let mut worker = Worker::start(&host, unit(), &limits()).await.unwrap();
        assert_eq!(worker.pid(), None);

        let invocation = worker.invoke(vec![json!(1)], Some(1000)).await.unwrap();
        assert_eq!(invocation.outcome, Ok(Some(json!(42))));

        // the same session serves later invocations
        let invocation = worker.invoke(vec![], Some(1000)).await.unwrap();
        assert_eq!(invocation.outcome, Ok(Some(json!(42))));
    }

    #[tokio::test]
    async fn test_open_error_is_propagated() {
        let host = thread_host(SandboxStub::new(
            Err(CompileError::CompilationFailed {
                msg: "Unexpected token".to_string(),
            }),
            Ok(None),
            Duration::ZERO,
        ));

        let result = Worker::start(&host, unit(), &limits()).await;
        assert!(matches!(result, Err(CompileError::CompilationFailed { .. })));
    }

    #[tokio::test]
    async fn test_slow_compilation_times_out() {
        let mut sandbox = MockSandbox::new();
        sandbox.expect_open().times(1).returning(|_, _| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(Box::new(PanickingSession) as Box<dyn Session>)
        });
        let limits = ExecutionLimits {
            time_ms: Some(50),
            ..limits()
        };

        let result = Worker::start(&thread_host(sandbox), unit(), &limits).await;
        assert_eq!(result.err(), Some(CompileError::TimedOut { time_ms: 50 }));
    }

    #[tokio::test]
    async fn test_slow_invocation_times_out() {
        let host = thread_host(SandboxStub::new(
            Ok(()),
            Ok(Some(json!(1))),
            Duration::from_millis(500),
        ));
        let mut worker = Worker::start(&host, unit(), &limits()).await.unwrap();

        let result = worker.invoke(vec![], Some(50)).await;
        assert!(matches!(result, Err(WorkerError::Timeout { time_ms: 50 })));
    }

    #[tokio::test]
    async fn test_unbounded_invocation_waits_for_result() {
        let host = thread_host(SandboxStub::new(
            Ok(()),
            Ok(Some(json!("slow"))),
            Duration::from_millis(100),
        ));
        let mut worker = Worker::start(&host, unit(), &limits()).await.unwrap();

        let invocation = worker.invoke(vec![], None).await.unwrap();
        assert_eq!(invocation.outcome, Ok(Some(json!("slow"))));
        assert!(invocation.elapsed >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_panicking_session_reports_crash() {
        let mut sandbox = MockSandbox::new();
        sandbox
            .expect_open()
            .times(1)
            .returning(|_, _| Ok(Box::new(PanickingSession) as Box<dyn Session>));
        let mut worker = Worker::start(&thread_host(sandbox), unit(), &limits())
            .await
            .unwrap();

        let result = worker.invoke(vec![], Some(1000)).await;
        assert!(matches!(result, Err(WorkerError::Crashed)));

        let result = worker.invoke(vec![], Some(1000)).await;
        assert!(matches!(result, Err(WorkerError::Crashed)));
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        /// Shell script standing in for a sandbox worker.
        fn script(body: &str) -> WorkerHost {
            WorkerHost::Process(WorkerCommand::new("sh", ["-c", body]))
        }

        const READY: &str = r#"read _; echo '"ready"'"#;

        #[cfg(target_os = "linux")]
        fn alive(pid: u32) -> bool {
            std::path::Path::new(&format!("/proc/{}", pid)).exists()
        }

        #[tokio::test]
        async fn test_replies_are_decoded() {
            let host = script(&format!(
                r#"{READY}; while read _; do echo '{{"finished":{{"outcome":{{"returned":{{"value":42}}}},"elapsed_us":1500}}}}'; done"#
            ));
            let mut worker = Worker::start(&host, unit(), &limits()).await.unwrap();
            assert!(worker.pid().is_some());

            for _ in 0..2 {
                let invocation = worker.invoke(vec![json!(1)], Some(1000)).await.unwrap();
                assert_eq!(invocation.outcome, Ok(Some(json!(42))));
                assert_eq!(invocation.elapsed, Duration::from_micros(1500));
            }
            worker.shutdown().await;
        }

        #[tokio::test]
        async fn test_open_failure_is_decoded() {
            let host = script(
                r#"read _; echo '{"open_failed":{"error":{"CompilationFailed":{"msg":"Unexpected token"}}}}'"#,
            );
            let result = Worker::start(&host, unit(), &limits()).await;
            assert_eq!(
                result.err(),
                Some(CompileError::CompilationFailed {
                    msg: "Unexpected token".to_string()
                })
            );
        }

        #[cfg(target_os = "linux")]
        #[tokio::test]
        async fn test_timed_out_worker_is_killed() {
            let host = script(&format!("{READY}; read _; exec sleep 30"));
            let mut worker = Worker::start(&host, unit(), &limits()).await.unwrap();
            let pid = worker.pid().unwrap();

            let result = worker.invoke(vec![], Some(100)).await;
            assert_eq!(result.err(), Some(WorkerError::Timeout { time_ms: 100 }));
            assert!(alive(pid));

            worker.terminate().await;
            assert!(!alive(pid));
        }

        #[tokio::test]
        async fn test_worker_stuck_compiling_is_killed() {
            let host = script("read _; exec sleep 30");
            let limits = ExecutionLimits {
                time_ms: Some(100),
                ..limits()
            };

            let started = Instant::now();
            let result = Worker::start(&host, unit(), &limits).await;
            assert_eq!(result.err(), Some(CompileError::TimedOut { time_ms: 100 }));
            assert!(started.elapsed() < Duration::from_secs(5));
        }

        #[tokio::test]
        async fn test_exited_worker_reports_crash() {
            let host = script(&format!("{READY}; read _; exit 3"));
            let mut worker = Worker::start(&host, unit(), &limits()).await.unwrap();

            let result = worker.invoke(vec![], Some(1000)).await;
            assert_eq!(result.err(), Some(WorkerError::Crashed));
        }

        #[tokio::test]
        async fn test_garbage_reply_is_a_protocol_error() {
            let host = script(&format!("{READY}; read _; echo 'not json'"));
            let mut worker = Worker::start(&host, unit(), &limits()).await.unwrap();

            let result = worker.invoke(vec![], Some(1000)).await;
            assert!(matches!(result, Err(WorkerError::Protocol { .. })));
        }

        #[tokio::test]
        async fn test_missing_program_is_internal_error() {
            let host = WorkerHost::Process(WorkerCommand::new(
                "/nonexistent/challenge-trainer",
                [WORKER_SUBCOMMAND],
            ));
            let result = Worker::start(&host, unit(), &limits()).await;
            assert!(matches!(result, Err(CompileError::Internal { .. })));
        }
    }
}
