pub const EVENT_TX_ERR: &str = "Failed to send event to event_tx";
pub const WORKER_READY_ERR: &str = "Sandbox worker exited before reporting readiness";

/// Per-invocation wall-clock budget.
pub const MAX_EXECUTION_TIME_MS: u64 = 5000;
pub const DEFAULT_LOOP_ITERATION_LIMIT: u64 = 100_000_000;
pub const DEFAULT_RECURSION_LIMIT: usize = 512;
pub const WORKER_STACK_SIZE: usize = 16 * 1024 * 1024;
pub const EVENT_CHANNEL_SIZE: usize = 128;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const STORAGE_PREFIX: &str = "challenge_trainer_";

/// Hidden CLI subcommand that serves the sandbox protocol on stdin/stdout.
pub const WORKER_SUBCOMMAND: &str = "sandbox-worker";
pub const WORKER_SHUTDOWN_GRACE_MS: u64 = 500;
