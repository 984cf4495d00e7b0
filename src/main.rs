use std::panic;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

use challenge_trainer::{
    boa::BoaSandbox,
    catalog,
    config::GeminiConfig,
    constants::WORKER_STACK_SIZE,
    core::{
        domain::{Challenge, Difficulty, ExecutionResult, Summary, TestCase},
        extractor::EntryPoint,
        pipeline::{
            protocol,
            verifying::{RunEvent, Verifier},
            worker::{WorkerCommand, WorkerHost},
        },
        traits::{provider::AiProvider, sandbox::ExecutionLimits},
    },
    gemini::{GeminiClient, GeminiProvider},
    storage::{FileStore, Preferences},
};

#[derive(Parser, Debug)]
#[command(name = "challenge-trainer", version, about = "Practice JavaScript coding challenges")]
struct Cli {
    /// Settings file, defaults to the platform config directory.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a solution against a test suite.
    Verify(VerifyArgs),
    /// Ask the model for a new challenge.
    Generate {
        topic: Option<String>,
        #[arg(short, long)]
        difficulty: Option<Difficulty>,
        /// Write the challenge here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Run a solution and ask the model to review it.
    Review {
        solution: PathBuf,
        #[arg(short, long)]
        challenge: PathBuf,
        #[command(flatten)]
        limits: LimitArgs,
    },
    /// Manage saved settings.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// List suggested topics.
    Topics {
        #[arg(short, long)]
        category: Option<String>,
    },
    /// Serves one sandbox session over stdin/stdout for a verifier.
    #[command(name = "sandbox-worker", hide = true)]
    SandboxWorker,
}

#[derive(Args, Debug)]
struct VerifyArgs {
    solution: PathBuf,
    /// JSON array of `{ input, expectedOutput }` cases.
    #[arg(long, conflicts_with = "challenge", required_unless_present = "challenge")]
    cases: Option<PathBuf>,
    /// Challenge JSON; its test cases and function signature are used.
    #[arg(long)]
    challenge: Option<PathBuf>,
    /// Function to call. Defaults to the first top-level declaration.
    #[arg(long, conflicts_with = "last")]
    entry: Option<String>,
    /// Call the last top-level declaration instead of the first.
    #[arg(long)]
    last: bool,
    /// Print results as JSON.
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    limits: LimitArgs,
}

#[derive(Args, Debug)]
struct LimitArgs {
    /// Per-case time limit, 0 disables it.
    #[arg(long)]
    time_limit_ms: Option<u64>,
    #[arg(long)]
    loop_limit: Option<u64>,
    #[arg(long)]
    recursion_limit: Option<usize>,
}

impl LimitArgs {
    fn resolve(&self) -> ExecutionLimits {
        let mut limits = ExecutionLimits::from_env();
        if let Some(time_ms) = self.time_limit_ms {
            limits.time_ms = (time_ms > 0).then_some(time_ms);
        }
        if let Some(loop_limit) = self.loop_limit {
            limits.loop_iteration_limit = loop_limit;
        }
        if let Some(recursion_limit) = self.recursion_limit {
            limits.recursion_limit = recursion_limit;
        }
        limits
    }
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    SetKey { api_key: String },
    ClearKey,
    Show,
    /// Remove every saved setting.
    Reset,
}

#[tokio::main]
#[tracing::instrument]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    set_panic_hook();

    let cli = Cli::parse();
    let store_path = cli.store.unwrap_or_else(FileStore::default_location);
    let preferences = Preferences::new(Arc::new(FileStore::new(store_path)));

    match cli.command {
        Command::Verify(args) => verify(args).await,
        Command::Generate {
            topic,
            difficulty,
            out,
        } => generate(&preferences, topic, difficulty, out).await,
        Command::Review {
            solution,
            challenge,
            limits,
        } => review(&preferences, &solution, &challenge, limits.resolve()).await,
        Command::Config { action } => configure(&preferences, action),
        Command::Topics { category } => topics(category.as_deref()),
        Command::SandboxWorker => sandbox_worker(),
    }
}

async fn verify(args: VerifyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(&args.solution)?;
    let (cases, default_entry) = match (&args.cases, &args.challenge) {
        (Some(path), _) => (read_json::<Vec<TestCase>>(path)?, EntryPoint::First),
        (None, Some(path)) => {
            let challenge: Challenge = read_json(path)?;
            let entry = challenge.entry_point();
            (challenge.test_cases, entry)
        }
        (None, None) => return Err("either --cases or --challenge is required".into()),
    };
    let entry = match (args.entry, args.last) {
        (Some(name), _) => EntryPoint::Named(name),
        (None, true) => EntryPoint::Last,
        (None, false) => default_entry,
    };

    let verifier = Verifier::new(worker_host()?, args.limits.resolve());
    let mut events = verifier.verify_stream(source, entry, cases);
    while let Some(event) = events.next().await {
        match event {
            RunEvent::Extracted { entry } => tracing::info!("Running `{}`", entry),
            RunEvent::CaseFinished { index, result } if !args.json => {
                print_result(index, &result)
            }
            RunEvent::Done { results } => {
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&results)?);
                } else {
                    print_summary(&results);
                }
            }
            RunEvent::Failed { error } => return Err(error.into()),
            _ => {}
        }
    }
    Ok(())
}

async fn generate(
    preferences: &Preferences,
    topic: Option<String>,
    difficulty: Option<Difficulty>,
    out: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let topic = topic
        .or_else(|| preferences.last_topic())
        .ok_or("no topic given and no previous topic saved")?;
    let difficulty = difficulty.unwrap_or_else(|| preferences.last_difficulty());

    let provider = provider(preferences)?;
    let challenge = provider.generate_challenge(&topic, difficulty).await?;

    preferences.set_last_topic(&topic)?;
    preferences.set_last_difficulty(difficulty)?;
    if let Some(category) = catalog::category_of(&topic) {
        preferences.set_last_category(category)?;
    }

    let text = serde_json::to_string_pretty(&challenge)?;
    match out {
        Some(path) => {
            std::fs::write(&path, text)?;
            println!("{} ({}) written to {}", challenge.title, difficulty, path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}

async fn review(
    preferences: &Preferences,
    solution: &Path,
    challenge: &Path,
    limits: ExecutionLimits,
) -> Result<(), Box<dyn std::error::Error>> {
    let code = std::fs::read_to_string(solution)?;
    let challenge: Challenge = read_json(challenge)?;

    let verifier = Verifier::new(worker_host()?, limits);
    let results = verifier
        .verify(&code, &challenge.entry_point(), &challenge.test_cases)
        .await?;
    print_summary(&results);

    let provider = provider(preferences)?;
    let review = provider
        .validate_solution(&challenge, &code, &results)
        .await?;

    println!();
    println!(
        "{} Score: {}/100",
        if review.is_correct { "Correct." } else { "Not quite." },
        review.score
    );
    println!("{}", review.feedback);
    print_list("Strengths", &review.strengths);
    print_list("Improvements", &review.improvements);
    if let Some(approaches) = &review.alternative_approaches {
        print_list("Alternative approaches", approaches);
    }
    if let Some(complexity) = &review.complexity {
        println!("\nTime: {}  Space: {}", complexity.time, complexity.space);
    }
    Ok(())
}

fn configure(
    preferences: &Preferences,
    action: ConfigAction,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::SetKey { api_key } => {
            preferences.set_api_key(api_key.trim())?;
            println!("API key saved");
        }
        ConfigAction::ClearKey => {
            preferences.clear_api_key()?;
            println!("API key removed");
        }
        ConfigAction::Show => {
            let env = GeminiConfig::from_env();
            let key = if env.api_key.is_some() {
                "set (environment)"
            } else if preferences.has_api_key() {
                "set"
            } else {
                "not set"
            };
            println!("API key:         {}", key);
            println!("Model:           {}", env.model);
            if let Some(url) = &env.proxy_url {
                println!("Proxy:           {}", url);
            }
            println!(
                "Last topic:      {}",
                preferences.last_topic().as_deref().unwrap_or("-")
            );
            println!(
                "Last category:   {}",
                preferences.last_category().as_deref().unwrap_or("-")
            );
            println!("Last difficulty: {}", preferences.last_difficulty());
        }
        ConfigAction::Reset => {
            preferences.reset()?;
            println!("Settings cleared");
        }
    }
    Ok(())
}

fn topics(category: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let categories = match category {
        Some(name) => vec![catalog::category(name).ok_or_else(|| {
            format!(
                "unknown category `{}`, expected one of {}",
                name,
                catalog::category_names()
            )
        })?],
        None => catalog::TOPIC_CATEGORIES.iter().collect(),
    };

    for category in categories {
        println!("{}", category.category);
        for topic in category.topics {
            println!("  {}", topic);
        }
    }
    Ok(())
}

fn worker_host() -> Result<WorkerHost, Box<dyn std::error::Error>> {
    Ok(WorkerHost::Process(WorkerCommand::current_exe()?))
}

fn sandbox_worker() -> Result<(), Box<dyn std::error::Error>> {
    let worker = std::thread::Builder::new()
        .name("sandbox".to_string())
        .stack_size(WORKER_STACK_SIZE)
        .spawn(|| {
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            protocol::serve(&BoaSandbox::new(), stdin.lock(), stdout.lock())
        })?;

    worker.join().map_err(|_| "sandbox worker panicked")??;
    Ok(())
}

fn provider(preferences: &Preferences) -> Result<GeminiProvider, Box<dyn std::error::Error>> {
    let mut config = GeminiConfig::from_env();
    if config.api_key.is_none() {
        config.api_key = preferences.api_key();
    }
    let client = GeminiClient::from_config(&config)?;
    Ok(GeminiProvider::new(Arc::new(client)))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| format!("{}: {}", path.display(), e).into())
}

fn print_result(index: usize, result: &ExecutionResult) {
    let mark = if result.passed { "PASS" } else { "FAIL" };
    let time = result
        .execution_time
        .map(|t| format!(" ({:.2}ms)", t.as_secs_f64() * 1000.0))
        .unwrap_or_default();
    println!("{} Test {}{}", mark, index + 1, time);
    if result.test_case.is_hidden == Some(true) {
        return;
    }

    let args = result
        .test_case
        .input
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    println!("     input:    {}", args);
    println!("     expected: {}", result.test_case.expected_output);
    match (&result.error, &result.actual_output) {
        (Some(error), _) => println!("     error:    {}", error),
        (None, Some(actual)) => println!("     actual:   {}", actual),
        (None, None) => println!("     actual:   undefined"),
    }
}

fn print_summary(results: &[ExecutionResult]) {
    let summary = Summary::of(results);
    println!("{}/{} tests passed", summary.passed, summary.total);
}

fn print_list(title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!("\n{}:", title);
    for item in items {
        println!("  - {}", item);
    }
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
