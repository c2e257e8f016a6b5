//! Staged secret-guessing solver CLI.
//!
//! Keeps its state in `.solver/` under the working directory: `config.toml`,
//! the progress ledger `ledger.json`, and per-run traces in `traces/`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use gandalf_solver::agents::generator::PromptGenerator;
use gandalf_solver::core::extract::extract_with_source;
use gandalf_solver::exit_codes;
use gandalf_solver::io::config::load_config;
use gandalf_solver::io::gateway::{HttpGateway, TransportError};
use gandalf_solver::io::init::{InitOptions, SolverPaths, init_solver};
use gandalf_solver::io::ledger::{LedgerStore, load_ledger};
use gandalf_solver::io::provider::create_provider;
use gandalf_solver::io::trace::{JsonlTraceSink, NullTraceSink, TraceSink};
use gandalf_solver::logging;
use gandalf_solver::solve::{
    ReplayIntegrityError, RunExhaustedError, SolveConfig, SolveOutcome, SolveRequest,
    StageExhaustedError, new_run_id, run_solver,
};

#[derive(Parser)]
#[command(
    name = "solver",
    version,
    about = "Solve a staged password-guessing game, resuming from recorded progress"
)]
struct Cli {
    /// Working directory holding `.solver/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.solver/` with a default config.
    Init {
        /// Overwrite the config if `.solver/` already exists.
        #[arg(short, long)]
        force: bool,
    },
    /// Replay recorded progress, then solve stages until done or out of attempts.
    Solve {
        /// Attempt ceiling across all stages (overrides config).
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        max_total_attempts: Option<u32>,
        /// Attempt ceiling per stage (overrides config).
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        max_attempts_per_level: Option<u32>,
        /// Do not write `.solver/traces/<run-id>.jsonl`.
        #[arg(long)]
        no_trace: bool,
        /// Log progress at info level (unless `RUST_LOG` is set).
        #[arg(short, long)]
        verbose: bool,
    },
    /// Print the recorded progress.
    Status,
    /// Run the secret extractor on a reply and print the candidate.
    Extract {
        /// Defender reply text.
        text: String,
    },
}

impl Cli {
    fn verbose(&self) -> bool {
        matches!(self.command, Command::Solve { verbose: true, .. })
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose());
    let code = match run(cli) {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.root, force),
        Command::Solve {
            max_total_attempts,
            max_attempts_per_level,
            no_trace,
            verbose: _,
        } => cmd_solve(&cli.root, max_total_attempts, max_attempts_per_level, no_trace),
        Command::Status => cmd_status(&cli.root),
        Command::Extract { text } => {
            let extraction = extract_with_source(&text);
            println!("{}\t{}", extraction.secret, extraction.source.as_str());
            Ok(())
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.is::<StageExhaustedError>() || err.is::<RunExhaustedError>() {
        exit_codes::EXHAUSTED
    } else if err.is::<ReplayIntegrityError>() {
        exit_codes::REPLAY_MISMATCH
    } else if err.is::<TransportError>() {
        exit_codes::TRANSPORT
    } else {
        exit_codes::FAILED
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<()> {
    let paths = init_solver(root, &InitOptions { force })?;
    println!("initialized {}", paths.solver_dir.display());
    Ok(())
}

fn cmd_solve(
    root: &Path,
    max_total_attempts: Option<u32>,
    max_attempts_per_level: Option<u32>,
    no_trace: bool,
) -> Result<()> {
    let paths = SolverPaths::new(root);
    let config = load_config(&paths.config_path)?;
    let mut solve_config = SolveConfig::from_config(&config);
    if let Some(max) = max_total_attempts {
        solve_config.max_total_attempts = max;
    }
    if let Some(max) = max_attempts_per_level {
        solve_config.max_attempts_per_level = max;
    }

    let gateway = HttpGateway::new(
        &config.base_url,
        Duration::from_secs(config.request_timeout_secs),
    )?;
    let provider = create_provider(&config.provider)?;
    let generator = PromptGenerator::new(
        config.prompt_budget_bytes,
        config.provider.temperature,
        config.provider.max_tokens,
    );
    let run_id = new_run_id();
    let trace: Box<dyn TraceSink> = if no_trace {
        Box::new(NullTraceSink)
    } else {
        Box::new(JsonlTraceSink::new(&paths.root, &run_id))
    };
    let mut ledger = LedgerStore::open(&paths.ledger_path);

    let outcome = run_solver(
        &SolveRequest {
            run_id: &run_id,
            gateway: &gateway,
            provider: provider.as_ref(),
            generator: &generator,
            trace: trace.as_ref(),
            config: &solve_config,
        },
        &mut ledger,
    )?;
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &SolveOutcome) {
    for stage in &outcome.solved {
        println!(
            "level {} ({}): {} after {} attempt(s)",
            stage.level, stage.stage, stage.secret, stage.attempts
        );
    }
    println!(
        "{}: replayed {} level(s), solved {} in {} attempt(s), final stage {}",
        outcome.run_id,
        outcome.replayed_levels,
        outcome.solved.len(),
        outcome.total_attempts,
        outcome.final_stage
    );
}

fn cmd_status(root: &Path) -> Result<()> {
    let paths = SolverPaths::new(root);
    let ledger = load_ledger(&paths.ledger_path);
    println!("last completed level: {}", ledger.last_completed_level);
    for entry in &ledger.entries {
        println!("level {} ({}): {}", entry.level, entry.stage, entry.secret);
    }
    match ledger.resume_stage() {
        Some(next) => println!("next stage: {next}"),
        None if ledger.is_empty() => {
            let config = load_config(&paths.config_path)?;
            println!("next stage: {}", config.start_stage);
        }
        None => println!("next stage: unknown (resolved on replay)"),
    }
    Ok(())
}
