//! # recoder CLI
//!
//! Command-line interface for the self-correcting code generator.
//!
//! Usage:
//!   recoder <prompt>
//!   recoder run <prompt>
//!   recoder validate <file.py | ->
//!   recoder config
//!
//! Examples:
//!   recoder "write a function that parses ISO dates"
//!   recoder --json -n 5 "merge two sorted lists"
//!   recoder validate solution.py

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use recoder_agent::{Driver, GenerationRequest, RunEvent};
use recoder_core::{
    load_config, validate_code, CodeSolution, Error, ErrorKind, OpenAIProvider, PythonSandbox,
    RecoderConfig, Result, StructuredModelClient, ValidationReport, DEFAULT_CONFIG_FILE,
};
use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "recoder")]
#[command(author, version, about = "recoder - code generation that runs and fixes its own output")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Prompt to solve (when not using subcommands)
    #[arg(trailing_var_arg = true)]
    prompt: Vec<String>,

    /// Config file (default: ./recoder.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the attempt budget
    #[arg(short = 'n', long, global = true)]
    max_attempts: Option<u32>,

    /// Debug logging and full progress output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode - only show the final solution
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Print events as JSON lines on stdout
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a solution for a prompt
    Run {
        /// The prompt; read from stdin when omitted
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Check syntax and imports of a Python file ("-" for stdin)
    Validate {
        #[arg(required = true)]
        file: String,
    },
    /// Print the effective configuration
    Config,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).compact())
        .init();
}

/// Load `recoder.toml` (or `--config`), then apply environment overrides
fn load(cli: &Cli) -> Result<RecoderConfig> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    if cli.config.is_some() && !path.exists() {
        return Err(Error::new(
            ErrorKind::FileNotFound,
            format!("config file {} not found", path.display()),
        )
        .with_operation("cli::load"));
    }

    let mut config = load_config(&path)?;
    config.apply_env();
    config.validate()?;
    debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

fn read_prompt() -> Result<String> {
    eprint!("Enter your Question: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn print_solution(solution: &CodeSolution) {
    println!("\nFinal Solution");
    println!("{}", "=".repeat(40));
    println!("\nDescription:\n{}", solution.description);
    println!("\nImports:\n{}", solution.imports);
    println!("\nCode:\n{}", solution.body);
}

/// Human-readable rendering: progress on stderr, the solution on stdout
fn render(event: &RunEvent, quiet: bool) {
    match event {
        RunEvent::Status(status) if !quiet => eprintln!("--- {} ---", status.label),
        RunEvent::Message(text) if !quiet => eprintln!("{}\n", text),
        RunEvent::Status(_) | RunEvent::Message(_) | RunEvent::Code(_) => {}
        RunEvent::Complete(done) => {
            print_solution(&done.solution);
            if !done.success {
                eprintln!(
                    "\nNo passing solution after {} attempts; showing the last one.",
                    done.total_attempts
                );
            }
        }
        RunEvent::Error(err) => {
            eprintln!("Error after {} attempt(s): {}", err.attempts, err.message);
        }
    }
}

async fn run(cli: &Cli, prompt: &[String]) -> Result<bool> {
    let config = load(cli)?;
    let prompt = if prompt.is_empty() {
        read_prompt()?
    } else {
        prompt.join(" ")
    };

    let provider = OpenAIProvider::new(config.provider_config()).map_err(Error::from)?;
    let model = StructuredModelClient::new(provider)
        .with_model(config.model.model.clone())
        .with_temperature(config.model.temperature)
        .with_max_tokens(config.model.max_tokens);
    let driver = Driver::from_config(model, PythonSandbox::new(config.sandbox_config()), &config.run)?;

    let request = GenerationRequest {
        prompt,
        max_attempts: cli.max_attempts,
        verbose: Some(config.run.verbose && !cli.quiet),
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    info!(model = %config.model.model, base_url = %config.model.base_url, "starting run");
    let events = driver.run(request, cancel);
    futures_util::pin_mut!(events);

    let mut success = false;
    while let Some(event) = events.next().await {
        if cli.json {
            println!("{}", event.to_json()?);
        } else {
            render(&event, cli.quiet);
        }
        if let RunEvent::Complete(done) = &event {
            success = done.success;
        }
    }
    Ok(success)
}

fn render_validation(report: &ValidationReport) {
    if report.valid {
        println!("{}", report.message);
        return;
    }
    let error = report.error.as_deref().unwrap_or("Error");
    match report.line {
        Some(line) => println!("{} (line {}): {}", error, line, report.message),
        None => println!("{}: {}", error, report.message),
    }
}

async fn validate(cli: &Cli, file: &str) -> Result<bool> {
    let config = load(cli)?;
    let code = if file == "-" {
        let mut code = String::new();
        io::stdin().read_to_string(&mut code)?;
        code
    } else {
        std::fs::read_to_string(file)
            .map_err(|e| Error::from(e).with_context("path", file.to_string()))?
    };

    let sandbox = PythonSandbox::new(config.sandbox_config());
    let report = validate_code(&sandbox, &code, &CancellationToken::new()).await?;

    if cli.json {
        let json = serde_json::to_string(&report)
            .map_err(|e| Error::serialization_failed(e.to_string()))?;
        println!("{}", json);
    } else {
        render_validation(&report);
    }
    Ok(report.valid)
}

fn show_config(cli: &Cli) -> Result<bool> {
    let config = load(cli)?;
    print!("{}", config.redacted().to_toml()?);
    Ok(true)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Some(Commands::Run { prompt }) => run(&cli, prompt).await,
        Some(Commands::Validate { file }) => validate(&cli, file).await,
        Some(Commands::Config) => show_config(&cli),
        None => run(&cli, &cli.prompt).await,
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            debug!(error = ?e, "command failed");
            ExitCode::FAILURE
        }
    }
}
