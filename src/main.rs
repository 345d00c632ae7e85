//! Snippet Test Runner
//!
//! Runs the unittest suite of a Python snippet inside a throwaway Docker
//! container and prints the normalized results, or serves the same
//! pipeline over HTTP.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use snippet_test_runner::{
    api::runs::RunResponse,
    config::{Environment, Settings},
    feedback::{CalculatedFeedback, FeedbackRequester, GeminiFeedback},
    logging::{self, ConsoleTarget},
    pipeline::{Pipeline, PipelineError, SnippetSubmission},
    sandbox::DockerRuntime,
    server::App,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// Exit code when a test failed, errored or none ran
const EXIT_TESTS_FAILED: u8 = 1;

/// Exit code when the sandbox could not be set up or the run aborted
const EXIT_SETUP_FAILED: u8 = 2;

/// Snippet Test Runner
///
/// Runs tests for Python snippets in an isolated Docker sandbox.
#[derive(Parser, Debug)]
#[command(name = "snippet-test-runner")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level: trace, debug, info, warn, error (overrides LOG_LEVEL env var)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Environment: dev, staging, prod (overrides ENVIRONMENT env var)
    #[arg(short, long, global = true)]
    env: Option<Environment>,

    /// Log file path for JSON logs (enables file logging with 10MB rotation)
    /// Example: --log-file /var/log/snippet-runner/app.log
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a snippet's tests once and print the report as JSON
    Run(RunArgs),

    /// Serve the HTTP API
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Python source file to test
    source: PathBuf,

    /// unittest module to run against the snippet
    #[arg(short, long)]
    tests: Option<PathBuf>,

    /// Also request feedback (uses Gemini when GOOGLE_API_KEY is set)
    #[arg(long)]
    feedback: bool,

    /// Test timeout in seconds (overrides SANDBOX_EXECUTION_TIMEOUT)
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Port to listen on (overrides PORT env var)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides HOST env var)
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match start(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Fatal error");
            eprintln!("error: {:#}", e);
            ExitCode::from(EXIT_SETUP_FAILED)
        }
    }
}

async fn start(cli: Cli) -> Result<ExitCode> {
    // Load configuration first (before logging, so we can use log_level)
    let mut settings = Settings::load()?;

    if let Some(log_level) = cli.log_level {
        settings.log_level = log_level;
    }
    if let Some(env) = cli.env {
        settings.environment = env;
    }

    match cli.command {
        Command::Run(args) => {
            if let Some(timeout) = args.timeout {
                settings.sandbox.execution_timeout = Duration::from_secs(timeout);
            }
            settings.validate()?;
            logging::init(&settings.log_level, cli.log_file.as_deref(), ConsoleTarget::Stderr)?;

            run_once(settings, args).await
        }
        Command::Serve(args) => {
            if let Some(port) = args.port {
                settings.port = port;
            }
            if let Some(host) = args.host {
                settings.host = host;
            }
            settings.validate()?;
            logging::init(&settings.log_level, cli.log_file.as_deref(), ConsoleTarget::Stdout)?;

            tracing::info!(
                app_name = %settings.app_name,
                version = %settings.app_version,
                environment = %settings.environment,
                host = %settings.host,
                port = %settings.port,
                image = %settings.sandbox.image,
                "Starting application"
            );

            let app = App::new(settings).await?;
            app.run_with_graceful_shutdown().await?;

            tracing::info!("Application shutdown complete");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// One-shot run: read the files, run the pipeline, print JSON to stdout
async fn run_once(settings: Settings, args: RunArgs) -> Result<ExitCode> {
    let source = std::fs::read_to_string(&args.source)
        .with_context(|| format!("Failed to read {}", args.source.display()))?;
    let test_code = match &args.tests {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        None => None,
    };

    let runtime = DockerRuntime::connect()
        .await
        .context("Docker daemon not reachable")?;
    let pipeline = Pipeline::new(&settings, Arc::new(runtime));

    let submission = match test_code {
        Some(tests) => SnippetSubmission::new(source).with_tests(tests),
        None => SnippetSubmission::new(source),
    };

    let result = if args.feedback {
        let requester: Box<dyn FeedbackRequester> = if settings.feedback.is_configured() {
            Box::new(GeminiFeedback::new(&settings.feedback)?)
        } else {
            tracing::info!("GOOGLE_API_KEY not set, using calculated feedback");
            Box::new(CalculatedFeedback)
        };
        pipeline
            .evaluate(&submission, requester.as_ref())
            .await
            .map(|evaluation| RunResponse {
                report: evaluation.report,
                feedback: Some(evaluation.feedback),
            })
    } else {
        pipeline.run(&submission).await.map(|report| RunResponse {
            report,
            feedback: None,
        })
    };

    let response = match result {
        Ok(response) => response,
        Err(e @ PipelineError::Setup(_)) => {
            eprintln!("setup failed: {}", e);
            return Ok(ExitCode::from(EXIT_SETUP_FAILED));
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", serde_json::to_string_pretty(&response)?);

    if response.report.summary.all_passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_TESTS_FAILED))
    }
}
