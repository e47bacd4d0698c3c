use anyhow::{Context, Result};
use clap::Parser;
use covgen::config::{GenConfig, Overrides};
use covgen::coverage::ReportProcessor;
use covgen::error::GenError;
use covgen::generator::Generator;
use covgen::llm::ChatClient;
use covgen::runner::ShellRunner;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Conventional exit status after SIGINT
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "covgen",
    about = "Generate unit tests that raise coverage, keeping only the ones that pass and help",
    version
)]
struct Args {
    /// Config file (defaults to ./covgen.toml, then the user config)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Source file to cover; omit to discover files from a coverage run
    #[arg(short, long)]
    source_file_path: Option<PathBuf>,

    /// Test file for the source file (derived when omitted)
    #[arg(short, long)]
    test_file_path: Option<PathBuf>,

    /// Command that runs the tests and writes the coverage report
    #[arg(short = 'c', long)]
    test_command: Option<String>,

    /// Directory the test command runs in
    #[arg(long)]
    test_dir: Option<PathBuf>,

    /// Coverage report written by the test command
    #[arg(short = 'r', long)]
    coverage_report_path: Option<PathBuf>,

    /// Report format: cobertura, lcov, go or auto
    #[arg(long)]
    coverage_format: Option<String>,

    /// Target coverage in percent (default: 80)
    #[arg(short, long)]
    desired_coverage: Option<f64>,

    /// Maximum generation rounds per file (default: 5)
    #[arg(short = 'i', long)]
    max_iterations: Option<u32>,

    /// Model id sent to the chat completions API
    #[arg(short, long)]
    model: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long)]
    api_base_url: Option<String>,

    /// `api-version` query parameter for the API
    #[arg(long)]
    api_version: Option<String>,

    /// Extra instructions for the test generation prompt
    #[arg(long)]
    additional_prompt: Option<String>,

    /// Language override: go, javascript, typescript, java, python
    #[arg(short, long)]
    language: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Write the effective configuration to PATH and exit
    #[arg(long, value_name = "PATH")]
    init_config: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            source_file_path: self.source_file_path.clone(),
            test_file_path: self.test_file_path.clone(),
            test_command: self.test_command.clone(),
            test_dir: self.test_dir.clone(),
            coverage_report_path: self.coverage_report_path.clone(),
            coverage_format: self.coverage_format.clone(),
            desired_coverage: self.desired_coverage,
            max_iterations: self.max_iterations,
            model: self.model.clone(),
            api_base_url: self.api_base_url.clone(),
            api_version: self.api_version.clone(),
            additional_prompt: self.additional_prompt.clone(),
            language: self.language.clone(),
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("covgen=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

async fn run(args: Args, session_id: String, cancel: CancellationToken) -> Result<()> {
    let config = GenConfig::load(args.config.as_deref(), args.overrides())?;

    if let Some(path) = &args.init_config {
        config.save(path)?;
        eprintln!("Wrote configuration to {}", path.display());
        return Ok(());
    }

    let model = ChatClient::new(
        config.model.clone(),
        config.api_base_url.as_deref(),
        config.api_version.as_deref(),
        session_id,
    )
    .context("failed to set up model client")?;
    let report_path = match &config.test_dir {
        Some(dir) if config.coverage_report_path.is_relative() => {
            dir.join(&config.coverage_report_path)
        }
        _ => config.coverage_report_path.clone(),
    };
    let coverage = ReportProcessor::new(report_path, config.report_format()?);
    tracing::debug!(
        report = %coverage.path().display(),
        format = %config.coverage_format,
        "coverage report location"
    );

    let mut generator = Generator::new(
        config,
        Arc::new(model),
        Arc::new(ShellRunner),
        Arc::new(coverage),
    );
    generator.run(&cancel).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let session_id = uuid::Uuid::new_v4().to_string();
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current step");
            on_signal.cancel();
        }
    });

    let span = tracing::info_span!("covgen", session = %session_id);
    match run(args, session_id, cancel).instrument(span).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if err
                .downcast_ref::<GenError>()
                .is_some_and(GenError::is_cancelled)
            {
                eprintln!("{}", err);
                return ExitCode::from(EXIT_CANCELLED);
            }
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
