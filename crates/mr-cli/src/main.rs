mod shell;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use mr_core::config::DEFAULT_CONFIG_FILE;
use mr_core::{JobConfig, JobManager, OutputHub};
use tokio_util::sync::CancellationToken;

/// Run a fixed set of jobs side by side.
#[derive(Debug, Parser)]
#[command(name = "mr", version, about)]
struct Args {
	/// Job configuration (TOML, or JSON when the name ends in .json)
	#[arg(short = 'f', long = "file", default_value = DEFAULT_CONFIG_FILE)]
	file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
	tracing_subscriber::fmt().with_writer(std::io::stderr).init();
	let args = Args::parse();

	let config = match JobConfig::load(&args.file) {
		Ok(config) => config,
		Err(e) => {
			tracing::error!("{}", e);
			return ExitCode::FAILURE;
		}
	};

	let manager = JobManager::new(config, OutputHub::stdout(), &CancellationToken::new());
	manager.start_jobs();

	let lines = shell::spawn_stdin_reader();
	tokio::spawn(shell::run(Arc::clone(&manager), lines, tokio::io::stdout()));

	manager
		.wait_terminate(async {
			if let Err(e) = mr_core::signal::wait_for_shutdown_signal().await {
				tracing::error!("failed to install signal handlers: {}", e);
			}
		})
		.await;
	ExitCode::SUCCESS
}
