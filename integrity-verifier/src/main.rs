use std::error::Error;
use std::process::ExitCode;

use clap::Parser;
use integrity_verifier::params::Args;
use integrity_verifier::{ConfigSource, RunContext, RunOutcome, VerifierConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let source = ConfigSource::from_process(args.properties.clone());
    let config = match VerifierConfig::resolve(&args, &source) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut context = RunContext::new(config);
    match context.run().await {
        Ok(RunOutcome::Passed(report)) => {
            println!("PASSED: {report}");
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Skipped(reason)) => {
            println!("SKIPPED: {reason}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let mut message = e.to_string();
            let mut source = e.source();
            while let Some(cause) = source {
                message.push_str(&format!(": {cause}"));
                source = cause.source();
            }
            eprintln!("FAILED: {message}");
            ExitCode::FAILURE
        }
    }
}
