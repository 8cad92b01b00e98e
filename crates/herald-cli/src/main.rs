//! `herald` binary: one invocation per CI pipeline stage.
//!
//! `prepare` gates the event and sets up the run, `finalize` reports the
//! outcome, and `run` does both around an in-process assistant execution.
//! Every outcome that reaches finalize exits 0, including "no trigger
//! found" and an assistant failure that was reported into the tracking
//! comment; only a stage that throws exits non-zero.

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use herald_core::RunOutcome;
use herald_pipeline::{
    build_platform, detect_provider, resolve_context, resolve_credential, ClaudeCliRunner,
    EnvSource, Pipeline,
};

use crate::args::{Cli, Command};

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_cli(cli).await
}

async fn run_cli(cli: Cli) -> Result<()> {
    let env = EnvSource::from_process();
    let provider = detect_provider(&env, cli.provider.as_deref())
        .context("could not determine the platform provider")?;
    let credential =
        resolve_credential(provider, &env).context("could not resolve an API credential")?;
    let context = resolve_context(provider, &env, cli.trigger_options())
        .context("could not resolve the run context from the CI environment")?;
    let platform = build_platform(&context, &credential)
        .context("could not construct the platform client")?;
    let pipeline = Pipeline::new(platform, context, credential.is_ambient(), cli.paths());

    match &cli.command {
        Command::Prepare => {
            let report = pipeline.prepare().await?;
            if report.triggered {
                let branch = report
                    .plan
                    .as_ref()
                    .map(|plan| plan.current_branch.as_str())
                    .unwrap_or_default();
                println!(
                    "herald prepare: run accepted ({}); working branch {branch}",
                    report.decision.as_str()
                );
            } else {
                println!("herald prepare: no trigger found; run skipped");
            }
        }
        Command::Finalize(finalize_args) => {
            pipeline.finalize(finalize_args.to_request()).await?;
            println!("herald finalize: outcome recorded");
        }
        Command::Run(run_args) => {
            let runner = ClaudeCliRunner::new(run_args.runner_config())
                .context("invalid assistant runner configuration")?;
            let summary = pipeline.run(&runner).await?;
            if !summary.triggered {
                println!("herald run: no trigger found; run skipped");
                return Ok(());
            }
            match summary.outcome {
                Some(RunOutcome::Success) => {
                    println!("herald run: assistant finished successfully");
                }
                _ => {
                    println!("herald run: assistant failed; failure reported in the tracking comment");
                    if let Some(message) = &summary.error_message {
                        eprintln!("herald run: {message}");
                    }
                }
            }
        }
    }
    Ok(())
}
