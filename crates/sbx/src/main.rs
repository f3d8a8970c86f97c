use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sbx_launch::LaunchConfig;
use tokio_util::sync::CancellationToken;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the wire protocol when running as the worker, so
    // logging must never default to it.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::SandboxWorker => {
            sbx_worker::run(tokio::io::stdin(), tokio::io::stdout()).await?;
        }
        Commands::Exec {
            dir,
            extra_binds,
            block_aws_credentials,
            ready_timeout_secs,
            argv,
        } => {
            let exit_code = handle_exec(dir, extra_binds, block_aws_credentials, ready_timeout_secs, argv).await?;
            std::process::exit(exit_code);
        }
    }

    Ok(())
}

async fn handle_exec(
    dir: std::path::PathBuf,
    extra_binds: Vec<std::path::PathBuf>,
    block_aws_credentials: bool,
    ready_timeout_secs: u64,
    argv: Vec<String>,
) -> Result<i32> {
    // `dir` is handed to sbx-launch uncanonicalized: `sbx_launch::prepare`
    // creates it if missing and resolves symlinks itself, so canonicalizing
    // here first would reject a `--dir` that doesn't exist yet.
    let config = LaunchConfig {
        work_dir: dir,
        extra_binds,
        block_aws_credentials,
    };
    let pool = sbx_host::WorkerPool::new(
        config,
        sbx_host::PoolConfig {
            capacity: 1,
            ready_deadline: Duration::from_secs(ready_timeout_secs),
        },
    );

    let cancellation = CancellationToken::new();
    let ctrl_c = tokio::spawn({
        let cancellation = cancellation.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancellation.cancel();
            }
        }
    });

    let mut handle = pool
        .acquire(cancellation.clone())
        .await
        .context("starting sandbox worker")?;

    let req = sbx_host::ExecRequest {
        argv: argv.into_iter().map(String::into_bytes).collect(),
        dir: handle.work_dir().to_string_lossy().into_owned(),
        env: HashMap::new(),
        stdin: Some(Box::new(tokio::io::stdin())),
        stdout: Some(Box::new(tokio::io::stdout())),
        stderr: Some(Box::new(tokio::io::stderr())),
    };

    let result = handle.exec(req, cancellation).await;
    pool.release(handle).await;
    pool.close().await;
    ctrl_c.abort();

    let outcome = result.context("running command in sandbox")?;
    if !outcome.error.is_empty() {
        tracing::error!(error = %outcome.error, "execution failed");
    }
    Ok(outcome.exit_code)
}
