use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sbx", version)]
#[command(about = "Sandboxed command-execution service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Internal entry point: run as the in-sandbox worker, reading framed
    /// host messages from stdin and writing framed replies to stdout. Not
    /// meant to be invoked directly; `sbx-launch` puts this subcommand at
    /// the end of the sandboxed argv.
    #[command(hide = true)]
    SandboxWorker,

    /// Run a single command through one pooled sandbox worker and stream
    /// its stdout/stderr to the terminal, exercising the full
    /// acquire -> exec -> release path manually.
    Exec {
        /// Directory the command runs in inside the sandbox.
        #[arg(long, default_value = ".")]
        dir: std::path::PathBuf,

        /// Additional host paths to bind read-write into the sandbox.
        #[arg(long = "bind")]
        extra_binds: Vec<std::path::PathBuf>,

        /// Also hide $HOME/.aws from the sandboxed command.
        #[arg(long)]
        block_aws_credentials: bool,

        /// Seconds to wait for the worker to report ready before giving up.
        #[arg(long, default_value_t = 10)]
        ready_timeout_secs: u64,

        /// Program and arguments to run inside the sandbox.
        #[arg(required = true, trailing_var_arg = true)]
        argv: Vec<String>,
    },
}
