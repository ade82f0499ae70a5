use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::package::{PackageLayout, ROOT_DIR};

#[derive(Parser, Debug)]
#[command(name = "packtrace")]
#[command(about = "Package a program with every file it touches at runtime, then replay it anywhere")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Trace a command and capture its filesystem dependencies into a package
    Pack(PackArgs),

    /// Replay a command against a previously captured package
    Exec(ExecArgs),
}

#[derive(Parser, Debug)]
pub struct PackArgs {
    /// Command to trace
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    /// Package directory to capture into
    #[arg(short = 'd', long = "package-dir", value_name = "DIR", default_value = "packtrace-package")]
    pub package_dir: PathBuf,

    /// Hand capture off to a cooperating remote tracer on outbound ssh
    #[arg(long)]
    pub follow_ssh: bool,

    /// Stream per-syscall and per-path events to stderr
    #[arg(short, long)]
    pub verbose: bool,

    /// Write the full event stream as JSONL to a file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Disable colored terminal output
    #[arg(long)]
    pub no_color: bool,
}

#[derive(Parser, Debug)]
pub struct ExecArgs {
    /// Command to replay
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    /// Package directory captured by `packtrace pack`
    #[arg(short = 'd', long = "package-dir", value_name = "DIR", default_value = "packtrace-package")]
    pub package_dir: PathBuf,

    /// Hand tracing off to a cooperating remote tracer on outbound ssh
    #[arg(long)]
    pub follow_ssh: bool,

    /// Stream per-syscall and per-path events to stderr
    #[arg(short, long)]
    pub verbose: bool,

    /// Write the full event stream as JSONL to a file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Disable colored terminal output
    #[arg(long)]
    pub no_color: bool,
}

impl PackArgs {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.command.is_empty() {
            anyhow::bail!("Command is required");
        }
        Ok(())
    }
}

impl ExecArgs {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.command.is_empty() {
            anyhow::bail!("Command is required");
        }

        let layout = PackageLayout::new(&self.package_dir);
        if layout.verify().is_err() {
            anyhow::bail!(
                "No captured package at {} (expected a {} subdirectory)",
                self.package_dir.display(),
                ROOT_DIR
            );
        }

        Ok(())
    }
}
