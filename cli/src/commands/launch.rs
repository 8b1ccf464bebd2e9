//! Launch command implementation
//!
//! Starts a target program with the collection activation flag set in its
//! environment. The collector linked into the target (or preloaded into it)
//! checks the flag once at startup and enables itself.

use anyhow::{Context, Result};
use clap::Args;
use std::process::Command;
use tracelens_collector::ACTIVATION_ENV;
use tracing::info;

#[derive(Args, Debug)]
pub struct LaunchArgs {
    /// Program to launch
    pub program: String,

    /// Arguments passed through to the program
    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

pub fn run(args: LaunchArgs) -> Result<()> {
    info!(program = %args.program, "launching with trace collection activated");

    let mut command = Command::new(&args.program);
    command.args(&args.args).env(ACTIVATION_ENV, "1");

    exec_program(command, &args.program)
}

/// Replace this process with the target program.
#[cfg(unix)]
fn exec_program(mut command: Command, program: &str) -> Result<()> {
    use std::os::unix::process::CommandExt;
    // exec only returns on failure.
    let err = command.exec();
    Err(err).with_context(|| format!("failed to launch {program}"))
}

/// Run the target program and exit with its status.
#[cfg(not(unix))]
fn exec_program(mut command: Command, program: &str) -> Result<()> {
    let status = command
        .status()
        .with_context(|| format!("failed to launch {program}"))?;
    std::process::exit(status.code().unwrap_or(1));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_errors() {
        let args = LaunchArgs {
            program: "/nonexistent/tracelens-test-binary".to_string(),
            args: vec![],
            verbose: false,
        };
        assert!(run(args).is_err());
    }
}
