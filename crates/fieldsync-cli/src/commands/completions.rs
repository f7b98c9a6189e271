//! Shell completion scripts for the `fieldsync` binary

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_complete::{generate, shells};

use crate::cli::{Cli, CompletionShell};
use crate::error::CliError;

const BIN_NAME: &str = "fieldsync";

impl CompletionShell {
    /// File name each shell looks for when loading completions from a directory.
    pub const fn script_name(self) -> &'static str {
        match self {
            Self::Bash => "fieldsync.bash",
            Self::Zsh => "_fieldsync",
            Self::Fish => "fieldsync.fish",
        }
    }
}

/// Completion script for every `fieldsync` subcommand and option.
pub fn render_completions(shell: CompletionShell) -> Vec<u8> {
    let mut command = Cli::command();
    let mut script = Vec::new();
    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut command, BIN_NAME, &mut script),
        CompletionShell::Zsh => generate(shells::Zsh, &mut command, BIN_NAME, &mut script),
        CompletionShell::Fish => generate(shells::Fish, &mut command, BIN_NAME, &mut script),
    }
    script
}

/// Where the script lands: an existing directory gets the shell's conventional file name.
fn script_target(shell: CompletionShell, output_path: &Path) -> PathBuf {
    if output_path.is_dir() {
        output_path.join(shell.script_name())
    } else {
        output_path.to_path_buf()
    }
}

/// Print the script, or write it to `output_path` and print where it went.
pub fn run_completions(shell: CompletionShell, output_path: Option<&Path>) -> Result<(), CliError> {
    let script = render_completions(shell);
    match output_path {
        Some(path) => {
            let target = script_target(shell, path);
            std::fs::write(&target, &script)?;
            println!("{}", target.display());
        }
        None => io::stdout().write_all(&script)?,
    }
    Ok(())
}
