//! # Shell Completion Module
//!
//! ## Usage
//!
//! ```bash
//! # Generate bash completions
//! discjockey completion bash > ~/.local/share/bash-completion/completions/discjockey
//!
//! # Generate zsh completions
//! discjockey completion zsh > ~/.config/zsh/completions/_discjockey
//! ```

use crate::cli::Shell;
use clap::Command;
use clap_complete::{generate, Generator, Shell as CompletionShell};
use std::io::{self, Write};

/// Write completions for `cmd` to `out`.
pub fn write_completions<G: Generator>(gen: G, cmd: &mut Command, out: &mut dyn Write) {
    let name = cmd.get_name().to_string();
    generate(gen, cmd, name, out);
}

/// Print completions to stdout.
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command) {
    write_completions(gen, cmd, &mut io::stdout());
}

/// Convert our Shell enum to clap_complete's Shell enum
pub fn shell_to_completion_shell(shell: &Shell) -> CompletionShell {
    match shell {
        Shell::Bash => CompletionShell::Bash,
        Shell::Zsh => CompletionShell::Zsh,
        Shell::Fish => CompletionShell::Fish,
        Shell::PowerShell => CompletionShell::PowerShell,
        Shell::Elvish => CompletionShell::Elvish,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use clap::CommandFactory;

    #[test]
    fn bash_completion_mentions_subcommands() {
        let mut out = Vec::new();
        write_completions(shell_to_completion_shell(&Shell::Bash), &mut Args::command(), &mut out);
        let script = String::from_utf8(out).unwrap();
        assert!(script.contains("discjockey"));
        assert!(script.contains("play"));
        assert!(script.contains("models"));
    }
}
