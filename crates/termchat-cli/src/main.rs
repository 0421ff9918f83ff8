use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use termchat_core::text;
use termchat_core::{CompletionPipeline, CompletionSettings, Config, ExchangeMode, HttpTransport};

mod command;
mod exit_codes;
mod logging;
mod term;
mod window;

use command::{CommandRunner, TerminalKeys};
use term::{Spinner, TermColor};

#[derive(Parser, Debug)]
#[command(name = "termchat", version)]
#[command(about = "Chat with an OpenAI-compatible model from the terminal")]
struct Cli {
    /// Prompt to send; in interactive mode it becomes the first message
    prompt: Option<String>,

    /// Enters interactive mode
    #[arg(short, long)]
    interactive: bool,

    /// Path to the rc file (default: $XDG_CONFIG_HOME/termchatrc.json)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Wait for replies without the progress indicator
    #[arg(long)]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    term::install_panic_hook();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(parse_exit_code(&e));
        }
    };
    match run(cli).await {
        Ok(()) => ExitCode::from(exit_codes::RECOVERABLE),
        Err(e) => {
            term::print_color(&format!("{:#}", e), TermColor::Red);
            ExitCode::from(exit_codes::UNRECOVERABLE)
        }
    }
}

/// `--help` and `--version` land here too; only real usage errors fail.
fn parse_exit_code(err: &clap::Error) -> u8 {
    if err.use_stderr() {
        exit_codes::UNRECOVERABLE
    } else {
        exit_codes::RECOVERABLE
    }
}

async fn run(cli: Cli) -> Result<()> {
    if cli.prompt.is_none() && !cli.interactive {
        bail!("Invalid arguments.\nUsage: termchat \"how to create a file via the terminal?\"");
    }

    let config = Config::load(cli.config.as_deref())?;
    let session = Session::new(&config, cli.no_progress);

    if cli.interactive {
        session.interactive(cli.prompt.as_deref()).await
    } else if let Some(prompt) = cli.prompt.as_deref() {
        session.exchange(prompt).await
    } else {
        Ok(())
    }
}

struct Session {
    pipeline: CompletionPipeline,
    settings: CompletionSettings,
    runner: CommandRunner,
}

impl Session {
    fn new(config: &Config, no_progress: bool) -> Self {
        let settings = config.completion_settings();
        let mode = if no_progress {
            ExchangeMode::Inline
        } else {
            ExchangeMode::Worker(Arc::new(Spinner::new(&settings.model)))
        };

        Self {
            pipeline: CompletionPipeline::new(Arc::new(HttpTransport::new())).with_mode(mode),
            settings,
            runner: CommandRunner::default(),
        }
    }

    /// Read prompts until EOF. Empty lines just prompt again.
    async fn interactive(&self, first: Option<&str>) -> Result<()> {
        if let Err(e) = window::clear(&mut io::stdout()) {
            tracing::debug!(error = %e, "could not clear screen");
        }

        if let Some(prompt) = first {
            self.exchange(prompt).await?;
        }

        loop {
            print!("({})> ", self.settings.model);
            io::stdout().flush()?;

            let Some(line) = read_prompt(|line| io::stdin().read_line(line)).await? else {
                println!();
                return Ok(());
            };

            let input = line.trim_end_matches(['\n', '\r']);
            if input.trim().is_empty() {
                continue;
            }

            self.exchange(input).await?;
        }
    }

    /// One prompt: complete, show the reply, then offer any command in it.
    async fn exchange(&self, input: &str) -> Result<()> {
        let reply = self
            .pipeline
            .complete(&self.settings, input)
            .await
            .context("Could not get a response from the completions endpoint")?;
        let reply = text::unescape(&reply, '"');

        show(&reply, &self.settings.model)?;

        if let Some(command) = command::extract(&reply) {
            // Key read and child process both block
            let result = tokio::task::block_in_place(|| {
                self.runner.confirm_and_run(
                    command,
                    &self.settings.model,
                    &mut TerminalKeys,
                    &mut io::stdout(),
                    &self.pipeline,
                )
            });
            match result {
                Ok(Some(output)) => term::print_color(
                    &format!("Captured {} lines of output for the conversation", output.lines().count()),
                    TermColor::Green,
                ),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "command execution failed");
                    term::print_color(&e.to_string(), TermColor::Red);
                }
            }
        }

        Ok(())
    }
}

/// One line from a blocking reader, run off the async workers. `None` at EOF.
async fn read_prompt<F>(read_line: F) -> Result<Option<String>>
where
    F: FnOnce(&mut String) -> io::Result<usize> + Send + 'static,
{
    let read = tokio::task::spawn_blocking(move || {
        let mut line = String::new();
        read_line(&mut line).map(|n| (n > 0).then_some(line))
    });
    read.await
        .context("Prompt reader stopped")?
        .context("Failed to read prompt")
}

/// Draw the reply in a window, or print it plainly when there is no terminal
/// to draw into.
fn show(reply: &str, model: &str) -> Result<()> {
    let laid_out = window::terminal_columns().and_then(|columns| window::layout(reply, model, columns));
    match laid_out {
        Ok(window) => window::render(&window, &mut io::stdout().lock()).context("Failed to draw chat window")?,
        Err(e) => {
            tracing::debug!(error = %e, "skipping chat window");
            term::print_color(reply, TermColor::None);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_one_shot_prompt() {
        let cli = Cli::try_parse_from(["termchat", "how do I list files?"]).unwrap();
        assert_eq!(cli.prompt.as_deref(), Some("how do I list files?"));
        assert!(!cli.interactive);
        assert!(!cli.no_progress);
    }

    #[test]
    fn test_interactive_flags() {
        let short = Cli::try_parse_from(["termchat", "-i"]).unwrap();
        assert!(short.interactive);
        assert!(short.prompt.is_none());

        let long = Cli::try_parse_from(["termchat", "--interactive", "--config", "/tmp/rc.json", "--no-progress"]).unwrap();
        assert!(long.interactive);
        assert!(long.no_progress);
        assert_eq!(long.config, Some(PathBuf::from("/tmp/rc.json")));
    }

    #[test]
    fn test_bad_arguments_exit_unrecoverable() {
        for args in [
            vec!["termchat", "--bogus"],
            vec!["termchat", "one", "two"],
            vec!["termchat", "--config"],
        ] {
            let err = Cli::try_parse_from(args.clone()).unwrap_err();
            assert_eq!(parse_exit_code(&err), exit_codes::UNRECOVERABLE, "{:?}", args);
        }
    }

    #[test]
    fn test_help_and_version_exit_cleanly() {
        for flag in ["--help", "--version"] {
            let err = Cli::try_parse_from(["termchat", flag]).unwrap_err();
            assert_eq!(parse_exit_code(&err), exit_codes::RECOVERABLE, "{}", flag);
        }
    }

    #[tokio::test]
    async fn test_read_prompt_line_and_eof() {
        let line = read_prompt(|buf| {
            buf.push_str("list files\n");
            Ok(buf.len())
        })
        .await
        .unwrap();
        assert_eq!(line.as_deref(), Some("list files\n"));

        assert_eq!(read_prompt(|_| Ok(0)).await.unwrap(), None);

        let err = read_prompt(|_| Err(io::Error::new(io::ErrorKind::InvalidData, "not utf-8")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read prompt"));
    }

    #[tokio::test]
    async fn test_missing_prompt_is_usage_error() {
        let cli = Cli::try_parse_from(["termchat"]).unwrap();
        let err = run(cli).await.unwrap_err();
        assert!(err.to_string().contains("Invalid arguments"));
    }
}
