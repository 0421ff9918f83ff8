//! Shell commands proposed by the model
//!
//! A reply may wrap a command in backticks. The user confirms with a single
//! key press; the command's output then goes back into the conversation as a
//! developer note so the next request can refer to it.

use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use termchat_core::{CompletionPipeline, ContextError, Role, MAX_MESSAGE_LEN};
use thiserror::Error;

use crate::term::RawModeGuard;

pub const COMMAND_DELIMITER: char = '`';
pub const COMMAND_MIN_LEN: usize = 2;
pub const COMMAND_MAX_LEN: usize = MAX_MESSAGE_LEN;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to read confirmation: {0}")]
    Terminal(#[source] io::Error),

    #[error("failed to execute `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read output of `{command}`: {source}")]
    Output {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("could not record command output: {0}")]
    Record(#[from] ContextError),
}

/// The text between the first two delimiters, if it is a plausible command.
pub fn extract(text: &str) -> Option<&str> {
    let mut parts = text.splitn(3, COMMAND_DELIMITER);
    parts.next()?;
    let candidate = parts.next()?;
    // Needs a closing delimiter
    parts.next()?;

    let len = candidate.chars().count();
    (COMMAND_MIN_LEN..=COMMAND_MAX_LEN)
        .contains(&len)
        .then_some(candidate)
}

pub trait KeySource {
    fn read_key(&mut self) -> io::Result<char>;
}

/// Reads one key press from the terminal in raw mode.
pub struct TerminalKeys;

impl KeySource for TerminalKeys {
    fn read_key(&mut self) -> io::Result<char> {
        let _raw = RawModeGuard::acquire()?;
        loop {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                return Ok(match key.code {
                    KeyCode::Char(c) => c,
                    KeyCode::Enter => '\n',
                    _ => '\0',
                });
            }
        }
    }
}

pub struct CommandRunner {
    shell: String,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl CommandRunner {
    pub fn new(shell: &str) -> Self {
        Self {
            shell: shell.to_string(),
        }
    }

    /// Ask before running `command`. Only `y`/`Y` runs it; any other key
    /// returns `Ok(None)`. Output is echoed to `out` line by line and recorded
    /// in the pipeline's context.
    pub fn confirm_and_run(
        &self,
        command: &str,
        model: &str,
        keys: &mut impl KeySource,
        out: &mut impl Write,
        pipeline: &CompletionPipeline,
    ) -> Result<Option<String>, ExecError> {
        writeln!(out, "> {} would like to execute (Y/n): {}", model, command)
            .and_then(|_| out.flush())
            .map_err(ExecError::Terminal)?;

        let answer = keys.read_key().map_err(ExecError::Terminal)?;
        if !matches!(answer, 'y' | 'Y') {
            tracing::info!(command, "command declined");
            return Ok(None);
        }

        let output = self.run(command, out)?;
        pipeline.record(&output, Role::Developer)?;
        Ok(Some(output))
    }

    fn run(&self, command: &str, out: &mut impl Write) -> Result<String, ExecError> {
        tracing::info!(command, shell = %self.shell, "running command");

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| ExecError::SpawnFailed {
                command: command.to_string(),
                source,
            })?;

        let captured = match capture(&mut child, out) {
            Ok(captured) => captured,
            Err(source) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExecError::Output {
                    command: command.to_string(),
                    source,
                });
            }
        };

        let status = child.wait().map_err(|source| ExecError::Output {
            command: command.to_string(),
            source,
        })?;
        if !status.success() {
            tracing::warn!(command, %status, "command exited unsuccessfully");
        }

        Ok(captured)
    }
}

fn capture(child: &mut Child, out: &mut impl Write) -> io::Result<String> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdout was not captured"))?;
    let mut reader = BufReader::new(stdout);

    let mut captured = String::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        out.write_all(text.as_bytes())?;
        captured.push_str(&text);
    }
    out.flush()?;

    Ok(captured)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use termchat_core::HttpTransport;

    struct Scripted(char);

    impl KeySource for Scripted {
        fn read_key(&mut self) -> io::Result<char> {
            Ok(self.0)
        }
    }

    struct Broken;

    impl KeySource for Broken {
        fn read_key(&mut self) -> io::Result<char> {
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stdin closed"))
        }
    }

    fn pipeline() -> CompletionPipeline {
        // Never used for an exchange in these tests
        CompletionPipeline::new(Arc::new(HttpTransport::new()))
    }

    #[test]
    fn test_extract_first_pair() {
        assert_eq!(extract("Run `echo hi` please"), Some("echo hi"));
        assert_eq!(extract("`ls -la` then `pwd`"), Some("ls -la"));
    }

    #[test]
    fn test_extract_needs_two_delimiters() {
        assert_eq!(extract("no backticks here"), None);
        assert_eq!(extract("only `one"), None);
    }

    #[test]
    fn test_extract_length_bounds() {
        assert_eq!(extract("`x`"), None);
        assert_eq!(extract("``"), None);
        assert_eq!(extract("`ls`"), Some("ls"));

        let longest = "a".repeat(COMMAND_MAX_LEN);
        assert_eq!(extract(&format!("`{}`", longest)), Some(longest.as_str()));
        let too_long = "a".repeat(COMMAND_MAX_LEN + 1);
        assert_eq!(extract(&format!("`{}`", too_long)), None);
    }

    #[test]
    fn test_extract_code_fence_is_rejected() {
        // First pair is the empty "``" at the start of the fence
        assert_eq!(extract("```sh\nls\n```"), None);
    }

    #[test]
    fn test_confirm_runs_and_records_output() {
        let pipeline = pipeline();
        let mut out = Vec::new();

        let output = CommandRunner::default()
            .confirm_and_run("echo hi; echo there", "gpt-4o", &mut Scripted('y'), &mut out, &pipeline)
            .unwrap();

        assert_eq!(output.as_deref(), Some("hi\nthere\n"));

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.starts_with("> gpt-4o would like to execute (Y/n): echo hi; echo there\n"));
        assert!(printed.ends_with("hi\nthere\n"));

        let history = pipeline.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::Developer);
        assert_eq!(history[0].content, "hi\nthere\n");
    }

    #[test]
    fn test_uppercase_confirms() {
        let pipeline = pipeline();
        let output = CommandRunner::default()
            .confirm_and_run("printf ok", "gpt", &mut Scripted('Y'), &mut io::sink(), &pipeline)
            .unwrap();
        assert_eq!(output.as_deref(), Some("ok"));
    }

    #[test]
    fn test_other_keys_decline() {
        let pipeline = pipeline();
        for key in ['n', 'N', '\n', 'q', '\0'] {
            let output = CommandRunner::default()
                .confirm_and_run("echo never", "gpt", &mut Scripted(key), &mut io::sink(), &pipeline)
                .unwrap();
            assert_eq!(output, None);
        }
        assert!(pipeline.context().is_empty());
    }

    #[test]
    fn test_failing_command_output_still_recorded() {
        let pipeline = pipeline();
        let output = CommandRunner::default()
            .confirm_and_run("echo partial; exit 3", "gpt", &mut Scripted('y'), &mut io::sink(), &pipeline)
            .unwrap();
        assert_eq!(output.as_deref(), Some("partial\n"));
        assert_eq!(pipeline.context().len(), 1);
    }

    #[test]
    fn test_spawn_failure() {
        let pipeline = pipeline();
        let err = CommandRunner::new("/nonexistent/shell")
            .confirm_and_run("echo hi", "gpt", &mut Scripted('y'), &mut io::sink(), &pipeline)
            .unwrap_err();
        assert!(matches!(err, ExecError::SpawnFailed { .. }));
        assert!(pipeline.context().is_empty());
    }

    #[test]
    fn test_key_read_failure() {
        let pipeline = pipeline();
        let err = CommandRunner::default()
            .confirm_and_run("echo hi", "gpt", &mut Broken, &mut io::sink(), &pipeline)
            .unwrap_err();
        assert!(matches!(err, ExecError::Terminal(_)));
    }
}
