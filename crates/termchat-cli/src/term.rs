use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use crossterm::{
    cursor::MoveToColumn,
    queue,
    style::Stylize,
    terminal::{disable_raw_mode, enable_raw_mode, is_raw_mode_enabled, Clear, ClearType},
};
use termchat_core::ProgressReporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermColor {
    None,
    Green,
    Red,
}

/// Print a line in one of the status colors. Red goes to stderr.
pub fn print_color(text: &str, color: TermColor) {
    match color {
        TermColor::None => println!("{}", text),
        TermColor::Green => println!("{}", text.green()),
        TermColor::Red => eprintln!("{}", text.red()),
    }
}

/// Immediate, non-echoing input for as long as the guard lives. The previous
/// mode comes back on drop, including during unwinding.
pub struct RawModeGuard {
    was_enabled: bool,
}

impl RawModeGuard {
    pub fn acquire() -> io::Result<Self> {
        let was_enabled = is_raw_mode_enabled()?;
        if !was_enabled {
            enable_raw_mode()?;
        }
        Ok(Self { was_enabled })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if !self.was_enabled {
            if let Err(e) = disable_raw_mode() {
                tracing::error!(error = %e, "failed to restore terminal mode");
            }
        }
    }
}

/// Install panic hook to restore terminal on panic
pub fn install_panic_hook() {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        original_hook(panic_info);
    }));
}

/// "model is thinking..." line on stderr, redrawn once per second.
pub struct Spinner {
    label: String,
    frame: AtomicU8,
}

impl Spinner {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            frame: AtomicU8::new(0),
        }
    }

    fn line(&self, elapsed: Duration) -> String {
        // 0-2 for the ellipsis animation
        let frame = self.frame.fetch_add(1, Ordering::Relaxed) % 3;
        format!(
            "{} is thinking{:<3} {}s",
            self.label,
            ".".repeat(usize::from(frame) + 1),
            elapsed.as_secs()
        )
    }
}

impl ProgressReporter for Spinner {
    fn tick(&self, elapsed: Duration) {
        let line = self.line(elapsed);
        let mut err = io::stderr().lock();
        let _ = queue!(err, MoveToColumn(0), Clear(ClearType::CurrentLine));
        let _ = write!(err, "{}", line.dim());
        let _ = err.flush();
    }

    fn finish(&self) {
        let mut err = io::stderr().lock();
        let _ = queue!(err, MoveToColumn(0), Clear(ClearType::CurrentLine));
        let _ = err.flush();
    }
}
