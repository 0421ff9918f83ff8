//! Bordered, titled chat window drawn with plain characters
//!
//! ```text
//! +----------+
//! |gpt-4o    |
//! +----------+
//! |reply text|
//! |wrapped   |
//! +----------+
//! ```
//!
//! Every character counts as one column; control characters are drawn as a
//! space so the borders stay aligned.

use std::io::{self, IsTerminal, Write};

use crossterm::{
    cursor::MoveTo,
    queue,
    terminal::{self, Clear, ClearType},
};
use thiserror::Error;

/// Columns taken by the left and right border.
const BORDER_COLUMNS: usize = 2;

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("no interactive terminal to render into")]
    NoTerminal,

    #[error("terminal is too narrow to draw a window ({columns} columns)")]
    TooNarrow { columns: usize },

    #[error("failed to draw window: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    /// Characters of content.
    pub width: usize,
    /// Content rows.
    pub height: usize,
    /// Full terminal width, borders included.
    pub columns: usize,
    pub title: String,
    pub content: String,
}

impl Window {
    pub fn inner_columns(&self) -> usize {
        self.columns - BORDER_COLUMNS
    }
}

/// Width of stdout's terminal. Fails when stdout is not a terminal.
pub fn terminal_columns() -> Result<usize, WindowError> {
    if !io::stdout().is_terminal() {
        return Err(WindowError::NoTerminal);
    }
    let (columns, _rows) = terminal::size().map_err(|_| WindowError::NoTerminal)?;
    Ok(usize::from(columns))
}

pub fn layout(text: &str, title: &str, columns: usize) -> Result<Window, WindowError> {
    if columns <= BORDER_COLUMNS {
        return Err(WindowError::TooNarrow { columns });
    }

    let inner = columns - BORDER_COLUMNS;
    let width = text.chars().count();

    Ok(Window {
        width,
        height: width.div_ceil(inner),
        columns,
        title: title.to_string(),
        content: text.to_string(),
    })
}

pub fn clear(out: &mut impl Write) -> io::Result<()> {
    queue!(out, MoveTo(0, 0), Clear(ClearType::All))?;
    out.flush()
}

pub fn render(window: &Window, out: &mut impl Write) -> Result<(), WindowError> {
    let inner = window.inner_columns();
    debug_assert_eq!(window.content.chars().count(), window.width);

    queue!(out, MoveTo(0, 0), Clear(ClearType::All))?;
    draw_border(out, window.columns)?;

    let title_rows = wrap(&window.title, inner);
    if title_rows.is_empty() {
        draw_row(out, "", inner)?;
    }
    for row in &title_rows {
        draw_row(out, row, inner)?;
    }
    draw_border(out, window.columns)?;

    let content_rows = wrap(&window.content, inner);
    debug_assert_eq!(content_rows.len(), window.height);
    for row in &content_rows {
        draw_row(out, row, inner)?;
    }
    draw_border(out, window.columns)?;

    out.flush()?;
    Ok(())
}

fn draw_border(out: &mut impl Write, columns: usize) -> io::Result<()> {
    writeln!(out, "+{}+", "-".repeat(columns - BORDER_COLUMNS))
}

fn draw_row(out: &mut impl Write, row: &str, inner: usize) -> io::Result<()> {
    writeln!(out, "|{:<width$}|", row, width = inner)
}

/// Split into rows of at most `inner` characters.
fn wrap(text: &str, inner: usize) -> Vec<String> {
    let cells: Vec<char> = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    cells.chunks(inner).map(|row| row.iter().collect()).collect()
}
