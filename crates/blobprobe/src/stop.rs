//! Waiting for the operator to stop the probe.
//!
//! On an interactive terminal any single key press stops the probe; the
//! terminal is put in raw mode for the wait so no Enter is needed. When stdin
//! is not a terminal (piped input, CI) one line or end-of-input stops it.
//! While raw mode is on, diagnostics are written with `\r\n` line endings.

use std::io::{self, BufRead, IsTerminal};

use crossterm::event::{self, Event, KeyEventKind};
use crossterm::terminal;
use tracing::debug;

use crate::logging;

/// What ended the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTrigger {
    /// A key was pressed on the terminal.
    KeyPress,
    /// A line was read from non-interactive stdin.
    Line,
    /// Stdin reached end-of-input.
    EndOfInput,
}

/// Restores cooked mode when dropped.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        logging::set_raw_terminal(true);
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        logging::set_raw_terminal(false);
        let _ = terminal::disable_raw_mode();
    }
}

/// Block the calling thread until the operator asks to stop.
///
/// # Errors
/// Returns an I/O error if the terminal or stdin cannot be read.
pub fn wait_blocking() -> io::Result<StopTrigger> {
    if io::stdin().is_terminal() {
        match RawModeGuard::enable() {
            Ok(_guard) => return wait_for_key(),
            Err(err) => debug!(error = %err, "Raw mode unavailable, falling back to line input"),
        }
    }
    wait_for_line(&mut io::stdin().lock())
}

/// Wait for the operator without blocking the async runtime.
///
/// # Errors
/// Returns an I/O error if the terminal or stdin cannot be read, or if the
/// blocking reader task fails.
pub async fn wait_for_stop() -> io::Result<StopTrigger> {
    tokio::task::spawn_blocking(wait_blocking)
        .await
        .map_err(io::Error::other)?
}

fn wait_for_key() -> io::Result<StopTrigger> {
    loop {
        if let Event::Key(key) = event::read()? {
            // Some platforms report release events too.
            if key.kind == KeyEventKind::Press {
                return Ok(StopTrigger::KeyPress);
            }
        }
    }
}

fn wait_for_line(input: &mut impl BufRead) -> io::Result<StopTrigger> {
    let mut line = String::new();
    match input.read_line(&mut line)? {
        0 => Ok(StopTrigger::EndOfInput),
        _ => Ok(StopTrigger::Line),
    }
}
