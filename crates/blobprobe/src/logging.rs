//! Tracing subscriber setup.

use std::io::{self, IsTerminal, Write};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Set while the terminal is in raw mode, where output post-processing is off
/// and a bare `\n` no longer returns the cursor to column 0.
static RAW_TERMINAL: AtomicBool = AtomicBool::new(false);

/// Record whether the terminal is currently in raw mode.
pub fn set_raw_terminal(active: bool) {
    RAW_TERMINAL.store(active, Ordering::SeqCst);
}

/// Whether diagnostics are currently written for a raw-mode terminal.
#[must_use]
pub fn raw_terminal() -> bool {
    RAW_TERMINAL.load(Ordering::SeqCst)
}

/// Writer that expands `\n` to `\r\n` when `raw` is set.
#[derive(Debug)]
pub struct ConsoleWriter<W> {
    inner: W,
    raw: bool,
}

impl<W: Write> ConsoleWriter<W> {
    /// Wrap `inner`, translating line endings when `raw` is set.
    pub const fn new(inner: W, raw: bool) -> Self {
        Self { inner, raw }
    }
}

impl<W: Write> Write for ConsoleWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.raw {
            return self.inner.write(buf);
        }
        let mut start = 0;
        for (i, byte) in buf.iter().enumerate() {
            if *byte == b'\n' {
                self.inner.write_all(&buf[start..i])?;
                self.inner.write_all(b"\r\n")?;
                start = i + 1;
            }
        }
        self.inner.write_all(&buf[start..])?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn console_stderr() -> ConsoleWriter<io::Stderr> {
    ConsoleWriter::new(io::stderr(), raw_terminal())
}

/// Diagnostic output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}' (expected text or json)")),
        }
    }
}

impl LogFormat {
    /// Read the format from an optional environment value, defaulting to text.
    #[must_use]
    pub fn from_env_value(value: Option<&str>) -> Self {
        value.and_then(|v| v.parse().ok()).unwrap_or_default()
    }
}

/// Install the global subscriber. Diagnostics go to stderr so stdout stays the
/// operator console. `RUST_LOG` controls filtering and defaults to `info`.
/// Line endings follow [`set_raw_terminal`].
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_writer(console_stderr)
                    .with_ansi(io::stderr().is_terminal())
                    .with_target(false),
            )
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(console_stderr))
            .init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_formats() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn raw_writer_returns_cursor_on_every_line() {
        let mut out = ConsoleWriter::new(Vec::new(), true);
        out.write_all(b"Reader exception\nWriter exception\n").unwrap();
        assert_eq!(out.inner, b"Reader exception\r\nWriter exception\r\n");
    }

    #[test]
    fn raw_writer_keeps_trailing_partial_line() {
        let mut out = ConsoleWriter::new(Vec::new(), true);
        assert_eq!(out.write(b"a\nb").unwrap(), 3);
        assert_eq!(out.inner, b"a\r\nb");
    }

    #[test]
    fn cooked_writer_passes_through() {
        let mut out = ConsoleWriter::new(Vec::new(), false);
        out.write_all(b"line\n").unwrap();
        assert_eq!(out.inner, b"line\n");
    }

    #[test]
    fn raw_flag_follows_terminal_mode() {
        set_raw_terminal(true);
        assert!(console_stderr().raw);
        set_raw_terminal(false);
        assert!(!console_stderr().raw);
    }

    #[test]
    fn unknown_or_missing_falls_back_to_text() {
        assert_eq!(LogFormat::from_env_value(None), LogFormat::Text);
        assert_eq!(LogFormat::from_env_value(Some("xml")), LogFormat::Text);
        assert_eq!(LogFormat::from_env_value(Some("json")), LogFormat::Json);
    }
}
