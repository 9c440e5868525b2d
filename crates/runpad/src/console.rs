//! Output sink rendering
//!
//! The controller is the only caller. Every render replaces what was shown
//! before; nothing is appended.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use crate::types::{OutputLine, Severity};

/// Text shown before the first run and after a backend switch
pub const PLACEHOLDER_TEXT: &str = "Output will appear here after running your code...";

/// Rendering target for run results
pub trait OutputSink: Send {
    /// Replace the current content with `lines` and scroll to the last one
    fn render(&mut self, lines: &[OutputLine]) -> io::Result<()>;

    /// Replace the current content with the placeholder
    fn render_placeholder(&mut self) -> io::Result<()>;
}

impl<T: OutputSink> OutputSink for Arc<Mutex<T>> {
    fn render(&mut self, lines: &[OutputLine]) -> io::Result<()> {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .render(lines)
    }

    fn render_placeholder(&mut self) -> io::Result<()> {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .render_placeholder()
    }
}

/// Split text into console lines of one severity
///
/// A single trailing line terminator does not produce an extra line. Empty
/// lines become a single space so line counts are preserved.
pub fn split_lines(text: &str, severity: Severity) -> Vec<OutputLine> {
    let text = text.strip_suffix('\n').unwrap_or(text);
    text.split('\n')
        .map(|line| console_line(line.strip_suffix('\r').unwrap_or(line), severity))
        .collect()
}

/// Split streamed program output on every `\n`
///
/// Nothing is dropped: a trailing terminator yields a final blank line, so
/// the rendered lines match the stream one for one.
pub fn split_stream(text: &str, severity: Severity) -> Vec<OutputLine> {
    text.split('\n')
        .map(|line| console_line(line, severity))
        .collect()
}

fn console_line(line: &str, severity: Severity) -> OutputLine {
    if line.is_empty() {
        OutputLine::new(" ", severity)
    } else {
        OutputLine::new(line, severity)
    }
}

/// In-memory console view
#[derive(Debug, Clone)]
pub struct ConsoleView {
    lines: Vec<OutputLine>,
    placeholder: bool,
    viewport: usize,
    scroll_offset: usize,
    renders: usize,
}

impl ConsoleView {
    /// Create a view showing the placeholder, with room for `viewport` lines
    pub fn new(viewport: usize) -> Self {
        Self {
            lines: Vec::new(),
            placeholder: true,
            viewport: viewport.max(1),
            scroll_offset: 0,
            renders: 0,
        }
    }

    /// Wrap a new view for sharing with a controller
    pub fn shared(viewport: usize) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::new(viewport)))
    }

    pub fn lines(&self) -> &[OutputLine] {
        &self.lines
    }

    pub fn texts(&self) -> Vec<&str> {
        self.lines.iter().map(OutputLine::text).collect()
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    /// Index of the first visible line
    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    /// The lines currently inside the viewport
    pub fn visible(&self) -> &[OutputLine] {
        let end = (self.scroll_offset + self.viewport).min(self.lines.len());
        &self.lines[self.scroll_offset..end]
    }

    /// Number of renders, placeholder included
    pub fn render_count(&self) -> usize {
        self.renders
    }
}

impl Default for ConsoleView {
    fn default() -> Self {
        Self::new(24)
    }
}

impl OutputSink for ConsoleView {
    fn render(&mut self, lines: &[OutputLine]) -> io::Result<()> {
        self.lines = lines.to_vec();
        self.placeholder = false;
        self.scroll_offset = self.lines.len().saturating_sub(self.viewport);
        self.renders += 1;
        Ok(())
    }

    fn render_placeholder(&mut self) -> io::Result<()> {
        self.lines.clear();
        self.placeholder = true;
        self.scroll_offset = 0;
        self.renders += 1;
        Ok(())
    }
}

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Writes rendered output to a terminal stream
///
/// A terminal cannot take back what it printed, so "replace" means a fresh
/// block after a separator rule.
#[derive(Debug)]
pub struct TerminalSink<W: Write + Send> {
    out: W,
    color: bool,
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn paint(&self, severity: Severity) -> (&'static str, &'static str) {
        match (self.color, severity) {
            (false, _) => ("", ""),
            (true, Severity::Success) => (GREEN, RESET),
            (true, Severity::Error) => (RED, RESET),
        }
    }
}

impl TerminalSink<io::Stdout> {
    pub fn stdout(color: bool) -> Self {
        Self::new(io::stdout(), color)
    }
}

impl<W: Write + Send> OutputSink for TerminalSink<W> {
    fn render(&mut self, lines: &[OutputLine]) -> io::Result<()> {
        for line in lines {
            let (start, end) = self.paint(line.severity());
            let marker = if line.is_error() { "!" } else { " " };
            writeln!(self.out, "{start}{marker} {}{end}", line.text())?;
        }
        self.out.flush()
    }

    fn render_placeholder(&mut self) -> io::Result<()> {
        if self.color {
            writeln!(self.out, "{DIM}{PLACEHOLDER_TEXT}{RESET}")?;
        } else {
            writeln!(self.out, "{PLACEHOLDER_TEXT}")?;
        }
        self.out.flush()
    }
}
