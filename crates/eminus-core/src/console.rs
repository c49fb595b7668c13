//! User-facing console output.
//!
//! Informational lines are gated by the manifest's `verbose` flag by the
//! caller; error lines are always written.

use colored::Colorize;

/// Prefix carried by every console line.
pub const PREFIX: &str = "[EMinus]";

/// Which stream a line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Info,
    Error,
    /// Error line rendered with emphasis.
    Alert,
}

/// Sink for console lines.
pub trait Console {
    fn write(&mut self, stream: Stream, line: &str);

    fn info(&mut self, line: &str) {
        self.write(Stream::Info, line)
    }

    fn error(&mut self, line: &str) {
        self.write(Stream::Error, line)
    }

    fn alert(&mut self, line: &str) {
        self.write(Stream::Alert, line)
    }
}

/// Writes info to stdout and errors to stderr, alerts in red.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdConsole;

impl Console for StdConsole {
    fn write(&mut self, stream: Stream, line: &str) {
        match stream {
            Stream::Info => println!("{}", line),
            Stream::Error => eprintln!("{}", line),
            Stream::Alert => eprintln!("{}", line.red()),
        }
    }
}

/// Collects lines in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryConsole {
    pub lines: Vec<(Stream, String)>,
}

impl MemoryConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines written to `stream`, in order.
    pub fn lines_on(&self, stream: Stream) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, line)| line.as_str())
            .collect()
    }

    /// Error and alert lines, in order.
    pub fn errors(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|(s, _)| *s != Stream::Info)
            .map(|(_, line)| line.as_str())
            .collect()
    }
}

impl Console for MemoryConsole {
    fn write(&mut self, stream: Stream, line: &str) {
        self.lines.push((stream, line.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_console_streams() {
        let mut console = MemoryConsole::new();
        console.info("a");
        console.error("b");
        console.alert("c");

        assert_eq!(console.lines_on(Stream::Info), vec!["a"]);
        assert_eq!(console.errors(), vec!["b", "c"]);
    }
}
