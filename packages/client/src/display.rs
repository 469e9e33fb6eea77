//! Where the client's output goes.
//!
//! Both workers print through one shared sink so lines never interleave.

use std::{
    io::{Stdout, Write},
    sync::{Mutex, PoisonError},
};

use rustyline::ExternalPrinter;

/// Serialized output for chat text.
pub trait ChatDisplay: Send + Sync {
    /// Print `text` followed by a newline.
    fn show(&self, text: &str);
}

/// Prints above the line editor's prompt, then redraws it.
pub struct TerminalDisplay<P> {
    printer: Mutex<P>,
}

impl<P: ExternalPrinter + Send> TerminalDisplay<P> {
    pub fn new(printer: P) -> Self {
        Self {
            printer: Mutex::new(printer),
        }
    }
}

impl<P: ExternalPrinter + Send> ChatDisplay for TerminalDisplay<P> {
    fn show(&self, text: &str) {
        let mut printer = self.printer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = printer.print(format!("{text}\n")) {
            tracing::warn!("Failed to print: {}", e);
        }
    }
}

/// Plain stdout, for when no terminal is attached.
pub struct StdoutDisplay {
    stdout: Mutex<Stdout>,
}

impl StdoutDisplay {
    pub fn new() -> Self {
        Self {
            stdout: Mutex::new(std::io::stdout()),
        }
    }
}

impl Default for StdoutDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatDisplay for StdoutDisplay {
    fn show(&self, text: &str) {
        let mut stdout = self.stdout.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(stdout, "{text}").and_then(|_| stdout.flush()) {
            tracing::warn!("Failed to print: {}", e);
        }
    }
}

/// Collects everything shown, for tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MemoryDisplay {
    lines: Mutex<Vec<String>>,
}

#[cfg(test)]
impl MemoryDisplay {
    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
impl ChatDisplay for MemoryDisplay {
    fn show(&self, text: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());
    }
}
