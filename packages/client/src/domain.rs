//! Interpretation of user input lines.
//!
//! Pure functions without side effects, so they are easy to test.

/// Shown when `%last` is not followed by a count.
pub const LAST_USAGE: &str = "usage: %last N";

/// What a line of user input asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show the membership snapshot from the activity log
    Who,
    /// Show the most recent N logged messages
    Last(usize),
    /// Send the line to everyone
    Say(String),
    /// Malformed command; print the usage line and do nothing else
    Usage(&'static str),
}

/// Classify one line of input.
///
/// `%who` and `%last N` are only commands with `advanced` on; otherwise
/// they are sent like any other text.
///
/// # Examples
///
/// ```
/// use blather_client::domain::{Command, parse_command};
///
/// assert_eq!(parse_command("%last 3", true), Command::Last(3));
/// assert_eq!(parse_command("%last 3", false), Command::Say("%last 3".to_string()));
/// ```
pub fn parse_command(line: &str, advanced: bool) -> Command {
    if advanced {
        let trimmed = line.trim_start();
        if trimmed.starts_with("%who") {
            return Command::Who;
        }
        if let Some(rest) = trimmed.strip_prefix("%last") {
            return match rest.trim().parse() {
                Ok(n) => Command::Last(n),
                Err(_) => Command::Usage(LAST_USAGE),
            };
        }
    }
    Command::Say(line.to_string())
}
