//! Message formatting utilities for client display.
//!
//! Every function returns the text without a trailing newline; the display
//! adds one per call.

use blather_shared::{
    activity_log::WhoSnapshot,
    protocol::{Message, MessageKind},
};

const RULE: &str = "====================";

/// Message formatter for client display
pub struct MessageFormatter;

impl MessageFormatter {
    /// Format a message received from the server.
    ///
    /// Returns `None` for messages that are never shown (`PING`).
    pub fn format_message(message: &Message) -> Option<String> {
        let text = match message.kind {
            MessageKind::Mesg => format!("[{}]: {}", message.name, message.body),
            MessageKind::Joined => format!("-- {} JOINED --", message.name),
            MessageKind::Departed => format!("-- {} DEPARTED --", message.name),
            MessageKind::Disconnected => format!("-- {} DISCONNECTED --", message.name),
            MessageKind::Shutdown => Self::format_shutdown(),
            MessageKind::Ping => return None,
        };
        Some(text)
    }

    pub fn format_shutdown() -> String {
        "!!! server is shutting down !!!".to_string()
    }

    pub fn format_end_of_input() -> String {
        "End of Input, Departing".to_string()
    }

    /// Format the `%who` listing
    ///
    /// # Arguments
    ///
    /// * `who` - Membership snapshot read from the activity log
    pub fn format_who(who: &WhoSnapshot) -> String {
        let mut output = String::new();
        output.push_str(RULE);
        output.push('\n');
        output.push_str(&format!("{} CLIENTS\n", who.names.len()));
        for (i, name) in who.names.iter().enumerate() {
            output.push_str(&format!("{}: {}\n", i, name));
        }
        output.push_str(RULE);
        output
    }

    /// Format the `%last N` listing
    ///
    /// # Arguments
    ///
    /// * `messages` - Logged messages, oldest first
    pub fn format_last(messages: &[Message]) -> String {
        let mut output = String::new();
        output.push_str(RULE);
        output.push('\n');
        output.push_str(&format!("LAST {} MESSAGES\n", messages.len()));
        for message in messages {
            if let Some(line) = Self::format_message(message) {
                output.push_str(&line);
                output.push('\n');
            }
        }
        output.push_str(RULE);
        output
    }
}
