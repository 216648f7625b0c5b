//! Command parsing

use serde::Serialize;

/// A command extracted from effective packet text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedCommand {
    /// Command name, lowercased, without the prefix
    pub token: String,
    /// Everything after the token, trimmed
    pub args: String,
    /// Full command text as received
    pub text: String,
}

impl ParsedCommand {
    /// Parse `text` as a command
    ///
    /// Returns `None` when the text does not start with `prefix` or has no
    /// command name after it.
    pub fn parse(text: &str, prefix: char) -> Option<Self> {
        let text = text.trim();
        let body = text.strip_prefix(prefix)?;

        let (token, args) = match body.split_once(char::is_whitespace) {
            Some((token, args)) => (token, args.trim()),
            None => (body, ""),
        };
        if token.is_empty() || token.starts_with(prefix) {
            return None;
        }

        Some(Self {
            token: token.to_lowercase(),
            args: args.to_string(),
            text: text.to_string(),
        })
    }

    /// Arguments split on whitespace
    pub fn arg_list(&self) -> Vec<&str> {
        self.args.split_whitespace().collect()
    }
}
