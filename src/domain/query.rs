//! Query request model
//!
//! A [`QueryRequest`] is immutable once submitted. The mode is a closed enum so
//! that every dispatcher branch is checked exhaustively at compile time.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separators accepted between codes: whitespace, ASCII and full-width
/// commas/semicolons, and the ideographic comma.
static CODE_SEPARATORS: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"[\s,;，；、]+").ok());

fn is_code_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | ';' | '，' | '；' | '、')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryMode {
    ByCode,
    ByName,
    AllMaster,
    MasterInSale,
    MasterStopped,
    ChannelInSale,
    ChannelStopped,
}

impl QueryMode {
    pub const ALL: [QueryMode; 7] = [
        QueryMode::ByCode,
        QueryMode::ByName,
        QueryMode::AllMaster,
        QueryMode::MasterInSale,
        QueryMode::MasterStopped,
        QueryMode::ChannelInSale,
        QueryMode::ChannelStopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::ByCode => "by-code",
            QueryMode::ByName => "by-name",
            QueryMode::AllMaster => "all-master",
            QueryMode::MasterInSale => "master-in-sale",
            QueryMode::MasterStopped => "master-stopped",
            QueryMode::ChannelInSale => "channel-in-sale",
            QueryMode::ChannelStopped => "channel-stopped",
        }
    }

    /// Whether the free-text input is required for this mode
    pub fn requires_input(&self) -> bool {
        matches!(self, QueryMode::ByCode | QueryMode::ByName)
    }

    pub fn is_channel_mode(&self) -> bool {
        matches!(self, QueryMode::ChannelInSale | QueryMode::ChannelStopped)
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueryMode::ALL
            .iter()
            .copied()
            .find(|mode| mode.as_str() == s.trim())
            .ok_or_else(|| format!("unknown query mode: {s}"))
    }
}

/// User-submitted query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub mode: QueryMode,
    /// Codes or a name keyword, depending on the mode
    pub input: String,
    /// Channel subset for channel modes; empty means every known channel
    pub channels: Vec<String>,
}

impl QueryRequest {
    pub fn new(mode: QueryMode, input: impl Into<String>) -> Self {
        Self {
            mode,
            input: input.into(),
            channels: Vec::new(),
        }
    }

    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    pub fn by_code(input: impl Into<String>) -> Self {
        Self::new(QueryMode::ByCode, input)
    }

    /// Codes parsed from the input in order; a repeated code keeps each position
    pub fn codes(&self) -> Vec<String> {
        parse_codes(&self.input)
    }
}

/// Splits free text into discrete catalog codes.
///
/// Codes are kept as strings; "00123" and "123" are different codes.
pub fn parse_codes(input: &str) -> Vec<String> {
    let pieces: Box<dyn Iterator<Item = &str> + '_> = match CODE_SEPARATORS.as_ref() {
        Some(separators) => Box::new(separators.split(input)),
        None => Box::new(input.split(is_code_separator)),
    };
    pieces
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_codes_handles_mixed_separators() {
        let codes = parse_codes(" 00123, 456;789\n0012\t 456，abc；def、x ");
        assert_eq!(codes, vec!["00123", "456", "789", "0012", "456", "abc", "def", "x"]);
    }

    #[test]
    fn repeated_codes_keep_their_positions() {
        assert_eq!(parse_codes("001 002 001"), vec!["001", "002", "001"]);
    }

    #[test]
    fn separator_regex_and_char_split_agree() {
        let input = " 00123, 456;789\n0012\t 456，abc；def、x ";
        let by_char: Vec<&str> = input
            .split(is_code_separator)
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .collect();
        assert!(CODE_SEPARATORS.is_some());
        assert_eq!(parse_codes(input), by_char);
    }

    #[test]
    fn parse_codes_of_blank_input_is_empty() {
        assert!(parse_codes("  \n ,;; ").is_empty());
    }

    #[test]
    fn mode_round_trips_through_str() {
        for mode in QueryMode::ALL {
            assert_eq!(mode.as_str().parse::<QueryMode>(), Ok(mode));
        }
        assert!("stopped".parse::<QueryMode>().is_err());
    }
}
