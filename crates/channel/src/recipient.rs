//! Recipient address validation.
//!
//! Callers hand us phone numbers in whatever shape the form collected
//! (`+62 812-3456-7890`, `(0812) 3456.7890`, ...).  We strip separators
//! and accept only what is left as a plain digit string.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::types::ChannelError;

const MIN_DIGITS: usize = 10;
/// E.164 maximum.
const MAX_DIGITS: usize = 15;

/// Server suffix the network uses for individual chats.
const USER_SERVER: &str = "s.whatsapp.net";

fn separators() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\s\-\.\(\)]").expect("separator pattern is valid"))
}

/// A validated, digits-only channel address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Recipient(String);

impl Recipient {
    /// Normalize and validate a raw address.
    pub fn parse(raw: &str) -> Result<Self, ChannelError> {
        let trimmed = raw.trim();
        let without_plus = trimmed.strip_prefix('+').unwrap_or(trimmed);
        let digits = separators().replace_all(without_plus, "");

        if digits.is_empty() {
            return Err(ChannelError::InvalidRecipient("address is empty".into()));
        }
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(ChannelError::InvalidRecipient(format!(
                "{raw:?} contains non-digit characters"
            )));
        }
        if digits.len() < MIN_DIGITS || digits.len() > MAX_DIGITS {
            return Err(ChannelError::InvalidRecipient(format!(
                "{raw:?} must have {MIN_DIGITS}-{MAX_DIGITS} digits, got {}",
                digits.len()
            )));
        }

        Ok(Self(digits.into_owned()))
    }

    pub fn digits(&self) -> &str {
        &self.0
    }

    /// Network-level chat address (`<digits>@s.whatsapp.net`).
    pub fn chat_address(&self) -> String {
        format!("{}@{USER_SERVER}", self.0)
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
