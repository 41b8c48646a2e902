//! Validated outbound recipient addresses.
//!
//! Agents hand us phone numbers in whatever shape the CRM stored them
//! ("+55 (11) 99999-0000", "5511999990000@c.us", ...). A `Recipient` is the
//! normalized digits-only form; anything that cannot be normalized is rejected
//! before a send job is ever created.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fmt;
use std::str::FromStr;

/// Minimum number of digits in a routable phone number.
pub const MIN_DIGITS: usize = 8;

/// Maximum number of digits allowed by E.164.
pub const MAX_DIGITS: usize = 15;

/// Chat address suffixes the messaging network uses for one-to-one chats.
const CHAT_SUFFIXES: &[&str] = &["@c.us", "@s.whatsapp.net"];

/// Reasons a recipient string is not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecipientError {
    #[error("recipient is empty")]
    Empty,

    #[error("recipient contains invalid character '{0}'")]
    InvalidCharacter(char),

    #[error("recipient must have between 8 and 15 digits, got {0}")]
    InvalidLength(usize),

    #[error("unsupported chat address '{0}'")]
    UnsupportedAddress(String),
}

/// A normalized, digits-only recipient phone number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Recipient(String);

impl Recipient {
    /// Parse and normalize a recipient.
    ///
    /// Accepts an optional leading `+`, spaces, dashes, dots and parentheses,
    /// or a chat address of the form `<digits>@c.us` / `<digits>@s.whatsapp.net`.
    pub fn parse(input: &str) -> Result<Self, RecipientError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(RecipientError::Empty);
        }

        if let Some((local, domain)) = trimmed.split_once('@') {
            let suffix = format!("@{domain}");
            if !CHAT_SUFFIXES.contains(&suffix.as_str()) {
                return Err(RecipientError::UnsupportedAddress(trimmed.to_string()));
            }
            if let Some(c) = local.chars().find(|c| !c.is_ascii_digit()) {
                return Err(RecipientError::InvalidCharacter(c));
            }
            return Self::from_digits(local.to_string());
        }

        let mut digits = String::with_capacity(trimmed.len());
        for (i, c) in trimmed.chars().enumerate() {
            match c {
                '0'..='9' => digits.push(c),
                '+' if i == 0 => {}
                ' ' | '-' | '.' | '(' | ')' => {}
                other => return Err(RecipientError::InvalidCharacter(other)),
            }
        }
        Self::from_digits(digits)
    }

    fn from_digits(digits: String) -> Result<Self, RecipientError> {
        if !(MIN_DIGITS..=MAX_DIGITS).contains(&digits.len()) {
            return Err(RecipientError::InvalidLength(digits.len()));
        }
        Ok(Self(digits))
    }

    /// The normalized digits.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The one-to-one chat address on the messaging network.
    pub fn chat_address(&self) -> String {
        format!("{}{}", self.0, CHAT_SUFFIXES[0])
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Recipient {
    type Err = RecipientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Recipient {
    type Error = RecipientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Recipient> for String {
    fn from(value: Recipient) -> Self {
        value.0
    }
}

/// Strip a chat address down to its contact digits.
///
/// Inbound events carry addresses like `5511999990000@c.us`; the CRM keys
/// conversations by the bare number. Group and broadcast addresses are
/// returned unchanged.
pub fn contact_from_address(address: &str) -> String {
    let address = address.trim();
    for suffix in CHAT_SUFFIXES {
        if let Some(local) = address.strip_suffix(suffix) {
            return local.to_string();
        }
    }
    address.to_string()
}
