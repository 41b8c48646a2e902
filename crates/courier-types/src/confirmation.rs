//! Opaque confirmation tokens for bulk sends.
//!
//! Where a token comes from (an operator clicking "confirm" in the CRM, a
//! pre-shared secret, ...) is decided outside this subsystem. Courier only
//! carries the token to the configured validator and never logs it.

use secrecy::{ExposeSecret, SecretString};

/// A confirmation token supplied with a bulk send request.
#[derive(Debug)]
pub struct ConfirmationToken(SecretString);

impl ConfirmationToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    /// Access the raw token (for the validator only).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_blank(&self) -> bool {
        self.expose().trim().is_empty()
    }
}

impl From<String> for ConfirmationToken {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_does_not_leak_token() {
        let token = ConfirmationToken::new("s3cret-value");
        let debug = format!("{token:?}");
        assert!(!debug.contains("s3cret-value"));
        assert_eq!(token.expose(), "s3cret-value");
    }

    #[test]
    fn test_blank_token() {
        assert!(ConfirmationToken::new("  ").is_blank());
        assert!(!ConfirmationToken::new("x").is_blank());
    }
}
