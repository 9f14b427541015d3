use std::fmt::{self, Debug, Formatter};

use data_encoding::BASE64URL_NOPAD;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Number of random bytes behind every ticket token.
pub const TOKEN_BYTES: usize = 24;

/// The secret half of a ticket. Possession of the token is proof of the
/// right to vote with that ticket.
///
/// Tokens are URL-safe base64 without padding, so they embed directly in a
/// path segment. Comparison is constant-time, and `Debug` never prints the
/// secret.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// Generate a fresh token from the operating system's secure random source.
    ///
    /// Panics if the random source fails; it is not safe to keep issuing tickets then.
    pub fn random() -> Self {
        let mut bytes = [0; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(BASE64URL_NOPAD.encode(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time check of a presented token against this one.
    pub fn matches(&self, presented: &str) -> bool {
        self.0.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

impl From<String> for Token {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for Token {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other.as_str())
    }
}

impl Eq for Token {}

impl Debug for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}
