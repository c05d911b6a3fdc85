//! Authentication method selection.
//!
//! At most one credential (private key, ticket, secret) may be supplied. When
//! no method is named explicitly, the method follows from the credential;
//! with no credential at all it is anonymous.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Result, WickError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Anonymous,
    Ticket,
    #[serde(rename = "wampcra")]
    WampCra,
    #[serde(rename = "cryptosign")]
    CryptoSign,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Anonymous => "anonymous",
            AuthMethod::Ticket => "ticket",
            AuthMethod::WampCra => "wampcra",
            AuthMethod::CryptoSign => "cryptosign",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMethod {
    type Err = WickError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "anonymous" => Ok(AuthMethod::Anonymous),
            "ticket" => Ok(AuthMethod::Ticket),
            "wampcra" => Ok(AuthMethod::WampCra),
            "cryptosign" => Ok(AuthMethod::CryptoSign),
            other => Err(WickError::UnknownAuthMethod(other.to_string())),
        }
    }
}

/// Credentials as supplied by the user. Empty strings count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub private_key: Option<String>,
    pub ticket: Option<String>,
    pub secret: Option<String>,
}

impl Credentials {
    pub fn new(
        private_key: Option<String>,
        ticket: Option<String>,
        secret: Option<String>,
    ) -> Self {
        Self {
            private_key: non_empty(private_key),
            ticket: non_empty(ticket),
            secret: non_empty(secret),
        }
    }

    fn count(&self) -> usize {
        [&self.private_key, &self.ticket, &self.secret]
            .iter()
            .filter(|c| c.is_some())
            .count()
    }

    /// Decode the cryptosign private key: a hex-encoded 32-byte ed25519 seed.
    pub fn private_key_seed(&self) -> Result<[u8; 32]> {
        let hex_key = self
            .private_key
            .as_deref()
            .ok_or_else(|| WickError::InvalidPrivateKey("no private key supplied".into()))?;
        decode_seed(hex_key)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

pub(crate) fn decode_seed(hex_key: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_key.trim())
        .map_err(|e| WickError::InvalidPrivateKey(format!("not valid hex: {e}")))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        WickError::InvalidPrivateKey(format!("expected 32 bytes, got {}", b.len()))
    })
}

/// Pick the auth method for a connection.
///
/// `requested` is `None` when the user did not name a method. Errors are
/// configuration errors and must be reported before any connection attempt.
pub fn select_auth_method(
    requested: Option<AuthMethod>,
    credentials: &Credentials,
) -> Result<AuthMethod> {
    if credentials.count() > 1 {
        return Err(WickError::ConflictingCredentials);
    }

    let method = match requested {
        Some(method) => method,
        None => infer(credentials),
    };

    match method {
        AuthMethod::Anonymous => {
            if credentials.private_key.is_some() {
                return Err(mismatch("private key not needed for anonymous auth"));
            }
            if credentials.ticket.is_some() {
                return Err(mismatch("ticket not needed for anonymous auth"));
            }
            if credentials.secret.is_some() {
                return Err(mismatch("secret not needed for anonymous auth"));
            }
        }
        AuthMethod::Ticket => {
            if credentials.ticket.is_none() {
                return Err(mismatch("must provide ticket when authmethod is ticket"));
            }
        }
        AuthMethod::WampCra => {
            if credentials.secret.is_none() {
                return Err(mismatch("must provide secret when authmethod is wampcra"));
            }
        }
        AuthMethod::CryptoSign => {
            if credentials.private_key.is_none() {
                return Err(mismatch(
                    "must provide private key when authmethod is cryptosign",
                ));
            }
            credentials.private_key_seed()?;
        }
    }

    Ok(method)
}

fn infer(credentials: &Credentials) -> AuthMethod {
    if credentials.private_key.is_some() {
        AuthMethod::CryptoSign
    } else if credentials.ticket.is_some() {
        AuthMethod::Ticket
    } else if credentials.secret.is_some() {
        AuthMethod::WampCra
    } else {
        AuthMethod::Anonymous
    }
}

fn mismatch(msg: &str) -> WickError {
    WickError::AuthMismatch(msg.to_string())
}
