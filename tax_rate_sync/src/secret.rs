//! Obfuscated configuration values.
//!
//! Credentials and endpoint paths are kept in the config file as base64 with
//! the character order reversed. The trailing `=` padding is either dropped
//! entirely ([`PaddingStrategy::Restore`]) or swapped for a sentinel character
//! ([`PaddingStrategy::Sentinel`]). Decoding reverses both steps.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

const PADDING: char = '=';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecretError {
    #[error("cannot decode empty string")]
    EmptyInput,

    #[error("value is not base64 encoded: {0}")]
    InvalidEncoding(String),
}

/// How the base64 padding was hidden when the value was obfuscated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaddingStrategy {
    /// Padding was stripped; it is recomputed from the length.
    #[default]
    Restore,
    /// Padding was replaced by this character.
    Sentinel(char),
}

impl PaddingStrategy {
    /// A sentinel must not collide with the base64 alphabet or whitespace.
    pub fn check(self) -> Result<(), SecretError> {
        match self {
            Self::Restore => Ok(()),
            Self::Sentinel(c) if c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=') => Err(
                SecretError::InvalidEncoding(format!("sentinel {c:?} is part of the base64 alphabet")),
            ),
            Self::Sentinel(c) if c.is_whitespace() => Err(SecretError::InvalidEncoding(
                "sentinel must not be whitespace".to_string(),
            )),
            Self::Sentinel(_) => Ok(()),
        }
    }
}

/// An obfuscated string as it appears in configuration.
///
/// The plaintext is only produced by [`EncodedSecret::decode`] and is never
/// kept inside this type. `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedSecret(String);

impl EncodedSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn decode(&self, strategy: PaddingStrategy) -> Result<String, SecretError> {
        decode(Some(&self.0), strategy)
    }
}

impl fmt::Debug for EncodedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncodedSecret(***)")
    }
}

/// Recovers the plaintext behind an obfuscated value.
pub fn decode(encoded: Option<&str>, strategy: PaddingStrategy) -> Result<String, SecretError> {
    let encoded = match encoded {
        Some(value) if !value.is_empty() => value,
        _ => return Err(SecretError::EmptyInput),
    };

    let reversed: String = encoded.chars().rev().collect();
    let padded = restore_padding(reversed, strategy)?;
    let bytes = decode_base64(&padded)?;

    String::from_utf8(bytes).map_err(|e| rejected(format!("decoded bytes are not UTF-8: {e}")))
}

/// Produces the obfuscated form of `plain`. Inverse of [`decode`].
pub fn encode(plain: &str, strategy: PaddingStrategy) -> String {
    let b64 = STANDARD.encode(plain.as_bytes());
    let hidden = match strategy {
        PaddingStrategy::Restore => b64.trim_end_matches(PADDING).to_string(),
        PaddingStrategy::Sentinel(c) => b64.replace(PADDING, &c.to_string()),
    };
    hidden.chars().rev().collect()
}

fn restore_padding(mut value: String, strategy: PaddingStrategy) -> Result<String, SecretError> {
    match strategy {
        PaddingStrategy::Restore => match value.len() % 4 {
            0 => Ok(value),
            2 => {
                value.push_str("==");
                Ok(value)
            }
            3 => {
                value.push(PADDING);
                Ok(value)
            }
            _ => Err(rejected(format!(
                "length {} cannot be padded to a multiple of 4",
                value.len()
            ))),
        },
        PaddingStrategy::Sentinel(sentinel) => Ok(value.replace(sentinel, "=")),
    }
}

fn decode_base64(value: &str) -> Result<Vec<u8>, SecretError> {
    if value.is_empty() || value.len() % 4 != 0 {
        return Err(rejected(format!(
            "length {} is not a positive multiple of 4",
            value.len()
        )));
    }
    if value.contains(|c: char| matches!(c, ' ' | '\t' | '\r' | '\n')) {
        return Err(rejected("contains whitespace".to_string()));
    }

    STANDARD.decode(value).map_err(|e| rejected(e.to_string()))
}

// Never include the value itself in the event.
fn rejected(reason: String) -> SecretError {
    tracing::info!(reason = %reason, "rejected obfuscated value");
    SecretError::InvalidEncoding(reason)
}
