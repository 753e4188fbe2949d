//! Session identifier codecs.
//!
//! A store normalizes every identifier it is handed through an [`IdentifierCodec`] before
//! touching the database, so the `id` column always holds the raw identifier no matter
//! whether the cookie carried it raw or wrapped.

use std::fmt::Debug;

mod encrypter;
mod laravel;

pub use encrypter::{parse_key, Cipher, Encrypter};
pub use laravel::{cookie_prefix, LaravelCodec};

use crate::error::Result;

/// Outcome of a best-effort decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The input was a valid envelope; this is the raw identifier inside it.
    Unwrapped(String),
    /// The input was not a valid envelope and is returned as it was.
    Unchanged(String),
}

impl Decoded {
    /// The identifier to look sessions up by.
    pub fn into_inner(self) -> String {
        match self {
            Decoded::Unwrapped(id) | Decoded::Unchanged(id) => id,
        }
    }

    /// Borrowing form of [`Decoded::into_inner`].
    pub fn as_str(&self) -> &str {
        match self {
            Decoded::Unwrapped(id) | Decoded::Unchanged(id) => id,
        }
    }

    /// Whether the input was a valid envelope.
    pub fn was_unwrapped(&self) -> bool {
        matches!(self, Decoded::Unwrapped(_))
    }
}

/// Converts between raw session identifiers and their cookie representation.
pub trait IdentifierCodec: Debug + Send + Sync + 'static {
    /// Decodes `id` when it is an envelope, otherwise hands it back unchanged. Never fails.
    fn try_decode(&self, id: &str) -> Decoded;

    /// Strict decode: `Some(raw)` only for a valid envelope bound to this codec's cookie.
    fn decode(&self, id: &str) -> Option<String>;

    /// Wraps a raw identifier for transport in the cookie.
    fn encode(&self, raw: &str) -> Result<String>;

    /// Whether `id` is already in wrapped form.
    fn is_wrapped(&self, id: &str) -> bool;
}

/// The identity codec: the cookie carries the raw identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl IdentifierCodec for PassThrough {
    fn try_decode(&self, id: &str) -> Decoded {
        Decoded::Unchanged(id.to_owned())
    }

    fn decode(&self, _id: &str) -> Option<String> {
        None
    }

    fn encode(&self, raw: &str) -> Result<String> {
        Ok(raw.to_owned())
    }

    fn is_wrapped(&self, _id: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_never_wraps() {
        let codec = PassThrough;
        assert_eq!(codec.try_decode("abc"), Decoded::Unchanged("abc".into()));
        assert_eq!(codec.decode("abc"), None);
        assert_eq!(codec.encode("abc").unwrap(), "abc");
        assert!(!codec.is_wrapped("abc"));
    }

    #[test]
    fn decoded_exposes_identifier() {
        let decoded = Decoded::Unwrapped("raw".into());
        assert!(decoded.was_unwrapped());
        assert_eq!(decoded.as_str(), "raw");
        assert_eq!(decoded.into_inner(), "raw");
    }
}
