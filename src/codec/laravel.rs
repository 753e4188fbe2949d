use hmac::{Hmac, Mac};
use sha1::Sha1;
use tracing::trace;

use super::encrypter::{parse_key, Cipher, Encrypter};
use super::{Decoded, IdentifierCodec};
use crate::error::{ConfigError, Result};

type HmacSha1 = Hmac<Sha1>;

/// The keyed prefix Laravel puts in front of encrypted cookie values:
/// `hex(HMAC-SHA1(key, cookie_name + "v2")) + "|"`.
pub fn cookie_prefix(cookie_name: &str, key: &[u8]) -> String {
    let mut mac =
        <HmacSha1 as Mac>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(cookie_name.as_bytes());
    mac.update(b"v2");
    let mut prefix = hex::encode(mac.finalize().into_bytes());
    prefix.push('|');
    prefix
}

/// Wraps session identifiers the way Laravel's `EncryptCookies` middleware wraps the
/// session cookie, so either side can read the other's cookie.
#[derive(Debug, Clone)]
pub struct LaravelCodec {
    encrypter: Encrypter,
    cookie_name: String,
    prefix: String,
    id_length: usize,
}

impl LaravelCodec {
    /// Builds a codec from an application key (raw or `base64:`) and a cipher name.
    pub fn new(
        key: &str,
        cipher: &str,
        cookie_name: impl Into<String>,
        id_length: usize,
    ) -> Result<Self, ConfigError> {
        let cipher: Cipher = cipher.parse()?;
        let encrypter = Encrypter::new(parse_key(key)?, cipher)?;
        Ok(Self::with_encrypter(encrypter, cookie_name, id_length))
    }

    /// Builds a codec around an existing encrypter. The cookie prefix is derived from the
    /// encrypter's key and `cookie_name`.
    pub fn with_encrypter(
        encrypter: Encrypter,
        cookie_name: impl Into<String>,
        id_length: usize,
    ) -> Self {
        let cookie_name = cookie_name.into();
        let prefix = cookie_prefix(&cookie_name, encrypter.key());

        Self {
            encrypter,
            cookie_name,
            prefix,
            id_length,
        }
    }

    /// The cookie name envelopes are bound to.
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }
}

impl IdentifierCodec for LaravelCodec {
    fn try_decode(&self, id: &str) -> Decoded {
        match self.decode(id) {
            Some(raw) => Decoded::Unwrapped(raw),
            None => Decoded::Unchanged(id.to_owned()),
        }
    }

    fn decode(&self, id: &str) -> Option<String> {
        let plaintext = match self.encrypter.decrypt(id) {
            Ok(plaintext) => plaintext,
            Err(err) => {
                trace!(%err, "session id is not a valid envelope");
                return None;
            }
        };

        let plaintext = String::from_utf8(plaintext).ok()?;
        if !plaintext.starts_with(&self.prefix) {
            trace!(cookie = %self.cookie_name, "session id envelope has a foreign prefix");
            return None;
        }

        plaintext
            .split('|')
            .nth(1)
            .filter(|raw| !raw.is_empty())
            .map(str::to_owned)
    }

    fn encode(&self, raw: &str) -> Result<String> {
        let mut value = String::with_capacity(self.prefix.len() + raw.len());
        value.push_str(&self.prefix);
        value.push_str(raw);
        self.encrypter.encrypt(value.as_bytes())
    }

    fn is_wrapped(&self, id: &str) -> bool {
        if id.chars().count() == self.id_length {
            return false;
        }

        self.decode(id).is_some()
    }
}
