//! Laravel's `Illuminate\Encryption\Encrypter` wire format.
//!
//! An encrypted value is `base64(json)` where the JSON object carries `iv`, `value`, `mac`
//! and `tag`. `value` is the base64 ciphertext. CBC ciphers authenticate with
//! `mac = hex(HMAC-SHA256(key, iv + value))` over the base64 strings; GCM ciphers leave `mac`
//! empty and carry the 16-byte authentication `tag` instead.

use std::fmt;
use std::str::FromStr;

use aes::{Aes128, Aes256};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::error::{ConfigError, Error, Result};

type HmacSha256 = Hmac<Sha256>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const BASE64_PREFIX: &str = "base64:";
const GCM_TAG_LEN: usize = 16;

/// The ciphers Laravel's encrypter supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cipher {
    /// `AES-128-CBC` with an HMAC-SHA256 MAC.
    Aes128Cbc,
    /// `AES-256-CBC` with an HMAC-SHA256 MAC. Laravel's default.
    #[default]
    Aes256Cbc,
    /// `AES-128-GCM`; the envelope carries the authentication tag and an empty MAC.
    Aes128Gcm,
    /// `AES-256-GCM`.
    Aes256Gcm,
}

impl Cipher {
    /// Every supported cipher, in the order Laravel lists them.
    pub const ALL: [Cipher; 4] = [
        Cipher::Aes128Cbc,
        Cipher::Aes256Cbc,
        Cipher::Aes128Gcm,
        Cipher::Aes256Gcm,
    ];

    /// The name Laravel uses in `config/app.php`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Cipher::Aes128Cbc => "AES-128-CBC",
            Cipher::Aes256Cbc => "AES-256-CBC",
            Cipher::Aes128Gcm => "AES-128-GCM",
            Cipher::Aes256Gcm => "AES-256-GCM",
        }
    }

    /// Required key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            Cipher::Aes128Cbc | Cipher::Aes128Gcm => 16,
            Cipher::Aes256Cbc | Cipher::Aes256Gcm => 32,
        }
    }

    /// Length of the IV (nonce for GCM) generated per encryption.
    pub fn iv_len(&self) -> usize {
        if self.is_aead() {
            12
        } else {
            16
        }
    }

    /// Whether the cipher authenticates on its own, so the envelope has a `tag` and no MAC.
    pub fn is_aead(&self) -> bool {
        matches!(self, Cipher::Aes128Gcm | Cipher::Aes256Gcm)
    }
}

impl fmt::Display for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cipher {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|cipher| cipher.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigError::NotAllowed {
                option: "laravel_cipher",
                allowed: Self::ALL
                    .iter()
                    .map(Cipher::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

/// Decodes an application key, accepting the `base64:` form Laravel writes to `APP_KEY`.
///
/// A key that carries the prefix but does not decode is rejected.
pub fn parse_key(key: &str) -> Result<Vec<u8>, ConfigError> {
    match key.strip_prefix(BASE64_PREFIX) {
        Some(encoded) => STANDARD
            .decode(encoded)
            .map_err(|e| ConfigError::invalid("laravel_key", format!("bad base64 key: {e}"))),
        None => Ok(key.as_bytes().to_vec()),
    }
}

/// Why a payload was rejected. Never leaves the codec.
#[derive(Debug, Error)]
pub(crate) enum DecryptError {
    #[error("the payload is invalid")]
    InvalidPayload,
    #[error("the MAC is invalid")]
    InvalidMac,
    #[error("the authentication tag is invalid")]
    InvalidTag,
    #[error("could not decrypt the data")]
    Decrypt,
}

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    iv: String,
    value: String,
    mac: String,
    #[serde(default)]
    tag: Option<String>,
}

/// Encrypts and decrypts values exactly the way Laravel's encrypter does with
/// `serialize = false`.
#[derive(Clone)]
pub struct Encrypter {
    key: Vec<u8>,
    cipher: Cipher,
}

impl fmt::Debug for Encrypter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encrypter")
            .field("cipher", &self.cipher)
            .finish_non_exhaustive()
    }
}

impl Encrypter {
    pub fn new(key: Vec<u8>, cipher: Cipher) -> Result<Self, ConfigError> {
        if key.len() != cipher.key_len() {
            return Err(ConfigError::invalid(
                "laravel_key",
                format!(
                    "{} needs a {}-byte key, got {} bytes",
                    cipher,
                    cipher.key_len(),
                    key.len()
                ),
            ));
        }

        Ok(Self { key, cipher })
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn cipher(&self) -> Cipher {
        self.cipher
    }

    pub fn encrypt(&self, value: &[u8]) -> Result<String> {
        let mut iv = vec![0u8; self.cipher.iv_len()];
        rand::thread_rng().fill_bytes(&mut iv);

        let (ciphertext, tag) = self.seal(&iv, value)?;

        let iv = STANDARD.encode(&iv);
        let value = STANDARD.encode(ciphertext);
        let mac = if self.cipher.is_aead() {
            String::new()
        } else {
            self.hash(&iv, &value)
        };
        let payload = Payload {
            iv,
            value,
            mac,
            tag: Some(tag.map(|tag| STANDARD.encode(tag)).unwrap_or_default()),
        };

        let json = serde_json::to_vec(&payload).map_err(|e| Error::Encrypt(e.to_string()))?;
        Ok(STANDARD.encode(json))
    }

    pub(crate) fn decrypt(&self, payload: &str) -> Result<Vec<u8>, DecryptError> {
        let json = STANDARD
            .decode(payload)
            .map_err(|_| DecryptError::InvalidPayload)?;
        let payload: Payload =
            serde_json::from_slice(&json).map_err(|_| DecryptError::InvalidPayload)?;

        let iv = STANDARD
            .decode(&payload.iv)
            .map_err(|_| DecryptError::InvalidPayload)?;
        if iv.len() != self.cipher.iv_len() {
            return Err(DecryptError::InvalidPayload);
        }

        let tag = match payload.tag.as_deref() {
            None | Some("") => None,
            Some(tag) => Some(STANDARD.decode(tag).map_err(|_| DecryptError::InvalidTag)?),
        };
        match (&tag, self.cipher.is_aead()) {
            (Some(tag), true) if tag.len() == GCM_TAG_LEN => {}
            (None, false) => {}
            _ => return Err(DecryptError::InvalidTag),
        }

        if !self.cipher.is_aead() && !self.valid_mac(&payload) {
            return Err(DecryptError::InvalidMac);
        }

        let ciphertext = STANDARD
            .decode(&payload.value)
            .map_err(|_| DecryptError::InvalidPayload)?;

        self.open(&iv, ciphertext, tag)
    }

    fn hash(&self, iv: &str, value: &str) -> String {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key)
            .expect("HMAC can take key of any size");
        mac.update(iv.as_bytes());
        mac.update(value.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn valid_mac(&self, payload: &Payload) -> bool {
        let expected = self.hash(&payload.iv, &payload.value);
        expected.as_bytes().ct_eq(payload.mac.as_bytes()).into()
    }

    fn seal(&self, iv: &[u8], plaintext: &[u8]) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        let encrypt_err = |e: &dyn fmt::Display| Error::Encrypt(e.to_string());

        match self.cipher {
            Cipher::Aes128Cbc => Ok((
                Aes128CbcEnc::new_from_slices(&self.key, iv)
                    .map_err(|e| encrypt_err(&e))?
                    .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
                None,
            )),
            Cipher::Aes256Cbc => Ok((
                Aes256CbcEnc::new_from_slices(&self.key, iv)
                    .map_err(|e| encrypt_err(&e))?
                    .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
                None,
            )),
            Cipher::Aes128Gcm => {
                let sealed = <Aes128Gcm as KeyInit>::new_from_slice(&self.key)
                    .map_err(|e| encrypt_err(&e))?
                    .encrypt(Nonce::from_slice(iv), plaintext)
                    .map_err(|e| encrypt_err(&e))?;
                Ok(split_tag(sealed))
            }
            Cipher::Aes256Gcm => {
                let sealed = <Aes256Gcm as KeyInit>::new_from_slice(&self.key)
                    .map_err(|e| encrypt_err(&e))?
                    .encrypt(Nonce::from_slice(iv), plaintext)
                    .map_err(|e| encrypt_err(&e))?;
                Ok(split_tag(sealed))
            }
        }
    }

    fn open(
        &self,
        iv: &[u8],
        mut ciphertext: Vec<u8>,
        tag: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, DecryptError> {
        if let Some(tag) = tag {
            // The aead crates expect the tag appended to the ciphertext.
            ciphertext.extend_from_slice(&tag);
        }

        match self.cipher {
            Cipher::Aes128Cbc => Aes128CbcDec::new_from_slices(&self.key, iv)
                .map_err(|_| DecryptError::Decrypt)?
                .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
                .map_err(|_| DecryptError::Decrypt),
            Cipher::Aes256Cbc => Aes256CbcDec::new_from_slices(&self.key, iv)
                .map_err(|_| DecryptError::Decrypt)?
                .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
                .map_err(|_| DecryptError::Decrypt),
            Cipher::Aes128Gcm => <Aes128Gcm as KeyInit>::new_from_slice(&self.key)
                .map_err(|_| DecryptError::Decrypt)?
                .decrypt(Nonce::from_slice(iv), ciphertext.as_slice())
                .map_err(|_| DecryptError::Decrypt),
            Cipher::Aes256Gcm => <Aes256Gcm as KeyInit>::new_from_slice(&self.key)
                .map_err(|_| DecryptError::Decrypt)?
                .decrypt(Nonce::from_slice(iv), ciphertext.as_slice())
                .map_err(|_| DecryptError::Decrypt),
        }
    }
}

fn split_tag(mut sealed: Vec<u8>) -> (Vec<u8>, Option<Vec<u8>>) {
    let tag = sealed.split_off(sealed.len().saturating_sub(GCM_TAG_LEN));
    (sealed, Some(tag))
}
