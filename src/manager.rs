//! Per-request session lifecycle on top of a [`RecordStore`].

use std::sync::{Mutex, PoisonError};

use rand::Rng;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tower_cookies::cookie::CookieJar;
use tower_cookies::{Cookie, Cookies};
use tracing::{debug, warn};

use crate::config::{CookieParams, SerializeHandler};
use crate::db_store::RecordStore;
use crate::error::{Error, Result};
use crate::serialize::{self, Attributes, SessionData};

const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Where the manager reads the incoming session cookie from and writes the outgoing one to.
pub trait CookieTransport {
    fn cookie_value(&self, name: &str) -> Option<String>;
    fn set_cookie(&self, cookie: Cookie<'static>);
}

impl CookieTransport for Cookies {
    fn cookie_value(&self, name: &str) -> Option<String> {
        self.get(name).map(|cookie| cookie.value().to_owned())
    }

    fn set_cookie(&self, cookie: Cookie<'static>) {
        self.add(cookie);
    }
}

/// A poisoned jar is still read and written.
impl CookieTransport for Mutex<CookieJar> {
    fn cookie_value(&self, name: &str) -> Option<String> {
        let jar = self.lock().unwrap_or_else(PoisonError::into_inner);
        jar.get(name).map(|cookie| cookie.value().to_owned())
    }

    fn set_cookie(&self, cookie: Cookie<'static>) {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(cookie);
    }
}

/// Where a manager is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No identifier yet.
    Unbound,
    /// Bound to an identifier with no stored session behind it.
    BoundNew,
    /// Bound to an identifier with a stored session.
    BoundExisting,
    /// The session was destroyed and no identifier is bound.
    Destroyed,
}

/// Options for a [`SessionManager`].
///
/// The defaults wrap identifiers (when the store has a key) and emit a browser-session
/// cookie on `/` that is `HttpOnly` and `SameSite=Lax`.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub(crate) encrypt: bool,
    pub(crate) cookie: CookieParams,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            encrypt: true,
            cookie: CookieParams::default(),
        }
    }
}

impl ManagerConfig {
    /// Whether identifiers are wrapped before they reach the cookie. Only has an effect
    /// when the store has a Laravel key.
    #[must_use]
    pub fn with_encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }

    /// Attributes of the session cookie emitted by [`SessionManager::start`].
    #[must_use]
    pub fn with_cookie(mut self, cookie: CookieParams) -> Self {
        self.cookie = cookie;
        self
    }
}

/// Drives one cookie-backed session through a request.
///
/// The manager resolves or generates the identifier, keeps the cookie value in the form the
/// store's codec expects (wrapped when encryption is on), loads the attributes on
/// [`start`](SessionManager::start) and persists them on [`save`](SessionManager::save).
///
/// Values PHP wrote that have no JSON counterpart, such as Laravel's `ViewErrorBag`, are not
/// visible as attributes but are written back unchanged on `save`. A payload that cannot be
/// parsed at all is never overwritten.
#[derive(Debug)]
pub struct SessionManager {
    records: RecordStore,
    config: ManagerConfig,
    id: Option<String>,
    state: SessionState,
    data: SessionData,
    readable: bool,
}

impl SessionManager {
    /// An unbound manager over `records`. Nothing is read until [`resume`](Self::resume),
    /// [`set_id`](Self::set_id) or [`start`](Self::start).
    pub fn new(records: RecordStore, config: ManagerConfig) -> Self {
        Self {
            records,
            config,
            id: None,
            state: SessionState::Unbound,
            data: SessionData::default(),
            readable: true,
        }
    }

    /// The cookie name, which is also what the codec binds envelopes to.
    pub fn name(&self) -> &str {
        self.records.store().config().cookie_name()
    }

    /// The bound identifier in cookie form.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the last loaded payload could be parsed. When it could not, [`save`]
    /// leaves the stored payload alone.
    ///
    /// [`save`]: SessionManager::save
    pub fn is_readable(&self) -> bool {
        self.readable
    }

    /// Keys whose values were loaded as serialized PHP bytes and will be written back as-is.
    pub fn preserved_keys(&self) -> impl Iterator<Item = &str> {
        self.data
            .raw
            .keys()
            .filter(|key| !self.data.attributes.contains_key(key.as_str()))
            .map(String::as_str)
    }

    /// The per-request record store the manager reads and writes through.
    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    /// Binds `id`, wrapping it first when encryption is on and it is not wrapped yet.
    pub async fn set_id(&mut self, id: &str) -> Result<()> {
        self.bind(id).await.map(|_| ())
    }

    /// Binds the identifier from the incoming cookie when it names a stored session.
    ///
    /// Returns `false`, leaving the manager untouched, for a missing cookie or an
    /// identifier the store does not know.
    pub async fn resume(&mut self, cookies: &impl CookieTransport) -> Result<bool> {
        let Some(value) = cookies.cookie_value(self.name()) else {
            return Ok(false);
        };

        if !self.exist_id(&value).await? {
            debug!("session cookie names no stored session");
            return Ok(false);
        }

        self.set_id(&value).await?;
        Ok(true)
    }

    /// Generates an identifier if none is bound, emits the session cookie and loads the
    /// session attributes.
    pub async fn start(&mut self, cookies: &impl CookieTransport) -> Result<bool> {
        let id = match self.id.clone() {
            Some(id) => id,
            None => {
                let raw = self.random_id();
                self.bind(&raw).await?
            }
        };

        cookies.set_cookie(
            self.config
                .cookie
                .build_cookie(self.name().to_owned(), id.clone()),
        );

        let payload = self.records.read(&id).await?;
        self.load_payload(&payload);
        self.state = if self.records.session_exists() {
            SessionState::BoundExisting
        } else {
            SessionState::BoundNew
        };

        Ok(true)
    }

    /// Moves the session to a fresh identifier and emits a new cookie.
    ///
    /// With `delete_old` the old row is destroyed and the session starts empty; otherwise
    /// the old row is left alone and the current attributes carry over to the new
    /// identifier.
    pub async fn regenerate_id(
        &mut self,
        delete_old: bool,
        cookies: &impl CookieTransport,
    ) -> Result<()> {
        let data = if delete_old {
            self.destroy().await?;
            SessionData::default()
        } else {
            std::mem::take(&mut self.data)
        };

        self.generate_custom_id().await?;
        self.start(cookies).await?;

        if !delete_old {
            self.data = data;
        }

        Ok(())
    }

    /// Deletes the stored session and unbinds the identifier.
    pub async fn destroy(&mut self) -> Result<bool> {
        let destroyed = match self.id.take() {
            Some(id) => self.records.destroy(&id).await?,
            None => true,
        };

        self.data = SessionData::default();
        self.readable = true;
        self.state = SessionState::Destroyed;
        Ok(destroyed)
    }

    /// Whether the store has a row for `id`, raw or wrapped. Does not change the manager.
    pub async fn exist_id(&self, id: &str) -> Result<bool> {
        self.records.exists(id).await
    }

    /// Binds a new random base58 identifier and returns it unwrapped.
    pub async fn generate_custom_id(&mut self) -> Result<String> {
        let raw = self.random_id();
        self.bind(&raw).await?;
        Ok(raw)
    }

    /// Writes the attributes back to the store.
    ///
    /// With `data_from_session_var` the whole attribute map is written as `php_serialize`;
    /// otherwise it is encoded with the configured serialize handler. Returns `false`
    /// without writing when no identifier is bound or the stored payload could not be
    /// parsed.
    pub async fn save(&mut self) -> Result<bool> {
        let Some(id) = self.id.clone() else {
            return Ok(false);
        };

        if !self.readable {
            warn!("stored session payload could not be parsed, leaving it untouched");
            return Ok(false);
        }

        let data = serialize::encode_session(self.payload_handler(), &self.data)
            .map_err(|e| Error::Encode(e.to_string()))?;
        self.records.write(&id, &data).await
    }

    /// The decoded attributes. Values kept as raw PHP bytes are not included.
    pub fn attributes(&self) -> &Attributes {
        &self.data.attributes
    }

    /// Deserializes the attribute at `key`, or `None` when it is absent or of another shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .attributes
            .get(key)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// The attribute at `key` as JSON.
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.data.attributes.get(key)
    }

    /// Sets `key`, replacing any value stored under it, including a preserved raw one.
    pub fn insert<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| Error::Encode(e.to_string()))?;
        let key = key.into();
        self.data.raw.remove(&key);
        self.data.attributes.insert(key, value);
        Ok(())
    }

    /// Removes `key`. A preserved raw value under `key` is dropped too but not returned.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.raw.remove(key);
        self.data.attributes.remove(key)
    }

    /// Removes every attribute and preserved raw value.
    pub fn clear(&mut self) {
        self.data = SessionData::default();
    }

    async fn bind(&mut self, id: &str) -> Result<String> {
        let codec = self.records.store().codec();
        let id = if self.config.encrypt && !codec.is_wrapped(id) {
            codec.encode(id)?
        } else {
            id.to_owned()
        };

        self.state = if self.records.exists(&id).await? {
            SessionState::BoundExisting
        } else {
            SessionState::BoundNew
        };
        self.id = Some(id.clone());

        Ok(id)
    }

    fn random_id(&self) -> String {
        let len = self.records.store().config().id_length();
        let mut rng = rand::thread_rng();
        (0..len)
            .map(|_| char::from(BASE58_ALPHABET[rng.gen_range(0..BASE58_ALPHABET.len())]))
            .collect()
    }

    fn payload_handler(&self) -> SerializeHandler {
        let config = self.records.store().config();
        if config.data_from_session_var() {
            SerializeHandler::PhpSerialize
        } else {
            config.serialize_handler()
        }
    }

    fn load_payload(&mut self, payload: &[u8]) {
        match serialize::decode_session(self.payload_handler(), payload) {
            Ok(data) => {
                if !data.raw.is_empty() {
                    debug!(count = data.raw.len(), "keeping session values as serialized PHP");
                }
                self.data = data;
                self.readable = true;
            }
            Err(err) => {
                warn!(%err, "session payload could not be parsed, starting empty");
                self.data = SessionData::default();
                self.readable = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};

    use super::*;

    #[test]
    fn poisoned_jar_still_carries_cookies() {
        let jar = Mutex::new(CookieJar::new());
        jar.set_cookie(Cookie::new("before", "1"));

        let _ = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = jar.lock().unwrap();
            panic!("handler panicked while holding the jar");
        }));
        assert!(jar.is_poisoned());

        jar.set_cookie(Cookie::new("myapp_session", "abc"));
        assert_eq!(jar.cookie_value("myapp_session").as_deref(), Some("abc"));
        assert_eq!(jar.cookie_value("before").as_deref(), Some("1"));
    }
}
