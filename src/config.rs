//! Store and cookie configuration.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use time::{Duration, OffsetDateTime};
use tower_cookies::cookie::SameSite;
use tower_cookies::Cookie;

use crate::clock::{Clock, SystemClock};
use crate::codec::Cipher;
use crate::error::ConfigError;

pub(crate) const DEFAULT_TABLE: &str = "sessions";
pub(crate) const DEFAULT_LIFETIME: i64 = 3600;
pub(crate) const DEFAULT_ID_LENGTH: usize = 40;

/// How session data is serialized before it is base64-encoded into the `payload` column.
///
/// The names match PHP's `session.serialize_handler` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum SerializeHandler {
    /// `serialize()` of the whole attribute array. Laravel reads this format.
    #[default]
    PhpSerialize,
    /// `key|serialized-value` pairs.
    Php,
    /// Length-prefixed keys followed by serialized values.
    PhpBinary,
    /// Legacy XML packets. Only usable when the whole attribute map is serialized.
    Wddx,
}

impl SerializeHandler {
    pub const ALL: [SerializeHandler; 4] = [
        SerializeHandler::PhpSerialize,
        SerializeHandler::Php,
        SerializeHandler::PhpBinary,
        SerializeHandler::Wddx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SerializeHandler::PhpSerialize => "php_serialize",
            SerializeHandler::Php => "php",
            SerializeHandler::PhpBinary => "php_binary",
            SerializeHandler::Wddx => "wddx",
        }
    }

    /// The payload returned for sessions that are absent, expired or undecodable.
    pub fn default_payload(&self) -> &'static [u8] {
        match self {
            SerializeHandler::PhpSerialize => b"a:0:{}",
            _ => b"",
        }
    }
}

impl fmt::Display for SerializeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SerializeHandler {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|handler| handler.as_str() == s)
            .ok_or_else(|| ConfigError::NotAllowed {
                option: "serialize_handler",
                allowed: Self::ALL
                    .iter()
                    .map(SerializeHandler::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

impl TryFrom<String> for SerializeHandler {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Resolves the authenticated user for the request being written.
#[derive(Clone)]
pub struct UserResolver(Arc<dyn Fn() -> Option<i64> + Send + Sync>);

impl UserResolver {
    pub fn new<F>(resolve: F) -> Self
    where
        F: Fn() -> Option<i64> + Send + Sync + 'static,
    {
        Self(Arc::new(resolve))
    }

    pub fn resolve(&self) -> Option<i64> {
        (self.0)()
    }
}

impl fmt::Debug for UserResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UserResolver")
    }
}

/// Options for [`DbStore`](crate::DbStore).
///
/// Deserializable from the option maps applications already keep for their session
/// handler, or assembled with the `with_*` builders. Nothing is checked until the store is
/// built, at which point every problem is reported as a [`ConfigError`].
///
/// ```
/// use laravel_sessions_seaorm_store::{SerializeHandler, StoreConfig};
///
/// let config = StoreConfig::new("laravel_session")
///     .with_lifetime(7200)
///     .with_serialize_handler(SerializeHandler::PhpSerialize)
///     .with_laravel_key("base64:MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub(crate) table: String,
    pub(crate) serialize_handler: SerializeHandler,
    #[serde(skip)]
    pub(crate) user: Option<UserResolver>,
    pub(crate) ip: Option<String>,
    pub(crate) lifetime: i64,
    #[serde(alias = "dataFromSessionVar")]
    pub(crate) data_from_session_var: bool,
    pub(crate) cookie_name: String,
    pub(crate) id_length: usize,
    pub(crate) laravel_key: Option<String>,
    #[serde(alias = "laravel_chiper")]
    pub(crate) laravel_cipher: String,
    #[serde(skip)]
    pub(crate) clock: Option<Arc<dyn Clock>>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            serialize_handler: SerializeHandler::default(),
            user: None,
            ip: None,
            lifetime: DEFAULT_LIFETIME,
            data_from_session_var: true,
            cookie_name: String::new(),
            id_length: DEFAULT_ID_LENGTH,
            laravel_key: None,
            laravel_cipher: Cipher::default().as_str().to_string(),
            clock: None,
        }
    }
}

impl StoreConfig {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            ..Default::default()
        }
    }

    /// Reads options from a JSON-like value, reporting wrongly typed or unknown enumerated
    /// values as configuration errors.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value).map_err(|e| ConfigError::invalid("options", e.to_string()))
    }

    #[must_use]
    pub fn with_table_name(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    #[must_use]
    pub fn with_serialize_handler(mut self, handler: SerializeHandler) -> Self {
        self.serialize_handler = handler;
        self
    }

    #[must_use]
    pub fn with_user_resolver<F>(mut self, resolve: F) -> Self
    where
        F: Fn() -> Option<i64> + Send + Sync + 'static,
    {
        self.user = Some(UserResolver::new(resolve));
        self
    }

    /// Records `ip` instead of the request's client address.
    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    #[must_use]
    pub fn with_lifetime(mut self, seconds: i64) -> Self {
        self.lifetime = seconds;
        self
    }

    #[must_use]
    pub fn with_data_from_session_var(mut self, enabled: bool) -> Self {
        self.data_from_session_var = enabled;
        self
    }

    #[must_use]
    pub fn with_id_length(mut self, id_length: usize) -> Self {
        self.id_length = id_length;
        self
    }

    /// Enables Laravel-compatible identifier encryption with the application key, either raw
    /// or in the `base64:` form found in Laravel's `APP_KEY`.
    #[must_use]
    pub fn with_laravel_key(mut self, key: impl Into<String>) -> Self {
        self.laravel_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_laravel_cipher(mut self, cipher: impl Into<String>) -> Self {
        self.laravel_cipher = cipher.into();
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn lifetime(&self) -> i64 {
        self.lifetime
    }

    pub fn id_length(&self) -> usize {
        self.id_length
    }

    pub fn serialize_handler(&self) -> SerializeHandler {
        self.serialize_handler
    }

    pub fn data_from_session_var(&self) -> bool {
        self.data_from_session_var
    }

    pub fn encrypts_ids(&self) -> bool {
        self.laravel_key.is_some()
    }

    /// Checks every option that can be checked without a database.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cookie_name.is_empty() {
            return Err(ConfigError::Missing("cookie_name"));
        }

        if self.table.is_empty() {
            return Err(ConfigError::Missing("table"));
        }

        if self.lifetime <= 0 {
            return Err(ConfigError::invalid(
                "lifetime",
                format!("expected a positive number of seconds, got {}", self.lifetime),
            ));
        }

        if self.id_length == 0 {
            return Err(ConfigError::invalid("id_length", "must be at least 1"));
        }

        if self.serialize_handler == SerializeHandler::Wddx && !self.data_from_session_var {
            return Err(ConfigError::invalid(
                "serialize_handler",
                "wddx payloads can only be written with dataFromSessionVar enabled",
            ));
        }

        if let Some(key) = &self.laravel_key {
            if key.is_empty() {
                return Err(ConfigError::Missing("laravel_key"));
            }
            let cipher: Cipher = self.laravel_cipher.parse()?;
            crate::codec::Encrypter::new(crate::codec::parse_key(key)?, cipher)?;
        }

        Ok(())
    }

    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone().unwrap_or_else(|| Arc::new(SystemClock))
    }
}

/// Attributes of the session cookie the manager emits.
#[derive(Debug, Clone)]
pub struct CookieParams {
    pub(crate) path: Cow<'static, str>,
    pub(crate) domain: Option<Cow<'static, str>>,
    pub(crate) secure: bool,
    pub(crate) http_only: bool,
    pub(crate) same_site: SameSite,
    pub(crate) lifetime: Option<Duration>,
}

impl Default for CookieParams {
    fn default() -> Self {
        Self {
            path: "/".into(),
            domain: None,
            secure: false,
            http_only: true,
            same_site: SameSite::Lax,
            lifetime: None,
        }
    }
}

impl CookieParams {
    #[must_use]
    pub fn with_path<P: Into<Cow<'static, str>>>(mut self, path: P) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn with_domain<D: Into<Cow<'static, str>>>(mut self, domain: D) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    #[must_use]
    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    /// Makes the cookie persistent for `lifetime`; without it the cookie ends with the
    /// browser session.
    #[must_use]
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub(crate) fn build_cookie(&self, name: String, value: String) -> Cookie<'static> {
        let mut cookie_builder = Cookie::build((name, value))
            .http_only(self.http_only)
            .same_site(self.same_site)
            .secure(self.secure)
            .path(self.path.clone());

        if let Some(lifetime) = self.lifetime.filter(|lifetime| lifetime.is_positive()) {
            cookie_builder = cookie_builder
                .max_age(lifetime)
                .expires(OffsetDateTime::now_utc() + lifetime);
        }

        if let Some(domain) = self.domain.clone() {
            cookie_builder = cookie_builder.domain(domain);
        }

        cookie_builder.build()
    }
}
