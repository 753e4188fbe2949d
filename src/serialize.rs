//! PHP session serialization of the manager's attribute map.
//!
//! Laravel stores `serialize($attributes)` in the payload column, which is the
//! `php_serialize` format here. The `php` and `php_binary` handlers are the per-key formats
//! PHP's own session extension writes. Values are modelled as `serde_json::Value`.
//!
//! PHP objects, references and non-UTF-8 strings have no `Value` counterpart.
//! [`decode_session`] keeps such top-level values as their serialized bytes and
//! [`encode_session`] writes them back verbatim, so a session written by PHP survives a
//! round trip through this crate.

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::trace;

use crate::config::SerializeHandler;

/// Session attributes, keyed by name.
pub type Attributes = Map<String, Value>;

// php_binary stores the key length in one byte and reserves the high bit.
const PHP_BINARY_MAX_KEY: usize = 127;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SerializeError {
    #[error("malformed serialized data at byte {0}")]
    Malformed(usize),

    #[error("{0} cannot be represented")]
    Unsupported(&'static str),

    #[error("session key {0:?} cannot be written by this handler")]
    InvalidKey(String),
}

/// A decoded session payload.
///
/// `raw` holds the top-level values that could not be decoded into `attributes`, as the
/// exact bytes PHP wrote for them. A key present in `attributes` shadows the same key in
/// `raw` when encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionData {
    pub attributes: Attributes,
    pub raw: BTreeMap<String, Vec<u8>>,
}

impl SessionData {
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.raw.is_empty()
    }
}

enum Entry<'a> {
    Value(&'a Value),
    Raw(&'a [u8]),
}

impl Entry<'_> {
    fn write(&self, out: &mut Vec<u8>) {
        match self {
            Entry::Value(value) => write_value(value, out),
            Entry::Raw(bytes) => out.extend_from_slice(bytes),
        }
    }
}

/// Encodes the attribute map with `handler`.
pub fn encode(
    handler: SerializeHandler,
    attributes: &Attributes,
) -> Result<Vec<u8>, SerializeError> {
    let entries: Vec<_> = attributes
        .iter()
        .map(|(key, value)| (key, Entry::Value(value)))
        .collect();
    encode_entries(handler, &entries)
}

/// Encodes decoded attributes together with the raw values kept by [`decode_session`].
pub fn encode_session(
    handler: SerializeHandler,
    data: &SessionData,
) -> Result<Vec<u8>, SerializeError> {
    let entries: Vec<_> = data
        .attributes
        .iter()
        .map(|(key, value)| (key, Entry::Value(value)))
        .chain(
            data.raw
                .iter()
                .filter(|(key, _)| !data.attributes.contains_key(key.as_str()))
                .map(|(key, bytes)| (key, Entry::Raw(bytes))),
        )
        .collect();
    encode_entries(handler, &entries)
}

fn encode_entries(
    handler: SerializeHandler,
    entries: &[(&String, Entry<'_>)],
) -> Result<Vec<u8>, SerializeError> {
    let mut out = Vec::new();

    match handler {
        SerializeHandler::PhpSerialize => {
            out.extend_from_slice(format!("a:{}:{{", entries.len()).as_bytes());
            for (key, entry) in entries {
                write_key(key, &mut out);
                entry.write(&mut out);
            }
            out.push(b'}');
        }
        SerializeHandler::Php => {
            for (key, entry) in entries {
                if key.contains('|') || key.contains('!') {
                    return Err(SerializeError::InvalidKey((*key).clone()));
                }
                out.extend_from_slice(key.as_bytes());
                out.push(b'|');
                entry.write(&mut out);
            }
        }
        SerializeHandler::PhpBinary => {
            for (key, entry) in entries {
                if key.len() > PHP_BINARY_MAX_KEY {
                    return Err(SerializeError::InvalidKey((*key).clone()));
                }
                out.push(key.len() as u8);
                out.extend_from_slice(key.as_bytes());
                entry.write(&mut out);
            }
        }
        SerializeHandler::Wddx => return Err(SerializeError::Unsupported("wddx")),
    }

    Ok(out)
}

/// Decodes a payload written with `handler`. An empty payload is an empty map.
///
/// Fails on any value `serde_json` cannot model; use [`decode_session`] to keep those.
pub fn decode(handler: SerializeHandler, data: &[u8]) -> Result<Attributes, SerializeError> {
    let session = decode_session(handler, data)?;
    match session.raw.values().next() {
        Some(bytes) => Err(unserialize(bytes).err().unwrap_or(SerializeError::Malformed(0))),
        None => Ok(session.attributes),
    }
}

/// Decodes a payload written with `handler`, keeping undecodable top-level values as raw
/// bytes. Fails only when the payload is not structurally valid.
pub fn decode_session(
    handler: SerializeHandler,
    data: &[u8],
) -> Result<SessionData, SerializeError> {
    let mut session = SessionData::default();
    if data.is_empty() {
        return Ok(session);
    }

    let mut parser = Parser::new(data);

    match handler {
        SerializeHandler::PhpSerialize => {
            parser.expect(b'a')?;
            parser.expect(b':')?;
            let len = parser.length(0, b':')?;
            parser.expect(b'{')?;
            for _ in 0..len {
                let key = parser.key()?;
                let raw = parser.raw_value()?;
                keep(&mut session, key, raw);
            }
            parser.expect(b'}')?;
        }
        SerializeHandler::Php => {
            while !parser.done() {
                let key = parser.until(b'|')?;
                let raw = parser.raw_value()?;
                keep(&mut session, key, raw);
            }
        }
        SerializeHandler::PhpBinary => {
            while !parser.done() {
                let start = parser.pos;
                let len = usize::from(parser.byte()?);
                let key = String::from_utf8(parser.take(len)?.to_vec())
                    .map_err(|_| SerializeError::Malformed(start))?;
                let raw = parser.raw_value()?;
                keep(&mut session, key, raw);
            }
        }
        SerializeHandler::Wddx => return Err(SerializeError::Unsupported("wddx")),
    }

    if !parser.done() {
        return Err(SerializeError::Malformed(parser.pos));
    }

    Ok(session)
}

fn keep(session: &mut SessionData, key: String, raw: &[u8]) {
    match unserialize(raw) {
        Ok(value) => {
            session.attributes.insert(key, value);
        }
        Err(err) => {
            trace!(%key, %err, "keeping session value as serialized bytes");
            session.raw.insert(key, raw.to_vec());
        }
    }
}

/// `serialize()` of a single value.
pub fn serialize(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(value, &mut out);
    out
}

/// `unserialize()` of a single value.
pub fn unserialize(data: &[u8]) -> Result<Value, SerializeError> {
    let mut parser = Parser::new(data);
    let value = parser.value()?;
    if !parser.done() {
        return Err(SerializeError::Malformed(parser.pos));
    }
    Ok(value)
}

fn write_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.extend_from_slice(b"N;"),
        Value::Bool(b) => out.extend_from_slice(if *b { b"b:1;" } else { b"b:0;" }),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.extend_from_slice(format!("a:{}:{{", items.len()).as_bytes());
            for (i, item) in items.iter().enumerate() {
                out.extend_from_slice(format!("i:{i};").as_bytes());
                write_value(item, out);
            }
            out.push(b'}');
        }
        Value::Object(map) => write_map(map, out),
    }
}

fn write_map(map: &Map<String, Value>, out: &mut Vec<u8>) {
    out.extend_from_slice(format!("a:{}:{{", map.len()).as_bytes());
    for (key, value) in map {
        write_key(key, out);
        write_value(value, out);
    }
    out.push(b'}');
}

// PHP turns decimal-integer string keys into integer keys.
fn write_key(key: &str, out: &mut Vec<u8>) {
    match integer_key(key) {
        Some(i) => out.extend_from_slice(format!("i:{i};").as_bytes()),
        None => write_string(key, out),
    }
}

fn write_number(n: &Number, out: &mut Vec<u8>) {
    match n.as_i64() {
        Some(i) => out.extend_from_slice(format!("i:{i};").as_bytes()),
        None => {
            let f = n.as_f64().unwrap_or_default();
            out.extend_from_slice(format!("d:{f};").as_bytes());
        }
    }
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(format!("s:{}:\"", s.len()).as_bytes());
    out.extend_from_slice(s.as_bytes());
    out.extend_from_slice(b"\";");
}

fn integer_key(key: &str) -> Option<i64> {
    let i: i64 = key.parse().ok()?;
    (i.to_string() == key).then_some(i)
}

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn done(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn malformed(&self) -> SerializeError {
        SerializeError::Malformed(self.pos)
    }

    fn byte(&mut self) -> Result<u8, SerializeError> {
        let b = *self.data.get(self.pos).ok_or_else(|| self.malformed())?;
        self.pos += 1;
        Ok(b)
    }

    fn expect(&mut self, expected: u8) -> Result<(), SerializeError> {
        if self.byte()? == expected {
            Ok(())
        } else {
            Err(SerializeError::Malformed(self.pos - 1))
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], SerializeError> {
        let end = self.pos.checked_add(len).ok_or_else(|| self.malformed())?;
        let data = self.data;
        let slice = data.get(self.pos..end).ok_or_else(|| self.malformed())?;
        self.pos = end;
        Ok(slice)
    }

    fn until(&mut self, delimiter: u8) -> Result<String, SerializeError> {
        let data = self.data;
        let rest = &data[self.pos..];
        let len = rest
            .iter()
            .position(|b| *b == delimiter)
            .ok_or_else(|| self.malformed())?;
        let text = String::from_utf8(rest[..len].to_vec()).map_err(|_| self.malformed())?;
        self.pos += len + 1;
        Ok(text)
    }

    fn length(&mut self, start: usize, terminator: u8) -> Result<usize, SerializeError> {
        usize::try_from(self.integer(terminator)?).map_err(|_| SerializeError::Malformed(start))
    }

    fn key(&mut self) -> Result<String, SerializeError> {
        match self.value()? {
            Value::String(s) => Ok(s),
            Value::Number(n) if n.is_i64() => Ok(n.to_string()),
            _ => Err(SerializeError::Malformed(self.pos)),
        }
    }

    /// The serialized bytes of the next value, whatever its type.
    fn raw_value(&mut self) -> Result<&'a [u8], SerializeError> {
        let data = self.data;
        let start = self.pos;
        self.skip()?;
        Ok(&data[start..self.pos])
    }

    fn skip(&mut self) -> Result<(), SerializeError> {
        let start = self.pos;
        let tag = self.byte()?;

        if tag == b'N' {
            return self.expect(b';');
        }

        self.expect(b':')?;

        match tag {
            b'b' | b'i' | b'd' | b'r' | b'R' => self.until(b';').map(|_| ()),
            b's' | b'E' => {
                let len = self.length(start, b':')?;
                self.quoted(len)?;
                self.expect(b';')
            }
            b'a' => {
                let len = self.length(start, b':')?;
                self.skip_pairs(len)
            }
            b'O' => {
                let len = self.length(start, b':')?;
                self.quoted(len)?;
                self.expect(b':')?;
                let count = self.length(start, b':')?;
                self.skip_pairs(count)
            }
            b'C' => {
                let len = self.length(start, b':')?;
                self.quoted(len)?;
                self.expect(b':')?;
                let len = self.length(start, b':')?;
                self.expect(b'{')?;
                self.take(len)?;
                self.expect(b'}')
            }
            _ => Err(SerializeError::Malformed(start)),
        }
    }

    fn quoted(&mut self, len: usize) -> Result<&'a [u8], SerializeError> {
        self.expect(b'"')?;
        let bytes = self.take(len)?;
        self.expect(b'"')?;
        Ok(bytes)
    }

    fn skip_pairs(&mut self, count: usize) -> Result<(), SerializeError> {
        self.expect(b'{')?;
        for _ in 0..count {
            self.skip()?;
            self.skip()?;
        }
        self.expect(b'}')
    }

    fn integer(&mut self, terminator: u8) -> Result<i64, SerializeError> {
        let start = self.pos;
        let text = self.until(terminator)?;
        text.parse().map_err(|_| SerializeError::Malformed(start))
    }

    fn value(&mut self) -> Result<Value, SerializeError> {
        let start = self.pos;
        let tag = self.byte()?;

        if tag == b'N' {
            self.expect(b';')?;
            return Ok(Value::Null);
        }

        self.expect(b':')?;

        match tag {
            b'b' => match self.integer(b';')? {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                _ => Err(SerializeError::Malformed(start)),
            },
            b'i' => Ok(Value::from(self.integer(b';')?)),
            b'd' => {
                let text = self.until(b';')?;
                let f: f64 = text.parse().map_err(|_| SerializeError::Malformed(start))?;
                Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or(SerializeError::Unsupported("non-finite float"))
            }
            b's' => {
                let len = self.length(start, b':')?;
                let bytes = self.quoted(len)?;
                self.expect(b';')?;
                String::from_utf8(bytes.to_vec())
                    .map(Value::String)
                    .map_err(|_| SerializeError::Unsupported("non-UTF-8 string"))
            }
            b'a' => {
                let len = self.length(start, b':')?;
                self.expect(b'{')?;
                let mut entries = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    let key = self.key()?;
                    entries.push((key, self.value()?));
                }
                self.expect(b'}')?;

                let is_list = entries
                    .iter()
                    .enumerate()
                    .all(|(i, (key, _))| key == &i.to_string());
                if is_list && !entries.is_empty() {
                    Ok(Value::Array(entries.into_iter().map(|(_, v)| v).collect()))
                } else {
                    Ok(Value::Object(entries.into_iter().collect()))
                }
            }
            b'O' | b'C' | b'E' => Err(SerializeError::Unsupported("PHP object")),
            b'r' | b'R' => Err(SerializeError::Unsupported("PHP reference")),
            _ => Err(SerializeError::Malformed(start)),
        }
    }
}
