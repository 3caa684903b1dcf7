pub mod io;

use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::Deserialize;
use thiserror::Error;

use std::{
    borrow::Cow,
    cmp::Ordering,
    fmt,
    str::FromStr,
};

const LINE_FEED: u8 = b'\n';
const DEFAULT_KEY_FIELD: &str = "timestamp";

/// The sort key of a log record.
///
/// Numbers compare numerically and strings lexicographically. Every number
/// orders before every string, so a total order exists even over inputs
/// mixing both representations.
#[derive(Clone, Debug)]
pub enum Timestamp {
    Integer(i128),
    Float(f64),
    Text(String),
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        use Timestamp::*;
        match (self, other) {
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => cmp_float(*a, *b),
            (Integer(a), Float(b)) => cmp_int_float(*a, *b),
            (Float(a), Integer(b)) => cmp_int_float(*b, *a).reverse(),
            (Text(a), Text(b)) => a.cmp(b),
            (Text(_), _) => Ordering::Greater,
            (_, Text(_)) => Ordering::Less,
        }
    }
}

/// Zeros of either sign are equal; otherwise IEEE total order.
fn cmp_float(a: f64, b: f64) -> Ordering {
    if a == b { Ordering::Equal } else { a.total_cmp(&b) }
}

/// Exact comparison of an integer with a float, without rounding the integer.
fn cmp_int_float(a: i128, b: f64) -> Ordering {
    // 2^127, the first float above i128::MAX
    const LIMIT: f64 = 170141183460469231731687303715884105728.0;

    if b.is_nan() {
        return if b.is_sign_negative() { Ordering::Greater } else { Ordering::Less };
    }
    if b >= LIMIT {
        return Ordering::Less;
    }
    if b < -LIMIT {
        return Ordering::Greater;
    }
    let floor = b.floor();
    match a.cmp(&(floor as i128)) {
        Ordering::Equal if b > floor => Ordering::Less,
        ord => ord,
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timestamp {}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Integer(x) => write!(f, "{}", x),
            Timestamp::Float(x) => write!(f, "{}", x),
            Timestamp::Text(x) => f.write_str(x),
        }
    }
}

impl From<i64> for Timestamp {
    fn from(x: i64) -> Self { Timestamp::Integer(x.into()) }
}

impl From<f64> for Timestamp {
    fn from(x: f64) -> Self { Timestamp::Float(x) }
}

impl From<&str> for Timestamp {
    fn from(x: &str) -> Self { Timestamp::Text(x.to_string()) }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TimestampVisitor;

        impl<'de> Visitor<'de> for TimestampVisitor {
            type Value = Timestamp;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number or a string timestamp")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Timestamp, E> {
                Ok(Timestamp::Integer(v.into()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Timestamp, E> {
                Ok(Timestamp::Integer(v.into()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Timestamp, E> {
                Ok(Timestamp::Float(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Timestamp, E> {
                Ok(Timestamp::Text(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Timestamp, E> {
                Ok(Timestamp::Text(v))
            }
        }

        deserializer.deserialize_any(TimestampVisitor)
    }
}

/// Names the JSON member that holds the sort key of every record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyField(String);

impl KeyField {
    pub fn new<S: Into<String>>(name: S) -> Self { Self(name.into()) }

    pub fn name(&self) -> &str { &self.0 }

    /// Extracts the sort key from a raw line.
    ///
    /// Only the key member is decoded; every other member is skipped. When
    /// the member occurs more than once the last occurrence wins. Trailing
    /// whitespace, including the line terminator, is accepted.
    pub fn extract(&self, line: &[u8]) -> Result<Timestamp, ParseError> {
        let mut de = serde_json::Deserializer::from_slice(line);
        let key = KeySeed { field: &self.0 }.deserialize(&mut de)?;
        de.end()?;
        key.ok_or_else(|| ParseError::MissingKey(self.0.clone()))
    }
}

impl Default for KeyField {
    fn default() -> Self { Self::new(DEFAULT_KEY_FIELD) }
}

impl fmt::Display for KeyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

struct KeySeed<'a> {
    field: &'a str,
}

impl<'de, 'a> DeserializeSeed<'de> for KeySeed<'a> {
    type Value = Option<Timestamp>;

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(self)
    }
}

impl<'de, 'a> Visitor<'de> for KeySeed<'a> {
    type Value = Option<Timestamp>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut key = None;
        while let Some(name) = map.next_key::<Cow<'de, str>>()? {
            if name == self.field {
                key = Some(map.next_value::<Timestamp>()?);
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(key)
    }
}

/// A raw log line together with its sort key.
///
/// The raw bytes are kept exactly as read, line terminator included, and are
/// never re-serialized.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    raw: Vec<u8>,
    key: Timestamp,
}

impl Record {
    pub fn new(raw: Vec<u8>, key: Timestamp) -> Self { Self { raw, key } }

    /// Builds a record from a raw line, extracting the key named by `field`.
    pub fn from_line(raw: Vec<u8>, field: &KeyField) -> Result<Self, ParseError> {
        let key = field.extract(&raw)?;
        Ok(Self { raw, key })
    }

    pub fn raw(&self) -> &[u8] { &self.raw }

    pub fn key(&self) -> &Timestamp { &self.key }

    /// Whether the raw line ends with a line feed. Only the last line of an
    /// input may lack one.
    pub fn has_terminator(&self) -> bool { self.raw.last() == Some(&LINE_FEED) }

    pub fn into_raw(self) -> Vec<u8> { self.raw }
}

impl FromStr for Record {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Record::from_line(s.as_bytes().to_vec(), &KeyField::default())
    }
}

/// An error returned when the sort key of a raw line cannot be extracted.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The line is not a JSON object, or its key has an unsupported type.
    #[error("invalid record: {0}")]
    Json(#[from] serde_json::Error),
    /// The object has no member with the key field name.
    #[error("missing key field `{0}`")]
    MissingKey(String),
}
