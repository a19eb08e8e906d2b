// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! MessagePack payloads decoded into JSON-shaped fields.
//!
//! `serde_json::Value` has no notion of binary strings or extension types, so payloads go
//! through a visitor that maps them onto JSON values:
//!
//! - `bin` becomes a string when it is valid UTF-8, an array of byte values otherwise
//! - the timestamp extension (type -1) becomes a canonical timestamp string
//! - any other extension becomes `{"ext_type": <type>, "data": [<bytes>]}`
//! - map keys that aren't strings are rendered as JSON text

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::{Map, Number, Value};

use crate::record::{format_timestamp, Fields};

/// Extension type reserved for timestamps.
pub const TIMESTAMP_EXT: i8 = -1;

/// Decodes a MessagePack map into fields.
pub fn fields_from_slice(bytes: &[u8]) -> Result<Fields, rmp_serde::decode::Error> {
    rmp_serde::from_slice::<PayloadMap>(bytes).map(|map| map.0)
}

struct PayloadValue(Value);

impl<'de> Deserialize<'de> for PayloadValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor).map(PayloadValue)
    }
}

struct PayloadMap(Fields);

impl<'de> Deserialize<'de> for PayloadMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match deserializer.deserialize_map(ValueVisitor)? {
            Value::Object(map) => Ok(PayloadMap(map)),
            _ => Err(de::Error::custom("payload is not a map")),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a MessagePack value")
    }

    fn visit_bool<E>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_f64<E>(self, v: f64) -> Result<Value, E> {
        Ok(Number::from_f64(v).map_or(Value::Null, Value::Number))
    }

    fn visit_str<E>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_bytes<E>(self, v: &[u8]) -> Result<Value, E> {
        Ok(bytes_value(v))
    }

    fn visit_unit<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        PayloadValue::deserialize(deserializer).map(|v| v.0)
    }

    // rmp-serde hands extension values over as a newtype wrapping `(type, data)`.
    fn visit_newtype_struct<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<Value, D::Error> {
        let (ext_type, data) = <(i8, ExtData)>::deserialize(deserializer)?;
        Ok(ext_value(ext_type, &data.0))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut values = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(4096));
        while let Some(PayloadValue(value)) = seq.next_element()? {
            values.push(value);
        }
        Ok(Value::Array(values))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut map = Map::new();
        while let Some((PayloadValue(key), PayloadValue(value))) = access.next_entry()? {
            let key = match key {
                Value::String(key) => key,
                other => other.to_string(),
            };
            map.insert(key, value);
        }
        Ok(Value::Object(map))
    }
}

struct ExtData(Vec<u8>);

impl<'de> Deserialize<'de> for ExtData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BytesVisitor;

        impl<'de> Visitor<'de> for BytesVisitor {
            type Value = Vec<u8>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("extension data")
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Vec<u8>, E> {
                Ok(v.to_vec())
            }

            fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Vec<u8>, E> {
                Ok(v)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<u8>, A::Error> {
                let mut bytes = Vec::new();
                while let Some(byte) = seq.next_element()? {
                    bytes.push(byte);
                }
                Ok(bytes)
            }
        }

        deserializer.deserialize_bytes(BytesVisitor).map(ExtData)
    }
}

fn bytes_value(bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(text) => Value::String(text.to_string()),
        Err(_) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}

fn ext_value(ext_type: i8, data: &[u8]) -> Value {
    if ext_type == TIMESTAMP_EXT {
        if let Some(timestamp) = ext_timestamp(data) {
            return Value::String(format_timestamp(&timestamp));
        }
    }
    let mut map = Map::new();
    map.insert("ext_type".to_string(), Value::from(ext_type));
    map.insert(
        "data".to_string(),
        Value::Array(data.iter().map(|b| Value::from(*b)).collect()),
    );
    Value::Object(map)
}

/// Decodes the 32, 64 and 96-bit layouts of the timestamp extension.
fn ext_timestamp(data: &[u8]) -> Option<DateTime<Utc>> {
    let (secs, nanos) = match data.len() {
        4 => (i64::from(u32::from_be_bytes(data.try_into().ok()?)), 0),
        8 => {
            let packed = u64::from_be_bytes(data.try_into().ok()?);
            let secs = i64::try_from(packed & 0x3_ffff_ffff).ok()?;
            let nanos = u32::try_from(packed >> 34).ok()?;
            (secs, nanos)
        }
        12 => (
            i64::from_be_bytes(data[4..].try_into().ok()?),
            u32::from_be_bytes(data[..4].try_into().ok()?),
        ),
        _ => return None,
    };
    if nanos >= 1_000_000_000 {
        return None;
    }
    Utc.timestamp_opt(secs, nanos).single()
}
