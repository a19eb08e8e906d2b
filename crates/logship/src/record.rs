// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The unit of data moved through the pipeline.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Open-schema payload of a record.
pub type Fields = serde_json::Map<String, Value>;

/// Field holding the record's textual timestamp.
pub const TIMESTAMP_FIELD: &str = "@timestamp";

/// Field holding the name of the host the record came from.
pub const HOST_FIELD: &str = "host";

/// A timestamped key/value log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// When the record was first observed by this process.
    pub timestamp: DateTime<Utc>,
    pub fields: Fields,
}

impl Record {
    /// Creates a record observed now.
    #[must_use]
    pub fn new(fields: Fields) -> Self {
        Self::with_timestamp(Utc::now(), fields)
    }

    #[must_use]
    pub fn with_timestamp(timestamp: DateTime<Utc>, fields: Fields) -> Self {
        Record { timestamp, fields }
    }

    /// Inserts `@timestamp` from the receive time when the field is absent.
    ///
    /// Returns `true` if the field was added.
    pub fn ensure_timestamp(&mut self) -> bool {
        if self.fields.contains_key(TIMESTAMP_FIELD) {
            return false;
        }
        self.fields.insert(
            TIMESTAMP_FIELD.to_string(),
            Value::String(format_timestamp(&self.timestamp)),
        );
        true
    }

    /// Replaces `@timestamp` with the receive time unless it holds a parseable timestamp.
    ///
    /// Returns `true` if the field was rewritten.
    pub fn normalize_timestamp(&mut self) -> bool {
        let valid = self
            .fields
            .get(TIMESTAMP_FIELD)
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .is_some();
        if valid {
            return false;
        }
        self.fields.insert(
            TIMESTAMP_FIELD.to_string(),
            Value::String(format_timestamp(&self.timestamp)),
        );
        true
    }

    /// Sets `host` to `hostname` when it is missing, null or an empty string.
    pub fn ensure_host(&mut self, hostname: &str) {
        let missing = match self.fields.get(HOST_FIELD) {
            None | Some(Value::Null) => true,
            Some(Value::String(host)) => host.is_empty(),
            Some(_) => false,
        };
        if missing {
            self.fields
                .insert(HOST_FIELD.to_string(), Value::String(hostname.to_string()));
        }
    }
}

/// Formats an instant in the canonical record format: RFC 3339, UTC, milliseconds.
#[must_use]
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses any RFC 3339 timestamp into UTC.
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
