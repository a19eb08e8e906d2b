// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types, grouped by where they are fatal.
//!
//! [`ConfigError`] and [`TlsError`] are startup errors: the process is expected to log them and
//! exit. [`FrameError`] and [`ConnectError`] only ever end a single connection. [`ForwardError`]
//! is what a caller of the forwarder can observe.

use std::io;
use std::path::PathBuf;

/// Invalid or missing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("[{component}] you must specify a timeout greater than zero (got {timeout})")]
    InvalidTimeout {
        component: &'static str,
        timeout: i64,
    },

    #[error("[{component}] no valid hosts configured")]
    NoHosts { component: &'static str },

    #[error("invalid endpoint '{0}': expected host:port")]
    InvalidEndpoint(String),

    #[error("[{component}] you must specify ssl_cert and ssl_key")]
    MissingIdentity { component: &'static str },

    #[error("[{component}] bind address cannot be empty")]
    EmptyBind { component: &'static str },

    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("no inputs configured")]
    NoInputs,

    #[error("no outputs configured")]
    NoOutputs,

    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// Failures loading certificate material or assembling a rustls config.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failure reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificates found in {path}")]
    NoCertificates { path: PathBuf },

    #[error("no private key found in {path}")]
    NoPrivateKey { path: PathBuf },

    #[error("failed to decode PEM data of CA certificate from {path}")]
    NotPem { path: PathBuf },

    #[error("this is not a certificate file: {path}")]
    NotCertificate { path: PathBuf },

    #[error("failed to parse CA certificate {path}: {source}")]
    InvalidCa {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },

    #[error("client certificate verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

/// A frame could not be read, inflated or (de)serialized.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The peer closed the connection on a frame boundary.
    #[error("connection closed by peer")]
    Closed,

    #[error("can't read frame header: {0}")]
    Header(#[source] io::Error),

    #[error("declared {kind} length {length} exceeds the {limit} byte limit")]
    Oversized {
        kind: &'static str,
        length: u64,
        limit: u64,
    },

    #[error("can't read {expected} bytes of compressed payload: {source}")]
    Body {
        expected: u64,
        #[source]
        source: io::Error,
    },

    #[error("can't uncompress payload: {0}")]
    Inflate(#[source] io::Error),

    #[error("uncompressed payload has {actual} bytes, header declared {declared}")]
    LengthMismatch { declared: u64, actual: u64 },

    #[error("can't compress payload: {0}")]
    Deflate(#[source] io::Error),

    #[error("can't parse payload: {0}")]
    Payload(#[from] rmp_serde::decode::Error),

    #[error("can't serialize payload: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

impl FrameError {
    /// True for errors caused by the serialized content rather than the framing.
    #[must_use]
    pub fn is_payload(&self) -> bool {
        matches!(self, FrameError::Payload(_) | FrameError::Encode(_))
    }
}

/// A single attempt to reach a destination failed. Always retried by the forwarder.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("DNS lookup failure \"{host}\": {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("DNS lookup for \"{host}\" returned no addresses")]
    NoAddresses { host: String },

    #[error("failure connecting to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to tls handshake with {addr}: {source}")]
    Handshake {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid server name \"{host}\"")]
    ServerName { host: String },

    #[error("socket write error: {0}")]
    Write(#[source] io::Error),

    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },
}

/// Errors surfaced by [`crate::forwarder::Forwarder::send`].
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// The record could not be serialized; it was dropped and will not be retried.
    #[error("bogus record dropped: {0}")]
    Payload(#[source] FrameError),

    #[error("forwarder cancelled before the record was written")]
    Cancelled,
}

/// Errors starting an input.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("can't start listen \"{bind}\": {source}")]
    Bind {
        bind: String,
        #[source]
        source: io::Error,
    },
}
