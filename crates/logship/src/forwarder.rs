// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Forwarder: ships records to one of several downstream endpoints.
//!
//! The forwarder keeps at most one connection open. A send that fails at any stage drops
//! that connection, waits `retry_interval` and starts over with a freshly chosen endpoint, so a
//! record is only ever given up on when it cannot be serialized or the forwarder is cancelled.

use std::io;
use std::time::Duration;

use chrono::Utc;
use rustls::pki_types::ServerName;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ForwarderConfig, WireFormat};
use crate::endpoint::{pick_address, EndpointSet};
use crate::errors::{ConfigError, ConnectError, FrameError, ForwardError};
use crate::frame::{encode_forward, encode_frame};
use crate::hostname::local_hostname;
use crate::record::{format_timestamp, Record, TIMESTAMP_FIELD};
use crate::tls;

enum Connection {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Connection {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Connection::Plain(stream) => {
                stream.write_all(buf).await?;
                stream.flush().await
            }
            Connection::Tls(stream) => {
                stream.write_all(buf).await?;
                stream.flush().await
            }
        }
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Connection::Plain(stream) => stream.shutdown().await,
            Connection::Tls(stream) => stream.shutdown().await,
        }
    }
}

/// Counters kept over the life of a forwarder.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ForwarderStats {
    pub records_sent: u64,
    /// Failed connect, handshake or write attempts.
    pub send_failures: u64,
    pub connections: u64,
    /// Records that could not be serialized.
    pub dropped: u64,
}

/// Sends records downstream, retrying until each one is written.
pub struct Forwarder {
    tag: String,
    endpoints: EndpointSet,
    timeout: Duration,
    retry_interval: Duration,
    wire_format: WireFormat,
    connector: Option<TlsConnector>,
    hostname: String,
    connection: Option<Connection>,
    cancel_token: CancellationToken,
    stats: ForwarderStats,
}

impl Forwarder {
    /// Builds a forwarder. Fails on invalid settings or unusable certificate files; no
    /// connection is attempted until the first [`Forwarder::send`].
    pub fn new(
        config: &ForwarderConfig,
        cancel_token: CancellationToken,
    ) -> Result<Forwarder, ConfigError> {
        config.validate()?;
        let connector = tls::client_config(&config.tag, &config.tls)?.map(TlsConnector::from);
        let hostname = config
            .hostname
            .clone()
            .unwrap_or_else(|| local_hostname().to_string());

        info!(
            tag = %config.tag,
            hosts = ?config.hosts,
            tls = connector.is_some(),
            wire_format = %config.wire_format,
            "forwarder configured"
        );

        Ok(Forwarder {
            tag: config.tag.clone(),
            endpoints: config.endpoints()?,
            timeout: config.timeout()?,
            retry_interval: config.retry_interval,
            wire_format: config.wire_format,
            connector,
            hostname,
            connection: None,
            cancel_token,
            stats: ForwarderStats::default(),
        })
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    #[must_use]
    pub fn stats(&self) -> ForwarderStats {
        self.stats
    }

    /// Writes `record` to a downstream endpoint.
    ///
    /// Returns once the record is written to a socket. Connection failures are retried
    /// without limit; the only errors are a record that cannot be serialized and
    /// cancellation.
    pub async fn send(&mut self, mut record: Record) -> Result<(), ForwardError> {
        let now = Utc::now();

        if record.normalize_timestamp() {
            warn!(
                tag = %self.tag,
                "missing or invalid {} in record, using {}",
                TIMESTAMP_FIELD,
                format_timestamp(&record.timestamp)
            );
        }
        record.ensure_host(&self.hostname);

        let payload = match self.encode(&record, now.timestamp_nanos_opt().unwrap_or_default()) {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.dropped += 1;
                warn!(tag = %self.tag, error = %e, "dropping record that can't be serialized");
                return Err(ForwardError::Payload(e));
            }
        };

        let cancel_token = self.cancel_token.clone();
        loop {
            let attempt = tokio::select! {
                result = self.try_write(&payload) => Some(result),
                () = cancel_token.cancelled() => None,
            };
            let Some(attempt) = attempt else {
                self.connection = None;
                return Err(ForwardError::Cancelled);
            };

            match attempt {
                Ok(()) => {
                    self.stats.records_sent += 1;
                    return Ok(());
                }
                Err(e) => {
                    self.stats.send_failures += 1;
                    warn!(
                        tag = %self.tag,
                        error = %e,
                        "failed to forward record, retrying in {:?}",
                        self.retry_interval
                    );
                }
            }

            tokio::select! {
                () = sleep(self.retry_interval) => {}
                () = cancel_token.cancelled() => return Err(ForwardError::Cancelled),
            }
        }
    }

    /// Closes the open connection, if any, and logs the forwarder's counters.
    pub async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            match timeout(self.timeout, connection.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(tag = %self.tag, error = %e, "error closing connection"),
                Err(_) => debug!(tag = %self.tag, "timed out closing connection"),
            }
        }
        info!(
            tag = %self.tag,
            records_sent = self.stats.records_sent,
            send_failures = self.stats.send_failures,
            connections = self.stats.connections,
            dropped = self.stats.dropped,
            "forwarder stopped"
        );
    }

    fn encode(&self, record: &Record, time_nanos: i64) -> Result<Vec<u8>, FrameError> {
        match self.wire_format {
            WireFormat::Forward => encode_forward(&self.tag, time_nanos, &record.fields),
            WireFormat::Framed => encode_frame(&record.fields),
        }
    }

    /// One attempt: reuse or open a connection, then write the whole payload.
    async fn try_write(&mut self, payload: &[u8]) -> Result<(), ConnectError> {
        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => {
                let connection = self.connect().await?;
                self.stats.connections += 1;
                connection
            }
        };

        match timeout(self.timeout, connection.write_all(payload)).await {
            Ok(Ok(())) => {
                self.connection = Some(connection);
                Ok(())
            }
            Ok(Err(e)) => Err(ConnectError::Write(e)),
            Err(_) => Err(ConnectError::Timeout {
                stage: "write",
                secs: self.timeout.as_secs(),
            }),
        }
    }

    async fn connect(&self) -> Result<Connection, ConnectError> {
        let endpoint = self.endpoints.choose();
        let secs = self.timeout.as_secs();

        let addrs = match timeout(self.timeout, endpoint.resolve()).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("timed out after {secs}s"),
            )),
        }
        .map_err(|source| ConnectError::Resolve {
            host: endpoint.host.clone(),
            source,
        })?;
        let addr = pick_address(&addrs).ok_or_else(|| ConnectError::NoAddresses {
            host: endpoint.host.clone(),
        })?;

        debug!(tag = %self.tag, %endpoint, %addr, "connecting");
        let tcp = timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ConnectError::Timeout {
                stage: "connect",
                secs,
            })?
            .map_err(|source| ConnectError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        if let Err(e) = tcp.set_nodelay(true) {
            debug!(tag = %self.tag, error = %e, "failed to set TCP_NODELAY");
        }

        let Some(connector) = &self.connector else {
            info!(tag = %self.tag, %endpoint, %addr, "connected");
            return Ok(Connection::Plain(tcp));
        };

        let server_name =
            ServerName::try_from(endpoint.host.clone()).map_err(|_| ConnectError::ServerName {
                host: endpoint.host.clone(),
            })?;
        let stream = timeout(self.timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| ConnectError::Timeout {
                stage: "tls handshake",
                secs,
            })?
            .map_err(|source| ConnectError::Handshake {
                addr: addr.to_string(),
                source,
            })?;
        info!(tag = %self.tag, %endpoint, %addr, "connected with tls");
        Ok(Connection::Tls(Box::new(stream)))
    }
}
