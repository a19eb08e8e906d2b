// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Capability traits for the pieces the dispatcher connects, and the mapping from
//! configuration to concrete implementations.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{InputConfig, OutputConfig};
use crate::errors::{ConfigError, ForwardError, ListenerError};
use crate::forwarder::Forwarder;
use crate::listener::Listener;
use crate::record::Record;

/// Produces records into the sink it was built with.
#[async_trait]
pub trait Input: Send {
    fn tag(&self) -> &str;

    /// Runs until the input's cancellation token fires.
    async fn run(self: Box<Self>);
}

/// Consumes records, one at a time.
#[async_trait]
pub trait Output: Send {
    fn tag(&self) -> &str;

    async fn send(&mut self, record: Record) -> Result<(), ForwardError>;

    /// Called once after the last record.
    async fn close(&mut self) {}
}

/// Inspects a record between inputs and outputs. Returning `None` drops it.
pub trait Filter: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, record: Record) -> Option<Record>;
}

#[async_trait]
impl Input for Listener {
    fn tag(&self) -> &str {
        Listener::tag(self)
    }

    async fn run(self: Box<Self>) {
        self.spin().await;
    }
}

#[async_trait]
impl Output for Forwarder {
    fn tag(&self) -> &str {
        Forwarder::tag(self)
    }

    async fn send(&mut self, record: Record) -> Result<(), ForwardError> {
        Forwarder::send(self, record).await
    }

    async fn close(&mut self) {
        Forwarder::close(self).await;
    }
}

/// Builds and binds the input described by `config`.
pub async fn build_input(
    config: &InputConfig,
    sink: mpsc::Sender<Record>,
    cancel_token: CancellationToken,
) -> Result<Box<dyn Input>, ListenerError> {
    match config {
        InputConfig::Listener(config) => {
            let listener = Listener::bind(config, sink, cancel_token).await?;
            Ok(Box::new(listener))
        }
    }
}

/// Builds the output described by `config`.
pub fn build_output(
    config: &OutputConfig,
    cancel_token: CancellationToken,
) -> Result<Box<dyn Output>, ConfigError> {
    match config {
        OutputConfig::Forwarder(config) => Ok(Box::new(Forwarder::new(config, cancel_token)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ForwarderConfig, ListenerConfig};
    use crate::test_utils::TestPki;
    use crate::tls::TlsFiles;

    #[tokio::test]
    async fn test_build_input_listener() {
        let pki = TestPki::generate();
        let (tx, _rx) = mpsc::channel(1);
        let config = InputConfig::Listener(ListenerConfig {
            tag: "edge".to_string(),
            ..ListenerConfig::new("127.0.0.1:0", pki.server_files(true))
        });
        assert_eq!(config.kind(), "logship_listener");

        let input = build_input(&config, tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(input.tag(), "edge");
    }

    #[tokio::test]
    async fn test_build_input_propagates_errors() {
        let (tx, _rx) = mpsc::channel(1);
        let config = InputConfig::Listener(ListenerConfig::new(
            "127.0.0.1:0",
            TlsFiles::default(),
        ));
        assert!(build_input(&config, tx, CancellationToken::new())
            .await
            .is_err());
    }

    #[test]
    fn test_build_output_forwarder() {
        let config = OutputConfig::Forwarder(ForwarderConfig {
            tag: "central".to_string(),
            ..ForwarderConfig::new(["logs.example.com:24224"])
        });
        assert_eq!(config.kind(), "logship_forwarder");

        let output = build_output(&config, CancellationToken::new()).unwrap();
        assert_eq!(output.tag(), "central");

        let empty: [&str; 0] = [];
        let config = OutputConfig::Forwarder(ForwarderConfig::new(empty));
        assert!(matches!(
            build_output(&config, CancellationToken::new()),
            Err(ConfigError::NoHosts { .. })
        ));
    }
}
