// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Typed configuration for the agent and each of its components.
//!
//! Every struct can be built in code; [`AgentConfig::from_env`] assembles the whole thing from
//! `LOGSHIP_*` environment variables. Nothing here touches the network or the filesystem;
//! certificate files are only opened when a component is constructed.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::endpoint::{Endpoint, EndpointSet};
use crate::errors::ConfigError;
use crate::tls::TlsFiles;

pub const DEFAULT_TAG: &str = "logship";
pub const DEFAULT_TIMEOUT_SECS: i64 = 30;
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_QUEUE_SIZE: usize = 1024;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// How the forwarder serializes records on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WireFormat {
    /// `[tag, time, fields]` MessagePack array, fluentd forward style.
    #[default]
    Forward,
    /// Compressed length-prefixed frame, as read by the listener.
    Framed,
}

impl FromStr for WireFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "forward" => Ok(WireFormat::Forward),
            "framed" => Ok(WireFormat::Framed),
            _ => Err(ConfigError::InvalidValue {
                key: "wire_format",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Forward => f.write_str("forward"),
            WireFormat::Framed => f.write_str("framed"),
        }
    }
}

/// Configuration of the TLS listener input.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerConfig {
    pub tag: String,
    pub bind: String,
    /// Handshake and per-frame read deadline, in seconds.
    pub timeout_secs: i64,
    pub tls: TlsFiles,
}

impl ListenerConfig {
    pub const COMPONENT: &'static str = "listener";

    #[must_use]
    pub fn new(bind: impl Into<String>, tls: TlsFiles) -> Self {
        Self {
            tag: DEFAULT_TAG.to_string(),
            bind: bind.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            tls,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_timeout(Self::COMPONENT, self.timeout_secs)?;
        if self.bind.trim().is_empty() {
            return Err(ConfigError::EmptyBind {
                component: Self::COMPONENT,
            });
        }
        if self.tls.identity().is_none() {
            return Err(ConfigError::MissingIdentity {
                component: Self::COMPONENT,
            });
        }
        Ok(())
    }

    /// The validated timeout.
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        validate_timeout(Self::COMPONENT, self.timeout_secs)
    }
}

/// Configuration of the forwarder output.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwarderConfig {
    pub tag: String,
    /// `host:port` destinations, one picked at random per connection.
    pub hosts: Vec<String>,
    /// Connect, handshake, DNS and write deadline, in seconds.
    pub timeout_secs: i64,
    pub tls: TlsFiles,
    pub retry_interval: Duration,
    pub wire_format: WireFormat,
    /// Value for records without a `host` field; detected when unset.
    pub hostname: Option<String>,
}

impl ForwarderConfig {
    pub const COMPONENT: &'static str = "forwarder";

    #[must_use]
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tag: DEFAULT_TAG.to_string(),
            hosts: hosts.into_iter().map(Into::into).collect(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            tls: TlsFiles::default(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            wire_format: WireFormat::default(),
            hostname: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hosts.is_empty() {
            return Err(ConfigError::NoHosts {
                component: Self::COMPONENT,
            });
        }
        for host in &self.hosts {
            host.parse::<Endpoint>()?;
        }
        validate_timeout(Self::COMPONENT, self.timeout_secs)?;
        if self.retry_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "retry_interval",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn endpoints(&self) -> Result<EndpointSet, ConfigError> {
        EndpointSet::parse(&self.hosts)
    }

    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        validate_timeout(Self::COMPONENT, self.timeout_secs)
    }
}

fn validate_timeout(component: &'static str, timeout: i64) -> Result<Duration, ConfigError> {
    u64::try_from(timeout)
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .ok_or(ConfigError::InvalidTimeout { component, timeout })
}

/// An input plugin and its settings.
#[derive(Debug, Clone, PartialEq)]
pub enum InputConfig {
    Listener(ListenerConfig),
}

impl InputConfig {
    /// Name of the plugin kind in configuration.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            InputConfig::Listener(_) => "logship_listener",
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            InputConfig::Listener(config) => config.validate(),
        }
    }
}

/// An output plugin and its settings.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputConfig {
    Forwarder(ForwarderConfig),
}

impl OutputConfig {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            OutputConfig::Forwarder(_) => "logship_forwarder",
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            OutputConfig::Forwarder(config) => config.validate(),
        }
    }
}

/// Process-wide configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Hostname override applied to forwarders that have none
    pub hostname: Option<String>,
    /// Capacity of the queue between inputs and outputs
    pub queue_size: usize,
    pub inputs: Vec<InputConfig>,
    pub outputs: Vec<OutputConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            hostname: None,
            queue_size: DEFAULT_QUEUE_SIZE,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Create configuration from `LOGSHIP_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from any key lookup, e.g. a map in tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let log_level = get("LOGSHIP_LOG_LEVEL")
            .map(|level| level.trim().to_lowercase())
            .unwrap_or_else(|| "info".to_string());
        let hostname = get("LOGSHIP_HOSTNAME");
        let queue_size = match get("LOGSHIP_QUEUE_SIZE") {
            Some(value) => parse_number("LOGSHIP_QUEUE_SIZE", &value)?,
            None => DEFAULT_QUEUE_SIZE,
        };

        let mut inputs = Vec::new();
        if let Some(bind) = get("LOGSHIP_LISTEN_BIND") {
            let tls = tls_files(
                &get,
                "LOGSHIP_LISTEN_SSL_CERT",
                "LOGSHIP_LISTEN_SSL_KEY",
                "LOGSHIP_LISTEN_SSL_CA",
            );
            let mut listener = ListenerConfig::new(bind, tls);
            if let Some(tag) = get("LOGSHIP_LISTEN_TAG") {
                listener.tag = tag;
            }
            if let Some(timeout) = get("LOGSHIP_LISTEN_TIMEOUT") {
                listener.timeout_secs = parse_number("LOGSHIP_LISTEN_TIMEOUT", &timeout)?;
            }
            inputs.push(InputConfig::Listener(listener));
        }

        let mut outputs = Vec::new();
        if let Some(hosts) = get("LOGSHIP_FORWARD_HOSTS") {
            let mut forwarder = ForwarderConfig::new(
                hosts
                    .split(',')
                    .map(str::trim)
                    .filter(|host| !host.is_empty()),
            );
            forwarder.tls = tls_files(
                &get,
                "LOGSHIP_FORWARD_SSL_CERT",
                "LOGSHIP_FORWARD_SSL_KEY",
                "LOGSHIP_FORWARD_SSL_CA",
            );
            if let Some(tag) = get("LOGSHIP_FORWARD_TAG") {
                forwarder.tag = tag;
            }
            if let Some(timeout) = get("LOGSHIP_FORWARD_TIMEOUT") {
                forwarder.timeout_secs = parse_number("LOGSHIP_FORWARD_TIMEOUT", &timeout)?;
            }
            if let Some(millis) = get("LOGSHIP_FORWARD_RETRY_INTERVAL_MS") {
                forwarder.retry_interval = Duration::from_millis(parse_number(
                    "LOGSHIP_FORWARD_RETRY_INTERVAL_MS",
                    &millis,
                )?);
            }
            if let Some(format) = get("LOGSHIP_FORWARD_WIRE_FORMAT") {
                forwarder.wire_format = format.parse()?;
            }
            forwarder.hostname.clone_from(&hostname);
            outputs.push(OutputConfig::Forwarder(forwarder));
        }

        let config = Self {
            log_level,
            hostname,
            queue_size,
            inputs,
            outputs,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration and every component in it
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "LOGSHIP_LOG_LEVEL",
                value: self.log_level.clone(),
            });
        }
        if self.queue_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "LOGSHIP_QUEUE_SIZE",
                value: "0".to_string(),
            });
        }
        if self.inputs.is_empty() {
            return Err(ConfigError::NoInputs);
        }
        if self.outputs.is_empty() {
            return Err(ConfigError::NoOutputs);
        }
        for input in &self.inputs {
            input.validate()?;
        }
        for output in &self.outputs {
            output.validate()?;
        }
        Ok(())
    }
}

fn tls_files<F>(get: &F, cert: &str, key: &str, ca: &str) -> TlsFiles
where
    F: Fn(&str) -> Option<String>,
{
    TlsFiles {
        cert: get(cert).map(PathBuf::from),
        key: get(key).map(PathBuf::from),
        ca: get(ca).map(PathBuf::from),
    }
}

fn parse_number<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })
}
