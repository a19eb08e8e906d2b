// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Destination selection for the forwarder.
//!
//! Endpoints are parsed once. Every selection picks one at random and resolves it again, so
//! DNS-based load distribution keeps working when the records behind a name change.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::OnceLock;

use rand::Rng;
use regex::Regex;

use crate::errors::ConfigError;

fn host_port_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    RE.get_or_init(|| Regex::new(r"^(.+):([0-9]+)$").expect("valid host:port regex"))
}

/// A `host:port` destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidEndpoint(s.to_string());
        let captures = host_port_re().captures(s.trim()).ok_or_else(invalid)?;
        let host = captures[1].trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }
        let port = captures[2].parse::<u16>().map_err(|_| invalid())?;
        Ok(Endpoint {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl Endpoint {
    /// Resolves the host to every address it currently has.
    pub async fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        Ok(tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .collect())
    }
}

/// Non-empty list of destinations.
#[derive(Debug, Clone)]
pub struct EndpointSet {
    endpoints: Vec<Endpoint>,
}

impl EndpointSet {
    pub fn parse<I, S>(hosts: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let endpoints = hosts
            .into_iter()
            .map(|host| host.as_ref().parse())
            .collect::<Result<Vec<Endpoint>, _>>()?;
        if endpoints.is_empty() {
            return Err(ConfigError::NoHosts {
                component: "forwarder",
            });
        }
        Ok(EndpointSet { endpoints })
    }

    /// Picks an endpoint uniformly at random.
    #[must_use]
    pub fn choose(&self) -> &Endpoint {
        let index = rand::thread_rng().gen_range(0..self.endpoints.len());
        &self.endpoints[index]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }
}

/// Picks one of the resolved addresses uniformly at random.
#[must_use]
pub fn pick_address(addrs: &[SocketAddr]) -> Option<SocketAddr> {
    if addrs.is_empty() {
        return None;
    }
    Some(addrs[rand::thread_rng().gen_range(0..addrs.len())])
}
