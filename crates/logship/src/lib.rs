// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # logship
//!
//! Building blocks of a log-shipping agent: a TLS listener that decodes framed records, a
//! forwarder that ships them to one of several downstream endpoints and never gives up on a
//! record, and the dispatcher that connects the two.
//!
//! - [`record`]: the record model and its canonical timestamp format
//! - [`frame`]: the length-prefixed, zlib-compressed MessagePack wire format
//! - [`msgpack`]: MessagePack payloads mapped onto JSON-shaped fields
//! - [`tls`]: rustls configurations built from PEM files
//! - [`listener`] and [`forwarder`]: the two ends of the transport
//! - [`plugin`] and [`dispatcher`]: capability traits and the queue between inputs and outputs
//! - [`config`]: typed configuration, loadable from `LOGSHIP_*` environment variables

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod dispatcher;
pub mod endpoint;
pub mod errors;
pub mod forwarder;
pub mod frame;
pub mod hostname;
pub mod listener;
pub mod msgpack;
pub mod plugin;
pub mod record;
pub mod tls;

#[cfg(test)]
mod test_utils;

pub use config::{
    AgentConfig, ForwarderConfig, InputConfig, ListenerConfig, OutputConfig, WireFormat,
};
pub use dispatcher::Dispatcher;
pub use forwarder::Forwarder;
pub use listener::Listener;
pub use record::{Fields, Record};
