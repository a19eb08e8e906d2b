// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TLS listener that receives framed records and hands them to a sink.
//!
//! Every accepted connection gets its own task. A worker performs the handshake, then reads
//! frames one at a time, each under a fresh deadline, until the peer goes away or sends
//! something it cannot decode. A slow sink blocks only the connection feeding it.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ListenerConfig;
use crate::errors::{FrameError, ListenerError};
use crate::frame::read_frame;
use crate::record::Record;
use crate::tls;

// Pause after a failed accept so a persistent error (e.g. EMFILE) doesn't spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts TLS connections and decodes their frames into [`Record`]s.
pub struct Listener {
    tag: Arc<str>,
    timeout: Duration,
    acceptor: TlsAcceptor,
    tcp: TcpListener,
    sink: mpsc::Sender<Record>,
    cancel_token: CancellationToken,
}

impl Listener {
    /// Validates the config, loads the certificates and binds the socket.
    ///
    /// Every error returned here is a startup error.
    pub async fn bind(
        config: &ListenerConfig,
        sink: mpsc::Sender<Record>,
        cancel_token: CancellationToken,
    ) -> Result<Listener, ListenerError> {
        config.validate()?;
        let timeout = config.timeout()?;
        let server_config = tls::server_config(&config.tag, &config.tls)?;

        let tcp = TcpListener::bind(&config.bind)
            .await
            .map_err(|source| ListenerError::Bind {
                bind: config.bind.clone(),
                source,
            })?;
        match tcp.local_addr() {
            Ok(addr) => info!(tag = %config.tag, bind = %addr, "listening for connections"),
            Err(e) => info!(
                tag = %config.tag,
                bind = %config.bind,
                "listening for connections ({e})"
            ),
        }

        Ok(Listener {
            tag: Arc::from(config.tag.as_str()),
            timeout,
            acceptor: TlsAcceptor::from(server_config),
            tcp,
            sink,
            cancel_token,
        })
    }

    /// The bound address, useful when binding port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Accept loop. Runs until the cancellation token fires; accept errors never end it.
    pub async fn spin(self) {
        loop {
            let accepted = tokio::select! {
                result = self.tcp.accept() => result,
                () = self.cancel_token.cancelled() => break,
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!(tag = %self.tag, %peer, "accepted connection");
                    let worker = Worker {
                        tag: Arc::clone(&self.tag),
                        peer,
                        timeout: self.timeout,
                        sink: self.sink.clone(),
                        cancel_token: self.cancel_token.clone(),
                    };
                    tokio::spawn(worker.serve(self.acceptor.clone(), stream));
                }
                Err(e) => {
                    warn!(tag = %self.tag, error = %e, "failed to accept connection");
                    tokio::select! {
                        () = sleep(ACCEPT_BACKOFF) => {}
                        () = self.cancel_token.cancelled() => break,
                    }
                }
            }
        }
        info!(tag = %self.tag, "listener stopped");
    }

    /// Spawns [`Listener::spin`] onto the runtime.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.spin())
    }
}

/// Owns one accepted connection end to end.
struct Worker {
    tag: Arc<str>,
    peer: SocketAddr,
    timeout: Duration,
    sink: mpsc::Sender<Record>,
    cancel_token: CancellationToken,
}

impl Worker {
    async fn serve(self, acceptor: TlsAcceptor, stream: TcpStream) {
        let handshake = tokio::select! {
            result = timeout(self.timeout, acceptor.accept(stream)) => result,
            () = self.cancel_token.cancelled() => return,
        };
        let mut stream = match handshake {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(tag = %self.tag, peer = %self.peer, error = %e, "tls handshake failed");
                return;
            }
            Err(_) => {
                warn!(
                    tag = %self.tag,
                    peer = %self.peer,
                    "tls handshake timed out after {}s",
                    self.timeout.as_secs()
                );
                return;
            }
        };

        let mut frames: u64 = 0;
        loop {
            let read = tokio::select! {
                result = timeout(self.timeout, read_frame(&mut stream)) => result,
                () = self.cancel_token.cancelled() => break,
            };
            let fields = match read {
                Ok(Ok(fields)) => fields,
                Ok(Err(FrameError::Closed)) => {
                    debug!(tag = %self.tag, peer = %self.peer, frames, "connection closed by peer");
                    break;
                }
                Ok(Err(e)) => {
                    warn!(tag = %self.tag, peer = %self.peer, error = %e, "closing connection");
                    break;
                }
                Err(_) => {
                    warn!(
                        tag = %self.tag,
                        peer = %self.peer,
                        "read timed out after {}s, closing connection",
                        self.timeout.as_secs()
                    );
                    break;
                }
            };

            let mut record = Record::new(fields);
            if record.ensure_timestamp() {
                trace!(tag = %self.tag, peer = %self.peer, "added missing @timestamp");
            }
            frames += 1;

            // Waits for room in the queue; this is the backpressure on the peer.
            let delivered = tokio::select! {
                result = self.sink.send(record) => result.is_ok(),
                () = self.cancel_token.cancelled() => break,
            };
            if !delivered {
                debug!(tag = %self.tag, peer = %self.peer, "sink closed, dropping connection");
                break;
            }
        }
    }
}
