// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! rustls configuration built from PEM files, shared by the listener and the forwarder.
//!
//! The listener always needs an identity; a CA bundle turns on mutual authentication. The
//! forwarder runs in plaintext unless it has an identity or a CA, and a CA replaces the
//! platform trust store.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig, SupportedProtocolVersion};
use rustls_pemfile::Item;
use tracing::{debug, info, warn};

use crate::errors::TlsError;

/// Protocol versions accepted by the listener (TLS 1.2 minimum).
static SERVER_VERSIONS: &[&SupportedProtocolVersion] =
    &[&rustls::version::TLS13, &rustls::version::TLS12];

/// Protocol versions offered by the forwarder. TLS 1.2 is the oldest rustls speaks.
static CLIENT_VERSIONS: &[&SupportedProtocolVersion] =
    &[&rustls::version::TLS13, &rustls::version::TLS12];

/// Paths to the certificate material of one component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub ca: Option<PathBuf>,
}

impl TlsFiles {
    /// The certificate/key pair, when both are set.
    #[must_use]
    pub fn identity(&self) -> Option<(&Path, &Path)> {
        match (non_empty(self.cert.as_deref()), non_empty(self.key.as_deref())) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        }
    }

    #[must_use]
    pub fn ca(&self) -> Option<&Path> {
        non_empty(self.ca.as_deref())
    }

    /// Whether a forwarder with these files talks TLS at all.
    #[must_use]
    pub fn client_enabled(&self) -> bool {
        self.identity().is_some() || self.ca().is_some()
    }
}

fn non_empty(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Builds the listener's config. A CA makes client certificates mandatory.
pub fn server_config(tag: &str, files: &TlsFiles) -> Result<Arc<ServerConfig>, TlsError> {
    let Some((cert_path, key_path)) = files.identity() else {
        return Err(TlsError::NoCertificates {
            path: files.cert.clone().unwrap_or_default(),
        });
    };
    info!(
        tag,
        cert = %cert_path.display(),
        key = %key_path.display(),
        "loading server ssl certificate and key"
    );
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let provider = provider();
    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(SERVER_VERSIONS)?;

    let builder = match files.ca() {
        Some(ca_path) => {
            info!(
                tag,
                ca = %ca_path.display(),
                "loading CA certificate, client certificates required"
            );
            let roots = load_ca(ca_path)?;
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    Ok(Arc::new(builder.with_single_cert(certs, key)?))
}

/// Builds the forwarder's config, or `None` when TLS is disabled for it.
pub fn client_config(tag: &str, files: &TlsFiles) -> Result<Option<Arc<ClientConfig>>, TlsError> {
    if !files.client_enabled() {
        debug!(tag, "no ssl material configured, forwarding in plaintext");
        return Ok(None);
    }

    let roots = match files.ca() {
        Some(ca_path) => {
            info!(tag, ca = %ca_path.display(), "loading CA certificate");
            load_ca(ca_path)?
        }
        None => native_roots(tag),
    };

    let builder = ClientConfig::builder_with_provider(provider())
        .with_protocol_versions(CLIENT_VERSIONS)?
        .with_root_certificates(roots);

    let config = match files.identity() {
        Some((cert_path, key_path)) => {
            info!(
                tag,
                cert = %cert_path.display(),
                key = %key_path.display(),
                "loading client ssl certificate and key"
            );
            builder.with_client_auth_cert(load_certs(cert_path)?, load_private_key(key_path)?)?
        }
        None => builder.with_no_client_auth(),
    };
    Ok(Some(Arc::new(config)))
}

fn native_roots(tag: &str) -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        warn!(tag, error = %error, "failed to load a platform root certificate");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!(tag, added, ignored, "loaded platform root certificates");
    roots
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Loads every certificate of a PEM chain.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates {
            path: path.to_path_buf(),
        });
    }
    Ok(certs)
}

/// Loads the first private key (PKCS#1, PKCS#8 or SEC1) of a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey {
            path: path.to_path_buf(),
        })
}

/// Loads a trust anchor from the first PEM block of `path`, which must be a certificate.
pub fn load_ca(path: &Path) -> Result<RootCertStore, TlsError> {
    let mut reader = open(path)?;
    let item = rustls_pemfile::read_one(&mut reader).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let cert = match item {
        None => {
            return Err(TlsError::NotPem {
                path: path.to_path_buf(),
            })
        }
        Some(Item::X509Certificate(cert)) => cert,
        Some(_) => {
            return Err(TlsError::NotCertificate {
                path: path.to_path_buf(),
            })
        }
    };

    let mut roots = RootCertStore::empty();
    roots.add(cert).map_err(|source| TlsError::InvalidCa {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(roots)
}
