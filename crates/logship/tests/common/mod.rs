// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared helpers for integration tests: a throwaway PKI and TLS plumbing

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use logship::config::ListenerConfig;
use logship::tls::{client_config, TlsFiles};
use logship::{Fields, Listener, Record};
use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair};
use rustls::pki_types::ServerName;
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected an object"),
    }
}

/// Certificates written to a temporary directory.
pub struct Pki {
    _dir: TempDir,
    pub ca: PathBuf,
    pub server: (PathBuf, PathBuf),
    pub client: (PathBuf, PathBuf),
    /// Signed by a CA nobody trusts.
    pub rogue: (PathBuf, PathBuf),
    /// The untrusted CA itself.
    pub rogue_ca: PathBuf,
}

impl Pki {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let (ca_cert, ca_key) = ca("integration ca");
        let (other_cert, other_key) = ca("untrusted ca");

        let write_pair = |name: &str, (cert, key): (String, String)| {
            let cert_path = dir.path().join(format!("{name}.pem"));
            let key_path = dir.path().join(format!("{name}.key"));
            std::fs::write(&cert_path, cert).expect("write cert");
            std::fs::write(&key_path, key).expect("write key");
            (cert_path, key_path)
        };

        let server = write_pair("server", leaf(&ca_cert, &ca_key));
        let client = write_pair("client", leaf(&ca_cert, &ca_key));
        let rogue = write_pair("rogue", leaf(&other_cert, &other_key));
        let ca_path = dir.path().join("ca.pem");
        std::fs::write(&ca_path, ca_cert.pem()).expect("write ca");
        let rogue_ca = dir.path().join("rogue-ca.pem");
        std::fs::write(&rogue_ca, other_cert.pem()).expect("write rogue ca");

        Pki {
            _dir: dir,
            ca: ca_path,
            server,
            client,
            rogue,
            rogue_ca,
        }
    }

    pub fn server_files(&self, mutual: bool) -> TlsFiles {
        TlsFiles {
            cert: Some(self.server.0.clone()),
            key: Some(self.server.1.clone()),
            ca: mutual.then(|| self.ca.clone()),
        }
    }

    /// Client material: the given identity, if any, plus the trusted CA.
    pub fn client_files(&self, identity: Option<&(PathBuf, PathBuf)>) -> TlsFiles {
        TlsFiles {
            cert: identity.map(|(cert, _)| cert.clone()),
            key: identity.map(|(_, key)| key.clone()),
            ca: Some(self.ca.clone()),
        }
    }
}

fn ca(name: &str) -> (Certificate, KeyPair) {
    let mut params = CertificateParams::new(Vec::<String>::new()).expect("ca params");
    params.distinguished_name.push(DnType::CommonName, name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let key = KeyPair::generate().expect("ca key");
    let cert = params.self_signed(&key).expect("ca cert");
    (cert, key)
}

fn leaf(issuer: &Certificate, issuer_key: &KeyPair) -> (String, String) {
    let params = CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])
        .expect("leaf params");
    let key = KeyPair::generate().expect("leaf key");
    let cert = params
        .signed_by(&key, issuer, issuer_key)
        .expect("leaf cert");
    (cert.pem(), key.serialize_pem())
}

pub struct RunningListener {
    pub addr: SocketAddr,
    pub records: mpsc::Receiver<Record>,
    pub cancel: CancellationToken,
}

pub async fn start_listener(pki: &Pki, mutual: bool) -> RunningListener {
    let (tx, records) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let config = ListenerConfig {
        tag: "integration".to_string(),
        timeout_secs: 5,
        ..ListenerConfig::new("127.0.0.1:0", pki.server_files(mutual))
    };
    let listener = Listener::bind(&config, tx, cancel.clone())
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    listener.start();
    RunningListener {
        addr,
        records,
        cancel,
    }
}

pub async fn tls_connect(files: &TlsFiles, addr: SocketAddr) -> io::Result<TlsStream<TcpStream>> {
    let config = client_config("integration", files)
        .expect("client config")
        .expect("tls enabled");
    let tcp = TcpStream::connect(addr).await?;
    let server_name = ServerName::try_from("localhost").expect("server name");
    TlsConnector::from(config).connect(server_name, tcp).await
}
