// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Throwaway PKI for TLS tests.

use std::fs;
use std::path::PathBuf;

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use tempfile::TempDir;

use crate::tls::TlsFiles;

/// A CA and a server and a client certificate signed by it.
pub struct TestPki {
    dir: TempDir,
    pub ca: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

impl TestPki {
    pub fn generate() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let (ca_cert, ca_key) = make_ca("logship test ca");

        let write = |name: &str, contents: String| {
            let path = dir.path().join(name);
            fs::write(&path, contents).expect("write pem");
            path
        };

        let ca = write("ca.pem", ca_cert.pem());
        let (cert, key) = make_leaf(&ca_cert, &ca_key);
        let server_cert = write("server.pem", cert);
        let server_key = write("server.key", key);
        let (cert, key) = make_leaf(&ca_cert, &ca_key);
        let client_cert = write("client.pem", cert);
        let client_key = write("client.key", key);

        TestPki {
            dir,
            ca,
            server_cert,
            server_key,
            client_cert,
            client_key,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn server_files(&self, mutual: bool) -> TlsFiles {
        TlsFiles {
            cert: Some(self.server_cert.clone()),
            key: Some(self.server_key.clone()),
            ca: mutual.then(|| self.ca.clone()),
        }
    }

    pub fn client_files(&self) -> TlsFiles {
        TlsFiles {
            cert: Some(self.client_cert.clone()),
            key: Some(self.client_key.clone()),
            ca: Some(self.ca.clone()),
        }
    }
}

fn make_ca(name: &str) -> (Certificate, KeyPair) {
    let mut params = CertificateParams::new(Vec::<String>::new()).expect("ca params");
    params.distinguished_name.push(DnType::CommonName, name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let key = KeyPair::generate().expect("ca key");
    let cert = params.self_signed(&key).expect("self-signed ca");
    (cert, key)
}

fn make_leaf(issuer: &Certificate, issuer_key: &KeyPair) -> (String, String) {
    let mut params =
        CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])
            .expect("leaf params");
    params.distinguished_name.push(DnType::CommonName, "localhost");
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    let key = KeyPair::generate().expect("leaf key");
    let cert = params
        .signed_by(&key, issuer, issuer_key)
        .expect("signed leaf");
    (cert.pem(), key.serialize_pem())
}
