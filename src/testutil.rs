//! Shared fixtures for unit tests

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::certs::{generate_dev_certificates, CertificatePair, CertificatePaths, DevCertificates};
use tempfile::TempDir;

/// Fresh CA/server/client chain valid for localhost and 127.0.0.1
pub fn dev_certs() -> DevCertificates {
    generate_dev_certificates(&["localhost".to_string(), "127.0.0.1".to_string()])
        .expect("Should generate dev certificates")
}

/// Build a validated pair straight from generated PEM
pub fn pair_from(certs: &DevCertificates) -> CertificatePair {
    CertificatePair::from_pem(
        certs.server_cert_pem.clone().into_bytes(),
        certs.server_key_pem.clone().into_bytes(),
        CertificatePaths::new("tls.crt", "tls.key"),
    )
    .expect("Should build certificate pair")
}

/// DER of the first certificate in a PEM string
pub fn der_of(pem_text: &str) -> Vec<u8> {
    pem::parse(pem_text)
        .expect("Should parse PEM")
        .contents()
        .to_vec()
}

/// Certificate and key files in a temporary directory
pub struct CertFiles {
    _dir: TempDir,
    pub paths: CertificatePaths,
}

impl CertFiles {
    pub fn new(certs: &DevCertificates) -> Self {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let paths = CertificatePaths::new(dir.path().join("tls.crt"), dir.path().join("tls.key"));
        let files = Self { _dir: dir, paths };
        files.write(certs);
        files
    }

    pub fn write(&self, certs: &DevCertificates) {
        self.write_raw(
            certs.server_cert_pem.as_bytes(),
            certs.server_key_pem.as_bytes(),
        );
    }

    pub fn write_raw(&self, cert: &[u8], key: &[u8]) {
        std::fs::write(&self.paths.cert, cert).expect("Should write cert");
        std::fs::write(&self.paths.key, key).expect("Should write key");
    }
}
