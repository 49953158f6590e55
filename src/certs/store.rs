//! Active certificate/key pair
//!
//! A [`CertificatePair`] is parsed and validated once, when it is built, and
//! never changes afterwards. Rotation builds a new pair and swaps it into the
//! [`CertificateStore`] in one atomic pointer store, so a reader always sees a
//! certificate and key that came from the same rotation.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use rustls_pemfile::{certs, private_key};
use std::fmt;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while loading a certificate/key pair
#[derive(Debug, Error)]
pub enum CertError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid PEM data in {path}: {reason}")]
    InvalidPem { path: PathBuf, reason: String },

    #[error("No certificate found in {0}")]
    NoCertificate(PathBuf),

    #[error("No private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("Unsupported private key in {path}: {source}")]
    UnsupportedKey {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },

    #[error("Private key {key} does not match certificate {cert}")]
    KeyMismatch { cert: PathBuf, key: PathBuf },
}

/// File-system locations of the certificate chain and its private key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl CertificatePaths {
    pub fn new(cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self {
            cert: cert.into(),
            key: key.into(),
        }
    }
}

/// A validated certificate chain and private key
///
/// Holds the raw PEM bytes (for change detection) alongside the parsed
/// rustls `CertifiedKey` handed out during handshakes.
pub struct CertificatePair {
    certificate_pem: Vec<u8>,
    private_key_pem: Vec<u8>,
    paths: CertificatePaths,
    loaded_at: DateTime<Utc>,
    certified_key: Arc<CertifiedKey>,
}

impl CertificatePair {
    /// Parse and validate a PEM certificate chain and private key
    ///
    /// Fails if either side is malformed or if the key does not belong to
    /// the leaf certificate.
    pub fn from_pem(
        certificate_pem: Vec<u8>,
        private_key_pem: Vec<u8>,
        paths: CertificatePaths,
    ) -> Result<Self, CertError> {
        let chain = parse_chain(&certificate_pem, &paths.cert)?;
        let key = parse_key(&private_key_pem, &paths.key)?;

        let signing_key =
            rustls::crypto::ring::sign::any_supported_type(&key).map_err(|source| {
                CertError::UnsupportedKey {
                    path: paths.key.clone(),
                    source,
                }
            })?;

        let certified_key = CertifiedKey::new(chain, signing_key);
        match certified_key.keys_match() {
            // Keys that cannot expose their public half are accepted as-is
            Ok(()) | Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::Unknown)) => {}
            Err(_) => {
                return Err(CertError::KeyMismatch {
                    cert: paths.cert.clone(),
                    key: paths.key.clone(),
                })
            }
        }

        Ok(Self {
            certificate_pem,
            private_key_pem,
            paths,
            loaded_at: Utc::now(),
            certified_key: Arc::new(certified_key),
        })
    }

    pub fn certificate_pem(&self) -> &[u8] {
        &self.certificate_pem
    }

    pub fn private_key_pem(&self) -> &[u8] {
        &self.private_key_pem
    }

    pub fn paths(&self) -> &CertificatePaths {
        &self.paths
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// DER of the leaf certificate
    pub fn leaf_der(&self) -> Option<&CertificateDer<'static>> {
        self.certified_key.cert.first()
    }

    /// Key material presented during a TLS handshake
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        Arc::clone(&self.certified_key)
    }

    /// True when the given file contents are exactly what this pair was built from
    pub fn same_contents(&self, certificate_pem: &[u8], private_key_pem: &[u8]) -> bool {
        self.certificate_pem == certificate_pem && self.private_key_pem == private_key_pem
    }
}

impl fmt::Debug for CertificatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material
        f.debug_struct("CertificatePair")
            .field("paths", &self.paths)
            .field("loaded_at", &self.loaded_at)
            .field("chain_len", &self.certified_key.cert.len())
            .finish_non_exhaustive()
    }
}

fn parse_chain(pem: &[u8], path: &Path) -> Result<Vec<CertificateDer<'static>>, CertError> {
    let chain = certs(&mut BufReader::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CertError::InvalidPem {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if chain.is_empty() {
        return Err(CertError::NoCertificate(path.to_path_buf()));
    }
    Ok(chain)
}

fn parse_key(pem: &[u8], path: &Path) -> Result<PrivateKeyDer<'static>, CertError> {
    private_key(&mut BufReader::new(pem))
        .map_err(|e| CertError::InvalidPem {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
        .ok_or_else(|| CertError::NoPrivateKey(path.to_path_buf()))
}

/// Holder of the current certificate pair
///
/// Many concurrent readers (TLS handshakes), one writer (the watcher).
/// Empty until the first successful load.
pub struct CertificateStore {
    current: ArcSwapOption<CertificatePair>,
}

impl CertificateStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
        }
    }

    /// Install `pair` as the current certificate
    ///
    /// Handshakes that start after this returns present the new pair.
    pub fn set(&self, pair: CertificatePair) {
        self.current.store(Some(Arc::new(pair)));
    }

    /// Snapshot of the current pair, or `None` before the first load
    pub fn get(&self) -> Option<Arc<CertificatePair>> {
        self.current.load_full()
    }

    pub fn is_loaded(&self) -> bool {
        self.current.load().is_some()
    }
}

impl Default for CertificateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CertificateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateStore")
            .field("current", &self.get())
            .finish()
    }
}
