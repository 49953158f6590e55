//! Server certificate handling
//!
//! - [`CertificateStore`]: the active certificate/key pair, swapped atomically
//! - [`CertificateWatcher`]: polls the files on disk and rotates the pair
//! - [`generate_dev_certificates`]: self-signed chain for local runs and tests

mod generate;
mod store;
mod watcher;

pub use generate::{
    generate_dev_certificates, generate_dev_certificates_with_ou, DevCertificates, GenerateError,
    DEFAULT_CLIENT_OU,
};
pub use store::{CertError, CertificatePair, CertificatePaths, CertificateStore};
pub use watcher::{
    CertificateWatcher, ErrorCallback, PollResult, WatcherHandle, DEFAULT_POLL_INTERVAL,
};

#[cfg(test)]
#[path = "store_test.rs"]
mod store_tests;

#[cfg(test)]
#[path = "watcher_test.rs"]
mod watcher_tests;

#[cfg(test)]
#[path = "generate_test.rs"]
mod generate_tests;
