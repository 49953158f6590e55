//! Tests for certificate rotation polling

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::server::metrics::create_metrics;
use crate::testutil::{dev_certs, CertFiles};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn watcher_for(files: &CertFiles) -> (CertificateWatcher, Arc<CertificateStore>) {
    let store = Arc::new(CertificateStore::new());
    let watcher = CertificateWatcher::new(files.paths.clone(), Arc::clone(&store));
    (watcher, store)
}

/// Test: initial load installs the pair
#[tokio::test]
async fn test_initial_load_populates_store() {
    let certs = dev_certs();
    let files = CertFiles::new(&certs);
    let (watcher, store) = watcher_for(&files);

    watcher.load_initial().await.expect("Initial load should succeed");

    let current = store.get().expect("Store should be populated");
    assert_eq!(current.certificate_pem(), certs.server_cert_pem.as_bytes());
    assert_eq!(current.paths(), &files.paths);
}

/// Test: missing files make start fail and leave the store empty
#[tokio::test]
async fn test_start_fails_without_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CertificateStore::new());
    let paths = CertificatePaths::new(dir.path().join("missing.crt"), dir.path().join("missing.key"));

    let result = CertificateWatcher::new(paths, Arc::clone(&store)).start().await;

    assert!(matches!(result, Err(CertError::Read { .. })));
    assert!(!store.is_loaded());
}

/// Test: mismatched pair on disk is fatal at startup
#[tokio::test]
async fn test_start_fails_on_mismatched_pair() {
    let a = dev_certs();
    let b = dev_certs();
    let files = CertFiles::new(&a);
    files.write_raw(a.server_cert_pem.as_bytes(), b.server_key_pem.as_bytes());
    let (watcher, store) = watcher_for(&files);

    let result = watcher.start().await;

    assert!(matches!(result, Err(CertError::KeyMismatch { .. })));
    assert!(!store.is_loaded());
}

/// Test: unchanged files do not trigger a rotation
#[tokio::test]
async fn test_poll_unchanged() {
    let certs = dev_certs();
    let files = CertFiles::new(&certs);
    let (watcher, store) = watcher_for(&files);
    watcher.load_initial().await.unwrap();
    let loaded_at = store.get().unwrap().loaded_at();

    let result = watcher.poll_once().await.unwrap();

    assert_eq!(result, PollResult::Unchanged);
    assert_eq!(store.get().unwrap().loaded_at(), loaded_at);
}

/// Test: new files on disk are picked up by the next poll
#[tokio::test]
async fn test_poll_rotates_on_change() {
    let old = dev_certs();
    let new = dev_certs();
    let files = CertFiles::new(&old);
    let (watcher, store) = watcher_for(&files);
    watcher.load_initial().await.unwrap();

    files.write(&new);
    let result = watcher.poll_once().await.unwrap();

    assert_eq!(result, PollResult::Rotated);
    let current = store.get().unwrap();
    assert_eq!(current.certificate_pem(), new.server_cert_pem.as_bytes());
    assert_eq!(current.private_key_pem(), new.server_key_pem.as_bytes());
}

/// Test: corrupt files never replace a valid pair, and the callback fires
#[tokio::test]
async fn test_corrupt_rotation_keeps_stale_pair() {
    let certs = dev_certs();
    let files = CertFiles::new(&certs);
    let failures = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&failures);
    let store = Arc::new(CertificateStore::new());
    let watcher = CertificateWatcher::new(files.paths.clone(), Arc::clone(&store)).on_error(
        move |_err| {
            seen.fetch_add(1, Ordering::SeqCst);
        },
    );
    watcher.load_initial().await.unwrap();

    files.write_raw(b"garbage", b"garbage");
    let result = watcher.poll_once().await;

    assert!(result.is_err());
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    let current = store.get().unwrap();
    assert_eq!(current.certificate_pem(), certs.server_cert_pem.as_bytes());
}

/// Test: a key from another chain never replaces a valid pair
#[tokio::test]
async fn test_mismatched_rotation_keeps_stale_pair() {
    let certs = dev_certs();
    let other = dev_certs();
    let files = CertFiles::new(&certs);
    let (watcher, store) = watcher_for(&files);
    watcher.load_initial().await.unwrap();

    files.write_raw(other.server_cert_pem.as_bytes(), certs.server_key_pem.as_bytes());
    let result = watcher.poll_once().await;

    assert!(matches!(result, Err(CertError::KeyMismatch { .. })));
    assert_eq!(
        store.get().unwrap().certificate_pem(),
        certs.server_cert_pem.as_bytes()
    );
}

/// Test: deleted files are a transient failure, then recovery works
#[tokio::test]
async fn test_missing_file_then_recovery() {
    let certs = dev_certs();
    let next = dev_certs();
    let files = CertFiles::new(&certs);
    let (watcher, store) = watcher_for(&files);
    watcher.load_initial().await.unwrap();

    std::fs::remove_file(&files.paths.key).unwrap();
    assert!(matches!(
        watcher.poll_once().await,
        Err(CertError::Read { .. })
    ));
    assert_eq!(
        store.get().unwrap().certificate_pem(),
        certs.server_cert_pem.as_bytes()
    );

    files.write(&next);
    assert_eq!(watcher.poll_once().await.unwrap(), PollResult::Rotated);
    assert_eq!(
        store.get().unwrap().certificate_pem(),
        next.server_cert_pem.as_bytes()
    );
}

/// Test: reload outcomes are counted in metrics
#[tokio::test]
async fn test_reload_metrics_recorded() {
    let certs = dev_certs();
    let files = CertFiles::new(&certs);
    let metrics = create_metrics().unwrap();
    let store = Arc::new(CertificateStore::new());
    let watcher = CertificateWatcher::new(files.paths.clone(), store)
        .with_metrics(Arc::clone(&metrics));

    watcher.load_initial().await.unwrap();
    files.write_raw(b"garbage", b"garbage");
    let _ = watcher.poll_once().await;

    let text = metrics.encode().unwrap();
    assert!(text.contains(r#"demo_service_cert_reloads_total{result="success"} 1"#));
    assert!(text.contains(r#"demo_service_cert_reloads_total{result="failure"} 1"#));
}

/// Test: the background task rotates on its own and stops on close
#[tokio::test]
async fn test_background_polling_and_close() {
    let old = dev_certs();
    let new = dev_certs();
    let files = CertFiles::new(&old);
    let store = Arc::new(CertificateStore::new());
    let mut handle = CertificateWatcher::new(files.paths.clone(), Arc::clone(&store))
        .with_interval(Duration::from_millis(20))
        .start()
        .await
        .unwrap();

    files.write(&new);

    let rotated = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if store.get().unwrap().certificate_pem() == new.server_cert_pem.as_bytes() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(rotated.is_ok(), "Watcher should pick up the new pair");

    handle.close().await;
    assert!(handle.is_closed());

    // Further changes are ignored once closed
    files.write(&old);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        store.get().unwrap().certificate_pem(),
        new.server_cert_pem.as_bytes()
    );

    // Closing twice is harmless
    handle.close().await;
}
