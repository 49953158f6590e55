//! TLS server lifecycle
//!
//! The listener never holds a certificate of its own. Every handshake asks
//! the [`CertificateStore`] for the current pair, so a rotation performed by
//! the watcher is visible to the next connection without a restart.
//!
//! Lifecycle:
//! ```text
//! TlsServer --bind()--> BoundServer --start()--> RunningServer --stop()--> done
//! ```
//! `bind` is where configuration errors surface (missing health handler,
//! no certificate loaded, port in use). `stop` drains in-flight requests for
//! up to the grace period, then force-closes whatever is left.

use crate::certs::{CertificateStore, WatcherHandle};
use crate::server::auth::ClientIdentity;
use crate::server::health::HealthAggregator;
use crate::server::routes::app_router;
use crate::server::shutdown::ShutdownSignal;
use axum::middleware::AddExtension;
use axum::{Extension, Router};
use axum_server::accept::Accept;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use axum_server::Handle;
use futures::future::BoxFuture;
use rustls::server::{ClientHello, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use rustls::{RootCertStore, ServerConfig};
use rustls_pemfile::certs;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_rustls::server::TlsStream;
use tower::Layer;
use tracing::{error, info, warn};

/// Default bound on draining in-flight requests
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(15);

/// Extra time allowed for the forced close after the grace period
pub const FORCE_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on [`RunningServer::stop`] for a given grace period
pub fn stop_deadline(grace_period: Duration) -> Duration {
    grace_period + FORCE_CLOSE_TIMEOUT
}

/// Slack for releasing the watcher once [`RunningServer::stop`] hits its deadline
pub const WATCHER_RELEASE_MARGIN: Duration = Duration::from_secs(1);

/// How long a caller should wait on a stopping server before giving up
///
/// Longer than [`stop_deadline`] so an overrunning stop still reports its
/// own error instead of being cut off.
pub fn shutdown_deadline(grace_period: Duration) -> Duration {
    stop_deadline(grace_period) + WATCHER_RELEASE_MARGIN
}

/// Errors from the TLS server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("health handler is not wired in, please add one")]
    MissingHealthHandler,

    #[error("no certificate loaded; the watcher must load one before bind")]
    NoCertificate,

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load client CA bundle {path}: {reason}")]
    ClientCa { path: PathBuf, reason: String },

    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("TLS server failed: {0}")]
    Serve(#[source] std::io::Error),

    #[error("forced close did not finish within {0:?}")]
    ForceCloseTimedOut(Duration),

    #[error("server task panicked: {0}")]
    Panicked(String),
}

/// Resolves the server certificate at handshake time from the store
#[derive(Debug)]
pub struct StoreResolver {
    store: Arc<CertificateStore>,
}

impl StoreResolver {
    pub fn new(store: Arc<CertificateStore>) -> Self {
        Self { store }
    }
}

impl ResolvesServerCert for StoreResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        match self.store.get() {
            Some(pair) => Some(pair.certified_key()),
            None => {
                // bind() refuses to run without a pair, so this is an ordering bug
                error!("TLS handshake before any certificate was loaded");
                None
            }
        }
    }
}

/// TLS acceptor that hands the client's identity to the router
///
/// After the handshake, the verified client certificate (if any) is turned
/// into a [`ClientIdentity`] extension on every request of the connection.
#[derive(Debug, Clone)]
struct ClientIdentityAcceptor {
    inner: RustlsAcceptor,
}

impl ClientIdentityAcceptor {
    fn new(config: RustlsConfig) -> Self {
        Self {
            inner: RustlsAcceptor::new(config),
        }
    }
}

impl<I, S> Accept<I, S> for ClientIdentityAcceptor
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: Send + 'static,
{
    type Stream = TlsStream<I>;
    type Service = AddExtension<S, ClientIdentity>;
    type Future = BoxFuture<'static, std::io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        let acceptor = self.inner.clone();

        Box::pin(async move {
            let (stream, service) = acceptor.accept(stream, service).await?;
            let identity =
                ClientIdentity::from_peer_certificates(stream.get_ref().1.peer_certificates());
            Ok((stream, Extension(identity).layer(service)))
        })
    }
}

fn load_client_ca(path: &Path) -> Result<RootCertStore, ServerError> {
    let ca_error = |reason: String| ServerError::ClientCa {
        path: path.to_path_buf(),
        reason,
    };

    let pem = std::fs::read(path).map_err(|e| ca_error(e.to_string()))?;
    let ca_certs = certs(&mut BufReader::new(pem.as_slice()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ca_error(e.to_string()))?;
    if ca_certs.is_empty() {
        return Err(ca_error("no certificates found".to_string()));
    }

    let mut roots = RootCertStore::empty();
    for cert in ca_certs {
        roots.add(cert).map_err(|e| ca_error(e.to_string()))?;
    }
    Ok(roots)
}

/// Build a rustls ServerConfig that resolves certificates from the store
///
/// With `client_ca`, clients must present a certificate signed by one of
/// the CAs in that bundle.
pub fn build_rustls_config(
    store: Arc<CertificateStore>,
    client_ca: Option<&Path>,
) -> Result<Arc<ServerConfig>, ServerError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;

    let builder = match client_ca {
        Some(path) => {
            let roots = load_client_ca(path)?;
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .map_err(|e| ServerError::ClientCa {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let mut config = builder.with_cert_resolver(Arc::new(StoreResolver::new(store)));
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Settings for the TLS listener
#[derive(Debug, Clone)]
pub struct TlsServerConfig {
    pub bind_addr: SocketAddr,
    /// PEM bundle of CAs trusted for client certificates (mutual TLS)
    pub client_ca: Option<PathBuf>,
    pub grace_period: Duration,
}

impl TlsServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            client_ca: None,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// TLS server before binding
pub struct TlsServer {
    config: TlsServerConfig,
    store: Arc<CertificateStore>,
    watcher: Option<WatcherHandle>,
    health: Option<HealthAggregator>,
}

impl TlsServer {
    pub fn new(config: TlsServerConfig, store: Arc<CertificateStore>) -> Self {
        Self {
            config,
            store,
            watcher: None,
            health: None,
        }
    }

    /// Hand over the watcher so stopping the server also stops polling
    pub fn with_watcher(mut self, watcher: WatcherHandle) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// Health handler served at `/v1/healthz`; required
    pub fn with_health(mut self, health: HealthAggregator) -> Self {
        self.health = Some(health);
        self
    }

    /// Validate the wiring and bind the listener
    pub fn bind(self) -> Result<BoundServer, ServerError> {
        let health = self.health.ok_or(ServerError::MissingHealthHandler)?;
        if !self.store.is_loaded() {
            return Err(ServerError::NoCertificate);
        }

        let tls = build_rustls_config(Arc::clone(&self.store), self.config.client_ca.as_deref())?;

        let addr = self.config.bind_addr;
        let bind_error = |source| ServerError::Bind { addr, source };
        let listener = std::net::TcpListener::bind(addr).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let client_auth = self.config.client_ca.is_some();
        Ok(BoundServer {
            listener,
            local_addr,
            tls,
            router: app_router(health, client_auth),
            watcher: self.watcher,
            grace_period: self.config.grace_period,
            client_auth,
        })
    }
}

/// TLS server with its listener bound, not yet accepting
pub struct BoundServer {
    listener: std::net::TcpListener,
    local_addr: SocketAddr,
    tls: Arc<ServerConfig>,
    router: Router,
    watcher: Option<WatcherHandle>,
    grace_period: Duration,
    client_auth: bool,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start accepting connections on a background task
    pub fn start(self) -> RunningServer {
        let handle = Handle::new();
        let acceptor = ClientIdentityAcceptor::new(RustlsConfig::from_config(self.tls));
        let server = axum_server::from_tcp(self.listener)
            .acceptor(acceptor)
            .handle(handle.clone())
            .serve(self.router.into_make_service());
        let task = tokio::spawn(server);

        info!(
            addr = %self.local_addr,
            client_auth = self.client_auth,
            "TLS server listening (HTTPS)"
        );

        RunningServer {
            handle,
            task,
            watcher: self.watcher,
            local_addr: self.local_addr,
            grace_period: self.grace_period,
        }
    }
}

/// TLS server accepting connections
pub struct RunningServer {
    handle: Handle,
    task: JoinHandle<std::io::Result<()>>,
    watcher: Option<WatcherHandle>,
    local_addr: SocketAddr,
    grace_period: Duration,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.handle.connection_count()
    }

    /// Serve until `shutdown` fires, then [`stop`](Self::stop)
    ///
    /// If the accept loop dies first, the error is logged and returned
    /// without retrying.
    pub async fn run_until(mut self, mut shutdown: ShutdownSignal) -> Result<(), ServerError> {
        tokio::select! {
            _ = shutdown.wait() => self.stop().await,
            joined = &mut self.task => {
                let err = match joined {
                    Ok(Ok(())) => ServerError::Serve(std::io::Error::other("accept loop exited")),
                    Ok(Err(e)) => ServerError::Serve(e),
                    Err(e) => ServerError::Panicked(e.to_string()),
                };
                error!(error = %err, "Error from TLS server");
                self.release_watcher().await;
                Err(err)
            }
        }
    }

    /// Stop accepting, drain for up to the grace period, force-close the rest
    ///
    /// Also stops the certificate watcher. Only a forced close that fails or
    /// overruns is reported as an error.
    pub async fn stop(mut self) -> Result<(), ServerError> {
        info!(
            grace_period = ?self.grace_period,
            connections = self.handle.connection_count(),
            "Shutting down server"
        );
        self.handle.graceful_shutdown(Some(self.grace_period));

        let deadline = stop_deadline(self.grace_period);
        let result = match tokio::time::timeout(deadline, &mut self.task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(ServerError::Serve(e)),
            Ok(Err(e)) => Err(ServerError::Panicked(e.to_string())),
            Err(_) => {
                self.task.abort();
                warn!(deadline = ?deadline, "Forced close timed out");
                Err(ServerError::ForceCloseTimedOut(deadline))
            }
        };

        self.release_watcher().await;
        info!("Server stopped");
        result
    }

    async fn release_watcher(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.close().await;
        }
    }
}
