use demo_service::app::{App, DemoWorker, RestartPolicy, WorkerSupervisor, DEMO_WORKER_NAME};
use demo_service::certs::{CertificatePaths, CertificateStore, CertificateWatcher};
use demo_service::config::Config;
use demo_service::server::{
    create_metrics, health_router, serve_health, shutdown_deadline, HealthAggregator,
    ShutdownCoordinator, ShutdownOutcome, TerminationSignals, TlsServer, TlsServerConfig,
};
use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Log filter used when `RUST_LOG` is not set
fn default_filter(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

/// Load the configuration, tagging failures as startup errors
///
/// Tracing depends on the config, so the error is reported once, by the
/// `Err` returned from `main`.
fn load_config<F>(lookup: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    Config::load_with(lookup).context("Startup failure")
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter(config.debug)));

    if config.log_fmt_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
        info!("Log format set to JSON");
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config(|name| std::env::var(name).ok())?;
    init_tracing(&config);

    info!(
        config_file = ?config.source,
        tls_addr = %config.tls_addr(),
        health_addr = %config.health_addr(),
        mutual_tls = config.ca_cert.is_some(),
        "Starting demo-service"
    );

    // Create metrics registry
    let metrics = create_metrics()?;
    for name in &config.demo_metrics {
        info!(metric = %name, "Registering demo metric");
        metrics.register_demo_metric(name);
    }

    let hostname = config.resolve_hostname().map_err(|e| {
        error!(error = %e, "Startup failure");
        e
    })?;

    // Signal handlers first: a SIGTERM during startup still drains
    let signals = TerminationSignals::register()?;

    let coordinator = ShutdownCoordinator::new(shutdown_deadline(config.shutdown_grace_period));
    let shutdown_state = coordinator.state();

    // Workers
    let mut supervisor = WorkerSupervisor::new(coordinator.worker_signal())
        .with_policy(RestartPolicy::from_delay(config.worker_restart_delay))
        .with_metrics(Arc::clone(&metrics));
    let demo = DemoWorker::new(config.worker_sleep, config.demo_metrics.clone())
        .with_metrics(Arc::clone(&metrics));
    info!("Running workers");
    supervisor.spawn(DEMO_WORKER_NAME, Arc::new(demo));

    // Certificates: the first load must succeed before anything binds
    let store = Arc::new(CertificateStore::new());
    let watcher = CertificateWatcher::new(
        CertificatePaths::new(&config.server_cert, &config.server_key),
        Arc::clone(&store),
    )
    .with_interval(config.cert_poll_interval)
    .with_metrics(Arc::clone(&metrics))
    .start()
    .await
    .map_err(|e| {
        error!(error = %e, "Startup failure");
        e
    })?;

    // Health checks
    let app = Arc::new(App::new(supervisor.status()));
    let health = HealthAggregator::new(hostname.as_str(), vec![app.probe()]);
    info!(hostname = %hostname, probes = health.probe_count(), "Healthz loaded");

    let health_listener = tokio::net::TcpListener::bind(config.health_addr())
        .await
        .map_err(|e| {
            error!(addr = %config.health_addr(), error = %e, "Failed to bind health server");
            e
        })?;
    let health_task = tokio::spawn(serve_health(
        health_listener,
        health_router(health.clone(), Arc::clone(&metrics)),
        coordinator.server_signal(),
    ));

    // TLS server
    let mut tls_config = TlsServerConfig::new(config.tls_addr());
    tls_config.client_ca = config.ca_cert.clone();
    tls_config.grace_period = config.shutdown_grace_period;
    let server = TlsServer::new(tls_config, store)
        .with_watcher(watcher)
        .with_health(health)
        .bind()
        .map_err(|e| {
            error!(error = %e, "Startup failure");
            e
        })?
        .start();
    let server_task = tokio::spawn(server.run_until(coordinator.server_signal()));

    info!("Starting service");

    let outcome = coordinator
        .run(signals.recv(), supervisor, server_task)
        .await;

    // The health listener stops with the server phase
    match tokio::time::timeout(shutdown_deadline(config.shutdown_grace_period), health_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!(error = %e, "Health server failed"),
        Ok(Err(e)) => warn!(error = %e, "Health server task ended abnormally"),
        Err(_) => warn!("Health server did not stop in time"),
    }

    info!(state = ?shutdown_state.snapshot(), "Shutdown sequence finished");
    match outcome {
        ShutdownOutcome::Clean { signal } => {
            info!(signal, "demo-service shut down gracefully");
            Ok(())
        }
        ShutdownOutcome::ServerFailed(e) => Err(anyhow::anyhow!("server failed: {}", e)),
        ShutdownOutcome::StopFailed(e) => Err(anyhow::anyhow!("server stop failed: {}", e)),
        ShutdownOutcome::StopTimedOut(timeout) => Err(anyhow::anyhow!(
            "server did not stop within {:?}",
            timeout
        )),
    }
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
