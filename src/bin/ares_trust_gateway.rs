//! Ares trust gateway.
//!
//! Serves the broker webhooks and the publish bridge, keeps the server
//! certificate rotated and times out silent devices.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;

use ares_trust_core::audit::{AuditTrail, LogAuditSink};
use ares_trust_core::config::Settings;
use ares_trust_core::http::{router, AppState};
use ares_trust_core::logging::structured::{init_logger, LogContext};
use ares_trust_core::pipeline::{
    BatchLedger, DeviceTimeoutSweep, SequenceCache, TelemetryAdmission,
};
use ares_trust_core::pki::{
    CertificateLifecycleManager, CertificateRequest, CertificateRotationLoop, ConnectionManager,
    DetachedConnector, VaultPkiClient,
};
use ares_trust_core::security::{AclEngine, BrokerAuthEngine};
use ares_trust_core::storage::{MemoryBackend, MemoryCache};
use ares_trust_core::{log_error, log_info, log_warn};

#[derive(Debug, Parser)]
#[command(name = "ares-trust-gateway", about = "Device trust and telemetry admission gateway")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();
    let args = Args::parse();
    let ctx = LogContext::new("startup");

    let settings = match &args.config {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => {
            log_warn!(ctx, "CONFIG_DEFAULTS", reason = "no --config given");
            Settings::default()
        }
    };

    let backend = Arc::new(MemoryBackend::new());
    settings.seed.apply(&backend);
    let cache = Arc::new(MemoryCache::new());
    let audit = AuditTrail::spawn(Arc::new(LogAuditSink));

    let auth = Arc::new(BrokerAuthEngine::new(
        backend.clone(),
        backend.clone(),
        audit.clone(),
    ));
    let acl = Arc::new(AclEngine::new(
        settings.acl.superusers.clone(),
        settings.acl.system_rules.clone(),
        backend.clone(),
        backend.clone(),
        audit.clone(),
    ));
    let sequences = SequenceCache::new(cache, settings.telemetry.sequence_ttl(), audit.clone());
    let admission = Arc::new(
        TelemetryAdmission::new(
            backend.clone(),
            backend.clone(),
            backend.clone(),
            sequences,
            audit.clone(),
        )
        .with_topic_namespace(&settings.telemetry.topic_namespace),
    );
    let ledger = Arc::new(BatchLedger::new(backend.clone(), audit.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let sweep = DeviceTimeoutSweep::new(
        backend.clone(),
        audit.clone(),
        settings.telemetry.device_timeout(),
        settings.telemetry.sweep_interval(),
    );
    tasks.push(tokio::spawn(sweep.run(shutdown_rx.clone())));

    let connection = Arc::new(ConnectionManager::new(Arc::new(DetachedConnector)));
    match &settings.pki {
        Some(pki) => {
            let authority = Arc::new(
                VaultPkiClient::new(
                    &pki.address,
                    &pki.token,
                    &pki.mount,
                    &pki.ttl,
                    pki.request_timeout(),
                )
                .context("failed to build PKI client")?,
            );
            let lifecycle = Arc::new(CertificateLifecycleManager::new(
                authority,
                CertificateRequest {
                    common_name: pki.common_name.clone(),
                    role_name: pki.role_name.clone(),
                },
                audit.clone(),
            ));
            let rotation = CertificateRotationLoop::new(
                lifecycle,
                connection.clone(),
                pki.rotation_interval(),
                pki.retry_interval(),
            );
            // First certificate before serving; later cycles run on the timer.
            let initial = rotation.run_cycle().await;
            log_info!(ctx, "CERT_INITIAL", outcome = initial);
            tasks.push(tokio::spawn(rotation.run(shutdown_rx.clone())));
        }
        None => {
            log_warn!(ctx, "CERT_ROTATION_DISABLED", reason = "no [pki] section");
        }
    }

    let state = AppState {
        auth,
        acl,
        admission,
        ledger,
        images: backend.clone(),
        publish_secret: settings.server.publish_secret.clone(),
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&settings.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.server.listen_addr))?;
    log_info!(ctx, "GATEWAY_LISTENING", addr = settings.server.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("SIGNAL_HANDLER_FAILED error={}", e);
            }
        })
        .await
        .context("gateway server error")?;

    log_info!(ctx, "GATEWAY_SHUTDOWN", tasks = tasks.len());
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            log_error!(ctx, "BACKGROUND_TASK_PANICKED", error = e.to_string());
        }
    }
    connection.shutdown().await;
    audit.flush().await;
    if audit.failed_writes() > 0 {
        log_warn!(ctx, "AUDIT_WRITES_LOST", count = audit.failed_writes());
    }
    Ok(())
}
