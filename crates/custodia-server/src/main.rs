//! Custodia server entry point.
//!
//! Bootstraps the storage backend, the encrypted overlay, the KEM key
//! registry, and the authentication/authorization pipeline, then starts the
//! Axum HTTP server with graceful shutdown.

use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderValue;
use axum::Router;
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use custodia_core::auth::{AuthChain, Authenticator, Authorizer, HeaderAuth, KemKeystoreAuthz, PathAuthz, PeerCredAuth, UserNamespaceAuthz};
use custodia_core::kem::KemKeyStore;
use custodia_core::overlay::{ContentEncryption, EncryptedOverlayStore, OverlayConfig};
use custodia_core::audit::FileAuditHook;
use custodia_core::plugin::{AuditHook, TracingAuditHook};
use custodia_core::consumer::ConsumerTree;
use custodia_core::secrets::SecretsConsumer;
use custodia_core::message::Validator;
use custodia_store::{MemoryStore, SqliteStore, Store};

use custodia_server::config::{BindTarget, ServerConfig, StorageBackendType};
use custodia_server::hardening;
use custodia_server::routes;
use custodia_server::state::AppState;
#[cfg(unix)]
use custodia_server::uds::UdsConnectInfo;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    apply_hardening(&config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(storage = ?config.storage_backend, mount = %config.mount_path, "Custodia starting");

    let state = build_app_state(&config).await?;
    let app = build_router(state);

    match &config.bind_target {
        BindTarget::Tcp(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind to {addr}"))?;
            info!(addr = %addr, "Custodia server listening (TCP)");
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("server error")?;
        }
        #[cfg(unix)]
        BindTarget::Unix(path) => {
            if path.exists() {
                std::fs::remove_file(path)
                    .with_context(|| format!("failed to remove stale socket {}", path.display()))?;
            }
            let listener = UnixListener::bind(path)
                .with_context(|| format!("failed to bind to {}", path.display()))?;
            info!(path = %path.display(), "Custodia server listening (Unix domain socket)");
            axum::serve(listener, app.into_make_service_with_connect_info::<UdsConnectInfo>())
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("server error")?;
        }
        #[cfg(not(unix))]
        BindTarget::Unix(_) => {
            anyhow::bail!("Unix-domain-socket binding is only supported on unix targets");
        }
    }

    info!("Custodia server stopped");
    Ok(())
}

async fn build_app_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let overlay_cfg = || OverlayConfig {
        master_key_path: config.master_key_path.clone(),
        autogen_master_key: config.autogen_master_key,
        enc: ContentEncryption::A256CbcHs512,
    };

    let store: Arc<dyn Store> = match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            let backing = Arc::new(MemoryStore::new());
            Arc::new(EncryptedOverlayStore::open(backing, overlay_cfg()).context("opening encrypted overlay")?)
        }
        StorageBackendType::Sqlite { path } => {
            info!(path = %path, "using SQLite storage");
            let backing = Arc::new(
                SqliteStore::open(path).await.context("failed to open SQLite storage")?,
            );
            Arc::new(EncryptedOverlayStore::open(backing, overlay_cfg()).context("opening encrypted overlay")?)
        }
    };

    let audit: Arc<dyn AuditHook> = match &config.audit_file_path {
        Some(path) => {
            info!(path = %path, "audit events also written to file");
            Arc::new(FileAuditHook::new(path))
        }
        None => Arc::new(TracingAuditHook),
    };

    let kem_keys = Arc::new(KemKeyStore::new(Arc::clone(&store), config.server_kid.clone()));
    let (sig_pub, enc_pub) = kem_keys.ensure_server_keys().await.context("generating server KEM keys")?;
    info!(kid = %config.server_kid, sig_kty = %sig_pub.key_type(), enc_kty = %enc_pub.key_type(), "KEM server keys ready");

    // PeerCredAuth is a hard deny once it has an opinion (`Negative` aborts
    // the whole chain, per `AuthChain::run`), so it's only wired in when a
    // uid or gid was actually configured; its `-1/-1` default would
    // otherwise deny every request, including ones a later authenticator
    // would have allowed.
    let mut authenticators: Vec<Box<dyn Authenticator>> = Vec::new();
    if config.peer_auth_uid >= 0 || config.peer_auth_gid >= 0 {
        authenticators.push(Box::new(PeerCredAuth {
            uid: config.peer_auth_uid,
            gid: config.peer_auth_gid,
        }));
    }
    if let Some(header_name) = &config.header_auth_name {
        authenticators.push(Box::new(HeaderAuth { header_name: header_name.clone(), allowed_values: None }));
    }
    if authenticators.is_empty() {
        tracing::warn!(
            "no CUSTODIA_AUTH_UID/CUSTODIA_AUTH_GID or CUSTODIA_AUTH_HEADER configured; every request will be denied"
        );
    }

    let kem_paths: Vec<String> =
        config.kem_paths.iter().map(|p| format!("{}{p}", config.mount_path)).collect();

    // UserNamespaceAuthz must run before PathAuthz: both match any path under
    // the mount, and the first non-NotApplicable outcome wins, so the
    // narrower per-user rule would otherwise never be reached.
    let authorizers: Vec<Box<dyn Authorizer>> = vec![
        Box::new(UserNamespaceAuthz { subtree: config.mount_path.clone() }),
        Box::new(KemKeystoreAuthz { paths: kem_paths, keys: Arc::clone(&kem_keys) }),
        Box::new(PathAuthz { paths: vec![config.mount_path.clone()] }),
    ];

    let auth_chain = Arc::new(AuthChain::new(authenticators, authorizers, Arc::clone(&audit)));

    let mut consumers = ConsumerTree::new();
    consumers.register(
        config.mount_path.clone(),
        Arc::new(SecretsConsumer::new(
            Arc::clone(&store),
            Validator::default(),
            config.server_kid.clone(),
            Arc::clone(&audit),
        )),
    );

    Ok(Arc::new(AppState {
        store,
        auth_chain,
        consumers: Arc::new(consumers),
        kem_keys: Some(kem_keys),
        audit,
        forwarder_id: uuid::Uuid::new_v4().to_string(),
    }))
}

fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::PUT, axum::http::Method::DELETE])
        .allow_headers(Any);

    routes::router()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}

/// Apply production hardening before logging is initialized.
#[allow(clippy::print_stderr)]
fn apply_hardening(config: &ServerConfig) {
    if let Err(e) = hardening::disable_core_dumps() {
        eprintln!("WARNING: failed to disable core dumps: {e}");
    }

    if config.disable_mlock {
        eprintln!("WARNING: mlock disabled via CUSTODIA_DISABLE_MLOCK — secrets may be swapped to disk");
    } else if let Err(e) = hardening::lock_memory() {
        eprintln!("WARNING: failed to lock memory: {e} (set CUSTODIA_DISABLE_MLOCK=true for dev)");
    }
}
