//! Server configuration for Custodia.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `CUSTODIA_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;

/// What transport the HTTP listener binds to.
#[derive(Debug, Clone)]
pub enum BindTarget {
    /// Plain TCP. Peer credentials are never available on this transport.
    Tcp(SocketAddr),
    /// A Unix-domain socket. The server reads the connecting peer's
    /// uid/gid/pid via `SO_PEERCRED` and feeds them to [`PeerCredAuth`](custodia_core::auth::PeerCredAuth).
    Unix(PathBuf),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Transport and address/path to bind the HTTP listener to.
    pub bind_target: BindTarget,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Path to the audit log file (if file audit is enabled).
    pub audit_file_path: Option<String>,
    /// Path to the overlay's master key file.
    pub master_key_path: PathBuf,
    /// Whether to generate the master key file if it is missing.
    pub autogen_master_key: bool,
    /// Path prefix the secrets consumer is mounted at (e.g. `/secrets`).
    pub mount_path: String,
    /// uid an authenticated Unix-socket peer must present (`-1` to ignore).
    pub peer_auth_uid: i64,
    /// gid an authenticated Unix-socket peer must present (`-1` to ignore).
    pub peer_auth_gid: i64,
    /// Name of a header whose value becomes `remote_user` if present.
    pub header_auth_name: Option<String>,
    /// This server's own KEM key id.
    pub server_kid: String,
    /// Path prefixes that are KEM-protected, relative to `mount_path`.
    pub kem_paths: Vec<String>,
    /// Whether to skip `mlock` (for development without root/`CAP_IPC_LOCK`).
    pub disable_mlock: bool,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// `SQLite` persistent storage.
    Sqlite { path: String },
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT` — port to bind on, binds to `0.0.0.0` (convention borrowed
    ///   from the usual PaaS deployment target)
    /// - `CUSTODIA_BIND_ADDR` — full bind address (overrides `PORT`, default:
    ///   `127.0.0.1:8891`); a value starting with `/` or `unix:` binds a
    ///   Unix-domain socket at that path instead of TCP
    /// - `CUSTODIA_STORAGE` — `memory` or `sqlite` (default: `memory`)
    /// - `CUSTODIA_STORAGE_PATH` — file path for the `sqlite` backend
    ///   (default: `./data/custodia.db`)
    /// - `CUSTODIA_LOG_LEVEL` — log filter (default: `info`)
    /// - `CUSTODIA_AUDIT_FILE` — path to audit log file (optional)
    /// - `CUSTODIA_MASTER_KEY` — path to the overlay master key (default:
    ///   `./data/master.jwk`)
    /// - `CUSTODIA_AUTOGEN_MASTER_KEY` — generate the master key on first run
    ///   (default: `true`)
    /// - `CUSTODIA_MOUNT_PATH` — mount point for the secrets consumer
    ///   (default: `/secrets`)
    /// - `CUSTODIA_AUTH_UID` / `CUSTODIA_AUTH_GID` — peer-credential match
    ///   (default: `-1`, disabled)
    /// - `CUSTODIA_AUTH_HEADER` — header name for header-based auth (unset
    ///   disables it)
    /// - `CUSTODIA_SERVER_KID` — this server's KEM key id (default: `server`)
    /// - `CUSTODIA_KEM_PATHS` — whitespace-separated KEM-protected path
    ///   prefixes (default: empty)
    /// - `CUSTODIA_DISABLE_MLOCK` — skip `mlockall` for dev environments
    ///   (default: `false`)
    #[must_use]
    pub fn from_env() -> Self {
        let bind_target = if let Ok(addr) = std::env::var("CUSTODIA_BIND_ADDR") {
            if let Some(path) = addr.strip_prefix("unix:") {
                BindTarget::Unix(PathBuf::from(path))
            } else if addr.starts_with('/') {
                BindTarget::Unix(PathBuf::from(addr))
            } else {
                BindTarget::Tcp(
                    addr.parse().unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8891))),
                )
            }
        } else if let Ok(port_str) = std::env::var("PORT") {
            let port: u16 = port_str.parse().unwrap_or(8891);
            BindTarget::Tcp(SocketAddr::from(([0, 0, 0, 0], port)))
        } else {
            BindTarget::Tcp(SocketAddr::from(([127, 0, 0, 1], 8891)))
        };

        let storage_path =
            std::env::var("CUSTODIA_STORAGE_PATH").unwrap_or_else(|_| "./data/custodia.db".to_owned());

        let storage_backend = match std::env::var("CUSTODIA_STORAGE")
            .unwrap_or_else(|_| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "sqlite" => StorageBackendType::Sqlite { path: storage_path },
            _ => StorageBackendType::Memory,
        };

        let log_level = std::env::var("CUSTODIA_LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
        let audit_file_path = std::env::var("CUSTODIA_AUDIT_FILE").ok();

        let master_key_path = std::env::var("CUSTODIA_MASTER_KEY")
            .unwrap_or_else(|_| "./data/master.jwk".to_owned())
            .into();

        let autogen_master_key = std::env::var("CUSTODIA_AUTOGEN_MASTER_KEY")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let mount_path = std::env::var("CUSTODIA_MOUNT_PATH").unwrap_or_else(|_| "/secrets".to_owned());

        let peer_auth_uid =
            std::env::var("CUSTODIA_AUTH_UID").ok().and_then(|v| v.parse().ok()).unwrap_or(-1);
        let peer_auth_gid =
            std::env::var("CUSTODIA_AUTH_GID").ok().and_then(|v| v.parse().ok()).unwrap_or(-1);

        let header_auth_name = std::env::var("CUSTODIA_AUTH_HEADER").ok();

        let server_kid = std::env::var("CUSTODIA_SERVER_KID").unwrap_or_else(|_| "server".to_owned());

        let kem_paths = std::env::var("CUSTODIA_KEM_PATHS")
            .ok()
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let disable_mlock =
            std::env::var("CUSTODIA_DISABLE_MLOCK").map(|v| v == "true" || v == "1").unwrap_or(false);

        Self {
            bind_target,
            storage_backend,
            log_level,
            audit_file_path,
            master_key_path,
            autogen_master_key,
            mount_path,
            peer_auth_uid,
            peer_auth_gid,
            header_auth_name,
            server_kid,
            kem_paths,
            disable_mlock,
        }
    }
}
