//! `normas-sync-service`: aplicavel sync service.
//!
//! Long-running per-host service that owns the warehouse pool, runs the
//! weekly reconciliation schedule, and answers operators on a Unix domain
//! socket at `$XDG_RUNTIME_DIR/normas-sync.sock` using JSON-RPC-lite
//! (newline-delimited JSON, `hello` handshake first).

pub mod ipc;
pub mod protocol;
pub mod scheduler;
pub mod service;

/// Protocol version for the sync service IPC.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Default socket filename.
pub const SOCKET_FILENAME: &str = "normas-sync.sock";

/// Get the default socket path using XDG_RUNTIME_DIR.
///
/// Falls back to `/tmp/normas-sync-<username>.sock` if XDG_RUNTIME_DIR is not set.
pub fn default_socket_path() -> std::path::PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        std::path::PathBuf::from(runtime_dir).join(SOCKET_FILENAME)
    } else {
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        std::path::PathBuf::from(format!("/tmp/normas-sync-{user}.sock"))
    }
}

/// Socket path from `[service] socket_path`, else the default.
pub fn socket_path(cfg: &normas_core::config::ServiceConfig) -> std::path::PathBuf {
    cfg.socket_path
        .as_deref()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(default_socket_path)
}
