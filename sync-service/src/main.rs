//! `normas-sync-service` entry point.
//!
//! ## Modes
//!
//! - **Service mode** (default): open the warehouse, arm the weekly
//!   schedule, accept socket connections until Ctrl-C.
//! - **`--ping`**: connect to the running service socket, send a hello
//!   handshake, verify the response, then exit.
//! - **`--sync-once`**: run one reconciliation in-process, print the JSON
//!   outcome and exit non-zero on failure. For cron-style deployments
//!   without the long-running service.

use std::io::{BufRead, Write};
use std::os::unix::io::FromRawFd;
use std::sync::Arc;

use normas_core::NormasConfig;
use normas_core::model::SyncTrigger;
use normas_sync_service::service::SyncService;
use tokio::net::UnixListener;

/// Connect to the service socket, send a hello handshake, verify the
/// response, then exit.
fn ping(cfg: &NormasConfig) -> std::io::Result<()> {
    let path = normas_sync_service::socket_path(&cfg.service);
    let mut stream = std::os::unix::net::UnixStream::connect(&path).map_err(|e| {
        std::io::Error::other(format!("ping: cannot connect to {}: {e}", path.display()))
    })?;
    stream.set_read_timeout(Some(std::time::Duration::from_secs(10)))?;
    stream.set_write_timeout(Some(std::time::Duration::from_secs(5)))?;

    let hello = format!(
        r#"{{"id":0,"method":"hello","params":{{"protocol_version":"{}","client_version":"ping"}}}}"#,
        normas_sync_service::PROTOCOL_VERSION,
    );
    stream.write_all(hello.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reader = std::io::BufReader::new(&stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;

    let resp: serde_json::Value = serde_json::from_str(line.trim())
        .map_err(|e| std::io::Error::other(format!("ping: invalid response JSON: {e}")))?;
    if resp.get("result").is_some() {
        eprintln!("ping: service is alive");
        Ok(())
    } else {
        let msg = resp
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        Err(std::io::Error::other(format!("ping: hello failed: {msg}")))
    }
}

/// Create a Unix listener, preferring systemd socket activation.
///
/// If `LISTEN_FDS` is set to >= 1, uses fd 3 (the first passed fd).
/// Otherwise, binds at the configured socket path.
fn create_listener(cfg: &NormasConfig) -> std::io::Result<UnixListener> {
    if let Ok(val) = std::env::var("LISTEN_FDS")
        && let Ok(n) = val.parse::<u32>()
        && n >= 1
    {
        tracing::info!("Socket activation: using fd 3 from LISTEN_FDS={n}");
        // SAFETY: fd 3 is guaranteed by systemd socket activation protocol
        let std_listener = unsafe { std::os::unix::net::UnixListener::from_raw_fd(3) };
        std_listener.set_nonblocking(true)?;
        return UnixListener::from_std(std_listener);
    }

    normas_sync_service::ipc::bind(&normas_sync_service::socket_path(&cfg.service))
}

fn load_config() -> std::io::Result<NormasConfig> {
    NormasConfig::load().map_err(|e| std::io::Error::other(e.to_string()))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> std::io::Result<()> {
    match std::env::args().nth(1).as_deref() {
        Some("--ping") => ping(&load_config()?),
        Some("--sync-once") => sync_once(),
        Some(other) => Err(std::io::Error::other(format!(
            "unknown argument: {other} (expected --ping or --sync-once)"
        ))),
        None => run_service(),
    }
}

#[tokio::main]
async fn sync_once() -> std::io::Result<()> {
    init_tracing();
    let cfg = load_config()?;
    let service = SyncService::open(&cfg).map_err(|e| std::io::Error::other(e.to_string()))?;

    match service.run_sync(SyncTrigger::Manual).await {
        Ok(outcome) => {
            let json = serde_json::to_string(&outcome).map_err(std::io::Error::other)?;
            println!("{json}");
            Ok(())
        }
        Err(e) => {
            let json = serde_json::json!({
                "error": e.operator_message(),
                "category": e.category().as_str(),
                "flags_cleared": e.flags_cleared(),
            });
            println!("{json}");
            Err(std::io::Error::other(e.to_string()))
        }
    }
}

#[tokio::main]
async fn run_service() -> std::io::Result<()> {
    init_tracing();
    tracing::info!("normas-sync-service v{} starting", env!("CARGO_PKG_VERSION"));

    let cfg = load_config()?;
    let service = Arc::new(
        SyncService::open(&cfg)
            .map_err(|e| std::io::Error::other(format!("Failed to open warehouse: {e}")))?,
    );
    tracing::info!(path = %cfg.database.path, "Warehouse ready");

    let listener = create_listener(&cfg)?;

    // Shutdown coordination via watch channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let svc_signal = Arc::clone(&service);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!(
            "Signal received, shutting down (sync running: {})",
            svc_signal.sync_status().await.running
        );
        let _ = shutdown_tx.send(true);
    });

    let schedule = if cfg.sync.schedule_enabled {
        Some(tokio::spawn(normas_sync_service::scheduler::run_schedule(
            Arc::clone(&service),
            cfg.sync.schedule_interval(),
            shutdown_rx.clone(),
        )))
    } else {
        tracing::info!("Sync schedule disabled");
        None
    };

    normas_sync_service::ipc::serve(service, listener, shutdown_rx).await?;

    if let Some(handle) = schedule {
        let _ = handle.await;
    }

    tracing::info!("normas-sync-service exiting cleanly");
    Ok(())
}
