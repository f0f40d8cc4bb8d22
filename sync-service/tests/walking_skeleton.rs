#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Walking-skeleton end-to-end test.
//!
//! Proves the full pipeline over a real socket:
//!   1. Start the sync service on a temp socket over a seeded warehouse
//!   2. Handshake
//!   3. Trigger sync.run and check the reconciled rows
//!   4. Read back through normas.list / normas.get / management_systems.list /
//!      normas.filter_values
//!   5. Orphan diagnostic and service status
//!   6. Shutdown stops the listener

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use normas_core::config::SyncSettings;
use normas_core::test_support::{insert_classification, insert_norma, temp_warehouse};
use normas_sync_service::PROTOCOL_VERSION;
use normas_sync_service::service::SyncService;
use pretty_assertions::assert_eq;
use tokio::sync::watch;

/// Stateful client that keeps a single connection + buffered reader.
struct TestClient {
    writer: UnixStream,
    reader: BufReader<UnixStream>,
}

impl TestClient {
    fn connect(socket_path: &std::path::Path) -> Self {
        let stream = UnixStream::connect(socket_path).expect("Failed to connect to sync service");
        let writer = stream.try_clone().expect("clone stream");
        let reader = BufReader::new(stream);
        Self { writer, reader }
    }

    fn rpc(&mut self, msg: serde_json::Value) -> serde_json::Value {
        let mut bytes = serde_json::to_vec(&msg).expect("serialize");
        bytes.push(b'\n');
        self.writer.write_all(&bytes).expect("write");
        self.writer.flush().expect("flush");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response");
        serde_json::from_str(&line).unwrap_or_else(|e| panic!("parse response: {e}\nraw: {line}"))
    }

    fn handshake(&mut self) {
        let resp = self.rpc(serde_json::json!({
            "id": 0,
            "method": "hello",
            "params": {
                "protocol_version": PROTOCOL_VERSION,
                "client_version": "test-0.1.0"
            }
        }));
        assert!(resp.get("result").is_some(), "Hello should succeed: {resp}");
    }
}

struct Running {
    _dir: tempfile::TempDir,
    _warehouse_dir: tempfile::TempDir,
    socket_path: std::path::PathBuf,
    shutdown_tx: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

/// Seed the end-to-end warehouse and start the service in the background.
async fn start_service() -> Running {
    let (warehouse_dir, warehouse) = temp_warehouse();
    insert_norma(&warehouse, 1, Some("2020-02-02"));
    insert_norma(&warehouse, 2, Some("2023-03-03"));
    insert_norma(&warehouse, 3, None);
    insert_classification(&warehouse, 1, Some("QMS"), true);
    insert_classification(&warehouse, 2, Some("EMS"), true);
    insert_classification(&warehouse, 2, Some("OHS"), true);
    insert_classification(&warehouse, 4, Some("QMS"), true);

    let settings = SyncSettings {
        schedule_enabled: false,
        ..Default::default()
    };
    let service = Arc::new(SyncService::with_warehouse(warehouse, settings));

    let dir = tempfile::TempDir::new().unwrap();
    let socket_path = dir.path().join("test-sync.sock");
    let listener = normas_sync_service::ipc::bind(&socket_path).unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        normas_sync_service::ipc::serve(service, listener, shutdown_rx)
            .await
            .unwrap();
    });

    Running {
        _dir: dir,
        _warehouse_dir: warehouse_dir,
        socket_path,
        shutdown_tx,
        handle,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn walking_skeleton_e2e() {
    let running = start_service().await;
    let mut client = TestClient::connect(&running.socket_path);

    // 1. Handshake
    client.handshake();

    // 2. Trigger the sync
    let run = client.rpc(serde_json::json!({"id": 1, "method": "sync.run"}));
    assert_eq!(
        run["result"],
        serde_json::json!({"message": "Sync completed successfully", "updated": 2}),
        "sync.run should succeed: {run}"
    );

    // 3. Applicable normas, newest first
    let list = client.rpc(serde_json::json!({
        "id": 2,
        "method": "normas.list",
        "params": {"aplicavel": true}
    }));
    let data = list["result"]["data"].as_array().unwrap();
    let got: Vec<_> = data
        .iter()
        .map(|n| (n["id"].as_i64().unwrap(), n["sistema_gestao"].clone()))
        .collect();
    assert_eq!(
        got,
        vec![
            (2, serde_json::json!("EMS, OHS")),
            (1, serde_json::json!("QMS")),
        ]
    );

    // 4. Non-applicable norma keeps null labels
    let get = client.rpc(serde_json::json!({
        "id": 3,
        "method": "normas.get",
        "params": {"id": 3}
    }));
    assert_eq!(get["result"]["aplicavel"], false);
    assert!(get["result"]["sistema_gestao"].is_null());
    assert_eq!(
        get["result"]["management_systems_classifications"],
        serde_json::json!([])
    );

    // 5. Management systems by norma count
    let systems = client.rpc(serde_json::json!({"id": 4, "method": "management_systems.list"}));
    let labels: Vec<_> = systems["result"]["systems"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["sistema_gestao"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(labels, vec!["QMS", "EMS", "OHS"]);

    // 6. Filter values for the listing
    let filters = client.rpc(serde_json::json!({"id": 9, "method": "normas.filter_values"}));
    assert_eq!(filters["result"]["tipo_norma"], serde_json::json!(["Lei"]));

    // 7. Orphan diagnostic
    let orphans = client.rpc(serde_json::json!({"id": 5, "method": "sync.orphans"}));
    assert_eq!(orphans["result"]["orphan_ids"], serde_json::json!([4]));

    // 8. Status after the run
    let status = client.rpc(serde_json::json!({"id": 6, "method": "sync.status"}));
    assert_eq!(status["result"]["phase"], "reconciled");
    assert_eq!(status["result"]["last_run"]["updated"], 2);
    assert_eq!(status["result"]["last_run"]["trigger"], "manual");

    let svc = client.rpc(serde_json::json!({"id": 7, "method": "service.status"}));
    assert_eq!(svc["result"]["sync_running"], false);
    assert_eq!(svc["result"]["schedule_enabled"], false);
    assert!(svc["result"]["uptime_s"].as_u64().is_some());

    // 9. Incompatible protocol version is rejected
    let bad_hello = client.rpc(serde_json::json!({
        "id": 8,
        "method": "hello",
        "params": {
            "protocol_version": "99.0",
            "client_version": "test-0.1.0"
        }
    }));
    assert_eq!(bad_hello["error"]["code"], -32602);

    running.shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running.handle)
        .await
        .expect("listener should stop on shutdown")
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_sync_is_idempotent() {
    let running = start_service().await;
    let mut client = TestClient::connect(&running.socket_path);
    client.handshake();

    let first = client.rpc(serde_json::json!({"id": 1, "method": "sync.run"}));
    let second = client.rpc(serde_json::json!({"id": 2, "method": "sync.run"}));
    assert_eq!(first["result"], second["result"]);

    let norma = client.rpc(serde_json::json!({
        "id": 3,
        "method": "normas.get",
        "params": {"id": 2}
    }));
    assert_eq!(norma["result"]["sistema_gestao"], "EMS, OHS");

    running.handle.abort();
}
