//! Unix domain socket IPC listener.
//!
//! Accepts connections, reads newline-delimited JSON-RPC-lite messages,
//! dispatches them to the [`SyncService`] and writes one response line per
//! request. The socket file is created `0600`: reaching it is the
//! operator authentication for `sync.run`.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use normas_core::SyncError;
use normas_core::error::ErrorCategory;
use normas_core::model::{NormasFilter, SyncTrigger};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::PROTOCOL_VERSION;
use crate::protocol::*;
use crate::service::{ReadError, SyncService};

type RpcResult = Result<serde_json::Value, (i64, String, Option<serde_json::Value>)>;

/// Methods advertised in the `hello` result.
pub const CAPABILITIES: &[&str] = &[
    "sync.run",
    "sync.status",
    "sync.orphans",
    "normas.list",
    "normas.get",
    "normas.filter_values",
    "management_systems.list",
    "service.status",
];

/// Bind the listener at `path`, replacing a stale socket file.
pub fn bind(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(path)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    tracing::info!("Sync service listening on {}", path.display());
    Ok(listener)
}

/// Serve connections until `shutdown` flips to `true`.
///
/// On shutdown, a sync started over the socket finishes before the open
/// connections are dropped.
pub async fn serve(
    service: Arc<SyncService>,
    listener: UnixListener,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let svc = Arc::clone(&service);
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(svc, stream).await {
                            tracing::warn!("Connection error: {e}");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Accept error: {e}");
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("IPC listener stopping");
                    break;
                }
            }
        }
    }

    let _quiesced = service.quiesce().await;
    connections.shutdown().await;
    Ok(())
}

/// Handle a single client connection.
async fn handle_connection(service: Arc<SyncService>, stream: UnixStream) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            break; // EOF
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = dispatch_message(&service, trimmed).await;
        let mut response_bytes = serde_json::to_vec(&response).unwrap_or_else(|_| b"{}".to_vec());
        response_bytes.push(b'\n');
        writer.write_all(&response_bytes).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Parse and dispatch a single JSON-RPC message.
pub async fn dispatch_message(service: &SyncService, raw: &str) -> serde_json::Value {
    let request: RpcRequest = match serde_json::from_str(raw) {
        Ok(req) => req,
        Err(e) => {
            return serde_json::to_value(RpcError {
                id: RequestId::Integer(0),
                error: RpcErrorBody {
                    code: ERR_INVALID_REQUEST,
                    message: format!("Invalid JSON-RPC: {e}"),
                    data: None,
                },
            })
            .unwrap_or_default();
        }
    };

    let id = request.id.clone();
    match dispatch_method(service, &request.method, request.params).await {
        Ok(result) => serde_json::to_value(RpcResponse { id, result }).unwrap_or_default(),
        Err((code, message, data)) => serde_json::to_value(RpcError {
            id,
            error: RpcErrorBody {
                code,
                message,
                data,
            },
        })
        .unwrap_or_default(),
    }
}

async fn dispatch_method(
    service: &SyncService,
    method: &str,
    params: Option<serde_json::Value>,
) -> RpcResult {
    match method {
        "hello" => handle_hello(params),
        "sync.run" => handle_sync_run(service, params).await,
        "sync.status" => to_result(&service.sync_status().await),
        "sync.orphans" => {
            let report = service.orphans().await.map_err(|e| read_error_to_rpc(&e))?;
            to_result(&report)
        }
        "normas.list" => handle_normas_list(service, params).await,
        "normas.get" => handle_normas_get(service, params).await,
        "normas.filter_values" => {
            let values = service
                .filter_values()
                .await
                .map_err(|e| read_error_to_rpc(&e))?;
            to_result(&values)
        }
        "management_systems.list" => {
            let result = service
                .management_systems()
                .await
                .map_err(|e| read_error_to_rpc(&e))?;
            to_result(&result)
        }
        "service.status" => to_result(&service.status().await),
        _ => Err((
            ERR_METHOD_NOT_FOUND,
            format!("Unknown method: {method}"),
            None,
        )),
    }
}

/// Handle the `hello` handshake.
fn handle_hello(params: Option<serde_json::Value>) -> RpcResult {
    let hello: HelloParams = required_params("hello", params)?;

    if hello.protocol_version != PROTOCOL_VERSION {
        return Err((
            ERR_INVALID_PARAMS,
            format!(
                "Incompatible protocol version: client={}, service={}",
                hello.protocol_version, PROTOCOL_VERSION
            ),
            None,
        ));
    }

    tracing::debug!(client_version = %hello.client_version, "Client handshake");
    to_result(&HelloResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        service_version: env!("CARGO_PKG_VERSION").to_string(),
        capabilities: CAPABILITIES.iter().map(ToString::to_string).collect(),
    })
}

/// Handle `sync.run`. The trigger takes no arguments; the run is
/// always total-table.
async fn handle_sync_run(service: &SyncService, params: Option<serde_json::Value>) -> RpcResult {
    let takes_args = match &params {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::Object(map)) => !map.is_empty(),
        Some(_) => true,
    };
    if takes_args {
        return Err((
            ERR_INVALID_PARAMS,
            "sync.run accepts no parameters".to_string(),
            None,
        ));
    }

    let outcome = service
        .run_sync(SyncTrigger::Manual)
        .await
        .map_err(|e| sync_error_to_rpc(&e))?;
    to_result(&outcome)
}

async fn handle_normas_list(service: &SyncService, params: Option<serde_json::Value>) -> RpcResult {
    let filter: NormasFilter = match params {
        None | Some(serde_json::Value::Null) => NormasFilter::default(),
        Some(v) => serde_json::from_value(v).map_err(|e| {
            (
                ERR_INVALID_PARAMS,
                format!("Invalid normas.list params: {e}"),
                None,
            )
        })?,
    };

    let page = service
        .list_normas(&filter)
        .await
        .map_err(|e| read_error_to_rpc(&e))?;
    to_result(&page)
}

async fn handle_normas_get(service: &SyncService, params: Option<serde_json::Value>) -> RpcResult {
    let params: NormasGetParams = required_params("normas.get", params)?;
    let detail = service
        .get_norma(params.id)
        .await
        .map_err(|e| read_error_to_rpc(&e))?;
    to_result(&detail)
}

fn required_params<T: DeserializeOwned>(
    method: &str,
    params: Option<serde_json::Value>,
) -> Result<T, (i64, String, Option<serde_json::Value>)> {
    let value = params.ok_or_else(|| (ERR_INVALID_PARAMS, "Missing params".to_string(), None))?;
    serde_json::from_value(value).map_err(|e| {
        (
            ERR_INVALID_PARAMS,
            format!("Invalid {method} params: {e}"),
            None,
        )
    })
}

fn to_result<T: Serialize>(value: &T) -> RpcResult {
    serde_json::to_value(value).map_err(|e| {
        (ERR_INTERNAL, format!("Serialize error: {e}"), None)
    })
}

/// Map a reconciliation failure to (code, message, data).
fn sync_error_to_rpc(err: &SyncError) -> (i64, String, Option<serde_json::Value>) {
    let category = err.category();
    let code = match category {
        ErrorCategory::SyncInProgress => ERR_SYNC_IN_PROGRESS,
        ErrorCategory::SourceUnavailable => ERR_SOURCE_UNAVAILABLE,
        ErrorCategory::StoreUnavailable => ERR_STORE_UNAVAILABLE,
    };
    let data = serde_json::to_value(SyncErrorData {
        category: category.as_str().to_string(),
        flags_cleared: err.flags_cleared(),
    })
    .ok();
    (code, err.operator_message(), data)
}

fn read_error_to_rpc(err: &ReadError) -> (i64, String, Option<serde_json::Value>) {
    let code = match err {
        ReadError::Store(_) => ERR_STORE_UNAVAILABLE,
        ReadError::Source(_) => ERR_SOURCE_UNAVAILABLE,
        ReadError::NotFound { .. } => ERR_NOT_FOUND,
    };
    (code, err.to_string(), None)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use async_trait::async_trait;
    use normas_core::config::SyncSettings;
    use normas_core::model::{
        Classification, ClassificationRow, ManagementSystemCount, SyncPhase,
    };
    use normas_core::test_support::{
        insert_classification, insert_norma, norma_state, temp_warehouse,
    };
    use normas_core::{ClassificationSource, DbError, SqliteNormasStore};
    use pretty_assertions::assert_eq;
    use tokio::sync::Notify;

    fn service() -> (tempfile::TempDir, SyncService) {
        let (dir, warehouse) = temp_warehouse();
        insert_norma(&warehouse, 1, Some("2024-01-10"));
        insert_norma(&warehouse, 2, None);
        insert_classification(&warehouse, 1, Some("QMS"), true);
        insert_classification(&warehouse, 7, Some("EMS"), true);
        (
            dir,
            SyncService::with_warehouse(warehouse, SyncSettings::default()),
        )
    }

    async fn call(service: &SyncService, msg: serde_json::Value) -> serde_json::Value {
        dispatch_message(service, &msg.to_string()).await
    }

    #[tokio::test]
    async fn dispatch_hello() {
        let (_dir, service) = service();
        let result = call(
            &service,
            serde_json::json!({
                "id": 0,
                "method": "hello",
                "params": {
                    "protocol_version": PROTOCOL_VERSION,
                    "client_version": "0.1.0"
                }
            }),
        )
        .await;
        assert!(
            result["result"]["capabilities"]
                .as_array()
                .is_some_and(|c| c.len() == CAPABILITIES.len()),
            "Expected capabilities, got: {result}"
        );
    }

    #[tokio::test]
    async fn dispatch_rejects_garbage() {
        let (_dir, service) = service();
        let result = dispatch_message(&service, "not json").await;
        assert_eq!(result["error"]["code"], ERR_INVALID_REQUEST);
    }

    #[tokio::test]
    async fn dispatch_unknown_method() {
        let (_dir, service) = service();
        let result = call(&service, serde_json::json!({"id": 1, "method": "bot.run"})).await;
        assert_eq!(result["error"]["code"], ERR_METHOD_NOT_FOUND);
        assert_eq!(result["id"], 1);
    }

    #[tokio::test]
    async fn sync_run_rejects_arguments() {
        let (_dir, service) = service();
        let result = call(
            &service,
            serde_json::json!({"id": "a", "method": "sync.run", "params": {"ids": [1]}}),
        )
        .await;
        assert_eq!(result["error"]["code"], ERR_INVALID_PARAMS);
        assert_eq!(result["id"], "a");
    }

    #[tokio::test]
    async fn sync_run_then_read_back() {
        let (_dir, service) = service();
        let run = call(
            &service,
            serde_json::json!({"id": 2, "method": "sync.run", "params": {}}),
        )
        .await;
        assert_eq!(run["result"]["updated"], 1, "got: {run}");

        let list = call(
            &service,
            serde_json::json!({
                "id": 3,
                "method": "normas.list",
                "params": {"aplicavel": true}
            }),
        )
        .await;
        assert_eq!(list["result"]["pagination"]["total"], 1);
        assert_eq!(list["result"]["data"][0]["sistema_gestao"], "QMS");

        let orphans = call(&service, serde_json::json!({"id": 4, "method": "sync.orphans"})).await;
        assert_eq!(orphans["result"]["orphan_ids"], serde_json::json!([7]));
    }

    #[tokio::test]
    async fn normas_get_not_found() {
        let (_dir, service) = service();
        let found = call(
            &service,
            serde_json::json!({"id": 5, "method": "normas.get", "params": {"id": 1}}),
        )
        .await;
        assert_eq!(found["result"]["id"], 1);
        assert_eq!(
            found["result"]["management_systems_classifications"][0]["sistema_gestao"],
            "QMS"
        );

        let missing = call(
            &service,
            serde_json::json!({"id": 6, "method": "normas.get", "params": {"id": 99}}),
        )
        .await;
        assert_eq!(missing["error"]["code"], ERR_NOT_FOUND);
    }

    #[tokio::test]
    async fn filter_values_lists_distinct_columns() {
        let (_dir, service) = service();
        let result = call(
            &service,
            serde_json::json!({"id": 7, "method": "normas.filter_values"}),
        )
        .await;
        assert_eq!(result["result"]["tipo_norma"], serde_json::json!(["Lei"]));
        assert_eq!(
            result["result"]["status_vigencia"],
            serde_json::json!(["Em vigor"])
        );
        assert_eq!(result["result"]["divisao_politica"], serde_json::json!([]));
    }

    #[test]
    fn orphan_read_failure_names_no_phase() {
        let err = ReadError::Store(DbError::Io(std::io::Error::other("gone")));
        let (code, message, _) = read_error_to_rpc(&err);
        assert_eq!(code, ERR_STORE_UNAVAILABLE);
        assert!(!message.contains("verifying"));
    }

    #[test]
    fn unserializable_result_is_internal_error() {
        let mut bad = std::collections::HashMap::new();
        bad.insert((1, 2), "tuple keys are not JSON object keys");
        let err = to_result(&bad).err().unwrap_or_else(|| panic!("expected error"));
        assert_eq!(err.0, ERR_INTERNAL);
    }

    /// Source that parks the fetch until released.
    #[derive(Default)]
    struct GatedSource {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ClassificationSource for GatedSource {
        async fn fetch_true_classifications(&self) -> Result<Vec<ClassificationRow>, DbError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(vec![ClassificationRow::new(1, Some("QMS"))])
        }

        async fn classifications_for_norma(
            &self,
            _norma_id: i64,
        ) -> Result<Vec<Classification>, DbError> {
            Ok(Vec::new())
        }

        async fn management_systems(&self) -> Result<Vec<ManagementSystemCount>, DbError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_waits_for_sync_in_flight() {
        let (_dir, warehouse) = temp_warehouse();
        insert_norma(&warehouse, 1, None);
        let source = Arc::new(GatedSource::default());
        let service = Arc::new(SyncService::new(
            Arc::new(SqliteNormasStore::new(warehouse.clone(), 500)),
            source.clone(),
            SyncSettings::default(),
        ));

        let sock_dir = tempfile::TempDir::new().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let path = sock_dir.path().join("sync.sock");
        let listener = bind(&path).unwrap_or_else(|e| panic!("bind: {e}"));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(serve(Arc::clone(&service), listener, shutdown_rx));

        let mut client = UnixStream::connect(&path)
            .await
            .unwrap_or_else(|e| panic!("connect: {e}"));
        client
            .write_all(b"{\"id\":1,\"method\":\"sync.run\"}\n")
            .await
            .unwrap_or_else(|e| panic!("write: {e}"));
        source.entered.notified().await;

        let _ = shutdown_tx.send(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!server.is_finished(), "serve returned with a sync in flight");

        source.release.notify_one();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap_or_else(|_| panic!("serve should stop once the sync ends"))
            .unwrap_or_else(|e| panic!("join: {e}"))
            .unwrap_or_else(|e| panic!("serve: {e}"));

        let status = service.sync_status().await;
        assert_eq!(status.phase, SyncPhase::Reconciled);
        assert_eq!(status.last_run.and_then(|r| r.updated), Some(1));
        assert_eq!(
            norma_state(&warehouse, 1),
            Some((true, Some("QMS".to_string())))
        );
    }

    #[test]
    fn sync_errors_carry_flags_cleared() {
        let err = SyncError::timed_out(normas_core::model::SyncPhase::Applying, 3);
        let (code, _, data) = sync_error_to_rpc(&err);
        assert_eq!(code, ERR_STORE_UNAVAILABLE);
        assert_eq!(
            data,
            Some(serde_json::json!({
                "category": "STORE_UNAVAILABLE",
                "flags_cleared": false
            }))
        );

        let (code, message, _) = sync_error_to_rpc(&SyncError::ConcurrentSyncInProgress);
        assert_eq!(code, ERR_SYNC_IN_PROGRESS);
        assert_eq!(message, "aplicavel sync already running");
    }
}
