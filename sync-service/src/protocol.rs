//! IPC protocol types for the sync service.
//!
//! Wire format is JSON-RPC-lite: one JSON object per line, `id` echoed back,
//! `result` on success, `error { code, message, data? }` on failure. The
//! `jsonrpc` version member is accepted but never required.

use normas_core::model::{Classification, ManagementSystemCount, Norma, SyncPhase};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Error codes (JSON-RPC error.code)
// ─────────────────────────────────────────────────────────────────────────────

/// Standard JSON-RPC errors.
pub const ERR_INVALID_REQUEST: i64 = -32600;
pub const ERR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERR_INVALID_PARAMS: i64 = -32602;
pub const ERR_INTERNAL: i64 = -32603;

/// Sync-specific error codes.
pub const ERR_SYNC_IN_PROGRESS: i64 = 100;
pub const ERR_SOURCE_UNAVAILABLE: i64 = 300;
pub const ERR_STORE_UNAVAILABLE: i64 = 301;
pub const ERR_NOT_FOUND: i64 = 404;

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Integer(i64),
    String(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: RequestId,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub id: RequestId,
    pub error: RpcErrorBody,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloParams {
    pub protocol_version: String,
    pub client_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResult {
    pub protocol_version: String,
    pub service_version: String,
    pub capabilities: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// sync.run / sync.status / sync.orphans
// ─────────────────────────────────────────────────────────────────────────────
//
// Results are the core types (`SyncOutcome`, `SyncStatus`, `OrphanReport`)
// serialized as-is. A failed `sync.run` carries this in `error.data`.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncErrorData {
    pub category: String,
    pub flags_cleared: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// normas.get
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormasGetParams {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormaDetail {
    #[serde(flatten)]
    pub norma: Norma,
    pub management_systems_classifications: Vec<Classification>,
}

// ─────────────────────────────────────────────────────────────────────────────
// management_systems.list
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementSystemsResult {
    pub systems: Vec<ManagementSystemCount>,
}

// ─────────────────────────────────────────────────────────────────────────────
// service.status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusResult {
    pub uptime_s: u64,
    pub sync_running: bool,
    pub sync_phase: SyncPhase,
    pub schedule_enabled: bool,
    pub schedule_interval_secs: u64,
    /// RFC3339; absent when the schedule is disabled or not yet armed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_scheduled_run: Option<String>,
}
