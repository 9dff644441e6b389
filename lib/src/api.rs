//! Wire-level types shared by the server, the CLI client and the node
//! runner. All request and response bodies are JSON.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::time::AbsoluteTime;

/// Bearer-token header checked on every authenticated operation.
pub const TOKEN_HEADER: &str = "X-Apollo-Token";
/// Correlation id; generated client-side when absent, echoed by the server.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// The structured error body returned for every failed operation. The HTTP
/// status mirrors `code`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// base64 of the complete serialized signed identity request.
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub encrypted_auth_token: String,
    pub encrypted_certificate: String,
    /// base64 of the server's ephemeral Curve25519 public key.
    pub server_public_key: String,
    pub valid_until: AbsoluteTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NodeTokenResponse {
    pub auth_token: String,
    /// Delimiter-stripped PEM of the server certificate.
    pub certificate: String,
}

/// A named, docker-configured bucket that tasks are submitted into and
/// worker nodes attach to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Queue {
    pub name: String,
    pub launch_template_id: String,
    pub instance_types: Vec<String>,
    pub docker_repository: String,
    pub docker_login: String,
    pub docker_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PutQueueResponse {
    pub queue_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueueListItem {
    pub host_count: i64,
    pub queue: Queue,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobSpec {
    pub name: String,
    /// How many instances may fail before the job is failed; -1 is no limit.
    pub max_failed_count: i64,
}

/// A task array: one logical submission expanding into
/// `end_array_index - start_array_index` instances.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct TaskSpec {
    pub queue: String,
    pub cmdline: Vec<String>,
    pub pwd: String,
    pub start_array_index: i64,
    pub end_array_index: i64,
    pub job: Option<JobSpec>,
    pub task_deps: Vec<String>,
    pub subtask_deps: Vec<String>,
    pub max_ram_mb: i64,
    pub expected_ram_mb: i64,
    pub docker_image_id: String,
    pub repo: String,
    pub task_env: HashMap<String, String>,
    pub tags: HashMap<String, String>,
    pub can_use_all_cpus: bool,
    pub timeout_seconds: i64,
    pub retries: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PutTaskResponse {
    pub task_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskListItem {
    pub task_id: String,
    pub task: TaskSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum NodeState {
    Initializing,
    Ready,
    Draining,
    Terminated,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct DiskInfo {
    pub mount_point: String,
    pub total_mb: i64,
    pub available_mb: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct NodeInfo {
    pub cpu_count: i64,
    pub ram_total_mb: i64,
    pub disks: Vec<DiskInfo>,
    pub uptime_sec: i64,
    pub uptime_idle_sec: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PutUnmanagedNodeRequest {
    pub node_id: String,
    pub queue: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NodeListItem {
    pub node_id: String,
    pub managed: bool,
    pub state: NodeState,
    pub info: NodeInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NodeStateRequest {
    pub node_id: String,
    pub info: NodeInfo,
}
