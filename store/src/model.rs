//! The stored records backing the control plane: tokens, queues, nodes and
//! task arrays. The persistent KV is the authoritative copy; the in-memory
//! indexes are rebuilt from it at boot.

use apollo_lib::{
    api::{NodeInfo, NodeState, Queue, TaskSpec},
    AbsoluteTime,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entity::Entity;

pub const TOKEN_TABLE: &str = "token_store";
pub const QUEUE_TABLE: &str = "queue";
pub const NODE_TABLE: &str = "node";
pub const TASK_TABLE: &str = "task";
pub const TASK_INSTANCE_TABLE: &str = "task_instance";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum TokenType {
    User,
    Node,
    Task,
}

/// Authentication token; each type is linked to a different entity: a user
/// account, a node or a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuthToken {
    pub key: String,
    pub expires: AbsoluteTime,
    pub token_type: TokenType,
    /// The entity this token is linked to: the account id for user tokens,
    /// the node id for node tokens, the task id for task tokens.
    pub entity_key: String,
    pub requested_by: String,
    pub requested_on: AbsoluteTime,
}

impl AuthToken {
    /// Render the principal as `<type>/<entity>` for audit fields.
    pub fn render_entity(&self) -> String {
        let prefix = match self.token_type {
            TokenType::User => "user",
            TokenType::Node => "node",
            TokenType::Task => "task",
        };
        format!("{}/{}", prefix, self.entity_key)
    }
}

impl Entity for AuthToken {
    const TABLE: &'static str = TOKEN_TABLE;

    fn primary_key(&self) -> &str {
        &self.key
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredQueue {
    pub key: String,
    pub spec: Queue,
    pub submitted_on: AbsoluteTime,
    pub submitted_by: String,
}

impl Entity for StoredQueue {
    const TABLE: &'static str = QUEUE_TABLE;

    fn primary_key(&self) -> &str {
        &self.key
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredNode {
    pub key: String,
    pub queue: String,
    pub cloud_id: String,
    pub managed: bool,
    pub state: NodeState,
    pub created_on: AbsoluteTime,
    pub last_transition_time: AbsoluteTime,
    pub info: NodeInfo,
}

impl Entity for StoredNode {
    const TABLE: &'static str = NODE_TABLE;

    fn primary_key(&self) -> &str {
        &self.key
    }
}

/// A task array: multiple instances that differ only by their index within
/// the parent submission.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredTask {
    pub key: String,
    pub spec: TaskSpec,
    pub submitted_on: AbsoluteTime,
    pub submitted_by: String,
}

impl Entity for StoredTask {
    const TABLE: &'static str = TASK_TABLE;

    fn primary_key(&self) -> &str {
        &self.key
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskInstance {
    pub key: String,
    pub parent_key: String,
    /// Position within `[start_array_index, end_array_index)`.
    pub index: i64,
    pub exit_code: Option<i64>,
    pub retry_num: i64,
}

impl Entity for TaskInstance {
    const TABLE: &'static str = TASK_INSTANCE_TABLE;

    fn primary_key(&self) -> &str {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apollo_lib::NEVER_EXPIRES;

    #[test]
    fn render_entity_formats() {
        let mut token = AuthToken {
            key: "k".into(),
            expires: NEVER_EXPIRES,
            token_type: TokenType::User,
            entity_key: "158005755667".into(),
            requested_by: "account/158005755667".into(),
            requested_on: AbsoluteTime(0),
        };
        assert_eq!(token.render_entity(), "user/158005755667");

        token.token_type = TokenType::Node;
        token.entity_key = "i-1234".into();
        assert_eq!(token.render_entity(), "node/i-1234");

        token.token_type = TokenType::Task;
        token.entity_key = "42".into();
        assert_eq!(token.render_entity(), "task/42");
    }

    #[test]
    fn entity_codec_round_trip() {
        let task = StoredTask {
            key: "17".into(),
            spec: TaskSpec {
                queue: "builds".into(),
                cmdline: vec!["echo".into(), "hi".into()],
                end_array_index: 4,
                ..TaskSpec::default()
            },
            submitted_on: AbsoluteTime(1000),
            submitted_by: "user/123".into(),
        };
        let decoded = StoredTask::decode_from_bytes(&task.encode_to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.key, "17");
        assert_eq!(decoded.spec.cmdline, task.spec.cmdline);
        assert_eq!(decoded.spec.end_array_index, 4);
    }
}
