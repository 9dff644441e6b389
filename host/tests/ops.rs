//! Queue/task/node operations exercised over the in-memory backend.

use std::collections::HashMap;
use std::sync::Arc;

use apollo_host::{
    processors::{
        login::NodeTokenProcessor,
        node::{
            ListNodesProcessor, NodeListQuery, PostNodeStateProcessor, PutUnmanagedNodeProcessor,
        },
        queue::{DeleteQueueProcessor, ListQueuesProcessor, PutQueueProcessor, QueueListQuery},
        task::{ListTasksProcessor, SubmitTaskProcessor, TaskListQuery},
    },
    schema_iops, HostError, HostState,
};
use apollo_lib::{
    api::{NodeInfo, NodeStateRequest, PutUnmanagedNodeRequest, Queue, TaskSpec},
    AbsoluteTime, NEVER_EXPIRES,
};
use apollo_sigv4::sts_endpoint;
use apollo_store::{
    model::{AuthToken, TokenType},
    KvBackend, MemoryBackend,
};

async fn test_state() -> HostState {
    let kv: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
    kv.init_schema(&schema_iops()).await.unwrap();
    HostState::new(
        kv,
        "CERTBODY".to_string(),
        HashMap::new(),
        sts_endpoint("us-east-1"),
    )
}

fn user_principal() -> AuthToken {
    AuthToken {
        key: "principal-key".to_string(),
        expires: NEVER_EXPIRES,
        token_type: TokenType::User,
        entity_key: "158005755667".to_string(),
        requested_by: "account/158005755667".to_string(),
        requested_on: AbsoluteTime::now(),
    }
}

async fn put_queue(state: &HostState, name: &str) {
    PutQueueProcessor {
        state,
        principal: user_principal().render_entity(),
        queue: Queue {
            name: name.to_string(),
            launch_template_id: "lt-1234".to_string(),
            instance_types: vec!["m5.large".to_string()],
            ..Queue::default()
        },
    }
    .enact()
    .await
    .unwrap();
}

fn task_for(queue: &str) -> TaskSpec {
    TaskSpec {
        queue: queue.to_string(),
        cmdline: vec!["echo".to_string(), "hi".to_string()],
        pwd: "/tmp".to_string(),
        start_array_index: 0,
        end_array_index: 1,
        max_ram_mb: 1024,
        expected_ram_mb: 512,
        ..TaskSpec::default()
    }
}

async fn submit(state: &HostState, task: TaskSpec) -> Result<String, HostError> {
    SubmitTaskProcessor {
        state,
        principal: user_principal(),
        task,
    }
    .enact()
    .await
    .map(|response| response.task_id)
}

#[tokio::test]
async fn queue_delete_refused_while_in_use() {
    let state = test_state().await;
    put_queue(&state, "builds").await;
    let task_id = submit(&state, task_for("builds")).await.unwrap();

    let err = DeleteQueueProcessor {
        state: &state,
        queue: "builds".to_string(),
    }
    .enact()
    .await
    .unwrap_err();
    assert!(matches!(err, HostError::Conflict(_)), "got {err:?}");

    // Remove the task row, then deletion goes through.
    let mut tasks = state.tasks.exclusive().await;
    state.tasks.delete_unlocked(&mut tasks, &task_id).await.unwrap();
    drop(tasks);

    DeleteQueueProcessor {
        state: &state,
        queue: "builds".to_string(),
    }
    .enact()
    .await
    .unwrap();

    let queues = ListQueuesProcessor {
        state: &state,
        query: QueueListQuery { queue: None },
    }
    .enact()
    .await
    .unwrap();
    assert!(queues.is_empty());
}

#[tokio::test]
async fn task_keys_come_from_the_counter() {
    let state = test_state().await;
    put_queue(&state, "builds").await;

    assert_eq!(submit(&state, task_for("builds")).await.unwrap(), "1");
    assert_eq!(submit(&state, task_for("builds")).await.unwrap(), "2");
    assert_eq!(submit(&state, task_for("builds")).await.unwrap(), "3");
}

#[tokio::test]
async fn task_validation_rejections() {
    let state = test_state().await;
    put_queue(&state, "builds").await;

    let mut bad_indices = task_for("builds");
    bad_indices.start_array_index = 5;
    bad_indices.end_array_index = 5;
    assert!(matches!(
        submit(&state, bad_indices).await.unwrap_err(),
        HostError::Validation(_)
    ));

    let mut bad_ram = task_for("builds");
    bad_ram.expected_ram_mb = 2048;
    assert!(matches!(
        submit(&state, bad_ram).await.unwrap_err(),
        HostError::Validation(_)
    ));

    let unknown_queue = task_for("missing");
    assert!(matches!(
        submit(&state, unknown_queue).await.unwrap_err(),
        HostError::Validation(_)
    ));

    let mut empty_cmdline = task_for("builds");
    empty_cmdline.cmdline.clear();
    assert!(matches!(
        submit(&state, empty_cmdline).await.unwrap_err(),
        HostError::Validation(_)
    ));
}

#[tokio::test]
async fn task_listing_filters_and_strips_env() {
    let state = test_state().await;
    put_queue(&state, "builds").await;
    put_queue(&state, "tests").await;

    let mut with_env = task_for("builds");
    with_env.task_env.insert("SECRET".to_string(), "hunter2".to_string());
    let env_task_id = submit(&state, with_env).await.unwrap();
    submit(&state, task_for("tests")).await.unwrap();

    // Default listing strips the environment.
    let listed = ListTasksProcessor {
        state: &state,
        query: TaskListQuery {
            queue: Some("builds".to_string()),
            ..TaskListQuery::default()
        },
    }
    .enact()
    .await
    .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].task_id, env_task_id);
    assert!(listed[0].task.task_env.is_empty());

    // The stored record keeps its environment: the strip is on a copy.
    let describe = ListTasksProcessor {
        state: &state,
        query: TaskListQuery {
            id: Some(env_task_id.clone()),
            with_env: Some(true),
            ..TaskListQuery::default()
        },
    }
    .enact()
    .await
    .unwrap();
    assert_eq!(describe.len(), 1);
    assert_eq!(describe[0].task.task_env.get("SECRET").unwrap(), "hunter2");

    // Unknown ids in the intersection are skipped.
    let some = ListTasksProcessor {
        state: &state,
        query: TaskListQuery {
            id: Some(format!("{env_task_id},nope")),
            ..TaskListQuery::default()
        },
    }
    .enact()
    .await
    .unwrap();
    assert_eq!(some.len(), 1);
}

async fn register(state: &HostState, node_id: &str, queue: &str) -> Result<(), HostError> {
    PutUnmanagedNodeProcessor {
        state,
        node: PutUnmanagedNodeRequest {
            node_id: node_id.to_string(),
            queue: queue.to_string(),
        },
    }
    .enact()
    .await
}

#[tokio::test]
async fn unmanaged_node_registration() {
    let state = test_state().await;
    put_queue(&state, "builds").await;
    put_queue(&state, "tests").await;

    register(&state, "i-abc123", "builds").await.unwrap();
    // Re-registration with the same queue is idempotent.
    register(&state, "i-abc123", "builds").await.unwrap();
    // Re-registration with a different queue is refused.
    assert!(matches!(
        register(&state, "i-abc123", "tests").await.unwrap_err(),
        HostError::Conflict(_)
    ));
    // The queue must exist.
    assert!(matches!(
        register(&state, "i-def456", "missing").await.unwrap_err(),
        HostError::Validation(_)
    ));

    let nodes = ListNodesProcessor {
        state: &state,
        query: NodeListQuery {
            queue_name: Some("builds".to_string()),
            ..NodeListQuery::default()
        },
    }
    .enact()
    .await
    .unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].node_id, "i-abc123");
    assert!(!nodes[0].managed);
}

#[tokio::test]
async fn node_tokens_never_expire_and_are_retrievable() {
    let state = test_state().await;

    let response = NodeTokenProcessor {
        state: &state,
        principal: user_principal(),
        node_id: "i-abc123".to_string(),
    }
    .enact()
    .await
    .unwrap();
    assert_eq!(response.certificate, "CERTBODY");

    let token = state.tokens.token_by_key(&response.auth_token).await.unwrap();
    assert_eq!(token.expires, NEVER_EXPIRES);
    assert_eq!(token.token_type, TokenType::Node);
    assert_eq!(token.entity_key, "i-abc123");
    assert_eq!(token.requested_by, "user/158005755667");
}

#[tokio::test]
async fn node_state_updates_telemetry() {
    let state = test_state().await;
    put_queue(&state, "builds").await;
    PutUnmanagedNodeProcessor {
        state: &state,
        node: PutUnmanagedNodeRequest {
            node_id: "i-abc123".to_string(),
            queue: "builds".to_string(),
        },
    }
    .enact()
    .await
    .unwrap();

    PostNodeStateProcessor {
        state: &state,
        body: NodeStateRequest {
            node_id: "i-abc123".to_string(),
            info: NodeInfo {
                cpu_count: 8,
                ram_total_mb: 32768,
                uptime_sec: 120,
                ..NodeInfo::default()
            },
        },
    }
    .enact()
    .await
    .unwrap();

    let node = state.nodes.get("i-abc123").await.unwrap();
    assert_eq!(node.info.cpu_count, 8);
    assert_eq!(node.info.ram_total_mb, 32768);

    // Telemetry for an unregistered node is rejected.
    let err = PostNodeStateProcessor {
        state: &state,
        body: NodeStateRequest {
            node_id: "i-unknown".to_string(),
            info: NodeInfo::default(),
        },
    }
    .enact()
    .await
    .unwrap_err();
    assert!(matches!(err, HostError::Validation(_)));
}
