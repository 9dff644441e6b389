use apollo_lib::{
    api::{NodeInfo, NodeListItem, NodeState, NodeStateRequest, PutUnmanagedNodeRequest},
    AbsoluteTime,
};
use apollo_store::model::StoredNode;
use serde::Deserialize;
use tracing::info;
use utoipa::IntoParams;

use crate::{HostError, HostResult, HostState};

/// Self-registration of a worker host the control plane does not manage.
pub struct PutUnmanagedNodeProcessor<'a> {
    pub state: &'a HostState,
    pub node: PutUnmanagedNodeRequest,
}

impl PutUnmanagedNodeProcessor<'_> {
    pub async fn enact(self) -> HostResult<()> {
        info!("registering unmanaged node {}", self.node.node_id);

        let queues = self.state.queues.exclusive().await;
        let mut nodes = self.state.nodes.exclusive().await;

        if !queues.contains_key(&self.node.queue) {
            return Err(HostError::Validation(format!(
                "queue is not found: {}",
                self.node.queue
            )));
        }
        if let Some(existing) = nodes.get(&self.node.node_id) {
            // A node's queue is fixed for its lifetime.
            if existing.queue != self.node.queue {
                return Err(HostError::Conflict(
                    "there's an existing node with conflicting queue".to_string(),
                ));
            }
        }

        let now = AbsoluteTime::now();
        let node = StoredNode {
            key: self.node.node_id.clone(),
            queue: self.node.queue,
            // Self-registered hosts are their own cloud instance.
            cloud_id: self.node.node_id,
            managed: false,
            state: NodeState::Initializing,
            created_on: now,
            last_transition_time: now,
            info: NodeInfo::default(),
        };
        self.state.nodes.store_unlocked(&mut nodes, node).await?;

        drop(nodes);
        drop(queues);
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct NodeListQuery {
    pub node_id: Option<String>,
    pub queue_name: Option<String>,
}

pub struct ListNodesProcessor<'a> {
    pub state: &'a HostState,
    pub query: NodeListQuery,
}

impl ListNodesProcessor<'_> {
    pub async fn enact(self) -> HostResult<Vec<NodeListItem>> {
        let ids: Vec<String> = self.query.node_id.into_iter().collect();
        let nodes = self
            .state
            .nodes
            .list(&ids, |node| {
                self.query
                    .queue_name
                    .as_ref()
                    .map(|queue| &node.queue == queue)
                    .unwrap_or(true)
            })
            .await;

        Ok(nodes
            .into_iter()
            .map(|node| NodeListItem {
                node_id: node.key,
                managed: node.managed,
                state: node.state,
                info: node.info,
            })
            .collect())
    }
}

/// Heartbeat with periodic full state: persist the latest node telemetry.
pub struct PostNodeStateProcessor<'a> {
    pub state: &'a HostState,
    pub body: NodeStateRequest,
}

impl PostNodeStateProcessor<'_> {
    pub async fn enact(self) -> HostResult<()> {
        let mut nodes = self.state.nodes.exclusive().await;
        let Some(mut node) = nodes.get(&self.body.node_id).cloned() else {
            return Err(HostError::Validation(format!(
                "node is not registered: {}",
                self.body.node_id
            )));
        };

        node.info = self.body.info;
        self.state.nodes.store_unlocked(&mut nodes, node).await?;
        Ok(())
    }
}
