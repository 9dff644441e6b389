use apollo_lib::{
    api::{PutQueueResponse, Queue, QueueListItem},
    AbsoluteTime,
};
use apollo_store::model::StoredQueue;
use serde::Deserialize;
use tracing::info;
use utoipa::IntoParams;

use crate::{HostError, HostResult, HostState};

pub struct PutQueueProcessor<'a> {
    pub state: &'a HostState,
    pub principal: String,
    pub queue: Queue,
}

impl PutQueueProcessor<'_> {
    pub async fn enact(self) -> HostResult<PutQueueResponse> {
        info!("creating a queue {}", self.queue.name);
        if self.queue.name.is_empty() {
            return Err(HostError::Validation("queue name is required".to_string()));
        }

        let stored = StoredQueue {
            key: self.queue.name.clone(),
            spec: self.queue,
            submitted_on: AbsoluteTime::now(),
            submitted_by: self.principal,
        };
        let name = stored.key.clone();
        self.state.queues.store(stored).await?;

        Ok(PutQueueResponse { queue_name: name })
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct QueueListQuery {
    pub queue: Option<String>,
}

pub struct ListQueuesProcessor<'a> {
    pub state: &'a HostState,
    pub query: QueueListQuery,
}

impl ListQueuesProcessor<'_> {
    pub async fn enact(self) -> HostResult<Vec<QueueListItem>> {
        let ids: Vec<String> = self.query.queue.into_iter().collect();
        let queues = self.state.queues.list(&ids, |_| true).await;

        Ok(queues
            .into_iter()
            .map(|queue| QueueListItem {
                host_count: 0,
                queue: queue.spec,
            })
            .collect())
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DeleteQueueQuery {
    pub queue: String,
}

pub struct DeleteQueueProcessor<'a> {
    pub state: &'a HostState,
    pub queue: String,
}

impl DeleteQueueProcessor<'_> {
    pub async fn enact(self) -> HostResult<()> {
        info!("deleting a queue {}", self.queue);

        // Queue exclusive first, then the task table: no new task can
        // commit against the queue while it is checked and removed.
        let mut queues = self.state.queues.exclusive().await;
        let tasks = self.state.tasks.shared().await;

        let in_use = tasks.values().any(|task| task.spec.queue == self.queue);
        if in_use {
            return Err(HostError::Conflict(format!(
                "queue {} is still in use",
                self.queue
            )));
        }

        self.state
            .queues
            .delete_unlocked(&mut queues, &self.queue)
            .await?;
        drop(tasks);
        drop(queues);
        Ok(())
    }
}
