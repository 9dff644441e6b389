use std::collections::HashMap;

use apollo_lib::{
    api::{PutTaskResponse, TaskListItem, TaskSpec},
    AbsoluteTime,
};
use apollo_store::model::{AuthToken, StoredTask};
use serde::Deserialize;
use tracing::info;
use utoipa::IntoParams;

use crate::{HostError, HostResult, HostState};

pub const TASK_COUNTER: &str = "TaskCounter";

pub struct SubmitTaskProcessor<'a> {
    pub state: &'a HostState,
    pub principal: AuthToken,
    pub task: TaskSpec,
}

impl SubmitTaskProcessor<'_> {
    pub async fn enact(self) -> HostResult<PutTaskResponse> {
        let id = self.state.kv.get_counter(TASK_COUNTER).await?;

        if self.task.start_array_index >= self.task.end_array_index {
            return Err(HostError::Validation(
                "end index is not bigger than the start index".to_string(),
            ));
        }
        if self.task.expected_ram_mb > self.task.max_ram_mb {
            return Err(HostError::Validation(
                "expected RAM is bigger than max RAM".to_string(),
            ));
        }
        if self.task.cmdline.is_empty() {
            return Err(HostError::Validation(
                "task command line is required".to_string(),
            ));
        }

        // Pin the queue table so the queue cannot be deleted while this
        // submission is in flight.
        let queues = self.state.queues.shared().await;
        if !queues.contains_key(&self.task.queue) {
            return Err(HostError::Validation(format!(
                "task queue is not found: {}",
                self.task.queue
            )));
        }

        let stored = StoredTask {
            key: id.to_string(),
            spec: self.task,
            submitted_on: AbsoluteTime::now(),
            submitted_by: self.principal.render_entity(),
        };
        info!("storing new task {}", stored.key);
        let task_id = stored.key.clone();
        self.state.tasks.store(stored).await?;
        drop(queues);

        Ok(PutTaskResponse { task_id })
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TaskListQuery {
    pub queue: Option<String>,
    pub job: Option<String>,
    /// Comma-separated task ids.
    pub id: Option<String>,
    pub with_env: Option<bool>,
}

pub struct ListTasksProcessor<'a> {
    pub state: &'a HostState,
    pub query: TaskListQuery,
}

impl ListTasksProcessor<'_> {
    pub async fn enact(self) -> HostResult<Vec<TaskListItem>> {
        let ids: Vec<String> = self
            .query
            .id
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let tasks = self
            .state
            .tasks
            .list(&ids, |task| {
                if let Some(job) = &self.query.job {
                    if task.spec.job.as_ref().map(|j| j.name.as_str()) != Some(job.as_str()) {
                        return false;
                    }
                }
                if let Some(queue) = &self.query.queue {
                    if &task.spec.queue != queue {
                        return false;
                    }
                }
                true
            })
            .await;

        let with_env = self.query.with_env.unwrap_or(false);
        Ok(tasks
            .into_iter()
            .map(|task| {
                let mut spec = task.spec;
                if !with_env {
                    // The environment can be large and may carry secrets;
                    // it is only shipped when explicitly requested.
                    spec.task_env = HashMap::new();
                }
                TaskListItem {
                    task_id: task.key,
                    task: spec,
                }
            })
            .collect())
    }
}
