//! Task-facing CLI verbs: submit, list, describe.

use std::collections::HashMap;

use apollo_lib::api::TaskSpec;
use comfy_table::Table;
use tracing::debug;

use crate::{api::ApiClient, ClientError};

/// Parse `k=v` pairs into a map.
pub fn kv_list_to_map(pairs: &[String]) -> Result<HashMap<String, String>, ClientError> {
    let mut map = HashMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(ClientError::Config(format!("format is not 'k=v': {pair}")));
        };
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

pub async fn do_submit(client: &ApiClient, task: TaskSpec) -> Result<(), ClientError> {
    debug!("submitting task: {}", serde_json::to_string(&task)?);

    let response = client.put_task(&task).await?;
    println!("TaskID\t{}", response.task_id);
    Ok(())
}

pub async fn do_list_tasks(
    client: &ApiClient,
    queue: Option<&str>,
    job: Option<&str>,
    json: bool,
) -> Result<(), ClientError> {
    let tasks = client.list_tasks(queue, job, &[], false).await?;

    if json {
        for task in &tasks {
            println!("{}", serde_json::to_string(task)?);
        }
        return Ok(());
    }

    let mut rows: Vec<[String; 7]> = tasks
        .iter()
        .map(|item| {
            let job = item
                .task
                .job
                .as_ref()
                .map(|job| format!("{}\nMF: {}", job.name, job.max_failed_count))
                .unwrap_or_default();
            [
                item.task.queue.clone(),
                item.task_id.clone(),
                render_cmdline(&item.task.cmdline, 40),
                job,
                render_mb(item.task.expected_ram_mb),
                render_mb(item.task.max_ram_mb),
                format!(
                    "{}\nInstances: {}",
                    item.task.can_use_all_cpus,
                    item.task.end_array_index - item.task.start_array_index
                ),
            ]
        })
        .collect();
    rows.sort();

    let mut table = Table::new();
    table.set_header([
        "Queue", "ID", "Cmdline", "Job (+)", "Exp RAM", "Max RAM", "Scales?",
    ]);
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
    println!("(+) MF: - maximum failed count");
    Ok(())
}

pub async fn do_describe_tasks(client: &ApiClient, ids: &[String]) -> Result<(), ClientError> {
    let tasks = client.list_tasks(None, None, ids, true).await?;
    for task in &tasks {
        println!("{}", serde_json::to_string(task)?);
    }
    Ok(())
}

fn render_mb(mb: i64) -> String {
    if mb < 10000 {
        format!("{mb} MB")
    } else {
        format!("{} GB", mb / 1024)
    }
}

fn render_cmdline(cmdline: &[String], max_size: usize) -> String {
    let mut rendered = String::new();
    for piece in cmdline {
        if !rendered.is_empty() {
            rendered.push(' ');
        }
        if piece.contains([' ', '\'']) {
            rendered.push('"');
            rendered.push_str(piece);
            rendered.push('"');
        } else {
            rendered.push_str(piece);
        }
    }
    if rendered.len() > max_size {
        format!("{}...", &rendered[..max_size])
    } else {
        rendered
    }
}
