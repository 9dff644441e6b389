//! Queue-facing CLI verbs.

use std::io::Read;

use apollo_lib::api::Queue;
use comfy_table::Table;

use crate::{api::ApiClient, ClientError};

/// `apollo put-queue`; a docker password of `-` is read from stdin.
pub async fn do_put_queue(client: &ApiClient, mut queue: Queue) -> Result<(), ClientError> {
    if queue.docker_password == "-" {
        let mut password = String::new();
        std::io::stdin().read_to_string(&mut password)?;
        queue.docker_password = password.trim().to_string();
    }

    let response = client.put_queue(&queue).await?;
    println!("OK\t{}", response.queue_name);
    Ok(())
}

pub async fn do_list_queues(
    client: &ApiClient,
    name: Option<&str>,
    json: bool,
) -> Result<(), ClientError> {
    let queues = client.list_queues(name).await?;

    if json {
        for queue in &queues {
            println!("{}", serde_json::to_string(queue)?);
        }
        return Ok(());
    }

    let mut rows: Vec<[String; 6]> = queues
        .iter()
        .map(|item| {
            [
                item.queue.name.clone(),
                item.queue.launch_template_id.clone(),
                item.queue.instance_types.join(","),
                item.queue.docker_repository.clone(),
                item.queue.docker_login.clone(),
                item.host_count.to_string(),
            ]
        })
        .collect();
    rows.sort();

    let mut table = Table::new();
    table.set_header([
        "Queue",
        "Launch Template ID",
        "Instance Types",
        "Docker Repo",
        "Docker Login",
        "Host Count",
    ]);
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
    Ok(())
}

pub async fn do_delete_queue(client: &ApiClient, name: &str) -> Result<(), ClientError> {
    client.delete_queue(name).await?;
    println!("DELETED\t{name}");
    Ok(())
}
