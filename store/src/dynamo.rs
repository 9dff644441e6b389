use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use aws_sdk_dynamodb::{
    types::{
        AttributeDefinition, AttributeValue, KeySchemaElement, KeyType, ProvisionedThroughput,
        PutRequest, ReturnValue, ScalarAttributeType, TableStatus, WriteRequest,
    },
    Client,
};
use tracing::info;

use crate::kv::{KvBackend, KvItem, StoreError, StoreResult, COUNTER_TABLE, COUNTER_TABLE_IOPS};

const KEY_ATTRIBUTE: &str = "Key";
const BODY_ATTRIBUTE: &str = "Body";
const COUNTER_VALUE_ATTRIBUTE: &str = "CounterValue";

const DYNAMO_BATCH_SIZE: usize = 25;
const NUM_PARALLEL_SCANS: i32 = 5;
const SCAN_PAGE_LIMIT: i32 = 1000;

/// Counter numbers are reserved from the persisted value in blocks; reserved
/// but unused numbers are lost on restart.
const COUNTER_BLOCK_SIZE: i64 = 50;

#[derive(Debug, Default)]
struct CounterCell {
    cur: i64,
    max: i64,
}

/// DynamoDB-backed key-value store. Every table keys on the `Key` string
/// attribute and carries the encoded record in `Body`.
#[derive(Debug)]
pub struct DynamoBackend {
    client: Client,
    table_prefix: String,

    // Each counter gets its own async mutex so a block refill for one
    // counter never stalls the others.
    counters: Mutex<HashMap<String, Arc<tokio::sync::Mutex<CounterCell>>>>,
}

impl DynamoBackend {
    pub fn new(client: Client, table_prefix: impl Into<String>) -> Self {
        Self {
            client,
            table_prefix: table_prefix.into(),
            counters: Mutex::new(HashMap::new()),
        }
    }

    fn full_name(&self, table: &str) -> String {
        format!("{}{}", self.table_prefix, table)
    }

    fn counter_cell(&self, name: &str) -> Arc<tokio::sync::Mutex<CounterCell>> {
        let mut counters = self.counters.lock().expect("counter registry poisoned");
        counters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(CounterCell::default())))
            .clone()
    }

    async fn reserve_counter_block(&self, name: &str) -> StoreResult<i64> {
        let output = self
            .client
            .update_item()
            .table_name(self.full_name(COUNTER_TABLE))
            .key(KEY_ATTRIBUTE, AttributeValue::S(name.to_string()))
            .update_expression(format!("ADD {COUNTER_VALUE_ATTRIBUTE} :val"))
            .expression_attribute_values(":val", AttributeValue::N(COUNTER_BLOCK_SIZE.to_string()))
            .return_values(ReturnValue::UpdatedNew)
            .send()
            .await
            .map_err(|e| StoreError::backend(format!("failed to advance counter {name}"), e))?;

        output
            .attributes()
            .and_then(|attrs| attrs.get(COUNTER_VALUE_ATTRIBUTE))
            .and_then(|value| value.as_n().ok())
            .and_then(|value| value.parse::<i64>().ok())
            .ok_or_else(|| {
                StoreError::backend(
                    format!("failed to advance counter {name}"),
                    "no numeric counter value in the update response",
                )
            })
    }

    async fn wait_until_table_active(&self, full_table: &str) -> StoreResult<()> {
        for _ in 0..120 {
            let description = self
                .client
                .describe_table()
                .table_name(full_table)
                .send()
                .await;
            if let Ok(output) = description {
                let active = output
                    .table()
                    .and_then(|t| t.table_status())
                    .map(|status| *status == TableStatus::Active)
                    .unwrap_or(false);
                if active {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Err(StoreError::backend(
            format!("table {full_table} did not become active"),
            "timed out waiting for creation",
        ))
    }
}

fn put_request_key(request: &WriteRequest) -> Option<&str> {
    request
        .put_request()?
        .item()
        .get(KEY_ATTRIBUTE)?
        .as_s()
        .ok()
        .map(String::as_str)
}

#[async_trait]
impl KvBackend for DynamoBackend {
    async fn store_values(&self, table: &str, items: Vec<KvItem>) -> StoreResult<HashSet<String>> {
        let full_table = self.full_name(table);
        let mut accepted = HashSet::with_capacity(items.len());

        for chunk in items.chunks(DYNAMO_BATCH_SIZE) {
            let mut requests = Vec::with_capacity(chunk.len());
            for item in chunk {
                let body = String::from_utf8(item.body.clone()).map_err(|e| {
                    StoreError::backend(format!("non-utf8 record body for {}", item.key), e)
                })?;
                let put = PutRequest::builder()
                    .item(KEY_ATTRIBUTE, AttributeValue::S(item.key.clone()))
                    .item(BODY_ATTRIBUTE, AttributeValue::S(body))
                    .build()
                    .map_err(|e| StoreError::backend("invalid put request", e))?;
                requests.push(WriteRequest::builder().put_request(put).build());
            }

            let mut request_items = HashMap::from([(full_table.clone(), requests)]);
            loop {
                let output = self
                    .client
                    .batch_write_item()
                    .set_request_items(Some(request_items.clone()))
                    .send()
                    .await
                    .map_err(|e| {
                        StoreError::backend(format!("batch write to {full_table} failed"), e)
                    })?;

                for request in request_items.get(&full_table).into_iter().flatten() {
                    if let Some(key) = put_request_key(request) {
                        accepted.insert(key.to_string());
                    }
                }

                // Anything the remote did not process goes around again.
                let unprocessed = output.unprocessed_items().cloned().unwrap_or_default();
                if unprocessed.values().all(|requests| requests.is_empty()) {
                    break;
                }
                for request in unprocessed.get(&full_table).into_iter().flatten() {
                    if let Some(key) = put_request_key(request) {
                        accepted.remove(key);
                    }
                }
                request_items = unprocessed;
            }
        }

        Ok(accepted)
    }

    async fn delete_value(&self, table: &str, key: &str) -> StoreResult<()> {
        let full_table = self.full_name(table);
        self.client
            .delete_item()
            .table_name(&full_table)
            .key(KEY_ATTRIBUTE, AttributeValue::S(key.to_string()))
            .send()
            .await
            .map_err(|e| StoreError::backend(format!("delete of {key} from {full_table}"), e))?;
        Ok(())
    }

    async fn load_table(&self, table: &str) -> StoreResult<Vec<Vec<u8>>> {
        let full_table = self.full_name(table);

        // Scan the table in a number of parallel segments.
        let mut join = tokio::task::JoinSet::new();
        for segment in 0..NUM_PARALLEL_SCANS {
            let client = self.client.clone();
            let table = full_table.clone();
            join.spawn(async move {
                let mut rows: Vec<Vec<u8>> = Vec::new();
                let mut start_key: Option<HashMap<String, AttributeValue>> = None;
                loop {
                    let output = client
                        .scan()
                        .table_name(&table)
                        .consistent_read(true)
                        .segment(segment)
                        .total_segments(NUM_PARALLEL_SCANS)
                        .limit(SCAN_PAGE_LIMIT)
                        .set_exclusive_start_key(start_key.take())
                        .send()
                        .await
                        .map_err(|e| {
                            StoreError::backend(format!("scan of {table} segment {segment}"), e)
                        })?;

                    for item in output.items() {
                        if let Some(body) = item.get(BODY_ATTRIBUTE).and_then(|v| v.as_s().ok()) {
                            rows.push(body.clone().into_bytes());
                        }
                    }

                    match output.last_evaluated_key() {
                        Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                        _ => break,
                    }
                }
                Ok::<_, StoreError>(rows)
            });
        }

        let mut rows = Vec::new();
        while let Some(joined) = join.join_next().await {
            let segment_rows =
                joined.map_err(|e| StoreError::backend("scan task failed", e))??;
            rows.extend(segment_rows);
        }
        Ok(rows)
    }

    async fn get_counter(&self, name: &str) -> StoreResult<i64> {
        let cell = self.counter_cell(name);
        let mut cell = cell.lock().await;

        // Numbers left in the reserved block are handed out locally.
        if cell.cur < cell.max {
            let result = cell.cur;
            cell.cur += 1;
            return Ok(result);
        }

        let new_max = self.reserve_counter_block(name).await?;
        if new_max <= cell.max {
            // Another writer regressed the persisted value, or the counter
            // was reset underneath us. Continuing would hand out duplicate
            // keys, so this is unrecoverable.
            panic!("counter {name} is going backwards ({new_max} <= {})", cell.max);
        }
        cell.max = new_max;

        // The sequence starts at 1; zero is skipped.
        if cell.cur == 0 {
            cell.cur = 1;
        }
        let result = cell.cur;
        cell.cur += 1;
        Ok(result)
    }

    async fn init_schema(&self, tables: &HashMap<&'static str, i64>) -> StoreResult<()> {
        let mut tables_to_create: HashMap<String, i64> = tables
            .iter()
            .map(|(name, iops)| (self.full_name(name), *iops))
            .collect();
        tables_to_create.insert(self.full_name(COUNTER_TABLE), COUNTER_TABLE_IOPS);

        info!("describing tables");
        let mut start_table: Option<String> = None;
        loop {
            let output = self
                .client
                .list_tables()
                .set_exclusive_start_table_name(start_table.take())
                .send()
                .await
                .map_err(|e| StoreError::backend("failed to list tables", e))?;

            for existing in output.table_names() {
                tables_to_create.remove(existing);
            }

            match output.last_evaluated_table_name() {
                Some(name) => start_table = Some(name.to_string()),
                None => break,
            }
        }
        if tables_to_create.is_empty() {
            info!("all tables are up-to-date");
            return Ok(());
        }

        for (full_table, iops) in tables_to_create {
            info!("creating table: {full_table}");
            self.client
                .create_table()
                .table_name(&full_table)
                .attribute_definitions(
                    AttributeDefinition::builder()
                        .attribute_name(KEY_ATTRIBUTE)
                        .attribute_type(ScalarAttributeType::S)
                        .build()
                        .map_err(|e| StoreError::backend("invalid attribute definition", e))?,
                )
                .key_schema(
                    KeySchemaElement::builder()
                        .attribute_name(KEY_ATTRIBUTE)
                        .key_type(KeyType::Hash)
                        .build()
                        .map_err(|e| StoreError::backend("invalid key schema", e))?,
                )
                .provisioned_throughput(
                    ProvisionedThroughput::builder()
                        .read_capacity_units(iops)
                        .write_capacity_units(iops)
                        .build()
                        .map_err(|e| StoreError::backend("invalid throughput", e))?,
                )
                .send()
                .await
                .map_err(|e| StoreError::backend(format!("failed to create {full_table}"), e))?;

            self.wait_until_table_active(&full_table).await?;
        }

        Ok(())
    }
}
