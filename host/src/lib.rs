//! The Apollo control plane: authentication and token issuance, the
//! queue/task/node registries over the KV backend, the TLS bootstrap and
//! the HTTPS API server.

pub mod auth;
pub mod error;
pub mod processors;
pub mod reaper;
pub mod server;
pub mod tls;

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use anyhow::Context;
use apollo_sigv4::{get_my_account_id, sts_endpoint};
use apollo_store::{
    model::{NODE_TABLE, QUEUE_TABLE, TASK_INSTANCE_TABLE, TASK_TABLE, TOKEN_TABLE},
    DynamoBackend, KvBackend, MemoryBackend, NodeStore, QueueStore, TaskStore, TokenStore,
};
use aws_config::Region;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::tls::{TlsManager, CERT_STORE_TABLE};

pub use error::{ApiError, HostError, HostResult};

#[derive(Debug, Parser)]
#[command(name = "apollo-host", about = "The Apollo compute-task scheduler control plane")]
pub struct Opts {
    /// Path to the YAML configuration file.
    #[arg(long, short = 'c')]
    pub config_file: Option<PathBuf>,

    #[arg(long, short = 'v', default_value_t = false)]
    pub verbose: bool,

    /// Override listen.interface from the configuration.
    #[arg(long)]
    pub interface: Option<String>,

    /// Override listen.port from the configuration.
    #[arg(long)]
    pub port: Option<u16>,

    /// Override listen.certfile from the configuration.
    #[arg(long)]
    pub certfile: Option<String>,

    /// Override listen.keyfile from the configuration.
    #[arg(long)]
    pub keyfile: Option<String>,
}

impl Opts {
    /// Load the configuration file and apply the flag overrides on top.
    pub fn load_config(&self) -> anyhow::Result<HostConfig> {
        let candidates = match &self.config_file {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from("apollo-config.yaml")];
                if let Some(home) = std::env::var_os("HOME") {
                    paths.push(PathBuf::from(home).join(".apollo/apollo-config.yaml"));
                }
                paths
            }
        };

        let path = candidates
            .iter()
            .find(|path| path.exists())
            .with_context(|| {
                format!(
                    "no configuration file found (looked at {})",
                    candidates
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })?;

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: HostConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        if let Some(interface) = &self.interface {
            config.listen.interface = interface.clone();
        }
        if let Some(port) = self.port {
            config.listen.port = port;
        }
        if let Some(certfile) = &self.certfile {
            config.listen.certfile = certfile.clone();
        }
        if let Some(keyfile) = &self.keyfile {
            config.listen.keyfile = keyfile.clone();
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub aws: AwsSection,
    pub database: DatabaseSection,
    pub listen: ListenSection,
    pub server: ServerSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSection {
    pub profile: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// `ddb` or `mem`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Prefix applied to every table name.
    pub prefix: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            kind: "ddb".to_string(),
            prefix: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenSection {
    pub interface: String,
    pub port: u16,
    /// `auto` provisions the certificate through the cert store.
    pub certfile: String,
    pub keyfile: String,
    /// Peer to fetch the cluster CA from; `self` means this instance owns
    /// the certificate.
    #[serde(rename = "probe-host")]
    pub probe_host: String,
}

impl Default for ListenSection {
    fn default() -> Self {
        Self {
            interface: "0.0.0.0".to_string(),
            port: 9443,
            certfile: "auto".to_string(),
            keyfile: "auto".to_string(),
            probe_host: "self".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Accounts allowed to log in; `self` resolves to the server's own
    /// account at boot.
    #[serde(rename = "whitelisted-accounts")]
    pub whitelisted_accounts: Vec<String>,
}

/// Expected operations per second for each table, used when the schema is
/// first created.
pub fn schema_iops() -> HashMap<&'static str, i64> {
    HashMap::from([
        (CERT_STORE_TABLE, 5),
        (TOKEN_TABLE, 10),
        (TASK_TABLE, 10),
        (TASK_INSTANCE_TABLE, 10),
        (QUEUE_TABLE, 5),
        (NODE_TABLE, 5),
    ])
}

/// Everything a request handler needs, shared across the server.
#[derive(Clone)]
pub struct HostState {
    pub kv: Arc<dyn KvBackend>,
    pub tokens: Arc<TokenStore>,
    pub queues: Arc<QueueStore>,
    pub nodes: Arc<NodeStore>,
    pub tasks: Arc<TaskStore>,
    pub whitelist: Arc<HashMap<String, String>>,
    pub http: reqwest::Client,
    pub sts_endpoint: Url,
    /// Delimiter-stripped PEM of the cluster certificate, shipped to
    /// clients at login time.
    pub server_cert: Arc<String>,
}

impl HostState {
    pub fn new(
        kv: Arc<dyn KvBackend>,
        server_cert: String,
        whitelist: HashMap<String, String>,
        sts_endpoint: Url,
    ) -> Self {
        Self {
            tokens: Arc::new(TokenStore::new(kv.clone())),
            queues: Arc::new(QueueStore::new(kv.clone())),
            nodes: Arc::new(NodeStore::new(kv.clone())),
            tasks: Arc::new(TaskStore::new(kv.clone())),
            kv,
            whitelist: Arc::new(whitelist),
            http: reqwest::Client::new(),
            sts_endpoint,
            server_cert: Arc::new(server_cert),
        }
    }

    pub async fn hydrate(&self) -> anyhow::Result<()> {
        self.tokens.hydrate().await?;
        self.tasks.hydrate().await?;
        self.queues.hydrate().await?;
        self.nodes.hydrate().await?;
        Ok(())
    }
}

/// Build the dependency registry: AWS context, KV backend and schema, TLS
/// material, stores and the account whitelist.
pub async fn init_state(config: &HostConfig) -> anyhow::Result<(HostState, TlsManager)> {
    info!("initializing the registry");

    let mut aws_loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(profile) = &config.aws.profile {
        aws_loader = aws_loader.profile_name(profile);
    }
    if let Some(region) = &config.aws.region {
        aws_loader = aws_loader.region(Region::new(region.clone()));
    }
    let sdk_config = aws_loader.load().await;

    info!("using store type: {}", config.database.kind);
    let kv: Arc<dyn KvBackend> = match config.database.kind.as_str() {
        "ddb" => Arc::new(DynamoBackend::new(
            aws_sdk_dynamodb::Client::new(&sdk_config),
            config.database.prefix.clone(),
        )),
        "mem" => Arc::new(MemoryBackend::new()),
        other => anyhow::bail!("unknown store type {other}"),
    };

    info!("initializing the schema");
    kv.init_schema(&schema_iops()).await?;

    let tls = TlsManager::init(kv.clone(), &config.listen).await?;

    let region = config
        .aws
        .region
        .clone()
        .or_else(|| sdk_config.region().map(|r| r.as_ref().to_string()))
        .unwrap_or_else(|| "us-east-1".to_string());

    let mut whitelist = HashMap::new();
    for account in &config.server.whitelisted_accounts {
        let account = if account == "self" {
            get_my_account_id(&sdk_config).await?
        } else {
            account.clone()
        };
        whitelist.insert(account.clone(), account);
    }

    let state = HostState::new(
        kv,
        tls.server_cert().to_string(),
        whitelist,
        sts_endpoint(&region),
    );

    info!("hydrating the in-memory stores");
    state.hydrate().await?;

    Ok((state, tls))
}
