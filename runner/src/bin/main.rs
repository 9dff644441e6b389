use std::{process::ExitCode, sync::Arc, time::Duration};

use apollo_client::{api::ApiClient, login::send_sigv4_login};
use apollo_lib::conn::{ConnectionInfo, CONNECTION_ENV};
use apollo_runner::{notify::notify_ready, run_until_done, RunnerContext};
use clap::Parser;
use tracing::{error, info};

// TODO: discover the node id from the instance metadata service.
const NODE_ID: &str = "11";

#[derive(Parser)]
#[command(name = "aporunner", about = "The Apollo node runner")]
struct Cli {
    /// AWS profile.
    #[arg(long, short = 'p', default_value = "default")]
    profile: String,

    /// Server's host and port.
    #[arg(long, short = 's', default_value = "")]
    host: String,

    /// The node suicide delay if the connection is lost; 0 disables it.
    #[arg(long = "suicide-delay-sec", default_value_t = 2000)]
    suicide_delay_sec: u64,

    /// Verbose output.
    #[arg(long, short = 'v')]
    verbose: bool,
}

async fn connect_runner(cli: &Cli) -> anyhow::Result<ApiClient> {
    if !cli.host.is_empty() {
        // No connection token yet: run the SigV4 login flow first.
        let outcome = send_sigv4_login(&cli.profile, &cli.host).await?;
        let connection = format!(
            "{}#{}#{}",
            outcome.server_url, outcome.auth_token, outcome.server_cert
        );
        let info = ConnectionInfo::decode(&connection)?;
        return Ok(ApiClient::connect(&info)?);
    }

    let connection = std::env::var(CONNECTION_ENV).unwrap_or_default();
    if connection.is_empty() {
        anyhow::bail!("there's no {CONNECTION_ENV} environment variable and host is not specified");
    }
    let info = ConnectionInfo::decode(connection.trim())?;
    Ok(ApiClient::connect(&info)?)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    info!("connecting to Apollo");
    let client = connect_runner(&cli).await?;

    client.ping().await?;
    info!("Apollo connection is operable");

    let ctx = Arc::new(RunnerContext::new(
        client,
        Duration::from_secs(cli.suicide_delay_sec),
        NODE_ID.to_string(),
    ));

    // All is well; let systemd know, when it is listening.
    notify_ready()?;

    run_until_done(ctx).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    apollo_lib::logging::init_client_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
