use apollo_host::{init_state, reaper::spawn_reaper, server::serve, Opts};
use clap::Parser;
use tracing::debug;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    apollo_lib::logging::init_server_tracing(opts.verbose);

    // One process-wide TLS crypto provider for the listener and the probe.
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    let config = opts.load_config()?;
    debug!("configuration:\n{config:#?}");

    let (state, tls) = init_state(&config).await?;

    let _reaper = spawn_reaper(state.clone());
    serve(state, &config.listen, &tls).await
}
