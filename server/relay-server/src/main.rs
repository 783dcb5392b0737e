use clap::Parser;
use relay_server::{logging, AppState, HostServer};
use relay_types::HostConfig;

#[derive(Debug, Parser)]
#[command(name = "relay-server", about = "A2A orchestration host")]
struct Args {
    /// Bind address; overrides A2A_UI_HOST.
    #[arg(long)]
    host: Option<String>,

    /// Bind port; overrides A2A_UI_PORT.
    #[arg(long)]
    port: Option<u16>,

    /// Data directory for JSON stores and local uploads.
    #[arg(long)]
    data_dir: Option<String>,

    /// Log filter, e.g. `info` or `relay_core=debug`.
    #[arg(long, default_value = "info")]
    log: String,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_logging(&args.log);

    let mut config = HostConfig::from_env();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    let state = AppState::build(config)?;
    HostServer::new(state).start().await
}
