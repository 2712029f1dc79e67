use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use package_indexer::{
    cli::{Cli, Command, ServeArgs},
    client,
    server::Server,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let addr = args.listen_addr();
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%addr, error = %err, "could not start tcp server");
            return Err(err).with_context(|| format!("failed to bind {addr}"));
        }
    };

    let server = Server::new(listener, args.server_config())?;
    info!("package indexer listening on {}", server.local_addr()?);
    let drain = match server.run_until_ctrl_c().await {
        Ok(drain) => drain,
        Err(err) => {
            warn!("server exited with error: {err:?}");
            return Err(err);
        }
    };

    if !drain.is_finished() {
        info!("waiting for open connections to close, press ctrl-c again to exit now");
        tokio::select! {
            _ = drain.wait() => info!("all connections closed"),
            _ = tokio::signal::ctrl_c() => warn!("exiting with connections still open"),
        }
    }

    Ok(())
}
