// ABOUTME: Serve command implementation.
// ABOUTME: Connects to the engine, starts the server, and halts it on Ctrl-C.

use crate::cli::ServeArgs;
use crate::output::Output;
use dockhand::config::{Config, Overrides};
use dockhand::error::Result;
use dockhand::runtime::error::UnreachableSnafu;
use dockhand::runtime::{DockerRuntime, RuntimeInfo};
use dockhand::server::{self, Server};
use dockhand::service::ContainerService;
use snafu::ResultExt;
use std::env;
use std::sync::Arc;

pub async fn serve(args: ServeArgs, output: Output) -> Result<()> {
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::discover_or_default(&env::current_dir()?)?,
    };
    let config = config.apply(Overrides {
        addr: args.addr,
        docker_host: args.docker_host,
        chunk_size: args.chunk_size,
    });

    let host = config.docker_host();
    output.progress(&format!("  → Connecting to {host}..."));
    let runtime = DockerRuntime::connect(&host)?;
    let meta = runtime
        .info()
        .await
        .context(UnreachableSnafu { host: host.clone() })?;
    output.progress(&format!("  → Found {meta}"));

    let service = Arc::new(ContainerService::new(runtime, config.service_options()));
    let server = Server::new(service, config.chunk_size, config.drain_timeout);
    let listener = server::bind(&config.addr).await?;
    output.success(&format!("Listening on {}", config.addr));

    let halt = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; halting");
            halt.cancel();
        }
    });

    server.serve(listener).await?;
    Ok(())
}
