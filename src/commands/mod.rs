// ABOUTME: Command module aggregator for the dockhand CLI.
// ABOUTME: Shared helpers turn clap arguments into client requests.

mod container;
mod image;
mod serve;
mod volume;

pub use container::container;
pub use image::image;
pub use serve::serve;
pub use volume::volume;

use crate::cli::{Endpoint, ListArgs, RunArgs};
use dockhand::client::Client;
use dockhand::options::{RawListOptions, RawStartOptions};
use dockhand::runtime::{METADATA_PASSWORD, METADATA_REGISTRY, METADATA_USERNAME};
use std::time::Duration;

/// Build a client for the endpoint, attaching registry credentials if given.
pub fn connect(endpoint: &Endpoint) -> Client {
    let mut client = Client::new(&endpoint.server);
    let credentials = [
        (METADATA_USERNAME, &endpoint.username),
        (METADATA_PASSWORD, &endpoint.password),
        (METADATA_REGISTRY, &endpoint.registry),
    ];
    for (key, value) in credentials {
        if let Some(value) = value {
            client = client.with_metadata(key, value);
        }
    }
    if let Some(secs) = endpoint.timeout {
        client = client.with_timeout(Duration::from_secs(secs));
    }
    client
}

pub fn list_options(args: ListArgs) -> RawListOptions {
    RawListOptions {
        filters: args.filters,
        limit: args.limit,
        all: args.all,
    }
}

/// Split run arguments into the command vector and the raw option set.
pub fn start_options(run: RunArgs) -> (Vec<String>, RawStartOptions) {
    let command = run.command.split_whitespace().map(str::to_string).collect();
    let options = RawStartOptions {
        env: run.env,
        ports: run.port,
        volumes: run.volume,
        devices: run.device,
        network: run.network,
        run_as: run.user,
        restart_policy: run.restart,
        cap_add: run.cap_add,
        cap_drop: run.cap_drop,
    };
    (command, options)
}
