// ABOUTME: Volume command implementations.
// ABOUTME: Create, remove, and list volumes through the client.

use super::{connect, list_options};
use crate::cli::VolumeCommand;
use crate::output::Output;
use dockhand::client::ClientError;
use dockhand::error::Result;
use dockhand::options::parse_filter;
use dockhand::service::{CreateVolumeRequest, ListVolumesRequest, RemoveVolumeRequest};
use std::collections::BTreeMap;

fn key_values(entries: &[String]) -> std::result::Result<BTreeMap<String, String>, ClientError> {
    entries
        .iter()
        .map(|entry| parse_filter(entry).map_err(ClientError::from))
        .collect()
}

pub async fn volume(command: VolumeCommand, mut output: Output) -> Result<()> {
    output.start_timer();
    match command {
        VolumeCommand::Create {
            name,
            driver,
            label,
            opt,
            endpoint,
        } => {
            let req = CreateVolumeRequest {
                name,
                driver,
                labels: key_values(&label)?,
                options: key_values(&opt)?,
            };
            let volume = connect(&endpoint).create_volume(req).await?;
            output.success(&format!("Created volume {} ({})", volume.name, volume.driver));
        }
        VolumeCommand::Remove {
            name,
            force,
            endpoint,
        } => {
            let req = RemoveVolumeRequest {
                name: name.clone(),
                force,
            };
            connect(&endpoint).remove_volume(req).await?;
            output.success(&format!("Removed volume {name}"));
        }
        VolumeCommand::List { list, endpoint } => {
            let req = ListVolumesRequest {
                options: list_options(list),
            };
            let volumes = connect(&endpoint).list_volumes(req).await?;
            output.table(&["NAME", "DRIVER", "CREATED"], &volumes, |v| {
                vec![
                    v.name.clone(),
                    v.driver.clone(),
                    v.created_at
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_default(),
                ]
            });
        }
    }
    Ok(())
}
