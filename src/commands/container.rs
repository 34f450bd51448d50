// ABOUTME: Container command implementations.
// ABOUTME: Start, update, stop, remove, list, inspect, and logs through the client.

use super::{connect, list_options, start_options};
use crate::cli::ContainerCommand;
use crate::output::{Output, short_id};
use dockhand::error::Result;
use dockhand::events::LogStream;
use dockhand::service::{
    ContainerLogsRequest, InspectContainerRequest, ListContainersRequest, RemoveContainerRequest,
    StartContainerRequest, StopContainerRequest, UpdateContainerRequest,
};

pub async fn container(command: ContainerCommand, mut output: Output) -> Result<()> {
    output.start_timer();
    match command {
        ContainerCommand::Start {
            image,
            run,
            endpoint,
        } => {
            let instance = run.instance.clone();
            let (command, options) = start_options(run);
            let req = StartContainerRequest {
                instance,
                image: image.image,
                tag: image.tag,
                command,
                options,
            };
            output.progress(&format!("Starting {} from {}:{}", req.instance, req.image, req.tag));
            let instance = req.instance.clone();
            connect(&endpoint)
                .start_container(req, |event| output.event(event))
                .await?;
            output.success(&format!("Started {instance}"));
        }
        ContainerCommand::Update {
            image,
            run,
            async_mode,
            endpoint,
        } => {
            let instance = run.instance.clone();
            let (command, options) = start_options(run);
            let req = UpdateContainerRequest {
                instance: instance.clone(),
                image: image.image,
                tag: image.tag,
                command,
                options,
                async_mode,
            };
            output.progress(&format!("Updating {instance}"));
            let reply = connect(&endpoint).update_container(req).await?;
            if reply.accepted {
                output.success(&format!(
                    "Update of {instance} accepted ({}); continuing on the server",
                    short_id(&reply.id)
                ));
            } else {
                output.success(&format!("Updated {instance} ({})", short_id(&reply.id)));
            }
        }
        ContainerCommand::Stop {
            instance,
            time,
            endpoint,
        } => {
            let req = StopContainerRequest {
                instance: instance.clone(),
                timeout_secs: time,
            };
            connect(&endpoint).stop_container(req).await?;
            output.success(&format!("Stopped {instance}"));
        }
        ContainerCommand::Remove {
            instance,
            force,
            endpoint,
        } => {
            let req = RemoveContainerRequest {
                instance: instance.clone(),
                force,
            };
            connect(&endpoint).remove_container(req).await?;
            output.success(&format!("Removed {instance}"));
        }
        ContainerCommand::List { list, endpoint } => {
            let req = ListContainersRequest {
                options: list_options(list),
            };
            let containers = connect(&endpoint).list_containers(req).await?;
            output.table(&["NAME", "IMAGE", "STATE", "ID"], &containers, |c| {
                vec![
                    c.name.clone(),
                    c.image.clone(),
                    c.state.clone(),
                    short_id(&c.id).to_string(),
                ]
            });
        }
        ContainerCommand::Inspect { instance, endpoint } => {
            let req = InspectContainerRequest { instance };
            let details = connect(&endpoint).inspect_container(req).await?;
            output.value(&details);
        }
        ContainerCommand::Logs {
            instance,
            follow,
            tail,
            endpoint,
        } => {
            let req = ContainerLogsRequest {
                instance,
                follow,
                tail,
            };
            connect(&endpoint)
                .container_logs(req, |line| match line.stream {
                    LogStream::Stdout => println!("{}", line.message),
                    LogStream::Stderr => eprintln!("{}", line.message),
                })
                .await?;
        }
    }
    Ok(())
}
