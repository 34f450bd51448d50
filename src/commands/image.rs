// ABOUTME: Image command implementations.
// ABOUTME: Pull, push, list, and remove images through the client.

use super::{connect, list_options};
use crate::cli::ImageCommand;
use crate::output::{Output, short_id};
use dockhand::error::Result;
use dockhand::service::{
    ListImagesRequest, PullImageRequest, PushImageRequest, RemoveImageRequest,
};

pub async fn image(command: ImageCommand, mut output: Output) -> Result<()> {
    output.start_timer();
    match command {
        ImageCommand::Pull { image, endpoint } => {
            let req = PullImageRequest {
                image: image.image,
                tag: image.tag,
            };
            let label = format!("{}:{}", req.image, req.tag);
            output.progress(&format!("Pulling {label}"));
            connect(&endpoint)
                .pull_image(req, |event| output.event(event))
                .await?;
            output.success(&format!("Pulled {label}"));
        }
        ImageCommand::Push {
            image,
            file,
            endpoint,
        } => {
            let payload = tokio::fs::read(&file).await?;
            let req = PushImageRequest {
                image: image.image,
                tag: image.tag,
            };
            let label = format!("{}:{}", req.image, req.tag);
            output.progress(&format!(
                "Pushing {label} ({} bytes from {})",
                payload.len(),
                file.display()
            ));
            connect(&endpoint)
                .push_image(req, payload.into(), |event| output.event(event))
                .await?;
            output.success(&format!("Pushed {label}"));
        }
        ImageCommand::List { list, endpoint } => {
            let req = ListImagesRequest {
                options: list_options(list),
            };
            let images = connect(&endpoint).list_images(req).await?;
            output.table(&["IMAGE", "TAG", "ID"], &images, |i| {
                vec![i.image.clone(), i.tag.clone(), short_id(i.id.as_str()).to_string()]
            });
        }
        ImageCommand::Remove {
            image,
            force,
            endpoint,
        } => {
            let req = RemoveImageRequest {
                image: image.image,
                tag: image.tag,
                force,
            };
            let label = format!("{}:{}", req.image, req.tag);
            connect(&endpoint).remove_image(req).await?;
            output.success(&format!("Removed {label}"));
        }
    }
    Ok(())
}
