// ABOUTME: Integration tests for the operation orchestrator over the in-memory runtime.
// ABOUTME: Covers validation, streaming, cancellation, chunked push, and error translation.

mod support;

use bytes::Bytes;
use dockhand::events::{EventBody, EventReceiver, EventStatus, ProgressEvent};
use dockhand::options::{RawListOptions, RawStartOptions};
use dockhand::runtime::ContainerState;
use dockhand::service::{
    ChunkStream, ContainerLogsRequest, CreateVolumeRequest, InspectContainerRequest,
    ListContainersRequest, ListImagesRequest, ListVolumesRequest, PullImageRequest,
    PushImageRequest, RemoveImageRequest, RemoveVolumeRequest, StartContainerRequest,
    StopContainerRequest, UpdateContainerRequest, UpdateOutcome,
};
use dockhand::status::{DomainError, translate};
use dockhand::transfer::{Chunk, ChunkSize, split};
use dockhand::types::{CallContext, ImageRef, Metadata};
use futures::StreamExt;
use support::mock_runtime::MockRuntime;
use tonic::{Code, Status};
use std::time::Duration;

async fn drain(mut rx: EventReceiver) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn pull(image: &str, tag: &str) -> PullImageRequest {
    PullImageRequest {
        image: image.into(),
        tag: tag.into(),
    }
}

fn start(instance: &str, image: &str, tag: &str) -> StartContainerRequest {
    StartContainerRequest {
        instance: instance.into(),
        image: image.into(),
        tag: tag.into(),
        command: vec!["/bin/bash".into()],
        options: RawStartOptions {
            env: vec!["MODE=test".into()],
            ports: vec!["8080:80".into()],
            ..Default::default()
        },
    }
}

fn chunk_stream(chunks: Vec<Chunk>) -> ChunkStream {
    Box::pin(futures::stream::iter(chunks.into_iter().map(Ok::<_, Status>)))
}

mod validation {
    use super::*;

    #[tokio::test]
    async fn missing_image_name_never_reaches_adapter() {
        let (runtime, service) = support::service(MockRuntime::new());
        let status = service
            .pull_image(CallContext::new(), pull("  ", "latest"))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(runtime.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_option_never_reaches_adapter() {
        let (runtime, service) = support::service(MockRuntime::new().with_image("nginx", "1"));
        let mut req = start("web", "nginx", "1");
        req.options.ports = vec!["80:80:80".into()];
        let status = service
            .start_container(CallContext::new(), req)
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(runtime.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_filter_never_reaches_adapter() {
        let (runtime, service) = support::service(MockRuntime::new());
        let req = ListImagesRequest {
            options: RawListOptions {
                filters: vec!["dangling".into()],
                ..Default::default()
            },
        };
        let status = service
            .list_images(CallContext::new(), req)
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(runtime.calls(), 0);
    }

    #[tokio::test]
    async fn expired_context_never_reaches_adapter() {
        let (runtime, service) = support::service(MockRuntime::new());
        let ctx = CallContext::with_timeout(Duration::ZERO);
        let status = service
            .pull_image(ctx, pull("alpine", "latest"))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::DeadlineExceeded);

        let ctx = CallContext::new();
        ctx.cancel();
        let status = service
            .remove_volume(
                ctx,
                RemoveVolumeRequest {
                    name: "data".into(),
                    force: false,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Cancelled);
        assert_eq!(runtime.calls(), 0);
    }
}

mod images {
    use super::*;

    #[tokio::test]
    async fn pull_streams_progress_then_one_terminal_event() {
        let (runtime, service) = support::service(MockRuntime::new());
        let rx = service
            .pull_image(CallContext::new(), pull("alpine", "3.20"))
            .await
            .unwrap();
        let events = drain(rx).await;

        let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        let last = events.last().unwrap();
        assert_eq!(last.status, EventStatus::Finished);
        assert!(last.error.is_none());
        match &last.body {
            EventBody::Image(progress) => {
                assert_eq!(progress.image, "alpine");
                assert_eq!(progress.tag, "3.20");
                assert_eq!(progress.bytes_received, 8192);
            }
            other => panic!("unexpected body: {other:?}"),
        }
        assert!(runtime.has_image("alpine", "3.20"));
    }

    #[tokio::test]
    async fn pull_forwards_registry_credentials_from_metadata() {
        let (runtime, service) = support::service(MockRuntime::new());
        let mut metadata = Metadata::new();
        metadata.insert("username", "admin");
        metadata.insert("password", "secret");
        let ctx = CallContext::new().metadata(metadata);
        drain(service.pull_image(ctx, pull("alpine", "")).await.unwrap()).await;

        let auth = runtime.last_auth().expect("credentials should reach the adapter");
        assert_eq!(auth.username, "admin");
        assert_eq!(auth.password, "secret");
    }

    #[tokio::test]
    async fn pull_of_missing_image_ends_with_not_found() {
        let (_runtime, service) = support::service(MockRuntime::new());
        let rx = service
            .pull_image(CallContext::new(), pull("missing", "1"))
            .await
            .unwrap();
        let events = drain(rx).await;
        let last = events.last().unwrap();
        assert_eq!(last.domain_error(), Some(DomainError::NotFound));
    }

    #[tokio::test]
    async fn cancelling_a_pull_stops_the_stream_and_the_adapter() {
        let (runtime, service) = support::service(MockRuntime::new().hanging_pull());
        let ctx = CallContext::new();
        let mut rx = service
            .pull_image(ctx.clone(), pull("alpine", "latest"))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert!(!first.is_terminal());
        ctx.cancel();
        assert!(rx.recv().await.is_none());

        for _ in 0..100 {
            if runtime.pull_dropped() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(runtime.pull_dropped(), "adapter call should be dropped");
        assert!(!runtime.has_image("alpine", "latest"));
    }

    #[tokio::test]
    async fn push_reassembles_and_commits_once() {
        let (runtime, service) = support::service(MockRuntime::new());
        let image = ImageRef::new("app", "v1").unwrap();
        let payload = Bytes::from(vec![7u8; 150_000]);
        let chunks: Vec<_> = split(&image, payload, ChunkSize::DEFAULT).collect();
        assert_eq!(chunks.len(), 3);

        let req = PushImageRequest {
            image: "app".into(),
            tag: "v1".into(),
        };
        let rx = service
            .push_image(CallContext::new(), req, chunk_stream(chunks))
            .await
            .unwrap();
        let events = drain(rx).await;

        let last = events.last().unwrap();
        assert!(last.error.is_none(), "unexpected error: {:?}", last.error);
        match &last.body {
            EventBody::Image(progress) => assert_eq!(progress.bytes_received, 150_000),
            other => panic!("unexpected body: {other:?}"),
        }
        assert_eq!(runtime.push_commits(), 1);
        assert!(runtime.has_image("app", "v1"));
    }

    #[tokio::test]
    async fn push_with_foreign_chunk_commits_nothing() {
        let (runtime, service) = support::service(MockRuntime::new());
        let other = ImageRef::new("other", "v1").unwrap();
        let chunks: Vec<_> = split(&other, Bytes::from_static(b"tar"), ChunkSize::DEFAULT).collect();

        let req = PushImageRequest {
            image: "app".into(),
            tag: "v1".into(),
        };
        let rx = service
            .push_image(CallContext::new(), req, chunk_stream(chunks))
            .await
            .unwrap();
        let events = drain(rx).await;

        let error = events.last().unwrap().error.clone().unwrap();
        assert_eq!(error.code(), Code::InvalidArgument);
        assert_eq!(runtime.push_commits(), 0);
        assert!(!runtime.has_image("app", "v1"));
    }

    #[tokio::test]
    async fn push_without_final_chunk_commits_nothing() {
        let (runtime, service) = support::service(MockRuntime::new());
        let image = ImageRef::new("app", "v1").unwrap();
        let size = ChunkSize::new(4).unwrap();
        let mut chunks: Vec<_> = split(&image, Bytes::from_static(b"0123456789"), size).collect();
        chunks.pop();

        let req = PushImageRequest {
            image: "app".into(),
            tag: "v1".into(),
        };
        let rx = service
            .push_image(CallContext::new(), req, chunk_stream(chunks))
            .await
            .unwrap();
        let events = drain(rx).await;

        let error = events.last().unwrap().error.clone().unwrap();
        assert_eq!(error.code(), Code::InvalidArgument);
        assert_eq!(runtime.push_commits(), 0);
    }

    #[tokio::test]
    async fn removing_an_image_in_use_is_a_precondition_failure() {
        let runtime = MockRuntime::new()
            .with_image("nginx", "1")
            .with_running_container("web", "nginx:1");
        let (runtime, service) = support::service(runtime);
        let req = RemoveImageRequest {
            image: "nginx".into(),
            tag: "1".into(),
            force: false,
        };
        let status = service
            .remove_image(CallContext::new(), req)
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::FailedPrecondition);
        assert_eq!(translate(&status), DomainError::Precondition);
        assert!(runtime.has_image("nginx", "1"));
    }

    #[tokio::test]
    async fn list_limit_bounds_rows() {
        let runtime = MockRuntime::new()
            .with_image("a", "1")
            .with_image("b", "1")
            .with_image("c", "1");
        let (_runtime, service) = support::service(runtime);

        for (limit, expected) in [(Some(2), 2), (Some(0), 0), (None, 3)] {
            let req = ListImagesRequest {
                options: RawListOptions {
                    limit,
                    ..Default::default()
                },
            };
            let rows: Vec<_> = service
                .list_images(CallContext::new(), req)
                .await
                .unwrap()
                .collect()
                .await;
            assert_eq!(rows.len(), expected, "limit {limit:?}");
            assert!(rows.iter().all(Result::is_ok));
        }
    }

    #[tokio::test]
    async fn list_filters_reach_the_runtime() {
        let runtime = MockRuntime::new()
            .with_image("a", "1")
            .with_image("b", "<none>")
            .with_image("c", "<none>");
        let (runtime, service) = support::service(runtime);
        let req = ListImagesRequest {
            options: RawListOptions {
                filters: vec!["dangling=true".into()],
                limit: Some(5),
                ..Default::default()
            },
        };
        let rows: Vec<_> = service
            .list_images(CallContext::new(), req)
            .await
            .unwrap()
            .map(Result::unwrap)
            .collect()
            .await;

        let images: Vec<_> = rows.iter().map(|r| r.image.as_str()).collect();
        assert_eq!(images, ["b", "c"]);
        let seen = runtime.last_list_options().unwrap();
        assert_eq!(seen.filters()["dangling"], ["true"]);
        assert_eq!(seen.limit(), Some(5));
    }

    #[tokio::test]
    async fn list_failure_arrives_as_an_error_row() {
        let runtime = MockRuntime::new()
            .with_image("a", "1")
            .fail_once("list_images");
        let (_runtime, service) = support::service(runtime);
        let rows: Vec<_> = service
            .list_images(CallContext::new(), ListImagesRequest::default())
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(rows.len(), 1);
        let status = rows[0].as_ref().unwrap_err();
        assert_eq!(status.code(), Code::Unknown);
        assert!(status.message().contains("engine went away"));
    }
}

mod containers {
    use super::*;

    #[tokio::test]
    async fn start_reports_creation_then_running() {
        let (runtime, service) = support::service(MockRuntime::new().with_image("nginx", "1"));
        let rx = service
            .start_container(CallContext::new(), start("web", "nginx", "1"))
            .await
            .unwrap();
        let events = drain(rx).await;

        let states: Vec<_> = events
            .iter()
            .filter_map(|e| match &e.body {
                EventBody::Container(info) => Some(info.state.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(states, ["created", "running"]);

        let container = runtime.container("web").unwrap();
        assert_eq!(container.command, ["/bin/bash"]);
        assert_eq!(container.env, ["MODE=test"]);
    }

    #[tokio::test]
    async fn starting_a_duplicate_instance_fails_once() {
        let runtime = MockRuntime::new()
            .with_image("nginx", "1")
            .with_running_container("web", "nginx:1");
        let (_runtime, service) = support::service(runtime);
        let rx = service
            .start_container(CallContext::new(), start("web", "nginx", "1"))
            .await
            .unwrap();
        let events = drain(rx).await;
        assert_eq!(events.len(), 1);
        let error = events[0].error.clone().unwrap();
        assert_eq!(error.code(), Code::AlreadyExists);
        assert!(matches!(events[0].domain_error(), Some(DomainError::Unknown(_))));
    }

    #[tokio::test]
    async fn sync_update_replaces_the_instance() {
        let runtime = MockRuntime::new()
            .with_image("nginx", "1")
            .with_image("nginx", "2")
            .with_running_container("web", "nginx:1");
        let (runtime, service) = support::service(runtime);
        let req = UpdateContainerRequest {
            instance: "web".into(),
            image: "nginx".into(),
            tag: "2".into(),
            ..Default::default()
        };
        let outcome = service
            .update_container(CallContext::new(), req)
            .await
            .unwrap();
        assert!(matches!(outcome, UpdateOutcome::Completed { .. }));

        let web = runtime.container("web").unwrap();
        assert_eq!(web.image, "nginx:2");
        assert_eq!(&web.id, outcome.id());
        assert_eq!(runtime.container_count(), 1);
    }

    #[tokio::test]
    async fn async_update_returns_early_and_outlives_the_call() {
        let runtime = MockRuntime::new()
            .with_image("nginx", "1")
            .with_image("nginx", "2")
            .with_running_container("web", "nginx:1");
        let (runtime, service) = support::service(runtime);
        let req = UpdateContainerRequest {
            instance: "web".into(),
            image: "nginx".into(),
            tag: "2".into(),
            async_mode: true,
            ..Default::default()
        };
        let ctx = CallContext::new();
        let outcome = service.update_container(ctx.clone(), req).await.unwrap();
        ctx.cancel();

        let UpdateOutcome::Accepted { id, watcher } = outcome else {
            panic!("async update should be accepted");
        };
        let events = drain(watcher).await;
        assert!(events.last().is_some_and(|e| e.is_terminal() && e.error.is_none()));

        let web = runtime.container("web").unwrap();
        assert_eq!(web.id, id);
        assert_eq!(web.image, "nginx:2");
    }

    fn update(instance: &str, image: &str, tag: &str) -> UpdateContainerRequest {
        UpdateContainerRequest {
            instance: instance.into(),
            image: image.into(),
            tag: tag.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn failed_stop_discards_the_staged_container() {
        let runtime = MockRuntime::new()
            .with_image("nginx", "1")
            .with_image("nginx", "2")
            .with_running_container("web", "nginx:1")
            .fail_once("stop_container");
        let (runtime, service) = support::service(runtime);

        let status = service
            .update_container(CallContext::new(), update("web", "nginx", "2"))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unknown);
        assert!(runtime.container("web-update").is_none());
        assert_eq!(runtime.container("web").unwrap().image, "nginx:1");

        let retried = service
            .update_container(CallContext::new(), update("web", "nginx", "2"))
            .await
            .unwrap();
        assert_eq!(runtime.container("web").unwrap().id, *retried.id());
        assert_eq!(runtime.container_count(), 1);
    }

    #[tokio::test]
    async fn failed_removal_restarts_the_current_container() {
        let runtime = MockRuntime::new()
            .with_image("nginx", "1")
            .with_image("nginx", "2")
            .with_running_container("web", "nginx:1")
            .fail_once("remove_container");
        let (runtime, service) = support::service(runtime);

        service
            .update_container(CallContext::new(), update("web", "nginx", "2"))
            .await
            .unwrap_err();

        let web = runtime.container("web").unwrap();
        assert_eq!(web.image, "nginx:1");
        assert_eq!(web.state, ContainerState::Running);
        assert!(runtime.container("web-update").is_none());
    }

    #[tokio::test]
    async fn failed_rename_keeps_the_staged_replacement() {
        let runtime = MockRuntime::new()
            .with_image("nginx", "1")
            .with_image("nginx", "2")
            .with_running_container("web", "nginx:1")
            .fail_once("rename_container");
        let (runtime, service) = support::service(runtime);

        let status = service
            .update_container(CallContext::new(), update("web", "nginx", "2"))
            .await
            .unwrap_err();
        assert!(status.message().contains("rename failed"));
        assert!(runtime.container("web").is_none());
        assert_eq!(runtime.container("web-update").unwrap().image, "nginx:2");
    }

    #[tokio::test]
    async fn updating_a_missing_instance_is_not_found() {
        let (_runtime, service) = support::service(MockRuntime::new().with_image("nginx", "2"));
        let req = UpdateContainerRequest {
            instance: "ghost".into(),
            image: "nginx".into(),
            tag: "2".into(),
            ..Default::default()
        };
        let status = service
            .update_container(CallContext::new(), req)
            .await
            .unwrap_err();
        assert_eq!(translate(&status), DomainError::NotFound);
    }

    #[tokio::test]
    async fn stop_then_list_running_only() {
        let runtime = MockRuntime::new()
            .with_image("nginx", "1")
            .with_running_container("web", "nginx:1")
            .with_running_container("api", "nginx:1");
        let (_runtime, service) = support::service(runtime);
        service
            .stop_container(
                CallContext::new(),
                StopContainerRequest {
                    instance: "api".into(),
                    timeout_secs: Some(1),
                },
            )
            .await
            .unwrap();

        let running: Vec<_> = service
            .list_containers(CallContext::new(), ListContainersRequest::default())
            .await
            .unwrap()
            .map(|row| row.unwrap().name)
            .collect()
            .await;
        assert_eq!(running, ["web"]);

        let all = ListContainersRequest {
            options: RawListOptions {
                all: true,
                ..Default::default()
            },
        };
        let rows: Vec<_> = service
            .list_containers(CallContext::new(), all)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn inspect_missing_container_is_not_found() {
        let (_runtime, service) = support::service(MockRuntime::new());
        let status = service
            .inspect_container(
                CallContext::new(),
                InspectContainerRequest {
                    instance: "ghost".into(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn logs_honour_tail() {
        let runtime = MockRuntime::new()
            .with_image("nginx", "1")
            .with_running_container("web", "nginx:1")
            .with_logs("web", &["one", "two", "three"]);
        let (_runtime, service) = support::service(runtime);
        let req = ContainerLogsRequest {
            instance: "web".into(),
            follow: false,
            tail: Some(2),
        };
        let lines: Vec<_> = service
            .container_logs(CallContext::new(), req)
            .await
            .unwrap()
            .map(|row| row.unwrap().message)
            .collect()
            .await;
        assert_eq!(lines, ["two", "three"]);
    }

    #[tokio::test]
    async fn logs_for_missing_container_fail_the_call() {
        let (_runtime, service) = support::service(MockRuntime::new());
        let req = ContainerLogsRequest {
            instance: "ghost".into(),
            ..Default::default()
        };
        let status = service
            .container_logs(CallContext::new(), req)
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
    }
}

mod volumes {
    use super::*;

    #[tokio::test]
    async fn create_list_remove() {
        let (_runtime, service) = support::service(MockRuntime::new().with_volume("cache"));
        let req = CreateVolumeRequest {
            name: "data".into(),
            ..Default::default()
        };
        let created = service
            .create_volume(CallContext::new(), req.clone())
            .await
            .unwrap();
        assert_eq!(created.name, "data");
        assert_eq!(created.driver, "local");

        let status = service
            .create_volume(CallContext::new(), req)
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::AlreadyExists);

        let names: Vec<_> = service
            .list_volumes(CallContext::new(), ListVolumesRequest::default())
            .await
            .unwrap()
            .map(|row| row.unwrap().name)
            .collect()
            .await;
        assert_eq!(names, ["cache", "data"]);

        let remove = |name: &str| RemoveVolumeRequest {
            name: name.into(),
            force: false,
        };
        service
            .remove_volume(CallContext::new(), remove("data"))
            .await
            .unwrap();
        let status = service
            .remove_volume(CallContext::new(), remove("data"))
            .await
            .unwrap_err();
        assert_eq!(translate(&status), DomainError::NotFound);
    }
}
