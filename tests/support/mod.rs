// ABOUTME: Test support utilities.
// ABOUTME: Provides tracing setup, the in-memory runtime, and a loopback server harness.

use dockhand::server::{self, Server};
use dockhand::service::{ContainerService, ServiceOptions};
use dockhand::transfer::ChunkSize;
use std::net::SocketAddr;
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::task::JoinHandle;

// Each test binary only uses some of these modules, so allow dead_code.
#[allow(dead_code)]
pub mod mock_runtime;

use mock_runtime::MockRuntime;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("dockhand=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Service over a mock runtime, keeping a handle on the runtime for asserts.
#[allow(dead_code)]
pub fn service(runtime: MockRuntime) -> (Arc<MockRuntime>, ContainerService<MockRuntime>) {
    init_tracing();
    let runtime = Arc::new(runtime);
    let options = ServiceOptions {
        cancel_grace: Duration::from_millis(200),
        ..ServiceOptions::default()
    };
    let service = ContainerService::with_shared(Arc::clone(&runtime), options);
    (runtime, service)
}

/// A server on an ephemeral loopback port.
#[allow(dead_code)]
pub struct TestServer {
    pub addr: SocketAddr,
    pub runtime: Arc<MockRuntime>,
    pub server: Arc<Server<MockRuntime>>,
    pub handle: JoinHandle<()>,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn start(runtime: MockRuntime, chunk_size: usize) -> Self {
        Self::start_with_drain(runtime, chunk_size, Duration::from_secs(5)).await
    }

    pub async fn start_with_drain(
        runtime: MockRuntime,
        chunk_size: usize,
        drain_timeout: Duration,
    ) -> Self {
        let (runtime, service) = service(runtime);
        let chunk_size = ChunkSize::new(chunk_size).unwrap();
        let server = Arc::new(Server::new(Arc::new(service), chunk_size, drain_timeout));
        let listener = server::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn({
            let server = Arc::clone(&server);
            async move {
                server.serve(listener).await.unwrap();
            }
        });
        Self {
            addr,
            runtime,
            server,
            handle,
        }
    }

    pub fn client(&self) -> dockhand::client::Client {
        dockhand::client::Client::new(self.addr.to_string())
    }

    pub async fn stop(self) {
        self.server.halt();
        self.handle.await.unwrap();
    }
}
