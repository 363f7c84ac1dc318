#![allow(dead_code)]

use std::sync::Arc;

use everelay::server;
use everelay_store::Store;

/// A relay server running on a random port with ephemeral storage.
pub struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let store = Arc::new(Store::open_in_memory().await.expect("failed to open store"));
        let listener = server::bind("127.0.0.1:0").await.expect("failed to bind");
        let addr = listener.local_addr().expect("listener has a local addr");

        let handle = tokio::spawn(async move {
            let _ = server::run(listener, store).await;
        });

        Self {
            base_url: format!("http://{addr}"),
            handle,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
