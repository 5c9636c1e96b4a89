use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    runtime::watcher::{watcher, Config, Event},
    Api, Client,
};
use log::error;

use crate::Error;

/// Receives pod lifecycle events from the manager namespace. Unlike an
/// admission extension, a watcher observes pods after the fact and cannot
/// mutate them.
#[async_trait::async_trait]
pub trait Watcher: Send + Sync {
    async fn handle(&self, client: Client, event: &Event<Pod>) -> Result<(), Error>;
}

/// Streams pod events to the given watchers until the stream ends. Watch
/// errors are logged and the stream resumes; watcher errors only affect the
/// failing watcher.
pub async fn run_pod_watch(client: Client, namespace: String, watchers: Vec<Arc<dyn Watcher>>) {
    let api: Api<Pod> = Api::namespaced(client.clone(), &namespace);
    let mut stream = watcher(api, Config::default()).boxed();
    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => {
                for watcher in &watchers {
                    if let Err(e) = watcher.handle(client.clone(), &event).await {
                        error!("watcher failed to handle pod event: {e:?}");
                    }
                }
            }
            Err(e) => error!("pod watch failed: {e:?}"),
        }
    }
}
