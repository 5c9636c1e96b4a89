#![warn(clippy::dbg_macro, clippy::todo)]

//! Framework for building Eirini admission-webhook extensions.
//!
//! An [`Extension`] intercepts pod admission in an Eirini-enabled cluster. The
//! [`Manager`] owns the webhook server and the configuration generator: each
//! extension is registered under a unique ID, and once all registrations are
//! done the manager publishes a `MutatingWebhookConfiguration` pointing the
//! control plane at the registered paths, then serves them over TLS.

mod credsgen;
mod extension;
mod generator;
mod manager;
mod server;
mod watcher;
mod webhook;

pub use credsgen::{load_or_create_cert, Certificate, Credsgen, RcgenCredsgen};
pub use extension::{patch_for, Extension};
pub use generator::WebhookConfig;
pub use manager::{FailurePolicy, Manager, ManagerOptions, WebhookEndpoint};
pub use server::WebhookServer;
pub use watcher::{run_pod_watch, Watcher};
pub use webhook::{Webhook, WebhookOptions};

use kube::core::admission::SerializePatchError;

/// Label set by Eirini on pods it schedules. Extensions registered with
/// app filtering only intercept pods carrying this label with the value
/// `APP`.
pub const LABEL_SOURCE_TYPE: &str = "cloudfoundry.org/source_type";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    KubeError {
        #[from]
        source: kube::Error,
    },
    #[error("Invalid webhook options: {0}")]
    ConfigError(String),
    #[error("Failed to register webhook: {0}")]
    RegistrationError(String),
    #[error("Failed to generate certificate: {0}")]
    CertError(#[from] rcgen::Error),
    #[error("Invalid input: {0}")]
    UserInputError(String),
    #[error("Failed to serialize patch: {0}")]
    PatchError(#[from] SerializePatchError),
    #[error("Failed to serialize object: {0}")]
    SerdeError(#[from] serde_json::Error),
}
