use std::{net::SocketAddr, sync::Arc};

use kube::Client;
use log::info;

use crate::{
    credsgen::{load_or_create_cert, Credsgen},
    extension::Extension,
    generator::WebhookConfig,
    server::WebhookServer,
    watcher::{run_pod_watch, Watcher},
    webhook::{Webhook, WebhookOptions},
    Error,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePolicy {
    Ignore,
    Fail,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Ignore => "Ignore",
            FailurePolicy::Fail => "Fail",
        }
    }
}

/// Options shared by every webhook registered against one manager.
///
/// `failure_policy` and `filter_eirini_apps` are passed through unset when
/// `None`; the control plane applies its own defaults.
#[derive(Clone, Debug, Default)]
pub struct ManagerOptions {
    pub namespace: String,
    pub operator_fingerprint: String,
    pub failure_policy: Option<FailurePolicy>,
    pub filter_eirini_apps: Option<bool>,
}

/// How the control plane reaches the webhook server. Fixed for the lifetime
/// of a manager; every generated entry carries exactly one of the two forms.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookEndpoint {
    /// Directly addressable host, e.g. when running outside the cluster.
    Host { host: String, port: i32 },
    /// In-cluster Service in the manager namespace.
    Service { name: String, port: i32 },
}

impl WebhookEndpoint {
    pub(crate) fn port(&self) -> i32 {
        match self {
            WebhookEndpoint::Host { port, .. } => *port,
            WebhookEndpoint::Service { port, .. } => *port,
        }
    }

    pub(crate) fn common_name(&self, namespace: &str) -> String {
        match self {
            WebhookEndpoint::Host { host, .. } => host.clone(),
            WebhookEndpoint::Service { name, .. } => format!("{name}.{namespace}.svc"),
        }
    }
}

/// Holds the addressing mode, namespace and credential material for one set
/// of extensions. Managers are plain values; several can coexist in one
/// process.
pub struct Manager {
    client: Client,
    options: ManagerOptions,
    credsgen: Arc<dyn Credsgen>,
    webhook_server: WebhookServer,
    webhook_config: WebhookConfig,
    watchers: Vec<Arc<dyn Watcher>>,
}

impl Manager {
    /// The webhook server handle and the configuration generator are created
    /// here, exactly once. Registrations accumulate until [`Manager::start`];
    /// nothing resets the accumulated list.
    pub fn new(
        client: Client,
        endpoint: WebhookEndpoint,
        options: ManagerOptions,
        credsgen: Arc<dyn Credsgen>,
    ) -> Manager {
        let webhook_config = WebhookConfig::new(
            endpoint,
            &options.namespace,
            &options.operator_fingerprint,
        );
        Manager {
            client,
            options,
            credsgen,
            webhook_server: WebhookServer::new(),
            webhook_config,
            watchers: Vec::new(),
        }
    }

    /// Binds an extension to `/<id>` on the webhook server and queues it for
    /// configuration generation. Fails if the ID is empty or the path is
    /// already taken; earlier registrations are unaffected.
    pub fn register(
        &mut self,
        extension: Arc<dyn Extension>,
        options: WebhookOptions,
    ) -> Result<(), Error> {
        let mut webhook = Webhook::new(extension, options);
        webhook.register_admission_webhook(&mut self.webhook_server)?;
        self.webhook_config.add(webhook);
        Ok(())
    }

    pub fn add_watcher(&mut self, watcher: Arc<dyn Watcher>) {
        self.watchers.push(watcher);
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    pub fn webhook_config(&self) -> &WebhookConfig {
        &self.webhook_config
    }

    /// Obtains the TLS bundle, publishes the webhook configuration and serves
    /// admission traffic until the process ends. Registration must be
    /// complete before calling this.
    pub async fn start(&mut self) -> Result<(), Error> {
        let common_name = self
            .webhook_config
            .endpoint()
            .common_name(&self.options.namespace);
        let certificate = load_or_create_cert(
            self.client.clone(),
            &*self.credsgen,
            &common_name,
            &self.options,
        )
        .await?;

        self.webhook_config
            .set_ca_bundle(certificate.ca_cert.clone().into_bytes());
        self.webhook_config.apply(&self.client).await?;

        if !self.watchers.is_empty() {
            tokio::spawn(run_pod_watch(
                self.client.clone(),
                self.options.namespace.clone(),
                self.watchers.clone(),
            ));
        }

        let mut bind = std::env::var("EIRINIX_BIND").unwrap_or_default();
        if bind.is_empty() {
            bind = format!("0.0.0.0:{}", self.webhook_config.endpoint().port());
        }
        let bind: SocketAddr = bind
            .parse()
            .map_err(|e| Error::ConfigError(format!("invalid EIRINIX_BIND ({bind}): {e}")))?;

        info!(
            "starting webhook server for {} in namespace {}",
            self.options.operator_fingerprint, self.options.namespace
        );
        self.webhook_server
            .run(bind, &certificate, self.client.clone())
            .await
    }
}
