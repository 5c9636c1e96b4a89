use std::collections::BTreeMap;

use k8s_openapi::{
    api::admissionregistration::v1::{
        MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
        WebhookClientConfig,
    },
    ByteString,
};
use kube::{
    api::{Patch, PatchParams},
    core::ObjectMeta,
    Api, Client,
};
use log::info;

use crate::{manager::WebhookEndpoint, webhook::Webhook, Error};

/// Accumulates registered webhooks and projects them into the admission
/// configuration entries consumed by the control plane.
///
/// Generation is a pure read: it never fails, preserves registration order
/// and yields structurally equal output on repeated calls, so a
/// reconciliation loop can invoke it freely once registration is done.
pub struct WebhookConfig {
    endpoint: WebhookEndpoint,
    namespace: String,
    fingerprint: String,
    ca_bundle: Option<Vec<u8>>,
    webhooks: Vec<Webhook>,
}

impl WebhookConfig {
    pub fn new(endpoint: WebhookEndpoint, namespace: &str, fingerprint: &str) -> WebhookConfig {
        WebhookConfig {
            endpoint,
            namespace: namespace.to_string(),
            fingerprint: fingerprint.to_string(),
            ca_bundle: None,
            webhooks: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, webhook: Webhook) {
        self.webhooks.push(webhook);
    }

    /// CA bundle attached to every generated entry, PEM bytes from the
    /// certificate provider. Without it entries are generated without a
    /// caBundle rather than failing.
    pub fn set_ca_bundle(&mut self, ca_bundle: Vec<u8>) {
        self.ca_bundle = Some(ca_bundle);
    }

    pub fn endpoint(&self) -> &WebhookEndpoint {
        &self.endpoint
    }

    /// Name of the published `MutatingWebhookConfiguration`.
    pub fn name(&self) -> String {
        format!("{}-mutating-hook", self.fingerprint)
    }

    pub fn generate_admission_webhook(&self) -> Vec<MutatingWebhook> {
        self.webhooks.iter().map(|w| self.entry_for(w)).collect()
    }

    fn entry_for(&self, webhook: &Webhook) -> MutatingWebhook {
        let id = webhook.id();
        let client_config = match &self.endpoint {
            WebhookEndpoint::Host { host, port } => WebhookClientConfig {
                url: Some(format!("https://{host}:{port}/{id}")),
                service: None,
                ca_bundle: self.ca_bundle.clone().map(ByteString),
            },
            WebhookEndpoint::Service { name, port } => WebhookClientConfig {
                url: None,
                service: Some(ServiceReference {
                    name: name.clone(),
                    namespace: self.namespace.clone(),
                    path: Some(format!("/{id}")),
                    port: Some(*port),
                }),
                ca_bundle: self.ca_bundle.clone().map(ByteString),
            },
        };

        MutatingWebhook {
            name: format!("{id}.{}.org", self.fingerprint),
            client_config,
            rules: Some(vec![RuleWithOperations {
                api_groups: Some(vec!["".to_string()]),
                api_versions: Some(vec!["v1".to_string()]),
                operations: Some(vec!["CREATE".to_string(), "UPDATE".to_string()]),
                resources: Some(vec!["pods".to_string()]),
                scope: Some("*".to_string()),
            }]),
            failure_policy: webhook.failure_policy().map(|p| p.as_str().to_string()),
            object_selector: webhook.object_selector().cloned(),
            side_effects: "None".to_string(),
            admission_review_versions: vec!["v1beta1".to_string(), "v1".to_string()],
            ..Default::default()
        }
    }

    /// Server-side applies the configuration when the live object drifted
    /// from the generated one.
    pub async fn apply(&self, client: &Client) -> Result<(), Error> {
        let api: Api<MutatingWebhookConfiguration> = Api::all(client.clone());
        let name = self.name();
        let target = MutatingWebhookConfiguration {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(BTreeMap::from([(
                    "app".to_string(),
                    self.fingerprint.clone(),
                )])),
                ..Default::default()
            },
            webhooks: Some(self.generate_admission_webhook()),
        };
        let current = api.get_opt(&name).await?;
        if current.is_none() || current.as_ref() != Some(&target) {
            info!("applying mutating webhook configuration {name}");
            api.patch(
                &name,
                &PatchParams::apply(&self.fingerprint),
                &Patch::Apply(&target),
            )
            .await?;
        }
        Ok(())
    }
}
