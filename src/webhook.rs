use std::{collections::BTreeMap, sync::Arc};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::{
    extension::Extension,
    manager::{FailurePolicy, ManagerOptions},
    server::WebhookServer,
    Error, LABEL_SOURCE_TYPE,
};

/// Per-registration options. The ID must be unique per manager; it is used
/// verbatim as the URL path segment of the handler.
#[derive(Clone, Debug, Default)]
pub struct WebhookOptions {
    pub id: String,
    pub manager_options: ManagerOptions,
}

/// One extension bound to its options. Registration fixes the handler path
/// and the object selector; network addressing is resolved later, at
/// generation time, from the manager endpoint, so the same webhook works in
/// host and service mode.
pub struct Webhook {
    extension: Arc<dyn Extension>,
    options: WebhookOptions,
    object_selector: Option<LabelSelector>,
}

impl Webhook {
    pub fn new(extension: Arc<dyn Extension>, options: WebhookOptions) -> Webhook {
        Webhook {
            extension,
            options,
            object_selector: None,
        }
    }

    /// Registers the handler on the webhook server under `/<id>`.
    ///
    /// With `filter_eirini_apps` set, the generated entry only intercepts
    /// pods labeled as Eirini apps; otherwise no selector is attached and all
    /// qualifying pods are intercepted.
    pub fn register_admission_webhook(&mut self, server: &mut WebhookServer) -> Result<(), Error> {
        if self.options.id.is_empty() {
            return Err(Error::ConfigError(
                "webhook ID must not be empty".to_string(),
            ));
        }
        if self
            .options
            .manager_options
            .filter_eirini_apps
            .unwrap_or(false)
        {
            self.object_selector = Some(LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    LABEL_SOURCE_TYPE.to_string(),
                    "APP".to_string(),
                )])),
                ..Default::default()
            });
        }
        server.register(&self.path(), self.extension.clone())
    }

    pub fn id(&self) -> &str {
        &self.options.id
    }

    pub fn path(&self) -> String {
        format!("/{}", self.options.id)
    }

    pub(crate) fn failure_policy(&self) -> Option<FailurePolicy> {
        self.options.manager_options.failure_policy
    }

    pub(crate) fn object_selector(&self) -> Option<&LabelSelector> {
        self.object_selector.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Pod;
    use kube::{
        core::admission::{AdmissionRequest, AdmissionResponse},
        Client,
    };

    use super::*;

    struct NoopExtension;

    #[async_trait::async_trait]
    impl Extension for NoopExtension {
        async fn handle(
            &self,
            _client: Client,
            req: &AdmissionRequest<Pod>,
        ) -> Result<AdmissionResponse, Error> {
            Ok(AdmissionResponse::from(req))
        }
    }

    fn webhook(id: &str, options: ManagerOptions) -> Webhook {
        Webhook::new(
            Arc::new(NoopExtension),
            WebhookOptions {
                id: id.to_string(),
                manager_options: options,
            },
        )
    }

    #[test]
    fn test_empty_id_rejected() {
        let mut server = WebhookServer::new();
        let err = webhook("", ManagerOptions::default())
            .register_admission_webhook(&mut server)
            .unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let mut server = WebhookServer::new();
        webhook("volume", ManagerOptions::default())
            .register_admission_webhook(&mut server)
            .unwrap();
        let err = webhook("volume", ManagerOptions::default())
            .register_admission_webhook(&mut server)
            .unwrap_err();
        assert!(matches!(err, Error::RegistrationError(_)));
    }

    #[test]
    fn test_selector_only_with_filter() {
        let mut server = WebhookServer::new();

        let mut unfiltered = webhook("a", ManagerOptions::default());
        unfiltered.register_admission_webhook(&mut server).unwrap();
        assert!(unfiltered.object_selector().is_none());

        let mut off = webhook(
            "b",
            ManagerOptions {
                filter_eirini_apps: Some(false),
                ..Default::default()
            },
        );
        off.register_admission_webhook(&mut server).unwrap();
        assert!(off.object_selector().is_none());

        let mut on = webhook(
            "c",
            ManagerOptions {
                filter_eirini_apps: Some(true),
                ..Default::default()
            },
        );
        on.register_admission_webhook(&mut server).unwrap();
        let selector = on.object_selector().unwrap();
        assert_eq!(
            selector
                .match_labels
                .as_ref()
                .unwrap()
                .get(LABEL_SOURCE_TYPE),
            Some(&"APP".to_string())
        );
    }
}
