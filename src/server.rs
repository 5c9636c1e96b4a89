use std::{collections::HashMap, convert::Infallible, net::SocketAddr, sync::Arc};

use k8s_openapi::api::core::v1::Pod;
use kube::{
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
    Client, ResourceExt,
};
use log::{error, info, warn};
use warp::{
    http::StatusCode,
    reply::{self, Reply},
    Filter,
};

use crate::{credsgen::Certificate, extension::Extension, Error};

type Handlers = Arc<HashMap<String, Arc<dyn Extension>>>;

/// TLS endpoint dispatching admission reviews to the extensions registered
/// on it. Registration happens sequentially during startup; once `run` is
/// called the handler set is frozen.
#[derive(Default)]
pub struct WebhookServer {
    handlers: HashMap<String, Arc<dyn Extension>>,
}

impl WebhookServer {
    pub fn new() -> WebhookServer {
        WebhookServer::default()
    }

    pub(crate) fn register(
        &mut self,
        path: &str,
        extension: Arc<dyn Extension>,
    ) -> Result<(), Error> {
        if self.handlers.contains_key(path) {
            return Err(Error::RegistrationError(format!(
                "path {path} is already registered"
            )));
        }
        self.handlers.insert(path.to_string(), extension);
        Ok(())
    }

    pub async fn run(
        &self,
        bind: SocketAddr,
        certificate: &Certificate,
        client: Client,
    ) -> Result<(), Error> {
        let handlers: Handlers = Arc::new(self.handlers.clone());
        let routes = warp::post()
            .and(warp::path::param::<String>())
            .and(warp::path::end())
            .and(warp::body::json())
            .and(warp::any().map(move || handlers.clone()))
            .and(warp::any().map(move || client.clone()))
            .and_then(admission_handler)
            .with(warp::log::log("webhook"));

        info!("webhook server listening on {bind}");

        warp::serve(routes)
            .tls()
            .cert(certificate.cert.as_bytes())
            .key(certificate.key.as_bytes())
            .run(bind)
            .await;

        Ok(())
    }
}

async fn admission_handler(
    id: String,
    body: AdmissionReview<Pod>,
    handlers: Handlers,
    client: Client,
) -> Result<impl Reply, Infallible> {
    let Some(extension) = handlers.get(&format!("/{id}")) else {
        warn!("admission request for unknown path /{id}");
        return Ok(reply::with_status(
            reply::json(&serde_json::json!({ "message": "no webhook registered at this path" })),
            StatusCode::NOT_FOUND,
        ));
    };

    let req: AdmissionRequest<Pod> = match body.try_into() {
        Ok(req) => req,
        Err(err) => {
            error!("invalid admission request: {err}");
            return Ok(reply::with_status(
                reply::json(&AdmissionResponse::invalid(err).into_review()),
                StatusCode::OK,
            ));
        }
    };

    let mut res = AdmissionResponse::from(&req);
    if let Some(pod) = &req.object {
        let name = pod.name_any();
        res = match extension.handle(client, &req).await {
            Ok(res) => {
                info!("accepted: {:?} on Pod {}", req.operation, name);
                res
            }
            Err(err) => {
                warn!("denied: {:?} on {} ({})", req.operation, name, err);
                res.deny(err.to_string())
            }
        };
    }
    Ok(reply::with_status(
        reply::json(&res.into_review()),
        StatusCode::OK,
    ))
}
