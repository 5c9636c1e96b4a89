use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    core::admission::{AdmissionRequest, AdmissionResponse},
    Client,
};

use crate::Error;

/// One admission extension. The server dispatches every pod request hitting
/// the extension's registered path to `handle`; returning an error denies the
/// admission with the error text as the reason.
#[async_trait]
pub trait Extension: Send + Sync {
    async fn handle(
        &self,
        client: Client,
        req: &AdmissionRequest<Pod>,
    ) -> Result<AdmissionResponse, Error>;
}

/// Builds an allowed response carrying the JSON patch that turns the admitted
/// pod into `mutated`. Identical pods produce a plain allow with no patch.
pub fn patch_for(req: &AdmissionRequest<Pod>, mutated: &Pod) -> Result<AdmissionResponse, Error> {
    let res = AdmissionResponse::from(req);
    let Some(original) = &req.object else {
        return Ok(res);
    };
    let patch = json_patch::diff(
        &serde_json::to_value(original)?,
        &serde_json::to_value(mutated)?,
    );
    if patch.0.is_empty() {
        return Ok(res);
    }
    Ok(res.with_patch(patch)?)
}
