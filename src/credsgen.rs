use std::collections::BTreeMap;

use k8s_openapi::{api::core::v1::Secret, ByteString};
use kube::{api::PostParams, core::ObjectMeta, Api, Client};
use log::info;
use rcgen::{CertificateParams, DnType, IsCa, KeyPair};

use crate::{manager::ManagerOptions, Error};

/// TLS material for the webhook endpoint. `cert`/`key` terminate TLS on the
/// server; `ca_cert` is published as the caBundle of every generated entry.
#[derive(Clone, Debug, Default)]
pub struct Certificate {
    pub ca_cert: String,
    pub ca_key: String,
    pub cert: String,
    pub key: String,
}

/// Produces a certificate bundle for a common name. Failures here are fatal
/// to manager initialization.
pub trait Credsgen: Send + Sync {
    fn generate_certificate(&self, common_name: &str) -> Result<Certificate, Error>;
}

/// Default provider: a throwaway CA signing one leaf certificate for the
/// webhook endpoint.
pub struct RcgenCredsgen {
    pub organization: String,
}

impl Credsgen for RcgenCredsgen {
    fn generate_certificate(&self, common_name: &str) -> Result<Certificate, Error> {
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(DnType::OrganizationName, &self.organization);

        let ca_key_pair = KeyPair::generate()?;
        let ca = params.self_signed(&ca_key_pair)?;

        let mut params = CertificateParams::new(vec![common_name.to_string()])?;
        params
            .distinguished_name
            .push(DnType::OrganizationName, &self.organization);
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);

        let cert_key_pair = KeyPair::generate()?;
        let cert = params.signed_by(&cert_key_pair, &ca, &ca_key_pair)?;

        Ok(Certificate {
            ca_cert: ca.pem(),
            ca_key: ca_key_pair.serialize_pem(),
            cert: cert.pem(),
            key: cert_key_pair.serialize_pem(),
        })
    }
}

impl TryFrom<Secret> for Certificate {
    type Error = Error;

    fn try_from(mut value: Secret) -> Result<Self, Error> {
        let mut take = |key: &str| -> Result<String, Error> {
            let bytes = value
                .data
                .as_mut()
                .and_then(|x| x.remove(key))
                .ok_or_else(|| Error::UserInputError(format!("missing {key} from secret")))?
                .0;
            String::from_utf8(bytes)
                .map_err(|_| Error::UserInputError(format!("invalid UTF-8 in {key}")))
        };
        Ok(Certificate {
            ca_cert: take("ca_cert")?,
            ca_key: take("ca_key")?,
            cert: take("cert")?,
            key: take("key")?,
        })
    }
}

impl From<Certificate> for BTreeMap<String, ByteString> {
    fn from(value: Certificate) -> Self {
        let mut out: BTreeMap<String, ByteString> = Default::default();
        out.insert("ca_cert".to_string(), ByteString(value.ca_cert.into_bytes()));
        out.insert("ca_key".to_string(), ByteString(value.ca_key.into_bytes()));
        out.insert("cert".to_string(), ByteString(value.cert.into_bytes()));
        out.insert("key".to_string(), ByteString(value.key.into_bytes()));
        out
    }
}

fn secret_name(fingerprint: &str) -> String {
    format!("{fingerprint}-webhook-cert")
}

/// Loads the TLS bundle from the operator secret, generating and storing it
/// on first run. Losing the create race to another replica falls back to the
/// stored bundle.
pub async fn load_or_create_cert(
    client: Client,
    credsgen: &dyn Credsgen,
    common_name: &str,
    options: &ManagerOptions,
) -> Result<Certificate, Error> {
    let secret_api: Api<Secret> = Api::namespaced(client, &options.namespace);
    let name = secret_name(&options.operator_fingerprint);
    if let Some(secret) = secret_api.get_opt(&name).await? {
        return secret.try_into();
    }

    let certificate = credsgen.generate_certificate(common_name)?;
    info!(
        "storing webhook TLS bundle in secret {}/{name}",
        options.namespace
    );
    let out = secret_api
        .create(
            &PostParams::default(),
            &Secret {
                data: Some(certificate.clone().into()),
                immutable: Some(true),
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    namespace: Some(options.namespace.clone()),
                    ..Default::default()
                },
                ..Default::default()
            },
        )
        .await;

    match out {
        Ok(_) => Ok(certificate),
        Err(e) => {
            if let Some(secret) = secret_api.get_opt(&name).await? {
                return secret.try_into();
            }
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_certificate() {
        let credsgen = RcgenCredsgen {
            organization: "eirini-x".to_string(),
        };
        let bundle = credsgen.generate_certificate("extension.cf.svc").unwrap();
        assert!(bundle.ca_cert.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(bundle.cert.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(bundle.key.contains("PRIVATE KEY-----"));
        assert!(bundle.ca_key.contains("PRIVATE KEY-----"));
    }

    #[test]
    fn test_secret_round_trip() {
        let bundle = Certificate {
            ca_cert: "ca".to_string(),
            ca_key: "cakey".to_string(),
            cert: "cert".to_string(),
            key: "key".to_string(),
        };
        let secret = Secret {
            data: Some(bundle.clone().into()),
            ..Default::default()
        };
        let decoded: Certificate = secret.try_into().unwrap();
        assert_eq!(decoded.ca_cert, "ca");
        assert_eq!(decoded.ca_key, "cakey");
        assert_eq!(decoded.cert, "cert");
        assert_eq!(decoded.key, "key");
    }

    #[test]
    fn test_secret_missing_key() {
        let err = Certificate::try_from(Secret::default()).unwrap_err();
        assert!(matches!(err, Error::UserInputError(_)));
    }
}
