//! Credential CRD

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A public key that can be injected into guests by name.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "vmkit.io",
    version = "v1alpha1",
    kind = "Credential",
    shortname = "cred"
)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSpec {
    /// Public key material, typically an OpenSSH `authorized_keys` line.
    pub public_key: String,
}
