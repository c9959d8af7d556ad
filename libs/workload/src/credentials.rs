use k8s_openapi::api::core::v1::Pod;
use tracing::warn;
use vmkit_api::Credential;
use vmkit_reconcile::Cache;

use crate::objects::env;
use crate::placement::main_container_mut;

/// Inject the named public keys into the machine container.
///
/// Appends `PUBLIC_KEY_COUNT` followed by `PUBLIC_KEY_1..=N` in the order
/// the names are given. Names that cannot be resolved are logged and left
/// out; the count only covers keys that were found.
pub fn add_public_keys(pod: &mut Pod, names: &[String], credentials: &dyn Cache<Credential>) {
    let keys: Vec<String> = names
        .iter()
        .filter_map(|name| match credentials.get(name) {
            Ok(Some(cred)) => Some(cred.spec.public_key.clone()),
            Ok(None) => {
                warn!(credential = %name, "Public key not found, skipping");
                None
            }
            Err(e) => {
                warn!(credential = %name, error = %e, "Public key lookup failed, skipping");
                None
            }
        })
        .collect();

    let Some(container) = main_container_mut(pod) else {
        return;
    };
    let vars = container.env.get_or_insert_with(Vec::new);
    vars.push(env("PUBLIC_KEY_COUNT", keys.len().to_string()));
    vars.extend(
        keys.into_iter()
            .enumerate()
            .map(|(i, key)| env(&format!("PUBLIC_KEY_{}", i + 1), key)),
    );
}
